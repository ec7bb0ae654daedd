//! The workflow engine: buyer/seller-facing transitions.
//!
//! Admin adjudication (`approve` / `reject`) lives in
//! [`crate::adjudication`]; both impl blocks share this struct.

use std::sync::Mutex;

use llr_audit::AuditWriter;
use llr_ledger::CertificateGenerator;
use llr_schemas::{
    ActorId, BuyRequest, BuyRequestStatus, BuyRequestView, LandStatus, TimelineEvent,
};
use llr_verify::Clock;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::WorkflowError;
use crate::store::{RegistryStore, StoreError};
use crate::traits::{Directory, Notifier};

/// The single entry point for all BuyRequest transitions.
///
/// Collaborators are trait seams: real implementations in production,
/// stubs in tests. No transition is retried automatically by the engine;
/// retries are the caller's responsibility and every guard is an idempotent
/// re-check, so a duplicate retry is observably rejected rather than
/// double-applied.
pub struct WorkflowEngine<S, D, C, N, G>
where
    S: RegistryStore,
    D: Directory,
    C: Clock,
    N: Notifier,
    G: CertificateGenerator,
{
    pub(crate) store: S,
    pub(crate) directory: D,
    pub(crate) clock: C,
    pub(crate) notifier: N,
    pub(crate) certificates: G,
    /// Optional append-only audit trail. Best-effort: an audit write failure
    /// is logged, never fails a committed transition.
    audit: Option<Mutex<AuditWriter>>,
}

impl<S, D, C, N, G> WorkflowEngine<S, D, C, N, G>
where
    S: RegistryStore,
    D: Directory,
    C: Clock,
    N: Notifier,
    G: CertificateGenerator,
{
    pub fn new(store: S, directory: D, clock: C, notifier: N, certificates: G) -> Self {
        Self {
            store,
            directory,
            clock,
            notifier,
            certificates,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditWriter) -> Self {
        self.audit = Some(Mutex::new(audit));
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // -- shared plumbing ----------------------------------------------------

    pub(crate) fn audit_event(&self, request_id: Uuid, event_type: &str, payload: serde_json::Value) {
        if let Some(audit) = &self.audit {
            let mut w = match audit.lock() {
                Ok(w) => w,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Err(err) = w.append(request_id, event_type, payload) {
                tracing::error!(%request_id, event_type, error = %err, "audit append failed");
            }
        }
    }

    /// Commit a transition through the store's compare-and-set. A guard
    /// failure is surfaced as `WrongState` carrying the status actually
    /// stored, so concurrent losers see why they lost.
    pub(crate) async fn persist_transition(
        &self,
        req: &BuyRequest,
        expected: BuyRequestStatus,
    ) -> Result<(), WorkflowError> {
        if self.store.update_if_status(req, expected).await? {
            return Ok(());
        }
        let actual = self.store.fetch_buy_request(req.id).await?.status;
        Err(WorkflowError::WrongState { expected, actual })
    }

    // -- create -------------------------------------------------------------

    /// Open a BuyRequest from a negotiated agreement.
    ///
    /// Guards: positive price; parcel listed for sale; seller has
    /// verification enabled; no active request for the conversation or the
    /// parcel. On success the parcel moves to `UNDER_TRANSACTION`, a
    /// confirmation code is issued to the seller out-of-band, and the
    /// timeline opens with one `CREATED` entry.
    pub async fn create(
        &self,
        conversation_id: Uuid,
        land_id: Uuid,
        seller: ActorId,
        buyer: ActorId,
        agreed_price: i64,
    ) -> Result<BuyRequest, WorkflowError> {
        if agreed_price <= 0 {
            return Err(WorkflowError::InvalidPrice);
        }

        // The conversation check runs before the parcel check: a duplicate
        // create for a conversation whose request already holds the parcel
        // reports the duplicate, not the hold it itself caused.
        if self
            .store
            .fetch_active_request_for_conversation(conversation_id)
            .await?
            .is_some()
        {
            return Err(WorkflowError::AlreadyExists);
        }

        let mut land = match self.store.fetch_land(land_id).await {
            Ok(land) => land,
            Err(StoreError::NotFound) => return Err(WorkflowError::LandNotForSale),
            Err(e) => return Err(e.into()),
        };
        if !land.listed_for_sale() {
            return Err(WorkflowError::LandNotForSale);
        }
        if !self.directory.two_factor_enabled(seller) {
            return Err(WorkflowError::SellerNotVerified);
        }

        // Take the parcel off the open market first. The conditional write is
        // the serialization point: of two concurrent creates for the same
        // parcel, exactly one takes the hold and the other sees the parcel as
        // no longer for sale.
        land.status = LandStatus::UnderTransaction;
        if !self
            .store
            .update_land_if_status(&land, LandStatus::ForSale)
            .await?
        {
            return Err(WorkflowError::LandNotForSale);
        }

        let now = self.clock.now();
        let mut req = BuyRequest::new(conversation_id, land_id, seller, buyer, agreed_price, now);
        let code = llr_verify::issue(&mut req, now);
        req.push_timeline(
            TimelineEvent::Created,
            buyer,
            "buy request created from negotiated agreement",
            json!({ "agreed_price": agreed_price, "code_expires_at": req.two_factor_expires_at }),
            now,
        );

        if let Err(err) = self.store.insert_buy_request(&req).await {
            // Give the hold back. If this write is lost too, the parcel
            // surfaces as stuck-under-transaction in reconciliation.
            land.status = LandStatus::ForSale;
            if let Err(release_err) = self
                .store
                .update_land_if_status(&land, LandStatus::UnderTransaction)
                .await
            {
                tracing::error!(%land_id, error = %release_err, "could not release parcel hold");
            }
            return Err(err.into());
        }

        self.notifier.code_issued(seller, req.id, &code);
        self.audit_event(
            req.id,
            "CREATED",
            json!({
                "conversation_id": conversation_id,
                "land_id": land_id,
                "seller": seller,
                "buyer": buyer,
                "agreed_price": agreed_price,
            }),
        );
        info!(request_id = %req.id, %land_id, "buy request created");
        Ok(req)
    }

    // -- resend code --------------------------------------------------------

    /// Issue a fresh confirmation code, invalidating any prior unconsumed
    /// one. Only the seller of record may request it, and only while the
    /// request awaits seller confirmation.
    ///
    /// The code is returned for audit/testing purposes only; delivery to the
    /// seller happens out-of-band through the notifier.
    pub async fn resend_code(
        &self,
        request_id: Uuid,
        caller: ActorId,
    ) -> Result<String, WorkflowError> {
        let mut req = self.store.fetch_buy_request(request_id).await?;
        if caller != req.seller {
            return Err(WorkflowError::WrongActor);
        }
        if req.status != BuyRequestStatus::PendingSellerConfirmation {
            return Err(WorkflowError::WrongState {
                expected: BuyRequestStatus::PendingSellerConfirmation,
                actual: req.status,
            });
        }

        let now = self.clock.now();
        let code = llr_verify::issue(&mut req, now);
        req.push_timeline(
            TimelineEvent::CodeIssued,
            caller,
            "confirmation code reissued",
            json!({ "code_expires_at": req.two_factor_expires_at }),
            now,
        );
        self.persist_transition(&req, BuyRequestStatus::PendingSellerConfirmation)
            .await?;

        self.notifier.code_issued(req.seller, req.id, &code);
        self.audit_event(req.id, "CODE_ISSUED", json!({}));
        Ok(code)
    }

    // -- confirm ------------------------------------------------------------

    /// Seller confirmation gate: `PENDING_SELLER_CONFIRMATION ->
    /// PENDING_ADMIN_APPROVAL`, guarded by the one-time code.
    ///
    /// An invalid, expired, or already-consumed code leaves the request
    /// unchanged. A duplicate confirm after success fails with `WrongState`,
    /// never a silent success.
    pub async fn confirm(
        &self,
        request_id: Uuid,
        caller: ActorId,
        code: &str,
    ) -> Result<BuyRequest, WorkflowError> {
        let mut req = self.store.fetch_buy_request(request_id).await?;
        if caller != req.seller {
            return Err(WorkflowError::WrongActor);
        }
        if req.status != BuyRequestStatus::PendingSellerConfirmation {
            return Err(WorkflowError::WrongState {
                expected: BuyRequestStatus::PendingSellerConfirmation,
                actual: req.status,
            });
        }

        let now = self.clock.now();
        if !llr_verify::verify(&mut req, code, now) {
            // Working copy is discarded; nothing was persisted.
            return Err(WorkflowError::InvalidOrExpiredCode);
        }

        req.status = BuyRequestStatus::PendingAdminApproval;
        req.push_timeline(
            TimelineEvent::SellerConfirmed,
            caller,
            "seller confirmed with one-time code",
            json!({}),
            now,
        );
        self.persist_transition(&req, BuyRequestStatus::PendingSellerConfirmation)
            .await?;

        self.notifier.admin_queue(req.id);
        self.audit_event(req.id, "SELLER_CONFIRMED", json!({}));
        info!(request_id = %req.id, "seller confirmed; pending admin approval");
        Ok(req)
    }

    // -- cancel -------------------------------------------------------------

    /// Cancel from any non-terminal state. Only a party to the request
    /// (buyer or seller) may cancel; the parcel returns to its for-sale
    /// state unless ownership was already reassigned.
    pub async fn cancel(
        &self,
        request_id: Uuid,
        caller: ActorId,
        reason: &str,
    ) -> Result<BuyRequest, WorkflowError> {
        let mut req = self.store.fetch_buy_request(request_id).await?;
        if !req.is_party(caller) {
            return Err(WorkflowError::Forbidden);
        }
        if req.status.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal(req.status));
        }

        let now = self.clock.now();
        let prior = req.status;
        req.status = BuyRequestStatus::Cancelled;
        req.two_factor_code = None;
        req.two_factor_expires_at = None;
        req.push_timeline(
            TimelineEvent::Cancelled,
            caller,
            format!("cancelled: {reason}"),
            json!({ "prior_status": prior }),
            now,
        );
        self.persist_transition(&req, prior).await?;

        self.release_land(&req).await?;
        self.audit_event(req.id, "CANCELLED", json!({ "reason": reason, "by": caller }));
        info!(request_id = %req.id, "buy request cancelled");
        Ok(req)
    }

    /// Return the parcel to the open market after a rejected or cancelled
    /// transaction, unless ownership was already reassigned.
    pub(crate) async fn release_land(&self, req: &BuyRequest) -> Result<(), WorkflowError> {
        let mut land = self.store.fetch_land(req.land_id).await?;
        if land.status == LandStatus::UnderTransaction && land.current_owner == req.seller {
            land.status = LandStatus::ForSale;
            // Guarded write: a writer that already moved the parcel wins.
            self.store
                .update_land_if_status(&land, LandStatus::UnderTransaction)
                .await?;
        }
        Ok(())
    }

    // -- read ---------------------------------------------------------------

    /// Read-only projection with derived flags.
    pub async fn get_status(&self, request_id: Uuid) -> Result<BuyRequestView, WorkflowError> {
        let req = self.store.fetch_buy_request(request_id).await?;
        Ok(BuyRequestView::project(req, self.clock.now()))
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::{DateTime, Utc};
    use llr_schemas::{Caller, LandParcel, Role};
    use std::collections::HashSet;

    // -- Collaborator stubs --------------------------------------------------

    struct TestDirectory {
        admins: HashSet<ActorId>,
        verified: HashSet<ActorId>,
    }

    impl Directory for TestDirectory {
        fn resolve(&self, id: ActorId) -> Option<Caller> {
            let role = if self.admins.contains(&id) {
                Role::Admin
            } else {
                Role::User
            };
            Some(Caller { id, role })
        }

        fn two_factor_enabled(&self, id: ActorId) -> bool {
            self.verified.contains(&id)
        }
    }

    struct NullNotifier;
    impl Notifier for NullNotifier {
        fn code_issued(&self, _seller: ActorId, _request_id: Uuid, _code: &str) {}
        fn admin_queue(&self, _request_id: Uuid) {}
    }

    struct OkCerts;
    impl CertificateGenerator for OkCerts {
        fn regenerate(
            &self,
            transaction_id: Uuid,
            _land_id: Uuid,
            _new_owner: ActorId,
        ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            Ok(format!("cert-{transaction_id}"))
        }
    }

    struct FixedClock(DateTime<Utc>);
    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    // -- Harness ------------------------------------------------------------

    type TestEngine = WorkflowEngine<MemoryStore, TestDirectory, FixedClock, NullNotifier, OkCerts>;

    struct Setup {
        engine: TestEngine,
        conversation: Uuid,
        land: Uuid,
        seller: ActorId,
        buyer: ActorId,
        admin: ActorId,
    }

    fn setup() -> Setup {
        let now = Utc::now();
        let seller = ActorId(Uuid::new_v4());
        let buyer = ActorId(Uuid::new_v4());
        let admin = ActorId(Uuid::new_v4());
        let land = Uuid::new_v4();

        let store = MemoryStore::new();
        store.put_land(LandParcel {
            id: land,
            status: llr_schemas::LandStatus::ForSale,
            current_owner: seller,
            owner_since_utc: now - chrono::Duration::days(365),
            ownership_history: Vec::new(),
            is_for_sale: true,
            certificate_ref: None,
        });

        let directory = TestDirectory {
            admins: HashSet::from([admin]),
            verified: HashSet::from([seller]),
        };
        let engine = WorkflowEngine::new(store, directory, FixedClock(now), NullNotifier, OkCerts);

        Setup {
            engine,
            conversation: Uuid::new_v4(),
            land,
            seller,
            buyer,
            admin,
        }
    }

    async fn create(s: &Setup) -> BuyRequest {
        s.engine
            .create(s.conversation, s.land, s.seller, s.buyer, 500_000)
            .await
            .expect("create failed")
    }

    // -- create -------------------------------------------------------------

    #[tokio::test]
    async fn create_opens_pending_seller_confirmation_with_one_timeline_entry() {
        let s = setup();
        let req = create(&s).await;

        assert_eq!(req.status, BuyRequestStatus::PendingSellerConfirmation);
        assert_eq!(req.timeline.len(), 1);
        assert_eq!(req.timeline[0].event, TimelineEvent::Created);
        assert!(req.two_factor_code.is_some());

        let land = s.engine.store().fetch_land(s.land).await.unwrap();
        assert_eq!(land.status, LandStatus::UnderTransaction);
    }

    #[tokio::test]
    async fn create_refuses_unlisted_land() {
        let s = setup();
        let mut land = s.engine.store().fetch_land(s.land).await.unwrap();
        land.is_for_sale = false;
        assert!(s
            .engine
            .store()
            .update_land_if_status(&land, LandStatus::ForSale)
            .await
            .unwrap());

        let err = s
            .engine
            .create(s.conversation, s.land, s.seller, s.buyer, 500_000)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "LAND_NOT_FOR_SALE");
    }

    #[tokio::test]
    async fn create_refuses_unverified_seller() {
        let s = setup();
        let stranger = ActorId(Uuid::new_v4());
        let err = s
            .engine
            .create(s.conversation, s.land, stranger, s.buyer, 500_000)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "SELLER_NOT_VERIFIED");
    }

    #[tokio::test]
    async fn create_refuses_non_positive_price() {
        let s = setup();
        let err = s
            .engine
            .create(s.conversation, s.land, s.seller, s.buyer, 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "INVALID_PRICE");
    }

    #[tokio::test]
    async fn second_create_on_same_conversation_is_already_exists() {
        let s = setup();
        let _first = create(&s).await;
        let err = s
            .engine
            .create(s.conversation, s.land, s.seller, s.buyer, 500_000)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ALREADY_EXISTS");
    }

    // -- confirm ------------------------------------------------------------

    #[tokio::test]
    async fn confirm_with_fresh_code_moves_to_pending_admin_approval() {
        let s = setup();
        let req = create(&s).await;
        let code = s.engine.resend_code(req.id, s.seller).await.unwrap();

        let confirmed = s.engine.confirm(req.id, s.seller, &code).await.unwrap();
        assert_eq!(confirmed.status, BuyRequestStatus::PendingAdminApproval);
        assert!(confirmed.two_factor_verified);
        assert!(confirmed.two_factor_code.is_none());
        assert_eq!(
            confirmed.timeline.last().unwrap().event,
            TimelineEvent::SellerConfirmed
        );
    }

    #[tokio::test]
    async fn confirm_by_non_seller_is_wrong_actor() {
        let s = setup();
        let req = create(&s).await;
        let err = s.engine.confirm(req.id, s.buyer, "000000").await.unwrap_err();
        assert_eq!(err.kind(), "WRONG_ACTOR");
    }

    #[tokio::test]
    async fn confirm_with_wrong_code_leaves_state_unchanged() {
        let s = setup();
        let req = create(&s).await;
        let code = s.engine.resend_code(req.id, s.seller).await.unwrap();
        let wrong = if code == "000000" { "000001" } else { "000000" };

        let err = s.engine.confirm(req.id, s.seller, wrong).await.unwrap_err();
        assert_eq!(err.kind(), "INVALID_OR_EXPIRED_CODE");

        let view = s.engine.get_status(req.id).await.unwrap();
        assert_eq!(
            view.request.status,
            BuyRequestStatus::PendingSellerConfirmation
        );
        // The pending code survives a failed attempt.
        assert!(view.request.two_factor_code.is_some());
    }

    #[tokio::test]
    async fn duplicate_confirm_is_wrong_state_not_silent_success() {
        let s = setup();
        let req = create(&s).await;
        let code = s.engine.resend_code(req.id, s.seller).await.unwrap();

        s.engine.confirm(req.id, s.seller, &code).await.unwrap();
        let err = s.engine.confirm(req.id, s.seller, &code).await.unwrap_err();
        assert_eq!(err.kind(), "WRONG_STATE");
    }

    #[tokio::test]
    async fn stale_code_after_resend_is_rejected() {
        let s = setup();
        let req = create(&s).await;
        let first = s.engine.resend_code(req.id, s.seller).await.unwrap();
        let second = s.engine.resend_code(req.id, s.seller).await.unwrap();

        if first != second {
            let err = s.engine.confirm(req.id, s.seller, &first).await.unwrap_err();
            assert_eq!(err.kind(), "INVALID_OR_EXPIRED_CODE");
        }
        s.engine.confirm(req.id, s.seller, &second).await.unwrap();
    }

    #[tokio::test]
    async fn resend_by_buyer_is_wrong_actor() {
        let s = setup();
        let req = create(&s).await;
        let err = s.engine.resend_code(req.id, s.buyer).await.unwrap_err();
        assert_eq!(err.kind(), "WRONG_ACTOR");
    }

    // -- cancel -------------------------------------------------------------

    #[tokio::test]
    async fn cancel_by_third_party_is_forbidden() {
        let s = setup();
        let req = create(&s).await;
        let stranger = ActorId(Uuid::new_v4());
        let err = s
            .engine
            .cancel(req.id, stranger, "changed my mind")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn cancel_by_buyer_is_terminal_and_releases_land() {
        let s = setup();
        let req = create(&s).await;

        let cancelled = s
            .engine
            .cancel(req.id, s.buyer, "changed my mind")
            .await
            .unwrap();
        assert_eq!(cancelled.status, BuyRequestStatus::Cancelled);

        let land = s.engine.store().fetch_land(s.land).await.unwrap();
        assert_eq!(land.status, LandStatus::ForSale);

        // Subsequent confirm is a clean wrong-state refusal.
        let err = s.engine.confirm(req.id, s.seller, "123456").await.unwrap_err();
        assert_eq!(err.kind(), "WRONG_STATE");
    }

    #[tokio::test]
    async fn cancel_after_cancel_is_already_terminal() {
        let s = setup();
        let req = create(&s).await;
        s.engine.cancel(req.id, s.buyer, "first").await.unwrap();
        let err = s.engine.cancel(req.id, s.buyer, "second").await.unwrap_err();
        assert_eq!(err.kind(), "ALREADY_TERMINAL");
    }

    // -- approve / reject guards (full flows live in llr-testkit) -----------

    #[tokio::test]
    async fn approve_before_confirmation_is_wrong_state() {
        let s = setup();
        let req = create(&s).await;
        let err = s
            .engine
            .approve(req.id, s.admin, "looks good")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "WRONG_STATE");
    }

    #[tokio::test]
    async fn approve_by_non_admin_is_forbidden() {
        let s = setup();
        let req = create(&s).await;
        let code = s.engine.resend_code(req.id, s.seller).await.unwrap();
        s.engine.confirm(req.id, s.seller, &code).await.unwrap();

        let err = s.engine.approve(req.id, s.buyer, "self-approval").await.unwrap_err();
        assert_eq!(err.kind(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn get_status_unknown_id_is_not_found() {
        let s = setup();
        let err = s.engine.get_status(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }

    // -- concurrency ---------------------------------------------------------

    /// MemoryStore wrapper that yields at every call boundary so two
    /// in-flight transitions interleave the way they would over a real
    /// connection pool.
    struct YieldingStore {
        inner: MemoryStore,
    }

    #[async_trait::async_trait]
    impl RegistryStore for YieldingStore {
        async fn insert_buy_request(&self, req: &BuyRequest) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.inner.insert_buy_request(req).await
        }

        async fn fetch_buy_request(&self, id: Uuid) -> Result<BuyRequest, StoreError> {
            tokio::task::yield_now().await;
            self.inner.fetch_buy_request(id).await
        }

        async fn fetch_active_request_for_conversation(
            &self,
            conversation_id: Uuid,
        ) -> Result<Option<BuyRequest>, StoreError> {
            tokio::task::yield_now().await;
            self.inner
                .fetch_active_request_for_conversation(conversation_id)
                .await
        }

        async fn update_if_status(
            &self,
            req: &BuyRequest,
            expected: BuyRequestStatus,
        ) -> Result<bool, StoreError> {
            tokio::task::yield_now().await;
            self.inner.update_if_status(req, expected).await
        }

        async fn list_buy_requests(&self) -> Result<Vec<BuyRequest>, StoreError> {
            tokio::task::yield_now().await;
            self.inner.list_buy_requests().await
        }

        async fn fetch_land(&self, id: Uuid) -> Result<LandParcel, StoreError> {
            tokio::task::yield_now().await;
            self.inner.fetch_land(id).await
        }

        async fn list_land_parcels(&self) -> Result<Vec<LandParcel>, StoreError> {
            tokio::task::yield_now().await;
            self.inner.list_land_parcels().await
        }

        async fn update_land_if_status(
            &self,
            parcel: &LandParcel,
            expected: LandStatus,
        ) -> Result<bool, StoreError> {
            tokio::task::yield_now().await;
            self.inner.update_land_if_status(parcel, expected).await
        }

        async fn insert_land_transaction(
            &self,
            tx: &llr_schemas::LandTransaction,
        ) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.inner.insert_land_transaction(tx).await
        }

        async fn list_land_transactions(
            &self,
        ) -> Result<Vec<llr_schemas::LandTransaction>, StoreError> {
            tokio::task::yield_now().await;
            self.inner.list_land_transactions().await
        }
    }

    struct RaceSetup {
        engine: WorkflowEngine<YieldingStore, TestDirectory, FixedClock, NullNotifier, OkCerts>,
        land: Uuid,
        seller: ActorId,
        buyer: ActorId,
        admin: ActorId,
    }

    fn race_setup() -> RaceSetup {
        let now = Utc::now();
        let seller = ActorId(Uuid::new_v4());
        let buyer = ActorId(Uuid::new_v4());
        let admin = ActorId(Uuid::new_v4());
        let land = Uuid::new_v4();

        let store = YieldingStore {
            inner: MemoryStore::new(),
        };
        store.inner.put_land(LandParcel {
            id: land,
            status: llr_schemas::LandStatus::ForSale,
            current_owner: seller,
            owner_since_utc: now - chrono::Duration::days(365),
            ownership_history: Vec::new(),
            is_for_sale: true,
            certificate_ref: None,
        });

        let directory = TestDirectory {
            admins: HashSet::from([admin]),
            verified: HashSet::from([seller]),
        };
        let engine = WorkflowEngine::new(store, directory, FixedClock(now), NullNotifier, OkCerts);

        RaceSetup {
            engine,
            land,
            seller,
            buyer,
            admin,
        }
    }

    #[tokio::test]
    async fn concurrent_creates_for_one_parcel_admit_exactly_one() {
        let s = race_setup();

        // Two buyers race for the same parcel under different conversations;
        // the conditional parcel hold lets exactly one through.
        let (a, b) = tokio::join!(
            s.engine
                .create(Uuid::new_v4(), s.land, s.seller, s.buyer, 500_000),
            s.engine
                .create(Uuid::new_v4(), s.land, s.seller, s.buyer, 510_000),
        );
        assert!(
            a.is_ok() != b.is_ok(),
            "exactly one create may take the parcel: {a:?} / {b:?}"
        );
        let loser = if a.is_ok() { b } else { a };
        assert_eq!(loser.unwrap_err().kind(), "LAND_NOT_FOR_SALE");

        let requests = s.engine.store().list_buy_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let parcel = s.engine.store().fetch_land(s.land).await.unwrap();
        assert_eq!(parcel.status, LandStatus::UnderTransaction);
    }

    #[tokio::test]
    async fn simultaneous_approve_and_reject_resolve_to_one_decision() {
        let s = race_setup();
        let req = s
            .engine
            .create(Uuid::new_v4(), s.land, s.seller, s.buyer, 500_000)
            .await
            .unwrap();
        let code = s.engine.resend_code(req.id, s.seller).await.unwrap();
        s.engine.confirm(req.id, s.seller, &code).await.unwrap();

        let (approved, rejected) = tokio::join!(
            s.engine.approve(req.id, s.admin, "approving"),
            s.engine.reject(req.id, s.admin, "rejecting"),
        );
        assert!(
            approved.is_ok() != rejected.is_ok(),
            "exactly one adjudication may win: {approved:?} / {rejected:?}"
        );
        if let Err(e) = &approved {
            assert_eq!(e.kind(), "WRONG_STATE");
        }
        if let Err(e) = &rejected {
            assert_eq!(e.kind(), "WRONG_STATE");
        }

        let stored = s.engine.store().fetch_buy_request(req.id).await.unwrap();
        let txs = s.engine.store().list_land_transactions().await.unwrap();
        match stored.status {
            BuyRequestStatus::Completed => assert_eq!(txs.len(), 1),
            BuyRequestStatus::Rejected => assert!(txs.is_empty()),
            other => panic!("unexpected status after adjudication race: {other}"),
        }
    }

    #[tokio::test]
    async fn double_click_confirm_applies_once() {
        let s = race_setup();
        let req = s
            .engine
            .create(Uuid::new_v4(), s.land, s.seller, s.buyer, 500_000)
            .await
            .unwrap();
        let code = s.engine.resend_code(req.id, s.seller).await.unwrap();

        let (a, b) = tokio::join!(
            s.engine.confirm(req.id, s.seller, &code),
            s.engine.confirm(req.id, s.seller, &code),
        );
        assert!(
            a.is_ok() != b.is_ok(),
            "exactly one confirm may apply: {a:?} / {b:?}"
        );
        let loser = if a.is_ok() { b } else { a };
        assert_eq!(loser.unwrap_err().kind(), "WRONG_STATE");

        let stored = s.engine.store().fetch_buy_request(req.id).await.unwrap();
        assert_eq!(stored.status, BuyRequestStatus::PendingAdminApproval);
        let confirmations = stored
            .timeline
            .iter()
            .filter(|e| e.event == TimelineEvent::SellerConfirmed)
            .count();
        assert_eq!(confirmations, 1);
    }
}

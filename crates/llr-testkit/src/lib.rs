//! Shared fakes and harness for workflow scenario tests.
//!
//! Everything here is deterministic: the clock only moves when a test says
//! so, the notifier records instead of sending, and failure injection is
//! scripted per call site.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use llr_ledger::CertificateGenerator;
use llr_schemas::{
    ActorId, BuyRequest, BuyRequestStatus, Caller, LandParcel, LandStatus, LandTransaction, Role,
};
use llr_verify::Clock;
use llr_workflow::{
    Directory, MemoryStore, Notifier, RegistryStore, StoreError, WorkflowEngine,
};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// Clock that only moves when told to. Clones share the same instant.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now = *now + by;
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.advance(Duration::minutes(minutes));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

/// Captures every notification so tests can assert on delivery without any
/// real channel. Clones share the same log.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    inner: Arc<Mutex<NotifierLog>>,
}

#[derive(Default)]
struct NotifierLog {
    codes: Vec<(ActorId, Uuid, String)>,
    admin_alerts: Vec<Uuid>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently delivered code for a request, if any.
    pub fn last_code_for(&self, request_id: Uuid) -> Option<String> {
        let log = self.inner.lock().expect("notifier lock poisoned");
        log.codes
            .iter()
            .rev()
            .find(|(_, id, _)| *id == request_id)
            .map(|(_, _, code)| code.clone())
    }

    pub fn codes_delivered(&self, request_id: Uuid) -> usize {
        let log = self.inner.lock().expect("notifier lock poisoned");
        log.codes.iter().filter(|(_, id, _)| *id == request_id).count()
    }

    pub fn admin_alerts(&self) -> Vec<Uuid> {
        let log = self.inner.lock().expect("notifier lock poisoned");
        log.admin_alerts.clone()
    }
}

impl Notifier for RecordingNotifier {
    fn code_issued(&self, seller: ActorId, request_id: Uuid, code: &str) {
        let mut log = self.inner.lock().expect("notifier lock poisoned");
        log.codes.push((seller, request_id, code.to_string()));
    }

    fn admin_queue(&self, request_id: Uuid) {
        let mut log = self.inner.lock().expect("notifier lock poisoned");
        log.admin_alerts.push(request_id);
    }
}

// ---------------------------------------------------------------------------
// StaticDirectory
// ---------------------------------------------------------------------------

/// Fixed admin and verification sets.
#[derive(Clone, Default)]
pub struct StaticDirectory {
    admins: HashSet<ActorId>,
    unverified: HashSet<ActorId>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_admin(mut self, id: ActorId) -> Self {
        self.admins.insert(id);
        self
    }

    /// Mark an actor as lacking verification (no code delivery possible).
    pub fn without_verification(mut self, id: ActorId) -> Self {
        self.unverified.insert(id);
        self
    }
}

impl Directory for StaticDirectory {
    fn resolve(&self, id: ActorId) -> Option<Caller> {
        let role = if self.admins.contains(&id) {
            Role::Admin
        } else {
            Role::User
        };
        Some(Caller { id, role })
    }

    fn two_factor_enabled(&self, id: ActorId) -> bool {
        !self.unverified.contains(&id)
    }
}

// ---------------------------------------------------------------------------
// FlakyCertificates
// ---------------------------------------------------------------------------

/// Certificate generator that fails its first `failures` calls, then
/// succeeds. `failures = 0` never fails.
pub struct FlakyCertificates {
    failures: AtomicUsize,
}

impl FlakyCertificates {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
        }
    }

    pub fn reliable() -> Self {
        Self::failing(0)
    }
}

impl CertificateGenerator for FlakyCertificates {
    fn regenerate(
        &self,
        transaction_id: Uuid,
        _land_id: Uuid,
        _new_owner: ActorId,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err("certificate service unavailable".into());
        }
        Ok(format!("cert-{transaction_id}"))
    }
}

// ---------------------------------------------------------------------------
// ScriptedStore
// ---------------------------------------------------------------------------

/// MemoryStore wrapper with scripted fault injection for the ledger insert
/// path, used to reproduce half-applied adjudications.
#[derive(Default)]
pub struct ScriptedStore {
    inner: MemoryStore,
    ledger_failures: AtomicUsize,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_land(&self, parcel: LandParcel) {
        self.inner.put_land(parcel);
    }

    /// Fail the next `n` ledger-record inserts with a backend error.
    pub fn fail_next_ledger_inserts(&self, n: usize) {
        self.ledger_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegistryStore for ScriptedStore {
    async fn insert_buy_request(&self, req: &BuyRequest) -> Result<(), StoreError> {
        self.inner.insert_buy_request(req).await
    }

    async fn fetch_buy_request(&self, id: Uuid) -> Result<BuyRequest, StoreError> {
        self.inner.fetch_buy_request(id).await
    }

    async fn fetch_active_request_for_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Option<BuyRequest>, StoreError> {
        self.inner
            .fetch_active_request_for_conversation(conversation_id)
            .await
    }

    async fn update_if_status(
        &self,
        req: &BuyRequest,
        expected: BuyRequestStatus,
    ) -> Result<bool, StoreError> {
        self.inner.update_if_status(req, expected).await
    }

    async fn list_buy_requests(&self) -> Result<Vec<BuyRequest>, StoreError> {
        self.inner.list_buy_requests().await
    }

    async fn fetch_land(&self, id: Uuid) -> Result<LandParcel, StoreError> {
        self.inner.fetch_land(id).await
    }

    async fn list_land_parcels(&self) -> Result<Vec<LandParcel>, StoreError> {
        self.inner.list_land_parcels().await
    }

    async fn update_land_if_status(
        &self,
        parcel: &LandParcel,
        expected: LandStatus,
    ) -> Result<bool, StoreError> {
        self.inner.update_land_if_status(parcel, expected).await
    }

    async fn insert_land_transaction(&self, tx: &LandTransaction) -> Result<(), StoreError> {
        let remaining = self.ledger_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.ledger_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Backend("injected ledger failure".to_string()));
        }
        self.inner.insert_land_transaction(tx).await
    }

    async fn list_land_transactions(&self) -> Result<Vec<LandTransaction>, StoreError> {
        self.inner.list_land_transactions().await
    }
}

// ---------------------------------------------------------------------------
// TestWorld
// ---------------------------------------------------------------------------

/// One seeded marketplace: a for-sale parcel, its seller, a buyer, and an
/// admin, wired into an engine over a [`ScriptedStore`].
pub struct TestWorld {
    pub engine:
        WorkflowEngine<ScriptedStore, StaticDirectory, ManualClock, RecordingNotifier, FlakyCertificates>,
    pub clock: ManualClock,
    pub notifier: RecordingNotifier,
    pub seller: ActorId,
    pub buyer: ActorId,
    pub admin: ActorId,
    pub land: Uuid,
    pub conversation: Uuid,
}

pub struct TestWorldBuilder {
    certificate_failures: usize,
    seller_unverified: bool,
    audit_path: Option<std::path::PathBuf>,
}

impl TestWorldBuilder {
    pub fn certificates_failing(mut self, n: usize) -> Self {
        self.certificate_failures = n;
        self
    }

    pub fn seller_unverified(mut self) -> Self {
        self.seller_unverified = true;
        self
    }

    /// Attach a hash-chained JSONL audit log at the given path.
    pub fn audit_log(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.audit_path = Some(path.into());
        self
    }

    pub fn build(self) -> TestWorld {
        let seller = ActorId(Uuid::new_v4());
        let buyer = ActorId(Uuid::new_v4());
        let admin = ActorId(Uuid::new_v4());
        let land = Uuid::new_v4();
        let clock = ManualClock::new(Utc::now());
        let notifier = RecordingNotifier::new();

        let store = ScriptedStore::new();
        store.put_land(LandParcel {
            id: land,
            status: LandStatus::ForSale,
            current_owner: seller,
            owner_since_utc: clock.now() - Duration::days(365),
            ownership_history: Vec::new(),
            is_for_sale: true,
            certificate_ref: None,
        });

        let mut directory = StaticDirectory::new().with_admin(admin);
        if self.seller_unverified {
            directory = directory.without_verification(seller);
        }

        let mut engine = WorkflowEngine::new(
            store,
            directory,
            clock.clone(),
            notifier.clone(),
            FlakyCertificates::failing(self.certificate_failures),
        );
        if let Some(path) = self.audit_path {
            let writer =
                llr_audit::AuditWriter::new(&path, true).expect("audit writer setup failed");
            engine = engine.with_audit(writer);
        }

        TestWorld {
            engine,
            clock,
            notifier,
            seller,
            buyer,
            admin,
            land,
            conversation: Uuid::new_v4(),
        }
    }
}

impl TestWorld {
    pub fn builder() -> TestWorldBuilder {
        TestWorldBuilder {
            certificate_failures: 0,
            seller_unverified: false,
            audit_path: None,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn store(&self) -> &ScriptedStore {
        self.engine.store()
    }

    /// Open a request on the seeded parcel at the standard price.
    pub async fn open_request(&self) -> BuyRequest {
        self.engine
            .create(self.conversation, self.land, self.seller, self.buyer, 500_000)
            .await
            .expect("create failed")
    }

    /// Create + confirm with the delivered code: lands in
    /// PENDING_ADMIN_APPROVAL.
    pub async fn open_confirmed_request(&self) -> BuyRequest {
        let req = self.open_request().await;
        let code = self
            .notifier
            .last_code_for(req.id)
            .expect("no code delivered");
        self.engine
            .confirm(req.id, self.seller, &code)
            .await
            .expect("confirm failed")
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

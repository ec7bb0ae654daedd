//! Admin adjudication: the privileged transitions that resolve a request
//! pending admin review.
//!
//! Approval is one conceptual unit of work: (a) mark the request APPROVED
//! with the admin review populated, (b) persist the immutable ledger record,
//! (c) run the ownership updater and complete. If (b) or (c) fails after (a)
//! committed, the request carries a `LedgerWriteFailed` timeline marker and
//! the caller receives `LedgerInconsistency`; the half-applied state is
//! always detectable (APPROVED with no `land_transaction_id`), never silent.

use chrono::{DateTime, Utc};
use llr_ledger::CertificateGenerator;
use llr_schemas::{
    ActorId, AdminDecision, AdminReview, BuyRequest, BuyRequestStatus, LandStatus, TimelineEvent,
};
use llr_verify::Clock;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::engine::WorkflowEngine;
use crate::error::WorkflowError;
use crate::store::RegistryStore;
use crate::traits::{Directory, Notifier};

impl<S, D, C, N, G> WorkflowEngine<S, D, C, N, G>
where
    S: RegistryStore,
    D: Directory,
    C: Clock,
    N: Notifier,
    G: CertificateGenerator,
{
    fn require_admin(&self, id: ActorId) -> Result<(), WorkflowError> {
        match self.directory.resolve(id) {
            Some(caller) if caller.is_admin() => Ok(()),
            _ => Err(WorkflowError::Forbidden),
        }
    }

    /// Guard shared by approve/reject: the request must be exactly
    /// PENDING_ADMIN_APPROVAL and not yet adjudicated.
    fn require_pending_adjudication(req: &BuyRequest) -> Result<(), WorkflowError> {
        if req.status != BuyRequestStatus::PendingAdminApproval || req.admin_review.is_some() {
            return Err(WorkflowError::WrongState {
                expected: BuyRequestStatus::PendingAdminApproval,
                actual: req.status,
            });
        }
        Ok(())
    }

    // -- approve ------------------------------------------------------------

    /// Approve a pending transaction and apply its terminal effects.
    ///
    /// Returns the request in `COMPLETED` state on full success, or
    /// `LedgerInconsistency` if the ledger record or ownership update failed
    /// after the approval itself committed (recoverable via
    /// [`Self::apply_ownership_transfer`]).
    pub async fn approve(
        &self,
        request_id: Uuid,
        admin: ActorId,
        comments: &str,
    ) -> Result<BuyRequest, WorkflowError> {
        self.require_admin(admin)?;

        let mut req = self.store.fetch_buy_request(request_id).await?;
        Self::require_pending_adjudication(&req)?;

        let now = self.clock.now();
        req.admin_review = Some(AdminReview {
            reviewer: admin,
            ts_utc: now,
            decision: AdminDecision::Approved,
            comments: comments.to_string(),
        });
        req.status = BuyRequestStatus::Approved;
        req.push_timeline(
            TimelineEvent::AdminApproved,
            admin,
            "admin approved transaction",
            json!({ "comments": comments }),
            now,
        );
        self.persist_transition(&req, BuyRequestStatus::PendingAdminApproval)
            .await?;
        self.audit_event(req.id, "ADMIN_APPROVED", json!({ "reviewer": admin }));
        info!(request_id = %req.id, reviewer = %admin, "transaction approved");

        // (b) immutable ledger record.
        let tx = llr_ledger::build_transaction(&req, now);
        if let Err(err) = self.store.insert_land_transaction(&tx).await {
            return Err(self
                .mark_ledger_failure(&mut req, admin, format!("ledger record insert: {err}"))
                .await);
        }
        req.land_transaction_id = Some(tx.id);
        req.blockchain_tx_hash = Some(tx.audit_hash.clone());
        match self
            .store
            .update_if_status(&req, BuyRequestStatus::Approved)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // A concurrent transition (cancel) won between approval and
                // the back-reference write; the dangling ledger record is
                // reconciliation's problem now.
                return Err(self
                    .mark_ledger_failure(&mut req, admin, "status changed during adjudication".into())
                    .await);
            }
            Err(err) => {
                return Err(self
                    .mark_ledger_failure(&mut req, admin, format!("ledger back-reference: {err}"))
                    .await);
            }
        }

        // (c) terminal effects.
        self.finish_transfer(req, admin, now).await
    }

    // -- reject -------------------------------------------------------------

    /// Reject a pending transaction. Terminal; the parcel is released for
    /// re-listing. An empty reason is refused.
    pub async fn reject(
        &self,
        request_id: Uuid,
        admin: ActorId,
        reason: &str,
    ) -> Result<BuyRequest, WorkflowError> {
        self.require_admin(admin)?;
        if reason.trim().is_empty() {
            return Err(WorkflowError::MissingReason);
        }

        let mut req = self.store.fetch_buy_request(request_id).await?;
        Self::require_pending_adjudication(&req)?;

        let now = self.clock.now();
        req.admin_review = Some(AdminReview {
            reviewer: admin,
            ts_utc: now,
            decision: AdminDecision::Rejected,
            comments: reason.to_string(),
        });
        req.status = BuyRequestStatus::Rejected;
        req.push_timeline(
            TimelineEvent::AdminRejected,
            admin,
            format!("admin rejected: {reason}"),
            json!({ "reason": reason }),
            now,
        );
        self.persist_transition(&req, BuyRequestStatus::PendingAdminApproval)
            .await?;

        self.release_land(&req).await?;
        self.audit_event(
            req.id,
            "ADMIN_REJECTED",
            json!({ "reviewer": admin, "reason": reason }),
        );
        info!(request_id = %req.id, reviewer = %admin, "transaction rejected");
        Ok(req)
    }

    // -- ownership updater --------------------------------------------------

    /// Run (or re-run) the ownership updater for an approved request.
    ///
    /// Idempotent: a request already `COMPLETED` with its
    /// `land_transaction_id` set is a no-op. This is the remediation hook for
    /// a transaction stranded in `APPROVED` by an earlier
    /// `LedgerInconsistency`.
    pub async fn apply_ownership_transfer(
        &self,
        request_id: Uuid,
    ) -> Result<BuyRequest, WorkflowError> {
        let mut req = self.store.fetch_buy_request(request_id).await?;
        if llr_ledger::transfer_already_applied(&req) {
            return Ok(req);
        }
        if req.status != BuyRequestStatus::Approved {
            return Err(WorkflowError::WrongState {
                expected: BuyRequestStatus::Approved,
                actual: req.status,
            });
        }

        let now = self.clock.now();
        let reviewer = req
            .admin_review
            .as_ref()
            .map(|r| r.reviewer)
            // An APPROVED request always carries its review; fall back to the
            // seller rather than panic if the record predates it.
            .unwrap_or(req.seller);

        // Recreate the ledger record if the earlier attempt never committed.
        if req.land_transaction_id.is_none() {
            let tx = llr_ledger::build_transaction(&req, now);
            if let Err(err) = self.store.insert_land_transaction(&tx).await {
                return Err(self
                    .mark_ledger_failure(&mut req, reviewer, format!("ledger record insert: {err}"))
                    .await);
            }
            req.land_transaction_id = Some(tx.id);
            req.blockchain_tx_hash = Some(tx.audit_hash.clone());
            match self
                .store
                .update_if_status(&req, BuyRequestStatus::Approved)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    return Err(self
                        .mark_ledger_failure(
                            &mut req,
                            reviewer,
                            "status changed during remediation".into(),
                        )
                        .await);
                }
                Err(err) => {
                    return Err(self
                        .mark_ledger_failure(
                            &mut req,
                            reviewer,
                            format!("ledger back-reference: {err}"),
                        )
                        .await);
                }
            }
        }

        self.finish_transfer(req, reviewer, now).await
    }

    /// Apply the parcel-side effects and complete the request:
    /// `APPROVED -> COMPLETED`. Expects `land_transaction_id` to be set.
    async fn finish_transfer(
        &self,
        mut req: BuyRequest,
        actor: ActorId,
        now: DateTime<Utc>,
    ) -> Result<BuyRequest, WorkflowError> {
        let tx_id = match req.land_transaction_id {
            Some(id) => id,
            None => {
                return Err(self
                    .mark_ledger_failure(&mut req, actor, "missing ledger back-reference".into())
                    .await)
            }
        };
        let tx = match self
            .store
            .list_land_transactions()
            .await?
            .into_iter()
            .find(|t| t.id == tx_id)
        {
            Some(tx) => tx,
            None => {
                return Err(self
                    .mark_ledger_failure(&mut req, actor, "ledger record missing".into())
                    .await)
            }
        };

        let mut land = match self.store.fetch_land(req.land_id).await {
            Ok(land) => land,
            Err(err) => {
                return Err(self
                    .mark_ledger_failure(&mut req, actor, format!("fetch parcel: {err}"))
                    .await)
            }
        };
        llr_ledger::apply_transfer(&mut land, &tx, now);

        // Certificate regeneration is fire-and-forget; a failure is flagged,
        // never rolled back.
        let certificate_ref = llr_ledger::regenerate_certificate(&self.certificates, &tx, &mut land);

        // The parcel has been held UNDER_TRANSACTION since create; a guard
        // failure here means another writer moved it mid-transfer.
        match self
            .store
            .update_land_if_status(&land, LandStatus::UnderTransaction)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return Err(self
                    .mark_ledger_failure(&mut req, actor, "parcel moved during transfer".into())
                    .await);
            }
            Err(err) => {
                return Err(self
                    .mark_ledger_failure(&mut req, actor, format!("parcel update: {err}"))
                    .await);
            }
        }

        req.status = BuyRequestStatus::Completed;
        let report = llr_ledger::TransferReport {
            transaction_id: tx.id,
            certificate_ref: certificate_ref.clone(),
        };
        req.push_timeline(
            TimelineEvent::Completed,
            actor,
            "ownership transferred; transaction completed",
            report.metadata(),
            now,
        );
        if certificate_ref.is_none() {
            req.push_timeline(
                TimelineEvent::CertificatePending,
                actor,
                "certificate regeneration failed; remediation pending",
                json!({ "transaction_id": tx.id }),
                now,
            );
        }
        self.persist_transition(&req, BuyRequestStatus::Approved)
            .await?;

        self.audit_event(
            req.id,
            "COMPLETED",
            json!({ "land_transaction_id": tx.id, "blockchain_tx_hash": req.blockchain_tx_hash }),
        );
        info!(request_id = %req.id, transaction_id = %tx.id, "ownership transferred");
        Ok(req)
    }

    /// Record a half-applied adjudication: timeline marker plus ERROR log.
    /// The write is best-effort; even if it fails, the APPROVED status with
    /// no `land_transaction_id` remains detectable by reconciliation.
    async fn mark_ledger_failure(
        &self,
        req: &mut BuyRequest,
        actor: ActorId,
        detail: String,
    ) -> WorkflowError {
        error!(request_id = %req.id, detail = %detail, "adjudication half-applied; manual reconciliation required");
        req.push_timeline(
            TimelineEvent::LedgerWriteFailed,
            actor,
            "ledger write failed after approval",
            json!({ "detail": detail.clone() }),
            self.clock.now(),
        );
        if let Ok(false) | Err(_) = self
            .store
            .update_if_status(req, BuyRequestStatus::Approved)
            .await
        {
            error!(request_id = %req.id, "could not persist ledger-failure marker");
        }
        self.audit_event(req.id, "LEDGER_WRITE_FAILED", json!({ "detail": detail.clone() }));
        WorkflowError::LedgerInconsistency { detail }
    }
}

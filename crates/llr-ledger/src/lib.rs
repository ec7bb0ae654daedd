//! Ledger record construction and the ownership ledger updater.
//!
//! The ledger record ([`LandTransaction`]) is the durable, audit-oriented
//! record created on approval, distinct from the BuyRequest. Its `audit_hash`
//! (sha256 over the canonical record content) doubles as the simulated
//! blockchain receipt stored back on the request. No consensus layer exists
//! or is pretended to.

use chrono::{DateTime, Utc};
use llr_schemas::{ActorId, BuyRequest, BuyRequestStatus, LandParcel, LandStatus, LandTransaction, TenureRecord};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Ledger record
// ---------------------------------------------------------------------------

/// Build the immutable ledger record for an approved buy request.
///
/// The `audit_hash` covers id, parties, parcel, price and timestamp; any
/// later edit to the record is detectable by recomputing it.
pub fn build_transaction(req: &BuyRequest, now: DateTime<Utc>) -> LandTransaction {
    let id = Uuid::new_v4();
    let audit_hash = transaction_hash(id, req.id, req.land_id, req.seller, req.buyer, req.agreed_price, now);
    LandTransaction {
        id,
        buy_request_id: req.id,
        land_id: req.land_id,
        seller: req.seller,
        buyer: req.buyer,
        price: req.agreed_price,
        ts_utc: now,
        audit_hash,
    }
}

/// Recompute the audit hash of an existing record (integrity check).
pub fn recompute_hash(tx: &LandTransaction) -> String {
    transaction_hash(
        tx.id,
        tx.buy_request_id,
        tx.land_id,
        tx.seller,
        tx.buyer,
        tx.price,
        tx.ts_utc,
    )
}

fn transaction_hash(
    id: Uuid,
    buy_request_id: Uuid,
    land_id: Uuid,
    seller: ActorId,
    buyer: ActorId,
    price: i64,
    ts_utc: DateTime<Utc>,
) -> String {
    // Canonical pipe-joined content; field order is part of the format.
    let material = format!(
        "{id}|{buy_request_id}|{land_id}|{seller}|{buyer}|{price}|{}",
        ts_utc.timestamp_millis()
    );
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Ownership updater
// ---------------------------------------------------------------------------

/// Certificate regeneration collaborator. Invoked post-completion;
/// fire-and-forget from the workflow's perspective. Returns a reference
/// hash/URL stored on the parcel.
pub trait CertificateGenerator: Send + Sync {
    fn regenerate(
        &self,
        transaction_id: Uuid,
        land_id: Uuid,
        new_owner: ActorId,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;
}

/// True when the terminal effects for this request were already applied.
/// Re-running the updater for such a request must be a no-op.
pub fn transfer_already_applied(req: &BuyRequest) -> bool {
    req.status == BuyRequestStatus::Completed && req.land_transaction_id.is_some()
}

/// Apply the terminal real-world effects of an approved transaction to the
/// parcel, exactly once:
///
/// - append the outgoing owner's tenure to the ownership history,
/// - reassign `current_owner` to the buyer,
/// - reset sale flags so the parcel cannot be concurrently sold again.
pub fn apply_transfer(parcel: &mut LandParcel, tx: &LandTransaction, now: DateTime<Utc>) {
    parcel.ownership_history.push(TenureRecord {
        owner: parcel.current_owner,
        from_date: parcel.owner_since_utc,
        to_date: now,
    });
    parcel.current_owner = tx.buyer;
    parcel.owner_since_utc = now;
    parcel.is_for_sale = false;
    parcel.status = LandStatus::Available;
}

/// Trigger certificate regeneration after a completed transfer.
///
/// Failure does not roll back the ownership transfer; it is logged as a
/// pending remediation task and `None` is returned so the caller can flag
/// the request timeline.
pub fn regenerate_certificate<G: CertificateGenerator>(
    generator: &G,
    tx: &LandTransaction,
    parcel: &mut LandParcel,
) -> Option<String> {
    match generator.regenerate(tx.id, tx.land_id, tx.buyer) {
        Ok(reference) => {
            parcel.certificate_ref = Some(reference.clone());
            Some(reference)
        }
        Err(err) => {
            tracing::warn!(
                transaction_id = %tx.id,
                land_id = %tx.land_id,
                error = %err,
                "certificate regeneration failed; remediation pending"
            );
            None
        }
    }
}

/// Summary of one updater pass, recorded in the request timeline metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub transaction_id: Uuid,
    pub certificate_ref: Option<String>,
}

impl TransferReport {
    pub fn metadata(&self) -> Value {
        serde_json::json!({
            "transaction_id": self.transaction_id,
            "certificate_ref": self.certificate_ref,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_request(now: DateTime<Utc>) -> BuyRequest {
        BuyRequest::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            ActorId(Uuid::new_v4()),
            ActorId(Uuid::new_v4()),
            500_000,
            now,
        )
    }

    fn make_parcel(owner: ActorId, since: DateTime<Utc>) -> LandParcel {
        LandParcel {
            id: Uuid::new_v4(),
            status: LandStatus::ForSale,
            current_owner: owner,
            owner_since_utc: since,
            ownership_history: Vec::new(),
            is_for_sale: true,
            certificate_ref: None,
        }
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

    struct BrokenCerts;
    impl CertificateGenerator for BrokenCerts {
        fn regenerate(
            &self,
            _transaction_id: Uuid,
            _land_id: Uuid,
            _new_owner: ActorId,
        ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            Err("renderer offline".into())
        }
    }

    #[test]
    fn transaction_hash_is_stable_and_tamper_evident() {
        let now = Utc::now();
        let req = make_request(now);
        let tx = build_transaction(&req, now);

        assert_eq!(tx.audit_hash, recompute_hash(&tx));

        let mut tampered = tx.clone();
        tampered.price = 1;
        assert_ne!(tampered.audit_hash, recompute_hash(&tampered));
    }

    #[test]
    fn transfer_appends_tenure_and_reassigns_owner() {
        let now = Utc::now();
        let req = make_request(now);
        let old_owner = req.seller;
        let since = now - Duration::days(400);
        let mut parcel = make_parcel(old_owner, since);

        let tx = build_transaction(&req, now);
        apply_transfer(&mut parcel, &tx, now);

        assert_eq!(parcel.current_owner, req.buyer);
        assert_eq!(parcel.owner_since_utc, now);
        assert!(!parcel.is_for_sale);
        assert_eq!(parcel.status, LandStatus::Available);

        assert_eq!(parcel.ownership_history.len(), 1);
        let tenure = &parcel.ownership_history[0];
        assert_eq!(tenure.owner, old_owner);
        assert_eq!(tenure.from_date, since);
        assert_eq!(tenure.to_date, now);
    }

    #[test]
    fn completed_request_with_transaction_id_is_already_applied() {
        let now = Utc::now();
        let mut req = make_request(now);
        assert!(!transfer_already_applied(&req));

        req.status = BuyRequestStatus::Completed;
        req.land_transaction_id = Some(Uuid::new_v4());
        assert!(transfer_already_applied(&req));
    }

    #[test]
    fn certificate_success_stores_reference() {
        let now = Utc::now();
        let req = make_request(now);
        let mut parcel = make_parcel(req.seller, now);
        let tx = build_transaction(&req, now);

        let reference = regenerate_certificate(&OkCerts, &tx, &mut parcel);
        assert!(reference.is_some());
        assert_eq!(parcel.certificate_ref, reference);
    }

    #[test]
    fn certificate_failure_does_not_touch_parcel() {
        let now = Utc::now();
        let req = make_request(now);
        let mut parcel = make_parcel(req.seller, now);
        let tx = build_transaction(&req, now);

        let reference = regenerate_certificate(&BrokenCerts, &tx, &mut parcel);
        assert!(reference.is_none());
        assert!(parcel.certificate_ref.is_none());
    }
}

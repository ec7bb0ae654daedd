//! Drift detection between BuyRequests, parcels, and ledger records.
//!
//! Adjudication commits in ordered steps; a crash between them leaves a
//! detectable signature rather than silent corruption. This module scans for
//! those signatures and reports them for manual reconciliation. No automatic
//! repair is attempted.

use llr_schemas::{BuyRequest, BuyRequestStatus, LandParcel, LandStatus, LandTransaction};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftFinding {
    /// The half-applied adjudication signature: request APPROVED but no
    /// ledger back-reference committed.
    ApprovedWithoutLedgerRecord { request_id: Uuid },
    /// A ledger record exists but its buy request never reached COMPLETED.
    LedgerRecordWithoutCompletion {
        request_id: Uuid,
        transaction_id: Uuid,
    },
    /// Request COMPLETED but the parcel's owner is not the buyer.
    CompletedWithoutOwnershipTransfer { request_id: Uuid, land_id: Uuid },
    /// Parcel held UNDER_TRANSACTION with no active request referencing it.
    ParcelStuckUnderTransaction { land_id: Uuid },
    /// A parcel still flagged for sale after a completed transfer.
    ParcelStillListedAfterSale { request_id: Uuid, land_id: Uuid },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriftReport {
    pub findings: Vec<DriftFinding>,
}

impl DriftReport {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Any finding at all demands an operator's eyes.
    pub fn requires_manual_review(&self) -> bool {
        !self.is_clean()
    }
}

fn push_once(findings: &mut Vec<DriftFinding>, f: DriftFinding) {
    if !findings.contains(&f) {
        findings.push(f);
    }
}

/// Deterministic scan over the full registry state.
pub fn scan(
    requests: &[BuyRequest],
    parcels: &[LandParcel],
    transactions: &[LandTransaction],
) -> DriftReport {
    let mut findings: Vec<DriftFinding> = Vec::new();

    // 1) Half-applied adjudications.
    for req in requests {
        if req.status == BuyRequestStatus::Approved && req.land_transaction_id.is_none() {
            push_once(
                &mut findings,
                DriftFinding::ApprovedWithoutLedgerRecord { request_id: req.id },
            );
        }
    }

    // 2) Ledger records whose request never completed.
    for tx in transactions {
        let req = requests.iter().find(|r| r.id == tx.buy_request_id);
        let completed = matches!(req, Some(r) if r.status == BuyRequestStatus::Completed);
        if !completed {
            push_once(
                &mut findings,
                DriftFinding::LedgerRecordWithoutCompletion {
                    request_id: tx.buy_request_id,
                    transaction_id: tx.id,
                },
            );
        }
    }

    // 3) Completed requests whose parcel effects did not land.
    for req in requests {
        if req.status != BuyRequestStatus::Completed {
            continue;
        }
        let Some(parcel) = parcels.iter().find(|p| p.id == req.land_id) else {
            continue;
        };
        if parcel.current_owner != req.buyer {
            push_once(
                &mut findings,
                DriftFinding::CompletedWithoutOwnershipTransfer {
                    request_id: req.id,
                    land_id: req.land_id,
                },
            );
        } else if parcel.is_for_sale {
            push_once(
                &mut findings,
                DriftFinding::ParcelStillListedAfterSale {
                    request_id: req.id,
                    land_id: req.land_id,
                },
            );
        }
    }

    // 4) Parcels stuck mid-transaction with no live request.
    for parcel in parcels {
        if parcel.status != LandStatus::UnderTransaction {
            continue;
        }
        let referenced = requests
            .iter()
            .any(|r| r.land_id == parcel.id && !r.status.is_terminal());
        if !referenced {
            push_once(
                &mut findings,
                DriftFinding::ParcelStuckUnderTransaction { land_id: parcel.id },
            );
        }
    }

    // Stable ordering for deterministic output.
    findings.sort();

    DriftReport { findings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use llr_schemas::ActorId;

    fn request(status: BuyRequestStatus) -> BuyRequest {
        let mut req = BuyRequest::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            ActorId(Uuid::new_v4()),
            ActorId(Uuid::new_v4()),
            1000,
            Utc::now(),
        );
        req.status = status;
        req
    }

    fn parcel_for(req: &BuyRequest, owner: ActorId, status: LandStatus) -> LandParcel {
        LandParcel {
            id: req.land_id,
            status,
            current_owner: owner,
            owner_since_utc: Utc::now(),
            ownership_history: Vec::new(),
            is_for_sale: false,
            certificate_ref: None,
        }
    }

    #[test]
    fn clean_registry_reports_clean() {
        let report = scan(&[], &[], &[]);
        assert!(report.is_clean());
        assert!(!report.requires_manual_review());
    }

    #[test]
    fn approved_without_ledger_record_is_flagged() {
        let req = request(BuyRequestStatus::Approved);
        let report = scan(&[req.clone()], &[], &[]);
        assert_eq!(
            report.findings,
            vec![DriftFinding::ApprovedWithoutLedgerRecord { request_id: req.id }]
        );
        assert!(report.requires_manual_review());
    }

    #[test]
    fn approved_with_ledger_reference_is_not_that_finding() {
        let mut req = request(BuyRequestStatus::Approved);
        req.land_transaction_id = Some(Uuid::new_v4());
        let report = scan(&[req], &[], &[]);
        assert!(!report.findings.iter().any(|f| matches!(
            f,
            DriftFinding::ApprovedWithoutLedgerRecord { .. }
        )));
    }

    #[test]
    fn completed_request_with_wrong_owner_is_flagged() {
        let req = request(BuyRequestStatus::Completed);
        // Parcel still owned by the seller.
        let parcel = parcel_for(&req, req.seller, LandStatus::Available);
        let report = scan(&[req.clone()], &[parcel], &[]);
        assert!(report.findings.contains(
            &DriftFinding::CompletedWithoutOwnershipTransfer {
                request_id: req.id,
                land_id: req.land_id,
            }
        ));
    }

    #[test]
    fn stuck_parcel_without_active_request_is_flagged() {
        let req = request(BuyRequestStatus::Cancelled);
        let parcel = parcel_for(&req, req.seller, LandStatus::UnderTransaction);
        let report = scan(&[req], &[parcel.clone()], &[]);
        assert!(report
            .findings
            .contains(&DriftFinding::ParcelStuckUnderTransaction { land_id: parcel.id }));
    }

    #[test]
    fn parcel_under_active_transaction_is_not_stuck() {
        let req = request(BuyRequestStatus::PendingAdminApproval);
        let parcel = parcel_for(&req, req.seller, LandStatus::UnderTransaction);
        let report = scan(&[req], &[parcel], &[]);
        assert!(report.is_clean());
    }
}

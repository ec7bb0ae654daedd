//! A ledger write failing after approval leaves a detectable, recoverable
//! half-applied state: APPROVED with no ledger back-reference, a timeline
//! marker, a reconcile finding, and an idempotent remediation path.

use llr_schemas::{BuyRequestStatus, TimelineEvent};
use llr_testkit::TestWorld;
use llr_workflow::RegistryStore;

#[tokio::test]
async fn ledger_failure_after_approval_is_detectable() {
    let w = TestWorld::new();
    let req = w.open_confirmed_request().await;

    w.store().fail_next_ledger_inserts(1);
    let err = w.engine.approve(req.id, w.admin, "ok").await.unwrap_err();
    assert_eq!(err.kind(), "LEDGER_INCONSISTENCY");

    // The half-applied signature: APPROVED, review recorded, no ledger
    // back-reference, and the failure marker on the timeline.
    let stored = w.store().fetch_buy_request(req.id).await.unwrap();
    assert_eq!(stored.status, BuyRequestStatus::Approved);
    assert!(stored.admin_review.is_some());
    assert!(stored.land_transaction_id.is_none());
    assert!(stored
        .timeline
        .iter()
        .any(|e| e.event == TimelineEvent::LedgerWriteFailed));

    // Reconcile surfaces it.
    let requests = w.store().list_buy_requests().await.unwrap();
    let parcels = w.store().list_land_parcels().await.unwrap();
    let transactions = w.store().list_land_transactions().await.unwrap();
    let report = llr_reconcile::scan(&requests, &parcels, &transactions);
    assert!(report.requires_manual_review());
    assert!(report.findings.iter().any(|f| matches!(
        f,
        llr_reconcile::DriftFinding::ApprovedWithoutLedgerRecord { request_id } if *request_id == req.id
    )));
}

#[tokio::test]
async fn remediation_completes_the_stranded_transfer() {
    let w = TestWorld::new();
    let req = w.open_confirmed_request().await;

    w.store().fail_next_ledger_inserts(1);
    w.engine.approve(req.id, w.admin, "ok").await.unwrap_err();

    // Store healed: remediation writes the ledger record and finishes.
    let req = w.engine.apply_ownership_transfer(req.id).await.unwrap();
    assert_eq!(req.status, BuyRequestStatus::Completed);
    assert!(req.land_transaction_id.is_some());

    let txs = w.store().list_land_transactions().await.unwrap();
    assert_eq!(txs.len(), 1);

    let parcel = w.store().fetch_land(w.land).await.unwrap();
    assert_eq!(parcel.current_owner, w.buyer);

    // Registry is clean again.
    let requests = w.store().list_buy_requests().await.unwrap();
    let parcels = w.store().list_land_parcels().await.unwrap();
    let report = llr_reconcile::scan(&requests, &parcels, &txs);
    assert!(report.is_clean(), "unexpected findings: {:?}", report.findings);
}

#[tokio::test]
async fn remediation_is_idempotent_after_success() {
    let w = TestWorld::new();
    let req = w.open_confirmed_request().await;
    let req = w.engine.approve(req.id, w.admin, "ok").await.unwrap();
    assert_eq!(req.status, BuyRequestStatus::Completed);

    // Re-running the updater on a completed transfer is a no-op.
    let again = w.engine.apply_ownership_transfer(req.id).await.unwrap();
    assert_eq!(again.status, BuyRequestStatus::Completed);

    let txs = w.store().list_land_transactions().await.unwrap();
    assert_eq!(txs.len(), 1, "no duplicate ledger record");

    let parcel = w.store().fetch_land(w.land).await.unwrap();
    assert_eq!(parcel.ownership_history.len(), 1, "no duplicate tenure");
}

#[tokio::test]
async fn remediation_refuses_non_approved_requests() {
    let w = TestWorld::new();
    let req = w.open_request().await;

    let err = w.engine.apply_ownership_transfer(req.id).await.unwrap_err();
    assert_eq!(err.kind(), "WRONG_STATE");
}

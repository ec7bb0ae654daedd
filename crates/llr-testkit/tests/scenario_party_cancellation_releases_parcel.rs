//! Cancellation: any party, any non-terminal state, parcel released.

use llr_schemas::{BuyRequestStatus, LandStatus, TimelineEvent};
use llr_testkit::TestWorld;
use llr_workflow::RegistryStore;

#[tokio::test]
async fn buyer_cancels_before_confirmation() {
    let w = TestWorld::new();
    let req = w.open_request().await;

    let req = w
        .engine
        .cancel(req.id, w.buyer, "found another parcel")
        .await
        .unwrap();
    assert_eq!(req.status, BuyRequestStatus::Cancelled);
    // The pending code is wiped with the cancellation.
    assert!(req.two_factor_code.is_none());
    assert!(req.two_factor_expires_at.is_none());
    assert_eq!(req.timeline.last().unwrap().event, TimelineEvent::Cancelled);

    let parcel = w.store().fetch_land(w.land).await.unwrap();
    assert_eq!(parcel.status, LandStatus::ForSale);
}

#[tokio::test]
async fn seller_cancels_while_pending_adjudication() {
    let w = TestWorld::new();
    let req = w.open_confirmed_request().await;

    let req = w.engine.cancel(req.id, w.seller, "withdrawing").await.unwrap();
    assert_eq!(req.status, BuyRequestStatus::Cancelled);

    // Adjudicating a cancelled request is refused.
    let err = w.engine.approve(req.id, w.admin, "late").await.unwrap_err();
    assert_eq!(err.kind(), "WRONG_STATE");
}

#[tokio::test]
async fn cancellation_frees_the_conversation() {
    let w = TestWorld::new();
    let req = w.open_request().await;
    w.engine.cancel(req.id, w.buyer, "changed mind").await.unwrap();

    let second = w
        .engine
        .create(w.conversation, w.land, w.seller, w.buyer, 520_000)
        .await
        .unwrap();
    assert_eq!(second.status, BuyRequestStatus::PendingSellerConfirmation);
}

#[tokio::test]
async fn stranger_cannot_cancel() {
    let w = TestWorld::new();
    let req = w.open_request().await;

    let stranger = llr_schemas::ActorId(uuid::Uuid::new_v4());
    let err = w.engine.cancel(req.id, stranger, "mine").await.unwrap_err();
    assert_eq!(err.kind(), "FORBIDDEN");
}

#[tokio::test]
async fn cancel_after_completion_is_refused() {
    let w = TestWorld::new();
    let req = w.open_confirmed_request().await;
    w.engine.approve(req.id, w.admin, "ok").await.unwrap();

    let err = w.engine.cancel(req.id, w.buyer, "undo").await.unwrap_err();
    assert_eq!(err.kind(), "ALREADY_TERMINAL");

    // Ownership stays with the buyer.
    let parcel = w.store().fetch_land(w.land).await.unwrap();
    assert_eq!(parcel.current_owner, w.buyer);
}

#[tokio::test]
async fn second_cancel_is_refused() {
    let w = TestWorld::new();
    let req = w.open_request().await;
    w.engine.cancel(req.id, w.buyer, "first").await.unwrap();

    let err = w.engine.cancel(req.id, w.seller, "second").await.unwrap_err();
    assert_eq!(err.kind(), "ALREADY_TERMINAL");
}

//! Collaborator seams consumed by the workflow engine.
//!
//! These are external systems (identity store, notification channel); the
//! engine never implements them beyond the test fakes in `llr-testkit`.

use llr_schemas::{ActorId, Caller};
use uuid::Uuid;

/// Identity/authn collaborator: resolves a caller id to identity + role and
/// answers whether an actor has verification (one-time code delivery)
/// enabled.
pub trait Directory: Send + Sync {
    fn resolve(&self, id: ActorId) -> Option<Caller>;
    fn two_factor_enabled(&self, id: ActorId) -> bool;
}

/// Out-of-band notification channel (SMS/email, admin queue). Fire-and-forget:
/// the workflow assumes no delivery guarantee and never fails a transition on
/// notification problems.
pub trait Notifier: Send + Sync {
    /// Deliver a freshly issued confirmation code to the seller.
    fn code_issued(&self, seller: ActorId, request_id: Uuid, code: &str);

    /// Alert the admin queue that a request awaits adjudication.
    fn admin_queue(&self, request_id: Uuid);
}

//! Persistence seam for the workflow engine.
//!
//! Implementations: [`crate::memory::MemoryStore`] (in-process) and the
//! PostgreSQL store in `llr-db`. Both enforce the same two invariants:
//!
//! - `update_if_status` and `update_land_if_status` are compare-and-sets on
//!   the entity's `status` column; they return `false` (and write nothing)
//!   when the stored status no longer matches the expected one. The parcel
//!   variant is the serialization point for the create-time hold, so two
//!   concurrent buy requests cannot both take the same parcel off the market.
//! - `insert_buy_request` refuses a second active (non-terminal) request for
//!   the same conversation with [`StoreError::ActiveRequestExists`], and for
//!   the same parcel with [`StoreError::ParcelHasActiveRequest`].

use async_trait::async_trait;
use llr_schemas::{BuyRequest, BuyRequestStatus, LandParcel, LandStatus, LandTransaction};
use uuid::Uuid;

#[derive(Debug)]
pub enum StoreError {
    NotFound,
    /// The one-active-request-per-conversation invariant would be violated.
    ActiveRequestExists,
    /// The one-active-request-per-parcel invariant would be violated.
    ParcelHasActiveRequest,
    /// A ledger record for this buy request already exists.
    DuplicateLedgerRecord,
    /// Backend failure (connection, IO). Transient from the caller's view.
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "record not found"),
            StoreError::ActiveRequestExists => {
                write!(f, "active buy request exists for conversation")
            }
            StoreError::ParcelHasActiveRequest => {
                write!(f, "active buy request exists for parcel")
            }
            StoreError::DuplicateLedgerRecord => {
                write!(f, "ledger record already exists for buy request")
            }
            StoreError::Backend(msg) => write!(f, "backend failure: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Persist a new buy request. Fails with `ActiveRequestExists` when the
    /// conversation already has a non-terminal request, and with
    /// `ParcelHasActiveRequest` when the parcel does.
    async fn insert_buy_request(&self, req: &BuyRequest) -> Result<(), StoreError>;

    async fn fetch_buy_request(&self, id: Uuid) -> Result<BuyRequest, StoreError>;

    /// The non-terminal request for a conversation, if any. Advisory
    /// pre-check only; `insert_buy_request` remains the race-safe guard.
    async fn fetch_active_request_for_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Option<BuyRequest>, StoreError>;

    /// Compare-and-set write: persists `req` only if the stored status equals
    /// `expected`. Returns `false` when the guard fails; the store is left
    /// untouched in that case.
    async fn update_if_status(
        &self,
        req: &BuyRequest,
        expected: BuyRequestStatus,
    ) -> Result<bool, StoreError>;

    /// All buy requests (reconciliation scans; not a hot path).
    async fn list_buy_requests(&self) -> Result<Vec<BuyRequest>, StoreError>;

    async fn fetch_land(&self, id: Uuid) -> Result<LandParcel, StoreError>;

    /// All parcels (reconciliation scans; not a hot path).
    async fn list_land_parcels(&self) -> Result<Vec<LandParcel>, StoreError>;

    /// Compare-and-set write on the parcel: persists `parcel` only if the
    /// stored status equals `expected`. Returns `false` when the guard
    /// fails; the store is left untouched in that case. There is no
    /// unconditional parcel update; every status move states what it
    /// expects.
    async fn update_land_if_status(
        &self,
        parcel: &LandParcel,
        expected: LandStatus,
    ) -> Result<bool, StoreError>;

    /// Persist the immutable ledger record. At most one per buy request.
    async fn insert_land_transaction(&self, tx: &LandTransaction) -> Result<(), StoreError>;

    async fn list_land_transactions(&self) -> Result<Vec<LandTransaction>, StoreError>;
}

//! Workflow refusal taxonomy.
//!
//! Guard violations are user-facing and always leave state unchanged; every
//! rejected transition carries a distinguishable kind so the caller (or a
//! test) can assert *why* it failed, not merely *that* it failed.

use llr_schemas::BuyRequestStatus;

use crate::store::StoreError;

#[derive(Debug)]
pub enum WorkflowError {
    /// An active (non-terminal) BuyRequest already exists for this
    /// conversation.
    AlreadyExists,
    /// The seller has not enabled verification; a confirmation code cannot
    /// be delivered.
    SellerNotVerified,
    /// The parcel is not listed for sale.
    LandNotForSale,
    /// The agreed price must be a positive amount.
    InvalidPrice,
    /// The caller is not the actor this transition belongs to.
    WrongActor,
    /// The caller lacks the privilege for this transition, or is not a party
    /// to the request.
    Forbidden,
    /// Compare-and-set refusal: the request is not in the state this action
    /// requires. Duplicate or concurrent retries land here.
    WrongState {
        expected: BuyRequestStatus,
        actual: BuyRequestStatus,
    },
    /// No code pending, code expired, or code mismatch. Recoverable via
    /// resend.
    InvalidOrExpiredCode,
    /// A rejection requires a non-empty reason.
    MissingReason,
    /// The request is already in a terminal state; cancel is not possible.
    AlreadyTerminal(BuyRequestStatus),
    /// No BuyRequest with this id.
    NotFound,
    /// The adjudication effect was half applied: the request is APPROVED but
    /// the ledger record or the ownership update did not commit. Flagged for
    /// manual reconciliation; detectable via the missing
    /// `land_transaction_id`.
    LedgerInconsistency { detail: String },
    /// Persistence failure. Transient; safe to retry because guards are
    /// idempotent re-checks.
    Store(StoreError),
}

impl WorkflowError {
    /// Stable machine-readable kind, used by the HTTP layer and asserted in
    /// tests.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::AlreadyExists => "ALREADY_EXISTS",
            WorkflowError::SellerNotVerified => "SELLER_NOT_VERIFIED",
            WorkflowError::LandNotForSale => "LAND_NOT_FOR_SALE",
            WorkflowError::InvalidPrice => "INVALID_PRICE",
            WorkflowError::WrongActor => "WRONG_ACTOR",
            WorkflowError::Forbidden => "FORBIDDEN",
            WorkflowError::WrongState { .. } => "WRONG_STATE",
            WorkflowError::InvalidOrExpiredCode => "INVALID_OR_EXPIRED_CODE",
            WorkflowError::MissingReason => "MISSING_REASON",
            WorkflowError::AlreadyTerminal(_) => "ALREADY_TERMINAL",
            WorkflowError::NotFound => "NOT_FOUND",
            WorkflowError::LedgerInconsistency { .. } => "LEDGER_INCONSISTENCY",
            WorkflowError::Store(_) => "STORE_ERROR",
        }
    }
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowError::AlreadyExists => {
                write!(f, "an active buy request already exists for this conversation")
            }
            WorkflowError::SellerNotVerified => {
                write!(f, "seller has not enabled verification")
            }
            WorkflowError::LandNotForSale => write!(f, "land parcel is not for sale"),
            WorkflowError::InvalidPrice => write!(f, "agreed price must be positive"),
            WorkflowError::WrongActor => write!(f, "caller is not the expected actor"),
            WorkflowError::Forbidden => write!(f, "caller is not permitted to perform this action"),
            WorkflowError::WrongState { expected, actual } => write!(
                f,
                "invalid state for this action: expected {expected}, found {actual}"
            ),
            WorkflowError::InvalidOrExpiredCode => {
                write!(f, "verification code is invalid or expired")
            }
            WorkflowError::MissingReason => write!(f, "a rejection reason is required"),
            WorkflowError::AlreadyTerminal(st) => {
                write!(f, "request is already terminal: {st}")
            }
            WorkflowError::NotFound => write!(f, "buy request not found"),
            WorkflowError::LedgerInconsistency { detail } => {
                write!(f, "ledger inconsistency, manual reconciliation required: {detail}")
            }
            WorkflowError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for WorkflowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkflowError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => WorkflowError::NotFound,
            StoreError::ActiveRequestExists => WorkflowError::AlreadyExists,
            // Another transaction holds the parcel; to the caller that is
            // indistinguishable from the parcel being unlisted.
            StoreError::ParcelHasActiveRequest => WorkflowError::LandNotForSale,
            other => WorkflowError::Store(other),
        }
    }
}

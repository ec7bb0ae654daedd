//! Shared data model for the land-registry transaction workflow.
//!
//! Raw records (`BuyRequest`, `LandParcel`, `LandTransaction`) hold ids only.
//! `BuyRequestView` is the read-only resolved projection returned by status
//! queries; raw and resolved forms are never conflated.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifetime of an issued one-time code.
pub const CODE_TTL_MINUTES: i64 = 10;

// ---------------------------------------------------------------------------
// Actor identity
// ---------------------------------------------------------------------------

/// Canonical actor identity. Every caller id is normalized into this newtype
/// at the boundary; all equality checks are `ActorId == ActorId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub Uuid);

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// A marketplace user; may act as buyer or seller of any request.
    User,
    Admin,
}

/// A resolved caller: identity plus role, as supplied by the identity
/// collaborator. The workflow never re-derives roles itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: ActorId,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// ---------------------------------------------------------------------------
// BuyRequest status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuyRequestStatus {
    PendingSellerConfirmation,
    PendingAdminApproval,
    Approved,
    Completed,
    Rejected,
    Cancelled,
}

impl BuyRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuyRequestStatus::PendingSellerConfirmation => "PENDING_SELLER_CONFIRMATION",
            BuyRequestStatus::PendingAdminApproval => "PENDING_ADMIN_APPROVAL",
            BuyRequestStatus::Approved => "APPROVED",
            BuyRequestStatus::Completed => "COMPLETED",
            BuyRequestStatus::Rejected => "REJECTED",
            BuyRequestStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING_SELLER_CONFIRMATION" => Some(Self::PendingSellerConfirmation),
            "PENDING_ADMIN_APPROVAL" => Some(Self::PendingAdminApproval),
            "APPROVED" => Some(Self::Approved),
            "COMPLETED" => Some(Self::Completed),
            "REJECTED" => Some(Self::Rejected),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuyRequestStatus::Completed | BuyRequestStatus::Rejected | BuyRequestStatus::Cancelled
        )
    }
}

impl std::fmt::Display for BuyRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

/// Closed vocabulary of timeline events. Every successful transition appends
/// exactly one entry; entries are never mutated or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimelineEvent {
    Created,
    CodeIssued,
    SellerConfirmed,
    AdminApproved,
    AdminRejected,
    Completed,
    Cancelled,
    /// Ledger-record persistence failed after the request was marked
    /// APPROVED. Marks the request for manual reconciliation.
    LedgerWriteFailed,
    /// Certificate regeneration failed post-completion; remediation pending.
    CertificatePending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub event: TimelineEvent,
    pub ts_utc: DateTime<Utc>,
    pub actor: ActorId,
    pub description: String,
    pub metadata: Value,
}

// ---------------------------------------------------------------------------
// Admin review
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminDecision {
    Approved,
    Rejected,
}

/// The admin's binding decision. Written exactly once, by the transition that
/// resolves adjudication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminReview {
    pub reviewer: ActorId,
    pub ts_utc: DateTime<Utc>,
    pub decision: AdminDecision,
    /// Approval comments, or the rejection reason.
    pub comments: String,
}

// ---------------------------------------------------------------------------
// BuyRequest
// ---------------------------------------------------------------------------

/// The transaction record tracking one negotiated sale from agreement to
/// completion or termination. Mutated only by the workflow engine's
/// transition functions; never physically deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyRequest {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub land_id: Uuid,
    pub seller: ActorId,
    pub buyer: ActorId,
    /// Positive amount in whole currency units. Fixed at creation.
    pub agreed_price: i64,
    pub status: BuyRequestStatus,

    // Verification gate. Cleared after use or reissue.
    pub two_factor_code: Option<String>,
    pub two_factor_expires_at: Option<DateTime<Utc>>,
    pub two_factor_verified: bool,

    pub admin_review: Option<AdminReview>,
    /// Back-reference to the ledger record created on approval. Set exactly
    /// once; its absence on an APPROVED request marks a half-applied
    /// adjudication.
    pub land_transaction_id: Option<Uuid>,
    /// Simulated blockchain receipt (sha256 of the canonical ledger record).
    pub blockchain_tx_hash: Option<String>,

    pub timeline: Vec<TimelineEntry>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

impl BuyRequest {
    pub fn new(
        conversation_id: Uuid,
        land_id: Uuid,
        seller: ActorId,
        buyer: ActorId,
        agreed_price: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            land_id,
            seller,
            buyer,
            agreed_price,
            status: BuyRequestStatus::PendingSellerConfirmation,
            two_factor_code: None,
            two_factor_expires_at: None,
            two_factor_verified: false,
            admin_review: None,
            land_transaction_id: None,
            blockchain_tx_hash: None,
            timeline: Vec::new(),
            created_at_utc: now,
            updated_at_utc: now,
        }
    }

    /// True when a code was issued and its expiry has passed.
    pub fn code_expired(&self, now: DateTime<Utc>) -> bool {
        match self.two_factor_expires_at {
            Some(exp) => now > exp,
            None => false,
        }
    }

    pub fn is_party(&self, actor: ActorId) -> bool {
        actor == self.buyer || actor == self.seller
    }

    /// Append one timeline entry. The only mutation path for the timeline.
    pub fn push_timeline(
        &mut self,
        event: TimelineEvent,
        actor: ActorId,
        description: impl Into<String>,
        metadata: Value,
        now: DateTime<Utc>,
    ) {
        self.timeline.push(TimelineEntry {
            event,
            ts_utc: now,
            actor,
            description: description.into(),
            metadata,
        });
        self.updated_at_utc = now;
    }
}

// ---------------------------------------------------------------------------
// BuyRequestView: resolved read-only projection
// ---------------------------------------------------------------------------

/// Projection returned by status queries. Carries the raw record plus the
/// derived flags; never used as a write model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyRequestView {
    pub request: BuyRequest,
    pub is_expired: bool,
    pub can_be_confirmed_by_seller: bool,
    pub can_be_approved_by_admin: bool,
}

impl BuyRequestView {
    pub fn project(request: BuyRequest, now: DateTime<Utc>) -> Self {
        let is_expired = request.code_expired(now);
        let can_be_confirmed_by_seller = request.status
            == BuyRequestStatus::PendingSellerConfirmation
            && request.two_factor_code.is_some()
            && !is_expired;
        let can_be_approved_by_admin = request.status == BuyRequestStatus::PendingAdminApproval;
        Self {
            request,
            is_expired,
            can_be_confirmed_by_seller,
            can_be_approved_by_admin,
        }
    }
}

// ---------------------------------------------------------------------------
// Land parcel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LandStatus {
    Available,
    ForSale,
    UnderTransaction,
    Sold,
}

impl LandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LandStatus::Available => "AVAILABLE",
            LandStatus::ForSale => "FOR_SALE",
            LandStatus::UnderTransaction => "UNDER_TRANSACTION",
            LandStatus::Sold => "SOLD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AVAILABLE" => Some(Self::Available),
            "FOR_SALE" => Some(Self::ForSale),
            "UNDER_TRANSACTION" => Some(Self::UnderTransaction),
            "SOLD" => Some(Self::Sold),
            _ => None,
        }
    }
}

/// One prior tenure in a parcel's ownership history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenureRecord {
    pub owner: ActorId,
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,
}

/// Land parcel as seen by the workflow core. The core mutates ownership
/// fields only at the terminal-approval transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandParcel {
    pub id: Uuid,
    pub status: LandStatus,
    pub current_owner: ActorId,
    /// Start of the current owner's tenure; becomes `from_date` of the
    /// appended history record on transfer.
    pub owner_since_utc: DateTime<Utc>,
    pub ownership_history: Vec<TenureRecord>,
    pub is_for_sale: bool,
    /// Reference hash/URL of the latest ownership certificate, if generated.
    pub certificate_ref: Option<String>,
}

impl LandParcel {
    /// Whether a buy request may be opened against this parcel.
    pub fn listed_for_sale(&self) -> bool {
        self.is_for_sale && self.status == LandStatus::ForSale
    }
}

// ---------------------------------------------------------------------------
// Ledger record
// ---------------------------------------------------------------------------

/// Immutable audit-oriented record created on approval, distinct from the
/// BuyRequest itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandTransaction {
    pub id: Uuid,
    pub buy_request_id: Uuid,
    pub land_id: Uuid,
    pub seller: ActorId,
    pub buyer: ActorId,
    pub price: i64,
    pub ts_utc: DateTime<Utc>,
    /// sha256 over the canonical record content (the simulated blockchain
    /// receipt).
    pub audit_hash: String,
}

/// TTL helper shared by verify + projections.
pub fn code_ttl() -> Duration {
    Duration::minutes(CODE_TTL_MINUTES)
}

//! Request and response types for all llr-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests. No business logic lives here.

use llr_schemas::ActorId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
    pub config_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// Error body
// ---------------------------------------------------------------------------

/// Body returned for every refused transition. `kind` is the stable
/// machine-readable discriminator; `error` is the human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: String,
    pub error: String,
}

// ---------------------------------------------------------------------------
// /v1/requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequestBody {
    pub conversation_id: Uuid,
    pub land_id: Uuid,
    pub seller: ActorId,
    pub buyer: ActorId,
    pub agreed_price: i64,
}

/// Caller-only body for transitions that need no further input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerBody {
    pub caller: ActorId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmBody {
    pub caller: ActorId,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveBody {
    pub caller: ActorId,
    #[serde(default)]
    pub comments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectBody {
    pub caller: ActorId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelBody {
    pub caller: ActorId,
    #[serde(default)]
    pub reason: String,
}

/// Acknowledgement for resend-code. The code travels over the notification
/// channel only, never over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResendCodeResponse {
    pub ok: bool,
    pub request_id: Uuid,
}

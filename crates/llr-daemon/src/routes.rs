//! Axum router and all HTTP handlers for llr-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use llr_workflow::{RegistryStore, WorkflowError};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;
use uuid::Uuid;

use crate::{
    api_types::{
        ApproveBody, CallerBody, CancelBody, ConfirmBody, CreateRequestBody, ErrorResponse,
        HealthResponse, RejectBody, ResendCodeResponse,
    },
    state::{uptime_secs, AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/stream", get(stream))
        .route("/v1/requests", post(create_request))
        .route("/v1/requests/:id", get(get_request))
        .route("/v1/requests/:id/resend-code", post(resend_code))
        .route("/v1/requests/:id/confirm", post(confirm))
        .route("/v1/requests/:id/approve", post(approve))
        .route("/v1/requests/:id/reject", post(reject))
        .route("/v1/requests/:id/cancel", post(cancel))
        .route("/v1/reconcile", get(reconcile))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Map a refused transition to its HTTP status. Guard violations are 4xx;
/// store transients are 503; the half-applied adjudication inconsistency is
/// 500 with its own kind.
fn error_status(err: &WorkflowError) -> StatusCode {
    match err {
        WorkflowError::AlreadyExists
        | WorkflowError::WrongState { .. }
        | WorkflowError::AlreadyTerminal(_) => StatusCode::CONFLICT,
        WorkflowError::WrongActor | WorkflowError::Forbidden => StatusCode::FORBIDDEN,
        WorkflowError::SellerNotVerified
        | WorkflowError::LandNotForSale
        | WorkflowError::InvalidPrice
        | WorkflowError::InvalidOrExpiredCode
        | WorkflowError::MissingReason => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::NotFound => StatusCode::NOT_FOUND,
        WorkflowError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        WorkflowError::LedgerInconsistency { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn refuse(err: WorkflowError) -> Response {
    let status = error_status(&err);
    let body = ErrorResponse {
        kind: err.kind().to_string(),
        error: err.to_string(),
    };
    (status, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            uptime_secs: uptime_secs(),
            config_hash: st.config_hash.clone(),
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/requests
// ---------------------------------------------------------------------------

pub(crate) async fn create_request(
    State(st): State<Arc<AppState>>,
    Json(body): Json<CreateRequestBody>,
) -> Response {
    match st
        .engine
        .create(
            body.conversation_id,
            body.land_id,
            body.seller,
            body.buyer,
            body.agreed_price,
        )
        .await
    {
        Ok(req) => {
            info!(request_id = %req.id, "buy request created");
            (StatusCode::CREATED, Json(req)).into_response()
        }
        Err(err) => refuse(err),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/requests/:id
// ---------------------------------------------------------------------------

pub(crate) async fn get_request(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match st.engine.get_status(id).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(err) => refuse(err),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/requests/:id/resend-code
// ---------------------------------------------------------------------------

pub(crate) async fn resend_code(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<CallerBody>,
) -> Response {
    match st.engine.resend_code(id, body.caller).await {
        // The returned code is deliberately dropped here; delivery happens on
        // the notifier side.
        Ok(_code) => (
            StatusCode::OK,
            Json(ResendCodeResponse {
                ok: true,
                request_id: id,
            }),
        )
            .into_response(),
        Err(err) => refuse(err),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/requests/:id/confirm
// ---------------------------------------------------------------------------

pub(crate) async fn confirm(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ConfirmBody>,
) -> Response {
    match st.engine.confirm(id, body.caller, &body.code).await {
        Ok(req) => (StatusCode::OK, Json(req)).into_response(),
        Err(err) => refuse(err),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/requests/:id/approve
// ---------------------------------------------------------------------------

pub(crate) async fn approve(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ApproveBody>,
) -> Response {
    match st.engine.approve(id, body.caller, &body.comments).await {
        Ok(req) => (StatusCode::OK, Json(req)).into_response(),
        Err(err) => refuse(err),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/requests/:id/reject
// ---------------------------------------------------------------------------

pub(crate) async fn reject(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<RejectBody>,
) -> Response {
    match st.engine.reject(id, body.caller, &body.reason).await {
        Ok(req) => (StatusCode::OK, Json(req)).into_response(),
        Err(err) => refuse(err),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/requests/:id/cancel
// ---------------------------------------------------------------------------

pub(crate) async fn cancel(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelBody>,
) -> Response {
    match st.engine.cancel(id, body.caller, &body.reason).await {
        Ok(req) => (StatusCode::OK, Json(req)).into_response(),
        Err(err) => refuse(err),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/reconcile
// ---------------------------------------------------------------------------

pub(crate) async fn reconcile(State(st): State<Arc<AppState>>) -> Response {
    let store = st.engine.store();
    let requests = match store.list_buy_requests().await {
        Ok(v) => v,
        Err(e) => return refuse(WorkflowError::from(e)),
    };
    let parcels = match store.list_land_parcels().await {
        Ok(v) => v,
        Err(e) => return refuse(WorkflowError::from(e)),
    };
    let transactions = match store.list_land_transactions().await {
        Ok(v) => v,
        Err(e) => return refuse(WorkflowError::from(e)),
    };

    let report = llr_reconcile::scan(&requests, &parcels, &transactions);
    if report.requires_manual_review() {
        let _ = st.bus.send(BusMsg::LogLine {
            level: "ERROR".to_string(),
            msg: format!("reconcile found {} drift finding(s)", report.findings.len()),
        });
    }
    (StatusCode::OK, Json(report)).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::AdminQueue { .. } => "admin_queue",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}

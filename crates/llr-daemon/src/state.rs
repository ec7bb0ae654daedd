//! Shared runtime state for llr-daemon.
//!
//! All types here are `Clone`-able (via `Arc` or copy). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use llr_audit::AuditWriter;
use llr_schemas::{
    ActorId, BuyRequest, BuyRequestStatus, Caller, LandParcel, LandStatus, LandTransaction, Role,
};
use llr_verify::SystemClock;
use llr_workflow::{RegistryStore, StoreError, WorkflowEngine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    /// A request entered PENDING_ADMIN_APPROVAL and awaits adjudication.
    AdminQueue { request_id: Uuid },
    LogLine { level: String, msg: String },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// DynStore: type-erased RegistryStore
// ---------------------------------------------------------------------------

/// Type-erased store handle so the daemon can run against either the
/// in-process store or Postgres without making `AppState` generic.
#[derive(Clone)]
pub struct DynStore(pub Arc<dyn RegistryStore>);

#[async_trait]
impl RegistryStore for DynStore {
    async fn insert_buy_request(&self, req: &BuyRequest) -> Result<(), StoreError> {
        self.0.insert_buy_request(req).await
    }

    async fn fetch_buy_request(&self, id: Uuid) -> Result<BuyRequest, StoreError> {
        self.0.fetch_buy_request(id).await
    }

    async fn fetch_active_request_for_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Option<BuyRequest>, StoreError> {
        self.0
            .fetch_active_request_for_conversation(conversation_id)
            .await
    }

    async fn update_if_status(
        &self,
        req: &BuyRequest,
        expected: BuyRequestStatus,
    ) -> Result<bool, StoreError> {
        self.0.update_if_status(req, expected).await
    }

    async fn list_buy_requests(&self) -> Result<Vec<BuyRequest>, StoreError> {
        self.0.list_buy_requests().await
    }

    async fn fetch_land(&self, id: Uuid) -> Result<LandParcel, StoreError> {
        self.0.fetch_land(id).await
    }

    async fn list_land_parcels(&self) -> Result<Vec<LandParcel>, StoreError> {
        self.0.list_land_parcels().await
    }

    async fn update_land_if_status(
        &self,
        parcel: &LandParcel,
        expected: LandStatus,
    ) -> Result<bool, StoreError> {
        self.0.update_land_if_status(parcel, expected).await
    }

    async fn insert_land_transaction(&self, tx: &LandTransaction) -> Result<(), StoreError> {
        self.0.insert_land_transaction(tx).await
    }

    async fn list_land_transactions(&self) -> Result<Vec<LandTransaction>, StoreError> {
        self.0.list_land_transactions().await
    }
}

// ---------------------------------------------------------------------------
// Collaborator implementations
// ---------------------------------------------------------------------------

/// Directory backed by a static admin list (LLR_ADMIN_IDS). Everyone else
/// resolves as a plain user with verification enabled.
pub struct StaticAdminDirectory {
    admins: Vec<ActorId>,
}

impl StaticAdminDirectory {
    pub fn new(admins: Vec<ActorId>) -> Self {
        Self { admins }
    }
}

impl llr_workflow::Directory for StaticAdminDirectory {
    fn resolve(&self, id: ActorId) -> Option<Caller> {
        let role = if self.admins.contains(&id) {
            Role::Admin
        } else {
            Role::User
        };
        Some(Caller { id, role })
    }

    fn two_factor_enabled(&self, _id: ActorId) -> bool {
        true
    }
}

/// Notifier that surfaces workflow notifications on the SSE bus. The code
/// itself is never broadcast; only its issuance is.
pub struct BusNotifier {
    bus: broadcast::Sender<BusMsg>,
}

impl BusNotifier {
    pub fn new(bus: broadcast::Sender<BusMsg>) -> Self {
        Self { bus }
    }
}

impl llr_workflow::Notifier for BusNotifier {
    fn code_issued(&self, seller: ActorId, request_id: Uuid, _code: &str) {
        tracing::info!(%seller, %request_id, "confirmation code issued");
        let _ = self.bus.send(BusMsg::LogLine {
            level: "INFO".to_string(),
            msg: format!("confirmation code issued for request {request_id}"),
        });
    }

    fn admin_queue(&self, request_id: Uuid) {
        let _ = self.bus.send(BusMsg::AdminQueue { request_id });
    }
}

/// Deterministic certificate generator: the reference is a digest over the
/// transfer identity. Stands in for the external certificate service.
pub struct DigestCertificates;

impl llr_ledger::CertificateGenerator for DigestCertificates {
    fn regenerate(
        &self,
        transaction_id: Uuid,
        land_id: Uuid,
        new_owner: ActorId,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let mut hasher = Sha256::new();
        hasher.update(format!("{transaction_id}|{land_id}|{new_owner}").as_bytes());
        Ok(format!("cert-{}", hex::encode(hasher.finalize())))
    }
}

/// Concrete engine type used by every handler.
pub type DaemonEngine =
    WorkflowEngine<DynStore, StaticAdminDirectory, SystemClock, BusNotifier, DigestCertificates>;

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Static build metadata.
    pub build: BuildInfo,
    pub engine: DaemonEngine,
    /// Hash of the effective config, for health output and log correlation.
    pub config_hash: Option<String>,
}

impl AppState {
    pub fn new(
        store: DynStore,
        admins: Vec<ActorId>,
        audit: Option<AuditWriter>,
        config_hash: Option<String>,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);

        let mut engine = WorkflowEngine::new(
            store,
            StaticAdminDirectory::new(admins),
            SystemClock,
            BusNotifier::new(bus.clone()),
            DigestCertificates,
        );
        if let Some(writer) = audit {
            engine = engine.with_audit(writer);
        }

        Self {
            bus,
            build: BuildInfo {
                service: "llr-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            engine,
            config_hash,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

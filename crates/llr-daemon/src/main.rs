//! llr-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads config, builds
//! the shared state, wires middleware, and starts the HTTP server. All route
//! handlers live in `routes.rs`; all shared state types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use llr_audit::AuditWriter;
use llr_daemon::{routes, state};
use llr_workflow::MemoryStore;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    // Layered config: LLR_CONFIG is a comma-separated list of YAML paths,
    // later paths overriding earlier ones. Absent means defaults.
    let (settings, config_hash) = match std::env::var("LLR_CONFIG") {
        Ok(paths) => {
            let parts: Vec<&str> = paths.split(',').map(str::trim).collect();
            let loaded = llr_config::load_layered_yaml(&parts)?;
            info!(config_hash = %loaded.config_hash, "config loaded");
            (loaded.settings()?, Some(loaded.config_hash))
        }
        Err(_) => (llr_config::RegistrySettings::default(), None),
    };

    let store = match std::env::var(llr_db::ENV_DB_URL) {
        Ok(_) => {
            let pool = llr_db::connect_from_env().await?;
            llr_db::migrate(&pool).await?;
            info!("using PostgreSQL store");
            state::DynStore(Arc::new(llr_db::PgStore::new(pool)))
        }
        Err(_) => {
            warn!("no {} set; using in-memory store (volatile)", llr_db::ENV_DB_URL);
            state::DynStore(Arc::new(MemoryStore::new()))
        }
    };

    let admins = std::env::var("LLR_ADMIN_IDS").unwrap_or_default();
    let admin_ids: Vec<llr_schemas::ActorId> = admins
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match uuid::Uuid::parse_str(s) {
            Ok(id) => Some(llr_schemas::ActorId(id)),
            Err(_) => {
                warn!(entry = s, "ignoring malformed admin id in LLR_ADMIN_IDS");
                None
            }
        })
        .collect();
    if admin_ids.is_empty() {
        warn!("LLR_ADMIN_IDS is empty; no caller can adjudicate requests");
    }

    let audit = if settings.audit.log_path.is_empty() {
        None
    } else {
        Some(AuditWriter::new(
            &settings.audit.log_path,
            settings.audit.hash_chain,
        )?)
    };

    let shared = Arc::new(state::AppState::new(store, admin_ids, audit, config_hash));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env()
        .or_else(|| settings.daemon.bind_addr.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8743)));
    info!("llr-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("LLR_DAEMON_ADDR").ok()?.parse().ok()
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}

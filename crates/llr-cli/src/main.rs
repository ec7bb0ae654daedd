//! Operator CLI for the land-registry workflow service.
//!
//! Database housekeeping, config hashing, audit-log verification, and the
//! offline reconcile scan. Transaction traffic goes through the daemon's HTTP
//! API, not this tool.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use llr_schemas::{ActorId, LandParcel, LandStatus};
use llr_workflow::RegistryStore;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "llr")]
#[command(about = "Land registry workflow CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> site...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Audit trail utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },

    /// Parcel housekeeping
    Land {
        #[command(subcommand)]
        cmd: LandCmd,
    },

    /// Scan the registry for drift between requests, parcels, and the ledger
    Reconcile,
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations. Guardrail: refuses when active buy requests
    /// exist unless --yes is provided.
    Migrate {
        /// Acknowledge you are migrating a DB with in-flight transactions.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Verify the hash chain of a JSONL audit log.
    Verify {
        /// Path to the audit log
        #[arg(long)]
        path: String,
    },
}

#[derive(Subcommand)]
enum LandCmd {
    /// Seed (or re-list) a parcel as FOR_SALE with the given owner.
    Seed {
        /// Owner actor id
        #[arg(long)]
        owner: String,

        /// Parcel id; generated when omitted
        #[arg(long)]
        id: Option<String>,
    },

    /// Print a parcel row.
    Show {
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = llr_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = llr_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_buy_requests_table={}",
                        s.ok, s.has_buy_requests_table
                    );
                    if s.has_buy_requests_table {
                        let n = llr_db::count_active_requests(&pool).await?;
                        println!("active_requests={n}");
                    }
                }
                DbCmd::Migrate { yes } => {
                    // Guardrail: refuse migrations while transactions are in
                    // flight unless the operator explicitly acknowledges.
                    let n = llr_db::count_active_requests(&pool).await?;
                    if n > 0 && !yes {
                        anyhow::bail!(
                            "REFUSING MIGRATE: detected {} active buy request(s). Re-run with: `llr db migrate --yes`",
                            n
                        );
                    }

                    llr_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = llr_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Audit { cmd } => match cmd {
            AuditCmd::Verify { path } => match llr_audit::verify_hash_chain(&path)? {
                llr_audit::VerifyResult::Valid { lines } => {
                    println!("audit_chain=valid lines={lines}");
                }
                llr_audit::VerifyResult::Broken { line, reason } => {
                    println!("audit_chain=BROKEN line={line} reason={reason}");
                    std::process::exit(2);
                }
            },
        },

        Commands::Land { cmd } => {
            let pool = llr_db::connect_from_env().await?;
            let store = llr_db::PgStore::new(pool);
            match cmd {
                LandCmd::Seed { owner, id } => {
                    let owner =
                        ActorId(Uuid::parse_str(&owner).context("invalid owner uuid")?);
                    let id = match id {
                        Some(s) => Uuid::parse_str(&s).context("invalid parcel uuid")?,
                        None => Uuid::new_v4(),
                    };
                    let parcel = LandParcel {
                        id,
                        status: LandStatus::ForSale,
                        current_owner: owner,
                        owner_since_utc: Utc::now(),
                        ownership_history: Vec::new(),
                        is_for_sale: true,
                        certificate_ref: None,
                    };
                    store.upsert_land(&parcel).await?;
                    println!("land_id={id} owner={owner} status=FOR_SALE");
                }
                LandCmd::Show { id } => {
                    let id = Uuid::parse_str(&id).context("invalid parcel uuid")?;
                    let parcel = store
                        .fetch_land(id)
                        .await
                        .map_err(|e| anyhow::anyhow!("fetch_land failed: {e}"))?;
                    println!("land_id={}", parcel.id);
                    println!("status={}", parcel.status.as_str());
                    println!("current_owner={}", parcel.current_owner);
                    println!("owner_since_utc={}", parcel.owner_since_utc.to_rfc3339());
                    println!("is_for_sale={}", parcel.is_for_sale);
                    println!("tenures={}", parcel.ownership_history.len());
                    println!(
                        "certificate_ref={}",
                        parcel.certificate_ref.as_deref().unwrap_or("-")
                    );
                }
            }
        }

        Commands::Reconcile => {
            let pool = llr_db::connect_from_env().await?;
            let store = llr_db::PgStore::new(pool);
            let requests = store
                .list_buy_requests()
                .await
                .map_err(|e| anyhow::anyhow!("list_buy_requests failed: {e}"))?;
            let parcels = store
                .list_land_parcels()
                .await
                .map_err(|e| anyhow::anyhow!("list_land_parcels failed: {e}"))?;
            let transactions = store
                .list_land_transactions()
                .await
                .map_err(|e| anyhow::anyhow!("list_land_transactions failed: {e}"))?;

            let report = llr_reconcile::scan(&requests, &parcels, &transactions);
            println!("findings={}", report.findings.len());
            for f in &report.findings {
                println!("{}", serde_json::to_string(f)?);
            }
            if report.requires_manual_review() {
                std::process::exit(3);
            }
        }
    }

    Ok(())
}

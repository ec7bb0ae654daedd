//! PostgreSQL persistence for the registry workflow.
//!
//! `PgStore` implements the same `RegistryStore` contract as the in-process
//! store in `llr-workflow`: compare-and-set status writes via conditional
//! UPDATE on both requests and parcels, and the one-active-request
//! invariants (per conversation and per parcel) enforced by the partial
//! unique indexes `uq_active_request_per_conversation` and
//! `uq_active_request_per_land` so that concurrent inserts cannot race past
//! an application-level check.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use llr_schemas::{
    ActorId, AdminReview, BuyRequest, BuyRequestStatus, LandParcel, LandStatus, LandTransaction,
    TenureRecord, TimelineEntry,
};
use llr_workflow::{RegistryStore, StoreError};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

pub const ENV_DB_URL: &str = "LLR_DATABASE_URL";

const UQ_ACTIVE_REQUEST: &str = "uq_active_request_per_conversation";
const UQ_ACTIVE_LAND: &str = "uq_active_request_per_land";
const UQ_LEDGER_REQUEST: &str = "uq_ledger_buy_request";

/// Connect to Postgres using LLR_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='buy_requests'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_buy_requests_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_buy_requests_table: bool,
}

/// Count non-terminal buy requests. Used by CLI guardrails before migrating
/// a database that is serving live traffic.
pub async fn count_active_requests(pool: &PgPool) -> Result<i64> {
    // If schema doesn't exist yet, treat as 0 (safe) rather than failing.
    let st = status(pool).await?;
    if !st.has_buy_requests_table {
        return Ok(0);
    }

    let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        select count(*)::bigint
        from buy_requests
        where status not in ('COMPLETED','REJECTED','CANCELLED')
        "#,
    )
    .fetch_one(pool)
    .await
    .context("count_active_requests failed")?;

    Ok(n)
}

pub async fn has_active_requests(pool: &PgPool) -> Result<bool> {
    Ok(count_active_requests(pool).await? > 0)
}

/// Detect a Postgres unique constraint violation by name.
fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.constraint() == Some(constraint)
                // Postgres unique_violation is 23505. Not always present, but helps.
                || db_err.code().as_deref() == Some("23505")
                    && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

fn backend(context: &str, err: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("{context}: {err}"))
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn parse_request_status(s: &str) -> Result<BuyRequestStatus, StoreError> {
    BuyRequestStatus::parse(s)
        .ok_or_else(|| StoreError::Backend(format!("invalid buy request status in row: {s}")))
}

fn parse_land_status(s: &str) -> Result<LandStatus, StoreError> {
    LandStatus::parse(s)
        .ok_or_else(|| StoreError::Backend(format!("invalid land status in row: {s}")))
}

fn decode_json<T: serde::de::DeserializeOwned>(
    column: &str,
    value: Value,
) -> Result<T, StoreError> {
    serde_json::from_value(value)
        .map_err(|e| StoreError::Backend(format!("decode {column} failed: {e}")))
}

fn row_to_request(row: &sqlx::postgres::PgRow) -> Result<BuyRequest, StoreError> {
    let get = |c: &str| format!("read column {c} failed");

    let status: String = row
        .try_get("status")
        .map_err(|e| StoreError::Backend(format!("{}: {e}", get("status"))))?;
    let admin_review: Option<Value> = row
        .try_get("admin_review")
        .map_err(|e| StoreError::Backend(format!("{}: {e}", get("admin_review"))))?;
    let timeline: Value = row
        .try_get("timeline")
        .map_err(|e| StoreError::Backend(format!("{}: {e}", get("timeline"))))?;

    let admin_review: Option<AdminReview> = match admin_review {
        Some(v) => Some(decode_json("admin_review", v)?),
        None => None,
    };
    let timeline: Vec<TimelineEntry> = decode_json("timeline", timeline)?;

    let col = |e: sqlx::Error, c: &str| StoreError::Backend(format!("read column {c} failed: {e}"));

    Ok(BuyRequest {
        id: row.try_get("id").map_err(|e| col(e, "id"))?,
        conversation_id: row
            .try_get("conversation_id")
            .map_err(|e| col(e, "conversation_id"))?,
        land_id: row.try_get("land_id").map_err(|e| col(e, "land_id"))?,
        seller: ActorId(row.try_get("seller").map_err(|e| col(e, "seller"))?),
        buyer: ActorId(row.try_get("buyer").map_err(|e| col(e, "buyer"))?),
        agreed_price: row
            .try_get("agreed_price")
            .map_err(|e| col(e, "agreed_price"))?,
        status: parse_request_status(&status)?,
        two_factor_code: row
            .try_get("two_factor_code")
            .map_err(|e| col(e, "two_factor_code"))?,
        two_factor_expires_at: row
            .try_get("two_factor_expires_at")
            .map_err(|e| col(e, "two_factor_expires_at"))?,
        two_factor_verified: row
            .try_get("two_factor_verified")
            .map_err(|e| col(e, "two_factor_verified"))?,
        admin_review,
        land_transaction_id: row
            .try_get("land_transaction_id")
            .map_err(|e| col(e, "land_transaction_id"))?,
        blockchain_tx_hash: row
            .try_get("blockchain_tx_hash")
            .map_err(|e| col(e, "blockchain_tx_hash"))?,
        timeline,
        created_at_utc: row
            .try_get("created_at_utc")
            .map_err(|e| col(e, "created_at_utc"))?,
        updated_at_utc: row
            .try_get("updated_at_utc")
            .map_err(|e| col(e, "updated_at_utc"))?,
    })
}

fn row_to_parcel(row: &sqlx::postgres::PgRow) -> Result<LandParcel, StoreError> {
    let col = |e: sqlx::Error, c: &str| StoreError::Backend(format!("read column {c} failed: {e}"));

    let status: String = row.try_get("status").map_err(|e| col(e, "status"))?;
    let history: Value = row
        .try_get("ownership_history")
        .map_err(|e| col(e, "ownership_history"))?;
    let history: Vec<TenureRecord> = decode_json("ownership_history", history)?;

    Ok(LandParcel {
        id: row.try_get("id").map_err(|e| col(e, "id"))?,
        status: parse_land_status(&status)?,
        current_owner: ActorId(
            row.try_get("current_owner")
                .map_err(|e| col(e, "current_owner"))?,
        ),
        owner_since_utc: row
            .try_get("owner_since_utc")
            .map_err(|e| col(e, "owner_since_utc"))?,
        ownership_history: history,
        is_for_sale: row
            .try_get("is_for_sale")
            .map_err(|e| col(e, "is_for_sale"))?,
        certificate_ref: row
            .try_get("certificate_ref")
            .map_err(|e| col(e, "certificate_ref"))?,
    })
}

fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<LandTransaction, StoreError> {
    let col = |e: sqlx::Error, c: &str| StoreError::Backend(format!("read column {c} failed: {e}"));

    Ok(LandTransaction {
        id: row.try_get("id").map_err(|e| col(e, "id"))?,
        buy_request_id: row
            .try_get("buy_request_id")
            .map_err(|e| col(e, "buy_request_id"))?,
        land_id: row.try_get("land_id").map_err(|e| col(e, "land_id"))?,
        seller: ActorId(row.try_get("seller").map_err(|e| col(e, "seller"))?),
        buyer: ActorId(row.try_get("buyer").map_err(|e| col(e, "buyer"))?),
        price: row.try_get("price").map_err(|e| col(e, "price"))?,
        ts_utc: row.try_get("ts_utc").map_err(|e| col(e, "ts_utc"))?,
        audit_hash: row
            .try_get("audit_hash")
            .map_err(|e| col(e, "audit_hash"))?,
    })
}

fn encode_json<T: serde::Serialize>(column: &str, value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value)
        .map_err(|e| StoreError::Backend(format!("encode {column} failed: {e}")))
}

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

/// PostgreSQL-backed [`RegistryStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Seed or replace a parcel row. Operational tooling only; the workflow
    /// itself never creates parcels.
    pub async fn upsert_land(&self, parcel: &LandParcel) -> Result<()> {
        let history = serde_json::to_value(&parcel.ownership_history)
            .context("encode ownership_history failed")?;
        sqlx::query(
            r#"
            insert into land_parcels (
              id, status, current_owner, owner_since_utc, ownership_history,
              is_for_sale, certificate_ref
            ) values ($1, $2, $3, $4, $5, $6, $7)
            on conflict (id) do update set
              status = excluded.status,
              current_owner = excluded.current_owner,
              owner_since_utc = excluded.owner_since_utc,
              ownership_history = excluded.ownership_history,
              is_for_sale = excluded.is_for_sale,
              certificate_ref = excluded.certificate_ref
            "#,
        )
        .bind(parcel.id)
        .bind(parcel.status.as_str())
        .bind(parcel.current_owner.0)
        .bind(parcel.owner_since_utc)
        .bind(history)
        .bind(parcel.is_for_sale)
        .bind(&parcel.certificate_ref)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!("upsert_land failed: {e}"))?;
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for PgStore {
    async fn insert_buy_request(&self, req: &BuyRequest) -> Result<(), StoreError> {
        let admin_review = match &req.admin_review {
            Some(r) => Some(encode_json("admin_review", r)?),
            None => None,
        };
        let timeline = encode_json("timeline", &req.timeline)?;

        let res = sqlx::query(
            r#"
            insert into buy_requests (
              id, conversation_id, land_id, seller, buyer, agreed_price,
              status, two_factor_code, two_factor_expires_at,
              two_factor_verified, admin_review, land_transaction_id,
              blockchain_tx_hash, timeline, created_at_utc, updated_at_utc
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
              $15, $16
            )
            "#,
        )
        .bind(req.id)
        .bind(req.conversation_id)
        .bind(req.land_id)
        .bind(req.seller.0)
        .bind(req.buyer.0)
        .bind(req.agreed_price)
        .bind(req.status.as_str())
        .bind(&req.two_factor_code)
        .bind(req.two_factor_expires_at)
        .bind(req.two_factor_verified)
        .bind(admin_review)
        .bind(req.land_transaction_id)
        .bind(&req.blockchain_tx_hash)
        .bind(timeline)
        .bind(req.created_at_utc)
        .bind(req.updated_at_utc)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unique_constraint_violation(&e, UQ_ACTIVE_REQUEST) => {
                Err(StoreError::ActiveRequestExists)
            }
            Err(e) if is_unique_constraint_violation(&e, UQ_ACTIVE_LAND) => {
                Err(StoreError::ParcelHasActiveRequest)
            }
            Err(e) => Err(backend("insert_buy_request", e)),
        }
    }

    async fn fetch_buy_request(&self, id: Uuid) -> Result<BuyRequest, StoreError> {
        let row = sqlx::query("select * from buy_requests where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("fetch_buy_request", e))?
            .ok_or(StoreError::NotFound)?;
        row_to_request(&row)
    }

    async fn fetch_active_request_for_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Option<BuyRequest>, StoreError> {
        let row = sqlx::query(
            r#"
            select * from buy_requests
            where conversation_id = $1
              and status not in ('COMPLETED','REJECTED','CANCELLED')
            limit 1
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend("fetch_active_request_for_conversation", e))?;
        row.as_ref().map(row_to_request).transpose()
    }

    async fn update_if_status(
        &self,
        req: &BuyRequest,
        expected: BuyRequestStatus,
    ) -> Result<bool, StoreError> {
        let admin_review = match &req.admin_review {
            Some(r) => Some(encode_json("admin_review", r)?),
            None => None,
        };
        let timeline = encode_json("timeline", &req.timeline)?;

        // The status guard in the WHERE clause is the compare-and-set; zero
        // rows affected means a concurrent transition won.
        let res = sqlx::query(
            r#"
            update buy_requests set
              status = $2,
              two_factor_code = $3,
              two_factor_expires_at = $4,
              two_factor_verified = $5,
              admin_review = $6,
              land_transaction_id = $7,
              blockchain_tx_hash = $8,
              timeline = $9,
              updated_at_utc = $10
            where id = $1 and status = $11
            "#,
        )
        .bind(req.id)
        .bind(req.status.as_str())
        .bind(&req.two_factor_code)
        .bind(req.two_factor_expires_at)
        .bind(req.two_factor_verified)
        .bind(admin_review)
        .bind(req.land_transaction_id)
        .bind(&req.blockchain_tx_hash)
        .bind(timeline)
        .bind(req.updated_at_utc)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| backend("update_if_status", e))?;

        Ok(res.rows_affected() == 1)
    }

    async fn list_buy_requests(&self) -> Result<Vec<BuyRequest>, StoreError> {
        let rows = sqlx::query("select * from buy_requests order by created_at_utc")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend("list_buy_requests", e))?;
        rows.iter().map(row_to_request).collect()
    }

    async fn fetch_land(&self, id: Uuid) -> Result<LandParcel, StoreError> {
        let row = sqlx::query("select * from land_parcels where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| backend("fetch_land", e))?
            .ok_or(StoreError::NotFound)?;
        row_to_parcel(&row)
    }

    async fn list_land_parcels(&self) -> Result<Vec<LandParcel>, StoreError> {
        let rows = sqlx::query("select * from land_parcels order by id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend("list_land_parcels", e))?;
        rows.iter().map(row_to_parcel).collect()
    }

    async fn update_land_if_status(
        &self,
        parcel: &LandParcel,
        expected: LandStatus,
    ) -> Result<bool, StoreError> {
        let history = encode_json("ownership_history", &parcel.ownership_history)?;
        // Same compare-and-set shape as update_if_status: the status guard in
        // the WHERE clause serializes concurrent parcel writers.
        let res = sqlx::query(
            r#"
            update land_parcels set
              status = $2,
              current_owner = $3,
              owner_since_utc = $4,
              ownership_history = $5,
              is_for_sale = $6,
              certificate_ref = $7
            where id = $1 and status = $8
            "#,
        )
        .bind(parcel.id)
        .bind(parcel.status.as_str())
        .bind(parcel.current_owner.0)
        .bind(parcel.owner_since_utc)
        .bind(history)
        .bind(parcel.is_for_sale)
        .bind(&parcel.certificate_ref)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| backend("update_land_if_status", e))?;

        Ok(res.rows_affected() == 1)
    }

    async fn insert_land_transaction(&self, tx: &LandTransaction) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            insert into land_transactions (
              id, buy_request_id, land_id, seller, buyer, price, ts_utc,
              audit_hash
            ) values ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(tx.id)
        .bind(tx.buy_request_id)
        .bind(tx.land_id)
        .bind(tx.seller.0)
        .bind(tx.buyer.0)
        .bind(tx.price)
        .bind(tx.ts_utc)
        .bind(&tx.audit_hash)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unique_constraint_violation(&e, UQ_LEDGER_REQUEST) => {
                Err(StoreError::DuplicateLedgerRecord)
            }
            Err(e) => Err(backend("insert_land_transaction", e)),
        }
    }

    async fn list_land_transactions(&self) -> Result<Vec<LandTransaction>, StoreError> {
        let rows = sqlx::query("select * from land_transactions order by ts_utc")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| backend("list_land_transactions", e))?;
        rows.iter().map(row_to_transaction).collect()
    }
}

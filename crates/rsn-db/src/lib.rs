//! PostgreSQL access layer.
//!
//! Every mutation in this crate runs inside a caller- or self-owned
//! transaction that also appends exactly one audit row (see [`audit`]); the
//! entity write and its audit record commit or roll back together. Store
//! functions take `&mut PgConnection` so the workflow can compose several of
//! them into one transaction.
//!
//! Cross-entity invariants (kit uniqueness, one default address per kind,
//! one account per employee/org) are enforced by named constraints in the
//! migrations; the application-level checks are fast-fail conveniences only.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use rsn_domain::{DomainError, DomainResult};

pub mod audit;
pub mod employees;
pub mod gate;
pub mod licenses;
pub mod orders;
pub mod orgs;
pub mod patients;
pub mod specimens;

pub const ENV_DB_URL: &str = "RSN_DATABASE_URL";

/// Connect to Postgres using RSN_DATABASE_URL.
pub async fn connect_from_env() -> DomainResult<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .map_err(|_| DomainError::validation("database_url", format!("missing env var {ENV_DB_URL}")))?;
    connect(&url).await
}

/// Connect with an explicit URL. The pool is the process's single store
/// handle; construct it at startup and pass it down, never hold it in a
/// global.
pub async fn connect(url: &str) -> DomainResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .map_err(map_db_err)?;
    info!("connected to Postgres");
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> DomainResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DomainError::Database(format!("db migrate failed: {e}")))?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> DomainResult<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .map_err(map_db_err)?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema = 'public' and table_name = 'orders'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .map_err(map_db_err)?;

    Ok(DbStatus {
        ok: one == 1,
        has_orders_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_orders_table: bool,
}

/// Count orders that are mid-fulfillment: finalized but with no lab result
/// yet. Used by the CLI migrate guardrail.
pub async fn count_in_flight_orders(pool: &PgPool) -> DomainResult<i64> {
    let st = status(pool).await?;
    if !st.has_orders_table {
        return Ok(0);
    }

    let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        select count(*)::bigint
        from orders o
        where o.status = 'ASSIGNED'
          and not exists (
              select 1
              from service_requests sr
              join specimens sp on sp.service_request_id = sr.service_request_id
              where sr.order_id = o.order_id
                and sp.deleted_at is null
                and sp.status = 'COMPLETED'
          )
        "#,
    )
    .fetch_one(pool)
    .await
    .map_err(map_db_err)?;

    Ok(n)
}

/// Map a raw sqlx error onto the domain taxonomy.
///
/// Unique violations (SQLSTATE 23505) become `Conflict` with a message
/// derived from the constraint name — the constraints, not the pre-checks,
/// are the authoritative uniqueness guards.
pub fn map_db_err(e: sqlx::Error) -> DomainError {
    if let sqlx::Error::Database(ref db) = e {
        if db.code().as_deref() == Some("23505") {
            let msg = match db.constraint() {
                Some("uq_specimen_kit_active") => "kit id already assigned to a specimen".into(),
                Some("uq_license_number_active") => "license number already in use".into(),
                Some("uq_account_employee_org") => {
                    "employee already holds an account in this organization".into()
                }
                Some("uq_org_default_address") => {
                    "organization already has a default address of this kind".into()
                }
                Some("uq_order_code") => "order code already in use".into(),
                Some("uq_order_lab_id") => "lab order id already recorded".into(),
                Some(name) => format!("unique constraint violated: {name}"),
                None => "unique constraint violated".into(),
            };
            return DomainError::Conflict(msg);
        }
    }
    DomainError::Database(e.to_string())
}

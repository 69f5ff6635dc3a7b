//! License store and expiry sweep.
//!
//! License history is append-only: superseding soft-deletes the old row and
//! inserts the replacement in the same transaction. A half-applied
//! supersede would let the credential gate observe an org with no license
//! at all, so partial failure is not tolerated here.

use std::time::Instant;

use chrono::Utc;
use sqlx::{Acquire, PgConnection, PgPool, Row};
use uuid::Uuid;

use rsn_domain::{Actor, AuditOp, DomainError, DomainResult, License, LicenseStatus, NewLicense};

use crate::audit::{self, NewAuditRecord};
use crate::map_db_err;

/// Credited actor for the scheduled expiry sweep.
pub const SWEEP_ACTOR: &str = "license-expiry-sweep";

pub async fn create_license(
    conn: &mut PgConnection,
    actor: &Actor,
    input: NewLicense,
) -> DomainResult<License> {
    validate_license_input(&input)?;

    let started = Instant::now();
    let license = License {
        license_id: Uuid::new_v4(),
        employee_id: input.employee_id,
        number: input.number,
        state: input.state,
        effective_date: input.effective_date,
        expiration_date: input.expiration_date,
        status: LicenseStatus::PendingApproval,
        created_at: Utc::now(),
        deleted_at: None,
    };

    let mut tx = conn.begin().await.map_err(map_db_err)?;
    insert_license_row(&mut tx, &license).await?;

    audit::record_mutation(
        &mut tx,
        NewAuditRecord {
            actor,
            op: AuditOp::Create,
            entity: "license",
            entity_id: license.license_id,
            pre: None,
            post: Some(audit::image(&license)?),
            started,
        },
    )
    .await?;

    tx.commit().await.map_err(map_db_err)?;
    Ok(license)
}

pub async fn fetch_license(conn: &mut PgConnection, license_id: Uuid) -> DomainResult<License> {
    let row = sqlx::query(
        r#"
        select license_id, employee_id, number, state, effective_date,
               expiration_date, status, created_at, deleted_at
        from licenses
        where license_id = $1 and deleted_at is null
        "#,
    )
    .bind(license_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_err)?
    .ok_or_else(|| DomainError::not_found("license", license_id))?;

    row_to_license(&row)
}

/// Approval decision from the external review collaborator:
/// PENDING_APPROVAL → ACTIVE.
pub async fn approve_license(
    conn: &mut PgConnection,
    actor: &Actor,
    license_id: Uuid,
) -> DomainResult<License> {
    set_license_status(conn, actor, license_id, LicenseStatus::PendingApproval, LicenseStatus::Active)
        .await
}

/// PENDING_APPROVAL → REJECTED.
pub async fn reject_license(
    conn: &mut PgConnection,
    actor: &Actor,
    license_id: Uuid,
) -> DomainResult<License> {
    set_license_status(
        conn,
        actor,
        license_id,
        LicenseStatus::PendingApproval,
        LicenseStatus::Rejected,
    )
    .await
}

async fn set_license_status(
    conn: &mut PgConnection,
    actor: &Actor,
    license_id: Uuid,
    expected: LicenseStatus,
    next: LicenseStatus,
) -> DomainResult<License> {
    let started = Instant::now();
    let mut tx = conn.begin().await.map_err(map_db_err)?;

    let pre = fetch_license_for_update(&mut tx, license_id).await?;
    if pre.status != expected {
        return Err(DomainError::conflict(format!(
            "license {} is {}, expected {}",
            license_id,
            pre.status.as_str(),
            expected.as_str()
        )));
    }

    sqlx::query("update licenses set status = $2 where license_id = $1")
        .bind(license_id)
        .bind(next.as_str())
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

    let mut post = pre.clone();
    post.status = next;

    audit::record_mutation(
        &mut tx,
        NewAuditRecord {
            actor,
            op: AuditOp::Update,
            entity: "license",
            entity_id: license_id,
            pre: Some(audit::image(&pre)?),
            post: Some(audit::image(&post)?),
            started,
        },
    )
    .await?;

    tx.commit().await.map_err(map_db_err)?;
    Ok(post)
}

/// Replace a license with a renewal. The old row is soft-deleted and the new
/// row inserted in one transaction; the new license starts PENDING_APPROVAL
/// like any other.
pub async fn supersede_license(
    conn: &mut PgConnection,
    actor: &Actor,
    license_id: Uuid,
    renewal: NewLicense,
) -> DomainResult<License> {
    validate_license_input(&renewal)?;

    let started = Instant::now();
    let mut tx = conn.begin().await.map_err(map_db_err)?;

    let pre = fetch_license_for_update(&mut tx, license_id).await?;
    if renewal.employee_id != pre.employee_id {
        return Err(DomainError::validation(
            "employee_id",
            "renewal must belong to the same practitioner",
        ));
    }

    sqlx::query("update licenses set deleted_at = now() where license_id = $1")
        .bind(license_id)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

    audit::record_mutation(
        &mut tx,
        NewAuditRecord {
            actor,
            op: AuditOp::Delete,
            entity: "license",
            entity_id: license_id,
            pre: Some(audit::image(&pre)?),
            post: None,
            started,
        },
    )
    .await?;

    let replacement = License {
        license_id: Uuid::new_v4(),
        employee_id: renewal.employee_id,
        number: renewal.number,
        state: renewal.state,
        effective_date: renewal.effective_date,
        expiration_date: renewal.expiration_date,
        status: LicenseStatus::PendingApproval,
        created_at: Utc::now(),
        deleted_at: None,
    };
    insert_license_row(&mut tx, &replacement).await?;

    audit::record_mutation(
        &mut tx,
        NewAuditRecord {
            actor,
            op: AuditOp::Create,
            entity: "license",
            entity_id: replacement.license_id,
            pre: None,
            post: Some(audit::image(&replacement)?),
            started,
        },
    )
    .await?;

    tx.commit().await.map_err(map_db_err)?;
    Ok(replacement)
}

/// The scheduled sweep: flip every live ACTIVE license past its expiration
/// to EXPIRED. Returns the number of licenses expired. Scheduling is the
/// caller's concern; the gate's freshness window is bounded by how often
/// this runs.
pub async fn expire_due_licenses(pool: &PgPool) -> DomainResult<u64> {
    let actor = Actor::external(SWEEP_ACTOR);
    let started = Instant::now();

    let mut tx = pool.begin().await.map_err(map_db_err)?;

    let rows = sqlx::query(
        r#"
        select license_id, employee_id, number, state, effective_date,
               expiration_date, status, created_at, deleted_at
        from licenses
        where status = 'ACTIVE'
          and expiration_date <= now()
          and deleted_at is null
        for update
        "#,
    )
    .fetch_all(&mut *tx)
    .await
    .map_err(map_db_err)?;

    let mut expired = 0u64;
    for row in &rows {
        let pre = row_to_license(row)?;

        sqlx::query("update licenses set status = 'EXPIRED' where license_id = $1")
            .bind(pre.license_id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

        let mut post = pre.clone();
        post.status = LicenseStatus::Expired;

        audit::record_mutation(
            &mut tx,
            NewAuditRecord {
                actor: &actor,
                op: AuditOp::Update,
                entity: "license",
                entity_id: pre.license_id,
                pre: Some(audit::image(&pre)?),
                post: Some(audit::image(&post)?),
                started,
            },
        )
        .await?;

        expired += 1;
    }

    tx.commit().await.map_err(map_db_err)?;
    Ok(expired)
}

fn validate_license_input(input: &NewLicense) -> DomainResult<()> {
    if input.number.trim().is_empty() {
        return Err(DomainError::validation("number", "license number is required"));
    }
    if input.expiration_date.date_naive() <= input.effective_date {
        return Err(DomainError::validation(
            "expiration_date",
            "expiration must be after the effective date",
        ));
    }
    Ok(())
}

async fn insert_license_row(conn: &mut PgConnection, license: &License) -> DomainResult<()> {
    sqlx::query(
        r#"
        insert into licenses (
          license_id, employee_id, number, state, effective_date,
          expiration_date, status, created_at
        ) values ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(license.license_id)
    .bind(license.employee_id)
    .bind(&license.number)
    .bind(&license.state)
    .bind(license.effective_date)
    .bind(license.expiration_date)
    .bind(license.status.as_str())
    .bind(license.created_at)
    .execute(&mut *conn)
    .await
    .map_err(map_db_err)?;
    Ok(())
}

async fn fetch_license_for_update(
    conn: &mut PgConnection,
    license_id: Uuid,
) -> DomainResult<License> {
    let row = sqlx::query(
        r#"
        select license_id, employee_id, number, state, effective_date,
               expiration_date, status, created_at, deleted_at
        from licenses
        where license_id = $1 and deleted_at is null
        for update
        "#,
    )
    .bind(license_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_err)?
    .ok_or_else(|| DomainError::not_found("license", license_id))?;

    row_to_license(&row)
}

fn row_to_license(row: &sqlx::postgres::PgRow) -> DomainResult<License> {
    Ok(License {
        license_id: row.try_get("license_id").map_err(map_db_err)?,
        employee_id: row.try_get("employee_id").map_err(map_db_err)?,
        number: row.try_get("number").map_err(map_db_err)?,
        state: row.try_get("state").map_err(map_db_err)?,
        effective_date: row.try_get("effective_date").map_err(map_db_err)?,
        expiration_date: row.try_get("expiration_date").map_err(map_db_err)?,
        status: LicenseStatus::parse(&row.try_get::<String, _>("status").map_err(map_db_err)?)?,
        created_at: row.try_get("created_at").map_err(map_db_err)?,
        deleted_at: row.try_get("deleted_at").map_err(map_db_err)?,
    })
}

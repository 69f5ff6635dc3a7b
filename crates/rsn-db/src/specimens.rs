//! Specimen store.
//!
//! Kit ids are globally unique among live specimens. The partial unique
//! index `uq_specimen_kit_active` is the authoritative guard; [`kit_in_use`]
//! exists only to fail fast with a clean message before the insert races.
//! All writes here are workflow primitives running in the caller's
//! transaction.

use std::time::Instant;

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Row};
use uuid::Uuid;

use rsn_domain::{Actor, AuditOp, DomainError, DomainResult, Specimen, SpecimenStatus};

use crate::audit::{self, NewAuditRecord};
use crate::map_db_err;

/// Fast-fail duplicate check. Subject to races by design: the unique index
/// decides the winner when two inserts slip past this together.
pub async fn kit_in_use(conn: &mut PgConnection, kit_id: &str) -> DomainResult<bool> {
    let (in_use,): (bool,) = sqlx::query_as::<_, (bool,)>(
        "select exists (select 1 from specimens where kit_id = $1 and deleted_at is null)",
    )
    .bind(kit_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(map_db_err)?;
    Ok(in_use)
}

/// The live specimen for a service request, locked for the caller's
/// transaction. At most one exists per service request.
pub async fn active_specimen_for_update(
    conn: &mut PgConnection,
    service_request_id: Uuid,
) -> DomainResult<Option<Specimen>> {
    let row = sqlx::query(
        r#"
        select specimen_id, service_request_id, kit_id, status, result_key,
               completed_at, created_at, deleted_at
        from specimens
        where service_request_id = $1 and deleted_at is null
        for update
        "#,
    )
    .bind(service_request_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_err)?;

    row.as_ref().map(row_to_specimen).transpose()
}

/// Look a live specimen up by kit id (result ingestion path), locked.
pub async fn fetch_by_kit_for_update(
    conn: &mut PgConnection,
    kit_id: &str,
) -> DomainResult<Specimen> {
    let row = sqlx::query(
        r#"
        select specimen_id, service_request_id, kit_id, status, result_key,
               completed_at, created_at, deleted_at
        from specimens
        where kit_id = $1 and deleted_at is null
        for update
        "#,
    )
    .bind(kit_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_err)?
    .ok_or_else(|| DomainError::not_found("specimen", kit_id))?;

    row_to_specimen(&row)
}

/// All live specimens under an order, locked. Finalize flips these to
/// ASSIGNED as one unit.
pub async fn specimens_under_order_for_update(
    conn: &mut PgConnection,
    order_id: Uuid,
) -> DomainResult<Vec<Specimen>> {
    let rows = sqlx::query(
        r#"
        select sp.specimen_id, sp.service_request_id, sp.kit_id, sp.status,
               sp.result_key, sp.completed_at, sp.created_at, sp.deleted_at
        from specimens sp
        join service_requests sr on sr.service_request_id = sp.service_request_id
        where sr.order_id = $1 and sp.deleted_at is null
        order by sp.created_at
        for update of sp
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_db_err)?;

    rows.iter().map(row_to_specimen).collect()
}

pub async fn insert_specimen(
    conn: &mut PgConnection,
    actor: &Actor,
    service_request_id: Uuid,
    kit_id: &str,
) -> DomainResult<Specimen> {
    if kit_id.trim().is_empty() {
        return Err(DomainError::validation("kit_id", "kit id is required"));
    }

    let started = Instant::now();
    let specimen = Specimen {
        specimen_id: Uuid::new_v4(),
        service_request_id,
        kit_id: kit_id.to_string(),
        status: SpecimenStatus::Draft,
        result_key: None,
        completed_at: None,
        created_at: Utc::now(),
        deleted_at: None,
    };

    sqlx::query(
        r#"
        insert into specimens (
          specimen_id, service_request_id, kit_id, status, created_at
        ) values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(specimen.specimen_id)
    .bind(specimen.service_request_id)
    .bind(&specimen.kit_id)
    .bind(specimen.status.as_str())
    .bind(specimen.created_at)
    .execute(&mut *conn)
    .await
    .map_err(map_db_err)?;

    audit::record_mutation(
        conn,
        NewAuditRecord {
            actor,
            op: AuditOp::Create,
            entity: "specimen",
            entity_id: specimen.specimen_id,
            pre: None,
            post: Some(audit::image(&specimen)?),
            started,
        },
    )
    .await?;

    Ok(specimen)
}

/// Kit reassignment soft-deletes the superseded specimen; the freed kit id
/// becomes reusable because the unique index only covers live rows.
pub async fn soft_delete_specimen(
    conn: &mut PgConnection,
    actor: &Actor,
    pre: &Specimen,
) -> DomainResult<()> {
    let started = Instant::now();

    sqlx::query("update specimens set deleted_at = now() where specimen_id = $1")
        .bind(pre.specimen_id)
        .execute(&mut *conn)
        .await
        .map_err(map_db_err)?;

    audit::record_mutation(
        conn,
        NewAuditRecord {
            actor,
            op: AuditOp::Delete,
            entity: "specimen",
            entity_id: pre.specimen_id,
            pre: Some(audit::image(pre)?),
            post: None,
            started,
        },
    )
    .await
}

pub async fn set_specimen_status(
    conn: &mut PgConnection,
    actor: &Actor,
    pre: &Specimen,
    status: SpecimenStatus,
) -> DomainResult<Specimen> {
    let started = Instant::now();

    sqlx::query("update specimens set status = $2 where specimen_id = $1")
        .bind(pre.specimen_id)
        .bind(status.as_str())
        .execute(&mut *conn)
        .await
        .map_err(map_db_err)?;

    let mut post = pre.clone();
    post.status = status;

    audit::record_mutation(
        conn,
        NewAuditRecord {
            actor,
            op: AuditOp::Update,
            entity: "specimen",
            entity_id: pre.specimen_id,
            pre: Some(audit::image(pre)?),
            post: Some(audit::image(&post)?),
            started,
        },
    )
    .await?;

    Ok(post)
}

/// Result ingestion write: status COMPLETED plus the result reference and
/// completion time from the lab.
pub async fn complete_specimen(
    conn: &mut PgConnection,
    actor: &Actor,
    pre: &Specimen,
    result_key: Option<&str>,
    completed_at: DateTime<Utc>,
) -> DomainResult<Specimen> {
    let started = Instant::now();

    sqlx::query(
        r#"
        update specimens
        set status = 'COMPLETED', result_key = $2, completed_at = $3
        where specimen_id = $1
        "#,
    )
    .bind(pre.specimen_id)
    .bind(result_key)
    .bind(completed_at)
    .execute(&mut *conn)
    .await
    .map_err(map_db_err)?;

    let mut post = pre.clone();
    post.status = SpecimenStatus::Completed;
    post.result_key = result_key.map(|s| s.to_string());
    post.completed_at = Some(completed_at);

    audit::record_mutation(
        conn,
        NewAuditRecord {
            actor,
            op: AuditOp::Update,
            entity: "specimen",
            entity_id: pre.specimen_id,
            pre: Some(audit::image(pre)?),
            post: Some(audit::image(&post)?),
            started,
        },
    )
    .await?;

    Ok(post)
}

fn row_to_specimen(row: &sqlx::postgres::PgRow) -> DomainResult<Specimen> {
    Ok(Specimen {
        specimen_id: row.try_get("specimen_id").map_err(map_db_err)?,
        service_request_id: row.try_get("service_request_id").map_err(map_db_err)?,
        kit_id: row.try_get("kit_id").map_err(map_db_err)?,
        status: SpecimenStatus::parse(&row.try_get::<String, _>("status").map_err(map_db_err)?)?,
        result_key: row.try_get("result_key").map_err(map_db_err)?,
        completed_at: row.try_get("completed_at").map_err(map_db_err)?,
        created_at: row.try_get("created_at").map_err(map_db_err)?,
        deleted_at: row.try_get("deleted_at").map_err(map_db_err)?,
    })
}

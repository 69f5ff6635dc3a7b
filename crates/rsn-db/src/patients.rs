//! Patient store. Patients are scoped to one organization; lookups take the
//! caller's organization so rows from other tenants surface as not-found,
//! never as someone else's data.

use std::time::Instant;

use chrono::{NaiveDate, Utc};
use sqlx::{Acquire, PgConnection, Row};
use uuid::Uuid;

use rsn_domain::{Actor, AuditOp, DomainError, DomainResult, NewPatient, Patient};

use crate::audit::{self, NewAuditRecord};
use crate::map_db_err;

pub async fn create_patient(
    conn: &mut PgConnection,
    actor: &Actor,
    input: NewPatient,
) -> DomainResult<Patient> {
    if input.first_name.trim().is_empty() || input.last_name.trim().is_empty() {
        return Err(DomainError::validation("name", "patient name is required"));
    }

    let started = Instant::now();
    let patient = Patient {
        patient_id: Uuid::new_v4(),
        organization_id: input.organization_id,
        first_name: input.first_name,
        last_name: input.last_name,
        date_of_birth: input.date_of_birth,
        created_at: Utc::now(),
        deleted_at: None,
    };

    let mut tx = conn.begin().await.map_err(map_db_err)?;

    sqlx::query(
        r#"
        insert into patients (
          patient_id, organization_id, first_name, last_name, date_of_birth, created_at
        ) values ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(patient.patient_id)
    .bind(patient.organization_id)
    .bind(&patient.first_name)
    .bind(&patient.last_name)
    .bind(patient.date_of_birth)
    .bind(patient.created_at)
    .execute(&mut *tx)
    .await
    .map_err(map_db_err)?;

    audit::record_mutation(
        &mut tx,
        NewAuditRecord {
            actor,
            op: AuditOp::Create,
            entity: "patient",
            entity_id: patient.patient_id,
            pre: None,
            post: Some(audit::image(&patient)?),
            started,
        },
    )
    .await?;

    tx.commit().await.map_err(map_db_err)?;
    Ok(patient)
}

/// Live patients in the given organization only.
pub async fn fetch_patient_in_org(
    conn: &mut PgConnection,
    organization_id: Uuid,
    patient_id: Uuid,
) -> DomainResult<Patient> {
    let row = sqlx::query(
        r#"
        select patient_id, organization_id, first_name, last_name,
               date_of_birth, created_at, deleted_at
        from patients
        where patient_id = $1 and organization_id = $2 and deleted_at is null
        "#,
    )
    .bind(patient_id)
    .bind(organization_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_err)?
    .ok_or_else(|| DomainError::not_found("patient", patient_id))?;

    row_to_patient(&row)
}

pub async fn update_patient(
    conn: &mut PgConnection,
    actor: &Actor,
    organization_id: Uuid,
    patient_id: Uuid,
    first_name: String,
    last_name: String,
    date_of_birth: Option<NaiveDate>,
) -> DomainResult<Patient> {
    if first_name.trim().is_empty() || last_name.trim().is_empty() {
        return Err(DomainError::validation("name", "patient name is required"));
    }

    let started = Instant::now();
    let mut tx = conn.begin().await.map_err(map_db_err)?;

    let row = sqlx::query(
        r#"
        select patient_id, organization_id, first_name, last_name,
               date_of_birth, created_at, deleted_at
        from patients
        where patient_id = $1 and organization_id = $2 and deleted_at is null
        for update
        "#,
    )
    .bind(patient_id)
    .bind(organization_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(map_db_err)?
    .ok_or_else(|| DomainError::not_found("patient", patient_id))?;
    let pre = row_to_patient(&row)?;

    sqlx::query(
        r#"
        update patients
        set first_name = $2, last_name = $3, date_of_birth = $4
        where patient_id = $1
        "#,
    )
    .bind(patient_id)
    .bind(&first_name)
    .bind(&last_name)
    .bind(date_of_birth)
    .execute(&mut *tx)
    .await
    .map_err(map_db_err)?;

    let mut post = pre.clone();
    post.first_name = first_name;
    post.last_name = last_name;
    post.date_of_birth = date_of_birth;

    audit::record_mutation(
        &mut tx,
        NewAuditRecord {
            actor,
            op: AuditOp::Update,
            entity: "patient",
            entity_id: patient_id,
            pre: Some(audit::image(&pre)?),
            post: Some(audit::image(&post)?),
            started,
        },
    )
    .await?;

    tx.commit().await.map_err(map_db_err)?;
    Ok(post)
}

pub async fn soft_delete_patient(
    conn: &mut PgConnection,
    actor: &Actor,
    organization_id: Uuid,
    patient_id: Uuid,
) -> DomainResult<()> {
    let started = Instant::now();
    let mut tx = conn.begin().await.map_err(map_db_err)?;

    let row = sqlx::query(
        r#"
        select patient_id, organization_id, first_name, last_name,
               date_of_birth, created_at, deleted_at
        from patients
        where patient_id = $1 and organization_id = $2 and deleted_at is null
        for update
        "#,
    )
    .bind(patient_id)
    .bind(organization_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(map_db_err)?
    .ok_or_else(|| DomainError::not_found("patient", patient_id))?;
    let pre = row_to_patient(&row)?;

    sqlx::query("update patients set deleted_at = now() where patient_id = $1")
        .bind(patient_id)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

    audit::record_mutation(
        &mut tx,
        NewAuditRecord {
            actor,
            op: AuditOp::Delete,
            entity: "patient",
            entity_id: pre.patient_id,
            pre: Some(audit::image(&pre)?),
            post: None,
            started,
        },
    )
    .await?;

    tx.commit().await.map_err(map_db_err)?;
    Ok(())
}

fn row_to_patient(row: &sqlx::postgres::PgRow) -> DomainResult<Patient> {
    Ok(Patient {
        patient_id: row.try_get("patient_id").map_err(map_db_err)?,
        organization_id: row.try_get("organization_id").map_err(map_db_err)?,
        first_name: row.try_get("first_name").map_err(map_db_err)?,
        last_name: row.try_get("last_name").map_err(map_db_err)?,
        date_of_birth: row.try_get("date_of_birth").map_err(map_db_err)?,
        created_at: row.try_get("created_at").map_err(map_db_err)?,
        deleted_at: row.try_get("deleted_at").map_err(map_db_err)?,
    })
}

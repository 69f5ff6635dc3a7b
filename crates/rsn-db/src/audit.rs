//! Audit interception layer.
//!
//! Every create/update/delete in this crate calls [`record_mutation`] inside
//! the same transaction as the entity write, so the audit row and the
//! mutation commit or roll back together. Updates serialize the row read
//! *before* the write as the pre-image; the extra read is the accepted cost
//! of the trail. Writes to `audit_log` itself never pass through here.

use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

use rsn_domain::{Actor, AuditOp, AuditRecord, DomainError, DomainResult};

use crate::map_db_err;

/// One pending audit row. `started` is taken when the store function begins
/// so `duration_ms` covers the pre-image read and the write.
pub struct NewAuditRecord<'a> {
    pub actor: &'a Actor,
    pub op: AuditOp,
    pub entity: &'static str,
    pub entity_id: Uuid,
    pub pre: Option<Value>,
    pub post: Option<Value>,
    pub started: Instant,
}

/// Serialize an entity as an audit image.
pub fn image<T: Serialize>(entity: &T) -> DomainResult<Value> {
    serde_json::to_value(entity).map_err(|e| DomainError::Database(format!("serialize audit image: {e}")))
}

/// Append one audit row. Must run on the same connection (and therefore the
/// same transaction) as the entity write it describes.
pub async fn record_mutation(conn: &mut PgConnection, rec: NewAuditRecord<'_>) -> DomainResult<()> {
    let duration_ms = rec.started.elapsed().as_millis() as i64;

    sqlx::query(
        r#"
        insert into audit_log (
          audit_id, actor_employee_id, actor_label, op, entity, entity_id,
          pre, post, duration_ms
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9
        )
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(rec.actor.employee_id())
    .bind(rec.actor.label())
    .bind(rec.op.as_str())
    .bind(rec.entity)
    .bind(rec.entity_id)
    .bind(rec.pre)
    .bind(rec.post)
    .bind(duration_ms)
    .execute(&mut *conn)
    .await
    .map_err(map_db_err)?;

    Ok(())
}

/// All audit rows for one entity, oldest first.
pub async fn list_for_entity(
    conn: &mut PgConnection,
    entity: &str,
    entity_id: Uuid,
) -> DomainResult<Vec<AuditRecord>> {
    let rows = sqlx::query(
        r#"
        select audit_id, actor_employee_id, actor_label, op, entity, entity_id,
               pre, post, duration_ms, recorded_at
        from audit_log
        where entity = $1 and entity_id = $2
        order by seq
        "#,
    )
    .bind(entity)
    .bind(entity_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_db_err)?;

    rows.iter().map(row_to_record).collect()
}

/// The most recent audit rows, newest first. CLI tail.
pub async fn list_recent(conn: &mut PgConnection, limit: i64) -> DomainResult<Vec<AuditRecord>> {
    let rows = sqlx::query(
        r#"
        select audit_id, actor_employee_id, actor_label, op, entity, entity_id,
               pre, post, duration_ms, recorded_at
        from audit_log
        order by seq desc
        limit $1
        "#,
    )
    .bind(limit)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_db_err)?;

    rows.iter().map(row_to_record).collect()
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> DomainResult<AuditRecord> {
    Ok(AuditRecord {
        audit_id: row.try_get("audit_id").map_err(map_db_err)?,
        actor_employee_id: row.try_get("actor_employee_id").map_err(map_db_err)?,
        actor_label: row.try_get("actor_label").map_err(map_db_err)?,
        op: AuditOp::parse(&row.try_get::<String, _>("op").map_err(map_db_err)?)?,
        entity: row.try_get("entity").map_err(map_db_err)?,
        entity_id: row.try_get("entity_id").map_err(map_db_err)?,
        pre: row.try_get("pre").map_err(map_db_err)?,
        post: row.try_get("post").map_err(map_db_err)?,
        duration_ms: row.try_get("duration_ms").map_err(map_db_err)?,
        recorded_at: row.try_get("recorded_at").map_err(map_db_err)?,
    })
}

//! Organization and address stores.

use std::time::Instant;

use chrono::Utc;
use sqlx::{Acquire, PgConnection, Row};
use uuid::Uuid;

use rsn_domain::{
    Actor, AddressKind, AuditOp, DomainError, DomainResult, NewAddress, Organization,
    OrganizationAddress,
};

use crate::audit::{self, NewAuditRecord};
use crate::map_db_err;

pub async fn create_organization(
    conn: &mut PgConnection,
    actor: &Actor,
    name: &str,
    billing_emails: &[String],
) -> DomainResult<Organization> {
    if name.trim().is_empty() {
        return Err(DomainError::validation("name", "organization name is required"));
    }

    let started = Instant::now();
    let org = Organization {
        organization_id: Uuid::new_v4(),
        name: name.to_string(),
        billing_emails: billing_emails.to_vec(),
        created_at: Utc::now(),
    };

    let mut tx = conn.begin().await.map_err(map_db_err)?;

    sqlx::query(
        r#"
        insert into organizations (organization_id, name, billing_emails, created_at)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(org.organization_id)
    .bind(&org.name)
    .bind(&org.billing_emails)
    .bind(org.created_at)
    .execute(&mut *tx)
    .await
    .map_err(map_db_err)?;

    audit::record_mutation(
        &mut tx,
        NewAuditRecord {
            actor,
            op: AuditOp::Create,
            entity: "organization",
            entity_id: org.organization_id,
            pre: None,
            post: Some(audit::image(&org)?),
            started,
        },
    )
    .await?;

    tx.commit().await.map_err(map_db_err)?;
    Ok(org)
}

pub async fn fetch_organization(
    conn: &mut PgConnection,
    organization_id: Uuid,
) -> DomainResult<Organization> {
    let row = sqlx::query(
        r#"
        select organization_id, name, billing_emails, created_at
        from organizations
        where organization_id = $1
        "#,
    )
    .bind(organization_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_err)?
    .ok_or_else(|| DomainError::not_found("organization", organization_id))?;

    Ok(Organization {
        organization_id: row.try_get("organization_id").map_err(map_db_err)?,
        name: row.try_get("name").map_err(map_db_err)?,
        billing_emails: row.try_get("billing_emails").map_err(map_db_err)?,
        created_at: row.try_get("created_at").map_err(map_db_err)?,
    })
}

/// Add an address. When the new address is the default, the previous live
/// default of the same kind is demoted in the same transaction so the
/// one-default-per-kind index never trips on well-formed input.
pub async fn add_address(
    conn: &mut PgConnection,
    actor: &Actor,
    input: NewAddress,
) -> DomainResult<OrganizationAddress> {
    if input.line1.trim().is_empty() {
        return Err(DomainError::validation("line1", "address line is required"));
    }

    let started = Instant::now();
    let mut tx = conn.begin().await.map_err(map_db_err)?;

    if input.is_default {
        demote_current_default(&mut tx, actor, input.organization_id, input.kind).await?;
    }

    let address = OrganizationAddress {
        address_id: Uuid::new_v4(),
        organization_id: input.organization_id,
        kind: input.kind,
        line1: input.line1,
        line2: input.line2,
        city: input.city,
        state: input.state,
        postal_code: input.postal_code,
        is_default: input.is_default,
        created_at: Utc::now(),
        deleted_at: None,
    };

    sqlx::query(
        r#"
        insert into organization_addresses (
          address_id, organization_id, kind, line1, line2, city, state,
          postal_code, is_default, created_at
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(address.address_id)
    .bind(address.organization_id)
    .bind(address.kind.as_str())
    .bind(&address.line1)
    .bind(&address.line2)
    .bind(&address.city)
    .bind(&address.state)
    .bind(&address.postal_code)
    .bind(address.is_default)
    .bind(address.created_at)
    .execute(&mut *tx)
    .await
    .map_err(map_db_err)?;

    audit::record_mutation(
        &mut tx,
        NewAuditRecord {
            actor,
            op: AuditOp::Create,
            entity: "organization_address",
            entity_id: address.address_id,
            pre: None,
            post: Some(audit::image(&address)?),
            started,
        },
    )
    .await?;

    tx.commit().await.map_err(map_db_err)?;
    Ok(address)
}

async fn demote_current_default(
    conn: &mut PgConnection,
    actor: &Actor,
    organization_id: Uuid,
    kind: AddressKind,
) -> DomainResult<()> {
    let started = Instant::now();

    let current = sqlx::query(
        r#"
        select address_id, organization_id, kind, line1, line2, city, state,
               postal_code, is_default, created_at, deleted_at
        from organization_addresses
        where organization_id = $1
          and kind = $2
          and is_default
          and deleted_at is null
        for update
        "#,
    )
    .bind(organization_id)
    .bind(kind.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_err)?;

    let Some(row) = current else {
        return Ok(());
    };
    let pre = row_to_address(&row)?;

    sqlx::query("update organization_addresses set is_default = false where address_id = $1")
        .bind(pre.address_id)
        .execute(&mut *conn)
        .await
        .map_err(map_db_err)?;

    let mut post = pre.clone();
    post.is_default = false;

    audit::record_mutation(
        conn,
        NewAuditRecord {
            actor,
            op: AuditOp::Update,
            entity: "organization_address",
            entity_id: pre.address_id,
            pre: Some(audit::image(&pre)?),
            post: Some(audit::image(&post)?),
            started,
        },
    )
    .await
}

pub async fn list_addresses(
    conn: &mut PgConnection,
    organization_id: Uuid,
) -> DomainResult<Vec<OrganizationAddress>> {
    let rows = sqlx::query(
        r#"
        select address_id, organization_id, kind, line1, line2, city, state,
               postal_code, is_default, created_at, deleted_at
        from organization_addresses
        where organization_id = $1 and deleted_at is null
        order by created_at
        "#,
    )
    .bind(organization_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_db_err)?;

    rows.iter().map(row_to_address).collect()
}

/// Soft-delete an address. History is append-only; the row stays behind
/// with `deleted_at` set.
pub async fn remove_address(
    conn: &mut PgConnection,
    actor: &Actor,
    address_id: Uuid,
) -> DomainResult<()> {
    let started = Instant::now();
    let mut tx = conn.begin().await.map_err(map_db_err)?;

    let row = sqlx::query(
        r#"
        select address_id, organization_id, kind, line1, line2, city, state,
               postal_code, is_default, created_at, deleted_at
        from organization_addresses
        where address_id = $1 and deleted_at is null
        for update
        "#,
    )
    .bind(address_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(map_db_err)?
    .ok_or_else(|| DomainError::not_found("organization_address", address_id))?;
    let pre = row_to_address(&row)?;

    sqlx::query("update organization_addresses set deleted_at = now() where address_id = $1")
        .bind(address_id)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

    audit::record_mutation(
        &mut tx,
        NewAuditRecord {
            actor,
            op: AuditOp::Delete,
            entity: "organization_address",
            entity_id: address_id,
            pre: Some(audit::image(&pre)?),
            post: None,
            started,
        },
    )
    .await?;

    tx.commit().await.map_err(map_db_err)?;
    Ok(())
}

fn row_to_address(row: &sqlx::postgres::PgRow) -> DomainResult<OrganizationAddress> {
    Ok(OrganizationAddress {
        address_id: row.try_get("address_id").map_err(map_db_err)?,
        organization_id: row.try_get("organization_id").map_err(map_db_err)?,
        kind: AddressKind::parse(&row.try_get::<String, _>("kind").map_err(map_db_err)?)?,
        line1: row.try_get("line1").map_err(map_db_err)?,
        line2: row.try_get("line2").map_err(map_db_err)?,
        city: row.try_get("city").map_err(map_db_err)?,
        state: row.try_get("state").map_err(map_db_err)?,
        postal_code: row.try_get("postal_code").map_err(map_db_err)?,
        is_default: row.try_get("is_default").map_err(map_db_err)?,
        created_at: row.try_get("created_at").map_err(map_db_err)?,
        deleted_at: row.try_get("deleted_at").map_err(map_db_err)?,
    })
}

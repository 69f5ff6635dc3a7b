//! Order, service-request, service-type, and adjustment stores.
//!
//! Functions suffixed `_row` (and the `set_*` assignment writes) are
//! workflow primitives: they assume the caller already holds the relevant
//! row locks inside its own transaction (via [`load_sr_context`] /
//! [`fetch_order_for_update`]) and they do not open one of their own. The
//! `create_*` entry points are self-contained and transactional.

use std::time::Instant;

use chrono::{DateTime, Utc};
use sqlx::{Acquire, PgConnection, Row};
use uuid::Uuid;

use rsn_domain::{
    Actor, AdjustmentKind, AuditOp, DomainError, DomainResult, NewServiceRequest, Order,
    OrderStatus, PriceAdjustment, ReqFormStatus, ServiceRequest, ServiceType, Specimen,
    SrSnapshot,
};

use crate::audit::{self, NewAuditRecord};
use crate::map_db_err;
use crate::specimens;

// ---------------------------------------------------------------------------
// Service types
// ---------------------------------------------------------------------------

pub async fn create_service_type(
    conn: &mut PgConnection,
    actor: &Actor,
    name: &str,
    price_cents: i64,
) -> DomainResult<ServiceType> {
    if name.trim().is_empty() {
        return Err(DomainError::validation("name", "service type name is required"));
    }
    if price_cents <= 0 {
        return Err(DomainError::validation(
            "price_cents",
            format!("service type price must be positive, got {price_cents}"),
        ));
    }

    let started = Instant::now();
    let service_type = ServiceType {
        service_type_id: Uuid::new_v4(),
        name: name.to_string(),
        price_cents,
    };

    let mut tx = conn.begin().await.map_err(map_db_err)?;

    sqlx::query(
        "insert into service_types (service_type_id, name, price_cents) values ($1, $2, $3)",
    )
    .bind(service_type.service_type_id)
    .bind(&service_type.name)
    .bind(service_type.price_cents)
    .execute(&mut *tx)
    .await
    .map_err(map_db_err)?;

    audit::record_mutation(
        &mut tx,
        NewAuditRecord {
            actor,
            op: AuditOp::Create,
            entity: "service_type",
            entity_id: service_type.service_type_id,
            pre: None,
            post: Some(audit::image(&service_type)?),
            started,
        },
    )
    .await?;

    tx.commit().await.map_err(map_db_err)?;
    Ok(service_type)
}

pub async fn fetch_service_type(
    conn: &mut PgConnection,
    service_type_id: Uuid,
) -> DomainResult<ServiceType> {
    let row = sqlx::query(
        "select service_type_id, name, price_cents from service_types where service_type_id = $1",
    )
    .bind(service_type_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_err)?
    .ok_or_else(|| DomainError::not_found("service_type", service_type_id))?;

    Ok(ServiceType {
        service_type_id: row.try_get("service_type_id").map_err(map_db_err)?,
        name: row.try_get("name").map_err(map_db_err)?,
        price_cents: row.try_get("price_cents").map_err(map_db_err)?,
    })
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Human-readable order code: date prefix plus a short random suffix.
/// Collisions land on `uq_order_code`, not on a retry loop here.
fn generate_order_code(now: DateTime<Utc>) -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("RSN-{}-{}", now.format("%Y%m%d"), raw[..6].to_uppercase())
}

pub async fn create_order(
    conn: &mut PgConnection,
    actor: &Actor,
    organization_id: Uuid,
) -> DomainResult<Order> {
    let started = Instant::now();
    let now = Utc::now();
    let order = Order {
        order_id: Uuid::new_v4(),
        organization_id,
        order_code: generate_order_code(now),
        status: OrderStatus::Draft,
        req_form_status: ReqFormStatus::NotUploaded,
        req_form_key: None,
        submitted_to_lab: false,
        lab_order_id: None,
        price_cents: None,
        total_cents: None,
        created_at: now,
    };

    let mut tx = conn.begin().await.map_err(map_db_err)?;

    sqlx::query(
        r#"
        insert into orders (
          order_id, organization_id, order_code, status, req_form_status,
          submitted_to_lab, created_at
        ) values ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(order.order_id)
    .bind(order.organization_id)
    .bind(&order.order_code)
    .bind(order.status.as_str())
    .bind(order.req_form_status.as_str())
    .bind(order.submitted_to_lab)
    .bind(order.created_at)
    .execute(&mut *tx)
    .await
    .map_err(map_db_err)?;

    audit::record_mutation(
        &mut tx,
        NewAuditRecord {
            actor,
            op: AuditOp::Create,
            entity: "order",
            entity_id: order.order_id,
            pre: None,
            post: Some(audit::image(&order)?),
            started,
        },
    )
    .await?;

    tx.commit().await.map_err(map_db_err)?;
    Ok(order)
}

pub async fn fetch_order(conn: &mut PgConnection, order_id: Uuid) -> DomainResult<Order> {
    let row = sqlx::query(
        r#"
        select order_id, organization_id, order_code, status, req_form_status,
               req_form_key, submitted_to_lab, lab_order_id, price_cents,
               total_cents, created_at
        from orders
        where order_id = $1
        "#,
    )
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_err)?
    .ok_or_else(|| DomainError::not_found("order", order_id))?;
    row_to_order(&row)
}

/// Lock the order row for the remainder of the caller's transaction. The
/// pre-image every subsequent order write serializes comes from this read.
pub async fn fetch_order_for_update(
    conn: &mut PgConnection,
    order_id: Uuid,
) -> DomainResult<Order> {
    let row = sqlx::query(
        r#"
        select order_id, organization_id, order_code, status, req_form_status,
               req_form_key, submitted_to_lab, lab_order_id, price_cents,
               total_cents, created_at
        from orders
        where order_id = $1
        for update
        "#,
    )
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_err)?
    .ok_or_else(|| DomainError::not_found("order", order_id))?;
    row_to_order(&row)
}

// ---------------------------------------------------------------------------
// Service requests
// ---------------------------------------------------------------------------

/// Create a service request under an order. The first service request also
/// moves a DRAFT order to ORDERED.
pub async fn add_service_request(
    conn: &mut PgConnection,
    actor: &Actor,
    input: NewServiceRequest,
) -> DomainResult<ServiceRequest> {
    let started = Instant::now();
    let mut tx = conn.begin().await.map_err(map_db_err)?;

    let order = fetch_order_for_update(&mut tx, input.order_id).await?;
    if matches!(order.status, OrderStatus::Canceled | OrderStatus::Assigned) {
        return Err(DomainError::conflict(format!(
            "order {} is {}, no service request can be added",
            order.order_id,
            order.status.as_str()
        )));
    }
    fetch_service_type(&mut tx, input.service_type_id).await?;

    let sr = ServiceRequest {
        service_request_id: Uuid::new_v4(),
        order_id: input.order_id,
        service_type_id: input.service_type_id,
        patient_id: None,
        practitioner_id: None,
        questionnaire: input.questionnaire,
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"
        insert into service_requests (
          service_request_id, order_id, service_type_id, questionnaire, created_at
        ) values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(sr.service_request_id)
    .bind(sr.order_id)
    .bind(sr.service_type_id)
    .bind(&sr.questionnaire)
    .bind(sr.created_at)
    .execute(&mut *tx)
    .await
    .map_err(map_db_err)?;

    audit::record_mutation(
        &mut tx,
        NewAuditRecord {
            actor,
            op: AuditOp::Create,
            entity: "service_request",
            entity_id: sr.service_request_id,
            pre: None,
            post: Some(audit::image(&sr)?),
            started,
        },
    )
    .await?;

    if order.status == OrderStatus::Draft {
        set_order_status(&mut tx, actor, &order, OrderStatus::Ordered).await?;
    }

    tx.commit().await.map_err(map_db_err)?;
    Ok(sr)
}

pub async fn fetch_service_request(
    conn: &mut PgConnection,
    service_request_id: Uuid,
) -> DomainResult<ServiceRequest> {
    let row = sqlx::query(
        r#"
        select service_request_id, order_id, service_type_id, patient_id,
               practitioner_id, questionnaire, created_at
        from service_requests
        where service_request_id = $1
        "#,
    )
    .bind(service_request_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_err)?
    .ok_or_else(|| DomainError::not_found("service_request", service_request_id))?;

    row_to_service_request(&row)
}

/// Everything a transition needs, loaded under row locks: the service
/// request, its owning order, and the live specimen if one exists. The
/// locked reads are what give each transition read-after-write visibility
/// of the last committed transition on the same entity.
#[derive(Debug, Clone)]
pub struct SrContext {
    pub sr: ServiceRequest,
    pub order: Order,
    pub specimen: Option<Specimen>,
}

impl SrContext {
    pub fn snapshot(&self) -> SrSnapshot {
        SrSnapshot {
            order_status: self.order.status,
            req_form_status: self.order.req_form_status,
            submitted_to_lab: self.order.submitted_to_lab,
            specimen_status: self.specimen.as_ref().map(|s| s.status),
            has_patient: self.sr.patient_id.is_some(),
            has_practitioner: self.sr.practitioner_id.is_some(),
        }
    }
}

pub async fn load_sr_context(
    conn: &mut PgConnection,
    service_request_id: Uuid,
) -> DomainResult<SrContext> {
    let row = sqlx::query(
        r#"
        select service_request_id, order_id, service_type_id, patient_id,
               practitioner_id, questionnaire, created_at
        from service_requests
        where service_request_id = $1
        for update
        "#,
    )
    .bind(service_request_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_db_err)?
    .ok_or_else(|| DomainError::not_found("service_request", service_request_id))?;
    let sr = row_to_service_request(&row)?;

    let order = fetch_order_for_update(conn, sr.order_id).await?;
    let specimen = specimens::active_specimen_for_update(conn, sr.service_request_id).await?;

    Ok(SrContext { sr, order, specimen })
}

/// Assignment write; caller holds the locks from [`load_sr_context`].
pub async fn set_patient(
    conn: &mut PgConnection,
    actor: &Actor,
    pre: &ServiceRequest,
    patient_id: Uuid,
) -> DomainResult<ServiceRequest> {
    let started = Instant::now();

    sqlx::query("update service_requests set patient_id = $2 where service_request_id = $1")
        .bind(pre.service_request_id)
        .bind(patient_id)
        .execute(&mut *conn)
        .await
        .map_err(map_db_err)?;

    let mut post = pre.clone();
    post.patient_id = Some(patient_id);

    audit::record_mutation(
        conn,
        NewAuditRecord {
            actor,
            op: AuditOp::Update,
            entity: "service_request",
            entity_id: pre.service_request_id,
            pre: Some(audit::image(pre)?),
            post: Some(audit::image(&post)?),
            started,
        },
    )
    .await?;

    Ok(post)
}

/// Assignment write; caller holds the locks from [`load_sr_context`].
pub async fn set_practitioner(
    conn: &mut PgConnection,
    actor: &Actor,
    pre: &ServiceRequest,
    practitioner_id: Uuid,
) -> DomainResult<ServiceRequest> {
    let started = Instant::now();

    sqlx::query("update service_requests set practitioner_id = $2 where service_request_id = $1")
        .bind(pre.service_request_id)
        .bind(practitioner_id)
        .execute(&mut *conn)
        .await
        .map_err(map_db_err)?;

    let mut post = pre.clone();
    post.practitioner_id = Some(practitioner_id);

    audit::record_mutation(
        conn,
        NewAuditRecord {
            actor,
            op: AuditOp::Update,
            entity: "service_request",
            entity_id: pre.service_request_id,
            pre: Some(audit::image(pre)?),
            post: Some(audit::image(&post)?),
            started,
        },
    )
    .await?;

    Ok(post)
}

// ---------------------------------------------------------------------------
// Price adjustments
// ---------------------------------------------------------------------------

pub async fn add_adjustment(
    conn: &mut PgConnection,
    actor: &Actor,
    order_id: Uuid,
    amount_cents: i64,
    kind: AdjustmentKind,
) -> DomainResult<PriceAdjustment> {
    let started = Instant::now();
    let mut tx = conn.begin().await.map_err(map_db_err)?;

    let order = fetch_order_for_update(&mut tx, order_id).await?;
    if matches!(order.status, OrderStatus::Canceled | OrderStatus::Assigned) {
        return Err(DomainError::conflict(format!(
            "order {} is {}, adjustments are frozen",
            order.order_id,
            order.status.as_str()
        )));
    }

    let adjustment = PriceAdjustment {
        adjustment_id: Uuid::new_v4(),
        order_id,
        amount_cents,
        kind,
        created_at: Utc::now(),
    };

    sqlx::query(
        r#"
        insert into price_adjustments (adjustment_id, order_id, amount_cents, kind, created_at)
        values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(adjustment.adjustment_id)
    .bind(adjustment.order_id)
    .bind(adjustment.amount_cents)
    .bind(adjustment.kind.as_str())
    .bind(adjustment.created_at)
    .execute(&mut *tx)
    .await
    .map_err(map_db_err)?;

    audit::record_mutation(
        &mut tx,
        NewAuditRecord {
            actor,
            op: AuditOp::Create,
            entity: "price_adjustment",
            entity_id: adjustment.adjustment_id,
            pre: None,
            post: Some(audit::image(&adjustment)?),
            started,
        },
    )
    .await?;

    tx.commit().await.map_err(map_db_err)?;
    Ok(adjustment)
}

pub async fn list_adjustments(
    conn: &mut PgConnection,
    order_id: Uuid,
) -> DomainResult<Vec<PriceAdjustment>> {
    let rows = sqlx::query(
        r#"
        select adjustment_id, order_id, amount_cents, kind, created_at
        from price_adjustments
        where order_id = $1
        order by created_at
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(map_db_err)?;

    rows.iter()
        .map(|row| {
            Ok(PriceAdjustment {
                adjustment_id: row.try_get("adjustment_id").map_err(map_db_err)?,
                order_id: row.try_get("order_id").map_err(map_db_err)?,
                amount_cents: row.try_get("amount_cents").map_err(map_db_err)?,
                kind: AdjustmentKind::parse(
                    &row.try_get::<String, _>("kind").map_err(map_db_err)?,
                )?,
                created_at: row.try_get("created_at").map_err(map_db_err)?,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Order transition writes (workflow primitives)
// ---------------------------------------------------------------------------

async fn set_order_status(
    conn: &mut PgConnection,
    actor: &Actor,
    pre: &Order,
    status: OrderStatus,
) -> DomainResult<Order> {
    let started = Instant::now();

    sqlx::query("update orders set status = $2 where order_id = $1")
        .bind(pre.order_id)
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
            entity: "order",
            entity_id: pre.order_id,
            pre: Some(audit::image(pre)?),
            post: Some(audit::image(&post)?),
            started,
        },
    )
    .await?;

    Ok(post)
}

/// Finalization write: status, requisition approval state, and the computed
/// price land together. Caller owns the transaction and the specimen writes.
pub async fn finalize_order_row(
    conn: &mut PgConnection,
    actor: &Actor,
    pre: &Order,
    price_cents: i64,
    total_cents: i64,
) -> DomainResult<Order> {
    let started = Instant::now();

    sqlx::query(
        r#"
        update orders
        set status = 'ASSIGNED',
            req_form_status = 'PENDING_APPROVAL',
            price_cents = $2,
            total_cents = $3
        where order_id = $1
        "#,
    )
    .bind(pre.order_id)
    .bind(price_cents)
    .bind(total_cents)
    .execute(&mut *conn)
    .await
    .map_err(map_db_err)?;

    let mut post = pre.clone();
    post.status = OrderStatus::Assigned;
    post.req_form_status = ReqFormStatus::PendingApproval;
    post.price_cents = Some(price_cents);
    post.total_cents = Some(total_cents);

    audit::record_mutation(
        conn,
        NewAuditRecord {
            actor,
            op: AuditOp::Update,
            entity: "order",
            entity_id: pre.order_id,
            pre: Some(audit::image(pre)?),
            post: Some(audit::image(&post)?),
            started,
        },
    )
    .await?;

    Ok(post)
}

pub async fn mark_requisition_uploaded(
    conn: &mut PgConnection,
    actor: &Actor,
    pre: &Order,
    req_form_key: &str,
) -> DomainResult<Order> {
    let started = Instant::now();

    sqlx::query(
        "update orders set req_form_status = 'UPLOADED', req_form_key = $2 where order_id = $1",
    )
    .bind(pre.order_id)
    .bind(req_form_key)
    .execute(&mut *conn)
    .await
    .map_err(map_db_err)?;

    let mut post = pre.clone();
    post.req_form_status = ReqFormStatus::Uploaded;
    post.req_form_key = Some(req_form_key.to_string());

    audit::record_mutation(
        conn,
        NewAuditRecord {
            actor,
            op: AuditOp::Update,
            entity: "order",
            entity_id: pre.order_id,
            pre: Some(audit::image(pre)?),
            post: Some(audit::image(&post)?),
            started,
        },
    )
    .await?;

    Ok(post)
}

pub async fn cancel_order_row(
    conn: &mut PgConnection,
    actor: &Actor,
    pre: &Order,
) -> DomainResult<Order> {
    set_order_status(conn, actor, pre, OrderStatus::Canceled).await
}

/// Lab acceptance write: `lab_order_id` is set exactly once; the partial
/// unique index rejects a second acceptance of the same lab id.
pub async fn mark_submitted(
    conn: &mut PgConnection,
    actor: &Actor,
    pre: &Order,
    lab_order_id: &str,
) -> DomainResult<Order> {
    let started = Instant::now();

    sqlx::query(
        "update orders set submitted_to_lab = true, lab_order_id = $2 where order_id = $1",
    )
    .bind(pre.order_id)
    .bind(lab_order_id)
    .execute(&mut *conn)
    .await
    .map_err(map_db_err)?;

    let mut post = pre.clone();
    post.submitted_to_lab = true;
    post.lab_order_id = Some(lab_order_id.to_string());

    audit::record_mutation(
        conn,
        NewAuditRecord {
            actor,
            op: AuditOp::Update,
            entity: "order",
            entity_id: pre.order_id,
            pre: Some(audit::image(pre)?),
            post: Some(audit::image(&post)?),
            started,
        },
    )
    .await?;

    Ok(post)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_order(row: &sqlx::postgres::PgRow) -> DomainResult<Order> {
    Ok(Order {
        order_id: row.try_get("order_id").map_err(map_db_err)?,
        organization_id: row.try_get("organization_id").map_err(map_db_err)?,
        order_code: row.try_get("order_code").map_err(map_db_err)?,
        status: OrderStatus::parse(&row.try_get::<String, _>("status").map_err(map_db_err)?)?,
        req_form_status: ReqFormStatus::parse(
            &row.try_get::<String, _>("req_form_status").map_err(map_db_err)?,
        )?,
        req_form_key: row.try_get("req_form_key").map_err(map_db_err)?,
        submitted_to_lab: row.try_get("submitted_to_lab").map_err(map_db_err)?,
        lab_order_id: row.try_get("lab_order_id").map_err(map_db_err)?,
        price_cents: row.try_get("price_cents").map_err(map_db_err)?,
        total_cents: row.try_get("total_cents").map_err(map_db_err)?,
        created_at: row.try_get("created_at").map_err(map_db_err)?,
    })
}

fn row_to_service_request(row: &sqlx::postgres::PgRow) -> DomainResult<ServiceRequest> {
    Ok(ServiceRequest {
        service_request_id: row.try_get("service_request_id").map_err(map_db_err)?,
        order_id: row.try_get("order_id").map_err(map_db_err)?,
        service_type_id: row.try_get("service_type_id").map_err(map_db_err)?,
        patient_id: row.try_get("patient_id").map_err(map_db_err)?,
        practitioner_id: row.try_get("practitioner_id").map_err(map_db_err)?,
        questionnaire: row.try_get("questionnaire").map_err(map_db_err)?,
        created_at: row.try_get("created_at").map_err(map_db_err)?,
    })
}

//! Caller-driven transitions: kit/patient/practitioner assignment,
//! requisition upload, finalization, cancellation, adjustments.

use sqlx::PgConnection;
use tracing::warn;
use uuid::Uuid;

use rsn_db::{employees, gate, map_db_err, orders, orgs, patients, specimens};
use rsn_domain::{
    allowed, phase_of, ActorContext, AdjustmentKind, DomainError, DomainResult, Order,
    PriceAdjustment, ServiceRequest, Specimen, SpecimenStatus, Transition,
};
use rsn_pricing::Quote;

use crate::notify::Notification;
use crate::OrderWorkflow;

/// What `finalize` committed: the priced order and the specimens it moved
/// to ASSIGNED.
#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub order: Order,
    pub quote: Quote,
    pub specimens: Vec<Specimen>,
}

impl OrderWorkflow {
    /// Assign (or reassign) a collection kit to a service request.
    ///
    /// Reassignment is last-write-wins: the superseded specimen is
    /// soft-deleted and a fresh one created in the same transaction.
    /// Assigning the kit the request already holds is a no-op.
    pub async fn assign_kit(
        &self,
        ctx: &ActorContext,
        service_request_id: Uuid,
        kit_id: &str,
    ) -> DomainResult<Specimen> {
        let actor = ctx.actor();
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let sr_ctx = orders::load_sr_context(&mut tx, service_request_id).await?;
        check_access(ctx, &sr_ctx.order)?;
        ensure_unlocked(&mut tx, sr_ctx.order.organization_id).await?;
        check_phase(&sr_ctx, Transition::AssignKit)?;

        if let Some(current) = &sr_ctx.specimen {
            if current.kit_id == kit_id {
                tx.commit().await.map_err(map_db_err)?;
                return Ok(current.clone());
            }
        }

        // Fast-fail only; the partial unique index is what actually decides
        // a concurrent race on the same kit id.
        if specimens::kit_in_use(&mut tx, kit_id).await? {
            return Err(DomainError::conflict(format!(
                "kit {kit_id} is already assigned to a specimen"
            )));
        }

        if let Some(current) = &sr_ctx.specimen {
            specimens::soft_delete_specimen(&mut tx, &actor, current).await?;
        }
        let specimen =
            specimens::insert_specimen(&mut tx, &actor, service_request_id, kit_id).await?;

        tx.commit().await.map_err(map_db_err)?;
        Ok(specimen)
    }

    pub async fn assign_patient(
        &self,
        ctx: &ActorContext,
        service_request_id: Uuid,
        patient_id: Uuid,
    ) -> DomainResult<ServiceRequest> {
        let actor = ctx.actor();
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let sr_ctx = orders::load_sr_context(&mut tx, service_request_id).await?;
        check_access(ctx, &sr_ctx.order)?;
        ensure_unlocked(&mut tx, sr_ctx.order.organization_id).await?;
        check_phase(&sr_ctx, Transition::AssignPatient)?;

        patients::fetch_patient_in_org(&mut tx, sr_ctx.order.organization_id, patient_id).await?;

        let sr = orders::set_patient(&mut tx, &actor, &sr_ctx.sr, patient_id).await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(sr)
    }

    pub async fn assign_practitioner(
        &self,
        ctx: &ActorContext,
        service_request_id: Uuid,
        practitioner_id: Uuid,
    ) -> DomainResult<ServiceRequest> {
        let actor = ctx.actor();
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let sr_ctx = orders::load_sr_context(&mut tx, service_request_id).await?;
        check_access(ctx, &sr_ctx.order)?;
        ensure_unlocked(&mut tx, sr_ctx.order.organization_id).await?;
        check_phase(&sr_ctx, Transition::AssignPractitioner)?;

        employees::fetch_employee(&mut tx, practitioner_id).await?;
        if !employees::is_practitioner_in_org(
            &mut tx,
            practitioner_id,
            sr_ctx.order.organization_id,
        )
        .await?
        {
            return Err(DomainError::not_found("practitioner", practitioner_id));
        }

        let sr = orders::set_practitioner(&mut tx, &actor, &sr_ctx.sr, practitioner_id).await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(sr)
    }

    /// Record the blob-store key of the uploaded requisition form. The
    /// upload itself happened against the external blob store; only the
    /// opaque key is kept here.
    pub async fn upload_requisition(
        &self,
        ctx: &ActorContext,
        service_request_id: Uuid,
        req_form_key: &str,
    ) -> DomainResult<Order> {
        if req_form_key.trim().is_empty() {
            return Err(DomainError::validation("req_form_key", "blob key is required"));
        }

        let actor = ctx.actor();
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let sr_ctx = orders::load_sr_context(&mut tx, service_request_id).await?;
        check_access(ctx, &sr_ctx.order)?;
        check_phase(&sr_ctx, Transition::UploadRequisition)?;

        let order =
            orders::mark_requisition_uploaded(&mut tx, &actor, &sr_ctx.order, req_form_key)
                .await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(order)
    }

    /// Record a price adjustment on a draft order. The amount is signed by
    /// the caller and must agree with the declared kind.
    pub async fn add_price_adjustment(
        &self,
        ctx: &ActorContext,
        order_id: Uuid,
        amount_cents: i64,
        kind: AdjustmentKind,
    ) -> DomainResult<PriceAdjustment> {
        if !rsn_pricing::adjustment_sign_matches(kind, amount_cents) {
            return Err(DomainError::validation(
                "amount_cents",
                format!(
                    "{} amount must be {}, got {amount_cents}",
                    kind.as_str(),
                    match kind {
                        AdjustmentKind::Discount => "negative",
                        AdjustmentKind::Surcharge => "positive",
                    }
                ),
            ));
        }

        let actor = ctx.actor();
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let order = orders::fetch_order(&mut tx, order_id).await?;
        check_access(ctx, &order)?;

        let adjustment =
            orders::add_adjustment(&mut tx, &actor, order_id, amount_cents, kind).await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(adjustment)
    }

    /// Finalize: lock in pricing and mark the order ready for the lab.
    ///
    /// Atomically sets the order ASSIGNED with requisition PENDING_APPROVAL
    /// and the computed price, and moves every live specimen under the order
    /// to ASSIGNED. Either all of it commits or none of it does.
    pub async fn finalize(
        &self,
        ctx: &ActorContext,
        service_request_id: Uuid,
    ) -> DomainResult<FinalizeOutcome> {
        let actor = ctx.actor();
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let sr_ctx = orders::load_sr_context(&mut tx, service_request_id).await?;
        check_access(ctx, &sr_ctx.order)?;
        ensure_unlocked(&mut tx, sr_ctx.order.organization_id).await?;
        check_phase(&sr_ctx, Transition::Finalize)?;

        let service_type = orders::fetch_service_type(&mut tx, sr_ctx.sr.service_type_id).await?;
        let adjustments = orders::list_adjustments(&mut tx, sr_ctx.order.order_id).await?;
        let quote = rsn_pricing::price_order(service_type.price_cents, &adjustments)?;

        let order = orders::finalize_order_row(
            &mut tx,
            &actor,
            &sr_ctx.order,
            quote.subtotal_cents,
            quote.total_cents,
        )
        .await?;

        let mut assigned = Vec::new();
        for specimen in
            specimens::specimens_under_order_for_update(&mut tx, order.order_id).await?
        {
            assigned.push(
                specimens::set_specimen_status(&mut tx, &actor, &specimen, SpecimenStatus::Assigned)
                    .await?,
            );
        }

        tx.commit().await.map_err(map_db_err)?;

        self.notify_billing(&order, "order finalized").await;

        Ok(FinalizeOutcome {
            order,
            quote,
            specimens: assigned,
        })
    }

    /// Cancel the order owning this service request. Legal any time before
    /// lab submission; specimens are canceled with the order.
    pub async fn cancel(
        &self,
        ctx: &ActorContext,
        service_request_id: Uuid,
    ) -> DomainResult<Order> {
        let actor = ctx.actor();
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let sr_ctx = orders::load_sr_context(&mut tx, service_request_id).await?;
        check_access(ctx, &sr_ctx.order)?;
        check_phase(&sr_ctx, Transition::Cancel)?;

        let order = orders::cancel_order_row(&mut tx, &actor, &sr_ctx.order).await?;
        for specimen in
            specimens::specimens_under_order_for_update(&mut tx, order.order_id).await?
        {
            specimens::set_specimen_status(&mut tx, &actor, &specimen, SpecimenStatus::Canceled)
                .await?;
        }

        tx.commit().await.map_err(map_db_err)?;

        self.notify_billing(&order, "order canceled").await;

        Ok(order)
    }

    /// Send a billing notification for an order. Failures are logged and
    /// swallowed; a transition's outcome never depends on the sink.
    async fn notify_billing(&self, order: &Order, subject: &str) {
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(order = %order.order_code, error = %e, "skipping notification");
                return;
            }
        };
        let org = match orgs::fetch_organization(&mut conn, order.organization_id).await {
            Ok(org) => org,
            Err(e) => {
                warn!(order = %order.order_code, error = %e, "skipping notification");
                return;
            }
        };

        for recipient in &org.billing_emails {
            let notification = Notification {
                recipient: recipient.clone(),
                subject: format!("{subject}: {}", order.order_code),
                body: format!(
                    "Order {} is now {}.",
                    order.order_code,
                    order.status.as_str()
                ),
            };
            if let Err(e) = self.notifier.notify(&notification) {
                warn!(recipient = %recipient, error = %e, "notification failed");
            }
        }
    }
}

/// Role and tenancy guard. Orders outside the actor's organization are
/// reported as absent, not as forbidden.
fn check_access(ctx: &ActorContext, order: &Order) -> DomainResult<()> {
    if order.organization_id != ctx.organization_id {
        return Err(DomainError::not_found("order", order.order_id));
    }
    if !ctx.role.may_manage_orders() {
        return Err(DomainError::forbidden(format!(
            "role {} may not manage orders",
            ctx.role.as_str()
        )));
    }
    Ok(())
}

/// Credential gate: gated transitions are rejected while the organization
/// has no practitioner with a live, unexpired ACTIVE license.
async fn ensure_unlocked(conn: &mut PgConnection, organization_id: Uuid) -> DomainResult<()> {
    if gate::org_is_locked(conn, organization_id).await? {
        return Err(DomainError::forbidden(
            "organization has no practitioner with an active, unexpired license",
        ));
    }
    Ok(())
}

/// Legality check against the derived phase; illegal transitions surface as
/// conflicts.
fn check_phase(sr_ctx: &orders::SrContext, transition: Transition) -> DomainResult<()> {
    allowed(phase_of(&sr_ctx.snapshot()), transition)
        .map_err(|e| DomainError::conflict(e.to_string()))
}

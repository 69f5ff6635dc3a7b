//! Lab bridge ingestion.
//!
//! The bridge pushes batches keyed by external ids; items are independent
//! orders, so each one runs in its own transaction and a failing item is
//! recorded and skipped, never allowed to stall or abort the rest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use rsn_db::{map_db_err, orders, specimens};
use rsn_domain::{Actor, DomainError, DomainResult, OrderStatus, SpecimenStatus};

use crate::OrderWorkflow;

/// One accepted order from the submission exchange:
/// our order id ↔ the lab's order id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabSubmission {
    pub order_id: Uuid,
    pub lab_order_id: String,
}

/// One result tuple from the lab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabResultItem {
    pub kit_id: String,
    pub status: String,
    pub result_key: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Partial-success report for a bridge batch.
#[derive(Debug)]
pub struct BatchOutcome {
    pub applied: usize,
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug)]
pub struct BatchFailure {
    /// The item's external key (order id or kit id).
    pub key: String,
    pub error: DomainError,
}

impl BatchOutcome {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl OrderWorkflow {
    /// Record lab acceptance for a batch of finalized orders: set
    /// `submitted_to_lab` and the lab's order id, exactly once per order.
    pub async fn submit_to_lab(
        &self,
        actor: &Actor,
        batch: &[LabSubmission],
    ) -> DomainResult<BatchOutcome> {
        let mut applied = 0;
        let mut failures = Vec::new();

        for item in batch {
            match self.apply_submission(actor, item).await {
                Ok(()) => applied += 1,
                Err(error) => {
                    warn!(order_id = %item.order_id, error = %error, "lab submission item failed");
                    failures.push(BatchFailure {
                        key: item.order_id.to_string(),
                        error,
                    });
                }
            }
        }

        Ok(BatchOutcome { applied, failures })
    }

    async fn apply_submission(&self, actor: &Actor, item: &LabSubmission) -> DomainResult<()> {
        if item.lab_order_id.trim().is_empty() {
            return Err(DomainError::validation("lab_order_id", "lab order id is required"));
        }

        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let order = orders::fetch_order_for_update(&mut tx, item.order_id).await?;
        if order.status != OrderStatus::Assigned {
            return Err(DomainError::conflict(format!(
                "order {} is {}, only finalized orders can be submitted",
                order.order_id,
                order.status.as_str()
            )));
        }
        if order.submitted_to_lab || order.lab_order_id.is_some() {
            return Err(DomainError::conflict(format!(
                "order {} was already submitted to the lab",
                order.order_id
            )));
        }

        orders::mark_submitted(&mut tx, actor, &order, &item.lab_order_id).await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(())
    }

    /// Ingest a batch of lab results keyed by kit id: the matching specimen
    /// is completed with its result reference.
    pub async fn record_lab_results(
        &self,
        actor: &Actor,
        batch: &[LabResultItem],
    ) -> DomainResult<BatchOutcome> {
        let mut applied = 0;
        let mut failures = Vec::new();

        for item in batch {
            match self.apply_result(actor, item).await {
                Ok(()) => applied += 1,
                Err(error) => {
                    warn!(kit_id = %item.kit_id, error = %error, "lab result item failed");
                    failures.push(BatchFailure {
                        key: item.kit_id.clone(),
                        error,
                    });
                }
            }
        }

        Ok(BatchOutcome { applied, failures })
    }

    async fn apply_result(&self, actor: &Actor, item: &LabResultItem) -> DomainResult<()> {
        if item.status != "COMPLETED" {
            return Err(DomainError::validation(
                "status",
                format!("unsupported lab result status: {}", item.status),
            ));
        }

        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let specimen = specimens::fetch_by_kit_for_update(&mut tx, &item.kit_id).await?;
        if specimen.status == SpecimenStatus::Completed {
            return Err(DomainError::conflict(format!(
                "kit {} already has a recorded result",
                item.kit_id
            )));
        }
        let sr = orders::fetch_service_request(&mut tx, specimen.service_request_id).await?;
        let order = orders::fetch_order_for_update(&mut tx, sr.order_id).await?;

        if !order.submitted_to_lab {
            return Err(DomainError::conflict(format!(
                "order {} has not been submitted to the lab",
                order.order_id
            )));
        }
        if order.status == OrderStatus::Canceled {
            return Err(DomainError::conflict(format!(
                "order {} is canceled",
                order.order_id
            )));
        }

        specimens::complete_specimen(
            &mut tx,
            actor,
            &specimen,
            item.result_key.as_deref(),
            item.completed_at,
        )
        .await?;

        tx.commit().await.map_err(map_db_err)?;
        Ok(())
    }
}

//! Order fulfillment workflow.
//!
//! Each transition is one transaction: load the current state under row
//! locks, consult the credential gate where the transition is gated, apply
//! the writes through the audited stores, commit. A rejected precondition
//! rolls the whole transaction back; no partial state is ever observable
//! and nothing is retried here.

use std::sync::Arc;

use sqlx::PgPool;

mod lab;
mod notify;
mod transitions;

pub use lab::{BatchFailure, BatchOutcome, LabResultItem, LabSubmission};
pub use notify::{LogNotifier, Notification, Notifier};
pub use transitions::FinalizeOutcome;

/// The workflow controller. Holds the process's store handle and the
/// notification seam; construct once at startup and share.
#[derive(Clone)]
pub struct OrderWorkflow {
    pool: PgPool,
    notifier: Arc<dyn Notifier>,
}

impl OrderWorkflow {
    pub fn new(pool: PgPool, notifier: Arc<dyn Notifier>) -> Self {
        Self { pool, notifier }
    }

    /// Workflow with notifications going to the log only.
    pub fn with_log_notifier(pool: PgPool) -> Self {
        Self::new(pool, Arc::new(LogNotifier))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

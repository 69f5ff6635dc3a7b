//! Notification seam.
//!
//! Outbound delivery is an external collaborator. Calls are fire-and-forget
//! from the workflow's point of view: a failed send is logged at `warn` and
//! never surfaces to the caller of a transition.

use tracing::info;

use rsn_domain::DomainResult;

#[derive(Debug, Clone)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> DomainResult<()>;
}

/// Default sink: records the notification in the log and succeeds.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> DomainResult<()> {
        info!(
            recipient = %notification.recipient,
            subject = %notification.subject,
            "notification"
        );
        Ok(())
    }
}

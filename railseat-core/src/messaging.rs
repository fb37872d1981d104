use async_trait::async_trait;
use railseat_shared::AutoCancelRequested;

#[derive(Debug, thiserror::Error)]
#[error("Messaging failure: {0}")]
pub struct MessagingError(pub String);

/// At-least-once deferred messaging channel.
#[async_trait]
pub trait DelayedNotifier: Send + Sync {
    /// Schedule an "auto-cancel if unpaid" check for an order
    async fn schedule_auto_cancel(&self, event: &AutoCancelRequested) -> Result<(), MessagingError>;
}

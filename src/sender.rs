// src/sender.rs
use crate::error::Result;
use crate::notifier::NotificationFor;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Delivers a batch to its push endpoint.
#[async_trait::async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_notification(&self, notification: &NotificationFor) -> Result<()>;
}

/// Sender that only logs what it would deliver.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSender;

#[async_trait::async_trait]
impl NotificationSender for LogSender {
    async fn send_notification(&self, notification: &NotificationFor) -> Result<()> {
        for update in &notification.updates {
            info!(
                "Push to {}: {} {} ({})",
                notification.endpoint,
                update.update.level,
                update.composite_id(),
                update.update.description
            );
        }
        Ok(())
    }
}

/// Hand every notification to `sender` until the stream closes. Failed
/// deliveries are logged and dropped. Returns the number delivered.
pub async fn deliver<S>(mut notifications: mpsc::Receiver<NotificationFor>, sender: S) -> usize
where
    S: NotificationSender,
{
    let mut delivered = 0;
    while let Some(notification) = notifications.recv().await {
        match sender.send_notification(&notification).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(
                "Failed to deliver {} updates to {}: {}",
                notification.updates.len(),
                notification.endpoint,
                e
            ),
        }
    }
    delivered
}

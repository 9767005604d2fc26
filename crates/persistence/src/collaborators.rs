//! Seams for services the platform calls alongside persistence.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Delivery failure reported by a [`NotificationSender`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("notification delivery failed: {message}")]
pub struct NotificationError {
    pub message: String,
}

impl NotificationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outbound notification channel (email, SMS, push).
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, recipient: &str, template: &str, data: &Value)
    -> Result<(), NotificationError>;
}

/// Sends a notification in the background.
///
/// Failures are logged and never reach the caller. The returned handle may be
/// awaited or dropped.
pub fn dispatch_notification(
    sender: Arc<dyn NotificationSender>,
    recipient: impl Into<String>,
    template: impl Into<String>,
    data: Value,
) -> JoinHandle<()> {
    let recipient = recipient.into();
    let template = template.into();
    tokio::spawn(async move {
        match sender.send(&recipient, &template, &data).await {
            Ok(()) => debug!(%recipient, %template, "notification sent"),
            Err(err) => warn!(%recipient, %template, error = %err, "notification failed"),
        }
    })
}

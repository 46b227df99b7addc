//! Notification collaborator.
//!
//! Fire-and-forget delivery: a send failure is logged and swallowed, it never
//! fails the operation that emitted it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::Mutex;
use uuid::Uuid;

/// Typed events the core emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    ApprovalRequest,
    ApprovalReminder,
    LeaveSubmitted,
    LeaveApproved,
    LeaveRejected,
    LeaveReopened,
    LeaveRevoked,
    LeaveRecalled,
    VoluntaryWorkRequest,
    VoluntaryWorkApproved,
    VoluntaryWorkRejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub action_url: Option<String>,
    pub data: serde_json::Value,
}

impl Notification {
    pub fn new(
        user_id: Uuid,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            notification_type,
            title: title.into(),
            message: message.into(),
            action_url: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivery errors must be handled internally; this cannot fail the caller.
    async fn notify(&self, notification: Notification);
}

/// Records notifications; also the bootstrap default (delivery happens in an
/// external service, the core only emits).
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl InMemoryNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier poisoned").clone()
    }

    pub fn sent_of_type(&self, kind: NotificationType) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.notification_type == kind)
            .collect()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: Notification) {
        tracing::debug!(
            user_id = %notification.user_id,
            kind = ?notification.notification_type,
            "notification emitted"
        );
        self.sent.lock().expect("notifier poisoned").push(notification);
    }
}

//! Resolution callback to the originating service.
//!
//! Fired after the resolving transaction commits. Failures are logged and
//! dropped: the approval row is the source of truth and receivers are
//! expected to be idempotent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use super::models::{ApprovalDecision, ApprovalRequest, ApprovalStatus};

/// POSTed to `callback_url` on resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub approval_request_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub status: ApprovalStatus,
    pub resolved_at: DateTime<Utc>,
    pub resolution_notes: Option<String>,
    pub final_decision_by: Option<Uuid>,
    pub condition_type: Option<String>,
    pub condition_details: Option<String>,
    pub decisions: Vec<ApprovalDecision>,
}

impl CallbackPayload {
    pub fn from_request(request: &ApprovalRequest, decisions: Vec<ApprovalDecision>) -> Self {
        Self {
            approval_request_id: request.id,
            entity_type: request.entity_type.clone(),
            entity_id: request.entity_id,
            status: request.status,
            resolved_at: request.resolved_at.unwrap_or_else(Utc::now),
            resolution_notes: request.resolution_notes.clone(),
            final_decision_by: request.final_decision_by,
            condition_type: request.condition_type(),
            condition_details: request.condition_details(),
            decisions,
        }
    }
}

#[async_trait]
pub trait CallbackSender: Send + Sync {
    /// Must not propagate transport failures; log and move on.
    async fn send(&self, url: &str, payload: &CallbackPayload);
}

/// Production sender: HTTP POST with a hard 10 s timeout.
pub struct HttpCallbackSender {
    client: reqwest::Client,
}

impl HttpCallbackSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpCallbackSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CallbackSender for HttpCallbackSender {
    async fn send(&self, url: &str, payload: &CallbackPayload) {
        match self.client.post(url).json(payload).send().await {
            Ok(response) => {
                tracing::info!(url, status = %response.status(), "callback sent");
            }
            Err(err) => {
                tracing::error!(url, error = %err, "failed to send callback");
            }
        }
    }
}

/// Test sender that records every payload.
#[derive(Debug, Default)]
pub struct RecordingCallbackSender {
    sent: Mutex<Vec<(String, CallbackPayload)>>,
}

impl RecordingCallbackSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, CallbackPayload)> {
        self.sent.lock().expect("callback sender poisoned").clone()
    }
}

#[async_trait]
impl CallbackSender for RecordingCallbackSender {
    async fn send(&self, url: &str, payload: &CallbackPayload) {
        self.sent
            .lock()
            .expect("callback sender poisoned")
            .push((url.to_string(), payload.clone()));
    }
}

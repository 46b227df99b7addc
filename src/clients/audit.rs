//! Audit sink.
//!
//! Append-only action log. Sink errors never fail the originating operation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// None for SYSTEM/SCHEDULER actions.
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub description: String,
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn new(
        actor_id: Option<Uuid>,
        action: &str,
        resource_type: &str,
        resource_id: impl ToString,
        description: impl Into<String>,
    ) -> Self {
        Self {
            actor_id,
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            description: description.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Must swallow storage errors internally.
    async fn log_action(&self, entry: AuditEntry);
}

/// Default sink: structured log line plus an in-memory tail for tests.
#[derive(Debug, Default)]
pub struct TracingAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl TracingAuditSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().expect("audit sink poisoned").clone()
    }
}

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log_action(&self, entry: AuditEntry) {
        tracing::info!(
            actor = ?entry.actor_id,
            action = %entry.action,
            resource = %entry.resource_type,
            id = %entry.resource_id,
            "{}",
            entry.description
        );
        self.entries.lock().expect("audit sink poisoned").push(entry);
    }
}

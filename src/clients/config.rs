//! Configuration collaborator.
//!
//! Supplies leave-type definitions. Calendar configuration (profiles,
//! holidays, closures) lives in the calendar module's own stores.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CoreResult;

/// Per-type leave policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveTypeConfig {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub requires_approval: bool,
    /// INPS telematic protocol mandatory at create (sick leave).
    pub requires_protocol: bool,
    pub allow_past_dates: bool,
    pub allow_negative_balance: bool,
    pub min_notice_days: Option<i64>,
    pub max_consecutive_days: Option<i64>,
    pub max_per_month: Option<i64>,
    pub is_active: bool,
}

impl LeaveTypeConfig {
    /// A plain vacation type with approval required and no special limits.
    pub fn vacation(id: Uuid) -> Self {
        Self {
            id,
            code: "vacation".to_string(),
            name: "Ferie".to_string(),
            requires_approval: true,
            requires_protocol: false,
            allow_past_dates: false,
            allow_negative_balance: false,
            min_notice_days: None,
            max_consecutive_days: None,
            max_per_month: None,
            is_active: true,
        }
    }
}

#[async_trait]
pub trait ConfigClient: Send + Sync {
    async fn get_leave_type(&self, id: Uuid) -> CoreResult<Option<LeaveTypeConfig>>;

    async fn list_leave_types(&self) -> CoreResult<Vec<LeaveTypeConfig>>;
}

/// In-memory configuration used by the bootstrap binary and tests.
#[derive(Debug, Default)]
pub struct InMemoryConfig {
    leave_types: DashMap<Uuid, LeaveTypeConfig>,
}

impl InMemoryConfig {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_leave_type(&self, lt: LeaveTypeConfig) {
        self.leave_types.insert(lt.id, lt);
    }
}

#[async_trait]
impl ConfigClient for InMemoryConfig {
    async fn get_leave_type(&self, id: Uuid) -> CoreResult<Option<LeaveTypeConfig>> {
        Ok(self.leave_types.get(&id).map(|t| t.clone()))
    }

    async fn list_leave_types(&self) -> CoreResult<Vec<LeaveTypeConfig>> {
        Ok(self
            .leave_types
            .iter()
            .filter(|t| t.is_active)
            .map(|t| t.clone())
            .collect())
    }
}

//! Typed stores for the `approvals` schema.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::models::*;
use crate::error::{CoreError, CoreResult};

/// Backing store for workflow configs, requests, decisions, history and
/// reminders. Mutations that must observe a consistent request row go
/// through `update_request`, which replaces the row atomically.
#[derive(Debug, Default)]
pub struct ApprovalStore {
    configs: DashMap<Uuid, WorkflowConfig>,
    requests: DashMap<Uuid, ApprovalRequest>,
    decisions: DashMap<Uuid, ApprovalDecision>,
    history: DashMap<Uuid, ApprovalHistory>,
    reminders: DashMap<Uuid, ApprovalReminder>,
}

impl ApprovalStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // ─── Workflow configs ───

    pub fn insert_config(&self, config: WorkflowConfig) {
        self.configs.insert(config.id, config);
    }

    pub fn get_config(&self, id: Uuid) -> Option<WorkflowConfig> {
        self.configs.get(&id).map(|c| c.clone())
    }

    pub fn update_config(&self, config: WorkflowConfig) -> CoreResult<()> {
        if !self.configs.contains_key(&config.id) {
            return Err(CoreError::not_found("WorkflowConfig", config.id));
        }
        self.configs.insert(config.id, config);
        Ok(())
    }

    /// Active workflows for an entity type, ascending priority.
    pub fn active_configs_for(&self, entity_type: &str) -> Vec<WorkflowConfig> {
        let mut configs: Vec<WorkflowConfig> = self
            .configs
            .iter()
            .filter(|c| c.is_active && c.entity_type == entity_type)
            .map(|c| c.clone())
            .collect();
        configs.sort_by_key(|c| c.priority);
        configs
    }

    pub fn default_config_for(&self, entity_type: &str) -> Option<WorkflowConfig> {
        self.configs
            .iter()
            .find(|c| c.is_active && c.is_default && c.entity_type == entity_type)
            .map(|c| c.clone())
    }

    pub fn list_configs(&self, entity_type: Option<&str>, active_only: bool) -> Vec<WorkflowConfig> {
        let mut configs: Vec<WorkflowConfig> = self
            .configs
            .iter()
            .filter(|c| !active_only || c.is_active)
            .filter(|c| entity_type.map_or(true, |t| c.entity_type == t))
            .map(|c| c.clone())
            .collect();
        configs.sort_by_key(|c| (c.entity_type.clone(), c.priority));
        configs
    }

    /// Deactivation is soft: the row stays for history joins.
    pub fn deactivate_config(&self, id: Uuid) -> CoreResult<()> {
        match self.configs.get_mut(&id) {
            Some(mut config) => {
                config.is_active = false;
                config.updated_at = Utc::now();
                Ok(())
            }
            None => Err(CoreError::not_found("WorkflowConfig", id)),
        }
    }

    // ─── Requests ───

    pub fn insert_request(&self, request: ApprovalRequest) {
        self.requests.insert(request.id, request);
    }

    pub fn get_request(&self, id: Uuid) -> Option<ApprovalRequest> {
        self.requests.get(&id).map(|r| r.clone())
    }

    pub fn update_request(&self, mut request: ApprovalRequest) -> CoreResult<()> {
        if !self.requests.contains_key(&request.id) {
            return Err(CoreError::not_found("ApprovalRequest", request.id));
        }
        request.updated_at = Utc::now();
        self.requests.insert(request.id, request);
        Ok(())
    }

    /// Latest request for an entity pair.
    pub fn request_by_entity(&self, entity_type: &str, entity_id: Uuid) -> Option<ApprovalRequest> {
        self.requests
            .iter()
            .filter(|r| r.entity_type == entity_type && r.entity_id == entity_id)
            .max_by_key(|r| r.created_at)
            .map(|r| r.clone())
    }

    pub fn pending_request_by_entity(
        &self,
        entity_type: &str,
        entity_id: Uuid,
    ) -> Option<ApprovalRequest> {
        self.requests
            .iter()
            .find(|r| {
                r.entity_type == entity_type
                    && r.entity_id == entity_id
                    && r.status == ApprovalStatus::Pending
            })
            .map(|r| r.clone())
    }

    /// Pending requests past their expiry whose action has not run yet.
    pub fn expiring_requests(&self, now: DateTime<Utc>, limit: usize) -> Vec<ApprovalRequest> {
        let mut expiring: Vec<ApprovalRequest> = self
            .requests
            .iter()
            .filter(|r| {
                r.status == ApprovalStatus::Pending
                    && !r.expired_action_taken
                    && r.expires_at.map_or(false, |at| at <= now)
            })
            .map(|r| r.clone())
            .collect();
        expiring.sort_by_key(|r| r.expires_at);
        expiring.truncate(limit);
        expiring
    }

    pub fn resolved_before(&self, cutoff: DateTime<Utc>) -> Vec<ApprovalRequest> {
        self.requests
            .iter()
            .filter(|r| r.status.is_terminal() && r.resolved_at.map_or(false, |at| at < cutoff))
            .map(|r| r.clone())
            .collect()
    }

    pub fn all_pending(&self, entity_type: Option<&str>) -> Vec<ApprovalRequest> {
        let mut pending: Vec<ApprovalRequest> = self
            .requests
            .iter()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .filter(|r| entity_type.map_or(true, |t| r.entity_type == t))
            .map(|r| r.clone())
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    /// Pending requests where the approver holds an undecided row.
    pub fn pending_for_approver(
        &self,
        approver_id: Uuid,
        entity_type: Option<&str>,
    ) -> Vec<ApprovalRequest> {
        let request_ids: Vec<Uuid> = self
            .decisions
            .iter()
            .filter(|d| d.approver_id == approver_id && d.decision.is_none())
            .map(|d| d.approval_request_id)
            .collect();

        let mut pending: Vec<ApprovalRequest> = request_ids
            .iter()
            .filter_map(|id| self.get_request(*id))
            .filter(|r| r.status == ApprovalStatus::Pending)
            .filter(|r| entity_type.map_or(true, |t| r.entity_type == t))
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending.dedup_by_key(|r| r.id);
        pending
    }

    /// Hard-delete a request and its children (retention cleanup only;
    /// application code never mutates history through this path).
    pub fn purge_request(&self, id: Uuid) {
        self.requests.remove(&id);
        self.decisions.retain(|_, d| d.approval_request_id != id);
        self.history.retain(|_, h| h.approval_request_id != id);
        self.reminders.retain(|_, r| r.approval_request_id != id);
    }

    // ─── Decisions ───

    pub fn insert_decision(&self, decision: ApprovalDecision) {
        self.decisions.insert(decision.id, decision);
    }

    pub fn insert_decisions(&self, decisions: Vec<ApprovalDecision>) {
        for decision in decisions {
            self.insert_decision(decision);
        }
    }

    pub fn update_decision(&self, decision: ApprovalDecision) -> CoreResult<()> {
        if !self.decisions.contains_key(&decision.id) {
            return Err(CoreError::not_found("ApprovalDecision", decision.id));
        }
        self.decisions.insert(decision.id, decision);
        Ok(())
    }

    pub fn decisions_for_request(&self, request_id: Uuid) -> Vec<ApprovalDecision> {
        let mut decisions: Vec<ApprovalDecision> = self
            .decisions
            .iter()
            .filter(|d| d.approval_request_id == request_id)
            .map(|d| d.clone())
            .collect();
        decisions.sort_by_key(|d| (d.approval_level, d.assigned_at));
        decisions
    }

    pub fn pending_decisions_for_request(&self, request_id: Uuid) -> Vec<ApprovalDecision> {
        self.decisions_for_request(request_id)
            .into_iter()
            .filter(|d| d.decision.is_none())
            .collect()
    }

    /// The approver's row on a request; an undecided row wins over a decided
    /// one (delegation leaves both behind).
    pub fn decision_for_approver(
        &self,
        request_id: Uuid,
        approver_id: Uuid,
    ) -> Option<ApprovalDecision> {
        let mut rows: Vec<ApprovalDecision> = self
            .decisions
            .iter()
            .filter(|d| d.approval_request_id == request_id && d.approver_id == approver_id)
            .map(|d| d.clone())
            .collect();
        rows.sort_by_key(|d| (d.decision.is_some(), d.assigned_at));
        rows.into_iter().next()
    }

    pub fn decided_by_approver(
        &self,
        approver_id: Uuid,
        entity_type: Option<&str>,
    ) -> Vec<(ApprovalDecision, ApprovalRequest)> {
        let mut decided: Vec<(ApprovalDecision, ApprovalRequest)> = self
            .decisions
            .iter()
            .filter(|d| d.approver_id == approver_id && d.decision.is_some())
            .filter_map(|d| self.get_request(d.approval_request_id).map(|r| (d.clone(), r)))
            .filter(|(_, r)| entity_type.map_or(true, |t| r.entity_type == t))
            .collect();
        decided.sort_by_key(|(d, _)| std::cmp::Reverse(d.decided_at));
        decided
    }

    // ─── History ───

    pub fn append_history(&self, entry: ApprovalHistory) {
        self.history.insert(entry.id, entry);
    }

    pub fn history_for_request(&self, request_id: Uuid) -> Vec<ApprovalHistory> {
        let mut entries: Vec<ApprovalHistory> = self
            .history
            .iter()
            .filter(|h| h.approval_request_id == request_id)
            .map(|h| h.clone())
            .collect();
        entries.sort_by_key(|h| h.created_at);
        entries
    }

    // ─── Reminders ───

    pub fn insert_reminders(&self, reminders: Vec<ApprovalReminder>) {
        for reminder in reminders {
            self.reminders.insert(reminder.id, reminder);
        }
    }

    pub fn due_reminders(&self, now: DateTime<Utc>, limit: usize) -> Vec<ApprovalReminder> {
        let mut due: Vec<ApprovalReminder> = self
            .reminders
            .iter()
            .filter(|r| !r.is_sent && r.scheduled_at <= now)
            .map(|r| r.clone())
            .collect();
        due.sort_by_key(|r| r.scheduled_at);
        due.truncate(limit);
        due
    }

    pub fn mark_reminder_sent(&self, id: Uuid) {
        if let Some(mut reminder) = self.reminders.get_mut(&id) {
            reminder.is_sent = true;
            reminder.sent_at = Some(Utc::now());
        }
    }

    pub fn delete_reminders_for_request(&self, request_id: Uuid) {
        self.reminders.retain(|_, r| r.approval_request_id != request_id);
    }

    pub fn reminders_for_request(&self, request_id: Uuid) -> Vec<ApprovalReminder> {
        self.reminders
            .iter()
            .filter(|r| r.approval_request_id == request_id)
            .map(|r| r.clone())
            .collect()
    }
}

//! Approval workflow data model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// How multi-approver decisions are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalMode {
    Any,
    All,
    Sequential,
    Majority,
}

/// What happens when a pending request reaches `expires_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpirationAction {
    Reject,
    Escalate,
    AutoApprove,
    NotifyOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    ApprovedConditional,
    Rejected,
    Expired,
    Escalated,
    Cancelled,
}

impl ApprovalStatus {
    /// Terminal requests are immutable except for callback bookkeeping.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Escalated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionType {
    Approved,
    Rejected,
    Delegated,
    ApprovedConditional,
}

impl DecisionType {
    pub fn counts_as_approval(self) -> bool {
        matches!(self, Self::Approved | Self::ApprovedConditional)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorType {
    User,
    System,
    Scheduler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    Created,
    Assigned,
    Approved,
    Rejected,
    Delegated,
    ApprovedConditional,
    Expired,
    Escalated,
    Cancelled,
    AdminOverride,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReminderType {
    First,
    Final,
}

/// Structured predicate matched against the entity's metadata during
/// workflow selection. Range predicates treat a missing field as 0;
/// membership predicates skip when the field is absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConditions {
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub min_days: Option<Decimal>,
    pub max_days: Option<Decimal>,
    pub entity_subtypes: Option<Vec<String>>,
    pub departments: Option<Vec<String>>,
}

/// Admin-configured workflow. Deactivation is a flag flip, never a delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub id: Uuid,
    pub entity_type: String,
    pub name: String,
    pub description: Option<String>,
    pub min_approvers: u32,
    pub max_approvers: Option<u32>,
    pub approval_mode: ApprovalMode,
    /// Role tokens: a plain role id, `EXECUTIVE_LEVEL:<id>`, or
    /// `DYNAMIC:DEPARTMENT_MANAGER` / `DYNAMIC:SERVICE_COORDINATOR`.
    pub approver_role_ids: Vec<String>,
    pub auto_assign_approvers: bool,
    pub allow_self_approval: bool,
    pub expiration_hours: Option<i64>,
    pub expiration_action: ExpirationAction,
    pub escalation_role_id: Option<Uuid>,
    pub reminder_hours_before: Option<i64>,
    pub send_reminders: bool,
    pub conditions: Option<WorkflowConditions>,
    /// Lower wins during selection.
    pub priority: i32,
    pub is_active: bool,
    pub is_default: bool,
    /// Scope filter on who sees this workflow; not consulted during
    /// dynamic approver resolution.
    pub target_role_ids: Vec<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One approval in flight for an `(entity_type, entity_id)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub entity_ref: Option<String>,
    pub workflow_config_id: Uuid,
    pub requester_id: Uuid,
    pub requester_name: Option<String>,
    pub title: String,
    pub description: Option<String>,
    /// Denormalized entity data; also carries `condition_type` /
    /// `condition_details` once a conditional approval lands.
    pub request_metadata: serde_json::Value,
    pub callback_url: Option<String>,
    pub status: ApprovalStatus,
    pub required_approvals: u32,
    pub received_approvals: u32,
    pub received_rejections: u32,
    /// Sequential-mode cursor; 1 in every other mode.
    pub current_level: u32,
    pub max_level: u32,
    pub expires_at: Option<DateTime<Utc>>,
    /// At-most-once guard for the expiration sweep.
    pub expired_action_taken: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
    pub final_decision_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn condition_type(&self) -> Option<String> {
        self.request_metadata
            .get("condition_type")
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    pub fn condition_details(&self) -> Option<String> {
        self.request_metadata
            .get("condition_details")
            .and_then(|v| v.as_str())
            .map(String::from)
    }
}

/// One row per assigned approver. Mutated exactly once, except delegation
/// which also inserts a fresh row for the delegate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub id: Uuid,
    pub approval_request_id: Uuid,
    pub approver_id: Uuid,
    pub approver_name: Option<String>,
    pub approver_role: Option<String>,
    /// 1 in non-sequential modes; 1..N in SEQUENTIAL.
    pub approval_level: u32,
    pub decision: Option<DecisionType>,
    pub decision_notes: Option<String>,
    pub delegated_to_id: Option<Uuid>,
    pub delegated_to_name: Option<String>,
    pub assigned_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

/// Append-only event log per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalHistory {
    pub id: Uuid,
    pub approval_request_id: Uuid,
    pub action: HistoryAction,
    pub actor_id: Option<Uuid>,
    pub actor_name: Option<String>,
    pub actor_type: ActorType,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Pre-scheduled reminder, flipped to sent on dispatch and deleted when the
/// request leaves PENDING.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalReminder {
    pub id: Uuid,
    pub approval_request_id: Uuid,
    pub approver_id: Uuid,
    pub reminder_type: ReminderType,
    pub scheduled_at: DateTime<Utc>,
    pub is_sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
}

// ─── Inbound DTOs ───

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WorkflowConfigCreate {
    pub entity_type: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    #[validate(range(min = 1))]
    pub min_approvers: u32,
    pub max_approvers: Option<u32>,
    pub approval_mode: ApprovalMode,
    #[serde(default)]
    pub approver_role_ids: Vec<String>,
    #[serde(default)]
    pub auto_assign_approvers: bool,
    #[serde(default)]
    pub allow_self_approval: bool,
    pub expiration_hours: Option<i64>,
    pub expiration_action: ExpirationAction,
    pub escalation_role_id: Option<Uuid>,
    pub reminder_hours_before: Option<i64>,
    #[serde(default = "default_true")]
    pub send_reminders: bool,
    pub conditions: Option<WorkflowConditions>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub target_role_ids: Vec<Uuid>,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> i32 {
    100
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowConfigUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub min_approvers: Option<u32>,
    pub max_approvers: Option<u32>,
    pub approval_mode: Option<ApprovalMode>,
    pub approver_role_ids: Option<Vec<String>>,
    pub auto_assign_approvers: Option<bool>,
    pub allow_self_approval: Option<bool>,
    pub expiration_hours: Option<i64>,
    pub expiration_action: Option<ExpirationAction>,
    pub escalation_role_id: Option<Uuid>,
    pub reminder_hours_before: Option<i64>,
    pub send_reminders: Option<bool>,
    pub conditions: Option<WorkflowConditions>,
    pub priority: Option<i32>,
    pub is_active: Option<bool>,
    pub is_default: Option<bool>,
    pub target_role_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ApprovalRequestCreate {
    pub entity_type: String,
    pub entity_id: Uuid,
    pub entity_ref: Option<String>,
    /// Explicit workflow; otherwise selection runs over the metadata.
    pub workflow_config_id: Option<Uuid>,
    pub requester_id: Uuid,
    pub requester_name: Option<String>,
    #[validate(length(min = 1, max = 300))]
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub callback_url: Option<String>,
    /// Caller-supplied approvers, used verbatim when present.
    #[serde(default)]
    pub approver_ids: Vec<Uuid>,
}

// ─── Dashboard views ───

#[derive(Debug, Clone, Serialize)]
pub struct PendingApprovalItem {
    pub request_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub entity_ref: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub requester_name: Option<String>,
    pub approval_level: u32,
    pub is_urgent: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub days_pending: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingApprovalsResponse {
    pub total: usize,
    pub urgent_count: usize,
    pub items: Vec<PendingApprovalItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchivedApprovalItem {
    pub request_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub title: String,
    pub requester_name: Option<String>,
    pub decision: DecisionType,
    pub decision_notes: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalStatusCheck {
    pub entity_type: String,
    pub entity_id: Uuid,
    pub has_pending_request: bool,
    pub approval_request_id: Option<Uuid>,
    pub status: Option<ApprovalStatus>,
    pub required_approvals: Option<u32>,
    pub received_approvals: Option<u32>,
}

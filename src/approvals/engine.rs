//! Workflow selection, approver assignment, decision tallying and
//! expiration handling.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::models::*;
use super::repository::ApprovalStore;
use crate::error::{CoreError, CoreResult};

/// An approver after directory resolution.
#[derive(Debug, Clone)]
pub struct ResolvedApprover {
    pub id: Uuid,
    pub name: Option<String>,
    pub role: Option<String>,
}

impl ResolvedApprover {
    pub fn bare(id: Uuid) -> Self {
        Self {
            id,
            name: None,
            role: None,
        }
    }
}

/// Outcome of recording one decision.
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub request: ApprovalRequest,
    /// Set when this decision resolved the request.
    pub resolved: bool,
}

pub struct WorkflowEngine {
    store: Arc<ApprovalStore>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<ApprovalStore>) -> Self {
        Self { store }
    }

    // ─── Workflow selection ───

    /// First active workflow (ascending priority) whose conditions match,
    /// falling back to the entity type's default.
    pub fn select_workflow(
        &self,
        entity_type: &str,
        entity_data: &serde_json::Value,
    ) -> Option<WorkflowConfig> {
        for config in self.store.active_configs_for(entity_type) {
            if Self::conditions_match(config.conditions.as_ref(), entity_data) {
                info!(workflow = %config.name, entity_type, "workflow selected");
                return Some(config);
            }
        }

        if let Some(default) = self.store.default_config_for(entity_type) {
            info!(workflow = %default.name, entity_type, "default workflow selected");
            return Some(default);
        }

        warn!(entity_type, "no workflow configured");
        None
    }

    fn decimal_field(data: &serde_json::Value, key: &str) -> Decimal {
        data.get(key)
            .and_then(|v| {
                if let Some(s) = v.as_str() {
                    s.parse().ok()
                } else {
                    v.as_f64().and_then(|f| Decimal::try_from(f).ok())
                }
            })
            .unwrap_or(Decimal::ZERO)
    }

    fn conditions_match(conditions: Option<&WorkflowConditions>, data: &serde_json::Value) -> bool {
        let Some(conditions) = conditions else {
            return true;
        };

        let amount = Self::decimal_field(data, "amount");
        if conditions.min_amount.map_or(false, |min| amount < min) {
            return false;
        }
        if conditions.max_amount.map_or(false, |max| amount > max) {
            return false;
        }

        let days = Self::decimal_field(data, "days");
        if conditions.min_days.map_or(false, |min| days < min) {
            return false;
        }
        if conditions.max_days.map_or(false, |max| days > max) {
            return false;
        }

        if let Some(subtypes) = &conditions.entity_subtypes {
            let subtype = data
                .get("subtype")
                .or_else(|| data.get("leave_type"))
                .and_then(|v| v.as_str());
            // absent field: predicate skipped
            if let Some(subtype) = subtype {
                if !subtypes.iter().any(|s| s == subtype) {
                    return false;
                }
            }
        }

        if let Some(departments) = &conditions.departments {
            let department = data.get("department").and_then(|v| v.as_str());
            if let Some(department) = department {
                if !departments.iter().any(|d| d == department) {
                    return false;
                }
            }
        }

        true
    }

    // ─── Approver assignment ───

    pub fn required_approvals(workflow: &WorkflowConfig, total_approvers: u32) -> u32 {
        match workflow.approval_mode {
            ApprovalMode::Any => 1,
            ApprovalMode::All | ApprovalMode::Sequential => total_approvers,
            ApprovalMode::Majority => total_approvers / 2 + 1,
        }
    }

    /// Creates the decision rows in bulk and updates the request's tallies
    /// and level bounds.
    pub fn assign_approvers(
        &self,
        request: &mut ApprovalRequest,
        workflow: &WorkflowConfig,
        approvers: &[ResolvedApprover],
    ) -> CoreResult<Vec<ApprovalDecision>> {
        if approvers.is_empty() {
            warn!(request_id = %request.id, "no approvers to assign");
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let decisions: Vec<ApprovalDecision> = approvers
            .iter()
            .enumerate()
            .map(|(i, approver)| ApprovalDecision {
                id: Uuid::new_v4(),
                approval_request_id: request.id,
                approver_id: approver.id,
                approver_name: approver.name.clone(),
                approver_role: approver.role.clone(),
                approval_level: match workflow.approval_mode {
                    ApprovalMode::Sequential => i as u32 + 1,
                    _ => 1,
                },
                decision: None,
                decision_notes: None,
                delegated_to_id: None,
                delegated_to_name: None,
                assigned_at: now,
                decided_at: None,
            })
            .collect();

        request.required_approvals = Self::required_approvals(workflow, approvers.len() as u32);
        request.max_level = decisions
            .iter()
            .map(|d| d.approval_level)
            .max()
            .unwrap_or(1);
        request.current_level = 1;

        self.store.insert_decisions(decisions.clone());
        self.store.update_request(request.clone())?;

        self.store.append_history(ApprovalHistory {
            id: Uuid::new_v4(),
            approval_request_id: request.id,
            action: HistoryAction::Assigned,
            actor_id: None,
            actor_name: None,
            actor_type: ActorType::System,
            details: serde_json::json!({
                "approver_count": approvers.len(),
                "approver_ids": approvers.iter().map(|a| a.id).collect::<Vec<_>>(),
            }),
            created_at: now,
        });

        info!(request_id = %request.id, count = approvers.len(), "approvers assigned");
        Ok(decisions)
    }

    // ─── Decision processing ───

    /// Records one approver's decision and recomputes the request status.
    ///
    /// With `override_authority`, a caller not holding a decision row takes
    /// over the first unresolved row at the current level; the override is
    /// logged to history.
    pub fn process_decision(
        &self,
        request_id: Uuid,
        approver_id: Uuid,
        decision_type: DecisionType,
        notes: Option<String>,
        delegated_to: Option<(Uuid, Option<String>)>,
        override_authority: bool,
    ) -> CoreResult<DecisionOutcome> {
        let request = self
            .store
            .get_request(request_id)
            .ok_or(CoreError::not_found("ApprovalRequest", request_id))?;

        let workflow = self.store.get_config(request.workflow_config_id);
        let mode = workflow
            .as_ref()
            .map(|w| w.approval_mode)
            .unwrap_or(ApprovalMode::Any);

        let mut decision = self.store.decision_for_approver(request_id, approver_id);
        let mut notes = notes;
        let mut overridden = false;

        if decision.is_none() && override_authority {
            // Admin override: take the first unresolved row (current level in
            // sequential mode).
            let pending = self.store.pending_decisions_for_request(request_id);
            let fallback = if mode == ApprovalMode::Sequential {
                pending
                    .into_iter()
                    .find(|d| d.approval_level == request.current_level)
            } else {
                pending.into_iter().next()
            };
            if let Some(row) = fallback {
                notes = Some(format!(
                    "[ADMIN OVERRIDE by {}] {}",
                    approver_id,
                    notes.unwrap_or_default()
                ));
                decision = Some(row);
                overridden = true;
            }
        }

        let mut decision = decision.ok_or(CoreError::rule(
            "NOT_ASSIGNED",
            format!("approver {} is not assigned to this request", approver_id),
        ))?;

        if decision.decision.is_some() {
            return Err(CoreError::rule("ALREADY_DECIDED", "decision already made"));
        }

        if request.status != ApprovalStatus::Pending {
            return Err(CoreError::rule(
                "NOT_PENDING",
                format!("request is not pending (status: {:?})", request.status),
            ));
        }

        if !override_authority
            && mode == ApprovalMode::Sequential
            && decision.approval_level != request.current_level
        {
            return Err(CoreError::rule(
                "NOT_YOUR_TURN",
                format!(
                    "current level is {}, your level is {}",
                    request.current_level, decision.approval_level
                ),
            ));
        }

        decision.decision = Some(decision_type);
        decision.decision_notes = notes.clone();
        decision.decided_at = Some(Utc::now());
        if decision_type == DecisionType::Delegated {
            if let Some((delegate_id, delegate_name)) = &delegated_to {
                decision.delegated_to_id = Some(*delegate_id);
                decision.delegated_to_name = delegate_name.clone();
            }
        }
        self.store.update_decision(decision.clone())?;

        let history_action = match decision_type {
            DecisionType::Approved => HistoryAction::Approved,
            DecisionType::Rejected => HistoryAction::Rejected,
            DecisionType::Delegated => HistoryAction::Delegated,
            DecisionType::ApprovedConditional => HistoryAction::ApprovedConditional,
        };
        self.store.append_history(ApprovalHistory {
            id: Uuid::new_v4(),
            approval_request_id: request_id,
            action: if overridden {
                HistoryAction::AdminOverride
            } else {
                history_action
            },
            actor_id: Some(approver_id),
            actor_name: None,
            actor_type: ActorType::User,
            details: notes
                .as_ref()
                .map(|n| serde_json::json!({ "notes": n, "decision": decision_type }))
                .unwrap_or(serde_json::json!({ "decision": decision_type })),
            created_at: Utc::now(),
        });

        self.resolve_request(request_id, mode, decision_type, approver_id)
    }

    /// Recomputes tallies and applies the mode's resolution rule.
    fn resolve_request(
        &self,
        request_id: Uuid,
        mode: ApprovalMode,
        last_decision: DecisionType,
        decided_by: Uuid,
    ) -> CoreResult<DecisionOutcome> {
        let mut request = self
            .store
            .get_request(request_id)
            .ok_or(CoreError::not_found("ApprovalRequest", request_id))?;

        let decisions = self.store.decisions_for_request(request_id);
        let approvals = decisions
            .iter()
            .filter(|d| d.decision.map_or(false, DecisionType::counts_as_approval))
            .count() as u32;
        let rejections = decisions
            .iter()
            .filter(|d| d.decision == Some(DecisionType::Rejected))
            .count() as u32;
        let has_conditional = decisions
            .iter()
            .any(|d| d.decision == Some(DecisionType::ApprovedConditional));
        let pending: Vec<&ApprovalDecision> =
            decisions.iter().filter(|d| d.decision.is_none()).collect();

        request.received_approvals = approvals;
        request.received_rejections = rejections;

        let approved_status = if has_conditional {
            ApprovalStatus::ApprovedConditional
        } else {
            ApprovalStatus::Approved
        };

        let mut new_status = None;
        match mode {
            ApprovalMode::Any => {
                if last_decision.counts_as_approval() {
                    new_status = Some(if last_decision == DecisionType::ApprovedConditional {
                        ApprovalStatus::ApprovedConditional
                    } else {
                        ApprovalStatus::Approved
                    });
                } else if last_decision == DecisionType::Rejected {
                    new_status = Some(ApprovalStatus::Rejected);
                }
            }
            ApprovalMode::All => {
                if rejections > 0 {
                    new_status = Some(ApprovalStatus::Rejected);
                } else if pending.is_empty() && approvals >= request.required_approvals {
                    new_status = Some(approved_status);
                }
            }
            ApprovalMode::Sequential => {
                if last_decision == DecisionType::Rejected {
                    new_status = Some(ApprovalStatus::Rejected);
                } else if last_decision.counts_as_approval() {
                    let level_open = pending
                        .iter()
                        .any(|d| d.approval_level == request.current_level);
                    if !level_open {
                        if request.current_level < request.max_level {
                            request.current_level += 1;
                        } else {
                            new_status = Some(approved_status);
                        }
                    }
                }
            }
            ApprovalMode::Majority => {
                let total = decisions.len() as u32;
                if approvals >= request.required_approvals {
                    new_status = Some(approved_status);
                } else if rejections > total.saturating_sub(request.required_approvals) {
                    new_status = Some(ApprovalStatus::Rejected);
                }
            }
        }

        let resolved = new_status.is_some();
        if let Some(status) = new_status {
            request.status = status;
            request.resolved_at = Some(Utc::now());
            request.final_decision_by = Some(decided_by);
            self.store.delete_reminders_for_request(request_id);
            info!(request_id = %request_id, ?status, "approval request resolved");
        }
        self.store.update_request(request.clone())?;

        Ok(DecisionOutcome { request, resolved })
    }

    // ─── Expiration ───

    /// Applies the workflow's expiration action. `expired_action_taken` is
    /// set in every branch so the sweep is at-most-once.
    pub fn handle_expiration(&self, request_id: Uuid) -> CoreResult<ApprovalRequest> {
        let mut request = self
            .store
            .get_request(request_id)
            .ok_or(CoreError::not_found("ApprovalRequest", request_id))?;

        let workflow = self.store.get_config(request.workflow_config_id);
        let action = workflow
            .as_ref()
            .map(|w| w.expiration_action)
            .unwrap_or(ExpirationAction::Reject);

        info!(request_id = %request.id, ?action, "handling expiration");

        match action {
            ExpirationAction::Reject => {
                request.status = ApprovalStatus::Expired;
                request.resolved_at = Some(Utc::now());
                request.resolution_notes = Some("Scaduto automaticamente".to_string());
            }
            ExpirationAction::AutoApprove => {
                // Never APPROVED_CONDITIONAL on auto-approval.
                request.status = ApprovalStatus::Approved;
                request.resolved_at = Some(Utc::now());
                request.resolution_notes =
                    Some("Approvato automaticamente per scadenza".to_string());
            }
            ExpirationAction::Escalate => {
                // Re-assignment from the escalation role happens in the
                // service, inside the same sweep.
                request.status = ApprovalStatus::Escalated;
            }
            ExpirationAction::NotifyOnly => {
                // Stays pending; the sweep only notifies once.
            }
        }

        request.expired_action_taken = true;
        self.store.update_request(request.clone())?;

        self.store.append_history(ApprovalHistory {
            id: Uuid::new_v4(),
            approval_request_id: request.id,
            action: HistoryAction::Expired,
            actor_id: None,
            actor_name: None,
            actor_type: ActorType::Scheduler,
            details: serde_json::json!({
                "action_taken": action,
                "expired_at": Utc::now(),
            }),
            created_at: Utc::now(),
        });

        if request.status != ApprovalStatus::Pending {
            self.store.delete_reminders_for_request(request.id);
        }

        Ok(request)
    }

    // ─── Reminders ───

    /// Schedules FIRST (`reminder_hours_before`, default 24 h) and FINAL
    /// (2 h) reminders per approver, relative to `expires_at`. Slots already
    /// in the past are skipped.
    pub fn schedule_reminders(
        &self,
        request: &ApprovalRequest,
        workflow: &WorkflowConfig,
        approver_ids: &[Uuid],
    ) {
        if !workflow.send_reminders {
            return;
        }
        let Some(expires_at) = request.expires_at else {
            return;
        };

        let hours_before = workflow.reminder_hours_before.unwrap_or(24);
        let now = Utc::now();
        let mut reminders = Vec::new();

        for approver_id in approver_ids {
            let first = expires_at - Duration::hours(hours_before);
            if first > now {
                reminders.push(ApprovalReminder {
                    id: Uuid::new_v4(),
                    approval_request_id: request.id,
                    approver_id: *approver_id,
                    reminder_type: ReminderType::First,
                    scheduled_at: first,
                    is_sent: false,
                    sent_at: None,
                });
            }

            let fin = expires_at - Duration::hours(2);
            if fin > now {
                reminders.push(ApprovalReminder {
                    id: Uuid::new_v4(),
                    approval_request_id: request.id,
                    approver_id: *approver_id,
                    reminder_type: ReminderType::Final,
                    scheduled_at: fin,
                    is_sent: false,
                    sent_at: None,
                });
            }
        }

        if !reminders.is_empty() {
            info!(request_id = %request.id, count = reminders.len(), "reminders scheduled");
            self.store.insert_reminders(reminders);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow(mode: ApprovalMode) -> WorkflowConfig {
        WorkflowConfig {
            id: Uuid::new_v4(),
            entity_type: "LEAVE_REQUEST".to_string(),
            name: "Test".to_string(),
            description: None,
            min_approvers: 1,
            max_approvers: None,
            approval_mode: mode,
            approver_role_ids: Vec::new(),
            auto_assign_approvers: false,
            allow_self_approval: false,
            expiration_hours: Some(24),
            expiration_action: ExpirationAction::Reject,
            escalation_role_id: None,
            reminder_hours_before: Some(24),
            send_reminders: true,
            conditions: None,
            priority: 100,
            is_active: true,
            is_default: true,
            target_role_ids: Vec::new(),
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn pending_request(workflow_id: Uuid) -> ApprovalRequest {
        ApprovalRequest {
            id: Uuid::new_v4(),
            entity_type: "LEAVE_REQUEST".to_string(),
            entity_id: Uuid::new_v4(),
            entity_ref: None,
            workflow_config_id: workflow_id,
            requester_id: Uuid::new_v4(),
            requester_name: None,
            title: "Ferie agosto".to_string(),
            description: None,
            request_metadata: serde_json::json!({}),
            callback_url: None,
            status: ApprovalStatus::Pending,
            required_approvals: 1,
            received_approvals: 0,
            received_rejections: 0,
            current_level: 1,
            max_level: 1,
            expires_at: Some(Utc::now() + Duration::hours(24)),
            expired_action_taken: false,
            resolved_at: None,
            resolution_notes: None,
            final_decision_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn setup(
        mode: ApprovalMode,
        approver_count: usize,
    ) -> (Arc<ApprovalStore>, WorkflowEngine, ApprovalRequest, Vec<Uuid>) {
        let store = ApprovalStore::new();
        let engine = WorkflowEngine::new(store.clone());
        let config = workflow(mode);
        store.insert_config(config.clone());

        let mut request = pending_request(config.id);
        store.insert_request(request.clone());

        let approvers: Vec<Uuid> = (0..approver_count).map(|_| Uuid::new_v4()).collect();
        let resolved: Vec<ResolvedApprover> =
            approvers.iter().map(|id| ResolvedApprover::bare(*id)).collect();
        engine
            .assign_approvers(&mut request, &config, &resolved)
            .unwrap();
        engine.schedule_reminders(&request, &config, &approvers);

        (store, engine, request, approvers)
    }

    #[test]
    fn sequential_enforces_turn_order_and_resolves_at_last_level() {
        let (store, engine, request, approvers) = setup(ApprovalMode::Sequential, 3);

        // U3 first: not their turn
        let err = engine
            .process_decision(request.id, approvers[2], DecisionType::Approved, None, None, false)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::BusinessRuleViolation { rule: "NOT_YOUR_TURN", .. }
        ));

        let out = engine
            .process_decision(request.id, approvers[0], DecisionType::Approved, None, None, false)
            .unwrap();
        assert_eq!(out.request.status, ApprovalStatus::Pending);
        assert_eq!(out.request.current_level, 2);
        assert!(!out.resolved);

        engine
            .process_decision(request.id, approvers[1], DecisionType::Approved, None, None, false)
            .unwrap();
        assert_eq!(store.get_request(request.id).unwrap().current_level, 3);

        let out = engine
            .process_decision(request.id, approvers[2], DecisionType::Approved, None, None, false)
            .unwrap();
        assert!(out.resolved);
        assert_eq!(out.request.status, ApprovalStatus::Approved);
        assert_eq!(out.request.received_approvals, 3);
    }

    #[test]
    fn majority_rejects_when_majority_unreachable() {
        let (_, engine, request, approvers) = setup(ApprovalMode::Majority, 5);
        assert_eq!(request.required_approvals, 3);

        engine
            .process_decision(request.id, approvers[0], DecisionType::Approved, None, None, false)
            .unwrap();
        engine
            .process_decision(request.id, approvers[1], DecisionType::Approved, None, None, false)
            .unwrap();
        engine
            .process_decision(request.id, approvers[2], DecisionType::Rejected, None, None, false)
            .unwrap();
        let out = engine
            .process_decision(request.id, approvers[3], DecisionType::Rejected, None, None, false)
            .unwrap();
        assert!(!out.resolved);

        let out = engine
            .process_decision(request.id, approvers[4], DecisionType::Rejected, None, None, false)
            .unwrap();
        assert!(out.resolved);
        assert_eq!(out.request.status, ApprovalStatus::Rejected);
    }

    #[test]
    fn majority_approves_at_threshold() {
        let (_, engine, request, approvers) = setup(ApprovalMode::Majority, 5);

        engine
            .process_decision(request.id, approvers[0], DecisionType::Approved, None, None, false)
            .unwrap();
        engine
            .process_decision(request.id, approvers[1], DecisionType::Approved, None, None, false)
            .unwrap();
        let out = engine
            .process_decision(request.id, approvers[2], DecisionType::Approved, None, None, false)
            .unwrap();
        assert!(out.resolved);
        assert_eq!(out.request.status, ApprovalStatus::Approved);
    }

    #[test]
    fn conditional_decision_propagates_to_terminal_status() {
        let (_, engine, request, approvers) = setup(ApprovalMode::Any, 2);

        let out = engine
            .process_decision(
                request.id,
                approvers[0],
                DecisionType::ApprovedConditional,
                Some("rientro 10/08".to_string()),
                None,
                false,
            )
            .unwrap();
        assert!(out.resolved);
        assert_eq!(out.request.status, ApprovalStatus::ApprovedConditional);
    }

    #[test]
    fn all_mode_single_rejection_rejects() {
        let (_, engine, request, approvers) = setup(ApprovalMode::All, 3);

        engine
            .process_decision(request.id, approvers[0], DecisionType::Approved, None, None, false)
            .unwrap();
        let out = engine
            .process_decision(request.id, approvers[1], DecisionType::Rejected, None, None, false)
            .unwrap();
        assert!(out.resolved);
        assert_eq!(out.request.status, ApprovalStatus::Rejected);
    }

    #[test]
    fn decided_row_cannot_be_decided_again() {
        let (_, engine, request, approvers) = setup(ApprovalMode::All, 2);

        engine
            .process_decision(request.id, approvers[0], DecisionType::Approved, None, None, false)
            .unwrap();
        let err = engine
            .process_decision(request.id, approvers[0], DecisionType::Rejected, None, None, false)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::BusinessRuleViolation { rule: "ALREADY_DECIDED", .. }
        ));
    }

    #[test]
    fn admin_override_takes_first_unresolved_row() {
        let (store, engine, request, _) = setup(ApprovalMode::Any, 2);
        let admin = Uuid::new_v4();

        let out = engine
            .process_decision(request.id, admin, DecisionType::Approved, None, None, true)
            .unwrap();
        assert!(out.resolved);
        assert_eq!(out.request.status, ApprovalStatus::Approved);
        let history = store.history_for_request(request.id);
        assert!(history.iter().any(|h| h.action == HistoryAction::AdminOverride));
    }

    #[test]
    fn override_does_not_bypass_already_decided() {
        let (_, engine, request, approvers) = setup(ApprovalMode::All, 2);

        engine
            .process_decision(request.id, approvers[0], DecisionType::Approved, None, None, false)
            .unwrap();
        // An approver who already decided cannot take over another row.
        let err = engine
            .process_decision(request.id, approvers[0], DecisionType::Approved, None, None, true)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::BusinessRuleViolation { rule: "ALREADY_DECIDED", .. }
        ));
    }

    #[test]
    fn resolution_deletes_reminders() {
        let (store, engine, request, approvers) = setup(ApprovalMode::Any, 2);
        assert!(!store.reminders_for_request(request.id).is_empty());

        engine
            .process_decision(request.id, approvers[0], DecisionType::Approved, None, None, false)
            .unwrap();
        assert!(store.reminders_for_request(request.id).is_empty());
    }

    #[test]
    fn expiration_auto_approve_is_plain_approved() {
        let store = ApprovalStore::new();
        let engine = WorkflowEngine::new(store.clone());
        let mut config = workflow(ApprovalMode::Any);
        config.expiration_action = ExpirationAction::AutoApprove;
        store.insert_config(config.clone());

        let mut request = pending_request(config.id);
        request.expires_at = Some(Utc::now() - Duration::hours(1));
        store.insert_request(request.clone());

        let updated = engine.handle_expiration(request.id).unwrap();
        assert_eq!(updated.status, ApprovalStatus::Approved);
        assert!(updated.expired_action_taken);
        assert_eq!(
            updated.resolution_notes.as_deref(),
            Some("Approvato automaticamente per scadenza")
        );

        // guard makes the sweep at-most-once
        assert!(store.expiring_requests(Utc::now(), 100).is_empty());
    }

    #[test]
    fn notify_only_keeps_request_pending() {
        let store = ApprovalStore::new();
        let engine = WorkflowEngine::new(store.clone());
        let mut config = workflow(ApprovalMode::Any);
        config.expiration_action = ExpirationAction::NotifyOnly;
        store.insert_config(config.clone());

        let mut request = pending_request(config.id);
        request.expires_at = Some(Utc::now() - Duration::hours(1));
        store.insert_request(request.clone());

        let updated = engine.handle_expiration(request.id).unwrap();
        assert_eq!(updated.status, ApprovalStatus::Pending);
        assert!(updated.expired_action_taken);
    }

    #[test]
    fn selection_honors_priority_conditions_and_default() {
        let store = ApprovalStore::new();
        let engine = WorkflowEngine::new(store.clone());

        let mut long_leave = workflow(ApprovalMode::All);
        long_leave.name = "Ferie lunghe".to_string();
        long_leave.is_default = false;
        long_leave.priority = 10;
        long_leave.conditions = Some(WorkflowConditions {
            min_days: Some(Decimal::from(10)),
            ..Default::default()
        });
        store.insert_config(long_leave.clone());

        let mut fallback = workflow(ApprovalMode::Any);
        fallback.name = "Standard".to_string();
        fallback.priority = 100;
        store.insert_config(fallback.clone());

        let selected = engine
            .select_workflow("LEAVE_REQUEST", &serde_json::json!({ "days": 15 }))
            .unwrap();
        assert_eq!(selected.id, long_leave.id);

        let selected = engine
            .select_workflow("LEAVE_REQUEST", &serde_json::json!({ "days": 3 }))
            .unwrap();
        assert_eq!(selected.id, fallback.id);

        // missing days field defaults to 0, failing the min_days predicate
        let selected = engine
            .select_workflow("LEAVE_REQUEST", &serde_json::json!({}))
            .unwrap();
        assert_eq!(selected.id, fallback.id);

        assert!(engine
            .select_workflow("EXPENSE", &serde_json::json!({}))
            .is_none());
    }

    #[test]
    fn membership_predicate_skips_missing_field() {
        let conditions = WorkflowConditions {
            entity_subtypes: Some(vec!["vacation".to_string()]),
            ..Default::default()
        };
        assert!(WorkflowEngine::conditions_match(
            Some(&conditions),
            &serde_json::json!({})
        ));
        assert!(WorkflowEngine::conditions_match(
            Some(&conditions),
            &serde_json::json!({ "leave_type": "vacation" })
        ));
        assert!(!WorkflowEngine::conditions_match(
            Some(&conditions),
            &serde_json::json!({ "subtype": "rol" })
        ));
    }
}

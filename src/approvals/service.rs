//! Approval service: coordinates the engine, the stores and the external
//! collaborators.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

use super::callbacks::{CallbackPayload, CallbackSender};
use super::engine::{ResolvedApprover, WorkflowEngine};
use super::models::*;
use super::repository::ApprovalStore;
use crate::clients::{
    AuditEntry, AuditSink, DirectoryClient, DirectoryUser, Notification, NotificationType, Notifier,
};
use crate::error::{CoreError, CoreResult};

const EXECUTIVE_TOKEN: &str = "EXECUTIVE_LEVEL:";
const DYNAMIC_DEPARTMENT_MANAGER: &str = "DYNAMIC:DEPARTMENT_MANAGER";
const DYNAMIC_SERVICE_COORDINATOR: &str = "DYNAMIC:SERVICE_COORDINATOR";

pub struct ApprovalService {
    store: Arc<ApprovalStore>,
    engine: WorkflowEngine,
    directory: Arc<dyn DirectoryClient>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    callback_sender: Arc<dyn CallbackSender>,
}

impl ApprovalService {
    pub fn new(
        store: Arc<ApprovalStore>,
        directory: Arc<dyn DirectoryClient>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
        callback_sender: Arc<dyn CallbackSender>,
    ) -> Self {
        Self {
            engine: WorkflowEngine::new(store.clone()),
            store,
            directory,
            notifier,
            audit,
            callback_sender,
        }
    }

    pub fn store(&self) -> &Arc<ApprovalStore> {
        &self.store
    }

    // ═══ Workflow configuration ═══

    pub fn create_workflow_config(
        &self,
        data: WorkflowConfigCreate,
        created_by: Option<Uuid>,
    ) -> CoreResult<WorkflowConfig> {
        data.validate()
            .map_err(|e| CoreError::validation(vec![e.to_string()], Vec::new()))?;

        let now = Utc::now();
        let config = WorkflowConfig {
            id: Uuid::new_v4(),
            entity_type: data.entity_type,
            name: data.name,
            description: data.description,
            min_approvers: data.min_approvers,
            max_approvers: data.max_approvers,
            approval_mode: data.approval_mode,
            approver_role_ids: data.approver_role_ids,
            auto_assign_approvers: data.auto_assign_approvers,
            allow_self_approval: data.allow_self_approval,
            expiration_hours: data.expiration_hours,
            expiration_action: data.expiration_action,
            escalation_role_id: data.escalation_role_id,
            reminder_hours_before: data.reminder_hours_before,
            send_reminders: data.send_reminders,
            conditions: data.conditions,
            priority: data.priority,
            is_active: data.is_active,
            is_default: data.is_default,
            target_role_ids: data.target_role_ids,
            created_by,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_config(config.clone());
        Ok(config)
    }

    pub fn get_workflow_config(&self, id: Uuid) -> CoreResult<WorkflowConfig> {
        self.store
            .get_config(id)
            .ok_or(CoreError::not_found("WorkflowConfig", id))
    }

    pub fn list_workflow_configs(
        &self,
        entity_type: Option<&str>,
        active_only: bool,
    ) -> Vec<WorkflowConfig> {
        self.store.list_configs(entity_type, active_only)
    }

    pub fn update_workflow_config(
        &self,
        id: Uuid,
        data: WorkflowConfigUpdate,
    ) -> CoreResult<WorkflowConfig> {
        let mut config = self.get_workflow_config(id)?;

        if let Some(name) = data.name {
            config.name = name;
        }
        if let Some(description) = data.description {
            config.description = Some(description);
        }
        if let Some(min_approvers) = data.min_approvers {
            if min_approvers < 1 {
                return Err(CoreError::validation(
                    vec!["min_approvers must be at least 1".to_string()],
                    Vec::new(),
                ));
            }
            config.min_approvers = min_approvers;
        }
        if let Some(max_approvers) = data.max_approvers {
            config.max_approvers = Some(max_approvers);
        }
        if let Some(mode) = data.approval_mode {
            config.approval_mode = mode;
        }
        if let Some(roles) = data.approver_role_ids {
            config.approver_role_ids = roles;
        }
        if let Some(auto) = data.auto_assign_approvers {
            config.auto_assign_approvers = auto;
        }
        if let Some(allow) = data.allow_self_approval {
            config.allow_self_approval = allow;
        }
        if let Some(hours) = data.expiration_hours {
            config.expiration_hours = Some(hours);
        }
        if let Some(action) = data.expiration_action {
            config.expiration_action = action;
        }
        if let Some(role) = data.escalation_role_id {
            config.escalation_role_id = Some(role);
        }
        if let Some(hours) = data.reminder_hours_before {
            config.reminder_hours_before = Some(hours);
        }
        if let Some(send) = data.send_reminders {
            config.send_reminders = send;
        }
        if let Some(conditions) = data.conditions {
            config.conditions = Some(conditions);
        }
        if let Some(priority) = data.priority {
            config.priority = priority;
        }
        if let Some(active) = data.is_active {
            config.is_active = active;
        }
        if let Some(default) = data.is_default {
            config.is_default = default;
        }
        if let Some(targets) = data.target_role_ids {
            config.target_role_ids = targets;
        }
        config.updated_at = Utc::now();

        self.store.update_config(config.clone())?;
        Ok(config)
    }

    pub fn deactivate_workflow_config(&self, id: Uuid) -> CoreResult<()> {
        self.store.deactivate_config(id)
    }

    // ═══ Request lifecycle ═══

    /// Creates an approval request: selects the workflow, assigns approvers,
    /// schedules reminders and notifies. An already-pending request for the
    /// same entity pair is returned as-is.
    pub async fn create_approval_request(
        &self,
        data: ApprovalRequestCreate,
    ) -> CoreResult<ApprovalRequest> {
        data.validate()
            .map_err(|e| CoreError::validation(vec![e.to_string()], Vec::new()))?;

        if let Some(existing) = self
            .store
            .pending_request_by_entity(&data.entity_type, data.entity_id)
        {
            warn!(
                entity_type = %data.entity_type,
                entity_id = %data.entity_id,
                "approval request already pending for entity"
            );
            return Ok(existing);
        }

        let workflow = match data.workflow_config_id {
            Some(id) => Some(self.get_workflow_config(id)?),
            None => self.engine.select_workflow(&data.entity_type, &data.metadata),
        };
        let workflow =
            workflow.ok_or_else(|| CoreError::NoWorkflowConfigured(data.entity_type.clone()))?;

        let now = Utc::now();
        let expires_at = workflow
            .expiration_hours
            .map(|hours| now + Duration::hours(hours));

        let mut request = ApprovalRequest {
            id: Uuid::new_v4(),
            entity_type: data.entity_type.clone(),
            entity_id: data.entity_id,
            entity_ref: data.entity_ref,
            workflow_config_id: workflow.id,
            requester_id: data.requester_id,
            requester_name: data.requester_name.clone(),
            title: data.title,
            description: data.description,
            request_metadata: data.metadata,
            callback_url: data.callback_url,
            status: ApprovalStatus::Pending,
            required_approvals: workflow.min_approvers,
            received_approvals: 0,
            received_rejections: 0,
            current_level: 1,
            max_level: 1,
            expires_at,
            expired_action_taken: false,
            resolved_at: None,
            resolution_notes: None,
            final_decision_by: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_request(request.clone());

        self.store.append_history(ApprovalHistory {
            id: Uuid::new_v4(),
            approval_request_id: request.id,
            action: HistoryAction::Created,
            actor_id: Some(data.requester_id),
            actor_name: data.requester_name,
            actor_type: ActorType::User,
            details: serde_json::Value::Null,
            created_at: now,
        });

        let exclude_self = if workflow.allow_self_approval {
            None
        } else {
            Some(data.requester_id)
        };

        // Resolution strategies, tried in order until approvers exist.
        let mut approvers: Vec<ResolvedApprover> = Vec::new();
        if !data.approver_ids.is_empty() {
            for id in &data.approver_ids {
                let name = self.get_user_degraded(*id).await.map(|u| u.full_name());
                approvers.push(ResolvedApprover {
                    id: *id,
                    name,
                    role: None,
                });
            }
        }
        if approvers.is_empty() && !workflow.approver_role_ids.is_empty() {
            approvers = self
                .fetch_approvers_by_roles(
                    &workflow.approver_role_ids,
                    data.requester_id,
                    exclude_self,
                )
                .await;
        }
        if approvers.is_empty() && workflow.auto_assign_approvers {
            approvers = self.fetch_approvers_by_flag(exclude_self).await;
        }

        if let Some(requester) = exclude_self {
            approvers.retain(|a| a.id != requester);
        }
        if let Some(max) = workflow.max_approvers {
            approvers.truncate(max as usize);
        }

        if approvers.is_empty() {
            // Operations' problem now: the request stays PENDING unassigned.
            warn!(request_id = %request.id, "no approvers resolved");
        } else {
            self.engine
                .assign_approvers(&mut request, &workflow, &approvers)?;
            let approver_ids: Vec<Uuid> = approvers.iter().map(|a| a.id).collect();
            self.engine
                .schedule_reminders(&request, &workflow, &approver_ids);
            self.notify_approvers(&request, &approver_ids).await;
        }

        self.audit
            .log_action(AuditEntry::new(
                Some(request.requester_id),
                "CREATE",
                "APPROVAL_REQUEST",
                request.id,
                format!("Created approval request for {}", request.entity_type),
            ))
            .await;

        Ok(request)
    }

    pub fn get_request(&self, id: Uuid) -> CoreResult<ApprovalRequest> {
        self.store
            .get_request(id)
            .ok_or(CoreError::not_found("ApprovalRequest", id))
    }

    pub fn get_request_by_entity(
        &self,
        entity_type: &str,
        entity_id: Uuid,
    ) -> Option<ApprovalRequest> {
        self.store.request_by_entity(entity_type, entity_id)
    }

    pub fn decisions_for_request(&self, request_id: Uuid) -> Vec<ApprovalDecision> {
        self.store.decisions_for_request(request_id)
    }

    pub fn history_for_request(&self, request_id: Uuid) -> Vec<ApprovalHistory> {
        self.store.history_for_request(request_id)
    }

    /// Cancels a PENDING request (the originating service withdrew it).
    pub async fn cancel_request(
        &self,
        request_id: Uuid,
        cancelled_by: Uuid,
        reason: Option<String>,
    ) -> CoreResult<ApprovalRequest> {
        let mut request = self.get_request(request_id)?;
        if request.status != ApprovalStatus::Pending {
            return Err(CoreError::rule(
                "NOT_PENDING",
                "only pending requests can be cancelled",
            ));
        }

        request.status = ApprovalStatus::Cancelled;
        request.resolved_at = Some(Utc::now());
        request.resolution_notes = reason.clone();
        self.store.update_request(request.clone())?;

        self.store.append_history(ApprovalHistory {
            id: Uuid::new_v4(),
            approval_request_id: request_id,
            action: HistoryAction::Cancelled,
            actor_id: Some(cancelled_by),
            actor_name: None,
            actor_type: ActorType::User,
            details: reason
                .map(|r| serde_json::json!({ "reason": r }))
                .unwrap_or(serde_json::Value::Null),
            created_at: Utc::now(),
        });

        self.store.delete_reminders_for_request(request_id);
        self.send_callback(&request).await;

        self.audit
            .log_action(AuditEntry::new(
                Some(cancelled_by),
                "CANCEL",
                "APPROVAL_REQUEST",
                request_id,
                "Cancelled approval request",
            ))
            .await;

        Ok(request)
    }

    // ═══ Approver actions ═══

    pub async fn approve(
        &self,
        request_id: Uuid,
        approver_id: Uuid,
        notes: Option<String>,
        override_authority: bool,
    ) -> CoreResult<ApprovalRequest> {
        self.decide(
            request_id,
            approver_id,
            DecisionType::Approved,
            notes,
            None,
            override_authority,
        )
        .await
    }

    pub async fn reject(
        &self,
        request_id: Uuid,
        approver_id: Uuid,
        notes: Option<String>,
        override_authority: bool,
    ) -> CoreResult<ApprovalRequest> {
        self.decide(
            request_id,
            approver_id,
            DecisionType::Rejected,
            notes,
            None,
            override_authority,
        )
        .await
    }

    /// Conditional approval; the condition rides on the request metadata and
    /// is forwarded in the callback payload.
    pub async fn approve_conditional(
        &self,
        request_id: Uuid,
        approver_id: Uuid,
        condition_type: String,
        condition_details: String,
        notes: Option<String>,
    ) -> CoreResult<ApprovalRequest> {
        let mut request = self.get_request(request_id)?;
        if let serde_json::Value::Object(map) = &mut request.request_metadata {
            map.insert(
                "condition_type".to_string(),
                serde_json::Value::String(condition_type.clone()),
            );
            map.insert(
                "condition_details".to_string(),
                serde_json::Value::String(condition_details.clone()),
            );
        } else {
            request.request_metadata = serde_json::json!({
                "condition_type": condition_type,
                "condition_details": condition_details,
            });
        }
        self.store.update_request(request)?;

        let combined = match notes {
            Some(notes) => format!("[CONDITION: {condition_type}] {condition_details}\n{notes}"),
            None => format!("[CONDITION: {condition_type}] {condition_details}"),
        };
        self.decide(
            request_id,
            approver_id,
            DecisionType::ApprovedConditional,
            Some(combined),
            None,
            false,
        )
        .await
    }

    /// Delegation: the original row records DELEGATED and a fresh pending
    /// row is inserted for the delegate at the same level.
    pub async fn delegate(
        &self,
        request_id: Uuid,
        approver_id: Uuid,
        delegate_to_id: Uuid,
        notes: Option<String>,
    ) -> CoreResult<ApprovalRequest> {
        let delegate_name = self
            .get_user_degraded(delegate_to_id)
            .await
            .map(|u| u.full_name());

        let level = self
            .store
            .decision_for_approver(request_id, approver_id)
            .map(|d| d.approval_level)
            .unwrap_or(1);

        let request = self
            .decide(
                request_id,
                approver_id,
                DecisionType::Delegated,
                notes,
                Some((delegate_to_id, delegate_name.clone())),
                false,
            )
            .await?;

        self.store.insert_decision(ApprovalDecision {
            id: Uuid::new_v4(),
            approval_request_id: request_id,
            approver_id: delegate_to_id,
            approver_name: delegate_name,
            approver_role: None,
            approval_level: level,
            decision: None,
            decision_notes: None,
            delegated_to_id: None,
            delegated_to_name: None,
            assigned_at: Utc::now(),
            decided_at: None,
        });

        self.notify_approvers(&request, &[delegate_to_id]).await;
        Ok(request)
    }

    async fn decide(
        &self,
        request_id: Uuid,
        approver_id: Uuid,
        decision_type: DecisionType,
        notes: Option<String>,
        delegated_to: Option<(Uuid, Option<String>)>,
        override_authority: bool,
    ) -> CoreResult<ApprovalRequest> {
        let outcome = self.engine.process_decision(
            request_id,
            approver_id,
            decision_type,
            notes,
            delegated_to,
            override_authority,
        )?;

        self.audit
            .log_action(AuditEntry::new(
                Some(approver_id),
                "DECIDE",
                "APPROVAL_REQUEST",
                request_id,
                format!("Recorded decision {:?}", decision_type),
            ))
            .await;

        if outcome.resolved {
            self.send_callback(&outcome.request).await;
        }
        Ok(outcome.request)
    }

    // ═══ Dashboards ═══

    pub fn get_pending_approvals(
        &self,
        approver_id: Uuid,
        entity_type: Option<&str>,
        include_all: bool,
    ) -> PendingApprovalsResponse {
        let requests = if include_all {
            self.store.all_pending(entity_type)
        } else {
            self.store.pending_for_approver(approver_id, entity_type)
        };

        let now = Utc::now();
        let mut items = Vec::with_capacity(requests.len());
        let mut urgent_count = 0;

        for request in requests {
            let is_urgent = request
                .expires_at
                .map_or(false, |at| at - now < Duration::hours(24));
            if is_urgent {
                urgent_count += 1;
            }
            items.push(PendingApprovalItem {
                request_id: request.id,
                entity_type: request.entity_type,
                entity_id: request.entity_id,
                entity_ref: request.entity_ref,
                title: request.title,
                description: request.description,
                requester_name: request.requester_name,
                approval_level: request.current_level,
                is_urgent,
                expires_at: request.expires_at,
                days_pending: (now - request.created_at).num_days(),
                created_at: request.created_at,
            });
        }

        PendingApprovalsResponse {
            total: items.len(),
            urgent_count,
            items,
        }
    }

    pub fn get_pending_count(&self, approver_id: Uuid) -> usize {
        self.store.pending_for_approver(approver_id, None).len()
    }

    pub fn get_archived_approvals(
        &self,
        approver_id: Uuid,
        entity_type: Option<&str>,
    ) -> Vec<ArchivedApprovalItem> {
        self.store
            .decided_by_approver(approver_id, entity_type)
            .into_iter()
            .filter_map(|(decision, request)| {
                Some(ArchivedApprovalItem {
                    request_id: request.id,
                    entity_type: request.entity_type,
                    entity_id: request.entity_id,
                    title: request.title,
                    requester_name: request.requester_name,
                    decision: decision.decision?,
                    decision_notes: decision.decision_notes,
                    decided_at: decision.decided_at,
                    created_at: request.created_at,
                })
            })
            .collect()
    }

    pub fn check_approval_status(&self, entity_type: &str, entity_id: Uuid) -> ApprovalStatusCheck {
        match self.store.request_by_entity(entity_type, entity_id) {
            None => ApprovalStatusCheck {
                entity_type: entity_type.to_string(),
                entity_id,
                has_pending_request: false,
                approval_request_id: None,
                status: None,
                required_approvals: None,
                received_approvals: None,
            },
            Some(request) => ApprovalStatusCheck {
                entity_type: entity_type.to_string(),
                entity_id,
                has_pending_request: request.status == ApprovalStatus::Pending,
                approval_request_id: Some(request.id),
                status: Some(request.status),
                required_approvals: Some(request.required_approvals),
                received_approvals: Some(request.received_approvals),
            },
        }
    }

    // ═══ Scheduled sweeps ═══

    /// Expiration sweep: applies each workflow's expiration action to due
    /// requests, at most `limit` per tick.
    pub async fn run_expiration_sweep(&self, limit: usize) -> usize {
        let due = self.store.expiring_requests(Utc::now(), limit);
        let mut processed = 0;

        for request in due {
            match self.engine.handle_expiration(request.id) {
                Ok(updated) => {
                    processed += 1;
                    match updated.status {
                        ApprovalStatus::Escalated => {
                            if let Err(err) = self.escalate(&updated).await {
                                error!(request_id = %updated.id, error = %err, "escalation failed");
                            }
                        }
                        ApprovalStatus::Pending => {
                            // NOTIFY_ONLY: one reminder per pending approver.
                            let pending = self.store.pending_decisions_for_request(updated.id);
                            for decision in pending {
                                self.notifier
                                    .notify(
                                        Notification::new(
                                            decision.approver_id,
                                            NotificationType::ApprovalReminder,
                                            "Approvazione in Scadenza",
                                            format!(
                                                "La richiesta '{}' è scaduta senza decisione.",
                                                updated.title
                                            ),
                                        )
                                        .with_data(serde_json::json!({
                                            "approval_request_id": updated.id,
                                        })),
                                    )
                                    .await;
                            }
                        }
                        _ => self.send_callback(&updated).await,
                    }
                }
                Err(err) => {
                    error!(request_id = %request.id, error = %err, "expiration handling failed");
                }
            }
        }
        processed
    }

    /// Re-assigns approvers from the escalation role and restarts the
    /// expiration window.
    async fn escalate(&self, request: &ApprovalRequest) -> CoreResult<()> {
        let workflow = self.get_workflow_config(request.workflow_config_id)?;
        let Some(escalation_role) = workflow.escalation_role_id else {
            warn!(request_id = %request.id, "escalation requested without escalation role");
            return Ok(());
        };

        let escalation_token = escalation_role.to_string();
        let approvers = self
            .fetch_approvers_by_roles(&[escalation_token], request.requester_id, None)
            .await;

        let mut request = request.clone();
        if approvers.is_empty() {
            warn!(request_id = %request.id, "no escalation approvers resolved");
        } else {
            self.engine
                .assign_approvers(&mut request, &workflow, &approvers)?;
        }

        request.status = ApprovalStatus::Pending;
        request.expires_at = workflow
            .expiration_hours
            .map(|hours| Utc::now() + Duration::hours(hours));
        request.expired_action_taken = false;
        self.store.update_request(request.clone())?;

        self.store.append_history(ApprovalHistory {
            id: Uuid::new_v4(),
            approval_request_id: request.id,
            action: HistoryAction::Escalated,
            actor_id: None,
            actor_name: None,
            actor_type: ActorType::Scheduler,
            details: serde_json::json!({ "escalation_role_id": escalation_role }),
            created_at: Utc::now(),
        });

        let approver_ids: Vec<Uuid> = approvers.iter().map(|a| a.id).collect();
        self.engine
            .schedule_reminders(&request, &workflow, &approver_ids);
        self.notify_approvers(&request, &approver_ids).await;
        Ok(())
    }

    /// Reminder dispatch: notifies approvers of due reminders, skipping
    /// requests that are no longer pending.
    pub async fn run_reminder_sweep(&self, limit: usize) -> usize {
        let due = self.store.due_reminders(Utc::now(), limit);
        let mut sent = 0;

        for reminder in due {
            let request = self.store.get_request(reminder.approval_request_id);
            match request {
                Some(request) if request.status == ApprovalStatus::Pending => {
                    let (title, message) = match reminder.reminder_type {
                        ReminderType::Final => (
                            "Approvazione in Scadenza!",
                            format!("La richiesta '{}' scade tra poco. Agisci subito.", request.title),
                        ),
                        ReminderType::First => (
                            "Promemoria Approvazione",
                            format!("Hai una richiesta in attesa: {}", request.title),
                        ),
                    };
                    self.notifier
                        .notify(
                            Notification::new(
                                reminder.approver_id,
                                NotificationType::ApprovalReminder,
                                title,
                                message,
                            )
                            .with_data(serde_json::json!({
                                "approval_request_id": request.id,
                                "reminder_type": reminder.reminder_type,
                            })),
                        )
                        .await;
                    self.store.mark_reminder_sent(reminder.id);
                    sent += 1;
                }
                _ => {
                    // Resolved under us; just mark it.
                    self.store.mark_reminder_sent(reminder.id);
                }
            }
        }
        sent
    }

    /// Retention cleanup: purges requests resolved before the window.
    pub fn cleanup_old_requests(&self, retention_days: i64) -> usize {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let old = self.store.resolved_before(cutoff);
        let count = old.len();
        for request in old {
            self.store.purge_request(request.id);
        }
        if count > 0 {
            info!(count, "purged old approval requests");
        }
        count
    }

    // ═══ Approver resolution ═══

    /// Directory lookups retry once with a short backoff, then degrade to
    /// an empty result; the request is still created.
    async fn get_users_degraded(&self) -> Vec<DirectoryUser> {
        match self.directory.get_users(None).await {
            Ok(users) => users,
            Err(err) => {
                warn!(error = %err, "directory unavailable, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                self.directory.get_users(None).await.unwrap_or_default()
            }
        }
    }

    async fn get_user_degraded(&self, id: Uuid) -> Option<DirectoryUser> {
        match self.directory.get_user(id).await {
            Ok(user) => user,
            Err(err) => {
                warn!(error = %err, "directory unavailable, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                self.directory.get_user(id).await.ok().flatten()
            }
        }
    }

    /// Resolves role tokens: static role ids, `EXECUTIVE_LEVEL:<id>`, and
    /// the `DYNAMIC:` organizational relations of the requester.
    async fn fetch_approvers_by_roles(
        &self,
        role_tokens: &[String],
        requester_id: Uuid,
        exclude_user: Option<Uuid>,
    ) -> Vec<ResolvedApprover> {
        let mut static_roles = Vec::new();
        let mut executive_levels = Vec::new();
        let mut dynamic_roles = Vec::new();

        for token in role_tokens {
            if let Some(level) = token.strip_prefix(EXECUTIVE_TOKEN) {
                if let Ok(id) = level.parse::<Uuid>() {
                    executive_levels.push(id);
                }
            } else if token.starts_with("DYNAMIC:") {
                dynamic_roles.push(token.as_str());
            } else if let Ok(id) = token.parse::<Uuid>() {
                static_roles.push(id);
            }
        }

        let mut approvers: Vec<ResolvedApprover> = Vec::new();
        let mut seen: Vec<Uuid> = Vec::new();

        if !static_roles.is_empty() || !executive_levels.is_empty() {
            for user in self.get_users_degraded().await {
                if exclude_user == Some(user.id) || seen.contains(&user.id) {
                    continue;
                }
                let role_match = static_roles.iter().any(|r| user.has_role(*r));
                let exec_match = user
                    .executive_level_id
                    .map_or(false, |lvl| executive_levels.contains(&lvl));
                if role_match || exec_match {
                    seen.push(user.id);
                    approvers.push(ResolvedApprover {
                        id: user.id,
                        name: Some(user.full_name()),
                        role: if exec_match && !role_match {
                            Some("Executive".to_string())
                        } else {
                            user.roles.first().map(|r| r.name.clone())
                        },
                    });
                }
            }
        }

        if !dynamic_roles.is_empty() {
            if let Some(requester) = self.get_user_degraded(requester_id).await {
                for token in dynamic_roles {
                    let (target, role_name) = match token {
                        DYNAMIC_DEPARTMENT_MANAGER => {
                            let manager = match requester.department_id {
                                Some(dept_id) => self
                                    .directory
                                    .get_department(dept_id)
                                    .await
                                    .ok()
                                    .flatten()
                                    .and_then(|d| d.manager_id),
                                None => None,
                            };
                            (manager, "Department Manager")
                        }
                        DYNAMIC_SERVICE_COORDINATOR => {
                            let coordinator = match requester.service_id {
                                Some(srv_id) => self
                                    .directory
                                    .get_service(srv_id)
                                    .await
                                    .ok()
                                    .flatten()
                                    .and_then(|s| s.coordinator_id),
                                None => None,
                            };
                            (coordinator, "Service Coordinator")
                        }
                        other => {
                            warn!(token = other, "unknown dynamic role token");
                            (None, "")
                        }
                    };

                    if let Some(target_id) = target {
                        if exclude_user == Some(target_id) || seen.contains(&target_id) {
                            continue;
                        }
                        let name = self
                            .get_user_degraded(target_id)
                            .await
                            .map(|u| u.full_name());
                        seen.push(target_id);
                        approvers.push(ResolvedApprover {
                            id: target_id,
                            name,
                            role: Some(role_name.to_string()),
                        });
                    }
                }
            }
        }

        approvers
    }

    /// Capability-flag fallback: everyone the directory marks as approver.
    async fn fetch_approvers_by_flag(&self, exclude_user: Option<Uuid>) -> Vec<ResolvedApprover> {
        let users = match self.directory.get_approvers().await {
            Ok(users) => users,
            Err(err) => {
                warn!(error = %err, "directory unavailable, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                self.directory.get_approvers().await.unwrap_or_default()
            }
        };

        users
            .into_iter()
            .filter(|u| exclude_user != Some(u.id))
            .map(|u| ResolvedApprover {
                id: u.id,
                name: Some(u.full_name()),
                role: Some("Approver".to_string()),
            })
            .collect()
    }

    // ═══ Notifications & callback ═══

    async fn notify_approvers(&self, request: &ApprovalRequest, approver_ids: &[Uuid]) {
        for approver_id in approver_ids {
            // The requester already got a submission notification from the
            // originating service.
            if *approver_id == request.requester_id {
                continue;
            }
            self.notifier
                .notify(
                    Notification::new(
                        *approver_id,
                        NotificationType::ApprovalRequest,
                        "Nuova Approvazione Richiesta",
                        format!("Hai una nuova richiesta da approvare: {}", request.title),
                    )
                    .with_data(serde_json::json!({
                        "approval_request_id": request.id,
                        "entity_type": request.entity_type,
                        "entity_id": request.entity_id,
                    })),
                )
                .await;
        }
    }

    async fn send_callback(&self, request: &ApprovalRequest) {
        let Some(url) = &request.callback_url else {
            return;
        };
        let decisions = self.store.decisions_for_request(request.id);
        let payload = CallbackPayload::from_request(request, decisions);
        self.callback_sender.send(url, &payload).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approvals::callbacks::RecordingCallbackSender;
    use crate::clients::{
        DepartmentInfo, InMemoryDirectory, InMemoryNotifier, RoleRef, TracingAuditSink,
    };

    struct Fixture {
        service: ApprovalService,
        directory: Arc<InMemoryDirectory>,
        notifier: Arc<InMemoryNotifier>,
        callbacks: Arc<RecordingCallbackSender>,
    }

    fn fixture() -> Fixture {
        let directory = InMemoryDirectory::new();
        let notifier = InMemoryNotifier::new();
        let callbacks = Arc::new(RecordingCallbackSender::new());
        let service = ApprovalService::new(
            ApprovalStore::new(),
            directory.clone(),
            notifier.clone(),
            TracingAuditSink::new(),
            callbacks.clone(),
        );
        Fixture {
            service,
            directory,
            notifier,
            callbacks,
        }
    }

    fn user(directory: &InMemoryDirectory, is_approver: bool) -> DirectoryUser {
        let user = DirectoryUser {
            id: Uuid::new_v4(),
            first_name: "Mario".to_string(),
            last_name: "Rossi".to_string(),
            email: "mario.rossi@example.it".to_string(),
            is_active: true,
            is_approver,
            executive_level_id: None,
            department_id: None,
            service_id: None,
            manager_id: None,
            roles: Vec::new(),
        };
        directory.insert_user(user.clone());
        user
    }

    fn workflow_create(mode: ApprovalMode) -> WorkflowConfigCreate {
        WorkflowConfigCreate {
            entity_type: "LEAVE_REQUEST".to_string(),
            name: "Standard".to_string(),
            description: None,
            min_approvers: 1,
            max_approvers: None,
            approval_mode: mode,
            approver_role_ids: Vec::new(),
            auto_assign_approvers: true,
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
        }
    }

    fn request_create(requester_id: Uuid) -> ApprovalRequestCreate {
        ApprovalRequestCreate {
            entity_type: "LEAVE_REQUEST".to_string(),
            entity_id: Uuid::new_v4(),
            entity_ref: None,
            workflow_config_id: None,
            requester_id,
            requester_name: Some("Luca Bianchi".to_string()),
            title: "Ferie agosto".to_string(),
            description: None,
            metadata: serde_json::json!({ "days": 5, "leave_type": "vacation" }),
            callback_url: Some("http://leaves.internal/approval-callback".to_string()),
            approver_ids: Vec::new(),
        }
    }

    #[tokio::test]
    async fn create_assigns_flag_approvers_and_notifies() {
        let fx = fixture();
        fx.service
            .create_workflow_config(workflow_create(ApprovalMode::Any), None)
            .unwrap();

        let requester = user(&fx.directory, false);
        let approver = user(&fx.directory, true);

        let request = fx
            .service
            .create_approval_request(request_create(requester.id))
            .await
            .unwrap();

        assert_eq!(request.status, ApprovalStatus::Pending);
        assert_eq!(request.required_approvals, 1);
        let decisions = fx.service.decisions_for_request(request.id);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].approver_id, approver.id);

        let notified = fx.notifier.sent_of_type(NotificationType::ApprovalRequest);
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].user_id, approver.id);
    }

    #[tokio::test]
    async fn requester_excluded_without_self_approval() {
        let fx = fixture();
        fx.service
            .create_workflow_config(workflow_create(ApprovalMode::Any), None)
            .unwrap();

        let requester = user(&fx.directory, true); // approver flag set, but requester
        let other = user(&fx.directory, true);

        let request = fx
            .service
            .create_approval_request(request_create(requester.id))
            .await
            .unwrap();

        let decisions = fx.service.decisions_for_request(request.id);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].approver_id, other.id);
    }

    #[tokio::test]
    async fn static_role_and_executive_tokens_resolve() {
        let fx = fixture();
        let role_id = Uuid::new_v4();
        let exec_level = Uuid::new_v4();

        let mut data = workflow_create(ApprovalMode::All);
        data.auto_assign_approvers = false;
        data.approver_role_ids = vec![
            role_id.to_string(),
            format!("EXECUTIVE_LEVEL:{exec_level}"),
        ];
        fx.service.create_workflow_config(data, None).unwrap();

        let requester = user(&fx.directory, false);
        let mut role_holder = user(&fx.directory, false);
        role_holder.roles = vec![RoleRef {
            id: role_id,
            name: "HR Manager".to_string(),
        }];
        fx.directory.insert_user(role_holder.clone());
        let mut exec = user(&fx.directory, false);
        exec.executive_level_id = Some(exec_level);
        fx.directory.insert_user(exec.clone());

        let request = fx
            .service
            .create_approval_request(request_create(requester.id))
            .await
            .unwrap();

        let decisions = fx.service.decisions_for_request(request.id);
        let ids: Vec<Uuid> = decisions.iter().map(|d| d.approver_id).collect();
        assert_eq!(decisions.len(), 2);
        assert!(ids.contains(&role_holder.id));
        assert!(ids.contains(&exec.id));
        assert_eq!(request.required_approvals, 2);
    }

    #[tokio::test]
    async fn dynamic_department_manager_resolves() {
        let fx = fixture();
        let mut data = workflow_create(ApprovalMode::Any);
        data.auto_assign_approvers = false;
        data.approver_role_ids = vec!["DYNAMIC:DEPARTMENT_MANAGER".to_string()];
        fx.service.create_workflow_config(data, None).unwrap();

        let manager = user(&fx.directory, false);
        let dept = DepartmentInfo {
            id: Uuid::new_v4(),
            name: "Amministrazione".to_string(),
            manager_id: Some(manager.id),
        };
        fx.directory.insert_department(dept.clone());
        let mut requester = user(&fx.directory, false);
        requester.department_id = Some(dept.id);
        fx.directory.insert_user(requester.clone());

        let request = fx
            .service
            .create_approval_request(request_create(requester.id))
            .await
            .unwrap();

        let decisions = fx.service.decisions_for_request(request.id);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].approver_id, manager.id);
        assert_eq!(decisions[0].approver_role.as_deref(), Some("Department Manager"));
    }

    #[tokio::test]
    async fn no_approvers_leaves_request_pending_unassigned() {
        let fx = fixture();
        let mut data = workflow_create(ApprovalMode::Any);
        data.auto_assign_approvers = false;
        fx.service.create_workflow_config(data, None).unwrap();

        let requester = user(&fx.directory, false);
        let request = fx
            .service
            .create_approval_request(request_create(requester.id))
            .await
            .unwrap();

        assert_eq!(request.status, ApprovalStatus::Pending);
        assert!(fx.service.decisions_for_request(request.id).is_empty());
    }

    #[tokio::test]
    async fn duplicate_pending_entity_returns_existing() {
        let fx = fixture();
        fx.service
            .create_workflow_config(workflow_create(ApprovalMode::Any), None)
            .unwrap();
        let requester = user(&fx.directory, false);
        user(&fx.directory, true);

        let mut create = request_create(requester.id);
        create.entity_id = Uuid::new_v4();
        let first = fx
            .service
            .create_approval_request(create.clone())
            .await
            .unwrap();
        let second = fx.service.create_approval_request(create).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn missing_workflow_is_fatal() {
        let fx = fixture();
        let requester = user(&fx.directory, false);
        let err = fx
            .service
            .create_approval_request(request_create(requester.id))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NoWorkflowConfigured(_)));
    }

    #[tokio::test]
    async fn conditional_resolution_carries_condition_in_callback() {
        let fx = fixture();
        fx.service
            .create_workflow_config(workflow_create(ApprovalMode::Any), None)
            .unwrap();
        let requester = user(&fx.directory, false);
        let approver = user(&fx.directory, true);
        user(&fx.directory, true);

        let request = fx
            .service
            .create_approval_request(request_create(requester.id))
            .await
            .unwrap();

        let updated = fx
            .service
            .approve_conditional(
                request.id,
                approver.id,
                "RIC".to_string(),
                "rientro 10/08".to_string(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(updated.status, ApprovalStatus::ApprovedConditional);
        let sent = fx.callbacks.sent();
        assert_eq!(sent.len(), 1);
        let (_, payload) = &sent[0];
        assert_eq!(payload.status, ApprovalStatus::ApprovedConditional);
        assert_eq!(payload.condition_type.as_deref(), Some("RIC"));
        assert_eq!(payload.condition_details.as_deref(), Some("rientro 10/08"));
    }

    #[tokio::test]
    async fn expiration_sweep_auto_approves_and_calls_back_once() {
        let fx = fixture();
        let mut data = workflow_create(ApprovalMode::Any);
        data.expiration_hours = Some(1);
        data.expiration_action = ExpirationAction::AutoApprove;
        fx.service.create_workflow_config(data, None).unwrap();

        let requester = user(&fx.directory, false);
        user(&fx.directory, true);
        let request = fx
            .service
            .create_approval_request(request_create(requester.id))
            .await
            .unwrap();

        // Force past expiry.
        let mut row = fx.service.get_request(request.id).unwrap();
        row.expires_at = Some(Utc::now() - Duration::hours(1));
        fx.service.store().update_request(row).unwrap();

        assert_eq!(fx.service.run_expiration_sweep(100).await, 1);
        let resolved = fx.service.get_request(request.id).unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert!(resolved.expired_action_taken);
        assert_eq!(fx.callbacks.sent().len(), 1);
        assert_eq!(fx.callbacks.sent()[0].1.status, ApprovalStatus::Approved);

        // Second sweep is a no-op.
        assert_eq!(fx.service.run_expiration_sweep(100).await, 0);
        assert_eq!(fx.callbacks.sent().len(), 1);
    }

    #[tokio::test]
    async fn escalation_reassigns_and_restarts_window() {
        let fx = fixture();
        let escalation_role = Uuid::new_v4();
        let mut data = workflow_create(ApprovalMode::Any);
        data.expiration_hours = Some(1);
        data.expiration_action = ExpirationAction::Escalate;
        data.escalation_role_id = Some(escalation_role);
        fx.service.create_workflow_config(data, None).unwrap();

        let requester = user(&fx.directory, false);
        user(&fx.directory, true);
        let mut boss = user(&fx.directory, false);
        boss.roles = vec![RoleRef {
            id: escalation_role,
            name: "Direttore".to_string(),
        }];
        fx.directory.insert_user(boss.clone());

        let request = fx
            .service
            .create_approval_request(request_create(requester.id))
            .await
            .unwrap();

        let mut row = fx.service.get_request(request.id).unwrap();
        row.expires_at = Some(Utc::now() - Duration::hours(1));
        fx.service.store().update_request(row).unwrap();

        fx.service.run_expiration_sweep(100).await;

        let escalated = fx.service.get_request(request.id).unwrap();
        assert_eq!(escalated.status, ApprovalStatus::Pending);
        assert!(!escalated.expired_action_taken);
        assert!(escalated.expires_at.unwrap() > Utc::now());
        let approver_ids: Vec<Uuid> = fx
            .service
            .decisions_for_request(request.id)
            .iter()
            .filter(|d| d.decision.is_none())
            .map(|d| d.approver_id)
            .collect();
        assert!(approver_ids.contains(&boss.id));
    }

    #[tokio::test]
    async fn reminder_sweep_skips_resolved_requests() {
        let fx = fixture();
        let mut data = workflow_create(ApprovalMode::Any);
        data.reminder_hours_before = Some(48);
        fx.service.create_workflow_config(data, None).unwrap();

        let requester = user(&fx.directory, false);
        let approver = user(&fx.directory, true);
        let request = fx
            .service
            .create_approval_request(request_create(requester.id))
            .await
            .unwrap();

        // Reminder scheduled 48 h before a 24 h expiry lands in the past and
        // is immediately due.
        assert_eq!(fx.service.run_reminder_sweep(100).await, 0);

        // Make one due manually.
        let reminders = fx.service.store().reminders_for_request(request.id);
        assert!(!reminders.is_empty());
        for mut reminder in reminders {
            reminder.scheduled_at = Utc::now() - Duration::minutes(5);
            fx.service.store().insert_reminders(vec![reminder]);
        }

        let sent = fx.service.run_reminder_sweep(100).await;
        assert!(sent >= 1);
        assert!(!fx
            .notifier
            .sent_of_type(NotificationType::ApprovalReminder)
            .is_empty());

        // Approve, then remaining reminders are deleted.
        fx.service
            .approve(request.id, approver.id, None, false)
            .await
            .unwrap();
        assert!(fx.service.store().reminders_for_request(request.id).is_empty());
    }

    #[tokio::test]
    async fn delegation_inserts_row_for_delegate() {
        let fx = fixture();
        fx.service
            .create_workflow_config(workflow_create(ApprovalMode::All), None)
            .unwrap();
        let requester = user(&fx.directory, false);
        let approver = user(&fx.directory, true);
        let delegate = user(&fx.directory, false);

        let request = fx
            .service
            .create_approval_request(request_create(requester.id))
            .await
            .unwrap();

        fx.service
            .delegate(request.id, approver.id, delegate.id, None)
            .await
            .unwrap();

        let decisions = fx.service.decisions_for_request(request.id);
        assert_eq!(decisions.len(), 2);
        let delegated = decisions
            .iter()
            .find(|d| d.decision == Some(DecisionType::Delegated))
            .unwrap();
        assert_eq!(delegated.delegated_to_id, Some(delegate.id));
        assert!(decisions
            .iter()
            .any(|d| d.approver_id == delegate.id && d.decision.is_none()));

        // Delegate decides and the request resolves.
        let updated = fx
            .service
            .approve(request.id, delegate.id, None, false)
            .await
            .unwrap();
        assert_eq!(updated.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn cancel_pending_fires_callback() {
        let fx = fixture();
        fx.service
            .create_workflow_config(workflow_create(ApprovalMode::Any), None)
            .unwrap();
        let requester = user(&fx.directory, false);
        user(&fx.directory, true);

        let request = fx
            .service
            .create_approval_request(request_create(requester.id))
            .await
            .unwrap();

        let cancelled = fx
            .service
            .cancel_request(request.id, requester.id, Some("ritirata".to_string()))
            .await
            .unwrap();
        assert_eq!(cancelled.status, ApprovalStatus::Cancelled);
        assert_eq!(fx.callbacks.sent().len(), 1);
        assert!(fx.service.store().reminders_for_request(request.id).is_empty());

        let err = fx
            .service
            .cancel_request(request.id, requester.id, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::BusinessRuleViolation { rule: "NOT_PENDING", .. }
        ));
    }

    #[tokio::test]
    async fn pending_dashboard_flags_urgency() {
        let fx = fixture();
        let mut data = workflow_create(ApprovalMode::Any);
        data.expiration_hours = Some(4); // urgent: expires within 24 h
        fx.service.create_workflow_config(data, None).unwrap();

        let requester = user(&fx.directory, false);
        let approver = user(&fx.directory, true);
        fx.service
            .create_approval_request(request_create(requester.id))
            .await
            .unwrap();

        let pending = fx.service.get_pending_approvals(approver.id, None, false);
        assert_eq!(pending.total, 1);
        assert_eq!(pending.urgent_count, 1);
        assert_eq!(fx.service.get_pending_count(approver.id), 1);

        // After deciding, the archived view picks it up.
        let item = &pending.items[0];
        fx.service
            .approve(item.request_id, approver.id, Some("ok".to_string()), false)
            .await
            .unwrap();
        let archived = fx.service.get_archived_approvals(approver.id, None);
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].decision, DecisionType::Approved);
    }
}

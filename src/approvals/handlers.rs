//! Approval REST API handlers.
//!
//! Thin shell over `ApprovalService`; the caller identity arrives already
//! authenticated in the request body.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::models::*;
use super::service::ApprovalService;
use crate::error::CoreError;

/// API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// HTTP status for a core error.
pub fn error_status(err: &CoreError) -> StatusCode {
    match err {
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::Conflict { .. } => StatusCode::CONFLICT,
        CoreError::ValidationFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::BusinessRuleViolation { .. } => StatusCode::BAD_REQUEST,
        CoreError::NoWorkflowConfigured(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::ExternalUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn failure<T: Serialize>(err: CoreError) -> (StatusCode, Json<ApiResponse<T>>) {
    (error_status(&err), Json(ApiResponse::error(err.to_string())))
}

/// Shared approvals state.
#[derive(Clone)]
pub struct ApprovalAppState {
    pub service: Arc<ApprovalService>,
}

// ─── Workflow configuration ───

/// POST /api/v1/approvals/config
pub async fn create_config(
    State(state): State<ApprovalAppState>,
    Json(data): Json<WorkflowConfigCreate>,
) -> impl IntoResponse {
    match state.service.create_workflow_config(data, None) {
        Ok(config) => (StatusCode::CREATED, Json(ApiResponse::success(config))),
        Err(err) => failure(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfigListQuery {
    pub entity_type: Option<String>,
    pub active_only: Option<bool>,
}

/// GET /api/v1/approvals/config
pub async fn list_configs(
    State(state): State<ApprovalAppState>,
    Query(query): Query<ConfigListQuery>,
) -> impl IntoResponse {
    let configs = state
        .service
        .list_workflow_configs(query.entity_type.as_deref(), query.active_only.unwrap_or(true));
    Json(ApiResponse::success(configs))
}

/// GET /api/v1/approvals/config/:id
pub async fn get_config(
    State(state): State<ApprovalAppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.service.get_workflow_config(id) {
        Ok(config) => (StatusCode::OK, Json(ApiResponse::success(config))),
        Err(err) => failure(err),
    }
}

/// PUT /api/v1/approvals/config/:id
pub async fn update_config(
    State(state): State<ApprovalAppState>,
    Path(id): Path<Uuid>,
    Json(data): Json<WorkflowConfigUpdate>,
) -> impl IntoResponse {
    match state.service.update_workflow_config(id, data) {
        Ok(config) => (StatusCode::OK, Json(ApiResponse::success(config))),
        Err(err) => failure(err),
    }
}

/// DELETE /api/v1/approvals/config/:id (soft deactivation)
pub async fn deactivate_config(
    State(state): State<ApprovalAppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.service.deactivate_workflow_config(id) {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::success(()))),
        Err(err) => failure(err),
    }
}

// ─── Requests ───

/// POST /api/v1/approvals/requests
pub async fn create_request(
    State(state): State<ApprovalAppState>,
    Json(data): Json<ApprovalRequestCreate>,
) -> impl IntoResponse {
    match state.service.create_approval_request(data).await {
        Ok(request) => (StatusCode::CREATED, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

/// GET /api/v1/approvals/requests/:id
pub async fn get_request(
    State(state): State<ApprovalAppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.service.get_request(id) {
        Ok(request) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

/// GET /api/v1/approvals/entity/:entity_type/:entity_id/status
pub async fn check_status(
    State(state): State<ApprovalAppState>,
    Path((entity_type, entity_id)): Path<(String, Uuid)>,
) -> impl IntoResponse {
    Json(ApiResponse::success(
        state.service.check_approval_status(&entity_type, entity_id),
    ))
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub approver_id: Uuid,
    pub notes: Option<String>,
    #[serde(default)]
    pub override_authority: bool,
}

/// POST /api/v1/approvals/requests/:id/approve
pub async fn approve(
    State(state): State<ApprovalAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<DecisionBody>,
) -> impl IntoResponse {
    match state
        .service
        .approve(id, body.approver_id, body.notes, body.override_authority)
        .await
    {
        Ok(request) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

/// POST /api/v1/approvals/requests/:id/reject
pub async fn reject(
    State(state): State<ApprovalAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<DecisionBody>,
) -> impl IntoResponse {
    match state
        .service
        .reject(id, body.approver_id, body.notes, body.override_authority)
        .await
    {
        Ok(request) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct ConditionalBody {
    pub approver_id: Uuid,
    pub condition_type: String,
    pub condition_details: String,
    pub notes: Option<String>,
}

/// POST /api/v1/approvals/requests/:id/approve-conditional
pub async fn approve_conditional(
    State(state): State<ApprovalAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ConditionalBody>,
) -> impl IntoResponse {
    match state
        .service
        .approve_conditional(
            id,
            body.approver_id,
            body.condition_type,
            body.condition_details,
            body.notes,
        )
        .await
    {
        Ok(request) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct DelegateBody {
    pub approver_id: Uuid,
    pub delegate_to_id: Uuid,
    pub notes: Option<String>,
}

/// POST /api/v1/approvals/requests/:id/delegate
pub async fn delegate(
    State(state): State<ApprovalAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<DelegateBody>,
) -> impl IntoResponse {
    match state
        .service
        .delegate(id, body.approver_id, body.delegate_to_id, body.notes)
        .await
    {
        Ok(request) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub cancelled_by: Uuid,
    pub reason: Option<String>,
}

/// POST /api/v1/approvals/requests/:id/cancel
pub async fn cancel(
    State(state): State<ApprovalAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelBody>,
) -> impl IntoResponse {
    match state
        .service
        .cancel_request(id, body.cancelled_by, body.reason)
        .await
    {
        Ok(request) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

// ─── Dashboards ───

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub entity_type: Option<String>,
    #[serde(default)]
    pub include_all: bool,
}

/// GET /api/v1/approvals/pending/:approver_id
pub async fn pending(
    State(state): State<ApprovalAppState>,
    Path(approver_id): Path<Uuid>,
    Query(query): Query<PendingQuery>,
) -> impl IntoResponse {
    Json(ApiResponse::success(state.service.get_pending_approvals(
        approver_id,
        query.entity_type.as_deref(),
        query.include_all,
    )))
}

/// GET /api/v1/approvals/pending/:approver_id/count
pub async fn pending_count(
    State(state): State<ApprovalAppState>,
    Path(approver_id): Path<Uuid>,
) -> impl IntoResponse {
    Json(ApiResponse::success(
        state.service.get_pending_count(approver_id),
    ))
}

/// GET /api/v1/approvals/archived/:approver_id
pub async fn archived(
    State(state): State<ApprovalAppState>,
    Path(approver_id): Path<Uuid>,
    Query(query): Query<PendingQuery>,
) -> impl IntoResponse {
    Json(ApiResponse::success(
        state
            .service
            .get_archived_approvals(approver_id, query.entity_type.as_deref()),
    ))
}

/// Approval routes.
pub fn approval_routes() -> axum::Router<ApprovalAppState> {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/config", post(create_config).get(list_configs))
        .route(
            "/config/:id",
            get(get_config).put(update_config).delete(deactivate_config),
        )
        .route("/requests", post(create_request))
        .route("/requests/:id", get(get_request))
        .route("/requests/:id/approve", post(approve))
        .route("/requests/:id/reject", post(reject))
        .route("/requests/:id/approve-conditional", post(approve_conditional))
        .route("/requests/:id/delegate", post(delegate))
        .route("/requests/:id/cancel", post(cancel))
        .route("/entity/:entity_type/:entity_id/status", get(check_status))
        .route("/pending/:approver_id", get(pending))
        .route("/pending/:approver_id/count", get(pending_count))
        .route("/archived/:approver_id", get(archived))
}

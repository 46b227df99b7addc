//! Leave REST API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::models::*;
use super::service::LeaveService;
use crate::approvals::handlers::{error_status, ApiResponse};
use crate::approvals::CallbackPayload;
use crate::error::CoreError;

/// Shared leave state.
#[derive(Clone)]
pub struct LeaveAppState {
    pub service: Arc<LeaveService>,
}

fn failure<T: serde::Serialize>(err: CoreError) -> (StatusCode, Json<ApiResponse<T>>) {
    (error_status(&err), Json(ApiResponse::error(err.to_string())))
}

#[derive(Debug, Deserialize)]
pub struct ActorBody<T> {
    pub actor_id: Uuid,
    #[serde(flatten)]
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct ActorOnly {
    pub actor_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RequestsQuery {
    pub user_id: Uuid,
    pub year: Option<i32>,
}

/// GET /api/v1/leaves/requests
pub async fn list_requests(
    State(state): State<LeaveAppState>,
    Query(query): Query<RequestsQuery>,
) -> impl IntoResponse {
    Json(ApiResponse::success(state.service.get_user_requests(
        query.user_id,
        query.year,
        None,
    )))
}

/// POST /api/v1/leaves/requests
pub async fn create_request(
    State(state): State<LeaveAppState>,
    Json(body): Json<ActorBody<LeaveRequestCreate>>,
) -> impl IntoResponse {
    match state.service.create_request(body.actor_id, body.data).await {
        Ok(request) => (StatusCode::CREATED, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

/// GET /api/v1/leaves/requests/:id
pub async fn get_request(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.service.get_request(id) {
        Ok(request) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

/// PUT /api/v1/leaves/requests/:id
pub async fn update_request(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorBody<LeaveRequestUpdate>>,
) -> impl IntoResponse {
    match state.service.update_request(id, body.actor_id, body.data).await {
        Ok(request) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

/// DELETE /api/v1/leaves/requests/:id
pub async fn delete_request(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorOnly>,
) -> impl IntoResponse {
    match state.service.delete_request(id, body.actor_id).await {
        Ok(()) => (StatusCode::NO_CONTENT, Json(ApiResponse::success(()))),
        Err(err) => failure(err),
    }
}

/// POST /api/v1/leaves/requests/:id/submit
pub async fn submit_request(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorOnly>,
) -> impl IntoResponse {
    match state.service.submit_request(id, body.actor_id).await {
        Ok(request) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

/// POST /api/v1/leaves/requests/:id/approve
pub async fn approve_request(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorBody<ApproveData>>,
) -> impl IntoResponse {
    match state.service.approve_request(id, body.actor_id, body.data).await {
        Ok(request) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

/// POST /api/v1/leaves/requests/:id/approve-conditional
pub async fn approve_conditional(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorBody<ConditionalData>>,
) -> impl IntoResponse {
    match state
        .service
        .approve_conditional(id, body.actor_id, body.data)
        .await
    {
        Ok(request) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

/// POST /api/v1/leaves/requests/:id/accept-condition
pub async fn accept_condition(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorBody<AcceptConditionData>>,
) -> impl IntoResponse {
    match state
        .service
        .accept_condition(id, body.actor_id, body.data)
        .await
    {
        Ok(request) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

/// POST /api/v1/leaves/requests/:id/reject
pub async fn reject_request(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorBody<RejectData>>,
) -> impl IntoResponse {
    match state.service.reject_request(id, body.actor_id, body.data).await {
        Ok(request) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct ReasonBody {
    pub actor_id: Uuid,
    pub reason: String,
}

/// POST /api/v1/leaves/requests/:id/revoke
pub async fn revoke_request(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReasonBody>,
) -> impl IntoResponse {
    match state
        .service
        .revoke_approval(id, body.actor_id, body.reason)
        .await
    {
        Ok(request) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct ReopenBody {
    pub actor_id: Uuid,
    pub notes: Option<String>,
}

/// POST /api/v1/leaves/requests/:id/reopen
pub async fn reopen_request(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReopenBody>,
) -> impl IntoResponse {
    match state.service.reopen_request(id, body.actor_id, body.notes).await {
        Ok(request) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

/// POST /api/v1/leaves/requests/:id/cancel
pub async fn cancel_request(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorBody<CancelData>>,
) -> impl IntoResponse {
    match state.service.cancel_request(id, body.actor_id, body.data).await {
        Ok(request) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

/// POST /api/v1/leaves/requests/:id/recall
pub async fn recall_request(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorBody<RecallData>>,
) -> impl IntoResponse {
    match state.service.recall_request(id, body.actor_id, body.data).await {
        Ok(request) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

/// POST /api/v1/leaves/requests/:id/partial-recall
pub async fn partial_recall(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorBody<PartialRecallData>>,
) -> impl IntoResponse {
    match state
        .service
        .create_partial_recall(id, body.actor_id, body.data)
        .await
    {
        Ok(interruption) => (StatusCode::CREATED, Json(ApiResponse::success(interruption))),
        Err(err) => failure(err),
    }
}

/// POST /api/v1/leaves/requests/:id/sickness
pub async fn report_sickness(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorBody<SicknessData>>,
) -> impl IntoResponse {
    match state
        .service
        .report_user_sickness(id, body.actor_id, body.data)
        .await
    {
        Ok(interruption) => (StatusCode::CREATED, Json(ApiResponse::success(interruption))),
        Err(err) => failure(err),
    }
}

/// POST /api/v1/leaves/requests/:id/voluntary-work
pub async fn request_voluntary_work(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorBody<VoluntaryWorkData>>,
) -> impl IntoResponse {
    match state
        .service
        .request_voluntary_work(id, body.actor_id, body.data)
        .await
    {
        Ok(interruption) => (StatusCode::CREATED, Json(ApiResponse::success(interruption))),
        Err(err) => failure(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct VoluntaryDecisionBody {
    pub actor_id: Uuid,
    pub notes: Option<String>,
    pub reason: Option<String>,
}

/// POST /api/v1/leaves/voluntary-work/:id/approve
pub async fn approve_voluntary_work(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<VoluntaryDecisionBody>,
) -> impl IntoResponse {
    match state
        .service
        .approve_voluntary_work(id, body.actor_id, body.notes)
        .await
    {
        Ok(interruption) => (StatusCode::OK, Json(ApiResponse::success(interruption))),
        Err(err) => failure(err),
    }
}

/// POST /api/v1/leaves/voluntary-work/:id/reject
pub async fn reject_voluntary_work(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<VoluntaryDecisionBody>,
) -> impl IntoResponse {
    match state
        .service
        .reject_voluntary_work(id, body.actor_id, body.reason.unwrap_or_default())
        .await
    {
        Ok(interruption) => (StatusCode::OK, Json(ApiResponse::success(interruption))),
        Err(err) => failure(err),
    }
}

/// POST /api/v1/leaves/requests/:id/modify
pub async fn modify_approved(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ActorBody<ModifyApprovedData>>,
) -> impl IntoResponse {
    match state
        .service
        .modify_approved_request(id, body.actor_id, body.data)
        .await
    {
        Ok(request) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Err(err) => failure(err),
    }
}

/// GET /api/v1/leaves/requests/:id/interruptions
pub async fn list_interruptions(
    State(state): State<LeaveAppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    Json(ApiResponse::success(
        state.service.interruptions_for_request(id),
    ))
}

/// POST /api/v1/leaves/days/preview
pub async fn days_preview(
    State(state): State<LeaveAppState>,
    Json(data): Json<DaysPreviewRequest>,
) -> impl IntoResponse {
    Json(ApiResponse::success(state.service.days_preview(data)))
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// GET /api/v1/leaves/excluded-days
pub async fn excluded_days(
    State(state): State<LeaveAppState>,
    Query(query): Query<RangeQuery>,
) -> impl IntoResponse {
    Json(ApiResponse::success(
        state.service.excluded_days(query.start_date, query.end_date),
    ))
}

/// GET /api/v1/leaves/calendar/:user_id
pub async fn user_calendar(
    State(state): State<LeaveAppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<RangeQuery>,
) -> impl IntoResponse {
    Json(ApiResponse::success(state.service.user_calendar(
        user_id,
        query.start_date,
        query.end_date,
    )))
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub year: i32,
}

/// GET /api/v1/leaves/balances/:user_id
pub async fn balance_summary(
    State(state): State<LeaveAppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<BalanceQuery>,
) -> impl IntoResponse {
    Json(ApiResponse::success(
        state.service.balance_summary(user_id, query.year),
    ))
}

/// POST /api/v1/leaves/internal/approval-callback
///
/// Resolution endpoint for the workflow engine. Idempotent by design.
pub async fn approval_callback(
    State(state): State<LeaveAppState>,
    Json(payload): Json<CallbackPayload>,
) -> impl IntoResponse {
    match state.service.handle_approval_callback(&payload).await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::success(()))),
        Err(err) => failure(err),
    }
}

/// Leave routes.
pub fn leave_routes() -> axum::Router<LeaveAppState> {
    use axum::routing::{get, post, put};

    axum::Router::new()
        .route("/requests", get(list_requests).post(create_request))
        .route(
            "/requests/:id",
            get(get_request).delete(delete_request),
        )
        .route("/requests/:id/update", put(update_request))
        .route("/requests/:id/submit", post(submit_request))
        .route("/requests/:id/approve", post(approve_request))
        .route("/requests/:id/approve-conditional", post(approve_conditional))
        .route("/requests/:id/accept-condition", post(accept_condition))
        .route("/requests/:id/reject", post(reject_request))
        .route("/requests/:id/revoke", post(revoke_request))
        .route("/requests/:id/reopen", post(reopen_request))
        .route("/requests/:id/cancel", post(cancel_request))
        .route("/requests/:id/recall", post(recall_request))
        .route("/requests/:id/partial-recall", post(partial_recall))
        .route("/requests/:id/sickness", post(report_sickness))
        .route("/requests/:id/voluntary-work", post(request_voluntary_work))
        .route("/requests/:id/modify", post(modify_approved))
        .route("/requests/:id/interruptions", get(list_interruptions))
        .route("/voluntary-work/:id/approve", post(approve_voluntary_work))
        .route("/voluntary-work/:id/reject", post(reject_voluntary_work))
        .route("/days/preview", post(days_preview))
        .route("/excluded-days", get(excluded_days))
        .route("/calendar/:user_id", get(user_calendar))
        .route("/balances/:user_id", get(balance_summary))
        .route("/internal/approval-callback", post(approval_callback))
}

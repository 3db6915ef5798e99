use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Extension,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::dto::monitor_dto::{CommandRequest, CreateAssignmentRequest};
use crate::error::Result;
use crate::middleware::auth::Claims;
use crate::AppState;

#[axum::debug_handler]
pub async fn create_assignment(
    State(state): State<AppState>,
    Json(payload): Json<CreateAssignmentRequest>,
) -> Result<Response> {
    let assignment = state.assignments.assign(payload).await?;
    Ok((StatusCode::CREATED, Json(assignment)).into_response())
}

#[axum::debug_handler]
pub async fn get_dashboard(
    State(state): State<AppState>,
    Path(exam_id): Path<Uuid>,
) -> Result<Response> {
    let snapshot = state.monitor.dashboard(exam_id, Utc::now()).await;
    Ok(Json(snapshot).into_response())
}

#[axum::debug_handler]
pub async fn stop_watching(
    State(state): State<AppState>,
    Path(exam_id): Path<Uuid>,
) -> Result<Response> {
    let stopped = state.monitor.unwatch(exam_id);
    Ok(Json(json!({ "stopped": stopped })).into_response())
}

#[axum::debug_handler]
pub async fn issue_command(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((exam_id, candidate_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<CommandRequest>,
) -> Result<Response> {
    tracing::info!(
        "{} requested {} for candidate {}",
        claims.sub,
        payload.command.as_str(),
        candidate_id
    );
    let response = state
        .monitor
        .issue_command(exam_id, candidate_id, payload.command, Utc::now())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

#[axum::debug_handler]
pub async fn list_events(
    State(state): State<AppState>,
    Path((exam_id, candidate_id)): Path<(Uuid, Uuid)>,
) -> Result<Response> {
    let assignment = state
        .store
        .assignment_for_candidate(exam_id, candidate_id)
        .await?;
    let events = state.proctor_log.history(assignment.id).await?;
    Ok(Json(json!({
        "assignment_id": assignment.id,
        "status": assignment.status,
        "events": events,
    }))
    .into_response())
}

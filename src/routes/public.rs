use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::dto::public_dto::{SaveAnswerRequest, SubmitExamRequest, ViolationReport, ViolationResponse};
use crate::error::Result;
use crate::services::storage_service::ObjectKind;
use crate::AppState;

#[axum::debug_handler]
pub async fn get_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response> {
    let summary = state.assignments.summary(&token).await?;
    Ok(Json(summary).into_response())
}

#[axum::debug_handler]
pub async fn start_exam(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response> {
    let started = state.assignments.start(&token, Utc::now()).await?;
    Ok(Json(started).into_response())
}

#[axum::debug_handler]
pub async fn save_answer(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<SaveAnswerRequest>,
) -> Result<Response> {
    let saved = state
        .assignments
        .save_answer(&token, payload, Utc::now())
        .await?;
    Ok(Json(saved).into_response())
}

#[axum::debug_handler]
pub async fn submit_exam(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<SubmitExamRequest>,
) -> Result<Response> {
    let result = state.assignments.submit(&token, payload, Utc::now()).await?;
    Ok(Json(result).into_response())
}

#[axum::debug_handler]
pub async fn get_status(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response> {
    let status = state.assignments.status(&token, Utc::now()).await?;
    Ok(Json(status).into_response())
}

#[axum::debug_handler]
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response> {
    let beat = state.assignments.record_heartbeat(&token, Utc::now()).await?;
    Ok(Json(beat).into_response())
}

#[axum::debug_handler]
pub async fn report_violation(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ViolationReport>,
) -> Result<Response> {
    let event = state.proctor_log.record(&token, payload, Utc::now()).await?;
    Ok((
        StatusCode::CREATED,
        Json(ViolationResponse {
            recorded: true,
            event_id: event.id,
        }),
    )
        .into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub captured_at: Option<DateTime<Utc>>,
}

#[axum::debug_handler]
pub async fn upload_snapshot(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Response> {
    store_upload(&state, &token, ObjectKind::Snapshot, query.captured_at, body).await
}

#[axum::debug_handler]
pub async fn upload_recording(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Result<Response> {
    store_upload(&state, &token, ObjectKind::Recording, query.captured_at, body).await
}

async fn store_upload(
    state: &AppState,
    token: &str,
    kind: ObjectKind,
    captured_at: Option<DateTime<Utc>>,
    body: Bytes,
) -> Result<Response> {
    let stored = state
        .uploads
        .accept(token, kind, captured_at.unwrap_or_else(Utc::now), body)
        .await?;
    Ok((StatusCode::CREATED, Json(stored)).into_response())
}

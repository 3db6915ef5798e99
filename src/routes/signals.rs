//! Signaling channel over HTTP: Server-Sent Events down, JSON POST up.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use futures::stream::{BoxStream, Stream, StreamExt};
use uuid::Uuid;

use crate::dto::monitor_dto::AdminPublishRequest;
use crate::dto::public_dto::{PublishSignalRequest, PublishSignalResponse};
use crate::error::Result;
use crate::models::signal::SignalEnvelope;
use crate::AppState;

const KEEP_ALIVE_SECS: u64 = 15;

fn sse_stream(
    envelopes: BoxStream<'static, SignalEnvelope>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let events = envelopes.filter_map(|env| async move {
        match Event::default().event(env.event.name()).json_data(&env) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                tracing::warn!("Failed to encode signal for SSE: {}", e);
                None
            }
        }
    });
    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(KEEP_ALIVE_SECS))
            .text("keep-alive"),
    )
}

/// Events concerning the token's candidate on its exam topic.
#[axum::debug_handler]
pub async fn candidate_stream(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response> {
    let envelopes = state.channel.subscribe(&token).await?;
    Ok(sse_stream(envelopes).into_response())
}

#[axum::debug_handler]
pub async fn candidate_publish(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(req): Json<PublishSignalRequest>,
) -> Result<Response> {
    let delivered = state.channel.publish(&token, req).await?;
    Ok(Json(PublishSignalResponse { delivered }).into_response())
}

/// Every envelope on the exam topic, for the admin viewer.
#[axum::debug_handler]
pub async fn exam_stream(
    State(state): State<AppState>,
    Path(exam_id): Path<Uuid>,
) -> Result<Response> {
    // Make sure the aggregator is running before the viewer connects.
    state.monitor.watch(exam_id);
    Ok(sse_stream(state.signals.subscribe_stream(exam_id)).into_response())
}

#[axum::debug_handler]
pub async fn admin_publish(
    State(state): State<AppState>,
    Path(exam_id): Path<Uuid>,
    Json(req): Json<AdminPublishRequest>,
) -> Result<Response> {
    let delivered = state.monitor.publish_admin(exam_id, req)?;
    Ok(Json(PublishSignalResponse { delivered }).into_response())
}

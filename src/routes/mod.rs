pub mod health;
pub mod monitor;
pub mod public;
pub mod signals;

use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, patch, post},
    Router,
};

use crate::middleware::{auth::require_monitor_role, rate_limit::per_token_limit};
use crate::AppState;

/// Snapshots are small; recordings are uploaded in one piece at submission.
const MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let base_routes = Router::new().route("/health", get(health::health));

    let public_api = Router::new()
        .route("/api/public/sessions/:token", get(public::get_session))
        .route("/api/public/sessions/:token/start", post(public::start_exam))
        .route("/api/public/sessions/:token/answer", patch(public::save_answer))
        .route("/api/public/sessions/:token/submit", post(public::submit_exam))
        .route("/api/public/sessions/:token/status", get(public::get_status))
        .route("/api/public/sessions/:token/heartbeat", post(public::heartbeat))
        .route("/api/public/sessions/:token/events", post(public::report_violation))
        .route("/api/public/sessions/:token/snapshots", post(public::upload_snapshot))
        .route("/api/public/sessions/:token/recordings", post(public::upload_recording))
        .route(
            "/api/public/sessions/:token/signals",
            get(signals::candidate_stream).post(signals::candidate_publish),
        )
        .route_layer(from_fn_with_state(state.limiter.clone(), per_token_limit));

    let monitor_api = Router::new()
        .route("/api/monitor/assignments", post(monitor::create_assignment))
        .route(
            "/api/monitor/exams/:exam_id/dashboard",
            get(monitor::get_dashboard).delete(monitor::stop_watching),
        )
        .route(
            "/api/monitor/exams/:exam_id/signals",
            get(signals::exam_stream).post(signals::admin_publish),
        )
        .route(
            "/api/monitor/exams/:exam_id/candidates/:candidate_id/command",
            post(monitor::issue_command),
        )
        .route(
            "/api/monitor/exams/:exam_id/candidates/:candidate_id/events",
            get(monitor::list_events),
        )
        .route_layer(from_fn_with_state(state.auth.clone(), require_monitor_role));

    base_routes
        .merge(public_api)
        .merge(monitor_api)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

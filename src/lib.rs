pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod proctor;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use crate::database::ProctoringStore;
use crate::middleware::auth::AuthKeys;
use crate::middleware::rate_limit::TokenRateLimiter;
use crate::services::{
    assignment_service::AssignmentService,
    channel_service::CandidateChannel,
    grading_service::Scorer,
    monitor_service::MonitorService,
    proctor_log_service::ProctorLogService,
    signaling_service::SignalingService,
    storage_service::{ObjectStore, UploadService},
};

/// Knobs the state needs that do not come from collaborators.
#[derive(Debug, Clone)]
pub struct StateSettings {
    pub jwt_secret: String,
    pub public_rps: u32,
    pub signal_buffer: usize,
}

impl From<&config::Config> for StateSettings {
    fn from(config: &config::Config) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
            public_rps: config.public_rps,
            signal_buffer: config.signal_buffer,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ProctoringStore>,
    pub assignments: AssignmentService,
    pub proctor_log: ProctorLogService,
    pub signals: SignalingService,
    pub monitor: MonitorService,
    pub channel: CandidateChannel,
    pub uploads: UploadService,
    pub auth: AuthKeys,
    pub limiter: TokenRateLimiter,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ProctoringStore>,
        scorer: Arc<dyn Scorer>,
        objects: Arc<dyn ObjectStore>,
        settings: StateSettings,
    ) -> Self {
        let signals = SignalingService::new(settings.signal_buffer);
        let assignments = AssignmentService::new(store.clone(), scorer);
        let proctor_log = ProctorLogService::new(store.clone(), signals.clone());
        let monitor = MonitorService::new(
            signals.clone(),
            store.clone(),
            proctor_log.clone(),
            assignments.clone(),
        );

        let channel = CandidateChannel::new(assignments.clone(), signals.clone());
        let uploads = UploadService::new(assignments.clone(), objects, signals.clone());

        Self {
            store,
            assignments,
            proctor_log,
            signals,
            monitor,
            channel,
            uploads,
            auth: AuthKeys::from_secret(&settings.jwt_secret),
            limiter: TokenRateLimiter::new(settings.public_rps),
        }
    }
}

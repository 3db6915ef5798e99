use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::assignment::ProctoringOptions;
use crate::models::signal::{AdminCommand, SignalEvent};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAssignmentRequest {
    pub exam_id: Uuid,
    pub candidate_id: Uuid,
    pub scheduled_start: Option<DateTime<Utc>>,
    /// Overrides the exam's default duration.
    #[validate(range(min = 1, max = 720))]
    pub duration_minutes: Option<i32>,
    #[serde(default)]
    pub proctoring: ProctoringOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: AdminCommand,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub exam_id: Uuid,
    pub candidate_id: Uuid,
    pub command: AdminCommand,
    /// Subscribers the command reached; no acknowledgement is awaited.
    pub delivered: usize,
    /// Terminate was applied by the server because the laptop was offline.
    pub enforced_server_side: bool,
}

/// Admin-originated traffic such as peer answers and ICE candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminPublishRequest {
    pub candidate_id: Uuid,
    pub event: SignalEvent,
}

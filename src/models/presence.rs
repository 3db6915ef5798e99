use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::signal::{HeartbeatSource, Origin};

/// Heartbeat window after which a mobile peer counts as gone.
pub const MOBILE_LIVENESS_SECS: i64 = 15;
/// Laptop heartbeats every 5s; three missed beats mark it offline.
pub const LAPTOP_LIVENESS_SECS: i64 = 15;

pub fn liveness_window(source: HeartbeatSource) -> Duration {
    match source {
        HeartbeatSource::Laptop => Duration::seconds(LAPTOP_LIVENESS_SECS),
        HeartbeatSource::Mobile => Duration::seconds(MOBILE_LIVENESS_SECS),
    }
}

/// Presence signal held in the consumer's memory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveHeartbeat {
    pub candidate_id: Uuid,
    pub source: HeartbeatSource,
    pub last_seen: DateTime<Utc>,
}

impl LiveHeartbeat {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now - self.last_seen <= liveness_window(self.source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    Offered,
    Answered,
}

/// One peer negotiation between a candidate device and the admin viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSession {
    pub candidate_id: Uuid,
    pub device: Origin,
    pub state: PeerState,
    pub offer_sdp: String,
    pub answer_sdp: Option<String>,
    pub ice_candidates: Vec<JsonValue>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PeerSession {
    pub fn from_offer(candidate_id: Uuid, device: Origin, sdp: String, at: DateTime<Utc>) -> Self {
        Self {
            candidate_id,
            device,
            state: PeerState::Offered,
            offer_sdp: sdp,
            answer_sdp: None,
            ice_candidates: Vec::new(),
            opened_at: at,
            updated_at: at,
        }
    }

    pub fn answer(&mut self, sdp: String, at: DateTime<Utc>) {
        self.answer_sdp = Some(sdp);
        self.state = PeerState::Answered;
        self.updated_at = at;
    }

    pub fn add_candidate(&mut self, candidate: JsonValue, at: DateTime<Utc>) {
        self.ice_candidates.push(candidate);
        self.updated_at = at;
    }
}

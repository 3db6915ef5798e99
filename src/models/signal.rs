//! Typed events carried on an exam's signaling topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::proctor_event::ProctorEventType;

/// Which party put an envelope on the topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Laptop,
    Mobile,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatSource {
    Laptop,
    Mobile,
}

impl From<HeartbeatSource> for Origin {
    fn from(source: HeartbeatSource) -> Self {
        match source {
            HeartbeatSource::Laptop => Origin::Laptop,
            HeartbeatSource::Mobile => Origin::Mobile,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminCommand {
    Pause,
    Resume,
    Terminate,
}

impl AdminCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminCommand::Pause => "pause",
            AdminCommand::Resume => "resume",
            AdminCommand::Terminate => "terminate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalEvent {
    Heartbeat {
        source: HeartbeatSource,
    },
    Violation {
        kind: ProctorEventType,
        #[serde(default)]
        detail: JsonValue,
        /// Id of the persisted log entry.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<Uuid>,
    },
    #[serde(rename = "admin_command")]
    Command {
        command: AdminCommand,
    },
    MobileConnected,
    MobileDisconnected,
    Offer {
        sdp: String,
    },
    /// `peer` names the candidate device the answer is meant for.
    Answer {
        sdp: String,
        peer: Origin,
    },
    /// `peer` names the candidate device whose connection this belongs to.
    IceCandidate {
        candidate: JsonValue,
        peer: Origin,
    },
    Snapshot {
        key: String,
        captured_at: DateTime<Utc>,
    },
}

impl SignalEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SignalEvent::Heartbeat { .. } => "heartbeat",
            SignalEvent::Violation { .. } => "violation",
            SignalEvent::Command { .. } => "admin_command",
            SignalEvent::MobileConnected => "mobile_connected",
            SignalEvent::MobileDisconnected => "mobile_disconnected",
            SignalEvent::Offer { .. } => "offer",
            SignalEvent::Answer { .. } => "answer",
            SignalEvent::IceCandidate { .. } => "ice_candidate",
            SignalEvent::Snapshot { .. } => "snapshot",
        }
    }

    pub fn is_peer_negotiation(&self) -> bool {
        matches!(
            self,
            SignalEvent::Offer { .. } | SignalEvent::Answer { .. } | SignalEvent::IceCandidate { .. }
        )
    }
}

/// One message on an exam topic. `candidate_id` is the candidate the event
/// concerns: the sender for candidate traffic, the target for admin traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    pub exam_id: Uuid,
    pub candidate_id: Uuid,
    pub origin: Origin,
    pub sent_at: DateTime<Utc>,
    pub event: SignalEvent,
}

impl SignalEnvelope {
    pub fn new(exam_id: Uuid, candidate_id: Uuid, origin: Origin, event: SignalEvent) -> Self {
        Self {
            exam_id,
            candidate_id,
            origin,
            sent_at: Utc::now(),
            event,
        }
    }

    pub fn command(&self) -> Option<AdminCommand> {
        match (&self.event, self.origin) {
            (SignalEvent::Command { command }, Origin::Admin) => Some(*command),
            _ => None,
        }
    }
}

/// Topics are shared by every participant of an exam, so each consumer keeps
/// only the envelopes concerning its own candidate.
pub fn is_for_me(envelope: &SignalEnvelope, candidate_id: Uuid) -> bool {
    envelope.candidate_id == candidate_id
}

/// Like [`is_for_me`] but also drops the consumer's own echoes.
pub fn is_for_me_from_others(envelope: &SignalEnvelope, candidate_id: Uuid, me: Origin) -> bool {
    is_for_me(envelope, candidate_id) && envelope.origin != me
}

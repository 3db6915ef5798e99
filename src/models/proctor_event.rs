use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProctorEventType {
    TabSwitch,
    FullscreenExit,
    CopyPaste,
    FaceMissing,
    MultipleFaces,
    MobileDisconnect,
    AdminCommand,
}

impl ProctorEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProctorEventType::TabSwitch => "tab_switch",
            ProctorEventType::FullscreenExit => "fullscreen_exit",
            ProctorEventType::CopyPaste => "copy_paste",
            ProctorEventType::FaceMissing => "face_missing",
            ProctorEventType::MultipleFaces => "multiple_faces",
            ProctorEventType::MobileDisconnect => "mobile_disconnect",
            ProctorEventType::AdminCommand => "admin_command",
        }
    }

    /// Violations a candidate can be charged with, as opposed to audit entries.
    pub fn is_violation(&self) -> bool {
        !matches!(self, ProctorEventType::AdminCommand)
    }
}

impl fmt::Display for ProctorEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProctorEventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tab_switch" => Ok(ProctorEventType::TabSwitch),
            "fullscreen_exit" => Ok(ProctorEventType::FullscreenExit),
            "copy_paste" => Ok(ProctorEventType::CopyPaste),
            "face_missing" => Ok(ProctorEventType::FaceMissing),
            "multiple_faces" => Ok(ProctorEventType::MultipleFaces),
            "mobile_disconnect" => Ok(ProctorEventType::MobileDisconnect),
            "admin_command" => Ok(ProctorEventType::AdminCommand),
            other => Err(Error::BadRequest(format!("Unknown proctor event type '{}'", other))),
        }
    }
}

/// Append-only proctoring log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProctorEvent {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub candidate_id: Uuid,
    pub event_type: ProctorEventType,
    pub occurred_at: DateTime<Utc>,
    pub detail: JsonValue,
}

#[derive(Debug, Clone)]
pub struct NewProctorEvent {
    pub assignment_id: Uuid,
    pub candidate_id: Uuid,
    pub event_type: ProctorEventType,
    pub occurred_at: DateTime<Utc>,
    pub detail: JsonValue,
}

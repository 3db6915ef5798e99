//! Counting rules of the local proctoring sensor.
//!
//! Everything here is synchronous bookkeeping; the runtime decides what to
//! log and when to auto-submit from the values these methods return.

use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::models::assignment::SubmitReason;
use crate::models::proctor_event::ProctorEventType;

/// Tab switches or fullscreen exits that end the exam.
pub const AUTO_SUBMIT_THRESHOLD: u32 = 3;
/// Consecutive no-face ticks between two `face_missing` reports.
pub const FACE_MISSING_EVERY: u32 = 5;
/// Consecutive multi-face ticks between two `multiple_faces` reports.
pub const MULTIPLE_FACES_EVERY: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ViolationCounters {
    pub tab_switches: u32,
    pub fullscreen_exits: u32,
    pub missing_face_streak: u32,
    pub multiple_face_streak: u32,
}

/// Outcome of a counted violation.
#[derive(Debug, Clone, PartialEq)]
pub struct Tally {
    pub kind: ProctorEventType,
    pub count: u32,
    pub auto_submit: Option<SubmitReason>,
}

impl Tally {
    pub fn detail(&self) -> JsonValue {
        json!({ "count": self.count, "limit": AUTO_SUBMIT_THRESHOLD })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceAlert {
    Missing { streak: u32 },
    Multiple { streak: u32, faces: usize },
}

impl FaceAlert {
    pub fn kind(&self) -> ProctorEventType {
        match self {
            FaceAlert::Missing { .. } => ProctorEventType::FaceMissing,
            FaceAlert::Multiple { .. } => ProctorEventType::MultipleFaces,
        }
    }

    pub fn detail(&self) -> JsonValue {
        match self {
            FaceAlert::Missing { streak } => json!({ "streak": streak }),
            FaceAlert::Multiple { streak, faces } => json!({ "streak": streak, "faces": faces }),
        }
    }
}

impl ViolationCounters {
    pub fn record_tab_switch(&mut self) -> Tally {
        self.tab_switches += 1;
        Tally {
            kind: ProctorEventType::TabSwitch,
            count: self.tab_switches,
            auto_submit: (self.tab_switches >= AUTO_SUBMIT_THRESHOLD)
                .then_some(SubmitReason::TabSwitchLimit),
        }
    }

    pub fn record_fullscreen_exit(&mut self) -> Tally {
        self.fullscreen_exits += 1;
        Tally {
            kind: ProctorEventType::FullscreenExit,
            count: self.fullscreen_exits,
            auto_submit: (self.fullscreen_exits >= AUTO_SUBMIT_THRESHOLD)
                .then_some(SubmitReason::FullscreenLimit),
        }
    }

    /// Folds one face-check tick. Each condition breaks the other's streak
    /// and a single face breaks both.
    pub fn observe_faces(&mut self, faces: usize) -> Option<FaceAlert> {
        match faces {
            0 => {
                self.multiple_face_streak = 0;
                self.missing_face_streak += 1;
                (self.missing_face_streak % FACE_MISSING_EVERY == 0).then_some(FaceAlert::Missing {
                    streak: self.missing_face_streak,
                })
            }
            1 => {
                self.missing_face_streak = 0;
                self.multiple_face_streak = 0;
                None
            }
            n => {
                self.missing_face_streak = 0;
                self.multiple_face_streak += 1;
                (self.multiple_face_streak % MULTIPLE_FACES_EVERY == 0).then_some(
                    FaceAlert::Multiple {
                        streak: self.multiple_face_streak,
                        faces: n,
                    },
                )
            }
        }
    }
}

/// Clipboard and context-menu actions the page suppresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipboardAction {
    Copy,
    Cut,
    Paste,
    ContextMenu,
}

/// Browser events the host page forwards to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    Hidden,
    Visible,
    FullscreenExited,
    Clipboard(ClipboardAction),
}

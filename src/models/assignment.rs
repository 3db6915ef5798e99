use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::exam::Exam;

/// Answers keyed by question id.
pub type AnswerSheet = BTreeMap<i32, JsonValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    InProgress,
    Completed,
    Passed,
    Failed,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Assigned => "assigned",
            AssignmentStatus::InProgress => "in_progress",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Passed => "passed",
            AssignmentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AssignmentStatus::Completed | AssignmentStatus::Passed | AssignmentStatus::Failed
        )
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "assigned" => Ok(AssignmentStatus::Assigned),
            "in_progress" => Ok(AssignmentStatus::InProgress),
            "completed" => Ok(AssignmentStatus::Completed),
            "passed" => Ok(AssignmentStatus::Passed),
            "failed" => Ok(AssignmentStatus::Failed),
            other => Err(Error::Internal(format!("Unknown assignment status '{}'", other))),
        }
    }
}

/// Why a submission happened. Everything except `Manual` is an auto-submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitReason {
    Manual,
    TabSwitchLimit,
    FullscreenLimit,
    TimeExpired,
    MobileLost,
    AdminTerminate,
}

impl SubmitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitReason::Manual => "manual",
            SubmitReason::TabSwitchLimit => "tab_switch_limit",
            SubmitReason::FullscreenLimit => "fullscreen_limit",
            SubmitReason::TimeExpired => "time_expired",
            SubmitReason::MobileLost => "mobile_lost",
            SubmitReason::AdminTerminate => "admin_terminate",
        }
    }

    pub fn is_auto(&self) -> bool {
        !matches!(self, SubmitReason::Manual)
    }
}

impl FromStr for SubmitReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "manual" => Ok(SubmitReason::Manual),
            "tab_switch_limit" => Ok(SubmitReason::TabSwitchLimit),
            "fullscreen_limit" => Ok(SubmitReason::FullscreenLimit),
            "time_expired" => Ok(SubmitReason::TimeExpired),
            "mobile_lost" => Ok(SubmitReason::MobileLost),
            "admin_terminate" => Ok(SubmitReason::AdminTerminate),
            other => Err(Error::Internal(format!("Unknown submit reason '{}'", other))),
        }
    }
}

/// Per-assignment monitoring switches chosen by the admin at assignment time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProctoringOptions {
    pub camera_required: bool,
    pub mic_required: bool,
    pub dual_camera_required: bool,
    pub tab_switch_detection: bool,
    pub copy_paste_blocking: bool,
}

impl ProctoringOptions {
    pub fn fully_proctored() -> Self {
        Self {
            camera_required: true,
            mic_required: true,
            dual_camera_required: true,
            tab_switch_detection: true,
            copy_paste_blocking: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamAssignment {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub candidate_id: Uuid,
    pub access_token: String,
    pub status: AssignmentStatus,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub duration_override_minutes: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub score: Option<Decimal>,
    pub admin_paused: bool,
    pub proctoring: ProctoringOptions,
    pub answers: AnswerSheet,
    pub auto_submitted: bool,
    pub submit_reason: Option<SubmitReason>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ExamAssignment {
    pub fn duration_minutes(&self, exam: &Exam) -> i32 {
        self.duration_override_minutes.unwrap_or(exam.duration_minutes)
    }

    pub fn duration(&self, exam: &Exam) -> Duration {
        Duration::minutes(self.duration_minutes(exam) as i64)
    }

    pub fn entry_window(&self, exam: &Exam) -> Option<EntryWindow> {
        self.scheduled_start
            .map(|start| EntryWindow::for_schedule(start, self.duration(exam)))
    }

    /// Moment the countdown reaches zero, once started.
    pub fn deadline(&self, exam: &Exam) -> Option<DateTime<Utc>> {
        self.started_at.map(|started| started + self.duration(exam))
    }

    /// A submission has been claimed or recorded.
    pub fn is_submission_locked(&self) -> bool {
        self.status.is_terminal() || self.submitted_at.is_some()
    }
}

/// Interval during which a scheduled assignment may be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryWindow {
    pub opens_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl EntryWindow {
    pub const EARLY_ENTRY_MINUTES: i64 = 15;

    pub fn for_schedule(scheduled_start: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            opens_at: scheduled_start - Duration::minutes(Self::EARLY_ENTRY_MINUTES),
            ends_at: scheduled_start + duration,
        }
    }

    pub fn check(&self, now: DateTime<Utc>) -> Result<()> {
        if now < self.opens_at {
            return Err(Error::TooEarly {
                opens_at: self.opens_at,
            });
        }
        if now > self.ends_at {
            return Err(Error::SessionEnded {
                ended_at: self.ends_at,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub exam_id: Uuid,
    pub candidate_id: Uuid,
    pub access_token: String,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub duration_override_minutes: Option<i32>,
    pub proctoring: ProctoringOptions,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window() -> EntryWindow {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        EntryWindow::for_schedule(start, Duration::minutes(60))
    }

    #[test]
    fn entry_twenty_minutes_early_is_too_early() {
        let w = window();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 40, 0).unwrap();
        assert!(matches!(w.check(now), Err(Error::TooEarly { .. })));
    }

    #[test]
    fn entry_ten_minutes_early_is_accepted() {
        let w = window();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 50, 0).unwrap();
        assert!(w.check(now).is_ok());
    }

    #[test]
    fn entry_after_scheduled_end_is_rejected_as_ended() {
        let w = window();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 1).unwrap();
        assert!(matches!(w.check(now), Err(Error::SessionEnded { .. })));
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            AssignmentStatus::Assigned,
            AssignmentStatus::InProgress,
            AssignmentStatus::Completed,
            AssignmentStatus::Passed,
            AssignmentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<AssignmentStatus>().unwrap(), status);
        }
        assert!(!AssignmentStatus::InProgress.is_terminal());
        assert!(AssignmentStatus::Failed.is_terminal());
    }
}

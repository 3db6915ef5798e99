use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::Validate;

use crate::error::{Error, Result};
use crate::models::assignment::{
    AnswerSheet, AssignmentStatus, EntryWindow, ProctoringOptions, SubmitReason,
};
use crate::models::proctor_event::ProctorEventType;
use crate::models::signal::{Origin, SignalEvent};

/// Question fields a candidate must never see.
const HIDDEN_QUESTION_FIELDS: [&str; 2] = ["correct_option", "expected_keywords"];

pub fn public_questions(questions: &JsonValue) -> JsonValue {
    match questions {
        JsonValue::Array(items) => JsonValue::Array(
            items
                .iter()
                .map(|q| {
                    let mut q = q.clone();
                    if let Some(obj) = q.as_object_mut() {
                        for field in HIDDEN_QUESTION_FIELDS {
                            obj.remove(field);
                        }
                    }
                    q
                })
                .collect(),
        ),
        _ => JsonValue::Array(Vec::new()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSessionSummary {
    pub assignment_id: Uuid,
    pub exam_id: Uuid,
    pub candidate_id: Uuid,
    pub exam_title: String,
    pub status: AssignmentStatus,
    pub proctoring: ProctoringOptions,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub entry_window: Option<EntryWindow>,
    pub duration_minutes: i32,
    pub admin_paused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartExamResponse {
    pub assignment_id: Uuid,
    pub exam_id: Uuid,
    pub candidate_id: Uuid,
    pub status: AssignmentStatus,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub remaining_seconds: i64,
    pub duration_minutes: i32,
    pub proctoring: ProctoringOptions,
    pub admin_paused: bool,
    pub questions: JsonValue,
    /// Answers saved before a reload.
    pub answers: AnswerSheet,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaveAnswerRequest {
    #[validate(range(min = 1))]
    pub question_id: i32,
    pub answer: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveAnswerResponse {
    pub saved: bool,
    pub question_id: i32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SubmitExamRequest {
    #[serde(default)]
    pub answers: AnswerSheet,
    #[serde(default)]
    pub auto_submit: bool,
    pub reason: Option<SubmitReason>,
}

impl SubmitExamRequest {
    pub fn manual(answers: AnswerSheet) -> Self {
        Self {
            answers,
            auto_submit: false,
            reason: None,
        }
    }

    pub fn automatic(answers: AnswerSheet, reason: SubmitReason) -> Self {
        Self {
            answers,
            auto_submit: true,
            reason: Some(reason),
        }
    }

    /// The auto flag and the reason have to agree.
    pub fn resolve_reason(&self) -> Result<SubmitReason> {
        match (self.auto_submit, self.reason) {
            (false, None) | (false, Some(SubmitReason::Manual)) => Ok(SubmitReason::Manual),
            (true, Some(reason)) if reason.is_auto() => Ok(reason),
            (true, _) => Err(Error::BadRequest(
                "Automatic submissions must state why they were triggered".to_string(),
            )),
            (false, Some(reason)) => Err(Error::BadRequest(format!(
                "Reason '{}' requires auto_submit",
                reason.as_str()
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitExamResponse {
    pub assignment_id: Uuid,
    pub status: AssignmentStatus,
    pub score: Decimal,
    pub max_score: Decimal,
    pub percentage: Decimal,
    pub auto_submitted: bool,
    pub reason: SubmitReason,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: AssignmentStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub remaining_seconds: Option<i64>,
    pub questions_answered: usize,
    pub total_questions: usize,
    pub admin_paused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ViolationReport {
    pub event_type: ProctorEventType,
    #[serde(default)]
    pub detail: JsonValue,
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationResponse {
    pub recorded: bool,
    pub event_id: Uuid,
}

/// Envelope body a candidate device posts to its exam topic. Exam and
/// candidate ids come from the access token, never from the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSignalRequest {
    pub origin: Origin,
    pub event: SignalEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSignalResponse {
    pub delivered: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hides_answer_keys_from_candidates() {
        let questions = json!([
            {"id": 1, "type": "multiple_choice", "question": "q", "options": ["a", "b"], "correct_option": 1},
            {"id": 2, "type": "short_answer", "question": "q2", "expected_keywords": ["x"]}
        ]);
        let public = public_questions(&questions);
        assert!(public[0].get("correct_option").is_none());
        assert!(public[1].get("expected_keywords").is_none());
        assert_eq!(public[0]["options"], json!(["a", "b"]));
    }

    #[test]
    fn auto_flag_and_reason_must_agree() {
        assert_eq!(
            SubmitExamRequest::manual(AnswerSheet::new()).resolve_reason().unwrap(),
            SubmitReason::Manual
        );
        assert_eq!(
            SubmitExamRequest::automatic(AnswerSheet::new(), SubmitReason::TimeExpired)
                .resolve_reason()
                .unwrap(),
            SubmitReason::TimeExpired
        );
        let bad = SubmitExamRequest {
            auto_submit: true,
            reason: None,
            ..Default::default()
        };
        assert!(bad.resolve_reason().is_err());
        let bad = SubmitExamRequest {
            auto_submit: false,
            reason: Some(SubmitReason::AdminTerminate),
            ..Default::default()
        };
        assert!(bad.resolve_reason().is_err());
    }
}

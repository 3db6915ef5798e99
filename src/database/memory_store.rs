//! In-process store used by tests and local demos.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::store::ProctoringStore;
use crate::error::{Error, Result};
use crate::models::assignment::{
    AnswerSheet, AssignmentStatus, ExamAssignment, NewAssignment, SubmitReason,
};
use crate::models::exam::{Exam, NewExam};
use crate::models::proctor_event::{NewProctorEvent, ProctorEvent};

#[derive(Default)]
struct MemoryState {
    exams: HashMap<Uuid, Exam>,
    assignments: HashMap<Uuid, ExamAssignment>,
    events: Vec<ProctorEvent>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(what: &str, id: impl std::fmt::Display) -> Error {
    Error::NotFound(format!("{} {} not found", what, id))
}

#[async_trait]
impl ProctoringStore for MemoryStore {
    async fn insert_exam(&self, exam: NewExam) -> Result<Exam> {
        let exam = Exam {
            id: Uuid::new_v4(),
            title: exam.title,
            duration_minutes: exam.duration_minutes,
            passing_score: exam.passing_score,
            questions: exam.questions,
            created_at: Utc::now(),
        };
        self.state.write().await.exams.insert(exam.id, exam.clone());
        Ok(exam)
    }

    async fn exam(&self, id: Uuid) -> Result<Exam> {
        self.state
            .read()
            .await
            .exams
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("Exam", id))
    }

    async fn insert_assignment(&self, assignment: NewAssignment) -> Result<ExamAssignment> {
        let mut state = self.state.write().await;
        if !state.exams.contains_key(&assignment.exam_id) {
            return Err(not_found("Exam", assignment.exam_id));
        }
        let duplicate = state.assignments.values().any(|a| {
            a.access_token == assignment.access_token
                || (a.exam_id == assignment.exam_id && a.candidate_id == assignment.candidate_id)
        });
        if duplicate {
            return Err(Error::BadRequest("Assignment already exists".to_string()));
        }
        let row = ExamAssignment {
            id: Uuid::new_v4(),
            exam_id: assignment.exam_id,
            candidate_id: assignment.candidate_id,
            access_token: assignment.access_token,
            status: AssignmentStatus::Assigned,
            scheduled_start: assignment.scheduled_start,
            duration_override_minutes: assignment.duration_override_minutes,
            started_at: None,
            submitted_at: None,
            score: None,
            admin_paused: false,
            proctoring: assignment.proctoring,
            answers: AnswerSheet::new(),
            auto_submitted: false,
            submit_reason: None,
            last_heartbeat_at: None,
            created_at: Utc::now(),
        };
        state.assignments.insert(row.id, row.clone());
        Ok(row)
    }

    async fn assignment(&self, id: Uuid) -> Result<ExamAssignment> {
        self.state
            .read()
            .await
            .assignments
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("Assignment", id))
    }

    async fn assignment_by_token(&self, token: &str) -> Result<ExamAssignment> {
        self.state
            .read()
            .await
            .assignments
            .values()
            .find(|a| a.access_token == token)
            .cloned()
            .ok_or_else(|| Error::NotFound("Exam session not found".to_string()))
    }

    async fn assignment_for_candidate(&self, exam_id: Uuid, candidate_id: Uuid) -> Result<ExamAssignment> {
        self.state
            .read()
            .await
            .assignments
            .values()
            .find(|a| a.exam_id == exam_id && a.candidate_id == candidate_id)
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Candidate {} has no assignment for exam {}",
                    candidate_id, exam_id
                ))
            })
    }

    async fn mark_started(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<ExamAssignment>> {
        let mut state = self.state.write().await;
        let row = state
            .assignments
            .get_mut(&id)
            .ok_or_else(|| not_found("Assignment", id))?;
        if row.status != AssignmentStatus::Assigned {
            return Ok(None);
        }
        row.status = AssignmentStatus::InProgress;
        row.started_at.get_or_insert(now);
        Ok(Some(row.clone()))
    }

    async fn save_answer(&self, id: Uuid, question_id: i32, answer: &JsonValue) -> Result<bool> {
        let mut state = self.state.write().await;
        let row = state
            .assignments
            .get_mut(&id)
            .ok_or_else(|| not_found("Assignment", id))?;
        if row.status != AssignmentStatus::InProgress || row.submitted_at.is_some() {
            return Ok(false);
        }
        row.answers.insert(question_id, answer.clone());
        Ok(true)
    }

    async fn claim_submission(
        &self,
        id: Uuid,
        answers: &AnswerSheet,
        reason: SubmitReason,
        now: DateTime<Utc>,
    ) -> Result<Option<ExamAssignment>> {
        let mut state = self.state.write().await;
        let row = state
            .assignments
            .get_mut(&id)
            .ok_or_else(|| not_found("Assignment", id))?;
        if row.status != AssignmentStatus::InProgress || row.submitted_at.is_some() {
            return Ok(None);
        }
        row.submitted_at = Some(now);
        row.answers = answers.clone();
        row.submit_reason = Some(reason);
        row.auto_submitted = reason.is_auto();
        Ok(Some(row.clone()))
    }

    async fn release_submission(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(row) = state.assignments.get_mut(&id) {
            if row.status == AssignmentStatus::InProgress {
                row.submitted_at = None;
                row.submit_reason = None;
                row.auto_submitted = false;
            }
        }
        Ok(())
    }

    async fn finalize_submission(
        &self,
        id: Uuid,
        status: AssignmentStatus,
        score: Decimal,
    ) -> Result<ExamAssignment> {
        let mut state = self.state.write().await;
        let row = state
            .assignments
            .get_mut(&id)
            .ok_or_else(|| not_found("Assignment", id))?;
        if row.status != AssignmentStatus::InProgress || row.submitted_at.is_none() {
            return Err(Error::InvalidState(format!(
                "Assignment {} has no pending submission",
                id
            )));
        }
        row.status = status;
        row.score = Some(score);
        Ok(row.clone())
    }

    async fn set_paused(&self, id: Uuid, paused: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let row = state
            .assignments
            .get_mut(&id)
            .ok_or_else(|| not_found("Assignment", id))?;
        row.admin_paused = paused;
        Ok(())
    }

    async fn touch_heartbeat(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(row) = state.assignments.get_mut(&id) {
            row.last_heartbeat_at = Some(now);
        }
        Ok(())
    }

    async fn expired_in_progress(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<ExamAssignment>> {
        let state = self.state.read().await;
        let mut expired: Vec<ExamAssignment> = state
            .assignments
            .values()
            .filter(|a| a.status == AssignmentStatus::InProgress)
            .filter(|a| match a.submitted_at {
                Some(claimed_at) => claimed_at <= stale_before,
                None => state
                    .exams
                    .get(&a.exam_id)
                    .and_then(|exam| a.deadline(exam))
                    .map(|deadline| deadline <= now)
                    .unwrap_or(false),
            })
            .cloned()
            .collect();
        expired.sort_by_key(|a| a.started_at);
        Ok(expired)
    }

    async fn append_event(&self, event: NewProctorEvent) -> Result<ProctorEvent> {
        let row = ProctorEvent {
            id: Uuid::new_v4(),
            assignment_id: event.assignment_id,
            candidate_id: event.candidate_id,
            event_type: event.event_type,
            occurred_at: event.occurred_at,
            detail: event.detail,
        };
        self.state.write().await.events.push(row.clone());
        Ok(row)
    }

    async fn events_for_assignment(&self, assignment_id: Uuid) -> Result<Vec<ProctorEvent>> {
        let state = self.state.read().await;
        let mut events: Vec<ProctorEvent> = state
            .events
            .iter()
            .filter(|e| e.assignment_id == assignment_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.occurred_at);
        Ok(events)
    }

    async fn events_for_exam(&self, exam_id: Uuid) -> Result<Vec<ProctorEvent>> {
        let state = self.state.read().await;
        let mut events: Vec<ProctorEvent> = state
            .events
            .iter()
            .filter(|e| {
                state
                    .assignments
                    .get(&e.assignment_id)
                    .map(|a| a.exam_id == exam_id)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.occurred_at);
        Ok(events)
    }
}

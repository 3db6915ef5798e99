use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::assignment::{AnswerSheet, AssignmentStatus, ExamAssignment, NewAssignment, SubmitReason};
use crate::models::exam::{Exam, NewExam};
use crate::models::proctor_event::{NewProctorEvent, ProctorEvent};

/// Durable storage for assignments and the proctor log.
///
/// Conditional updates (`mark_started`, `save_answer`, `claim_submission`)
/// are compare-and-set: they only touch rows in the expected state and report
/// whether they did, so concurrent callers cannot both win.
#[async_trait]
pub trait ProctoringStore: Send + Sync {
    async fn insert_exam(&self, exam: NewExam) -> Result<Exam>;

    async fn exam(&self, id: Uuid) -> Result<Exam>;

    async fn insert_assignment(&self, assignment: NewAssignment) -> Result<ExamAssignment>;

    async fn assignment(&self, id: Uuid) -> Result<ExamAssignment>;

    async fn assignment_by_token(&self, token: &str) -> Result<ExamAssignment>;

    async fn assignment_for_candidate(&self, exam_id: Uuid, candidate_id: Uuid) -> Result<ExamAssignment>;

    /// `assigned -> in_progress`. `None` when the row was not `assigned`.
    async fn mark_started(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<ExamAssignment>>;

    /// Upserts one answer while the assignment is in progress and unclaimed.
    async fn save_answer(&self, id: Uuid, question_id: i32, answer: &JsonValue) -> Result<bool>;

    /// Records the final answers and locks the assignment against further
    /// submissions. `None` when it is not in progress or already claimed.
    async fn claim_submission(
        &self,
        id: Uuid,
        answers: &AnswerSheet,
        reason: SubmitReason,
        now: DateTime<Utc>,
    ) -> Result<Option<ExamAssignment>>;

    /// Undoes a claim whose evaluation failed.
    async fn release_submission(&self, id: Uuid) -> Result<()>;

    async fn finalize_submission(
        &self,
        id: Uuid,
        status: AssignmentStatus,
        score: Decimal,
    ) -> Result<ExamAssignment>;

    async fn set_paused(&self, id: Uuid, paused: bool) -> Result<()>;

    async fn touch_heartbeat(&self, id: Uuid, now: DateTime<Utc>) -> Result<()>;

    /// In-progress assignments that need the sweeper: unclaimed ones whose
    /// countdown reached zero, and ones claimed before `stale_before` that
    /// never got finalized.
    async fn expired_in_progress(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<ExamAssignment>>;

    async fn append_event(&self, event: NewProctorEvent) -> Result<ProctorEvent>;

    async fn events_for_assignment(&self, assignment_id: Uuid) -> Result<Vec<ProctorEvent>>;

    /// Every logged event of every assignment of the exam.
    async fn events_for_exam(&self, exam_id: Uuid) -> Result<Vec<ProctorEvent>>;
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::database::store::ProctoringStore;
use crate::error::{Error, Result};
use crate::models::assignment::{
    AnswerSheet, AssignmentStatus, ExamAssignment, NewAssignment, ProctoringOptions, SubmitReason,
};
use crate::models::exam::{Exam, NewExam};
use crate::models::proctor_event::{NewProctorEvent, ProctorEvent};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct ExamRow {
    id: Uuid,
    title: String,
    duration_minutes: i32,
    passing_score: Decimal,
    questions: JsonValue,
    created_at: DateTime<Utc>,
}

impl From<ExamRow> for Exam {
    fn from(row: ExamRow) -> Self {
        Exam {
            id: row.id,
            title: row.title,
            duration_minutes: row.duration_minutes,
            passing_score: row.passing_score,
            questions: row.questions,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct AssignmentRow {
    id: Uuid,
    exam_id: Uuid,
    candidate_id: Uuid,
    access_token: String,
    status: String,
    scheduled_start: Option<DateTime<Utc>>,
    duration_override_minutes: Option<i32>,
    started_at: Option<DateTime<Utc>>,
    submitted_at: Option<DateTime<Utc>>,
    score: Option<Decimal>,
    admin_paused: bool,
    proctoring: Json<ProctoringOptions>,
    answers: Json<AnswerSheet>,
    auto_submitted: bool,
    submit_reason: Option<String>,
    last_heartbeat_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AssignmentRow> for ExamAssignment {
    type Error = Error;

    fn try_from(row: AssignmentRow) -> Result<Self> {
        Ok(ExamAssignment {
            id: row.id,
            exam_id: row.exam_id,
            candidate_id: row.candidate_id,
            access_token: row.access_token,
            status: row.status.parse()?,
            scheduled_start: row.scheduled_start,
            duration_override_minutes: row.duration_override_minutes,
            started_at: row.started_at,
            submitted_at: row.submitted_at,
            score: row.score,
            admin_paused: row.admin_paused,
            proctoring: row.proctoring.0,
            answers: row.answers.0,
            auto_submitted: row.auto_submitted,
            submit_reason: row
                .submit_reason
                .as_deref()
                .map(str::parse::<SubmitReason>)
                .transpose()?,
            last_heartbeat_at: row.last_heartbeat_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    assignment_id: Uuid,
    candidate_id: Uuid,
    event_type: String,
    occurred_at: DateTime<Utc>,
    detail: JsonValue,
}

impl TryFrom<EventRow> for ProctorEvent {
    type Error = Error;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(ProctorEvent {
            id: row.id,
            assignment_id: row.assignment_id,
            candidate_id: row.candidate_id,
            event_type: row.event_type.parse()?,
            occurred_at: row.occurred_at,
            detail: row.detail,
        })
    }
}

fn assignment_opt(row: Option<AssignmentRow>) -> Result<Option<ExamAssignment>> {
    row.map(ExamAssignment::try_from).transpose()
}

#[async_trait]
impl ProctoringStore for PgStore {
    async fn insert_exam(&self, exam: NewExam) -> Result<Exam> {
        let row = sqlx::query_as::<_, ExamRow>(
            r#"
            INSERT INTO exams (id, title, duration_minutes, passing_score, questions)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(exam.title)
        .bind(exam.duration_minutes)
        .bind(exam.passing_score)
        .bind(exam.questions)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn exam(&self, id: Uuid) -> Result<Exam> {
        let row = sqlx::query_as::<_, ExamRow>(r#"SELECT * FROM exams WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Exam {} not found", id)))?;
        Ok(row.into())
    }

    async fn insert_assignment(&self, assignment: NewAssignment) -> Result<ExamAssignment> {
        let row = sqlx::query_as::<_, AssignmentRow>(
            r#"
            INSERT INTO exam_assignments (
                id, exam_id, candidate_id, access_token, status,
                scheduled_start, duration_override_minutes, proctoring, answers
            ) VALUES ($1, $2, $3, $4, 'assigned', $5, $6, $7, '{}'::jsonb)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(assignment.exam_id)
        .bind(assignment.candidate_id)
        .bind(assignment.access_token)
        .bind(assignment.scheduled_start)
        .bind(assignment.duration_override_minutes)
        .bind(Json(assignment.proctoring))
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn assignment(&self, id: Uuid) -> Result<ExamAssignment> {
        let row = sqlx::query_as::<_, AssignmentRow>(r#"SELECT * FROM exam_assignments WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        assignment_opt(row)?.ok_or_else(|| Error::NotFound(format!("Assignment {} not found", id)))
    }

    async fn assignment_by_token(&self, token: &str) -> Result<ExamAssignment> {
        let row = sqlx::query_as::<_, AssignmentRow>(
            r#"SELECT * FROM exam_assignments WHERE access_token = $1"#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        assignment_opt(row)?.ok_or_else(|| Error::NotFound("Exam session not found".to_string()))
    }

    async fn assignment_for_candidate(&self, exam_id: Uuid, candidate_id: Uuid) -> Result<ExamAssignment> {
        let row = sqlx::query_as::<_, AssignmentRow>(
            r#"SELECT * FROM exam_assignments WHERE exam_id = $1 AND candidate_id = $2"#,
        )
        .bind(exam_id)
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await?;
        assignment_opt(row)?.ok_or_else(|| {
            Error::NotFound(format!(
                "Candidate {} has no assignment for exam {}",
                candidate_id, exam_id
            ))
        })
    }

    async fn mark_started(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<ExamAssignment>> {
        let row = sqlx::query_as::<_, AssignmentRow>(
            r#"
            UPDATE exam_assignments
            SET status = 'in_progress', started_at = COALESCE(started_at, $2)
            WHERE id = $1 AND status = 'assigned'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        assignment_opt(row)
    }

    async fn save_answer(&self, id: Uuid, question_id: i32, answer: &JsonValue) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE exam_assignments
            SET answers = answers || jsonb_build_object($2::text, $3::jsonb)
            WHERE id = $1 AND status = 'in_progress' AND submitted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(question_id.to_string())
        .bind(answer)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn claim_submission(
        &self,
        id: Uuid,
        answers: &AnswerSheet,
        reason: SubmitReason,
        now: DateTime<Utc>,
    ) -> Result<Option<ExamAssignment>> {
        let row = sqlx::query_as::<_, AssignmentRow>(
            r#"
            UPDATE exam_assignments
            SET submitted_at = $2, answers = $3, submit_reason = $4, auto_submitted = $5
            WHERE id = $1 AND status = 'in_progress' AND submitted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(Json(answers))
        .bind(reason.as_str())
        .bind(reason.is_auto())
        .fetch_optional(&self.pool)
        .await?;
        assignment_opt(row)
    }

    async fn release_submission(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE exam_assignments
            SET submitted_at = NULL, submit_reason = NULL, auto_submitted = FALSE
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finalize_submission(
        &self,
        id: Uuid,
        status: AssignmentStatus,
        score: Decimal,
    ) -> Result<ExamAssignment> {
        let row = sqlx::query_as::<_, AssignmentRow>(
            r#"
            UPDATE exam_assignments
            SET status = $2, score = $3
            WHERE id = $1 AND status = 'in_progress' AND submitted_at IS NOT NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(score)
        .fetch_optional(&self.pool)
        .await?;
        assignment_opt(row)?
            .ok_or_else(|| Error::InvalidState(format!("Assignment {} has no pending submission", id)))
    }

    async fn set_paused(&self, id: Uuid, paused: bool) -> Result<()> {
        sqlx::query(r#"UPDATE exam_assignments SET admin_paused = $2 WHERE id = $1"#)
            .bind(id)
            .bind(paused)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn touch_heartbeat(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(r#"UPDATE exam_assignments SET last_heartbeat_at = $2 WHERE id = $1"#)
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn expired_in_progress(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<ExamAssignment>> {
        let rows = sqlx::query_as::<_, AssignmentRow>(
            r#"
            SELECT a.*
            FROM exam_assignments a
            JOIN exams e ON e.id = a.exam_id
            WHERE a.status = 'in_progress'
              AND a.started_at IS NOT NULL
              AND (
                (a.submitted_at IS NULL
                  AND a.started_at + make_interval(mins => COALESCE(a.duration_override_minutes, e.duration_minutes)) <= $1)
                OR a.submitted_at <= $2
              )
            ORDER BY a.started_at ASC
            "#,
        )
        .bind(now)
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ExamAssignment::try_from).collect()
    }

    async fn append_event(&self, event: NewProctorEvent) -> Result<ProctorEvent> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            INSERT INTO proctor_events (id, assignment_id, candidate_id, event_type, occurred_at, detail)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, assignment_id, candidate_id, event_type, occurred_at, detail
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.assignment_id)
        .bind(event.candidate_id)
        .bind(event.event_type.as_str())
        .bind(event.occurred_at)
        .bind(event.detail)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn events_for_assignment(&self, assignment_id: Uuid) -> Result<Vec<ProctorEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, assignment_id, candidate_id, event_type, occurred_at, detail
            FROM proctor_events
            WHERE assignment_id = $1
            ORDER BY occurred_at ASC
            "#,
        )
        .bind(assignment_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ProctorEvent::try_from).collect()
    }

    async fn events_for_exam(&self, exam_id: Uuid) -> Result<Vec<ProctorEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT ev.id, ev.assignment_id, ev.candidate_id, ev.event_type, ev.occurred_at, ev.detail
            FROM proctor_events ev
            JOIN exam_assignments a ON a.id = ev.assignment_id
            WHERE a.exam_id = $1
            ORDER BY ev.occurred_at ASC
            "#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ProctorEvent::try_from).collect()
    }
}

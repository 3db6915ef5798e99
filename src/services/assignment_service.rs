use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::database::ProctoringStore;
use crate::dto::monitor_dto::CreateAssignmentRequest;
use crate::dto::public_dto::{
    public_questions, ExamSessionSummary, HeartbeatResponse, SaveAnswerRequest, SaveAnswerResponse,
    StartExamResponse, StatusResponse, SubmitExamRequest, SubmitExamResponse,
};
use crate::error::{Error, Result};
use crate::models::assignment::{
    AnswerSheet, AssignmentStatus, ExamAssignment, NewAssignment, SubmitReason,
};
use crate::models::exam::Exam;
use crate::services::grading_service::{Evaluation, Scorer};
use crate::utils::time::remaining_seconds;
use crate::utils::token::{generate_access_token, looks_like_access_token};

/// A submission claim older than this was abandoned mid-way and is retried
/// by the sweeper. Well above the scoring client's request timeout.
const STALE_CLAIM_SECS: i64 = 120;

/// Server half of the exam session state machine.
///
/// `assigned -> in_progress -> {completed | passed | failed}`. Every submit
/// path (manual, automatic, sweeper, admin terminate) funnels through
/// [`AssignmentService::submit_assignment`], which claims the row before
/// scoring so only one caller ever reaches the scorer.
#[derive(Clone)]
pub struct AssignmentService {
    store: Arc<dyn ProctoringStore>,
    scorer: Arc<dyn Scorer>,
}

impl AssignmentService {
    pub fn new(store: Arc<dyn ProctoringStore>, scorer: Arc<dyn Scorer>) -> Self {
        Self { store, scorer }
    }

    pub async fn assign(&self, req: CreateAssignmentRequest) -> Result<ExamAssignment> {
        req.validate()?;
        let exam = self.store.exam(req.exam_id).await?;
        let assignment = self
            .store
            .insert_assignment(NewAssignment {
                exam_id: exam.id,
                candidate_id: req.candidate_id,
                access_token: generate_access_token(),
                scheduled_start: req.scheduled_start,
                duration_override_minutes: req.duration_minutes,
                proctoring: req.proctoring,
            })
            .await?;
        tracing::info!(
            "Assigned exam {} to candidate {} (assignment {})",
            exam.id,
            assignment.candidate_id,
            assignment.id
        );
        Ok(assignment)
    }

    pub async fn load(&self, token: &str) -> Result<(ExamAssignment, Exam)> {
        if !looks_like_access_token(token) {
            return Err(Error::NotFound("Exam session not found".to_string()));
        }
        let assignment = self.store.assignment_by_token(token).await?;
        let exam = self.store.exam(assignment.exam_id).await?;
        Ok((assignment, exam))
    }

    pub async fn summary(&self, token: &str) -> Result<ExamSessionSummary> {
        let (assignment, exam) = self.load(token).await?;
        Ok(ExamSessionSummary {
            assignment_id: assignment.id,
            exam_id: exam.id,
            candidate_id: assignment.candidate_id,
            exam_title: exam.title.clone(),
            status: assignment.status,
            proctoring: assignment.proctoring,
            scheduled_start: assignment.scheduled_start,
            entry_window: assignment.entry_window(&exam),
            duration_minutes: assignment.duration_minutes(&exam),
            admin_paused: assignment.admin_paused,
        })
    }

    /// Starting twice is harmless: an in-progress assignment is returned
    /// as-is with its original `started_at`.
    pub async fn start(&self, token: &str, now: DateTime<Utc>) -> Result<StartExamResponse> {
        let (assignment, exam) = self.load(token).await?;

        if assignment.is_submission_locked() {
            return Err(Error::AlreadySubmitted);
        }
        if assignment.status == AssignmentStatus::InProgress {
            tracing::debug!("Resuming exam session {}", assignment.id);
            return start_response(&assignment, &exam, now);
        }

        if let Some(window) = assignment.entry_window(&exam) {
            window.check(now)?;
        }

        let started = match self.store.mark_started(assignment.id, now).await? {
            Some(started) => started,
            None => {
                // Lost the race to a concurrent start.
                let current = self.store.assignment(assignment.id).await?;
                if current.status != AssignmentStatus::InProgress || current.is_submission_locked() {
                    return Err(Error::AlreadySubmitted);
                }
                current
            }
        };

        tracing::info!(
            "Candidate {} started exam {} (assignment {})",
            started.candidate_id,
            exam.id,
            started.id
        );
        start_response(&started, &exam, now)
    }

    pub async fn save_answer(
        &self,
        token: &str,
        req: SaveAnswerRequest,
        now: DateTime<Utc>,
    ) -> Result<SaveAnswerResponse> {
        req.validate()?;
        let (assignment, exam) = self.load(token).await?;

        if assignment.is_submission_locked() {
            return Err(Error::AlreadySubmitted);
        }
        if assignment.status != AssignmentStatus::InProgress {
            return Err(Error::InvalidState("Exam has not been started".to_string()));
        }
        if assignment.admin_paused {
            return Err(Error::InvalidState("Exam is paused by the proctor".to_string()));
        }
        if let Some(deadline) = assignment.deadline(&exam) {
            if now > deadline {
                return Err(Error::SessionEnded { ended_at: deadline });
            }
        }
        if !exam.parsed_questions().iter().any(|q| q.id == req.question_id) {
            return Err(Error::BadRequest(format!(
                "Question {} is not part of this exam",
                req.question_id
            )));
        }

        if !self
            .store
            .save_answer(assignment.id, req.question_id, &req.answer)
            .await?
        {
            return Err(Error::AlreadySubmitted);
        }

        Ok(SaveAnswerResponse {
            saved: true,
            question_id: req.question_id,
            timestamp: now,
        })
    }

    pub async fn submit(
        &self,
        token: &str,
        req: SubmitExamRequest,
        now: DateTime<Utc>,
    ) -> Result<SubmitExamResponse> {
        req.validate()?;
        let reason = req.resolve_reason()?;
        let (assignment, exam) = self.load(token).await?;

        let mut answers = assignment.answers.clone();
        answers.extend(req.answers);
        self.submit_assignment(&assignment, &exam, answers, reason, now).await
    }

    /// Submits with whatever answers were saved so far.
    pub async fn submit_saved(
        &self,
        assignment_id: Uuid,
        reason: SubmitReason,
        now: DateTime<Utc>,
    ) -> Result<SubmitExamResponse> {
        let assignment = self.store.assignment(assignment_id).await?;
        let exam = self.store.exam(assignment.exam_id).await?;
        let answers = assignment.answers.clone();
        self.submit_assignment(&assignment, &exam, answers, reason, now).await
    }

    pub async fn submit_assignment(
        &self,
        assignment: &ExamAssignment,
        exam: &Exam,
        answers: AnswerSheet,
        reason: SubmitReason,
        now: DateTime<Utc>,
    ) -> Result<SubmitExamResponse> {
        if assignment.is_submission_locked() {
            return Err(Error::AlreadySubmitted);
        }
        if assignment.status != AssignmentStatus::InProgress {
            return Err(Error::InvalidState("Exam has not been started".to_string()));
        }

        let claimed = self
            .store
            .claim_submission(assignment.id, &answers, reason, now)
            .await?
            .ok_or(Error::AlreadySubmitted)?;

        let (evaluation, finished) = match self.score_claimed(&claimed, exam).await {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!("Submission of assignment {} failed: {}", claimed.id, e);
                if let Err(release_err) = self.store.release_submission(claimed.id).await {
                    tracing::error!(
                        "Failed to release submission claim on {}: {}",
                        claimed.id,
                        release_err
                    );
                }
                return Err(e);
            }
        };
        let status = finished.status;

        tracing::info!(
            "Assignment {} submitted ({}), status {} score {}/{}",
            finished.id,
            reason.as_str(),
            status,
            evaluation.score,
            evaluation.max_score
        );

        let message = match status {
            AssignmentStatus::Passed => "Exam passed",
            AssignmentStatus::Completed => "Exam submitted for review",
            _ => "Exam submitted",
        };

        Ok(SubmitExamResponse {
            assignment_id: finished.id,
            status,
            score: evaluation.score,
            max_score: evaluation.max_score,
            percentage: evaluation.percentage,
            auto_submitted: finished.auto_submitted,
            reason,
            message: message.to_string(),
        })
    }

    async fn score_claimed(
        &self,
        claimed: &ExamAssignment,
        exam: &Exam,
    ) -> Result<(Evaluation, ExamAssignment)> {
        let evaluation = self.scorer.evaluate(exam, &claimed.answers).await?;
        let finished = self
            .store
            .finalize_submission(claimed.id, evaluation.status(), evaluation.score)
            .await?;
        Ok((evaluation, finished))
    }

    pub async fn status(&self, token: &str, now: DateTime<Utc>) -> Result<StatusResponse> {
        let (assignment, exam) = self.load(token).await?;
        let remaining = match (assignment.status, assignment.started_at) {
            (AssignmentStatus::InProgress, Some(started)) => {
                Some(remaining_seconds(started, assignment.duration(&exam), now))
            }
            _ => None,
        };
        Ok(StatusResponse {
            status: assignment.status,
            started_at: assignment.started_at,
            submitted_at: assignment.submitted_at,
            remaining_seconds: remaining,
            questions_answered: assignment.answers.len(),
            total_questions: exam.parsed_questions().len(),
            admin_paused: assignment.admin_paused,
        })
    }

    pub async fn record_heartbeat(&self, token: &str, now: DateTime<Utc>) -> Result<HeartbeatResponse> {
        let (assignment, _) = self.load(token).await?;
        if assignment.status != AssignmentStatus::InProgress {
            return Err(Error::InvalidState("Exam is not in progress".to_string()));
        }
        self.store.touch_heartbeat(assignment.id, now).await?;
        Ok(HeartbeatResponse { received_at: now })
    }

    /// Auto-submits every in-progress assignment whose countdown ran out and
    /// retries submissions whose claim was never finalized. Returns how many
    /// were submitted by this sweep.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize> {
        let stale_before = now - chrono::Duration::seconds(STALE_CLAIM_SECS);
        let expired = self.store.expired_in_progress(now, stale_before).await?;
        let mut submitted = 0;
        for mut assignment in expired {
            let exam = match self.store.exam(assignment.exam_id).await {
                Ok(exam) => exam,
                Err(e) => {
                    tracing::warn!("Skipping expired assignment {}: {}", assignment.id, e);
                    continue;
                }
            };
            let reason = match (assignment.submitted_at, assignment.submit_reason) {
                (Some(_), claimed_reason) => {
                    tracing::warn!("Retrying stale submission claim on {}", assignment.id);
                    if let Err(e) = self.store.release_submission(assignment.id).await {
                        tracing::warn!("Failed to release stale claim on {}: {}", assignment.id, e);
                        continue;
                    }
                    assignment.submitted_at = None;
                    claimed_reason.unwrap_or(SubmitReason::TimeExpired)
                }
                (None, _) => SubmitReason::TimeExpired,
            };
            let answers = assignment.answers.clone();
            match self
                .submit_assignment(&assignment, &exam, answers, reason, now)
                .await
            {
                Ok(_) => submitted += 1,
                Err(Error::AlreadySubmitted) => {
                    tracing::debug!("Assignment {} was submitted concurrently", assignment.id)
                }
                Err(e) => tracing::warn!("Failed to auto-submit {}: {}", assignment.id, e),
            }
        }
        Ok(submitted)
    }
}

fn start_response(assignment: &ExamAssignment, exam: &Exam, now: DateTime<Utc>) -> Result<StartExamResponse> {
    let started_at = assignment
        .started_at
        .ok_or_else(|| Error::Internal(format!("Assignment {} has no start time", assignment.id)))?;
    let duration = assignment.duration(exam);
    Ok(StartExamResponse {
        assignment_id: assignment.id,
        exam_id: exam.id,
        candidate_id: assignment.candidate_id,
        status: assignment.status,
        started_at,
        deadline: started_at + duration,
        remaining_seconds: remaining_seconds(started_at, duration, now),
        duration_minutes: assignment.duration_minutes(exam),
        proctoring: assignment.proctoring,
        admin_paused: assignment.admin_paused,
        questions: public_questions(&exam.questions),
        answers: assignment.answers.clone(),
    })
}

//! Candidate-side exam session state.
//!
//! `Assigned -> InProgress -> Submitting -> Finished`. A failed submission
//! falls back to `InProgress` with the error kept for the banner. Answers
//! can only be touched through the `InProgress` variant.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::time::Instant;
use uuid::Uuid;

use crate::dto::public_dto::{StartExamResponse, SubmitExamResponse};
use crate::error::Error;
use crate::models::assignment::{AnswerSheet, ProctoringOptions, SubmitReason};
use crate::proctor::error::{BlockReason, SessionError, SessionResult};
use crate::proctor::sensor::ViolationCounters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Assigned,
    InProgress,
    Submitting,
    Finished,
}

/// Blocking overlays shown over the exam.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overlay {
    pub paused: bool,
    pub mobile_lost: bool,
    /// Never cleared once set.
    pub terminated: bool,
}

impl Overlay {
    pub fn block_reason(&self) -> Option<BlockReason> {
        if self.terminated {
            Some(BlockReason::Terminated)
        } else if self.mobile_lost {
            Some(BlockReason::MobileLost)
        } else if self.paused {
            Some(BlockReason::Paused)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActiveExam {
    pub assignment_id: Uuid,
    pub exam_id: Uuid,
    pub candidate_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Local instant at which the countdown hits zero.
    pub deadline: Instant,
    pub proctoring: ProctoringOptions,
    pub questions: JsonValue,
    pub answers: AnswerSheet,
    pub counters: ViolationCounters,
    pub overlay: Overlay,
}

#[derive(Debug, Clone)]
pub struct FinishedExam {
    pub reason: SubmitReason,
    /// `None` when the server reported an earlier submission.
    pub result: Option<SubmitExamResponse>,
    pub terminated: bool,
}

#[derive(Debug, Clone)]
pub enum SessionState {
    Assigned,
    InProgress(Box<ActiveExam>),
    Submitting {
        reason: SubmitReason,
        exam: Box<ActiveExam>,
    },
    Finished(FinishedExam),
}

#[derive(Debug)]
pub struct ExamSession {
    state: SessionState,
    last_error: Option<String>,
}

impl Default for ExamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ExamSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Assigned,
            last_error: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        match self.state {
            SessionState::Assigned => SessionPhase::Assigned,
            SessionState::InProgress(_) => SessionPhase::InProgress,
            SessionState::Submitting { .. } => SessionPhase::Submitting,
            SessionState::Finished(_) => SessionPhase::Finished,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn begin(&mut self, started: &StartExamResponse, now: Instant) -> SessionResult<()> {
        if !matches!(self.state, SessionState::Assigned) {
            return Err(SessionError::NotInProgress);
        }
        let remaining = std::time::Duration::from_secs(started.remaining_seconds.max(0) as u64);
        self.state = SessionState::InProgress(Box::new(ActiveExam {
            assignment_id: started.assignment_id,
            exam_id: started.exam_id,
            candidate_id: started.candidate_id,
            started_at: started.started_at,
            deadline: now + remaining,
            proctoring: started.proctoring,
            questions: started.questions.clone(),
            answers: started.answers.clone(),
            counters: ViolationCounters::default(),
            overlay: Overlay {
                paused: started.admin_paused,
                ..Overlay::default()
            },
        }));
        self.last_error = None;
        Ok(())
    }

    pub fn active(&self) -> Option<&ActiveExam> {
        match &self.state {
            SessionState::InProgress(exam) => Some(exam),
            _ => None,
        }
    }

    pub fn active_mut(&mut self) -> SessionResult<&mut ActiveExam> {
        match &mut self.state {
            SessionState::InProgress(exam) => Ok(exam),
            _ => Err(SessionError::NotInProgress),
        }
    }

    /// Overlay of the running exam, also while a submission is in flight.
    pub fn overlay(&self) -> Option<Overlay> {
        match &self.state {
            SessionState::InProgress(exam) | SessionState::Submitting { exam, .. } => Some(exam.overlay),
            _ => None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            SessionState::InProgress(exam) | SessionState::Submitting { exam, .. } => Some(exam.deadline),
            _ => None,
        }
    }

    pub fn mark_terminated(&mut self) {
        match &mut self.state {
            SessionState::InProgress(exam) | SessionState::Submitting { exam, .. } => {
                exam.overlay.terminated = true
            }
            _ => {}
        }
    }

    /// Terminated by the proctor but not yet submitted.
    pub fn terminate_pending(&self) -> bool {
        self.active().map(|e| e.overlay.terminated).unwrap_or(false)
    }

    pub fn record_answer(&mut self, question_id: i32, answer: JsonValue) -> SessionResult<()> {
        let exam = self.active_mut()?;
        if let Some(reason) = exam.overlay.block_reason() {
            return Err(SessionError::Blocked(reason));
        }
        exam.answers.insert(question_id, answer);
        Ok(())
    }

    /// Moves to `Submitting` and hands out the answers to send. `None` when
    /// not in progress, which also covers a submission already in flight.
    pub fn begin_submit(&mut self, reason: SubmitReason) -> Option<AnswerSheet> {
        let state = std::mem::replace(&mut self.state, SessionState::Assigned);
        match state {
            SessionState::InProgress(exam) => {
                let answers = exam.answers.clone();
                self.state = SessionState::Submitting { reason, exam };
                Some(answers)
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Returns `true` when the session is now finished.
    pub fn finish_submit(&mut self, outcome: &Result<SubmitExamResponse, Error>) -> bool {
        let state = std::mem::replace(&mut self.state, SessionState::Assigned);
        let SessionState::Submitting { reason, exam } = state else {
            self.state = state;
            return matches!(self.state, SessionState::Finished(_));
        };
        match outcome {
            Ok(result) => {
                self.last_error = None;
                self.state = SessionState::Finished(FinishedExam {
                    reason,
                    result: Some(result.clone()),
                    terminated: exam.overlay.terminated,
                });
                true
            }
            Err(Error::AlreadySubmitted) => {
                self.state = SessionState::Finished(FinishedExam {
                    reason,
                    result: None,
                    terminated: exam.overlay.terminated,
                });
                true
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.state = SessionState::InProgress(exam);
                false
            }
        }
    }
}

use futures::stream::{BoxStream, StreamExt};

use crate::dto::public_dto::PublishSignalRequest;
use crate::error::{Error, Result};
use crate::models::signal::{is_for_me, Origin, SignalEnvelope, SignalEvent};
use crate::services::assignment_service::AssignmentService;
use crate::services::signaling_service::SignalingService;

/// Candidate-side access to an exam topic, authorised by access token.
/// Exam and candidate ids on outgoing envelopes come from the assignment.
#[derive(Clone)]
pub struct CandidateChannel {
    assignments: AssignmentService,
    signals: SignalingService,
}

impl CandidateChannel {
    pub fn new(assignments: AssignmentService, signals: SignalingService) -> Self {
        Self {
            assignments,
            signals,
        }
    }

    pub async fn publish(&self, token: &str, req: PublishSignalRequest) -> Result<usize> {
        let (assignment, _) = self.assignments.load(token).await?;
        if assignment.status.is_terminal() {
            return Err(Error::AlreadySubmitted);
        }
        if req.origin == Origin::Admin {
            return Err(Error::Forbidden("Candidates cannot publish as admin".to_string()));
        }
        match &req.event {
            SignalEvent::Command { .. } => {
                return Err(Error::Forbidden("Candidates cannot issue commands".to_string()))
            }
            SignalEvent::Violation { .. } => {
                return Err(Error::BadRequest(
                    "Violations are reported through the events endpoint".to_string(),
                ))
            }
            _ => {}
        }

        Ok(self.signals.publish(SignalEnvelope::new(
            assignment.exam_id,
            assignment.candidate_id,
            req.origin,
            req.event,
        )))
    }

    /// Envelopes concerning the token's candidate, including its own echoes.
    pub async fn subscribe(&self, token: &str) -> Result<BoxStream<'static, SignalEnvelope>> {
        let (assignment, _) = self.assignments.load(token).await?;
        if assignment.status.is_terminal() {
            return Err(Error::AlreadySubmitted);
        }
        let candidate_id = assignment.candidate_id;
        tracing::debug!("Candidate {} subscribed to exam {}", candidate_id, assignment.exam_id);
        Ok(self
            .signals
            .subscribe_stream(assignment.exam_id)
            .filter(move |env| std::future::ready(is_for_me(env, candidate_id)))
            .boxed())
    }
}

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::database::ProctoringStore;
use crate::dto::public_dto::ViolationReport;
use crate::error::{Error, Result};
use crate::models::assignment::{AssignmentStatus, ExamAssignment};
use crate::models::proctor_event::{NewProctorEvent, ProctorEvent, ProctorEventType};
use crate::models::signal::{AdminCommand, Origin, SignalEnvelope, SignalEvent};
use crate::services::signaling_service::SignalingService;

/// Append-only violation log. Candidate reports are also mirrored onto the
/// exam topic so live dashboards see them without polling.
#[derive(Clone)]
pub struct ProctorLogService {
    store: Arc<dyn ProctoringStore>,
    signals: SignalingService,
}

impl ProctorLogService {
    pub fn new(store: Arc<dyn ProctoringStore>, signals: SignalingService) -> Self {
        Self { store, signals }
    }

    pub async fn record(&self, token: &str, report: ViolationReport, now: DateTime<Utc>) -> Result<ProctorEvent> {
        let assignment = self.store.assignment_by_token(token).await?;
        if !report.event_type.is_violation() {
            return Err(Error::BadRequest(format!(
                "Candidates cannot record '{}' events",
                report.event_type
            )));
        }
        if assignment.status != AssignmentStatus::InProgress || assignment.is_submission_locked() {
            return Err(Error::InvalidState(
                "Violations are only recorded while the exam is in progress".to_string(),
            ));
        }

        let event = self
            .store
            .append_event(NewProctorEvent {
                assignment_id: assignment.id,
                candidate_id: assignment.candidate_id,
                event_type: report.event_type,
                occurred_at: report.occurred_at.unwrap_or(now),
                detail: report.detail.clone(),
            })
            .await?;

        tracing::info!(
            "Recorded {} for candidate {} on exam {}",
            event.event_type,
            assignment.candidate_id,
            assignment.exam_id
        );

        self.signals.publish(SignalEnvelope::new(
            assignment.exam_id,
            assignment.candidate_id,
            Origin::Laptop,
            SignalEvent::Violation {
                kind: event.event_type,
                detail: report.detail,
                event_id: Some(event.id),
            },
        ));

        Ok(event)
    }

    pub async fn record_admin_command(
        &self,
        assignment: &ExamAssignment,
        command: AdminCommand,
        now: DateTime<Utc>,
    ) -> Result<ProctorEvent> {
        self.store
            .append_event(NewProctorEvent {
                assignment_id: assignment.id,
                candidate_id: assignment.candidate_id,
                event_type: ProctorEventType::AdminCommand,
                occurred_at: now,
                detail: json!({ "command": command.as_str() }),
            })
            .await
    }

    pub async fn history(&self, assignment_id: Uuid) -> Result<Vec<ProctorEvent>> {
        self.store.events_for_assignment(assignment_id).await
    }
}

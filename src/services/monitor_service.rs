//! Live admin view of an exam, folded from the signaling topic.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::database::ProctoringStore;
use crate::dto::monitor_dto::{AdminPublishRequest, CommandResponse};
use crate::error::{Error, Result};
use crate::models::assignment::{AssignmentStatus, ExamAssignment, SubmitReason};
use crate::models::presence::{liveness_window, LiveHeartbeat, PeerSession};
use crate::models::proctor_event::{ProctorEvent, ProctorEventType};
use crate::models::signal::{AdminCommand, HeartbeatSource, Origin, SignalEnvelope, SignalEvent};
use crate::services::assignment_service::AssignmentService;
use crate::services::proctor_log_service::ProctorLogService;
use crate::services::signaling_service::{into_stream, SignalingService};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub key: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CandidateView {
    pub heartbeats: BTreeMap<HeartbeatSource, LiveHeartbeat>,
    pub violations: BTreeMap<ProctorEventType, u32>,
    pub latest_snapshot: Option<SnapshotRef>,
    pub mobile_connected: bool,
    pub peers: BTreeMap<Origin, PeerSession>,
    pub last_command: Option<AdminCommand>,
}

impl CandidateView {
    pub fn is_live(&self, source: HeartbeatSource, now: DateTime<Utc>) -> bool {
        self.heartbeats
            .get(&source)
            .map(|hb| hb.is_live(now))
            .unwrap_or(false)
    }

    fn seen(&mut self, candidate_id: Uuid, source: HeartbeatSource, at: DateTime<Utc>) {
        self.heartbeats.insert(
            source,
            LiveHeartbeat {
                candidate_id,
                source,
                last_seen: at,
            },
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub candidate_id: Uuid,
    pub laptop_live: bool,
    pub mobile_live: bool,
    pub laptop_last_seen: Option<DateTime<Utc>>,
    pub mobile_last_seen: Option<DateTime<Utc>>,
    pub mobile_connected: bool,
    pub violations: BTreeMap<ProctorEventType, u32>,
    pub total_violations: u32,
    pub latest_snapshot: Option<SnapshotRef>,
    pub peers: Vec<PeerSession>,
    pub last_command: Option<AdminCommand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub exam_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub candidates: Vec<CandidateSummary>,
}

/// Per-exam aggregate. `apply` is a pure fold over envelopes; time only
/// enters through the `received_at` stamp and the `now` of a snapshot.
#[derive(Debug, Clone)]
pub struct ExamDashboard {
    exam_id: Uuid,
    candidates: BTreeMap<Uuid, CandidateView>,
    /// Logged events already counted by `seed`, skipped when they arrive
    /// on the topic as well.
    seeded: HashSet<Uuid>,
}

impl ExamDashboard {
    pub fn new(exam_id: Uuid) -> Self {
        Self {
            exam_id,
            candidates: BTreeMap::new(),
            seeded: HashSet::new(),
        }
    }

    /// Counts violations logged before the dashboard started watching.
    pub fn seed(&mut self, events: &[ProctorEvent]) {
        for event in events.iter().filter(|e| e.event_type.is_violation()) {
            if !self.seeded.insert(event.id) {
                continue;
            }
            let view = self.candidates.entry(event.candidate_id).or_default();
            *view.violations.entry(event.event_type).or_default() += 1;
        }
    }

    pub fn candidate(&self, candidate_id: Uuid) -> Option<&CandidateView> {
        self.candidates.get(&candidate_id)
    }

    pub fn apply(&mut self, env: &SignalEnvelope, received_at: DateTime<Utc>) {
        if env.exam_id != self.exam_id {
            return;
        }
        let candidate_id = env.candidate_id;
        let view = self.candidates.entry(candidate_id).or_default();

        match &env.event {
            SignalEvent::Heartbeat { source } => {
                view.seen(candidate_id, *source, received_at);
                if *source == HeartbeatSource::Mobile {
                    view.mobile_connected = true;
                }
            }
            SignalEvent::Violation { kind, event_id, .. } if env.origin != Origin::Admin => {
                let counted = event_id.map(|id| self.seeded.contains(&id)).unwrap_or(false);
                if !counted {
                    *view.violations.entry(*kind).or_default() += 1;
                }
            }
            SignalEvent::Command { command } if env.origin == Origin::Admin => {
                view.last_command = Some(*command);
            }
            SignalEvent::MobileConnected => {
                view.mobile_connected = true;
                view.seen(candidate_id, HeartbeatSource::Mobile, received_at);
            }
            SignalEvent::MobileDisconnected => {
                view.mobile_connected = false;
                view.heartbeats.remove(&HeartbeatSource::Mobile);
                view.peers.remove(&Origin::Mobile);
            }
            SignalEvent::Offer { sdp } if env.origin != Origin::Admin => {
                view.peers.insert(
                    env.origin,
                    PeerSession::from_offer(candidate_id, env.origin, sdp.clone(), received_at),
                );
            }
            SignalEvent::Answer { sdp, peer } if env.origin == Origin::Admin => {
                if let Some(session) = view.peers.get_mut(peer) {
                    session.answer(sdp.clone(), received_at);
                }
            }
            SignalEvent::IceCandidate { candidate, peer } => {
                let device = if env.origin == Origin::Admin { *peer } else { env.origin };
                if let Some(session) = view.peers.get_mut(&device) {
                    session.add_candidate(candidate.clone(), received_at);
                }
            }
            SignalEvent::Snapshot { key, captured_at } => {
                let newer = view
                    .latest_snapshot
                    .as_ref()
                    .map(|s| s.captured_at <= *captured_at)
                    .unwrap_or(true);
                if newer {
                    view.latest_snapshot = Some(SnapshotRef {
                        key: key.clone(),
                        captured_at: *captured_at,
                    });
                }
            }
            other => {
                tracing::debug!("Ignoring {} from {:?} on dashboard", other.name(), env.origin);
            }
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> DashboardSnapshot {
        let candidates = self
            .candidates
            .iter()
            .map(|(candidate_id, view)| {
                let last_seen = |source: HeartbeatSource| view.heartbeats.get(&source).map(|hb| hb.last_seen);
                CandidateSummary {
                    candidate_id: *candidate_id,
                    laptop_live: view.is_live(HeartbeatSource::Laptop, now),
                    mobile_live: view.is_live(HeartbeatSource::Mobile, now),
                    laptop_last_seen: last_seen(HeartbeatSource::Laptop),
                    mobile_last_seen: last_seen(HeartbeatSource::Mobile),
                    mobile_connected: view.mobile_connected,
                    violations: view.violations.clone(),
                    total_violations: view.violations.values().sum(),
                    latest_snapshot: view.latest_snapshot.clone(),
                    peers: view.peers.values().cloned().collect(),
                    last_command: view.last_command,
                }
            })
            .collect();
        DashboardSnapshot {
            exam_id: self.exam_id,
            generated_at: now,
            candidates,
        }
    }
}

struct ExamWatch {
    dashboard: Arc<RwLock<ExamDashboard>>,
    task: JoinHandle<()>,
}

impl Drop for ExamWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone)]
pub struct MonitorService {
    signals: SignalingService,
    store: Arc<dyn ProctoringStore>,
    log: ProctorLogService,
    assignments: AssignmentService,
    watches: Arc<Mutex<HashMap<Uuid, ExamWatch>>>,
}

impl MonitorService {
    pub fn new(
        signals: SignalingService,
        store: Arc<dyn ProctoringStore>,
        log: ProctorLogService,
        assignments: AssignmentService,
    ) -> Self {
        Self {
            signals,
            store,
            log,
            assignments,
            watches: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts aggregating an exam topic. The subscription is taken before
    /// this returns, so nothing published afterwards is missed.
    pub fn watch(&self, exam_id: Uuid) -> Arc<RwLock<ExamDashboard>> {
        let mut watches = self.watches.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(watch) = watches.get(&exam_id) {
            if !watch.task.is_finished() {
                return watch.dashboard.clone();
            }
        }

        let dashboard = Arc::new(RwLock::new(ExamDashboard::new(exam_id)));
        let mut stream = into_stream(self.signals.subscribe(exam_id));
        // Readers wait until the persisted history has been folded in.
        let seeding = dashboard.clone().try_write_owned();
        let store = self.store.clone();
        let target = dashboard.clone();
        let task = tokio::spawn(async move {
            if let Ok(mut board) = seeding {
                match store.events_for_exam(exam_id).await {
                    Ok(events) => board.seed(&events),
                    Err(e) => tracing::warn!("Dashboard for exam {} starts without history: {}", exam_id, e),
                }
            }
            while let Some(env) = stream.next().await {
                target.write().await.apply(&env, Utc::now());
            }
        });
        tracing::info!("Monitoring exam {}", exam_id);
        watches.insert(
            exam_id,
            ExamWatch {
                dashboard: dashboard.clone(),
                task,
            },
        );
        dashboard
    }

    pub fn unwatch(&self, exam_id: Uuid) -> bool {
        self.watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&exam_id)
            .is_some()
    }

    pub fn watched_exams(&self) -> usize {
        self.watches.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub async fn dashboard(&self, exam_id: Uuid, now: DateTime<Utc>) -> DashboardSnapshot {
        let dashboard = self.watch(exam_id);
        let snapshot = dashboard.read().await.snapshot(now);
        snapshot
    }

    /// Publishes the command without waiting for the candidate. Terminate is
    /// enforced by the server itself when the candidate laptop is offline.
    pub async fn issue_command(
        &self,
        exam_id: Uuid,
        candidate_id: Uuid,
        command: AdminCommand,
        now: DateTime<Utc>,
    ) -> Result<CommandResponse> {
        let assignment = self.store.assignment_for_candidate(exam_id, candidate_id).await?;
        if assignment.status != AssignmentStatus::InProgress || assignment.is_submission_locked() {
            return Err(Error::InvalidState(format!(
                "Candidate {} is not taking exam {}",
                candidate_id, exam_id
            )));
        }

        match command {
            AdminCommand::Pause => self.store.set_paused(assignment.id, true).await?,
            AdminCommand::Resume => self.store.set_paused(assignment.id, false).await?,
            AdminCommand::Terminate => {}
        }
        self.log.record_admin_command(&assignment, command, now).await?;

        let delivered = self.signals.publish(SignalEnvelope::new(
            exam_id,
            candidate_id,
            Origin::Admin,
            SignalEvent::Command { command },
        ));
        tracing::info!(
            "Admin issued {} to candidate {} on exam {} ({} subscribers)",
            command.as_str(),
            candidate_id,
            exam_id,
            delivered
        );

        let mut enforced_server_side = false;
        if command == AdminCommand::Terminate && !self.laptop_live(&assignment, now).await {
            match self
                .assignments
                .submit_saved(assignment.id, SubmitReason::AdminTerminate, now)
                .await
            {
                Ok(_) => enforced_server_side = true,
                Err(Error::AlreadySubmitted) => {}
                Err(e) => tracing::warn!("Server-side terminate of {} failed: {}", assignment.id, e),
            }
        }

        Ok(CommandResponse {
            exam_id,
            candidate_id,
            command,
            delivered,
            enforced_server_side,
        })
    }

    /// Relays admin peer negotiation (answers, ICE candidates) to a candidate.
    pub fn publish_admin(&self, exam_id: Uuid, req: AdminPublishRequest) -> Result<usize> {
        if !req.event.is_peer_negotiation() || matches!(req.event, SignalEvent::Offer { .. }) {
            return Err(Error::BadRequest(format!(
                "Admins cannot publish '{}' events directly",
                req.event.name()
            )));
        }
        Ok(self.signals.publish(SignalEnvelope::new(
            exam_id,
            req.candidate_id,
            Origin::Admin,
            req.event,
        )))
    }

    async fn laptop_live(&self, assignment: &ExamAssignment, now: DateTime<Utc>) -> bool {
        let window = liveness_window(HeartbeatSource::Laptop);
        let persisted = assignment
            .last_heartbeat_at
            .map(|at| now - at <= window)
            .unwrap_or(false);
        if persisted {
            return true;
        }
        let dashboard = {
            let watches = self.watches.lock().unwrap_or_else(PoisonError::into_inner);
            watches.get(&assignment.exam_id).map(|w| w.dashboard.clone())
        };
        match dashboard {
            Some(dashboard) => dashboard
                .read()
                .await
                .candidate(assignment.candidate_id)
                .map(|view| view.is_live(HeartbeatSource::Laptop, now))
                .unwrap_or(false),
            None => false,
        }
    }
}

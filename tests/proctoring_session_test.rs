mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use serde_json::json;
use tokio::sync::Semaphore;

use common::{app, camera_only, run_for, settle, wait_until, FakeMedia, Rig, TestApp};
use proctoring_backend::database::ProctoringStore;
use proctoring_backend::dto::public_dto::{
    ExamSessionSummary, HeartbeatResponse, SaveAnswerRequest, SaveAnswerResponse,
    StartExamResponse, SubmitExamRequest, SubmitExamResponse, UploadResponse, ViolationReport,
    ViolationResponse,
};
use proctoring_backend::error::{Error, Result};
use proctoring_backend::models::assignment::{
    AssignmentStatus, ExamAssignment, ProctoringOptions, SubmitReason,
};
use proctoring_backend::models::exam::Exam;
use proctoring_backend::models::proctor_event::ProctorEventType;
use proctoring_backend::models::signal::{AdminCommand, Origin, SignalEnvelope, SignalEvent};
use proctoring_backend::proctor::media::{FaceDetector, FaceModel, RecordingMode};
use proctoring_backend::proctor::sensor::{ClipboardAction, PageEvent};
use proctoring_backend::proctor::transport::{ExamBackend, LocalBackend, SignalTransport};
use proctoring_backend::proctor::{
    BlockReason, MobilePeer, ProctoringSession, SessionError, SessionOptions, SessionPhase,
};
use proctoring_backend::services::storage_service::ObjectKind;

fn laptop(app: &TestApp, assignment: &ExamAssignment, rig: &Rig) -> ProctoringSession {
    let backend = app.backend();
    ProctoringSession::new(
        assignment.access_token.clone(),
        backend.clone(),
        backend,
        rig.devices(),
        SessionOptions::default(),
    )
}

async fn running(app: &TestApp, proctoring: ProctoringOptions, rig: &Rig) -> (Exam, ExamAssignment, ProctoringSession) {
    let exam = app.exam(30).await;
    let assignment = app.assign(&exam, proctoring, None).await;
    let session = laptop(app, &assignment, rig);
    session.start().await.expect("session starts");
    (exam, assignment, session)
}

async fn finished_with(session: &ProctoringSession) -> proctoring_backend::proctor::session::FinishedExam {
    tokio::time::timeout(Duration::from_secs(5), session.finished())
        .await
        .expect("session finishes")
        .expect("finished outcome")
}

#[tokio::test(start_paused = true)]
async fn third_tab_switch_auto_submits() {
    let app = app();
    let rig = Rig::new(FakeMedia::default());
    let (_, assignment, session) = running(&app, camera_only(), &rig).await;
    session.answer(1, json!(1)).await.expect("answer saved");

    assert!(!session.on_page_event(PageEvent::Hidden).await);
    session.on_page_event(PageEvent::Visible).await;
    session.on_page_event(PageEvent::Hidden).await;
    session.on_page_event(PageEvent::Visible).await;
    assert_eq!(session.phase(), SessionPhase::InProgress);
    assert_eq!(session.counters().unwrap().tab_switches, 2);

    session.on_page_event(PageEvent::Hidden).await;
    let done = finished_with(&session).await;
    assert_eq!(done.reason, SubmitReason::TabSwitchLimit);
    assert!(done.result.is_some());

    let stored = app.store.assignment(assignment.id).await.unwrap();
    assert!(stored.status.is_terminal());
    assert!(stored.auto_submitted);
    assert_eq!(stored.submit_reason, Some(SubmitReason::TabSwitchLimit));
    assert_eq!(stored.answers[&1], json!(1));
    assert_eq!(app.count_events(assignment.id, ProctorEventType::TabSwitch).await, 3);
}

#[tokio::test(start_paused = true)]
async fn third_fullscreen_exit_auto_submits_and_earlier_exits_reenter() {
    let app = app();
    let rig = Rig::new(FakeMedia::default());
    let (_, assignment, session) = running(&app, camera_only(), &rig).await;

    session.on_page_event(PageEvent::FullscreenExited).await;
    session.on_page_event(PageEvent::FullscreenExited).await;
    assert_eq!(session.phase(), SessionPhase::InProgress);
    // One request at start, one per tolerated exit.
    assert_eq!(rig.viewport.requests.load(Ordering::SeqCst), 3);

    session.on_page_event(PageEvent::FullscreenExited).await;
    let done = finished_with(&session).await;
    assert_eq!(done.reason, SubmitReason::FullscreenLimit);
    assert_eq!(
        app.count_events(assignment.id, ProctorEventType::FullscreenExit).await,
        3
    );
    // Tab switches are counted separately.
    assert_eq!(app.count_events(assignment.id, ProctorEventType::TabSwitch).await, 0);
}

#[tokio::test(start_paused = true)]
async fn clipboard_is_suppressed_and_logged_without_ending_the_exam() {
    let app = app();
    let rig = Rig::new(FakeMedia::default());
    let (_, assignment, session) = running(&app, camera_only(), &rig).await;

    assert!(session.on_page_event(PageEvent::Clipboard(ClipboardAction::Paste)).await);
    assert!(session.on_page_event(PageEvent::Clipboard(ClipboardAction::ContextMenu)).await);
    assert_eq!(session.phase(), SessionPhase::InProgress);

    let events = app.state.proctor_log.history(assignment.id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, ProctorEventType::CopyPaste);
    assert_eq!(events[0].detail["action"], json!("paste"));
}

#[tokio::test(start_paused = true)]
async fn unproctored_options_ignore_page_events() {
    let app = app();
    let rig = Rig::new(FakeMedia::default());
    let (_, assignment, session) = running(&app, ProctoringOptions::default(), &rig).await;

    for _ in 0..4 {
        session.on_page_event(PageEvent::Hidden).await;
    }
    assert!(!session.on_page_event(PageEvent::Clipboard(ClipboardAction::Copy)).await);
    assert_eq!(session.phase(), SessionPhase::InProgress);
    assert!(app.event_kinds(assignment.id).await.is_empty());
    // No camera was requested.
    assert!(rig.media.streams().is_empty());
}

#[tokio::test(start_paused = true)]
async fn twelve_faceless_checks_log_two_face_missing_events() {
    let app = app();
    let rig = Rig::new(FakeMedia::with_frames()).with_faces(0);
    let (_, assignment, session) = running(&app, camera_only(), &rig).await;

    run_for(24).await;

    let faces = rig.faces.as_ref().unwrap();
    assert_eq!(faces.checks.load(Ordering::SeqCst), 12);
    assert_eq!(
        app.count_events(assignment.id, ProctorEventType::FaceMissing).await,
        2
    );
    let counters = session.counters().unwrap();
    assert_eq!(counters.missing_face_streak, 12);

    faces.faces.store(1, Ordering::SeqCst);
    run_for(2).await;
    assert_eq!(session.counters().unwrap().missing_face_streak, 0);
}

#[tokio::test(start_paused = true)]
async fn multiple_faces_are_reported_every_third_check() {
    let app = app();
    let rig = Rig::new(FakeMedia::with_frames()).with_faces(2);
    let (_, assignment, _session) = running(&app, camera_only(), &rig).await;

    run_for(12).await;

    let events = app.state.proctor_log.history(assignment.id).await.unwrap();
    let multiple: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == ProctorEventType::MultipleFaces)
        .collect();
    assert_eq!(multiple.len(), 2);
    assert_eq!(multiple[0].detail["streak"], json!(3));
    assert_eq!(multiple[1].detail["faces"], json!(2));
}

#[tokio::test(start_paused = true)]
async fn face_checks_wait_for_the_model() {
    let app = app();
    let exam = app.exam(30).await;
    let assignment = app.assign(&exam, camera_only(), None).await;
    let rig = Rig::new(FakeMedia::with_frames()).with_faces(0);
    let detector = rig.faces.clone().unwrap();
    let (model, loader) = FaceModel::loading(detector.clone() as Arc<dyn FaceDetector>);
    let mut devices = rig.devices();
    devices.faces = Some(model);

    let backend = app.backend();
    let session = ProctoringSession::new(
        assignment.access_token.clone(),
        backend.clone(),
        backend,
        devices,
        SessionOptions::default(),
    );
    session.start().await.expect("start");

    run_for(10).await;
    assert_eq!(detector.checks.load(Ordering::SeqCst), 0);

    loader.mark_ready();
    run_for(4).await;
    assert_eq!(detector.checks.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn hard_blockers_stop_start_before_the_server_transition() {
    let app = app();
    let exam = app.exam(30).await;

    let denied = app.assign(&exam, camera_only(), None).await;
    let rig = Rig::new(FakeMedia {
        deny_camera: true,
        ..FakeMedia::default()
    });
    let err = laptop(&app, &denied, &rig).start().await.unwrap_err();
    assert!(matches!(err, SessionError::CameraDenied(_)));
    assert!(err.is_hard_blocker());
    let stored = app.store.assignment(denied.id).await.unwrap();
    assert_eq!(stored.status, AssignmentStatus::Assigned);

    let mic = app
        .assign(
            &exam,
            ProctoringOptions {
                mic_required: true,
                ..camera_only()
            },
            None,
        )
        .await;
    let rig = Rig::new(FakeMedia {
        deny_microphone: true,
        ..FakeMedia::default()
    });
    let err = laptop(&app, &mic, &rig).start().await.unwrap_err();
    assert!(matches!(err, SessionError::MicrophoneDenied(_)));

    let windowed = app.assign(&exam, camera_only(), None).await;
    let rig = Rig::new(FakeMedia::default()).rejecting_fullscreen();
    let err = laptop(&app, &windowed, &rig).start().await.unwrap_err();
    assert!(matches!(err, SessionError::FullscreenRejected(_)));
    // The camera opened before fullscreen failed is released again.
    assert!(rig.media.streams()[0].is_stopped());
    let stored = app.store.assignment(windowed.id).await.unwrap();
    assert_eq!(stored.status, AssignmentStatus::Assigned);
}

#[tokio::test(start_paused = true)]
async fn dual_camera_exam_needs_a_paired_phone() {
    let app = app();
    let exam = app.exam(30).await;
    let assignment = app
        .assign(&exam, ProctoringOptions::fully_proctored(), None)
        .await;
    let rig = Rig::new(FakeMedia::default());

    let err = laptop(&app, &assignment, &rig).start().await.unwrap_err();
    assert!(matches!(err, SessionError::MobileNotPaired));
    let stored = app.store.assignment(assignment.id).await.unwrap();
    assert_eq!(stored.status, AssignmentStatus::Assigned);
}

#[tokio::test(start_paused = true)]
async fn mobile_gate_blocks_answers_until_the_phone_returns() {
    let app = app();
    let exam = app.exam(30).await;
    let assignment = app
        .assign(&exam, ProctoringOptions::fully_proctored(), None)
        .await;
    let backend = app.backend();
    let phone_media = Arc::new(FakeMedia::default());
    let phone = MobilePeer::connect(
        assignment.access_token.clone(),
        backend.clone(),
        phone_media.clone(),
    )
    .await
    .expect("phone connects");

    let rig = Rig::new(FakeMedia::default());
    let session = laptop(&app, &assignment, &rig);
    session.start().await.expect("pairs with the phone and starts");
    session.answer(1, json!(1)).await.expect("answer while paired");

    // Explicit disconnect blocks at once.
    phone.disconnect().await;
    settle().await;
    assert!(session.overlay().unwrap().mobile_lost);
    assert!(phone_media.streams()[0].is_stopped());
    let err = session.answer(2, json!(0)).await.unwrap_err();
    assert!(matches!(err, SessionError::Blocked(BlockReason::MobileLost)));
    assert_eq!(
        app.count_events(assignment.id, ProctorEventType::MobileDisconnect).await,
        1
    );

    let phone = MobilePeer::connect(
        assignment.access_token.clone(),
        backend.clone(),
        phone_media.clone(),
    )
    .await
    .expect("phone reconnects");
    settle().await;
    assert!(!session.overlay().unwrap().mobile_lost);
    session.answer(2, json!(0)).await.expect("answers flow again");

    // Silent loss trips the 15 s liveness window.
    drop(phone);
    run_for(10).await;
    assert!(!session.overlay().unwrap().mobile_lost);
    run_for(6).await;
    assert!(session.overlay().unwrap().mobile_lost);
    assert_eq!(
        app.count_events(assignment.id, ProctorEventType::MobileDisconnect).await,
        2
    );
    // No grace period configured, so the exam keeps waiting.
    run_for(60).await;
    assert_eq!(session.phase(), SessionPhase::InProgress);

    let _phone = MobilePeer::connect(assignment.access_token.clone(), backend, phone_media)
        .await
        .expect("phone reconnects");
    settle().await;
    assert!(session.overlay().unwrap().block_reason().is_none());
}

#[tokio::test(start_paused = true)]
async fn persistent_mobile_loss_auto_submits_after_the_grace_period() {
    let app = app();
    let exam = app.exam(30).await;
    let assignment = app
        .assign(&exam, ProctoringOptions::fully_proctored(), None)
        .await;
    let backend = app.backend();
    let phone = MobilePeer::connect(
        assignment.access_token.clone(),
        backend.clone(),
        Arc::new(FakeMedia::default()),
    )
    .await
    .expect("phone connects");

    let rig = Rig::new(FakeMedia::default());
    let session = ProctoringSession::new(
        assignment.access_token.clone(),
        backend.clone(),
        backend,
        rig.devices(),
        SessionOptions {
            mobile_grace: Some(Duration::from_secs(30)),
            ..SessionOptions::default()
        },
    );
    session.start().await.expect("start");

    phone.disconnect().await;
    settle().await;
    run_for(29).await;
    assert_eq!(session.phase(), SessionPhase::InProgress);
    run_for(2).await;

    let done = finished_with(&session).await;
    assert_eq!(done.reason, SubmitReason::MobileLost);
}

#[tokio::test(start_paused = true)]
async fn countdown_survives_a_reload() {
    let app = app();
    let rig = Rig::new(FakeMedia::default());
    let (_, assignment, session) = running(&app, camera_only(), &rig).await;
    let first = app.store.assignment(assignment.id).await.unwrap();

    run_for(10).await;
    let before_reload = session.remaining().unwrap();
    assert!(before_reload <= Duration::from_secs(1790));
    drop(session);

    let reloaded = laptop(&app, &assignment, &rig);
    let resumed = reloaded.start().await.expect("resume");
    assert_eq!(Some(resumed.started_at), first.started_at);
    assert!(resumed.remaining_seconds <= 1800);
    assert!(reloaded.remaining().unwrap() <= Duration::from_secs(1800));
    // Violation counters restart with the session.
    assert_eq!(reloaded.counters().unwrap().tab_switches, 0);
}

#[tokio::test(start_paused = true)]
async fn countdown_reaching_zero_submits_exactly_once() {
    let app = app();
    let exam = app.exam(1).await;
    let assignment = app.assign(&exam, camera_only(), None).await;
    let rig = Rig::new(FakeMedia::default());
    let session = laptop(&app, &assignment, &rig);
    session.start().await.expect("start");

    // The server rounds the first second down.
    run_for(58).await;
    assert_eq!(session.phase(), SessionPhase::InProgress);
    run_for(3).await;

    let done = finished_with(&session).await;
    assert_eq!(done.reason, SubmitReason::TimeExpired);
    let stored = app.store.assignment(assignment.id).await.unwrap();
    assert_eq!(stored.submit_reason, Some(SubmitReason::TimeExpired));
    assert_eq!(session.active_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn pause_blocks_answers_and_resume_restores_them() {
    let app = app();
    let rig = Rig::new(FakeMedia::default());
    let (exam, assignment, session) = running(&app, camera_only(), &rig).await;
    let remaining = session.remaining().unwrap();

    app.state
        .monitor
        .issue_command(exam.id, assignment.candidate_id, AdminCommand::Pause, Utc::now())
        .await
        .expect("pause");
    settle().await;
    assert!(session.overlay().unwrap().paused);
    let err = session.answer(1, json!(1)).await.unwrap_err();
    assert!(matches!(err, SessionError::Blocked(BlockReason::Paused)));

    // The countdown keeps running while paused.
    run_for(5).await;
    assert!(session.remaining().unwrap() < remaining);

    app.state
        .monitor
        .issue_command(exam.id, assignment.candidate_id, AdminCommand::Resume, Utc::now())
        .await
        .expect("resume");
    settle().await;
    assert!(!session.overlay().unwrap().paused);
    session.answer(1, json!(1)).await.expect("answer after resume");
}

#[tokio::test(start_paused = true)]
async fn terminate_runs_the_full_teardown() {
    let app = app();
    let rig = Rig::new(FakeMedia::default()).with_recording();
    let (exam, assignment, session) = running(&app, camera_only(), &rig).await;
    assert_eq!(session.recording_mode(), Some(RecordingMode::Full));
    assert!(rig.viewport.is_fullscreen());
    assert!(session.active_timers() > 0);
    assert!(session.is_listening());

    // Let a laptop heartbeat land so the server leaves enforcement to us.
    run_for(6).await;
    let response = app
        .state
        .monitor
        .issue_command(exam.id, assignment.candidate_id, AdminCommand::Terminate, Utc::now())
        .await
        .expect("terminate");
    assert!(!response.enforced_server_side);

    let done = finished_with(&session).await;
    assert_eq!(done.reason, SubmitReason::AdminTerminate);
    assert!(done.terminated);

    assert_eq!(session.active_timers(), 0);
    assert!(!session.is_listening());
    assert!(rig.media.streams()[0].is_stopped());
    assert!(!rig.viewport.is_fullscreen());
    assert_eq!(app.objects.keys_under("recordings/").len(), 1);

    let stored = app.store.assignment(assignment.id).await.unwrap();
    assert_eq!(stored.submit_reason, Some(SubmitReason::AdminTerminate));
    assert!(matches!(
        session.answer(1, json!(1)).await,
        Err(SessionError::NotInProgress)
    ));
}

#[tokio::test(start_paused = true)]
async fn sessions_without_a_recorder_fall_back_to_snapshots() {
    let app = app();
    let rig = Rig::new(FakeMedia::with_frames());
    let (exam, assignment, session) = running(&app, camera_only(), &rig).await;
    assert_eq!(session.recording_mode(), Some(RecordingMode::SnapshotOnly));

    run_for(15).await;
    let prefix = format!("snapshots/{}/{}/", exam.id, assignment.candidate_id);
    wait_until("first snapshot", || !app.objects.keys_under(&prefix).is_empty()).await;

    let done = session.submit().await.expect("manual submit");
    assert_eq!(done.reason, SubmitReason::Manual);
    assert!(app.objects.keys_under("recordings/").is_empty());
}

/// Holds every snapshot upload until the test releases it.
struct GatedUploads {
    inner: LocalBackend,
    gate: Semaphore,
    snapshots: AtomicUsize,
}

#[async_trait]
impl ExamBackend for GatedUploads {
    async fn session(&self, token: &str) -> Result<ExamSessionSummary> {
        self.inner.session(token).await
    }

    async fn start(&self, token: &str) -> Result<StartExamResponse> {
        self.inner.start(token).await
    }

    async fn save_answer(&self, token: &str, req: SaveAnswerRequest) -> Result<SaveAnswerResponse> {
        self.inner.save_answer(token, req).await
    }

    async fn submit(&self, token: &str, req: SubmitExamRequest) -> Result<SubmitExamResponse> {
        self.inner.submit(token, req).await
    }

    async fn heartbeat(&self, token: &str) -> Result<HeartbeatResponse> {
        self.inner.heartbeat(token).await
    }

    async fn report_violation(&self, token: &str, report: ViolationReport) -> Result<ViolationResponse> {
        self.inner.report_violation(token, report).await
    }

    async fn upload(
        &self,
        token: &str,
        kind: ObjectKind,
        captured_at: DateTime<Utc>,
        data: Bytes,
    ) -> Result<UploadResponse> {
        if kind == ObjectKind::Snapshot {
            self.snapshots.fetch_add(1, Ordering::SeqCst);
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| Error::Internal(e.to_string()))?;
            permit.forget();
        }
        self.inner.upload(token, kind, captured_at, data).await
    }
}

#[tokio::test(start_paused = true)]
async fn snapshot_ticks_are_skipped_while_an_upload_is_in_flight() {
    let app = app();
    let exam = app.exam(30).await;
    let assignment = app.assign(&exam, camera_only(), None).await;
    let gated = Arc::new(GatedUploads {
        inner: LocalBackend::new(app.state.clone()),
        gate: Semaphore::new(0),
        snapshots: AtomicUsize::new(0),
    });
    let rig = Rig::new(FakeMedia::with_frames());
    let session = ProctoringSession::new(
        assignment.access_token.clone(),
        gated.clone(),
        app.backend(),
        rig.devices(),
        SessionOptions::default(),
    );
    session.start().await.expect("start");

    run_for(15).await;
    wait_until("first upload", || gated.snapshots.load(Ordering::SeqCst) == 1).await;

    // Ticks at 30 s and 45 s find the first upload still running.
    run_for(31).await;
    assert_eq!(gated.snapshots.load(Ordering::SeqCst), 1);

    gated.gate.add_permits(1);
    settle().await;
    run_for(15).await;
    wait_until("second upload", || gated.snapshots.load(Ordering::SeqCst) == 2).await;
    gated.gate.add_permits(1);
    settle().await;
    assert_eq!(app.objects.keys_under("snapshots/").len(), 2);
}

mockall::mock! {
    pub CountingScorer {}

    #[async_trait]
    impl proctoring_backend::services::grading_service::Scorer for CountingScorer {
        async fn evaluate(
            &self,
            exam: &Exam,
            answers: &proctoring_backend::models::assignment::AnswerSheet,
        ) -> Result<proctoring_backend::services::grading_service::Evaluation>;
    }
}

#[tokio::test(start_paused = true)]
async fn simultaneous_submit_triggers_submit_once() {
    let mut scorer = MockCountingScorer::new();
    scorer.expect_evaluate().times(1).returning(|exam, answers| {
        Ok(proctoring_backend::services::grading_service::GradingScorer::grade(exam, answers))
    });
    let app = common::app_with_scorer(Arc::new(scorer));
    let rig = Rig::new(FakeMedia::default());
    let (_, assignment, session) = running(&app, camera_only(), &rig).await;

    session.on_page_event(PageEvent::Hidden).await;
    session.on_page_event(PageEvent::Hidden).await;

    let manual = session.clone();
    let tabs = session.clone();
    let (manual_outcome, _) = tokio::join!(manual.submit(), async move {
        tabs.on_page_event(PageEvent::Hidden).await;
        tabs.on_page_event(PageEvent::Hidden).await;
    });

    let done = finished_with(&session).await;
    match manual_outcome {
        Ok(result) => assert_eq!(result.reason, SubmitReason::Manual),
        Err(e) => assert!(matches!(e, SessionError::NotInProgress)),
    }
    let stored = app.store.assignment(assignment.id).await.unwrap();
    assert_eq!(stored.submit_reason, Some(done.reason));
    assert!(session.submit().await.is_err());
}

/// Signal transport whose first subscription drops after twenty seconds.
struct DroppingSignals {
    inner: LocalBackend,
    subscriptions: AtomicUsize,
}

#[async_trait]
impl SignalTransport for DroppingSignals {
    async fn publish(&self, token: &str, origin: Origin, event: SignalEvent) -> Result<usize> {
        self.inner.publish(token, origin, event).await
    }

    async fn subscribe(&self, token: &str) -> Result<BoxStream<'static, SignalEnvelope>> {
        let stream = self.inner.subscribe(token).await?;
        if self.subscriptions.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(stream
                .take_until(tokio::time::sleep(Duration::from_secs(20)))
                .boxed())
        } else {
            Ok(stream)
        }
    }
}

#[tokio::test(start_paused = true)]
async fn dropped_signal_stream_is_reopened() {
    let app = app();
    let exam = app.exam(30).await;
    let assignment = app
        .assign(&exam, ProctoringOptions::fully_proctored(), None)
        .await;
    let backend = app.backend();
    let _phone = MobilePeer::connect(
        assignment.access_token.clone(),
        backend.clone(),
        Arc::new(FakeMedia::default()),
    )
    .await
    .expect("phone connects");

    let signals = Arc::new(DroppingSignals {
        inner: LocalBackend::new(app.state.clone()),
        subscriptions: AtomicUsize::new(0),
    });
    let rig = Rig::new(FakeMedia::default());
    let session = ProctoringSession::new(
        assignment.access_token.clone(),
        backend,
        signals.clone(),
        rig.devices(),
        SessionOptions::default(),
    );
    session.start().await.expect("start");

    // The phone heartbeats throughout; only the laptop's stream breaks.
    run_for(70).await;
    assert!(signals.subscriptions.load(Ordering::SeqCst) >= 2);
    assert!(session.is_listening());
    assert!(!session.overlay().unwrap().mobile_lost);
    session.answer(1, json!(1)).await.expect("answers still flow");

    app.state
        .monitor
        .issue_command(exam.id, assignment.candidate_id, AdminCommand::Terminate, Utc::now())
        .await
        .expect("terminate");
    let done = finished_with(&session).await;
    assert_eq!(done.reason, SubmitReason::AdminTerminate);
}

/// Holds submissions, and optionally violation reports, until the test
/// releases them. The first `failing_submits` submissions fail.
struct HeldBackend {
    inner: LocalBackend,
    submits: Semaphore,
    submit_calls: AtomicUsize,
    failing_submits: AtomicUsize,
    reports: Option<Semaphore>,
}

impl HeldBackend {
    fn new(app: &TestApp, failing_submits: usize, hold_reports: bool) -> Self {
        Self {
            inner: LocalBackend::new(app.state.clone()),
            submits: Semaphore::new(0),
            submit_calls: AtomicUsize::new(0),
            failing_submits: AtomicUsize::new(failing_submits),
            reports: hold_reports.then(|| Semaphore::new(0)),
        }
    }
}

async fn pass(gate: &Semaphore) -> Result<()> {
    gate.acquire()
        .await
        .map_err(|e| Error::Internal(e.to_string()))?
        .forget();
    Ok(())
}

#[async_trait]
impl ExamBackend for HeldBackend {
    async fn session(&self, token: &str) -> Result<ExamSessionSummary> {
        self.inner.session(token).await
    }

    async fn start(&self, token: &str) -> Result<StartExamResponse> {
        self.inner.start(token).await
    }

    async fn save_answer(&self, token: &str, req: SaveAnswerRequest) -> Result<SaveAnswerResponse> {
        self.inner.save_answer(token, req).await
    }

    async fn submit(&self, token: &str, req: SubmitExamRequest) -> Result<SubmitExamResponse> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        pass(&self.submits).await?;
        let failing = self
            .failing_submits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Upstream("scoring service unavailable".into()));
        }
        self.inner.submit(token, req).await
    }

    async fn heartbeat(&self, token: &str) -> Result<HeartbeatResponse> {
        self.inner.heartbeat(token).await
    }

    async fn report_violation(&self, token: &str, report: ViolationReport) -> Result<ViolationResponse> {
        if let Some(gate) = &self.reports {
            pass(gate).await?;
        }
        self.inner.report_violation(token, report).await
    }

    async fn upload(
        &self,
        token: &str,
        kind: ObjectKind,
        captured_at: DateTime<Utc>,
        data: Bytes,
    ) -> Result<UploadResponse> {
        self.inner.upload(token, kind, captured_at, data).await
    }
}

#[tokio::test(start_paused = true)]
async fn terminate_during_a_failing_submission_still_ends_the_exam() {
    let app = app();
    let exam = app.exam(30).await;
    let assignment = app.assign(&exam, camera_only(), None).await;
    let held = Arc::new(HeldBackend::new(&app, 1, false));
    let rig = Rig::new(FakeMedia::default());
    let session = ProctoringSession::new(
        assignment.access_token.clone(),
        held.clone(),
        app.backend(),
        rig.devices(),
        SessionOptions::default(),
    );
    session.start().await.expect("start");
    run_for(6).await;

    let manual = tokio::spawn({
        let session = session.clone();
        async move { session.submit().await }
    });
    settle().await;
    assert_eq!(session.phase(), SessionPhase::Submitting);

    let response = app
        .state
        .monitor
        .issue_command(exam.id, assignment.candidate_id, AdminCommand::Terminate, Utc::now())
        .await
        .expect("terminate");
    assert!(!response.enforced_server_side);
    settle().await;
    assert!(session.overlay().unwrap().terminated);

    held.submits.add_permits(2);
    let outcome = manual.await.expect("submit task");
    assert!(matches!(outcome, Err(SessionError::Backend(Error::Upstream(_)))));

    let done = finished_with(&session).await;
    assert_eq!(done.reason, SubmitReason::AdminTerminate);
    assert!(done.terminated);
    assert_eq!(held.submit_calls.load(Ordering::SeqCst), 2);
    assert_eq!(session.active_timers(), 0);
    assert!(!session.is_listening());
    assert!(!rig.viewport.is_fullscreen());

    let stored = app.store.assignment(assignment.id).await.unwrap();
    assert_eq!(stored.submit_reason, Some(SubmitReason::AdminTerminate));
    assert!(stored.auto_submitted);
}

#[tokio::test(start_paused = true)]
async fn mobile_loss_is_logged_even_if_the_phone_returns_mid_report() {
    let app = app();
    let exam = app.exam(30).await;
    let assignment = app
        .assign(&exam, ProctoringOptions::fully_proctored(), None)
        .await;
    let backend = app.backend();
    let phone_media = Arc::new(FakeMedia::default());
    let phone = MobilePeer::connect(
        assignment.access_token.clone(),
        backend.clone(),
        phone_media.clone(),
    )
    .await
    .expect("phone connects");

    let held = Arc::new(HeldBackend::new(&app, 0, true));
    let rig = Rig::new(FakeMedia::default());
    let session = ProctoringSession::new(
        assignment.access_token.clone(),
        held.clone(),
        backend.clone(),
        rig.devices(),
        SessionOptions::default(),
    );
    session.start().await.expect("start");

    drop(phone);
    run_for(17).await;
    assert!(session.overlay().unwrap().mobile_lost);
    assert_eq!(
        app.count_events(assignment.id, ProctorEventType::MobileDisconnect).await,
        0
    );

    let _phone = MobilePeer::connect(assignment.access_token.clone(), backend, phone_media)
        .await
        .expect("phone reconnects");
    settle().await;
    assert!(!session.overlay().unwrap().mobile_lost);

    if let Some(reports) = &held.reports {
        reports.add_permits(1);
    }
    settle().await;
    assert_eq!(
        app.count_events(assignment.id, ProctorEventType::MobileDisconnect).await,
        1
    );
}

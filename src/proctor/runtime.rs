//! The candidate laptop's proctored exam session.
//!
//! [`ProctoringSession`] runs the pre-start checks, drives the sensor timers
//! and the signaling listener, and owns the single submission path. Every
//! finished session, however it ended, goes through the same teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use serde_json::{json, Value as JsonValue};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::dto::public_dto::{
    ExamSessionSummary, SaveAnswerRequest, SaveAnswerResponse, StartExamResponse,
    SubmitExamRequest, SubmitExamResponse, ViolationReport,
};
use crate::error::{Error, Result};
use crate::models::assignment::{AnswerSheet, ProctoringOptions, SubmitReason};
use crate::models::presence::MOBILE_LIVENESS_SECS;
use crate::models::proctor_event::ProctorEventType;
use crate::models::signal::{
    is_for_me_from_others, AdminCommand, HeartbeatSource, Origin, SignalEnvelope, SignalEvent,
};
use crate::proctor::error::{SessionError, SessionResult};
use crate::proctor::media::{
    CaptureError, CaptureRequest, Devices, Facing, Frame, MediaStream, Recorder, RecordingMode,
};
use crate::proctor::sensor::{PageEvent, ViolationCounters};
use crate::proctor::session::{ExamSession, FinishedExam, Overlay, SessionPhase, SessionState};
use crate::proctor::snapshot::encode_snapshot_blocking;
use crate::proctor::ticker::{Ticker, TimerName};
use crate::proctor::transport::{ExamBackend, SignalTransport};
use crate::services::storage_service::ObjectKind;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// How long `start` waits for the phone to show up on the channel.
    pub pairing_timeout: Duration,
    /// Persistent mobile loss auto-submits after this long. Off when `None`.
    pub mobile_grace: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            pairing_timeout: Duration::from_secs(5),
            mobile_grace: None,
        }
    }
}

const RESUBSCRIBE_INITIAL: Duration = Duration::from_secs(1);
const RESUBSCRIBE_MAX: Duration = Duration::from_secs(30);

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct ProctoringSession {
    inner: Arc<Inner>,
}

struct Inner {
    token: String,
    backend: Arc<dyn ExamBackend>,
    signals: Arc<dyn SignalTransport>,
    devices: Devices,
    options: SessionOptions,
    session: Mutex<ExamSession>,
    phase: watch::Sender<SessionPhase>,
    mobile_paired: watch::Sender<bool>,
    ticker: Ticker,
    stream: Mutex<Option<Arc<dyn MediaStream>>>,
    recorder: Mutex<Option<Arc<dyn Recorder>>>,
    recording_mode: Mutex<Option<RecordingMode>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    snapshot_in_flight: AtomicBool,
    expiry_fired: AtomicBool,
    torn_down: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProctoringSession {
    pub fn new(
        token: impl Into<String>,
        backend: Arc<dyn ExamBackend>,
        signals: Arc<dyn SignalTransport>,
        devices: Devices,
        options: SessionOptions,
    ) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Assigned);
        let (mobile_paired, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                token: token.into(),
                backend,
                signals,
                devices,
                options,
                session: Mutex::new(ExamSession::new()),
                phase,
                mobile_paired,
                ticker: Ticker::new(),
                stream: Mutex::new(None),
                recorder: Mutex::new(None),
                recording_mode: Mutex::new(None),
                listener: Mutex::new(None),
                snapshot_in_flight: AtomicBool::new(false),
                expiry_fired: AtomicBool::new(false),
                torn_down: AtomicBool::new(false),
            }),
        }
    }

    /// Runs the hard-blocker checks, then moves the assignment to
    /// `in_progress` and arms the sensor. Resuming an exam that is already
    /// running on the server keeps its original countdown.
    pub async fn start(&self) -> SessionResult<StartExamResponse> {
        let inner = &self.inner;
        if inner.torn_down.load(Ordering::Acquire) || inner.phase() != SessionPhase::Assigned {
            return Err(SessionError::NotInProgress);
        }

        let summary = inner.backend.session(&inner.token).await?;
        if summary.status.is_terminal() {
            return Err(Error::AlreadySubmitted.into());
        }

        if let Err(e) = inner.prepare(&summary).await {
            tracing::warn!("Exam {} cannot start: {}", summary.exam_id, e);
            inner.release_devices().await;
            return Err(e);
        }

        let started = match inner.backend.start(&inner.token).await {
            Ok(started) => started,
            Err(e) => {
                inner.release_devices().await;
                return Err(e.into());
            }
        };
        if let Err(e) = inner.update(|s| s.begin(&started, Instant::now())) {
            inner.release_devices().await;
            return Err(e);
        }

        inner.start_recording();
        inner.arm(started.proctoring);
        tracing::info!(
            "Exam {} in progress for candidate {}, {}s remaining",
            started.exam_id,
            started.candidate_id,
            started.remaining_seconds
        );
        if started.remaining_seconds <= 0 {
            inner.countdown_tick();
        }
        Ok(started)
    }

    /// Saves one answer. Refused while any blocking overlay is up.
    pub async fn answer(&self, question_id: i32, answer: JsonValue) -> SessionResult<SaveAnswerResponse> {
        let inner = &self.inner;
        inner.update(|s| s.record_answer(question_id, answer.clone()))?;
        let saved = inner
            .backend
            .save_answer(&inner.token, SaveAnswerRequest { question_id, answer })
            .await?;
        Ok(saved)
    }

    /// Manual submission. Waits for the outcome, which is also kept on the
    /// session as the error banner when it fails.
    pub async fn submit(&self) -> SessionResult<SubmitExamResponse> {
        let handle = self
            .inner
            .trigger_submit(SubmitReason::Manual)
            .ok_or(SessionError::NotInProgress)?;
        let outcome = handle
            .await
            .map_err(|e| Error::Internal(format!("Submission task failed: {}", e)))?;
        Ok(outcome?)
    }

    /// Feeds one browser event to the sensor. Returns `true` when the page
    /// must suppress the event's default action.
    pub async fn on_page_event(&self, event: PageEvent) -> bool {
        let inner = &self.inner;
        let Some(options) = inner.active_options() else {
            return false;
        };

        match event {
            PageEvent::Visible => false,
            PageEvent::Hidden => {
                if !options.tab_switch_detection {
                    return false;
                }
                let Some(tally) = inner.update(|s| s.active_mut().ok().map(|e| e.counters.record_tab_switch())) else {
                    return false;
                };
                inner.report(tally.kind, tally.detail()).await;
                if let Some(reason) = tally.auto_submit {
                    inner.trigger_submit(reason);
                }
                false
            }
            PageEvent::FullscreenExited => {
                let Some(tally) = inner.update(|s| s.active_mut().ok().map(|e| e.counters.record_fullscreen_exit())) else {
                    return false;
                };
                inner.report(tally.kind, tally.detail()).await;
                match tally.auto_submit {
                    Some(reason) => {
                        inner.trigger_submit(reason);
                    }
                    None => {
                        if let Err(e) = inner.devices.viewport.request_fullscreen().await {
                            tracing::warn!("Fullscreen re-entry refused: {}", e);
                        }
                    }
                }
                false
            }
            PageEvent::Clipboard(action) => {
                if !options.copy_paste_blocking {
                    return false;
                }
                inner
                    .report(ProctorEventType::CopyPaste, json!({ "action": action }))
                    .await;
                true
            }
        }
    }

    /// Leaves the exam without submitting it.
    pub async fn close(&self) {
        self.inner.teardown().await;
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.phase()
    }

    pub fn watch_phase(&self) -> watch::Receiver<SessionPhase> {
        self.inner.phase.subscribe()
    }

    /// Resolves once the session reaches `Finished`.
    pub async fn finished(&self) -> Option<FinishedExam> {
        let mut phase = self.watch_phase();
        loop {
            if *phase.borrow_and_update() == SessionPhase::Finished {
                break;
            }
            if phase.changed().await.is_err() {
                return None;
            }
        }
        self.outcome()
    }

    pub fn outcome(&self) -> Option<FinishedExam> {
        match lock(&self.inner.session).state() {
            SessionState::Finished(done) => Some(done.clone()),
            _ => None,
        }
    }

    pub fn overlay(&self) -> Option<Overlay> {
        lock(&self.inner.session).overlay()
    }

    pub fn counters(&self) -> Option<ViolationCounters> {
        lock(&self.inner.session).active().map(|e| e.counters)
    }

    pub fn answers(&self) -> Option<AnswerSheet> {
        lock(&self.inner.session).active().map(|e| e.answers.clone())
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.inner.remaining()
    }

    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner.session).last_error().map(str::to_string)
    }

    pub fn recording_mode(&self) -> Option<RecordingMode> {
        *lock(&self.inner.recording_mode)
    }

    pub fn active_timers(&self) -> usize {
        self.inner.ticker.active_count()
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.inner.listener)
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Inner {
    fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Mutates the session under its lock and republishes the phase.
    fn update<R>(&self, f: impl FnOnce(&mut ExamSession) -> R) -> R {
        let mut session = lock(&self.session);
        let out = f(&mut session);
        let next = session.phase();
        self.phase.send_if_modified(|phase| {
            if *phase == next {
                false
            } else {
                *phase = next;
                true
            }
        });
        out
    }

    fn active_options(&self) -> Option<ProctoringOptions> {
        lock(&self.session).active().map(|e| e.proctoring)
    }

    fn remaining(&self) -> Option<Duration> {
        lock(&self.session)
            .deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    async fn prepare(self: &Arc<Self>, summary: &ExamSessionSummary) -> SessionResult<()> {
        let options = summary.proctoring;
        self.listen(summary.candidate_id).await?;

        if options.camera_required || options.mic_required {
            let request = CaptureRequest {
                video: options.camera_required,
                audio: options.mic_required,
                facing: Facing::User,
            };
            let stream = self.devices.media.open(request).await.map_err(|e| match e {
                CaptureError::Camera(msg) => SessionError::CameraDenied(msg),
                CaptureError::Microphone(msg) => SessionError::MicrophoneDenied(msg),
            })?;
            *lock(&self.stream) = Some(stream);
        }

        self.devices
            .viewport
            .request_fullscreen()
            .await
            .map_err(SessionError::FullscreenRejected)?;

        if options.dual_camera_required {
            let mut paired = self.mobile_paired.subscribe();
            let wait = async move {
                loop {
                    if *paired.borrow_and_update() {
                        return true;
                    }
                    if paired.changed().await.is_err() {
                        return false;
                    }
                }
            };
            match tokio::time::timeout(self.options.pairing_timeout, wait).await {
                Ok(true) => {}
                _ => return Err(SessionError::MobileNotPaired),
            }
        }
        Ok(())
    }

    /// Subscribes to the channel and keeps a listener on it until teardown.
    /// A stream that ends is reopened with exponential backoff.
    async fn listen(self: &Arc<Self>, candidate_id: Uuid) -> Result<()> {
        let first = self.signals.subscribe(&self.token).await?;
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut stream = first;
            loop {
                while let Some(envelope) = stream.next().await {
                    if !is_for_me_from_others(&envelope, candidate_id, Origin::Laptop) {
                        continue;
                    }
                    let Some(inner) = weak.upgrade() else { return };
                    inner.on_signal(envelope).await;
                }
                tracing::warn!("Signal stream for candidate {} ended, resubscribing", candidate_id);

                let mut backoff = RESUBSCRIBE_INITIAL;
                stream = loop {
                    tokio::time::sleep(backoff).await;
                    let Some(inner) = weak.upgrade() else { return };
                    if inner.torn_down.load(Ordering::Acquire) {
                        return;
                    }
                    match inner.signals.subscribe(&inner.token).await {
                        Ok(stream) => {
                            tracing::info!("Signal stream for candidate {} reopened", candidate_id);
                            break stream;
                        }
                        Err(e @ (Error::AlreadySubmitted | Error::NotFound(_))) => {
                            tracing::info!("Signal listener for candidate {} stopped: {}", candidate_id, e);
                            return;
                        }
                        Err(e) => {
                            tracing::warn!("Resubscribe failed, retrying in {:?}: {}", backoff, e);
                            backoff = (backoff * 2).min(RESUBSCRIBE_MAX);
                        }
                    }
                };
            }
        });
        if let Some(previous) = lock(&self.listener).replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn on_signal(self: &Arc<Self>, envelope: SignalEnvelope) {
        if let Some(command) = envelope.command() {
            self.apply_command(command);
            return;
        }
        match (&envelope.event, envelope.origin) {
            (SignalEvent::Heartbeat { source: HeartbeatSource::Mobile }, Origin::Mobile)
            | (SignalEvent::MobileConnected, Origin::Mobile) => self.mobile_alive(),
            (SignalEvent::MobileDisconnected, Origin::Mobile) => {
                self.enter_mobile_gate("mobile_disconnected").await
            }
            _ => {}
        }
    }

    fn apply_command(self: &Arc<Self>, command: AdminCommand) {
        match command {
            AdminCommand::Pause | AdminCommand::Resume => {
                let paused = command == AdminCommand::Pause;
                let applied = self.update(|s| s.active_mut().map(|e| e.overlay.paused = paused).is_ok());
                if applied {
                    tracing::info!("Proctor {} the exam", if paused { "paused" } else { "resumed" });
                }
            }
            AdminCommand::Terminate => {
                self.update(|s| s.mark_terminated());
                tracing::warn!("Proctor terminated the exam");
                self.trigger_submit(SubmitReason::AdminTerminate);
            }
        }
    }

    fn mobile_alive(self: &Arc<Self>) {
        self.mobile_paired.send_replace(true);
        let (gated, recovered) = self.update(|s| match s.active_mut() {
            Ok(exam) => {
                let recovered = exam.overlay.mobile_lost;
                exam.overlay.mobile_lost = false;
                (exam.proctoring.dual_camera_required, recovered)
            }
            Err(_) => (false, false),
        });
        if recovered {
            self.ticker.cancel(TimerName::MobileGrace);
            tracing::info!("Secondary camera is back, answers unblocked");
        }
        if gated {
            self.arm_mobile_watchdog();
        }
    }

    fn arm_mobile_watchdog(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.ticker.once(
            TimerName::MobileLiveness,
            Duration::from_secs(MOBILE_LIVENESS_SECS as u64),
            move || async move {
                // Re-arming aborts this task, so the gate runs on its own.
                if let Some(inner) = weak.upgrade() {
                    tokio::spawn(async move {
                        inner.enter_mobile_gate("heartbeat_timeout").await;
                    });
                }
            },
        );
    }

    async fn enter_mobile_gate(self: &Arc<Self>, cause: &str) {
        let entered = self.update(|s| match s.active_mut() {
            Ok(exam) if exam.proctoring.dual_camera_required && !exam.overlay.mobile_lost => {
                exam.overlay.mobile_lost = true;
                true
            }
            _ => false,
        });
        if !entered {
            return;
        }
        tracing::warn!("Secondary camera lost ({}), answers blocked", cause);
        self.report(ProctorEventType::MobileDisconnect, json!({ "cause": cause }))
            .await;

        if let Some(grace) = self.options.mobile_grace {
            let weak = Arc::downgrade(self);
            self.ticker.once(TimerName::MobileGrace, grace, move || async move {
                let Some(inner) = weak.upgrade() else { return };
                let still_lost = lock(&inner.session)
                    .overlay()
                    .map(|o| o.mobile_lost)
                    .unwrap_or(false);
                if still_lost {
                    inner.trigger_submit(SubmitReason::MobileLost);
                }
            });
        }
    }

    fn start_recording(&self) {
        let stream = lock(&self.stream).clone();
        let recorder = match (&self.devices.recording, stream) {
            (Some(capability), Some(stream)) => capability.start(&stream),
            _ => None,
        };
        let mode = if recorder.is_some() {
            RecordingMode::Full
        } else {
            RecordingMode::SnapshotOnly
        };
        tracing::debug!("Recording mode: {:?}", mode);
        *lock(&self.recorder) = recorder;
        *lock(&self.recording_mode) = Some(mode);
    }

    fn arm(self: &Arc<Self>, options: ProctoringOptions) {
        let weak = Arc::downgrade(self);
        self.ticker.every(
            TimerName::Countdown,
            TimerName::Countdown.default_period(),
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.countdown_tick();
                    }
                }
            },
        );

        let weak = Arc::downgrade(self);
        self.ticker.every(
            TimerName::Heartbeat,
            TimerName::Heartbeat.default_period(),
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.heartbeat_tick().await;
                    }
                }
            },
        );

        if options.camera_required {
            let weak = Arc::downgrade(self);
            self.ticker.every(
                TimerName::Snapshot,
                TimerName::Snapshot.default_period(),
                move || {
                    let weak = weak.clone();
                    async move {
                        if let Some(inner) = weak.upgrade() {
                            inner.snapshot_tick();
                        }
                    }
                },
            );

            if self.devices.faces.is_some() {
                let weak = Arc::downgrade(self);
                self.ticker.every(
                    TimerName::FaceCheck,
                    TimerName::FaceCheck.default_period(),
                    move || {
                        let weak = weak.clone();
                        async move {
                            if let Some(inner) = weak.upgrade() {
                                inner.face_tick().await;
                            }
                        }
                    },
                );
            }
        }

        if options.dual_camera_required {
            self.arm_mobile_watchdog();
        }
    }

    fn countdown_tick(self: &Arc<Self>) {
        let expired = self.remaining().map(|r| r.is_zero()).unwrap_or(false);
        if !expired || self.expiry_fired.load(Ordering::Acquire) {
            return;
        }
        if self.trigger_submit(SubmitReason::TimeExpired).is_some() {
            self.expiry_fired.store(true, Ordering::Release);
            tracing::info!("Time is up, exam auto-submitted");
        }
    }

    async fn heartbeat_tick(&self) {
        let beat = SignalEvent::Heartbeat {
            source: HeartbeatSource::Laptop,
        };
        if let Err(e) = self.signals.publish(&self.token, Origin::Laptop, beat).await {
            tracing::warn!("Heartbeat publish failed: {}", e);
        }
        if let Err(e) = self.backend.heartbeat(&self.token).await {
            tracing::warn!("Heartbeat not recorded: {}", e);
        }
    }

    fn grab_frame(&self) -> Option<Frame> {
        lock(&self.stream).as_ref().and_then(|stream| stream.grab_frame())
    }

    fn snapshot_tick(self: &Arc<Self>) {
        if self.phase() != SessionPhase::InProgress {
            return;
        }
        if self.snapshot_in_flight.swap(true, Ordering::AcqRel) {
            tracing::debug!("Previous snapshot still uploading, tick skipped");
            return;
        }
        let Some(frame) = self.grab_frame() else {
            self.snapshot_in_flight.store(false, Ordering::Release);
            return;
        };

        let inner = self.clone();
        tokio::spawn(async move {
            let captured_at = Utc::now();
            let uploaded = match encode_snapshot_blocking(frame).await {
                Ok(jpeg) => inner
                    .backend
                    .upload(&inner.token, ObjectKind::Snapshot, captured_at, jpeg)
                    .await
                    .map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = uploaded {
                tracing::warn!("Snapshot upload failed: {}", e);
            }
            inner.snapshot_in_flight.store(false, Ordering::Release);
        });
    }

    async fn face_tick(&self) {
        let Some(model) = self.devices.faces.as_ref() else {
            return;
        };
        if !model.is_ready() {
            return;
        }
        let Some(frame) = self.grab_frame() else {
            return;
        };
        let faces = match model.detector().count_faces(&frame).await {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!("Face detection failed: {}", e);
                return;
            }
        };
        let alert = self.update(|s| {
            s.active_mut()
                .ok()
                .and_then(|exam| exam.counters.observe_faces(faces))
        });
        if let Some(alert) = alert {
            self.report(alert.kind(), alert.detail()).await;
        }
    }

    /// Violations are logged best effort.
    async fn report(&self, kind: ProctorEventType, detail: JsonValue) {
        let report = ViolationReport {
            event_type: kind,
            detail,
            occurred_at: Some(Utc::now()),
        };
        if let Err(e) = self.backend.report_violation(&self.token, report).await {
            tracing::warn!("Failed to log {} violation: {}", kind, e);
        }
    }

    /// Starts a submission on its own task. `None` when one is already in
    /// flight or the exam is not running.
    fn trigger_submit(
        self: &Arc<Self>,
        reason: SubmitReason,
    ) -> Option<JoinHandle<Result<SubmitExamResponse>>> {
        let answers = self.update(|s| s.begin_submit(reason))?;
        tracing::info!("Submitting exam ({})", reason.as_str());
        let inner = self.clone();
        Some(tokio::spawn(async move { inner.run_submission(answers, reason).await }))
    }

    async fn run_submission(
        self: Arc<Self>,
        answers: AnswerSheet,
        reason: SubmitReason,
    ) -> Result<SubmitExamResponse> {
        self.flush_recording().await;

        let request = if reason.is_auto() {
            SubmitExamRequest::automatic(answers, reason)
        } else {
            SubmitExamRequest::manual(answers)
        };
        let outcome = self.backend.submit(&self.token, request).await;
        let finished = self.update(|s| s.finish_submit(&outcome));

        if finished {
            self.teardown().await;
        } else if let Err(e) = &outcome {
            tracing::error!("Submission failed: {}", e);
            if lock(&self.session).terminate_pending() {
                self.resubmit_terminated(reason);
            }
        }
        outcome
    }

    /// A terminated exam must still end up submitted. The proctor's reason
    /// replaces whatever submission just failed.
    fn resubmit_terminated(self: &Arc<Self>, failed: SubmitReason) {
        if failed != SubmitReason::AdminTerminate {
            self.trigger_submit(SubmitReason::AdminTerminate);
            return;
        }
        let weak = Arc::downgrade(self);
        self.ticker.once(
            TimerName::TerminateRetry,
            TimerName::TerminateRetry.default_period(),
            move || async move {
                if let Some(inner) = weak.upgrade() {
                    inner.trigger_submit(SubmitReason::AdminTerminate);
                }
            },
        );
    }

    async fn flush_recording(&self) {
        let recorder = lock(&self.recorder).take();
        let Some(recorder) = recorder else {
            return;
        };
        let Some(data) = recorder.finish().await else {
            tracing::warn!("Recorder produced no output");
            return;
        };
        if let Err(e) = self
            .backend
            .upload(&self.token, ObjectKind::Recording, Utc::now(), data)
            .await
        {
            tracing::warn!("Recording upload failed: {}", e);
        }
    }

    async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.ticker.shutdown();
        let recorder = lock(&self.recorder).take();
        if let Some(recorder) = recorder {
            let _ = recorder.finish().await;
        }
        self.release_devices().await;
        tracing::info!("Proctoring session closed");
    }

    /// Stops tracks, unsubscribes and leaves fullscreen.
    async fn release_devices(&self) {
        let listener = lock(&self.listener).take();
        if let Some(listener) = listener {
            listener.abort();
        }
        let stream = lock(&self.stream).take();
        if let Some(stream) = stream {
            stream.stop();
        }
        self.devices.viewport.exit_fullscreen().await;
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.ticker.shutdown();
        let listener = self.listener.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(listener) = listener {
            listener.abort();
        }
        let stream = self.stream.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(stream) = stream {
            stream.stop();
        }
    }
}

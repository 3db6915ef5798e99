#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;
use uuid::Uuid;

use proctoring_backend::database::{MemoryStore, ProctoringStore};
use proctoring_backend::dto::monitor_dto::CreateAssignmentRequest;
use proctoring_backend::error::Result;
use proctoring_backend::models::assignment::{ExamAssignment, ProctoringOptions};
use proctoring_backend::models::exam::{Exam, NewExam};
use proctoring_backend::models::proctor_event::ProctorEventType;
use proctoring_backend::proctor::media::{
    CaptureError, CaptureRequest, Devices, FaceDetector, FaceModel, Frame, MediaDevices,
    MediaStream, Recorder, RecordingCapability, Viewport,
};
use proctoring_backend::proctor::transport::LocalBackend;
use proctoring_backend::routes::build_router;
use proctoring_backend::services::grading_service::{GradingScorer, Scorer};
use proctoring_backend::services::storage_service::{ObjectKey, ObjectStore};
use proctoring_backend::{AppState, StateSettings};

pub const JWT_SECRET: &str = "test_secret_key";

#[derive(Default)]
pub struct MemoryObjects {
    pub objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryObjects {
    pub fn keys_under(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjects {
    async fn put(&self, key: &ObjectKey, data: Bytes) -> Result<String> {
        let path = key.path();
        self.objects.lock().unwrap().insert(path.clone(), data);
        Ok(path)
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub objects: Arc<MemoryObjects>,
}

pub fn app() -> TestApp {
    app_with_scorer(Arc::new(GradingScorer))
}

pub fn app_with_scorer(scorer: Arc<dyn Scorer>) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    build(store.clone(), store, scorer)
}

/// Services run on `wrapped`; `store` is the memory store underneath it,
/// which tests read back from.
pub fn app_over_store(store: Arc<MemoryStore>, wrapped: Arc<dyn ProctoringStore>) -> TestApp {
    build(store, wrapped, Arc::new(GradingScorer))
}

fn build(store: Arc<MemoryStore>, wrapped: Arc<dyn ProctoringStore>, scorer: Arc<dyn Scorer>) -> TestApp {
    let objects = Arc::new(MemoryObjects::default());
    let state = AppState::new(
        wrapped,
        scorer,
        objects.clone(),
        StateSettings {
            jwt_secret: JWT_SECRET.to_string(),
            public_rps: 1000,
            signal_buffer: 256,
        },
    );
    TestApp {
        state,
        store,
        objects,
    }
}

impl TestApp {
    pub async fn exam(&self, duration_minutes: i32) -> Exam {
        self.store
            .insert_exam(NewExam {
                title: "Rust fundamentals".into(),
                duration_minutes,
                passing_score: Decimal::new(50, 0),
                questions: json!([
                    {"id": 1, "type": "multiple_choice", "question": "2+2?", "options": ["3", "4"], "correct_option": 1},
                    {"id": 2, "type": "multiple_choice", "question": "When does borrow checking run?", "options": ["compile time", "run time"], "correct_option": 0}
                ]),
            })
            .await
            .expect("seed exam")
    }

    pub async fn assign(
        &self,
        exam: &Exam,
        proctoring: ProctoringOptions,
        scheduled_start: Option<DateTime<Utc>>,
    ) -> ExamAssignment {
        self.state
            .assignments
            .assign(CreateAssignmentRequest {
                exam_id: exam.id,
                candidate_id: Uuid::new_v4(),
                scheduled_start,
                duration_minutes: None,
                proctoring,
            })
            .await
            .expect("assign exam")
    }

    pub fn backend(&self) -> Arc<LocalBackend> {
        Arc::new(LocalBackend::new(self.state.clone()))
    }

    pub fn admin_bearer(&self) -> String {
        let token = self
            .state
            .auth
            .issue("proctor-1", "proctor", chrono::Duration::hours(1))
            .expect("issue jwt");
        format!("Bearer {}", token)
    }

    pub async fn call(&self, request: Request<Body>) -> (StatusCode, JsonValue) {
        let response = build_router(self.state.clone())
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        let body = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
        (status, body)
    }

    pub async fn event_kinds(&self, assignment_id: Uuid) -> Vec<ProctorEventType> {
        self.state
            .proctor_log
            .history(assignment_id)
            .await
            .expect("proctor log")
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }

    pub async fn count_events(&self, assignment_id: Uuid, kind: ProctorEventType) -> usize {
        self.event_kinds(assignment_id)
            .await
            .into_iter()
            .filter(|k| *k == kind)
            .count()
    }
}

pub fn json_request(method: Method, uri: &str, body: JsonValue) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Steps paused time one second at a time, letting spawned work settle in
/// between so interval ticks are never skipped.
pub async fn run_for(seconds: u64) {
    for _ in 0..seconds {
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
    }
}

pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Waits on work running outside the runtime (blocking encoders) without
/// letting paused time auto-advance.
pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..5000 {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
        tokio::task::yield_now().await;
    }
    panic!("timed out waiting for {}", what);
}

pub fn small_frame() -> Frame {
    Frame {
        width: 4,
        height: 2,
        rgb: vec![128; 4 * 2 * 3],
    }
}

pub struct FakeStream {
    frame: Option<Frame>,
    live: AtomicBool,
}

impl FakeStream {
    pub fn is_stopped(&self) -> bool {
        !self.live.load(Ordering::SeqCst)
    }
}

impl MediaStream for FakeStream {
    fn grab_frame(&self) -> Option<Frame> {
        if self.live.load(Ordering::SeqCst) {
            self.frame.clone()
        } else {
            None
        }
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeMedia {
    pub deny_camera: bool,
    pub deny_microphone: bool,
    pub frame: Option<Frame>,
    pub opened: Mutex<Vec<Arc<FakeStream>>>,
}

impl FakeMedia {
    pub fn with_frames() -> Self {
        Self {
            frame: Some(small_frame()),
            ..Self::default()
        }
    }

    pub fn streams(&self) -> Vec<Arc<FakeStream>> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaDevices for FakeMedia {
    async fn open(&self, request: CaptureRequest) -> std::result::Result<Arc<dyn MediaStream>, CaptureError> {
        if request.video && self.deny_camera {
            return Err(CaptureError::Camera("NotAllowedError".into()));
        }
        if request.audio && self.deny_microphone {
            return Err(CaptureError::Microphone("NotAllowedError".into()));
        }
        let stream = Arc::new(FakeStream {
            frame: self.frame.clone(),
            live: AtomicBool::new(true),
        });
        self.opened.lock().unwrap().push(stream.clone());
        Ok(stream)
    }
}

#[derive(Default)]
pub struct FakeViewport {
    pub reject: bool,
    pub fullscreen: AtomicBool,
    pub requests: AtomicUsize,
}

impl FakeViewport {
    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Viewport for FakeViewport {
    async fn request_fullscreen(&self) -> std::result::Result<(), String> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err("user gesture required".into());
        }
        self.fullscreen.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn exit_fullscreen(&self) {
        self.fullscreen.store(false, Ordering::SeqCst);
    }
}

/// Reports whatever face count the test last set.
pub struct ScriptedFaces {
    pub faces: AtomicUsize,
    pub checks: AtomicUsize,
}

impl ScriptedFaces {
    pub fn new(faces: usize) -> Self {
        Self {
            faces: AtomicUsize::new(faces),
            checks: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl FaceDetector for ScriptedFaces {
    async fn count_faces(&self, _frame: &Frame) -> std::result::Result<usize, String> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.faces.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct FakeRecording {
    pub finished: Arc<AtomicUsize>,
}

struct FakeRecorder {
    finished: Arc<AtomicUsize>,
}

#[async_trait]
impl Recorder for FakeRecorder {
    async fn finish(&self) -> Option<Bytes> {
        if self.finished.fetch_add(1, Ordering::SeqCst) == 0 {
            Some(Bytes::from_static(b"webm-bytes"))
        } else {
            None
        }
    }
}

impl RecordingCapability for FakeRecording {
    fn start(&self, _stream: &Arc<dyn MediaStream>) -> Option<Arc<dyn Recorder>> {
        Some(Arc::new(FakeRecorder {
            finished: self.finished.clone(),
        }))
    }
}

pub struct Rig {
    pub media: Arc<FakeMedia>,
    pub viewport: Arc<FakeViewport>,
    pub faces: Option<Arc<ScriptedFaces>>,
    pub recording: Option<Arc<FakeRecording>>,
}

impl Rig {
    pub fn new(media: FakeMedia) -> Self {
        Self {
            media: Arc::new(media),
            viewport: Arc::new(FakeViewport::default()),
            faces: None,
            recording: None,
        }
    }

    pub fn with_faces(mut self, faces: usize) -> Self {
        self.faces = Some(Arc::new(ScriptedFaces::new(faces)));
        self
    }

    pub fn with_recording(mut self) -> Self {
        self.recording = Some(Arc::new(FakeRecording::default()));
        self
    }

    pub fn rejecting_fullscreen(mut self) -> Self {
        self.viewport = Arc::new(FakeViewport {
            reject: true,
            ..FakeViewport::default()
        });
        self
    }

    pub fn devices(&self) -> Devices {
        Devices {
            media: self.media.clone(),
            viewport: self.viewport.clone(),
            faces: self
                .faces
                .clone()
                .map(|f| FaceModel::ready(f as Arc<dyn FaceDetector>)),
            recording: self
                .recording
                .clone()
                .map(|r| r as Arc<dyn RecordingCapability>),
        }
    }
}

pub fn camera_only() -> ProctoringOptions {
    ProctoringOptions {
        camera_required: true,
        tab_switch_detection: true,
        copy_paste_blocking: true,
        ..ProctoringOptions::default()
    }
}

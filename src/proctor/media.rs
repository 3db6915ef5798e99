//! Device capabilities the session depends on.
//!
//! A browser shell or a native capture layer implements these; tests use
//! in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

/// One RGB8 video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    /// Front camera of the laptop.
    User,
    /// Rear camera of the phone.
    Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub video: bool,
    pub audio: bool,
    pub facing: Facing,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    Camera(String),
    #[error("microphone unavailable: {0}")]
    Microphone(String),
}

pub trait MediaStream: Send + Sync {
    fn grab_frame(&self) -> Option<Frame>;

    /// Stops every track of the stream.
    fn stop(&self);

    fn is_live(&self) -> bool;
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn open(&self, request: CaptureRequest) -> Result<Arc<dyn MediaStream>, CaptureError>;
}

#[async_trait]
pub trait Viewport: Send + Sync {
    async fn request_fullscreen(&self) -> Result<(), String>;

    async fn exit_fullscreen(&self);
}

#[async_trait]
pub trait FaceDetector: Send + Sync {
    async fn count_faces(&self, frame: &Frame) -> Result<usize, String>;
}

/// A face detector plus its loading state. Checks made before the model is
/// ready are skipped, not queued.
#[derive(Clone)]
pub struct FaceModel {
    detector: Arc<dyn FaceDetector>,
    ready: watch::Receiver<bool>,
}

/// Handle the loader flips once model weights are in place.
pub struct FaceModelLoader {
    ready: watch::Sender<bool>,
}

impl FaceModelLoader {
    pub fn mark_ready(&self) {
        self.ready.send_replace(true);
    }
}

impl FaceModel {
    pub fn loading(detector: Arc<dyn FaceDetector>) -> (Self, FaceModelLoader) {
        let (tx, rx) = watch::channel(false);
        (Self { detector, ready: rx }, FaceModelLoader { ready: tx })
    }

    pub fn ready(detector: Arc<dyn FaceDetector>) -> Self {
        let (_, rx) = watch::channel(true);
        Self { detector, ready: rx }
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn detector(&self) -> &Arc<dyn FaceDetector> {
        &self.detector
    }
}

#[async_trait]
pub trait Recorder: Send + Sync {
    /// Stops recording and returns the encoded media.
    async fn finish(&self) -> Option<Bytes>;
}

pub trait RecordingCapability: Send + Sync {
    /// `None` when the platform cannot record this stream.
    fn start(&self, stream: &Arc<dyn MediaStream>) -> Option<Arc<dyn Recorder>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingMode {
    Full,
    SnapshotOnly,
}

/// Everything a candidate laptop session needs from the device.
#[derive(Clone)]
pub struct Devices {
    pub media: Arc<dyn MediaDevices>,
    pub viewport: Arc<dyn Viewport>,
    pub faces: Option<FaceModel>,
    pub recording: Option<Arc<dyn RecordingCapability>>,
}

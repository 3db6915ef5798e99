use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::dto::public_dto::UploadResponse;
use crate::error::{Error, Result};
use crate::models::assignment::AssignmentStatus;
use crate::models::signal::{Origin, SignalEnvelope, SignalEvent};
use crate::services::assignment_service::AssignmentService;
use crate::services::signaling_service::SignalingService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Snapshot,
    Recording,
}

impl ObjectKind {
    fn folder(&self) -> &'static str {
        match self {
            ObjectKind::Snapshot => "snapshots",
            ObjectKind::Recording => "recordings",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            ObjectKind::Snapshot => "jpg",
            ObjectKind::Recording => "webm",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ObjectKind::Snapshot => "image/jpeg",
            ObjectKind::Recording => "video/webm",
        }
    }
}

/// Uploads are keyed by exam, candidate and capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub exam_id: Uuid,
    pub candidate_id: Uuid,
    pub captured_at: DateTime<Utc>,
}

impl ObjectKey {
    pub fn new(kind: ObjectKind, exam_id: Uuid, candidate_id: Uuid, captured_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            exam_id,
            candidate_id,
            captured_at,
        }
    }

    pub fn path(&self) -> String {
        format!(
            "{}/{}/{}/{}.{}",
            self.kind.folder(),
            self.exam_id,
            self.candidate_id,
            self.captured_at.timestamp_millis(),
            self.kind.extension()
        )
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores the blob and returns its public key.
    async fn put(&self, key: &ObjectKey, data: Bytes) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &ObjectKey, data: Bytes) -> Result<String> {
        let relative = key.path();
        let full = self.root.join(&relative);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, &data).await?;
        tracing::debug!(path = %full.display(), bytes = data.len(), "Stored proctoring upload");
        Ok(relative)
    }
}

/// Accepts snapshot and recording uploads from candidate devices.
#[derive(Clone)]
pub struct UploadService {
    assignments: AssignmentService,
    objects: Arc<dyn ObjectStore>,
    signals: SignalingService,
}

impl UploadService {
    pub fn new(assignments: AssignmentService, objects: Arc<dyn ObjectStore>, signals: SignalingService) -> Self {
        Self {
            assignments,
            objects,
            signals,
        }
    }

    pub async fn accept(
        &self,
        token: &str,
        kind: ObjectKind,
        captured_at: DateTime<Utc>,
        body: Bytes,
    ) -> Result<UploadResponse> {
        if body.is_empty() {
            return Err(Error::BadRequest("Upload body is empty".to_string()));
        }
        let (assignment, _) = self.assignments.load(token).await?;
        let accepted = match kind {
            ObjectKind::Snapshot => {
                assignment.status == AssignmentStatus::InProgress && !assignment.is_submission_locked()
            }
            // The recording is flushed while the submission is being made.
            ObjectKind::Recording => assignment.started_at.is_some(),
        };
        if !accepted {
            return Err(Error::InvalidState(
                "Uploads are only accepted for a running exam".to_string(),
            ));
        }

        let key = ObjectKey::new(kind, assignment.exam_id, assignment.candidate_id, captured_at);
        let stored = self.objects.put(&key, body).await?;

        if kind == ObjectKind::Snapshot {
            self.signals.publish(SignalEnvelope::new(
                assignment.exam_id,
                assignment.candidate_id,
                Origin::Laptop,
                SignalEvent::Snapshot {
                    key: stored.clone(),
                    captured_at,
                },
            ));
        }
        Ok(UploadResponse { key: stored })
    }
}

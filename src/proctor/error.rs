use std::fmt;

/// Why answering is currently frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    Paused,
    MobileLost,
    Terminated,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BlockReason::Paused => "the proctor paused the exam",
            BlockReason::MobileLost => "the secondary camera disconnected",
            BlockReason::Terminated => "the proctor terminated the exam",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Camera access denied: {0}")]
    CameraDenied(String),

    #[error("Microphone access denied: {0}")]
    MicrophoneDenied(String),

    #[error("Fullscreen request rejected: {0}")]
    FullscreenRejected(String),

    #[error("The secondary camera has not been paired")]
    MobileNotPaired,

    #[error("Answers are blocked because {0}")]
    Blocked(BlockReason),

    #[error("The exam is not in progress")]
    NotInProgress,

    #[error(transparent)]
    Backend(#[from] crate::error::Error),
}

impl SessionError {
    /// Hard blockers stop the session from starting at all.
    pub fn is_hard_blocker(&self) -> bool {
        matches!(
            self,
            SessionError::CameraDenied(_)
                | SessionError::MicrophoneDenied(_)
                | SessionError::FullscreenRejected(_)
                | SessionError::MobileNotPaired
        )
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

//! Candidate-side client library: the laptop session with its local
//! proctoring sensor, and the phone used as a secondary camera.

pub mod error;
pub mod media;
pub mod mobile;
pub mod runtime;
pub mod sensor;
pub mod session;
pub mod snapshot;
pub mod ticker;
pub mod transport;

pub use error::{BlockReason, SessionError, SessionResult};
pub use mobile::{MobilePeer, Negotiation};
pub use runtime::{ProctoringSession, SessionOptions};
pub use session::{ExamSession, Overlay, SessionPhase};
pub use transport::{ExamBackend, HttpBackend, LocalBackend, SignalTransport};

//! rollcall-core — face-recognition attendance.
//!
//! Loads known identities from reference photos, matches faces in live
//! frames against them, and records one attendance row per person per day.
//! Faces are detected with SCRFD and embedded with ArcFace, both running via
//! ONNX Runtime on the CPU.

pub mod alignment;
pub mod detector;
pub mod engine;
pub mod enroll;
pub mod ledger;
pub mod recognizer;
pub mod session;
pub mod types;

pub use detector::FaceDetector;
pub use engine::{EngineError, FaceEncoder, OnnxFaceEncoder};
pub use enroll::{load_known_faces, EnrollError};
pub use ledger::{AttendanceLedger, AttendanceRecord, LedgerError, MarkOutcome};
pub use recognizer::FaceRecognizer;
pub use session::{
    FrameSource, Recognition, RecognitionSession, SessionError, SessionSummary, StopReason,
    StopSignal,
};
pub use types::{
    BoundingBox, Embedding, EuclideanMatcher, IdentityStore, KnownIdentity, MatchResult, Matcher,
    DEFAULT_MATCH_TOLERANCE,
};

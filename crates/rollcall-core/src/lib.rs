//! rollcall-core — Face recognition engine for classroom attendance.
//!
//! Detects faces with a Haar cascade, rejects photographs with a passive
//! liveness check, picks a full-face or upper-face recognizer depending on
//! whether the student wears a mask, and records attendance per session.

pub mod cache;
pub mod capture;
pub mod cascade;
pub mod config;
pub mod detector;
pub mod events;
pub mod features;
pub mod liveness;
pub mod mask;
pub mod overlay;
pub mod preprocess;
pub mod recognizer;
pub mod roster;
pub mod service;
pub mod session;
pub mod types;

pub use capture::{spawn_capture, CaptureOptions, CaptureStatus, CaptureWorker, FrameSource, SourceError};
pub use cascade::{CascadeDetector, CascadeError};
pub use config::{Settings, SettingsError, SharedSettings};
pub use detector::{DetectionParams, FaceDetector};
pub use events::{AttendanceEvent, EventBus, EventSubscriber, SubscriberError, SubscriptionId};
pub use liveness::{LivenessChecker, LivenessResult};
pub use mask::MaskDetector;
pub use recognizer::{FeatureStrategy, FullFace, ProcessedFace, Recognizer, UpperFace};
pub use roster::{load_roster, RosterError};
pub use service::RecognitionService;
pub use session::{AttendanceRecord, AttendanceSession, SessionSnapshot, UpdateOutcome};
pub use types::{BoundingBox, DetectedFace, EnrolledIdentity, FaceOverlay, FaceStatus, RecognitionResult, Roster};

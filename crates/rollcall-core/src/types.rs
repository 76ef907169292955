use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Axis-aligned face bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> i64 {
        if self.width <= 0 || self.height <= 0 {
            return 0;
        }
        self.width as i64 * self.height as i64
    }

    /// Intersect with a `frame_width` × `frame_height` frame.
    ///
    /// Returns `None` when nothing of the box remains inside the frame.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<BoundingBox> {
        let fw = frame_width.min(i32::MAX as u32) as i64;
        let fh = frame_height.min(i32::MAX as u32) as i64;

        let x0 = (self.x as i64).clamp(0, fw);
        let y0 = (self.y as i64).clamp(0, fh);
        let x1 = (self.x as i64 + self.width as i64).clamp(0, fw);
        let y1 = (self.y as i64 + self.height as i64).clamp(0, fh);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(BoundingBox {
            x: x0 as i32,
            y: y0 as i32,
            width: (x1 - x0) as i32,
            height: (y1 - y0) as i32,
        })
    }
}

/// A face located by the detector in one detection cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    /// Number of raw cascade hits merged into this detection.
    pub confidence: f32,
    /// Unique per detection, never reused within the process.
    pub tracking_id: u64,
    pub detected_at: Instant,
}

/// A person on the roster with their reference face images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrolledIdentity {
    pub id: String,
    pub name: String,
    /// Encoded reference images (PNG, JPEG, ...), in enrollment order.
    pub images: Vec<Vec<u8>>,
}

impl EnrolledIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, images: Vec<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            images,
        }
    }
}

/// The roster passed to a session, in the caller's order.
pub type Roster = Vec<Arc<EnrolledIdentity>>;

/// Outcome of matching one detected face against the roster.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub identity: Option<Arc<EnrolledIdentity>>,
    /// Similarity in [0, 100].
    pub confidence: f32,
    pub face: DetectedFace,
}

impl RecognitionResult {
    pub fn unmatched(face: DetectedFace) -> Self {
        Self {
            identity: None,
            confidence: 0.0,
            face,
        }
    }

    pub fn identity_id(&self) -> Option<&str> {
        self.identity.as_deref().map(|i| i.id.as_str())
    }
}

/// What the engine concluded about one face in the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceStatus {
    /// Detected only; no session is running.
    Detected,
    /// Rejected by the liveness gate.
    Spoof,
    /// No roster identity reached the recognition threshold.
    Unknown,
    /// Matched at or above the recognition threshold.
    Recognized,
}

/// Per-face drawing information returned from frame processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceOverlay {
    pub bbox: BoundingBox,
    pub tracking_id: u64,
    pub status: FaceStatus,
    /// Best diagnostic match, even below threshold.
    pub label: Option<String>,
    pub confidence: f32,
    pub masked: bool,
}

//! Face detector port, region extraction and detection throttling.

use crate::types::{BoundingBox, DetectedFace};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

static NEXT_TRACKING_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh tracking id. Ids increase monotonically for the life of the process.
pub fn next_tracking_id() -> u64 {
    NEXT_TRACKING_ID.fetch_add(1, Ordering::Relaxed)
}

/// Build a `DetectedFace` with a newly issued tracking id.
pub fn new_detection(bbox: BoundingBox, confidence: f32) -> DetectedFace {
    DetectedFace {
        bbox,
        confidence,
        tracking_id: next_tracking_id(),
        detected_at: Instant::now(),
    }
}

/// Multi-scale detection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    /// Pyramid step between scales; must be > 1.
    pub scale_factor: f32,
    /// Minimum number of merged raw hits for a detection to be kept.
    pub min_neighbors: u32,
    /// Smallest face side, in frame pixels.
    pub min_size: u32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 5,
            min_size: 60,
        }
    }
}

/// Locates faces in a colour frame.
///
/// Implementations may keep scratch state between calls, hence `&mut self`.
pub trait FaceDetector: Send {
    /// Detect faces. An empty frame yields an empty list.
    fn detect(&mut self, frame: &RgbImage, params: &DetectionParams) -> Vec<DetectedFace>;
}

/// Copy the detection's box out of the frame, clamped to the frame edges.
///
/// Returns an empty image when nothing of the box lies inside the frame.
pub fn extract_region(frame: &RgbImage, face: &DetectedFace) -> RgbImage {
    let Some(clamped) = face.bbox.clamp_to(frame.width(), frame.height()) else {
        return RgbImage::new(0, 0);
    };
    image::imageops::crop_imm(
        frame,
        clamped.x as u32,
        clamped.y as u32,
        clamped.width as u32,
        clamped.height as u32,
    )
    .to_image()
}

/// Runs detection every Nth frame and replays the last detections in between.
///
/// Replayed detections keep their tracking ids, so everything computed for
/// them (cached recognition, mask state) stays valid until the next cycle.
#[derive(Debug, Default)]
pub struct FrameSkipper {
    frame_count: u64,
    last_faces: Vec<DetectedFace>,
}

impl FrameSkipper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return detections for this frame and whether the detector actually ran.
    ///
    /// An `interval` of 0 is treated as 1 (detect every frame).
    pub fn detect(
        &mut self,
        detector: &mut dyn FaceDetector,
        frame: &RgbImage,
        params: &DetectionParams,
        interval: u32,
    ) -> (Vec<DetectedFace>, bool) {
        let interval = interval.max(1) as u64;
        let fresh = self.frame_count % interval == 0;
        if fresh {
            self.last_faces = detector.detect(frame, params);
        }
        self.frame_count += 1;
        (self.last_faces.clone(), fresh)
    }

    pub fn reset(&mut self) {
        self.frame_count = 0;
        self.last_faces.clear();
    }
}

//! Face covering detection on the lower half of a face crop.
//!
//! Four signals feed a point score; no single signal decides:
//!
//! | Signal | Condition | Points |
//! |--------|-----------|--------|
//! | Canny edge ratio | in [0.12, 0.24] | +2 |
//! | Hue and saturation spread | hue-std < 20 and sat-std < 35 | +2 |
//! | Laplacian texture (std-dev) | < 35 | +1 |
//!
//! A score of 3 or more classifies the face as masked, so at least two
//! independent families of evidence must agree.

use crate::liveness::laplacian_stats;
use image::{GrayImage, Rgb, RgbImage};

const EDGE_RATIO_MIN: f32 = 0.12;
const EDGE_RATIO_MAX: f32 = 0.24;
const MAX_HUE_STD: f32 = 20.0;
const MAX_SATURATION_STD: f32 = 35.0;
const MAX_TEXTURE: f32 = 35.0;
const MASKED_SCORE: u32 = 3;

const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;

/// Fraction of the crop height (from the top) where the analysed region starts.
const LOWER_REGION_START: f32 = 0.5;

/// Raw measurements taken on the lower face region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskSignals {
    /// Standard deviation of hue, OpenCV scale [0, 180).
    pub hue_std: f32,
    /// Standard deviation of saturation, [0, 255].
    pub saturation_std: f32,
    /// Fraction of pixels marked as edges by Canny.
    pub edge_ratio: f32,
    /// Standard deviation of the Laplacian response.
    pub texture: f32,
}

impl MaskSignals {
    pub fn score(&self) -> u32 {
        let mut score = 0;
        if (EDGE_RATIO_MIN..=EDGE_RATIO_MAX).contains(&self.edge_ratio) {
            score += 2;
        }
        if self.hue_std < MAX_HUE_STD && self.saturation_std < MAX_SATURATION_STD {
            score += 2;
        }
        if self.texture < MAX_TEXTURE {
            score += 1;
        }
        score
    }

    pub fn is_masked(&self) -> bool {
        self.score() >= MASKED_SCORE
    }
}

/// Stateless mask classifier.
#[derive(Debug, Clone, Default)]
pub struct MaskDetector;

impl MaskDetector {
    pub fn new() -> Self {
        Self
    }

    /// Whether the face wears a covering. Empty input is never masked.
    pub fn detect(&self, face: &RgbImage) -> bool {
        self.analyze(face).is_some_and(|s| s.is_masked())
    }

    /// Measure the lower-face signals. `None` when the region is empty.
    pub fn analyze(&self, face: &RgbImage) -> Option<MaskSignals> {
        let lower = lower_region(face)?;
        let gray = image::imageops::grayscale(&lower);

        let (hue_std, saturation_std) = hue_saturation_std(&lower);
        let edge_ratio = edge_ratio(&gray);
        let texture = laplacian_stats(&gray).1.sqrt();

        Some(MaskSignals {
            hue_std,
            saturation_std,
            edge_ratio,
            texture,
        })
    }
}

fn lower_region(face: &RgbImage) -> Option<RgbImage> {
    let (w, h) = face.dimensions();
    if w == 0 || h == 0 {
        return None;
    }
    let start = (h as f32 * LOWER_REGION_START) as u32;
    let region_h = h - start;
    if region_h == 0 {
        return None;
    }
    Some(image::imageops::crop_imm(face, 0, start, w, region_h).to_image())
}

/// RGB → (hue in [0, 180), saturation in [0, 255]) using OpenCV's 8-bit HSV scaling.
fn hue_saturation(px: &Rgb<u8>) -> (f32, f32) {
    let [r, g, b] = px.0.map(|c| c as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let saturation = if max > 0.0 { delta / max * 255.0 } else { 0.0 };
    if delta == 0.0 {
        return (0.0, saturation);
    }

    let mut hue = if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if hue < 0.0 {
        hue += 360.0;
    }
    (hue / 2.0, saturation)
}

fn std_dev(values: impl Iterator<Item = f32> + Clone) -> f32 {
    let n = values.clone().count();
    if n == 0 {
        return 0.0;
    }
    let mean = values.clone().map(|v| v as f64).sum::<f64>() / n as f64;
    let var = values.map(|v| (v as f64 - mean).powi(2)).sum::<f64>() / n as f64;
    var.sqrt() as f32
}

fn hue_saturation_std(region: &RgbImage) -> (f32, f32) {
    let hs: Vec<(f32, f32)> = region.pixels().map(hue_saturation).collect();
    (
        std_dev(hs.iter().map(|p| p.0)),
        std_dev(hs.iter().map(|p| p.1)),
    )
}

fn edge_ratio(gray: &GrayImage) -> f32 {
    let total = gray.as_raw().len();
    if total == 0 {
        return 0.0;
    }
    let edges = imageproc::edges::canny(gray, CANNY_LOW, CANNY_HIGH);
    let count = edges.as_raw().iter().filter(|&&p| p > 0).count();
    count as f32 / total as f32
}

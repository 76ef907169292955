//! Passive single-frame liveness detection via texture and frequency analysis.
//!
//! A printed photograph or a screen held up to the camera is a flat,
//! re-sampled surface: it loses fine skin texture and most of its
//! high-frequency energy. This module measures two independent signals on the
//! grayscale face crop:
//!
//! - **Laplacian variance**: edge/detail energy. Live faces show pores,
//!   eyelashes and hair; photographs are smoother.
//! - **High-frequency ratio**: mean absolute difference between the crop and
//!   a heavily blurred copy of itself, relative to the blurred copy's mean
//!   brightness.
//!
//! Both must pass. A single passing metric is not enough.
//!
//! # Threat Coverage
//!
//! - **Blocks:** low-resolution prints and blurry screen replays.
//! - **Does not block:** high-resolution prints, 3D masks, video replays on
//!   sharp displays.

use image::{GrayImage, RgbImage};

/// Minimum Laplacian variance for a live face.
const DEFAULT_MIN_LAPLACIAN_VARIANCE: f32 = 100.0;

/// Minimum `mean|I - blur(I)| / mean(blur(I))` for a live face.
const DEFAULT_MIN_HIGH_FREQ_RATIO: f32 = 0.05;

/// Sigma of the "heavy" blur that approximates the low-frequency component.
const LOW_PASS_SIGMA: f32 = 5.0;

/// Result of a single-frame liveness check.
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessResult {
    /// Whether both metrics passed.
    pub is_live: bool,
    /// Fraction of metrics that passed, in percent (0, 50 or 100).
    pub confidence: f32,
    /// Human-readable explanation of the decision.
    pub reason: String,
    pub laplacian_variance: f32,
    pub high_freq_ratio: f32,
}

/// Texture/frequency liveness gate with tunable thresholds.
#[derive(Debug, Clone)]
pub struct LivenessChecker {
    pub min_laplacian_variance: f32,
    pub min_high_freq_ratio: f32,
}

impl Default for LivenessChecker {
    fn default() -> Self {
        Self {
            min_laplacian_variance: DEFAULT_MIN_LAPLACIAN_VARIANCE,
            min_high_freq_ratio: DEFAULT_MIN_HIGH_FREQ_RATIO,
        }
    }
}

impl LivenessChecker {
    /// Classify a colour face crop as live or photographic.
    pub fn check(&self, face: &RgbImage) -> LivenessResult {
        if face.width() == 0 || face.height() == 0 {
            return LivenessResult {
                is_live: false,
                confidence: 0.0,
                reason: "empty face image".to_string(),
                laplacian_variance: 0.0,
                high_freq_ratio: 0.0,
            };
        }
        self.check_gray(&image::imageops::grayscale(face))
    }

    /// Same as [`check`](Self::check) for an already-grayscale crop.
    pub fn check_gray(&self, gray: &GrayImage) -> LivenessResult {
        if gray.width() == 0 || gray.height() == 0 {
            return LivenessResult {
                is_live: false,
                confidence: 0.0,
                reason: "empty face image".to_string(),
                laplacian_variance: 0.0,
                high_freq_ratio: 0.0,
            };
        }

        let lap_var = laplacian_variance(gray);
        let hf_ratio = high_frequency_ratio(gray);

        let texture_ok = lap_var >= self.min_laplacian_variance;
        let frequency_ok = hf_ratio >= self.min_high_freq_ratio;
        let passed = texture_ok as u8 + frequency_ok as u8;

        let reason = match (texture_ok, frequency_ok) {
            (true, true) => "texture and frequency checks passed".to_string(),
            (false, true) => format!(
                "low texture detail (laplacian variance {lap_var:.1} < {:.1})",
                self.min_laplacian_variance
            ),
            (true, false) => format!(
                "low high-frequency energy (ratio {hf_ratio:.3} < {:.3})",
                self.min_high_freq_ratio
            ),
            (false, false) => format!(
                "flat image (laplacian variance {lap_var:.1}, high-frequency ratio {hf_ratio:.3})"
            ),
        };

        LivenessResult {
            is_live: passed == 2,
            confidence: passed as f32 / 2.0 * 100.0,
            reason,
            laplacian_variance: lap_var,
            high_freq_ratio: hf_ratio,
        }
    }
}

/// Mean and variance of the 3×3 Laplacian response.
pub(crate) fn laplacian_stats(gray: &GrayImage) -> (f32, f32) {
    if gray.width() == 0 || gray.height() == 0 {
        return (0.0, 0.0);
    }
    let lap = imageproc::filter::laplacian_filter(gray);
    let n = lap.as_raw().len() as f64;
    let mean = lap.as_raw().iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = lap
        .as_raw()
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean as f32, variance as f32)
}

/// Variance of the 3×3 Laplacian response.
pub fn laplacian_variance(gray: &GrayImage) -> f32 {
    laplacian_stats(gray).1
}

/// `mean|I - blur(I)| / mean(blur(I))`; 0 for empty or black images.
pub fn high_frequency_ratio(gray: &GrayImage) -> f32 {
    if gray.width() == 0 || gray.height() == 0 {
        return 0.0;
    }
    let low = imageproc::filter::gaussian_blur_f32(gray, LOW_PASS_SIGMA);
    let n = gray.as_raw().len() as f64;

    let high_energy = gray
        .as_raw()
        .iter()
        .zip(low.as_raw())
        .map(|(&a, &b)| (a as f64 - b as f64).abs())
        .sum::<f64>()
        / n;
    let low_energy = low.as_raw().iter().map(|&v| v as f64).sum::<f64>() / n;

    if low_energy > 0.0 {
        (high_energy / low_energy) as f32
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise(w: u32, h: u32, seed: u64) -> RgbImage {
        let mut rng = StdRng::seed_from_u64(seed);
        RgbImage::from_fn(w, h, |_, _| {
            let v: u8 = rng.gen();
            Rgb([v, v, v])
        })
    }

    #[test]
    fn test_empty_is_not_live() {
        let result = LivenessChecker::default().check(&RgbImage::new(0, 0));
        assert!(!result.is_live);
        assert_eq!(result.confidence, 0.0);
        assert!(result.reason.contains("empty"));
    }

    #[test]
    fn test_flat_image_is_not_live() {
        let flat = RgbImage::from_pixel(96, 96, Rgb([140, 120, 100]));
        let result = LivenessChecker::default().check(&flat);
        assert!(!result.is_live);
        assert_eq!(result.confidence, 0.0);
        assert!(result.laplacian_variance < 1.0);
    }

    #[test]
    fn test_noise_image_is_live() {
        let result = LivenessChecker::default().check(&noise(96, 96, 7));
        assert!(result.is_live, "{result:?}");
        assert_eq!(result.confidence, 100.0);
        assert!(result.laplacian_variance > DEFAULT_MIN_LAPLACIAN_VARIANCE);
        assert!(result.high_freq_ratio > DEFAULT_MIN_HIGH_FREQ_RATIO);
    }

    #[test]
    fn test_single_metric_is_insufficient() {
        // Noise passes both; raising the frequency bar leaves only texture passing.
        let checker = LivenessChecker {
            min_laplacian_variance: DEFAULT_MIN_LAPLACIAN_VARIANCE,
            min_high_freq_ratio: 1000.0,
        };
        let result = checker.check(&noise(64, 64, 3));
        assert!(!result.is_live);
        assert_eq!(result.confidence, 50.0);
        assert!(result.reason.contains("high-frequency"));
    }

    #[test]
    fn test_smooth_gradient_is_not_live() {
        let gray = GrayImage::from_fn(96, 96, |x, _| Luma([(x * 2) as u8]));
        let result = LivenessChecker::default().check_gray(&gray);
        assert!(!result.is_live);
    }

    #[test]
    fn test_high_frequency_ratio_black_image() {
        assert_eq!(high_frequency_ratio(&GrayImage::new(10, 10)), 0.0);
    }
}

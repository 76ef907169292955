//! Histogram-descriptor face recognizer.
//!
//! A [`Recognizer`] owns the enrollment store and the shared preprocessing;
//! what it measures on a face is delegated to a [`FeatureStrategy`]. Two
//! strategies exist: [`FullFace`] for uncovered faces and [`UpperFace`] for
//! faces wearing a mask, which only looks at the eyes and brow region.

use crate::features::{self, FaceFeatures, INTENSITY_BINS};
use crate::preprocess::Preprocessor;
use crate::types::{DetectedFace, EnrolledIdentity, RecognitionResult};
use image::{GrayImage, RgbImage};
use std::collections::HashMap;
use std::sync::Arc;

/// Fraction of the processed face kept by [`UpperFace`].
const UPPER_REGION_FRACTION: f32 = 0.6;

/// What a recognizer measures on a preprocessed face.
pub trait FeatureStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// The part of the preprocessed face this strategy looks at.
    fn region(&self, face: &GrayImage) -> GrayImage;

    /// Describe a region. `None` when the region is too small.
    fn extract(&self, region: &GrayImage) -> Option<FaceFeatures>;

    /// Similarity in [0, 1]; identical descriptors score 1.
    fn similarity(&self, a: &FaceFeatures, b: &FaceFeatures) -> f32 {
        a.similarity(b)
    }
}

/// Whole-face descriptor: 8×8 LBP grid plus a global intensity histogram.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullFace;

impl FeatureStrategy for FullFace {
    fn name(&self) -> &'static str {
        "full_face"
    }

    fn region(&self, face: &GrayImage) -> GrayImage {
        face.clone()
    }

    fn extract(&self, region: &GrayImage) -> Option<FaceFeatures> {
        Some(FaceFeatures {
            components: vec![
                features::weighted(features::lbp_grid(region, 8, 8)?, 0.7),
                features::weighted(features::intensity_histogram(region, INTENSITY_BINS)?, 0.3),
            ],
        })
    }
}

/// Masked-face descriptor over the top 60% of the face: 8×5 LBP grid plus a
/// 4×4 gradient-orientation grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpperFace;

impl FeatureStrategy for UpperFace {
    fn name(&self) -> &'static str {
        "upper_face"
    }

    fn region(&self, face: &GrayImage) -> GrayImage {
        let (w, h) = face.dimensions();
        let upper_h = ((h as f32 * UPPER_REGION_FRACTION) as u32).min(h);
        image::imageops::crop_imm(face, 0, 0, w, upper_h).to_image()
    }

    fn extract(&self, region: &GrayImage) -> Option<FaceFeatures> {
        Some(FaceFeatures {
            components: vec![
                features::weighted(features::lbp_grid(region, 8, 5)?, 0.6),
                features::weighted(features::orientation_grid(region, 4, 4)?, 0.4),
            ],
        })
    }
}

/// A face crop that went through the preprocessing pipeline.
///
/// Only obtainable from [`Recognizer::prepare`], so descriptors are always
/// computed on identically prepared images.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedFace(GrayImage);

impl ProcessedFace {
    pub fn image(&self) -> &GrayImage {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.width() == 0 || self.0.height() == 0
    }
}

/// Counters from one enrollment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrollmentStats {
    pub identities: usize,
    pub descriptors: usize,
    pub skipped_images: usize,
}

/// Face recognizer generic over its feature strategy.
pub struct Recognizer<S> {
    strategy: S,
    preprocessor: Preprocessor,
    enrolled: HashMap<String, Vec<FaceFeatures>>,
}

impl<S: FeatureStrategy> Recognizer<S> {
    pub fn new(strategy: S) -> Self {
        Self::with_preprocessor(strategy, Preprocessor::default())
    }

    pub fn with_preprocessor(strategy: S, preprocessor: Preprocessor) -> Self {
        Self {
            strategy,
            preprocessor,
            enrolled: HashMap::new(),
        }
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Run the preprocessing pipeline on a colour face crop.
    pub fn prepare(&self, face: &RgbImage) -> ProcessedFace {
        ProcessedFace(self.preprocessor.process(face))
    }

    /// Decode one encoded reference image.
    pub fn decode_reference(bytes: &[u8]) -> Result<RgbImage, image::ImageError> {
        Ok(image::load_from_memory(bytes)?.to_rgb8())
    }

    fn describe(&self, face: &ProcessedFace) -> Option<FaceFeatures> {
        if face.is_empty() {
            return None;
        }
        self.strategy.extract(&self.strategy.region(face.image()))
    }

    fn describe_references(&self, identity: &EnrolledIdentity) -> (Vec<FaceFeatures>, usize) {
        let mut descriptors = Vec::with_capacity(identity.images.len());
        let mut skipped = 0;
        for (index, bytes) in identity.images.iter().enumerate() {
            let image = match Self::decode_reference(bytes) {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(
                        identity = %identity.id,
                        index,
                        error = %e,
                        "skipping undecodable reference image"
                    );
                    skipped += 1;
                    continue;
                }
            };
            match self.describe(&self.prepare(&image)) {
                Some(f) => descriptors.push(f),
                None => {
                    tracing::warn!(identity = %identity.id, index, "reference image too small");
                    skipped += 1;
                }
            }
        }
        (descriptors, skipped)
    }

    /// Replace the enrollment store with descriptors for `roster`.
    ///
    /// Identities with no usable reference image are left out of the store.
    pub fn precompute_enrollment(&mut self, roster: &[Arc<EnrolledIdentity>]) -> EnrollmentStats {
        let mut store = HashMap::with_capacity(roster.len());
        let mut stats = EnrollmentStats::default();

        for identity in roster {
            let (descriptors, skipped) = self.describe_references(identity);
            stats.skipped_images += skipped;
            if descriptors.is_empty() {
                tracing::warn!(identity = %identity.id, "no usable reference images");
                continue;
            }
            stats.identities += 1;
            stats.descriptors += descriptors.len();
            store.insert(identity.id.clone(), descriptors);
        }

        self.enrolled = store;
        tracing::info!(
            strategy = self.strategy.name(),
            identities = stats.identities,
            descriptors = stats.descriptors,
            skipped = stats.skipped_images,
            "enrollment precomputed"
        );
        stats
    }

    fn score(&self, probe: &FaceFeatures, identity: &EnrolledIdentity) -> f32 {
        let best = |refs: &[FaceFeatures]| {
            refs.iter()
                .map(|r| self.strategy.similarity(probe, r))
                .fold(0.0f32, f32::max)
        };
        let similarity = match self.enrolled.get(&identity.id) {
            Some(refs) => best(refs),
            None => {
                tracing::debug!(identity = %identity.id, "not enrolled, decoding references");
                best(&self.describe_references(identity).0)
            }
        };
        (similarity * 100.0).clamp(0.0, 100.0)
    }

    /// Best similarity between `face` and any reference image of `identity`, in [0, 100].
    pub fn compare(&self, face: &ProcessedFace, identity: &EnrolledIdentity) -> f32 {
        match self.describe(face) {
            Some(probe) => self.score(&probe, identity),
            None => 0.0,
        }
    }

    /// Highest-scoring roster identity with confidence > 0. The first one wins ties.
    pub fn best_match(
        &self,
        face: &ProcessedFace,
        roster: &[Arc<EnrolledIdentity>],
        detected: &DetectedFace,
    ) -> Option<RecognitionResult> {
        let probe = self.describe(face)?;
        let mut best: Option<(&Arc<EnrolledIdentity>, f32)> = None;
        for identity in roster {
            let confidence = self.score(&probe, identity);
            if confidence <= 0.0 {
                continue;
            }
            if best.map_or(true, |(_, c)| confidence > c) {
                best = Some((identity, confidence));
            }
        }
        best.map(|(identity, confidence)| RecognitionResult {
            identity: Some(Arc::clone(identity)),
            confidence,
            face: detected.clone(),
        })
    }

    /// [`best_match`](Self::best_match) restricted to `confidence >= threshold`.
    ///
    /// For callers that only want accepted matches. The recognition service
    /// keeps the below-threshold candidate as a diagnostic label, so it
    /// applies the threshold itself.
    pub fn best_match_above(
        &self,
        face: &ProcessedFace,
        roster: &[Arc<EnrolledIdentity>],
        detected: &DetectedFace,
        threshold: f32,
    ) -> Option<RecognitionResult> {
        self.best_match(face, roster, detected)
            .filter(|r| r.confidence >= threshold)
    }

    /// Drop every precomputed descriptor.
    pub fn cleanup(&mut self) {
        self.enrolled.clear();
    }

    pub fn enrolled_count(&self) -> usize {
        self.enrolled.len()
    }
}

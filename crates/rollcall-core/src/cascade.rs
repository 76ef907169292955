//! Haar cascade face detector (Viola–Jones) loaded from an OpenCV cascade XML.
//!
//! Supports the OpenCV 3+ `opencv_storage/cascade` layout with BOOST stages,
//! upright HAAR features and stump or tree weak classifiers. Detection scans
//! an image pyramid with a fixed window, evaluating features on integral
//! images with per-window variance normalisation, then merges overlapping
//! hits into clusters.

use crate::detector::{new_detection, DetectionParams, FaceDetector};
use crate::types::{BoundingBox, DetectedFace};
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Merge tolerance for grouping raw window hits.
const GROUP_EPS: f32 = 0.2;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}")]
    ModelNotFound(String),
    #[error("failed to read cascade: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse cascade XML: {0}")]
    Parse(#[from] quick_xml::de::DeError),
    #[error("cascade has no stages or no features")]
    Empty,
    #[error("invalid cascade: {0}")]
    Invalid(String),
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
}

// --- XML schema (only the fields detection needs) ---

#[derive(Deserialize)]
struct StorageXml {
    cascade: CascadeXml,
}

#[derive(Deserialize)]
struct CascadeXml {
    #[serde(rename = "stageType", default)]
    stage_type: Option<String>,
    #[serde(rename = "featureType", default)]
    feature_type: Option<String>,
    width: String,
    height: String,
    #[serde(default)]
    stages: Items<StageXml>,
    #[serde(default)]
    features: Items<FeatureXml>,
}

#[derive(Deserialize)]
struct Items<T> {
    #[serde(rename = "_", default = "Vec::new")]
    items: Vec<T>,
}

impl<T> Default for Items<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

#[derive(Deserialize)]
struct StageXml {
    #[serde(rename = "stageThreshold")]
    threshold: String,
    #[serde(rename = "weakClassifiers", default)]
    weak_classifiers: Items<WeakXml>,
}

#[derive(Deserialize)]
struct WeakXml {
    #[serde(rename = "internalNodes")]
    internal_nodes: String,
    #[serde(rename = "leafValues")]
    leaf_values: String,
}

#[derive(Deserialize)]
struct FeatureXml {
    #[serde(default)]
    rects: Items<String>,
    #[serde(default)]
    tilted: Option<String>,
}

// --- In-memory model ---

#[derive(Debug, Clone)]
struct WeightedRect {
    x: usize,
    y: usize,
    w: usize,
    h: usize,
    weight: f64,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    /// Child index when the feature value is below threshold; `<= 0` is leaf `-left`.
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
struct WeakTree {
    nodes: Vec<Node>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    trees: Vec<WeakTree>,
}

/// A parsed boosted Haar cascade.
#[derive(Debug, Clone)]
pub struct HaarCascade {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

fn parse_numbers<T: std::str::FromStr>(text: &str, what: &str) -> Result<Vec<T>, CascadeError> {
    text.split_whitespace()
        .map(|tok| {
            tok.parse::<T>()
                .map_err(|_| CascadeError::Invalid(format!("bad number {tok:?} in {what}")))
        })
        .collect()
}

fn parse_scalar<T: std::str::FromStr>(text: &str, what: &str) -> Result<T, CascadeError> {
    text.trim()
        .parse::<T>()
        .map_err(|_| CascadeError::Invalid(format!("bad {what}: {:?}", text.trim())))
}

impl HaarCascade {
    /// Parse an OpenCV cascade XML document.
    pub fn from_xml(xml: &str) -> Result<Self, CascadeError> {
        let storage: StorageXml = quick_xml::de::from_str(xml)?;
        let cascade = storage.cascade;

        if let Some(kind) = cascade.stage_type.as_deref().map(str::trim) {
            if kind != "BOOST" {
                return Err(CascadeError::Unsupported(format!("stage type {kind}")));
            }
        }
        if let Some(kind) = cascade.feature_type.as_deref().map(str::trim) {
            if kind != "HAAR" {
                return Err(CascadeError::Unsupported(format!("feature type {kind}")));
            }
        }

        let window_width: u32 = parse_scalar(&cascade.width, "width")?;
        let window_height: u32 = parse_scalar(&cascade.height, "height")?;
        if window_width < 3 || window_height < 3 {
            return Err(CascadeError::Invalid(format!(
                "window {window_width}x{window_height} too small"
            )));
        }

        let mut features = Vec::with_capacity(cascade.features.items.len());
        for (i, f) in cascade.features.items.iter().enumerate() {
            if let Some(tilted) = f.tilted.as_deref() {
                if tilted.trim() != "0" {
                    return Err(CascadeError::Unsupported(format!("tilted feature {i}")));
                }
            }
            let mut rects = Vec::with_capacity(f.rects.items.len());
            for r in &f.rects.items {
                let v: Vec<f64> = parse_numbers(r, "feature rect")?;
                if v.len() != 5 || v[..4].iter().any(|&c| c < 0.0) {
                    return Err(CascadeError::Invalid(format!("feature {i}: bad rect {r:?}")));
                }
                let rect = WeightedRect {
                    x: v[0] as usize,
                    y: v[1] as usize,
                    w: v[2] as usize,
                    h: v[3] as usize,
                    weight: v[4],
                };
                if rect.x + rect.w > window_width as usize || rect.y + rect.h > window_height as usize
                {
                    return Err(CascadeError::Invalid(format!(
                        "feature {i}: rect outside {window_width}x{window_height} window"
                    )));
                }
                rects.push(rect);
            }
            features.push(HaarFeature { rects });
        }

        let mut stages = Vec::with_capacity(cascade.stages.items.len());
        for (si, s) in cascade.stages.items.iter().enumerate() {
            let threshold: f64 = parse_scalar(&s.threshold, "stage threshold")?;
            let mut trees = Vec::with_capacity(s.weak_classifiers.items.len());
            for w in &s.weak_classifiers.items {
                trees.push(parse_tree(w, si, features.len())?);
            }
            stages.push(Stage { threshold, trees });
        }

        if stages.is_empty() || features.is_empty() {
            return Err(CascadeError::Empty);
        }

        Ok(Self {
            window_width,
            window_height,
            stages,
            features,
        })
    }

    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Evaluate every stage on the window at (`x`, `y`). Early-exits on the first rejecting stage.
    fn evaluate_window(&self, integral: &IntegralImages, x: usize, y: usize) -> bool {
        let ww = self.window_width as usize;
        let wh = self.window_height as usize;

        // Variance normalisation over the window shrunk by one pixel on each side.
        let area = ((ww - 2) * (wh - 2)) as f64;
        let sum = integral.sum(x + 1, y + 1, ww - 2, wh - 2) as f64;
        let sqsum = integral.sq_sum(x + 1, y + 1, ww - 2, wh - 2) as f64;
        let nf = area * sqsum - sum * sum;
        let inv_norm = if nf > 0.0 { 1.0 / nf.sqrt() } else { 1.0 };

        for stage in &self.stages {
            let mut stage_sum = 0.0f64;
            for tree in &stage.trees {
                let mut idx: i32 = 0;
                loop {
                    let node = tree.nodes[idx as usize];
                    let value = self.features[node.feature]
                        .rects
                        .iter()
                        .map(|r| r.weight * integral.sum(x + r.x, y + r.y, r.w, r.h) as f64)
                        .sum::<f64>()
                        * inv_norm;
                    idx = if value < node.threshold { node.left } else { node.right };
                    if idx <= 0 {
                        break;
                    }
                }
                stage_sum += tree.leaves[(-idx) as usize];
            }
            if stage_sum < stage.threshold {
                return false;
            }
        }
        true
    }

    /// Scan a grayscale image and return grouped detections with their neighbour counts.
    pub fn detect_gray(&self, gray: &GrayImage, params: &DetectionParams) -> Vec<(BoundingBox, u32)> {
        let (img_w, img_h) = gray.dimensions();
        if img_w == 0 || img_h == 0 {
            return Vec::new();
        }
        let scale_factor = if params.scale_factor > 1.0 {
            params.scale_factor
        } else {
            1.1
        };

        let mut raw = Vec::new();
        let mut factor = 1.0f32;
        loop {
            let scaled_w = (img_w as f32 / factor).round() as u32;
            let scaled_h = (img_h as f32 / factor).round() as u32;
            if scaled_w < self.window_width || scaled_h < self.window_height {
                break;
            }
            let win_w = self.window_width as f32 * factor;
            let win_h = self.window_height as f32 * factor;
            if win_w.min(win_h) >= params.min_size as f32 {
                let level = if factor == 1.0 {
                    gray.clone()
                } else {
                    imageops::resize(gray, scaled_w, scaled_h, FilterType::Triangle)
                };
                let integral = IntegralImages::new(&level);
                let step = if factor > 2.0 { 1 } else { 2 };

                for y in (0..=(scaled_h - self.window_height) as usize).step_by(step) {
                    for x in (0..=(scaled_w - self.window_width) as usize).step_by(step) {
                        if self.evaluate_window(&integral, x, y) {
                            raw.push(BoundingBox::new(
                                (x as f32 * factor).round() as i32,
                                (y as f32 * factor).round() as i32,
                                win_w.round() as i32,
                                win_h.round() as i32,
                            ));
                        }
                    }
                }
            }
            factor *= scale_factor;
        }

        group_rectangles(&raw, params.min_neighbors, GROUP_EPS)
    }
}

fn parse_tree(w: &WeakXml, stage: usize, feature_count: usize) -> Result<WeakTree, CascadeError> {
    let raw: Vec<f64> = parse_numbers(&w.internal_nodes, "internalNodes")?;
    let leaves: Vec<f64> = parse_numbers(&w.leaf_values, "leafValues")?;
    if raw.is_empty() || raw.len() % 4 != 0 {
        return Err(CascadeError::Invalid(format!(
            "stage {stage}: internalNodes must hold groups of 4 values, got {}",
            raw.len()
        )));
    }

    let nodes: Vec<Node> = raw
        .chunks_exact(4)
        .map(|c| Node {
            left: c[0] as i32,
            right: c[1] as i32,
            feature: c[2] as usize,
            threshold: c[3],
        })
        .collect();

    for (i, n) in nodes.iter().enumerate() {
        if n.feature >= feature_count {
            return Err(CascadeError::Invalid(format!(
                "stage {stage}: feature index {} out of range ({feature_count} features)",
                n.feature
            )));
        }
        for child in [n.left, n.right] {
            let ok = if child > 0 {
                (child as usize) < nodes.len()
            } else {
                ((-child) as usize) < leaves.len()
            };
            if !ok {
                return Err(CascadeError::Invalid(format!(
                    "stage {stage}: child index {child} out of range"
                )));
            }
            // Children point forward; anything else would loop in evaluate_window.
            if child > 0 && (child as usize) <= i {
                return Err(CascadeError::Invalid(format!(
                    "stage {stage}: node {i} links back to node {child}"
                )));
            }
        }
    }

    Ok(WeakTree { nodes, leaves })
}

/// Summed-area tables for pixel values and squared pixel values.
struct IntegralImages {
    stride: usize,
    sum: Vec<u64>,
    sq_sum: Vec<u64>,
}

impl IntegralImages {
    fn new(gray: &GrayImage) -> Self {
        let (w, h) = gray.dimensions();
        let (w, h) = (w as usize, h as usize);
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sq_sum = vec![0u64; stride * (h + 1)];
        let src = gray.as_raw();

        for y in 0..h {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let p = src[y * w + x] as u64;
                row += p;
                row_sq += p * p;
                let idx = (y + 1) * stride + (x + 1);
                sum[idx] = sum[idx - stride] + row;
                sq_sum[idx] = sq_sum[idx - stride] + row_sq;
            }
        }

        Self { stride, sum, sq_sum }
    }

    fn rect(table: &[u64], stride: usize, x: usize, y: usize, w: usize, h: usize) -> u64 {
        let (x1, y1) = (x + w, y + h);
        table[y1 * stride + x1] + table[y * stride + x] - table[y1 * stride + x] - table[y * stride + x1]
    }

    fn sum(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        Self::rect(&self.sum, self.stride, x, y, w, h)
    }

    fn sq_sum(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        Self::rect(&self.sq_sum, self.stride, x, y, w, h)
    }
}

fn similar(a: &BoundingBox, b: &BoundingBox, eps: f32) -> bool {
    let delta = eps * ((a.width.min(b.width) + a.height.min(b.height)) as f32) * 0.5;
    ((a.x - b.x).abs() as f32) <= delta
        && ((a.y - b.y).abs() as f32) <= delta
        && ((a.x + a.width - b.x - b.width).abs() as f32) <= delta
        && ((a.y + a.height - b.y - b.height).abs() as f32) <= delta
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster similar rectangles, average each cluster and keep clusters with
/// more than `min_neighbors` members. Small clusters nested inside a stronger
/// cluster are dropped.
///
/// With `min_neighbors == 0` the raw rectangles are returned ungrouped.
pub fn group_rectangles(rects: &[BoundingBox], min_neighbors: u32, eps: f32) -> Vec<(BoundingBox, u32)> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects.iter().map(|r| (*r, 1)).collect();
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let ri = find_root(&mut parent, i);
                let rj = find_root(&mut parent, j);
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // Accumulate per cluster in order of first appearance.
    let mut cluster_of_root = vec![usize::MAX; n];
    let mut sums: Vec<[i64; 4]> = Vec::new();
    let mut counts: Vec<u32> = Vec::new();
    for i in 0..n {
        let root = find_root(&mut parent, i);
        if cluster_of_root[root] == usize::MAX {
            cluster_of_root[root] = sums.len();
            sums.push([0; 4]);
            counts.push(0);
        }
        let c = cluster_of_root[root];
        let r = &rects[i];
        sums[c][0] += r.x as i64;
        sums[c][1] += r.y as i64;
        sums[c][2] += r.width as i64;
        sums[c][3] += r.height as i64;
        counts[c] += 1;
    }

    let averaged: Vec<BoundingBox> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &cnt)| {
            let k = cnt as f64;
            BoundingBox::new(
                (s[0] as f64 / k).round() as i32,
                (s[1] as f64 / k).round() as i32,
                (s[2] as f64 / k).round() as i32,
                (s[3] as f64 / k).round() as i32,
            )
        })
        .collect();

    let mut out = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= min_neighbors {
            continue;
        }
        let nested = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let dx = (r2.width as f32 * eps).round() as i32;
            let dy = (r2.height as f32 * eps).round() as i32;
            r1.x >= r2.x - dx
                && r1.y >= r2.y - dy
                && r1.x + r1.width <= r2.x + r2.width + dx
                && r1.y + r1.height <= r2.y + r2.height + dy
                && (n2 > n1.max(3) || n1 < 3)
        });
        if !nested {
            out.push((*r1, n1));
        }
    }
    out
}

/// Frontal-face detector backed by a Haar cascade.
pub struct CascadeDetector {
    cascade: HaarCascade,
}

impl CascadeDetector {
    /// Load the cascade XML at `path`. Fails if the file is missing, malformed or empty.
    pub fn load(path: &str) -> Result<Self, CascadeError> {
        if !Path::new(path).exists() {
            return Err(CascadeError::ModelNotFound(path.to_string()));
        }
        let xml = std::fs::read_to_string(path)?;
        let cascade = HaarCascade::from_xml(&xml)?;

        tracing::info!(
            path,
            stages = cascade.stages.len(),
            features = cascade.features.len(),
            window = ?cascade.window_size(),
            "loaded Haar cascade"
        );

        Ok(Self { cascade })
    }

    pub fn from_cascade(cascade: HaarCascade) -> Self {
        Self { cascade }
    }

    pub fn cascade(&self) -> &HaarCascade {
        &self.cascade
    }
}

impl FaceDetector for CascadeDetector {
    fn detect(&mut self, frame: &RgbImage, params: &DetectionParams) -> Vec<DetectedFace> {
        if frame.width() == 0 || frame.height() == 0 {
            return Vec::new();
        }
        let gray = imageops::grayscale(frame);
        let mut faces: Vec<DetectedFace> = self
            .cascade
            .detect_gray(&gray, params)
            .into_iter()
            .filter_map(|(bbox, neighbors)| {
                let clamped = bbox.clamp_to(frame.width(), frame.height())?;
                Some(new_detection(clamped, neighbors as f32))
            })
            .collect();
        faces.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        tracing::trace!(count = faces.len(), "cascade detection");
        faces
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Luma, Rgb};
    use std::io::Write;

    /// One-stage, one-stump cascade on an 8×8 window: passes when the right
    /// half of the window is brighter than the left half.
    pub(crate) const EDGE_CASCADE_XML: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier"><stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>8</height>
  <width>8</width>
  <stageParams>
    <maxWeakCount>1</maxWeakCount></stageParams>
  <featureParams>
    <maxCatCount>0</maxCatCount></featureParams>
  <stageNum>1</stageNum>
  <stages>
    <!-- stage 0 -->
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 1.0000000000000001e-01</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 4 8 -1.</_>
        <_>
          4 0 4 8 1.</_></rects></_></features></cascade>
</opencv_storage>
"#;

    fn edge_frame(w: u32, h: u32, edge_x: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, _| Luma([if x < edge_x { 0 } else { 255 }]))
    }

    fn params(min_neighbors: u32) -> DetectionParams {
        // Large step: only the base level fits these small test frames.
        DetectionParams {
            scale_factor: 3.0,
            min_neighbors,
            min_size: 8,
        }
    }

    #[test]
    fn test_parse_edge_cascade() {
        let cascade = HaarCascade::from_xml(EDGE_CASCADE_XML).unwrap();
        assert_eq!(cascade.window_size(), (8, 8));
        assert_eq!(cascade.stage_count(), 1);
    }

    #[test]
    fn test_detect_vertical_edge() {
        let cascade = HaarCascade::from_xml(EDGE_CASCADE_XML).unwrap();
        let gray = edge_frame(32, 16, 16);
        let hits = cascade.detect_gray(&gray, &params(0));
        assert!(!hits.is_empty());
        for (b, _) in &hits {
            assert!(b.x < 16 && b.x + b.width > 16, "hit {b:?} does not straddle edge");
        }
    }

    #[test]
    fn test_uniform_image_has_no_hits() {
        let cascade = HaarCascade::from_xml(EDGE_CASCADE_XML).unwrap();
        let gray = GrayImage::from_pixel(32, 32, Luma([128]));
        assert!(cascade.detect_gray(&gray, &params(0)).is_empty());
    }

    #[test]
    fn test_image_smaller_than_window() {
        let cascade = HaarCascade::from_xml(EDGE_CASCADE_XML).unwrap();
        let gray = edge_frame(6, 6, 3);
        assert!(cascade.detect_gray(&gray, &params(0)).is_empty());
    }

    #[test]
    fn test_min_size_skips_small_scales() {
        let cascade = HaarCascade::from_xml(EDGE_CASCADE_XML).unwrap();
        let gray = edge_frame(32, 32, 16);
        let p = DetectionParams {
            scale_factor: 2.0,
            min_neighbors: 0,
            min_size: 16,
        };
        let hits = cascade.detect_gray(&gray, &p);
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|(b, _)| b.width >= 16));
    }

    #[test]
    fn test_detector_assigns_fresh_tracking_ids() {
        let cascade = HaarCascade::from_xml(EDGE_CASCADE_XML).unwrap();
        let mut detector = CascadeDetector::from_cascade(cascade);
        let frame = RgbImage::from_fn(32, 16, |x, _| if x < 16 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) });
        let a = detector.detect(&frame, &params(0));
        let b = detector.detect(&frame, &params(0));
        assert!(!a.is_empty());
        assert!(b.iter().all(|f| a.iter().all(|g| g.tracking_id != f.tracking_id)));
        assert!(a.iter().all(|f| f.bbox.clamp_to(32, 16) == Some(f.bbox)));
    }

    #[test]
    fn test_detector_empty_frame() {
        let cascade = HaarCascade::from_xml(EDGE_CASCADE_XML).unwrap();
        let mut detector = CascadeDetector::from_cascade(cascade);
        assert!(detector.detect(&RgbImage::new(0, 0), &params(0)).is_empty());
    }

    #[test]
    fn test_group_rectangles_merges_cluster() {
        let rects = vec![
            BoundingBox::new(10, 10, 40, 40),
            BoundingBox::new(11, 10, 40, 40),
            BoundingBox::new(10, 12, 41, 40),
            BoundingBox::new(200, 200, 40, 40),
        ];
        let grouped = group_rectangles(&rects, 2, GROUP_EPS);
        assert_eq!(grouped.len(), 1);
        let (b, n) = grouped[0];
        assert_eq!(n, 3);
        assert!((b.x - 10).abs() <= 1 && (b.y - 11).abs() <= 1);
    }

    #[test]
    fn test_group_rectangles_zero_neighbors_passthrough() {
        let rects = vec![BoundingBox::new(0, 0, 10, 10), BoundingBox::new(1, 1, 10, 10)];
        let grouped = group_rectangles(&rects, 0, GROUP_EPS);
        assert_eq!(grouped.len(), 2);
    }

    #[test]
    fn test_group_rectangles_drops_nested_weak_cluster() {
        let mut rects = vec![BoundingBox::new(0, 0, 100, 100); 6];
        rects.extend(vec![BoundingBox::new(30, 30, 30, 30); 2]);
        let grouped = group_rectangles(&rects, 1, GROUP_EPS);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].1, 6);
    }

    #[test]
    fn test_load_missing_file() {
        let err = CascadeDetector::load("/nonexistent/cascade.xml").err().unwrap();
        assert!(matches!(err, CascadeError::ModelNotFound(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EDGE_CASCADE_XML.as_bytes()).unwrap();
        let detector = CascadeDetector::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(detector.cascade().stage_count(), 1);
    }

    #[test]
    fn test_empty_cascade_rejected() {
        let xml = r#"<opencv_storage><cascade><stageType>BOOST</stageType><featureType>HAAR</featureType>
<height>24</height><width>24</width><stages></stages><features></features></cascade></opencv_storage>"#;
        assert!(matches!(HaarCascade::from_xml(xml), Err(CascadeError::Empty)));
    }

    #[test]
    fn test_malformed_xml_rejected() {
        assert!(HaarCascade::from_xml("<opencv_storage><cascade>").is_err());
    }

    #[test]
    fn test_feature_index_out_of_range_rejected() {
        let xml = EDGE_CASCADE_XML.replace("0 -1 0 1.0000000000000001e-01", "0 -1 7 0.1");
        assert!(matches!(HaarCascade::from_xml(&xml), Err(CascadeError::Invalid(_))));
    }

    #[test]
    fn test_backward_child_link_rejected() {
        // Root splits to node 1, whose left child is itself.
        let xml = EDGE_CASCADE_XML.replace(
            "0 -1 0 1.0000000000000001e-01",
            "1 -1 0 1.0e+09 1 -1 0 1.0e+09",
        );
        let err = HaarCascade::from_xml(&xml).err().unwrap();
        assert!(matches!(err, CascadeError::Invalid(ref msg) if msg.contains("links back")));
    }

    #[test]
    fn test_forward_child_link_accepted() {
        let xml = EDGE_CASCADE_XML.replace(
            "0 -1 0 1.0000000000000001e-01",
            "1 -1 0 1.0e+09 0 -1 0 0.1",
        );
        let cascade = HaarCascade::from_xml(&xml).unwrap();
        let gray = edge_frame(32, 16, 16);
        assert!(!cascade.detect_gray(&gray, &params(0)).is_empty());
    }

    #[test]
    fn test_lbp_cascade_unsupported() {
        let xml = EDGE_CASCADE_XML.replace("<featureType>HAAR</featureType>", "<featureType>LBP</featureType>");
        assert!(matches!(HaarCascade::from_xml(&xml), Err(CascadeError::Unsupported(_))));
    }
}

//! Histogram face descriptors: spatial LBP grids, intensity histograms and
//! gradient-orientation (HOG-style) grids.
//!
//! Every component is L1-normalised so that histogram intersection yields a
//! similarity in [0, 1], with identical descriptors scoring exactly 1.

use image::GrayImage;
use std::sync::OnceLock;

/// Number of uniform-LBP bins: 58 uniform patterns plus one catch-all.
pub const LBP_BINS: usize = 59;
pub const INTENSITY_BINS: usize = 32;
pub const ORIENTATION_BINS: usize = 9;

/// One weighted histogram block of a descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureComponent {
    pub weight: f32,
    pub values: Vec<f32>,
}

/// A recognizer-specific face descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceFeatures {
    pub components: Vec<FeatureComponent>,
}

impl FaceFeatures {
    /// Weighted histogram intersection in [0, 1].
    ///
    /// Descriptors with a different layout (produced by another strategy) score 0.
    pub fn similarity(&self, other: &FaceFeatures) -> f32 {
        if self.components.len() != other.components.len() {
            return 0.0;
        }
        let mut total_weight = 0.0f64;
        let mut score = 0.0f64;
        for (a, b) in self.components.iter().zip(&other.components) {
            if a.values.len() != b.values.len() {
                return 0.0;
            }
            let weight = a.weight as f64;
            total_weight += weight;
            score += weight * intersection(&a.values, &b.values);
        }
        if total_weight > 0.0 {
            (score / total_weight).clamp(0.0, 1.0) as f32
        } else {
            0.0
        }
    }
}

fn intersection(a: &[f32], b: &[f32]) -> f64 {
    let sum_a: f64 = a.iter().map(|&v| v as f64).sum();
    let sum_b: f64 = b.iter().map(|&v| v as f64).sum();
    let denom = sum_a.max(sum_b);
    if denom <= 0.0 {
        // Two empty histograms (e.g. no gradients at all) are indistinguishable.
        return if sum_a == sum_b { 1.0 } else { 0.0 };
    }
    let common: f64 = a.iter().zip(b).map(|(&x, &y)| x.min(y) as f64).sum();
    common / denom
}

fn normalize_l1(values: &mut [f32]) {
    let sum: f32 = values.iter().sum();
    if sum > 0.0 {
        for v in values.iter_mut() {
            *v /= sum;
        }
    }
}

fn uniform_lbp_table() -> &'static [u8; 256] {
    static TABLE: OnceLock<[u8; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [(LBP_BINS - 1) as u8; 256];
        let mut next = 0u8;
        for code in 0..=255u8 {
            let rotated = code.rotate_left(1);
            if (code ^ rotated).count_ones() <= 2 {
                table[code as usize] = next;
                next += 1;
            }
        }
        table
    })
}

/// Cell boundaries splitting `len` pixels into `cells` nearly equal spans.
fn cell_bounds(len: u32, cells: u32, index: u32) -> (u32, u32) {
    let start = index * len / cells;
    let end = (index + 1) * len / cells;
    (start, end)
}

fn cell_of(pos: u32, len: u32, cells: u32) -> usize {
    ((pos as u64 * cells as u64 / len.max(1) as u64) as usize).min(cells as usize - 1)
}

/// Uniform LBP histograms over a `cols` × `rows` grid, concatenated.
///
/// Each cell histogram is normalised on its own, then the whole block is
/// re-normalised so cells contribute equally.
pub fn lbp_grid(gray: &GrayImage, cols: u32, rows: u32) -> Option<FeatureComponent> {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 || cols == 0 || rows == 0 {
        return None;
    }
    let table = uniform_lbp_table();
    let cells = (cols * rows) as usize;
    let mut hist = vec![0f32; cells * LBP_BINS];

    const OFFSETS: [(i32, i32); 8] = [
        (-1, -1),
        (0, -1),
        (1, -1),
        (1, 0),
        (1, 1),
        (0, 1),
        (-1, 1),
        (-1, 0),
    ];

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = gray.get_pixel(x, y).0[0];
            let mut code = 0u8;
            for (bit, (dx, dy)) in OFFSETS.iter().enumerate() {
                let nx = (x as i32 + dx) as u32;
                let ny = (y as i32 + dy) as u32;
                if gray.get_pixel(nx, ny).0[0] >= center {
                    code |= 1 << bit;
                }
            }
            let cell = cell_of(y, h, rows) * cols as usize + cell_of(x, w, cols);
            hist[cell * LBP_BINS + table[code as usize] as usize] += 1.0;
        }
    }

    for cell in hist.chunks_mut(LBP_BINS) {
        normalize_l1(cell);
    }
    normalize_l1(&mut hist);

    Some(FeatureComponent {
        weight: 1.0,
        values: hist,
    })
}

/// Global intensity histogram with `bins` buckets.
pub fn intensity_histogram(gray: &GrayImage, bins: usize) -> Option<FeatureComponent> {
    if gray.width() == 0 || gray.height() == 0 || bins == 0 {
        return None;
    }
    let mut hist = vec![0f32; bins];
    for &p in gray.as_raw() {
        hist[p as usize * bins / 256] += 1.0;
    }
    normalize_l1(&mut hist);
    Some(FeatureComponent {
        weight: 1.0,
        values: hist,
    })
}

/// Magnitude-weighted unsigned gradient-orientation histograms over a grid.
pub fn orientation_grid(gray: &GrayImage, cols: u32, rows: u32) -> Option<FeatureComponent> {
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 || cols == 0 || rows == 0 {
        return None;
    }
    let cells = (cols * rows) as usize;
    let mut hist = vec![0f32; cells * ORIENTATION_BINS];

    for row in 0..rows {
        let (y0, y1) = cell_bounds(h, rows, row);
        for col in 0..cols {
            let (x0, x1) = cell_bounds(w, cols, col);
            let cell = (row * cols + col) as usize;
            for y in y0.max(1)..y1.min(h - 1) {
                for x in x0.max(1)..x1.min(w - 1) {
                    let gx = gray.get_pixel(x + 1, y).0[0] as f32 - gray.get_pixel(x - 1, y).0[0] as f32;
                    let gy = gray.get_pixel(x, y + 1).0[0] as f32 - gray.get_pixel(x, y - 1).0[0] as f32;
                    let magnitude = (gx * gx + gy * gy).sqrt();
                    if magnitude == 0.0 {
                        continue;
                    }
                    let mut angle = gy.atan2(gx).to_degrees();
                    if angle < 0.0 {
                        angle += 180.0;
                    }
                    let bin = ((angle / 180.0 * ORIENTATION_BINS as f32) as usize).min(ORIENTATION_BINS - 1);
                    hist[cell * ORIENTATION_BINS + bin] += magnitude;
                }
            }
        }
    }

    for cell in hist.chunks_mut(ORIENTATION_BINS) {
        normalize_l1(cell);
    }
    normalize_l1(&mut hist);

    Some(FeatureComponent {
        weight: 1.0,
        values: hist,
    })
}

/// Set the component weight, builder style.
pub fn weighted(component: FeatureComponent, weight: f32) -> FeatureComponent {
    FeatureComponent { weight, ..component }
}

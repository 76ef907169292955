//! Face crop normalisation: grayscale → blur → min/max stretch → CLAHE → resize.
//!
//! The order is fixed. CLAHE clip limits are calibrated for denoised,
//! full-range input, and the recognition thresholds downstream are calibrated
//! for the CLAHE output.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

/// Side length of the square analysis image.
pub const ANALYSIS_SIZE: u32 = 128;

const BLUR_SIGMA: f32 = 1.0;
const CLAHE_TILES: u32 = 8;
/// Fraction of tile pixels a single histogram bin may hold before clipping.
const CLAHE_CLIP_LIMIT: f32 = 0.01;

/// Deterministic, side-effect free preprocessing chain.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    pub output_size: u32,
    pub blur_sigma: f32,
    pub clahe_tiles: u32,
    pub clahe_clip_limit: f32,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            output_size: ANALYSIS_SIZE,
            blur_sigma: BLUR_SIGMA,
            clahe_tiles: CLAHE_TILES,
            clahe_clip_limit: CLAHE_CLIP_LIMIT,
        }
    }
}

impl Preprocessor {
    /// Run the full chain on a colour face crop.
    pub fn process(&self, image: &RgbImage) -> GrayImage {
        self.process_gray(&to_grayscale(image))
    }

    /// Run the chain on an image that is already grayscale.
    pub fn process_gray(&self, gray: &GrayImage) -> GrayImage {
        let blurred = blur(gray, self.blur_sigma);
        let stretched = normalize(&blurred);
        let equalized = clahe(&stretched, self.clahe_tiles, self.clahe_clip_limit);
        resize(&equalized, self.output_size, self.output_size)
    }
}

fn is_empty(image: &GrayImage) -> bool {
    image.width() == 0 || image.height() == 0
}

/// Luma conversion (Rec. 601 weights, as `image` computes them).
pub fn to_grayscale(image: &RgbImage) -> GrayImage {
    if image.width() == 0 || image.height() == 0 {
        return GrayImage::new(0, 0);
    }
    imageops::grayscale(image)
}

/// Gaussian blur for sensor-noise suppression.
pub fn blur(gray: &GrayImage, sigma: f32) -> GrayImage {
    if is_empty(gray) {
        return GrayImage::new(0, 0);
    }
    if sigma <= 0.0 {
        return gray.clone();
    }
    imageproc::filter::gaussian_blur_f32(gray, sigma)
}

/// Linear min/max stretch to the full [0, 255] range.
///
/// A constant image has no range to stretch and is returned unchanged.
pub fn normalize(gray: &GrayImage) -> GrayImage {
    if is_empty(gray) {
        return GrayImage::new(0, 0);
    }
    let raw = gray.as_raw();
    let min = raw.iter().copied().min().unwrap_or(0);
    let max = raw.iter().copied().max().unwrap_or(0);
    if max == min {
        return gray.clone();
    }

    let range = (max - min) as f32;
    let data = raw
        .iter()
        .map(|&p| ((p - min) as f32 * 255.0 / range).round().clamp(0.0, 255.0) as u8)
        .collect();
    GrayImage::from_raw(gray.width(), gray.height(), data)
        .unwrap_or_else(|| GrayImage::new(0, 0))
}

/// Contrast-Limited Adaptive Histogram Equalization.
///
/// Divides the image into a `tiles` × `tiles` grid, computes a clipped
/// histogram per tile, builds CDFs, and bilinearly interpolates between tile
/// CDFs for smooth output. Images too small for the grid are returned as-is.
pub fn clahe(gray: &GrayImage, tiles: u32, clip_limit: f32) -> GrayImage {
    if is_empty(gray) {
        return GrayImage::new(0, 0);
    }
    let mut out = gray.clone();
    let (width, height) = out.dimensions();
    clahe_in_place(&mut out, width, height, tiles.max(1), clip_limit);
    out
}

fn clahe_in_place(image: &mut GrayImage, width: u32, height: u32, tiles: u32, clip_limit: f32) {
    let (w, h, n) = (width as usize, height as usize, tiles as usize);
    let (tile_w, tile_h) = (w / n, h / n);
    if tile_w == 0 || tile_h == 0 {
        return;
    }
    let clip = ((clip_limit * (tile_w * tile_h) as f32) as u32).max(1);

    let luts: Vec<[u8; 256]> = (0..n * n)
        .map(|t| {
            let (x0, y0) = ((t % n) * tile_w, (t / n) * tile_h);
            let mut hist = [0u32; 256];
            for y in y0..y0 + tile_h {
                for x in x0..x0 + tile_w {
                    hist[image.get_pixel(x as u32, y as u32)[0] as usize] += 1;
                }
            }
            tile_lut(&mut hist, clip, (tile_w * tile_h) as u32)
        })
        .collect();

    // Tile centres sit at half-tile offsets; pixels outside them clamp to the edge tiles.
    let axis = |pos: usize, size: usize| {
        let f = (pos as f32 / size as f32 - 0.5).clamp(0.0, (n - 1) as f32);
        let lo = f as usize;
        (lo, (lo + 1).min(n - 1), f - lo as f32)
    };

    for y in 0..h {
        let (r0, r1, dy) = axis(y, tile_h);
        for x in 0..w {
            let (c0, c1, dx) = axis(x, tile_w);
            let px = image.get_pixel_mut(x as u32, y as u32);
            let v = px[0] as usize;
            let at = |r: usize, c: usize| luts[r * n + c][v] as f32;
            let top = at(r0, c0) + (at(r0, c1) - at(r0, c0)) * dx;
            let bottom = at(r1, c0) + (at(r1, c1) - at(r1, c0)) * dx;
            px[0] = (top + (bottom - top) * dy).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Clip `hist` at `clip`, spread the excess over all bins, and return the
/// equalisation lookup table for one tile.
fn tile_lut(hist: &mut [u32; 256], clip: u32, total: u32) -> [u8; 256] {
    let excess: u32 = hist.iter().map(|&c| c.saturating_sub(clip)).sum();
    let (share, mut residual) = (excess / 256, (excess % 256) as usize);
    for bin in hist.iter_mut() {
        *bin = (*bin).min(clip) + share;
    }
    // Remainder goes to every `step`-th bin across the whole range.
    if residual > 0 {
        let step = (256 / residual).max(1);
        for bin in hist.iter_mut().step_by(step) {
            if residual == 0 {
                break;
            }
            *bin += 1;
            residual -= 1;
        }
    }

    let scale = 255.0 / total.max(1) as f32;
    let mut lut = [0u8; 256];
    let mut acc = 0u32;
    for (out, &count) in lut.iter_mut().zip(hist.iter()) {
        acc += count;
        *out = (acc as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

/// Resize to the analysis resolution.
pub fn resize(gray: &GrayImage, width: u32, height: u32) -> GrayImage {
    if is_empty(gray) || width == 0 || height == 0 {
        return GrayImage::new(0, 0);
    }
    if gray.dimensions() == (width, height) {
        return gray.clone();
    }
    imageops::resize(gray, width, height, FilterType::Triangle)
}

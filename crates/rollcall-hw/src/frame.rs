//! Raw V4L2 buffer conversion to RGB frames, plus dark-frame detection.

use image::{ImageFormat, Rgb, RgbImage};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("MJPEG decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

fn check_len(format: &'static str, buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// BT.601 limited-range YCbCr → RGB.
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> Rgb<u8> {
    let c = (y as f32 - 16.0) * 1.164;
    let d = cb as f32 - 128.0;
    let e = cr as f32 - 128.0;
    let r = c + 1.596 * e;
    let g = c - 0.392 * d - 0.813 * e;
    let b = c + 2.017 * d;
    Rgb([
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ])
}

/// Convert packed YUYV (4:2:2) to RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U and V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    check_len("YUYV", yuyv, expected)?;

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let [y0, u, y1, v] = [chunk[0], chunk[1], chunk[2], chunk[3]];
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v).0);
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v).0);
    }
    // Odd widths leave half a macropixel; pad with black so the buffer fits.
    rgb.resize((width * height * 3) as usize, 0);
    Ok(RgbImage::from_raw(width, height, rgb).unwrap_or_else(|| RgbImage::new(0, 0)))
}

/// Replicate 8-bit grayscale into RGB.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = (width * height) as usize;
    check_len("GREY", grey, pixels)?;
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let v = grey[(y * width + x) as usize];
        Rgb([v, v, v])
    }))
}

/// 16-bit little-endian grayscale, keeping the high byte.
pub fn y16_to_rgb(y16: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let pixels = (width * height) as usize;
    check_len("Y16", y16, pixels * 2)?;
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let idx = (y * width + x) as usize * 2;
        let value = u16::from_le_bytes([y16[idx], y16[idx + 1]]);
        let v = (value >> 8) as u8;
        Rgb([v, v, v])
    }))
}

/// Decode one Motion-JPEG frame.
pub fn mjpeg_to_rgb(jpeg: &[u8]) -> Result<RgbImage, FrameError> {
    Ok(image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)?.to_rgb8())
}

/// True if more than `threshold_pct` of pixels have luma below 32.
pub fn is_dark_frame(frame: &RgbImage, threshold_pct: f32) -> bool {
    let total = frame.width() as usize * frame.height() as usize;
    if total == 0 {
        return true;
    }
    let dark = frame
        .pixels()
        .filter(|p| {
            let [r, g, b] = p.0.map(|c| c as u32);
            (299 * r + 587 * g + 114 * b) / 1000 < 32
        })
        .count();
    (dark as f32 / total as f32) > threshold_pct
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_yuyv_to_rgb_gray_levels() {
        // 2x1 image, neutral chroma: [Y0=16 (black), U=128, Y1=235 (white), V=128]
        let rgb = yuyv_to_rgb(&[16, 128, 235, 128], 2, 1).unwrap();
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_yuyv_to_rgb_red_chroma() {
        let rgb = yuyv_to_rgb(&[81, 90, 81, 240], 2, 1).unwrap();
        let px = rgb.get_pixel(0, 0);
        assert!(px.0[0] > 240 && px.0[1] < 20 && px.0[2] < 20, "{px:?}");
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(matches!(
            yuyv_to_rgb(&[100, 128], 2, 1),
            Err(FrameError::InvalidLength { format: "YUYV", expected: 4, actual: 2 })
        ));
    }

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[0, 50, 100, 150, 200, 250], 3, 2).unwrap();
        assert_eq!(rgb.dimensions(), (3, 2));
        assert_eq!(*rgb.get_pixel(1, 1), Rgb([200, 200, 200]));
        assert!(grey_to_rgb(&[0; 5], 3, 2).is_err());
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        // 0x1234 little-endian → 0x12
        let rgb = y16_to_rgb(&[0x34, 0x12, 0xff, 0xff], 2, 1).unwrap();
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([0x12, 0x12, 0x12]));
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([0xff, 0xff, 0xff]));
        assert!(y16_to_rgb(&[0; 3], 2, 1).is_err());
    }

    #[test]
    fn test_mjpeg_roundtrip_dimensions() {
        let src = RgbImage::from_pixel(16, 8, Rgb([200, 100, 50]));
        let mut jpeg = Cursor::new(Vec::new());
        src.write_to(&mut jpeg, ImageFormat::Jpeg).unwrap();
        let decoded = mjpeg_to_rgb(jpeg.get_ref()).unwrap();
        assert_eq!(decoded.dimensions(), (16, 8));
    }

    #[test]
    fn test_mjpeg_garbage_is_error() {
        assert!(matches!(mjpeg_to_rgb(b"not a jpeg"), Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_dark_frame_all_black() {
        assert!(is_dark_frame(&RgbImage::new(10, 10), 0.95));
    }

    #[test]
    fn test_dark_frame_normal() {
        assert!(!is_dark_frame(&RgbImage::from_pixel(10, 10, Rgb([128, 128, 128])), 0.95));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&RgbImage::new(0, 0), 0.95));
    }

    #[test]
    fn test_dark_frame_borderline_bright() {
        // 94% dark, 6% bright → should NOT be dark
        let frame = RgbImage::from_fn(100, 10, |x, _| if x < 94 { Rgb([10, 10, 10]) } else { Rgb([128, 128, 128]) });
        assert!(!is_dark_frame(&frame, 0.95));
    }
}

//! Draw face overlays onto a frame.

use crate::types::{FaceOverlay, FaceStatus};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

/// Box thickness in pixels.
const THICKNESS: i32 = 2;

pub fn status_color(status: FaceStatus) -> Rgb<u8> {
    match status {
        FaceStatus::Detected => Rgb([255, 255, 0]),
        FaceStatus::Spoof => Rgb([255, 0, 0]),
        FaceStatus::Unknown => Rgb([255, 140, 0]),
        FaceStatus::Recognized => Rgb([0, 200, 0]),
    }
}

/// Outline every face, coloured by status. Masked faces get an extra inner box.
pub fn annotate(frame: &mut RgbImage, overlays: &[FaceOverlay]) {
    for overlay in overlays {
        let Some(bbox) = overlay.bbox.clamp_to(frame.width(), frame.height()) else {
            continue;
        };
        let color = status_color(overlay.status);
        let rings = if overlay.masked { THICKNESS + 2 } else { THICKNESS };
        for inset in 0..rings {
            let w = bbox.width - 2 * inset;
            let h = bbox.height - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            if overlay.masked && inset == THICKNESS {
                // One-pixel gap between the status box and the mask marker.
                continue;
            }
            let rect = Rect::at(bbox.x + inset, bbox.y + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(frame, rect, color);
        }
    }
}

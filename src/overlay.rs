use crate::types::{Bbox, FrameStatus};
use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::sync::OnceLock;

const VIOLATION_COLOR: Rgb<u8> = Rgb([220, 40, 40]);
const OK_COLOR: Rgb<u8> = Rgb([40, 200, 80]);
const ZONE_COLOR: Rgb<u8> = Rgb([240, 200, 20]);

static FONT_BYTES: OnceLock<Option<Vec<u8>>> = OnceLock::new();

/// Loads a TrueType font from `path` for use by every subsequent overlay
/// draw call. Text rendering is skipped (boxes and lines still draw) if this
/// is never called or the path can't be read — overlays degrade gracefully
/// rather than failing a frame over a missing font file.
pub fn load_font(path: &str) {
    let _ = FONT_BYTES.set(std::fs::read(path).ok());
}

fn font() -> Option<FontRef<'static>> {
    FONT_BYTES.get().and_then(|b| b.as_ref()).and_then(|b| FontRef::try_from_slice(b).ok())
}

/// Draws one labelled box, colored red for a violation and green otherwise,
/// matching the status-panel color convention described for the overlay step.
pub fn draw_box(img: &mut RgbImage, bbox: Bbox, label: &str, violation: bool) {
    let color = if violation { VIOLATION_COLOR } else { OK_COLOR };
    let rect = to_rect(bbox, img.width(), img.height());
    if let Some(rect) = rect {
        draw_hollow_rect_mut(img, rect, color);
        if let Some(font) = font() {
            let scale = PxScale::from(16.0);
            draw_text_mut(img, color, rect.left().max(0), (rect.top() - 18).max(0), scale, &font, label);
        }
    }
}

/// Draws a hazard-zone polygon as a closed line loop.
pub fn draw_polygon(img: &mut RgbImage, polygon: &[(f32, f32)]) {
    if polygon.len() < 2 {
        return;
    }
    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];
        imageproc::drawing::draw_line_segment_mut(img, a, b, ZONE_COLOR);
    }
}

/// Draws the adaptive-color status panel: overall status, active reasons,
/// worker count, and instantaneous fps, anchored at the top-left corner.
pub fn draw_status_panel(img: &mut RgbImage, status: FrameStatus, reasons: &[String], worker_count: usize, fps: f64) {
    let color = match status {
        FrameStatus::Safe => OK_COLOR,
        FrameStatus::Unsafe => VIOLATION_COLOR,
    };
    let Some(font) = font() else { return };

    let status_text = match status {
        FrameStatus::Safe => "SAFE",
        FrameStatus::Unsafe => "UNSAFE",
    };
    draw_text_mut(img, color, 8, 8, PxScale::from(20.0), &font, status_text);

    let info = format!("workers: {worker_count}  fps: {fps:.1}");
    draw_text_mut(img, Rgb([230, 230, 230]), 8, 32, PxScale::from(16.0), &font, &info);

    let mut y = 52;
    for reason in reasons {
        draw_text_mut(img, VIOLATION_COLOR, 8, y, PxScale::from(14.0), &font, reason);
        y += 18;
    }
}

fn to_rect(bbox: Bbox, img_w: u32, img_h: u32) -> Option<Rect> {
    let x1 = bbox.x1.max(0.0).min(img_w as f32) as i32;
    let y1 = bbox.y1.max(0.0).min(img_h as f32) as i32;
    let w = bbox.width().round() as u32;
    let h = bbox.height().round() as u32;
    if w == 0 || h == 0 {
        return None;
    }
    Some(Rect::at(x1, y1).of_size(w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_box_does_not_panic_on_degenerate_bbox() {
        let mut img = RgbImage::new(100, 100);
        draw_box(&mut img, Bbox { x1: 0.0, y1: 0.0, x2: 0.0, y2: 0.0 }, "x", true);
    }

    #[test]
    fn status_panel_renders_without_panic() {
        let mut img = RgbImage::new(200, 200);
        draw_status_panel(&mut img, FrameStatus::Unsafe, &["missing_helmet".to_string()], 3, 24.7);
    }
}

//! Renders the published frame: calibration line plus labelled track boxes,
//! JPEG-encoded.

use crate::frame::{BoundingBox, Frame};
use crate::tracking::{estimate_speed_kmh, Track};
use ab_glyph::{FontArc, PxScale};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageError, Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::{info, warn};

const LINE_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const CROSSED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const LABEL_SCALE: f32 = 14.0;

/// Load the TTF used for box labels. Without one, boxes are drawn unlabelled.
pub fn load_label_font(path: &Path) -> Option<FontArc> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "label font not readable, boxes will be unlabelled");
            return None;
        }
    };
    match FontArc::try_from_vec(bytes) {
        Ok(font) => {
            info!(path = %path.display(), "label font loaded");
            Some(font)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid label font, boxes will be unlabelled");
            None
        }
    }
}

/// What the annotator needs to know about one live track.
#[derive(Debug, Clone)]
pub struct TrackOverlay {
    pub track_id: u64,
    pub bbox: BoundingBox,
    pub label: String,
    pub speed_kmh: Option<f64>,
    pub crossed: bool,
}

impl TrackOverlay {
    pub fn new(track: &Track, meters_per_pixel: f64) -> Self {
        let speed_kmh = match (track.previous_position(), track.last_position()) {
            (Some(prev), Some(curr)) => estimate_speed_kmh(prev, curr, meters_per_pixel),
            _ => None,
        };
        Self {
            track_id: track.track_id,
            bbox: track.bbox,
            label: track.class_label().to_string(),
            speed_kmh,
            crossed: track.has_crossed(),
        }
    }

    /// "ID class speed", e.g. `7 car 42km/h`
    pub fn caption(&self) -> String {
        match self.speed_kmh {
            Some(speed) => format!("{} {} {:.0}km/h", self.track_id, self.label, speed),
            None => format!("{} {}", self.track_id, self.label),
        }
    }
}

fn class_color(label: &str) -> Rgb<u8> {
    match label {
        "car" => Rgb([0, 128, 255]),
        "motorcycle" => Rgb([255, 0, 255]),
        "bus" => Rgb([255, 128, 0]),
        "truck" => Rgb([255, 0, 0]),
        _ => Rgb([200, 200, 200]),
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
        encoder.encode_image(image)?;
    }
    Ok(buf)
}

/// Draw the overlay on a copy of the frame and encode it.
///
/// Blocking; the worker calls it through `spawn_blocking`.
pub fn annotate(
    frame: &Frame,
    line_position: f64,
    overlays: &[TrackOverlay],
    font: Option<&FontArc>,
    quality: u8,
) -> Result<Bytes, ImageError> {
    let mut canvas: RgbImage = (*frame.image).clone();
    let (width, height) = canvas.dimensions();

    if width > 0 && height > 0 {
        let line_y = (line_position * height as f64).min((height - 1) as f64) as f32;
        for offset in 0..2 {
            let y = (line_y + offset as f32).min((height - 1) as f32);
            draw_line_segment_mut(&mut canvas, (0.0, y), ((width - 1) as f32, y), LINE_COLOR);
        }

        for overlay in overlays {
            if let Some(rect) = clip_rect(&overlay.bbox, width, height) {
                let color = if overlay.crossed {
                    CROSSED_COLOR
                } else {
                    class_color(&overlay.label)
                };
                draw_hollow_rect_mut(&mut canvas, rect, color);
                if let Some(font) = font {
                    draw_caption(&mut canvas, font, &rect, &overlay.caption(), color);
                }
            }
        }
    }

    Ok(Bytes::from(encode_jpeg(&canvas, quality)?))
}

/// Caption on a filled strip just above the box, or inside it at the top edge
fn draw_caption(canvas: &mut RgbImage, font: &FontArc, rect: &Rect, caption: &str, color: Rgb<u8>) {
    let scale = PxScale::from(LABEL_SCALE);
    let (text_w, text_h) = text_size(scale, font, caption);
    if text_w == 0 || text_h == 0 {
        return;
    }
    let strip_h = text_h + 2;
    let top = (rect.top() - strip_h as i32).max(0);
    draw_filled_rect_mut(canvas, Rect::at(rect.left(), top).of_size(text_w + 4, strip_h), color);
    draw_text_mut(canvas, TEXT_COLOR, rect.left() + 2, top + 1, scale, font, caption);
}

/// Clamp a box to the image; `None` when nothing of it is visible.
fn clip_rect(bbox: &BoundingBox, width: u32, height: u32) -> Option<Rect> {
    if !bbox.is_finite() {
        return None;
    }
    let x0 = bbox.x.max(0.0);
    let y0 = bbox.y.max(0.0);
    let x1 = (bbox.x + bbox.width).min(width as f32);
    let y1 = (bbox.y + bbox.height).min(height as f32);
    if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
        return None;
    }
    Some(Rect::at(x0 as i32, y0 as i32).of_size((x1 - x0) as u32, (y1 - y0) as u32))
}

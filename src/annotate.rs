//! Snapshot annotation: class-coloured boxes with a confidence label.
//!
//! Colours are a pure function of the class name so every worker draws the
//! same class in the same colour without shared state. Labels sit above the
//! box and drop below it when they would be clipped at the top edge.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use sha2::{Digest, Sha256};

use crate::detect::{BoundingBox, Detection};

const BOX_THICKNESS: i32 = 2;
const LABEL_GAP: i32 = 5;
const LABEL_PADDING: i32 = 2;
const DEFAULT_LABEL_SCALE: f32 = 16.0;
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// Stable colour for a class name.
pub fn class_color(class_name: &str) -> Rgb<u8> {
    match class_name {
        "person" => Rgb([0, 255, 0]),
        "cat" => Rgb([255, 0, 0]),
        "dog" => Rgb([0, 0, 255]),
        "bird" => Rgb([0, 255, 255]),
        "bear" => Rgb([128, 128, 0]),
        "car" | "truck" | "bus" => Rgb([255, 255, 0]),
        "motorcycle" | "bicycle" => Rgb([255, 0, 255]),
        "chair" => Rgb([128, 0, 128]),
        "book" => Rgb([0, 128, 255]),
        other => {
            let digest = Sha256::digest(other.as_bytes());
            let seed = u16::from_be_bytes([digest[0], digest[1]]);
            let hue = (seed as f32 * 137.508) % 360.0;
            let (r, g, b) = hsv_to_rgb(hue, 0.8, 0.9);
            Rgb([r, g, b])
        }
    }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}

/// `"{class} {pct}%"`, percentage truncated.
pub fn format_label(detection: &Detection) -> String {
    format!("{} {}%", detection.class_name, detection.confidence_pct())
}

/// Label background rectangle in frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LabelPlacement {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub above_box: bool,
}

impl LabelPlacement {
    /// Top-left corner for the text inside the background.
    pub fn text_origin(&self) -> (i32, i32) {
        (self.x + LABEL_PADDING, self.y + LABEL_PADDING)
    }
}

/// Place a `text_width` x `text_height` label for `bbox`.
pub fn place_label(
    bbox: &BoundingBox,
    text_width: u32,
    text_height: u32,
    frame_width: u32,
) -> LabelPlacement {
    let width = text_width + 2 * LABEL_PADDING as u32;
    let height = text_height + 2 * LABEL_PADDING as u32;

    let box_top = bbox.y.round() as i32;
    let box_bottom = bbox.bottom().round() as i32;
    let above_top = box_top - LABEL_GAP - text_height as i32 - LABEL_PADDING;
    let (y, above_box) = if above_top < 0 {
        (box_bottom + LABEL_GAP - LABEL_PADDING, false)
    } else {
        (above_top, true)
    };

    let max_x = (frame_width as i32 - width as i32).max(0);
    let x = (bbox.x.round() as i32).clamp(0, max_x);

    LabelPlacement {
        x,
        y,
        width,
        height,
        above_box,
    }
}

/// Draws detections onto copies of frames.
pub struct Annotator {
    font: Option<FontVec>,
    scale: PxScale,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

impl Annotator {
    /// Boxes and label backgrounds only; no glyphs are rendered.
    pub fn new() -> Self {
        Self {
            font: None,
            scale: PxScale::from(DEFAULT_LABEL_SCALE),
        }
    }

    pub fn with_font(font: FontVec) -> Self {
        Self {
            font: Some(font),
            scale: PxScale::from(DEFAULT_LABEL_SCALE),
        }
    }

    /// Load a TrueType/OpenType font for label text.
    pub fn with_font_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read label font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| anyhow!("invalid label font {}: {}", path.display(), e))?;
        Ok(Self::with_font(font))
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.scale = PxScale::from(scale.max(1.0));
        self
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    fn text_dimensions(&self, text: &str) -> (u32, u32) {
        match &self.font {
            Some(font) => text_size(self.scale, font, text),
            None => {
                let glyph_width = self.scale.x * 0.6;
                (
                    (glyph_width * text.chars().count() as f32).ceil() as u32,
                    self.scale.y.ceil() as u32,
                )
            }
        }
    }

    /// Annotated copy of `image`. The input is never modified.
    pub fn annotate(&self, image: &RgbImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = image.clone();
        for det in detections {
            self.draw_detection(&mut canvas, det);
        }
        canvas
    }

    fn draw_detection(&self, canvas: &mut RgbImage, det: &Detection) {
        let color = class_color(&det.class_name);
        let bbox = &det.bounding_box;

        let x = bbox.x.round() as i32;
        let y = bbox.y.round() as i32;
        let w = bbox.width.round().max(1.0) as i32;
        let h = bbox.height.round().max(1.0) as i32;
        for inset in 0..BOX_THICKNESS {
            let iw = (w - 2 * inset).max(1) as u32;
            let ih = (h - 2 * inset).max(1) as u32;
            draw_hollow_rect_mut(canvas, Rect::at(x + inset, y + inset).of_size(iw, ih), color);
        }

        let label = format_label(det);
        let (text_w, text_h) = self.text_dimensions(&label);
        let placement = place_label(bbox, text_w, text_h, canvas.width());
        draw_filled_rect_mut(
            canvas,
            Rect::at(placement.x, placement.y).of_size(placement.width, placement.height),
            color,
        );
        if let Some(font) = &self.font {
            let (tx, ty) = placement.text_origin();
            draw_text_mut(canvas, TEXT_COLOR, tx, ty, self.scale, font, &label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colours_are_stable_per_class() {
        assert_eq!(class_color("person"), Rgb([0, 255, 0]));
        assert_eq!(class_color("car"), class_color("bus"));
        assert_eq!(class_color("forklift"), class_color("forklift"));
        assert_ne!(class_color("forklift"), Rgb([255, 255, 255]));
    }

    #[test]
    fn label_format_truncates_percentage() {
        let det = Detection::new("car", 0.876, BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(format_label(&det), "car 87%");
    }

    #[test]
    fn label_goes_above_box_when_room() {
        let bbox = BoundingBox::new(100.0, 100.0, 50.0, 50.0);
        let placement = place_label(&bbox, 40, 16, 640);
        assert!(placement.above_box);
        assert_eq!(placement.y, 100 - 5 - 16 - 2);
        assert_eq!(placement.height, 20);
        assert!(placement.y + placement.height as i32 <= 100);
    }

    #[test]
    fn label_drops_below_box_at_top_edge() {
        let bbox = BoundingBox::new(100.0, 10.0, 50.0, 50.0);
        let placement = place_label(&bbox, 40, 16, 640);
        assert!(!placement.above_box);
        assert!(placement.y >= 60);
    }

    #[test]
    fn label_is_kept_inside_right_edge() {
        let bbox = BoundingBox::new(620.0, 100.0, 20.0, 20.0);
        let placement = place_label(&bbox, 60, 16, 640);
        assert_eq!(placement.x + placement.width as i32, 640);
    }

    #[test]
    fn annotate_leaves_source_untouched() {
        let source = RgbImage::new(200, 200);
        let det = Detection::new("person", 0.9, BoundingBox::new(50.0, 60.0, 40.0, 80.0));

        let annotated = Annotator::new().annotate(&source, &[det]);

        assert_eq!(source.get_pixel(50, 60), &Rgb([0, 0, 0]));
        assert_eq!(annotated.get_pixel(50, 60), &Rgb([0, 255, 0]));
        assert_eq!(annotated.get_pixel(51, 61), &Rgb([0, 255, 0]));
        // Interior untouched.
        assert_eq!(annotated.get_pixel(70, 100), &Rgb([0, 0, 0]));
    }

    #[test]
    fn missing_font_file_is_an_error() {
        assert!(Annotator::with_font_file(Path::new("/nonexistent/font.ttf")).is_err());
    }
}

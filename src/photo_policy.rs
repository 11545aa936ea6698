// SPDX-License-Identifier: GPL-3.0-only

//! Decides when a processed frame becomes a persisted detection artifact,
//! and renders the annotated image written to disk (§4.4).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use chrono::Local;
use image::RgbImage;
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use rusttype::{point, Font, Scale};

use crate::constants::{class_color_bgr, PHOTO_THROTTLE_SECS};
use crate::tracker::{format_stationary_duration, Detection};

/// Tracks what was saved last, so the next frame's decision can detect
/// "new type"/"new instance" changes (§3, §4.4).
#[derive(Debug, Default)]
pub struct SavedPhotoState {
    last_save_time: Option<Instant>,
    last_saved_counts: BTreeMap<String, usize>,
}

/// Why a given frame was (or wasn't) saved; useful for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveReason {
    NewType,
    NewInstance,
    NewTracker,
    ThrottleElapsed,
}

/// Evaluates the decision rule from §4.4, in order, first match wins.
pub fn decide(
    detections: &[Detection],
    any_new_tracker_this_frame: bool,
    state: &SavedPhotoState,
    now: Instant,
) -> Option<SaveReason> {
    let mut current_counts: BTreeMap<String, usize> = BTreeMap::new();
    for d in detections {
        *current_counts.entry(d.class_label.clone()).or_insert(0) += 1;
    }

    for (class, _) in current_counts.iter() {
        if !state.last_saved_counts.contains_key(class) {
            return Some(SaveReason::NewType);
        }
    }
    for (class, count) in current_counts.iter() {
        if let Some(prev) = state.last_saved_counts.get(class) {
            if count > prev {
                return Some(SaveReason::NewInstance);
            }
        }
    }
    if any_new_tracker_this_frame {
        return Some(SaveReason::NewTracker);
    }
    match state.last_save_time {
        None => Some(SaveReason::ThrottleElapsed),
        Some(last) => {
            if now.saturating_duration_since(last).as_secs() >= PHOTO_THROTTLE_SECS {
                Some(SaveReason::ThrottleElapsed)
            } else {
                None
            }
        }
    }
}

impl SavedPhotoState {
    pub fn record_save(&mut self, detections: &[Detection], now: Instant) {
        self.last_save_time = Some(now);
        self.last_saved_counts.clear();
        for d in detections {
            *self
                .last_saved_counts
                .entry(d.class_label.clone())
                .or_insert(0) += 1;
        }
    }
}

/// Renders one rectangle + label per detection onto a clone of `image`,
/// returning the annotated image. Label placement and color follow §4.4's
/// table; stationary detections get a duration suffix.
pub fn annotate(image: &RgbImage, detections: &[Detection], font: &Font<'static>) -> RgbImage {
    let mut out = image.clone();
    for det in detections {
        let color_bgr = class_color_bgr(&det.class_label);
        // The color table is BGR-ordered (matching the OpenCV convention it
        // was carried over from); this renderer works in RGB, so the
        // channels are swapped once here rather than re-deriving the table.
        let color = image::Rgb([color_bgr[2], color_bgr[1], color_bgr[0]]);

        let (x, y, w, h) = (
            det.x.max(0.0).round() as i32,
            det.y.max(0.0).round() as i32,
            det.w.round().max(1.0) as u32,
            det.h.round().max(1.0) as u32,
        );
        draw_hollow_rect_mut(&mut out, Rect::at(x, y).of_size(w.max(1), h.max(1)), color);

        let mut label = format!("{} ({}%)", det.class_label, (det.confidence * 100.0).round() as i64);
        if det.is_stationary {
            let dur = format_stationary_duration(std::time::Duration::from_secs(
                det.stationary_duration_seconds,
            ));
            label.push_str(&format!(", stationary {dur}"));
        }

        draw_label(&mut out, &label, x, y, out.height(), color, font);
    }
    out
}

const LABEL_SCALE: f32 = 16.0;
const LABEL_PAD: i32 = 3;

fn draw_label(
    image: &mut RgbImage,
    text: &str,
    box_x: i32,
    box_y: i32,
    image_height: u32,
    color: image::Rgb<u8>,
    font: &Font<'static>,
) {
    let scale = Scale::uniform(LABEL_SCALE);
    let v_metrics = font.v_metrics(scale);
    let line_height = (v_metrics.ascent - v_metrics.descent).ceil() as i32;

    // Place above the box unless that would clip the frame top, per §4.4.
    let above_y = box_y - line_height - 2 * LABEL_PAD;
    let label_y = if above_y < 0 { box_y + 2 } else { above_y };

    let glyphs: Vec<_> = font
        .layout(text, scale, point(0.0, v_metrics.ascent))
        .collect();
    let text_width = glyphs
        .iter()
        .rev()
        .find_map(|g| g.pixel_bounding_box().map(|bb| bb.max.x))
        .unwrap_or(0)
        .max(1) as u32
        + (2 * LABEL_PAD) as u32;

    let bg_rect = Rect::at(box_x, label_y).of_size(text_width, (line_height + 2 * LABEL_PAD) as u32);
    draw_filled_rect_mut(image, bg_rect, color);

    let text_color = image::Rgb([0u8, 0u8, 0u8]);
    for glyph in font.layout(
        text,
        scale,
        point(
            (box_x + LABEL_PAD) as f32,
            (label_y + LABEL_PAD) as f32 + v_metrics.ascent,
        ),
    ) {
        if let Some(bb) = glyph.pixel_bounding_box() {
            glyph.draw(|gx, gy, coverage| {
                let px = bb.min.x + gx as i32;
                let py = bb.min.y + gy as i32;
                if px < 0 || py < 0 || px as u32 >= image.width() || py as u32 >= image_height {
                    return;
                }
                if coverage < 0.05 {
                    return;
                }
                let existing = image.get_pixel(px as u32, py as u32);
                let blended = blend(existing.0, text_color.0, coverage);
                image.put_pixel(px as u32, py as u32, image::Rgb(blended));
            });
        }
    }
}

fn blend(under: [u8; 3], over: [u8; 3], alpha: f32) -> [u8; 3] {
    let a = alpha.clamp(0.0, 1.0);
    [
        (under[0] as f32 * (1.0 - a) + over[0] as f32 * a).round() as u8,
        (under[1] as f32 * (1.0 - a) + over[1] as f32 * a).round() as u8,
        (under[2] as f32 * (1.0 - a) + over[2] as f32 * a).round() as u8,
    ]
}

/// Builds the photo filename(s) per §4.4's template. Returns one path when
/// not in night mode, two when it is (original-annotated + night-enhanced).
pub fn filenames(output_dir: &Path, detections: &[Detection], at: SystemTime, night_mode: bool) -> Vec<PathBuf> {
    let mut classes: Vec<&str> = detections.iter().map(|d| d.class_label.as_str()).collect();
    classes.sort_unstable();
    classes.dedup();
    let class_part = classes.join(" ");

    let datetime: chrono::DateTime<Local> = at.into();
    let stamp = datetime.format("%Y-%m-%d %H%M%S");

    let base = format!("{stamp} {class_part} detected.jpg");
    let mut paths = vec![output_dir.join(base)];
    if night_mode {
        let night = format!("{stamp} {class_part} detected night-enhanced.jpg");
        paths.push(output_dir.join(night));
    }
    paths
}

/// Loads the embedded FiraCode font used for on-image labels. Never fails:
/// the bytes are compiled in.
pub fn load_label_font() -> Font<'static> {
    Font::try_from_bytes(ttf_firacode::REGULAR).expect("embedded font bytes are always valid")
}

/// Draws the stream server's statistics panel (FPS, uptime, class counts)
/// as stacked lines in the top-left corner (§4.5). Separate from
/// `draw_label` since it isn't anchored to a detection box: white text on a
/// solid black strip per line rather than a class-colored background.
pub fn overlay_stats(image: &RgbImage, lines: &[String], font: &Font<'static>) -> RgbImage {
    let mut out = image.clone();
    let scale = Scale::uniform(LABEL_SCALE);
    let v_metrics = font.v_metrics(scale);
    let line_height = (v_metrics.ascent - v_metrics.descent).ceil() as i32 + 2 * LABEL_PAD;

    let mut y = 4;
    for line in lines {
        draw_stats_line(&mut out, line, 4, y, font, &v_metrics, scale);
        y += line_height + 2;
    }
    out
}

fn draw_stats_line(
    image: &mut RgbImage,
    text: &str,
    x: i32,
    y: i32,
    font: &Font<'static>,
    v_metrics: &rusttype::VMetrics,
    scale: Scale,
) {
    let glyphs: Vec<_> = font
        .layout(text, scale, point((x + LABEL_PAD) as f32, y as f32 + v_metrics.ascent))
        .collect();
    let width = glyphs
        .iter()
        .rev()
        .find_map(|g| g.pixel_bounding_box().map(|bb| bb.max.x))
        .unwrap_or(0)
        .max(1) as u32
        + (2 * LABEL_PAD) as u32;
    let line_height = (v_metrics.ascent - v_metrics.descent).ceil() as i32;

    let bg_rect = Rect::at(x, y).of_size(width, (line_height + 2 * LABEL_PAD) as u32);
    draw_filled_rect_mut(image, bg_rect, image::Rgb([0u8, 0u8, 0u8]));

    for glyph in glyphs {
        if let Some(bb) = glyph.pixel_bounding_box() {
            glyph.draw(|gx, gy, coverage| {
                let px = bb.min.x + gx as i32;
                let py = bb.min.y + gy as i32;
                if px < 0 || py < 0 || px as u32 >= image.width() || py as u32 >= image.height() {
                    return;
                }
                if coverage < 0.05 {
                    return;
                }
                let existing = image.get_pixel(px as u32, py as u32);
                let blended = blend(existing.0, [255u8, 255u8, 255u8], coverage);
                image.put_pixel(px as u32, py as u32, image::Rgb(blended));
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_label: &str) -> Detection {
        Detection {
            class_label: class_label.to_string(),
            class_id: 0,
            confidence: 0.91,
            x: 10.0,
            y: 10.0,
            w: 20.0,
            h: 20.0,
            is_stationary: true,
            stationary_duration_seconds: 120,
        }
    }

    #[test]
    fn stationary_label_formatting_is_exact() {
        let d = det("car");
        let label = format!(
            "{} ({}%), stationary {}",
            d.class_label,
            (d.confidence * 100.0).round() as i64,
            format_stationary_duration(std::time::Duration::from_secs(d.stationary_duration_seconds))
        );
        assert_eq!(label, "car (91%), stationary for 2 min");
    }

    #[test]
    fn no_decision_condition_and_under_throttle_skips() {
        let mut state = SavedPhotoState::default();
        let now = Instant::now();
        state.record_save(&[det("person")], now);
        let decision = decide(&[det("person")], false, &state, now);
        assert_eq!(decision, None);
    }

    #[test]
    fn new_type_triggers_save() {
        let state = SavedPhotoState::default();
        let decision = decide(&[det("person")], false, &state, Instant::now());
        assert_eq!(decision, Some(SaveReason::NewType));
    }

    #[test]
    fn new_instance_triggers_save() {
        let mut state = SavedPhotoState::default();
        let now = Instant::now();
        state.record_save(&[det("person")], now);
        let decision = decide(&[det("person"), det("person")], false, &state, now);
        assert_eq!(decision, Some(SaveReason::NewInstance));
    }

    #[test]
    fn overlay_stats_does_not_panic_and_preserves_dimensions() {
        let image = RgbImage::new(64, 64);
        let font = load_label_font();
        let lines = vec!["FPS: 12.3".to_string(), "Uptime: 1m 2s".to_string()];
        let out = overlay_stats(&image, &lines, &font);
        assert_eq!(out.dimensions(), image.dimensions());
    }

    #[test]
    fn filenames_include_night_enhanced_variant_only_in_night_mode() {
        let dir = Path::new("/tmp/detections");
        let at = SystemTime::now();
        let day = filenames(dir, &[det("person")], at, false);
        let night = filenames(dir, &[det("person")], at, true);
        assert_eq!(day.len(), 1);
        assert_eq!(night.len(), 2);
        assert!(night[1].to_string_lossy().contains("night-enhanced"));
    }
}

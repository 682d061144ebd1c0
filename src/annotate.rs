// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Frame annotation: drawing action labels onto frames.
//!
//! Matched persons get a thick red box and a "MATCH FOUND" label, everyone
//! else a green box and a "Person N" label anchored above it. When no
//! TrueType font is available the annotator degrades to colored marker bars
//! at the label anchors, so headless runs and tests never depend on fonts;
//! boxes are drawn either way.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::results::PersonAction;
use crate::{verbose, warn};

/// Assets URL for downloading fonts
const ASSETS_URL: &str = "https://github.com/ultralytics/assets/releases/download/v0.0.0";

/// Label color for persons matching the search query.
const MATCH_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Label color for everyone else.
const LABEL_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Text height in pixels.
const FONT_SCALE: f32 = 16.0;

/// Bounding box line thickness for unmatched persons.
const BOX_THICKNESS: i32 = 2;

/// Bounding box line thickness for search matches.
const MATCH_THICKNESS: i32 = 3;

/// Marker bar width per label character when no font is available.
const MARKER_GLYPH_WIDTH: u32 = 7;

/// Check if a font exists locally or download it.
pub fn check_font(font: &str) -> Option<PathBuf> {
    let font_name = Path::new(font).file_name()?.to_string_lossy();
    let config_dir = dirs::config_dir()?.join("Ultralytics");
    let font_path = config_dir.join(font_name.as_ref());

    if font_path.exists() {
        return Some(font_path);
    }

    if let Err(e) = fs::create_dir_all(&config_dir) {
        warn!("Failed to create config directory: {e}");
        return None;
    }

    let url = format!("{ASSETS_URL}/{font_name}");
    verbose!("Downloading {url} to {}", font_path.display());

    match ureq::get(&url).call() {
        Ok(response) => {
            let mut file = match File::create(&font_path) {
                Ok(f) => f,
                Err(e) => {
                    warn!("Failed to create font file: {e}");
                    return None;
                }
            };

            let mut reader = response.into_body().into_reader();
            if let Err(e) = io::copy(&mut reader, &mut file) {
                warn!("Failed to download font: {e}");
                let _ = fs::remove_file(&font_path);
                return None;
            }

            Some(font_path)
        }
        Err(e) => {
            warn!("Failed to download font from {url}: {e}");
            None
        }
    }
}

/// Draws action labels onto frames.
pub struct Annotator {
    font_data: Option<Vec<u8>>,
}

impl Annotator {
    /// Create an annotator, locating (or fetching) the label font.
    #[must_use]
    pub fn new() -> Self {
        let font_data = check_font("Arial.ttf").and_then(|path| fs::read(path).ok());
        Self { font_data }
    }

    /// Create an annotator that never draws text, only marker bars.
    #[must_use]
    pub const fn without_font() -> Self {
        Self { font_data: None }
    }

    /// Whether a usable font was found.
    #[must_use]
    pub const fn has_font(&self) -> bool {
        self.font_data.is_some()
    }

    /// Draw one label per person onto the frame, in place.
    pub fn annotate(&self, frame: &mut RgbImage, actions: &[PersonAction]) {
        let font = self
            .font_data
            .as_deref()
            .and_then(|data| FontRef::try_from_slice(data).ok());

        for action in actions {
            let (color, text) = if action.matched {
                (MATCH_COLOR, format!("MATCH FOUND: {}", action.label))
            } else {
                (
                    LABEL_COLOR,
                    format!("Person {}: {}", action.person + 1, action.label),
                )
            };
            if let Some(bounds) = action.bounds {
                let thickness = if action.matched { MATCH_THICKNESS } else { BOX_THICKNESS };
                draw_box(frame, bounds, color, thickness);
            }
            let (x, y) = anchor(frame, action);
            if let Some(ref f) = font {
                let scale = PxScale::from(FONT_SCALE);
                draw_text_mut(frame, color, x, y, scale, f, &text);
                if action.matched {
                    // Double-strike for emphasis, standing in for a heavier
                    // stroke weight.
                    draw_text_mut(frame, color, x + 1, y, scale, f, &text);
                }
            } else {
                draw_marker(frame, x, y, color, &text, action.matched);
            }
        }
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

/// Label anchor for a person: just above the box when there is room, below
/// it otherwise, or stacked in the top-left corner for boxless persons.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn anchor(frame: &RgbImage, action: &PersonAction) -> (i32, i32) {
    let (width, height) = frame.dimensions();
    let (width, height) = (width as i32, height as i32);

    if let Some([x1, y1, _, y2]) = action.bounds {
        let x = (x1.round() as i32).clamp(0, width - 1);
        let y1 = y1.round() as i32;
        let y2 = y2.round() as i32;
        let y = if y1 >= 10 { y1 - 10 } else { y2 + 5 };
        (x, y.clamp(0, height - 1))
    } else {
        let y = 20 + action.person as i32 * 20;
        (10.min(width - 1), y.clamp(0, height - 1))
    }
}

/// Hollow bounding box built from inset one-pixel rects, clamped to the
/// frame. Degenerate boxes draw nothing.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn draw_box(frame: &mut RgbImage, bounds: [f32; 4], color: Rgb<u8>, thickness: i32) {
    let (width, height) = frame.dimensions();
    let x1 = (bounds[0].round() as i32).clamp(0, width as i32 - 1);
    let y1 = (bounds[1].round() as i32).clamp(0, height as i32 - 1);
    let x2 = (bounds[2].round() as i32).clamp(0, width as i32 - 1);
    let y2 = (bounds[3].round() as i32).clamp(0, height as i32 - 1);

    for t in 0..thickness {
        let tx1 = (x1 + t).min(x2);
        let ty1 = (y1 + t).min(y2);
        let tx2 = (x2 - t).max(tx1);
        let ty2 = (y2 - t).max(ty1);
        if tx2 > tx1 && ty2 > ty1 {
            let rect = Rect::at(tx1, ty1).of_size((tx2 - tx1) as u32, (ty2 - ty1) as u32);
            draw_hollow_rect_mut(frame, rect, color);
        }
    }
}

/// Font-less fallback: a colored bar where the label would sit.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn draw_marker(frame: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>, text: &str, matched: bool) {
    let (width, height) = frame.dimensions();
    if x < 0 || y < 0 || x >= width as i32 || y >= height as i32 {
        return;
    }
    let bar = (text.len() as u32 * MARKER_GLYPH_WIDTH).min(width - x as u32);
    let tall: u32 = if matched { 6 } else { 4 };
    let tall = tall.min(height - y as u32);
    if bar == 0 || tall == 0 {
        return;
    }
    draw_filled_rect_mut(frame, Rect::at(x, y).of_size(bar, tall), color);
}

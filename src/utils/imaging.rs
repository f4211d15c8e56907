use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use image::{ImageFormat, Rgba, RgbaImage};
use std::borrow::Cow;
use std::io::Cursor;
use std::path::Path;

use crate::core::state::AspectRatio;

/// Brightness, contrast and saturation as percentages; 100 leaves a channel
/// untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSettings {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self { brightness: 100.0, contrast: 100.0, saturation: 100.0 }
    }
}

impl FilterSettings {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Bakes the filters into a copy of `image`. Default settings borrow the input
/// untouched.
pub fn apply_filters(image: &RgbaImage, settings: FilterSettings) -> Cow<'_, RgbaImage> {
    if settings.is_default() {
        return Cow::Borrowed(image);
    }

    let b = settings.brightness / 100.0;
    let c = settings.contrast / 100.0;
    let s = settings.saturation / 100.0;

    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let [r, g, bl, a] = pixel.0;
        let mut rgb = [r as f32, g as f32, bl as f32];
        for ch in rgb.iter_mut() {
            *ch = ((*ch * b) - 128.0) * c + 128.0;
        }
        let [r, g, bl] = saturate(rgb, s);
        *pixel = Rgba([clamp_channel(r), clamp_channel(g), clamp_channel(bl), a]);
    }
    Cow::Owned(out)
}

// CSS filter-effects saturate() matrix.
fn saturate([r, g, b]: [f32; 3], s: f32) -> [f32; 3] {
    [
        (0.213 + 0.787 * s) * r + (0.715 - 0.715 * s) * g + (0.072 - 0.072 * s) * b,
        (0.213 - 0.213 * s) * r + (0.715 + 0.285 * s) * g + (0.072 - 0.072 * s) * b,
        (0.213 - 0.213 * s) * r + (0.715 - 0.715 * s) * g + (0.072 + 0.928 * s) * b,
    ]
}

fn clamp_channel(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

pub fn decode_data_uri(data_uri: &str) -> Result<RgbaImage> {
    let payload = match data_uri.split_once(";base64,") {
        Some((_, payload)) => payload,
        None if data_uri.starts_with("data:") => {
            return Err(anyhow!("Unsupported data URI (not base64)"));
        }
        None => data_uri,
    };
    let bytes = general_purpose::STANDARD
        .decode(payload.trim())
        .context("Failed to decode base64 image payload")?;
    let image = image::load_from_memory(&bytes).context("Failed to decode image bytes")?;
    Ok(image.to_rgba8())
}

pub fn encode_png_data_uri(image: &RgbaImage) -> Result<String> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("Failed to encode PNG")?;
    Ok(format!("data:image/png;base64,{}", general_purpose::STANDARD.encode(&bytes)))
}

pub fn bytes_to_data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, general_purpose::STANDARD.encode(bytes))
}

/// Splits a data URI into its mime type and base64 payload.
pub fn split_data_uri(data_uri: &str) -> Option<(&str, &str)> {
    let rest = data_uri.strip_prefix("data:")?;
    rest.split_once(";base64,")
}

pub fn apply_filters_to_data_uri(data_uri: &str, settings: FilterSettings) -> Result<String> {
    if settings.is_default() {
        return Ok(data_uri.to_string());
    }
    let image = decode_data_uri(data_uri)?;
    let filtered = apply_filters(&image, settings);
    encode_png_data_uri(&filtered)
}

pub trait TextMeasure {
    /// Rendered width in pixels of `text` at `font_px`.
    fn measure(&self, text: &str, font_px: f32) -> f32;
}

pub trait TextPainter {
    fn draw(&self, image: &mut RgbaImage, text: &str, x: i32, y: i32, font_px: f32, color: Rgba<u8>);
}

/// Fixed advance per character; used when no font is configured.
#[derive(Debug, Clone, Copy)]
pub struct MonospaceMeasure {
    pub advance: f32,
}

impl Default for MonospaceMeasure {
    fn default() -> Self {
        Self { advance: 0.6 }
    }
}

impl TextMeasure for MonospaceMeasure {
    fn measure(&self, text: &str, font_px: f32) -> f32 {
        text.chars().count() as f32 * font_px * self.advance
    }
}

pub struct FontRenderer {
    font: FontVec,
}

impl FontRenderer {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let font = FontVec::try_from_vec(bytes).map_err(|e| anyhow!("Invalid font data: {}", e))?;
        Ok(Self { font })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read font {:?}", path))?;
        Self::from_bytes(bytes)
    }
}

impl TextMeasure for FontRenderer {
    fn measure(&self, text: &str, font_px: f32) -> f32 {
        let scaled = self.font.as_scaled(PxScale::from(font_px));
        let mut width = 0.0;
        let mut previous = None;
        for c in text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(prev) = previous {
                width += scaled.kern(prev, id);
            }
            width += scaled.h_advance(id);
            previous = Some(id);
        }
        width
    }
}

impl TextPainter for FontRenderer {
    fn draw(&self, image: &mut RgbaImage, text: &str, x: i32, y: i32, font_px: f32, color: Rgba<u8>) {
        imageproc::drawing::draw_text_mut(image, color, x, y, PxScale::from(font_px), &self.font, text);
    }
}

/// Greedy word wrap: words are packed onto a line until the next one would
/// push its measured width past `max_width`. A word wider than `max_width`
/// gets a line to itself.
pub fn wrap_words(text: &str, max_width: f32, font_px: f32, measure: &dyn TextMeasure) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }
        let candidate = format!("{} {}", current, word);
        if measure.measure(&candidate, font_px) > max_width {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

const SCRIM_VERTICAL: f32 = 0.45;
const SCRIM_HORIZONTAL: f32 = 0.35;
const SCRIM_MAX_ALPHA: f32 = 0.85;
const LINE_SPACING: f32 = 1.25;

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub font_px: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayPlan {
    pub scrim_top: u32,
    pub max_text_width: f32,
    pub title: Vec<PlacedLine>,
    pub summary: Vec<PlacedLine>,
}

pub fn plan_overlay(
    width: u32,
    height: u32,
    title: &str,
    summary: &str,
    aspect: AspectRatio,
    measure: &dyn TextMeasure,
) -> OverlayPlan {
    let w = width as f32;
    let h = height as f32;
    let short_side = w.min(h);
    let padding = (w * 0.05).round();
    let title_px = (short_side * 0.05).max(8.0);
    let summary_px = (short_side * 0.03).max(6.0);
    let max_text_width = (w - 2.0 * padding).max(1.0);

    let title_lines = wrap_words(title, max_text_width, title_px, measure);
    let summary_lines = wrap_words(summary, max_text_width, summary_px, measure);

    let gap = if title_lines.is_empty() || summary_lines.is_empty() { 0.0 } else { summary_px * 0.5 };
    let block_height = title_lines.len() as f32 * title_px * LINE_SPACING
        + gap
        + summary_lines.len() as f32 * summary_px * LINE_SPACING;

    let mut y = (h - padding - block_height).max(0.0);
    let ratio = if aspect.is_vertical() { SCRIM_VERTICAL } else { SCRIM_HORIZONTAL };
    let scrim_top = (h * (1.0 - ratio)).round().min(y - padding).max(0.0) as u32;

    let title = place_lines(title_lines, padding, &mut y, title_px);
    y += gap;
    let summary = place_lines(summary_lines, padding, &mut y, summary_px);

    OverlayPlan { scrim_top, max_text_width, title, summary }
}

fn place_lines(lines: Vec<String>, x: f32, y: &mut f32, font_px: f32) -> Vec<PlacedLine> {
    lines
        .into_iter()
        .map(|text| {
            let line = PlacedLine { text, x: x as i32, y: y.round() as i32, font_px };
            *y += font_px * LINE_SPACING;
            line
        })
        .collect()
}

/// Darkens the image from `top` to the bottom edge with a linear gradient.
pub fn apply_scrim(image: &mut RgbaImage, top: u32) {
    let height = image.height();
    if top >= height {
        return;
    }
    let span = (height - top) as f32;
    for y in top..height {
        let alpha = SCRIM_MAX_ALPHA * (y - top) as f32 / span;
        for x in 0..image.width() {
            let pixel = image.get_pixel_mut(x, y);
            for ch in pixel.0.iter_mut().take(3) {
                *ch = clamp_channel(*ch as f32 * (1.0 - alpha));
            }
        }
    }
}

/// Draws a titled caption over the bottom of `image` on a gradient scrim.
pub fn overlay_text<R>(image: &RgbaImage, title: &str, summary: &str, aspect: AspectRatio, renderer: &R) -> RgbaImage
where
    R: TextMeasure + TextPainter,
{
    let plan = plan_overlay(image.width(), image.height(), title, summary, aspect, renderer);
    let mut out = image.clone();
    apply_scrim(&mut out, plan.scrim_top);

    let white = Rgba([255, 255, 255, 255]);
    let soft = Rgba([225, 225, 225, 255]);
    for line in &plan.title {
        renderer.draw(&mut out, &line.text, line.x, line.y, line.font_px, white);
    }
    for line in &plan.summary {
        renderer.draw(&mut out, &line.text, line.x, line.y, line.font_px, soft);
    }
    out
}

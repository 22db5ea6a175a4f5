//! Pixel-level drawing onto RGBA frames.

use std::collections::HashMap;
use std::sync::Arc;

use fontdue::layout::{
    CoordinateSystem, GlyphRasterConfig, HorizontalAlign, Layout, LayoutSettings, TextStyle,
    VerticalAlign, WrapStyle,
};
use fontdue::Font;
use subforge_common::error::SubforgeResult;
use subforge_cue_model::{FontSpec, Rgba, StrokeStyle};

use super::fonts::FontLibrary;
use super::layer::{Rect, TextPaint};
use crate::codec::VideoFrame;

/// Line box height as a multiple of the font size.
pub const LINE_HEIGHT_FACTOR: f32 = 1.2;

/// Glyph bitmaps kept before the cache starts over.
const MAX_CACHED_GLYPHS: usize = 4096;

/// Snap a pixel size to half-pixel steps so animated sizes reuse bitmaps.
pub fn quantize_size(px: f32) -> f32 {
    (px * 2.0).round() / 2.0
}

/// Text measurement and drawing.
pub trait TextRasterizer: Send {
    /// Advance width of `text` on one line.
    fn measure(&mut self, font: &FontSpec, text: &str) -> SubforgeResult<f32>;

    /// Draw one line of text whose line box starts at (x, y).
    fn draw_text(
        &mut self,
        frame: &mut VideoFrame,
        x: f32,
        y: f32,
        text: &str,
        paint: &TextPaint,
    ) -> SubforgeResult<()>;
}

#[derive(Debug, Clone)]
struct GlyphBitmap {
    width: usize,
    height: usize,
    bitmap: Vec<u8>,
}

/// Rasterized glyphs keyed by glyph, size and font; cleared when full.
#[derive(Debug)]
struct GlyphCache {
    bitmaps: HashMap<GlyphRasterConfig, GlyphBitmap>,
    capacity: usize,
}

impl GlyphCache {
    fn new(capacity: usize) -> Self {
        Self {
            bitmaps: HashMap::new(),
            capacity,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.bitmaps.len()
    }

    fn get_or_insert_with(
        &mut self,
        key: GlyphRasterConfig,
        rasterize: impl FnOnce() -> GlyphBitmap,
    ) -> &GlyphBitmap {
        if self.bitmaps.len() >= self.capacity && !self.bitmaps.contains_key(&key) {
            tracing::debug!(entries = self.bitmaps.len(), "Glyph cache full, clearing");
            self.bitmaps.clear();
        }
        self.bitmaps.entry(key).or_insert_with(rasterize)
    }
}

/// `fontdue` rasterizer backed by a [`FontLibrary`].
pub struct FontdueRasterizer {
    library: Arc<FontLibrary>,
    fonts: HashMap<(String, u16), Arc<Font>>,
    glyph_cache: GlyphCache,
    layout: Layout,
}

impl FontdueRasterizer {
    pub fn new(library: Arc<FontLibrary>) -> Self {
        Self {
            library,
            fonts: HashMap::new(),
            glyph_cache: GlyphCache::new(MAX_CACHED_GLYPHS),
            layout: Layout::new(CoordinateSystem::PositiveYDown),
        }
    }

    /// Load `family` at `weight` now so later draws cannot fail on it.
    pub fn preload(&mut self, family: &str, weight: u16) -> SubforgeResult<()> {
        self.font(family, weight).map(|_| ())
    }

    fn font(&mut self, family: &str, weight: u16) -> SubforgeResult<Arc<Font>> {
        let key = (family.to_string(), weight);
        if let Some(font) = self.fonts.get(&key) {
            return Ok(font.clone());
        }
        let font = Arc::new(self.library.load(family, weight)?);
        self.fonts.insert(key, font.clone());
        Ok(font)
    }

    fn blit_run(
        &mut self,
        frame: &mut VideoFrame,
        font: &Font,
        x: f32,
        y: f32,
        color: Rgba,
    ) {
        for glyph in self.layout.glyphs() {
            if glyph.width == 0 || glyph.height == 0 {
                continue;
            }
            let bitmap = self.glyph_cache.get_or_insert_with(glyph.key, || {
                let (_, bitmap) = font.rasterize_config(glyph.key);
                GlyphBitmap {
                    width: glyph.width,
                    height: glyph.height,
                    bitmap,
                }
            });
            blend_glyph(
                frame,
                (glyph.x + x).round() as i32,
                (glyph.y + y).round() as i32,
                bitmap,
                color,
            );
        }
    }
}

impl TextRasterizer for FontdueRasterizer {
    fn measure(&mut self, font: &FontSpec, text: &str) -> SubforgeResult<f32> {
        let face = self.font(&font.family, font.weight)?;
        let mut width = 0.0;
        let mut previous: Option<char> = None;
        for ch in text.chars() {
            if let Some(prev) = previous {
                width += face.horizontal_kern(prev, ch, font.size).unwrap_or(0.0);
            }
            width += face.metrics(ch, font.size).advance_width;
            previous = Some(ch);
        }
        Ok(width)
    }

    fn draw_text(
        &mut self,
        frame: &mut VideoFrame,
        x: f32,
        y: f32,
        text: &str,
        paint: &TextPaint,
    ) -> SubforgeResult<()> {
        let face = self.font(&paint.font.family, paint.font.weight)?;
        let size = quantize_size(paint.font.size);
        let line_box = size * LINE_HEIGHT_FACTOR;
        let natural = face
            .horizontal_line_metrics(size)
            .map(|m| m.new_line_size)
            .unwrap_or(line_box);

        // Glyph positions are laid out once at the origin and offset per stamp.
        self.layout.reset(&LayoutSettings {
            x: 0.0,
            y: 0.0,
            max_width: None,
            max_height: None,
            horizontal_align: HorizontalAlign::Left,
            vertical_align: VerticalAlign::Top,
            line_height: 1.0,
            wrap_style: WrapStyle::Word,
            wrap_hard_breaks: false,
        });
        self.layout
            .append(&[face.as_ref()], &TextStyle::new(text, size, 0));

        let top = y + (line_box - natural) / 2.0;
        if paint.stroke_width > 0.0 && paint.stroke.a > 0 {
            for (dx, dy) in stroke_offsets(paint.stroke_width) {
                self.blit_run(frame, &face, x + dx, top + dy, paint.stroke);
            }
        }
        self.blit_run(frame, &face, x, top, paint.fill);
        Ok(())
    }
}

/// Offsets on a circle of `radius` used to stamp an outline.
pub fn stroke_offsets(radius: f32) -> Vec<(f32, f32)> {
    let steps = if radius > 2.0 { 16 } else { 8 };
    (0..steps)
        .map(|i| {
            let angle = i as f32 * std::f32::consts::TAU / steps as f32;
            (radius * angle.cos(), radius * angle.sin())
        })
        .collect()
}

fn blend_glyph(frame: &mut VideoFrame, x: i32, y: i32, glyph: &GlyphBitmap, color: Rgba) {
    let (width, height) = (frame.width as i32, frame.height as i32);
    for row in 0..glyph.height {
        let py = y + row as i32;
        if py < 0 || py >= height {
            continue;
        }
        for col in 0..glyph.width {
            let px = x + col as i32;
            if px < 0 || px >= width {
                continue;
            }
            let mask = glyph.bitmap[row * glyph.width + col];
            if mask == 0 {
                continue;
            }
            let alpha = ((u16::from(mask) * u16::from(color.a)) / 255) as u8;
            let idx = ((py as usize) * frame.width as usize + px as usize) * 4;
            blend_pixel(&mut frame.data, idx, [color.r, color.g, color.b, alpha]);
        }
    }
}

/// Source-over blend of a straight-alpha color onto an opaque pixel.
pub fn blend_pixel(data: &mut [u8], idx: usize, src: [u8; 4]) {
    let alpha = u16::from(src[3]);
    if alpha == 0 {
        return;
    }
    let inv_alpha = 255 - alpha;
    for channel in 0..3 {
        let dst = u16::from(data[idx + channel]);
        let src_c = u16::from(src[channel]);
        data[idx + channel] = ((src_c * alpha + dst * inv_alpha + 127) / 255) as u8;
    }
    data[idx + 3] = 255;
}

/// Signed distance from (px, py) to a rounded rectangle's edge; negative inside.
fn rounded_rect_distance(px: f32, py: f32, rect: &Rect, radius: f32) -> f32 {
    let half_w = rect.width / 2.0;
    let half_h = rect.height / 2.0;
    let qx = (px - (rect.x + half_w)).abs() - (half_w - radius);
    let qy = (py - (rect.y + half_h)).abs() - (half_h - radius);
    let outside = (qx.max(0.0).powi(2) + qy.max(0.0).powi(2)).sqrt();
    let inside = qx.max(qy).min(0.0);
    outside + inside - radius
}

/// Fill (and optionally outline) an anti-aliased rounded rectangle.
pub fn fill_rounded_rect(
    frame: &mut VideoFrame,
    rect: &Rect,
    radius: f32,
    color: Rgba,
    stroke: Option<&StrokeStyle>,
) {
    if rect.width <= 0.0 || rect.height <= 0.0 {
        return;
    }
    let radius = radius.clamp(0.0, rect.width.min(rect.height) / 2.0);
    let half_stroke = stroke.map(|s| s.width.max(0.0) / 2.0).unwrap_or(0.0);

    let x0 = (rect.x - half_stroke - 1.0).floor().max(0.0) as u32;
    let y0 = (rect.y - half_stroke - 1.0).floor().max(0.0) as u32;
    let x1 = ((rect.x + rect.width + half_stroke + 1.0).ceil().max(0.0) as u32).min(frame.width);
    let y1 = ((rect.y + rect.height + half_stroke + 1.0).ceil().max(0.0) as u32).min(frame.height);

    for py in y0..y1 {
        for px in x0..x1 {
            let d = rounded_rect_distance(px as f32 + 0.5, py as f32 + 0.5, rect, radius);
            let idx = (py as usize * frame.width as usize + px as usize) * 4;

            let fill_cov = (0.5 - d).clamp(0.0, 1.0);
            if fill_cov > 0.0 && color.a > 0 {
                let a = (f32::from(color.a) * fill_cov).round() as u8;
                blend_pixel(&mut frame.data, idx, [color.r, color.g, color.b, a]);
            }

            if let Some(stroke) = stroke.filter(|s| s.width > 0.0 && s.color.a > 0) {
                let cov = (0.5 - (d.abs() - half_stroke)).clamp(0.0, 1.0);
                if cov > 0.0 {
                    let c = stroke.color;
                    let a = (f32::from(c.a) * cov).round() as u8;
                    blend_pixel(&mut frame.data, idx, [c.r, c.g, c.b, a]);
                }
            }
        }
    }
}

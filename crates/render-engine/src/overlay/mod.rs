//! Subtitle overlay rendering.
//!
//! A [`RendererContext`] lives for one render. For every decoded frame it
//! resolves the active cue and paints either the plain cue text (layer cached
//! until the text changes) or the per-word animated layout (rebuilt every
//! frame) onto the frame.

pub mod animation;
pub mod fonts;
pub mod layer;
pub mod layout;
pub mod raster;

use subforge_common::error::SubforgeResult;
use subforge_cue_model::{Cue, RenderStyle, WordAnimationData, WordAnimationStyle};

use crate::codec::{VideoDecoderConfig, VideoFrame};
use crate::cue_index::{active_word, animation_progress, CueCursor};
use animation::{pop_scale, SlideTransitionState};
use layer::{DrawOp, OverlayLayer, Rect, TextPaint};
use layout::{layout_text, layout_words, WordBox};

pub use fonts::{FontLibrary, RasterizerFactory, SystemFontFactory};
pub use raster::{FontdueRasterizer, TextRasterizer};

/// Per-render overlay state.
pub struct RendererContext {
    width: u32,
    height: u32,
    rasterizer: Box<dyn TextRasterizer>,
    style: RenderStyle,
    words: Option<WordAnimationData>,
    cursor: CueCursor,

    last_text: Option<String>,
    cached: OverlayLayer,

    /// Word layout of the cue it was computed for.
    word_layout: Option<(usize, Vec<WordBox>)>,
    /// (cue index, word index within the cue) of the last active word.
    last_word: Option<(usize, usize)>,
    highlight: Option<Rect>,
    slide: Option<SlideTransitionState>,
}

impl RendererContext {
    pub fn new(
        decoder_config: &VideoDecoderConfig,
        rasterizer: Box<dyn TextRasterizer>,
        style: RenderStyle,
        words: Option<WordAnimationData>,
    ) -> Self {
        tracing::debug!(
            width = decoder_config.coded_width,
            height = decoder_config.coded_height,
            word_animation = words.is_some() && style.word_animation.is_some(),
            "Renderer context created"
        );
        Self {
            width: decoder_config.coded_width,
            height: decoder_config.coded_height,
            rasterizer,
            style,
            words,
            cursor: CueCursor::new(),
            last_text: None,
            cached: OverlayLayer::new(),
            word_layout: None,
            last_word: None,
            highlight: None,
            slide: None,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Composite the cue active at the frame's timestamp onto `frame`.
    pub fn render_cue(&mut self, cues: &[Cue], mut frame: VideoFrame) -> SubforgeResult<VideoFrame> {
        let t = frame.timestamp_secs();
        let Some(index) = self.cursor.resolve(t, cues) else {
            self.last_text = None;
            self.cached.clear();
            return Ok(frame);
        };

        let animated = self
            .style
            .word_animation
            .clone()
            .filter(|_| self.word_range_exists(index));

        match animated {
            Some(animation) => {
                let layer = self.build_word_layer(index, t, &animation)?;
                layer.paint(&mut frame, self.rasterizer.as_mut())?;
            }
            None => {
                let text = &cues[index].text;
                if self.last_text.as_deref() != Some(text.as_str()) {
                    self.cached = self.build_text_layer(text)?;
                    self.last_text = Some(text.clone());
                }
                self.cached.paint(&mut frame, self.rasterizer.as_mut())?;
            }
        }
        Ok(frame)
    }

    fn word_range_exists(&self, cue_index: usize) -> bool {
        self.words
            .as_ref()
            .is_some_and(|w| !w.words_for(cue_index).is_empty())
    }

    fn base_paint(&self) -> TextPaint {
        TextPaint {
            font: self.style.font.clone(),
            fill: self.style.fill,
            stroke: self.style.stroke,
            stroke_width: self.style.stroke_width,
        }
    }

    fn push_background(&self, layer: &mut OverlayLayer, bounds: Rect) {
        if let Some(bg) = &self.style.background {
            layer.push(DrawOp::RoundedRect {
                rect: bounds.inflate(bg.padding),
                radius: bg.corner_radius,
                color: bg.color.with_opacity(bg.opacity),
                stroke: bg.stroke,
            });
        }
    }

    fn build_text_layer(&mut self, text: &str) -> SubforgeResult<OverlayLayer> {
        let block = layout_text(text, &self.style, self.rasterizer.as_mut())?;
        let mut layer = OverlayLayer::new();
        if let Some(bounds) = block.bounds() {
            self.push_background(&mut layer, bounds);
        }
        let paint = self.base_paint();
        for line in block.lines {
            layer.push(DrawOp::Text {
                x: line.x,
                y: line.y,
                text: line.text,
                paint: paint.clone(),
            });
        }
        tracing::trace!(ops = layer.ops().len(), "Cue layer rebuilt");
        Ok(layer)
    }

    fn build_word_layer(
        &mut self,
        cue_index: usize,
        t: f64,
        animation: &WordAnimationStyle,
    ) -> SubforgeResult<OverlayLayer> {
        let words = match &self.words {
            Some(data) => data.words_for(cue_index).to_vec(),
            None => Vec::new(),
        };

        if self.word_layout.as_ref().map(|(i, _)| *i) != Some(cue_index) {
            let boxes = layout_words(&words, &self.style, self.rasterizer.as_mut())?;
            self.word_layout = Some((cue_index, boxes));
            self.slide = None;
            self.highlight = None;
        }
        let boxes = match &self.word_layout {
            Some((_, boxes)) => boxes.clone(),
            None => Vec::new(),
        };

        let active = active_word(t, &words);
        if let Some(word) = active {
            self.last_word = Some((cue_index, word));
        }
        // Between words the highlight stays on the last spoken word of this cue.
        let focus = active.or(match self.last_word {
            Some((cue, word)) if cue == cue_index => Some(word),
            _ => None,
        });

        let mut layer = OverlayLayer::new();
        if let Some(bounds) = boxes.iter().map(|b| b.rect).reduce(|a, b| a.union(&b)) {
            self.push_background(&mut layer, bounds);
        }

        let base = self.base_paint();
        for word in boxes.iter().filter(|b| Some(b.index) != focus) {
            layer.push(DrawOp::Text {
                x: word.rect.x,
                y: word.rect.y,
                text: word.text.clone(),
                paint: base.clone(),
            });
        }

        let Some(focus_box) = focus.and_then(|f| boxes.iter().find(|b| b.index == f)) else {
            return Ok(layer);
        };

        let (word_start, word_end) = match focus {
            Some(f) if f < words.len() => (
                words[f].start(),
                WordAnimationData::word_end(&words, f),
            ),
            _ => (t, t),
        };
        let progress = animation_progress(t, word_start, word_end);

        if let Some(highlight) = &animation.highlight {
            let sliding = animation.slide_enabled && !animation.pop_enabled;
            let rect = if sliding {
                let duration =
                    (word_end - word_start).max(0.0) * f64::from(animation.slide_duration_fraction);
                let slide = self.slide.get_or_insert_with(|| {
                    SlideTransitionState::at(self.highlight.unwrap_or(focus_box.rect))
                });
                slide.retarget(focus_box.index, focus_box.rect, word_start, duration);
                slide.current(t)
            } else {
                focus_box.rect
            };
            self.highlight = Some(rect);
            layer.push(DrawOp::RoundedRect {
                rect: rect.inflate(highlight.padding),
                radius: highlight.corner_radius,
                color: highlight.color.with_opacity(highlight.opacity),
                stroke: highlight.stroke,
            });
        }

        let scale = if animation.pop_enabled && active.is_some() {
            pop_scale(progress, animation.pop_scale)
        } else {
            1.0
        };
        let mut paint = base;
        if let Some(over) = &animation.font_override {
            if let Some(color) = over.color {
                paint.fill = color;
            }
            if let Some(weight) = over.weight {
                paint.font.weight = weight;
            }
        }
        paint.font.size *= scale;
        let scaled = focus_box.rect.scale_from_center(scale);
        layer.push(DrawOp::Text {
            x: scaled.x,
            y: scaled.y,
            text: focus_box.text.clone(),
            paint,
        });
        Ok(layer)
    }
}

impl std::fmt::Debug for RendererContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererContext")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("last_text", &self.last_text)
            .field("last_word", &self.last_word)
            .finish()
    }
}

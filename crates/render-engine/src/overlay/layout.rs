//! Greedy line wrapping and block placement.

use subforge_common::error::SubforgeResult;
use subforge_cue_model::{Alignment, FontSpec, RenderStyle, WordChunk};

use super::layer::Rect;
use super::raster::{TextRasterizer, LINE_HEIGHT_FACTOR};

/// One placed line of text.
#[derive(Debug, Clone, PartialEq)]
pub struct LineLayout {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
}

/// Wrapped and placed text block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockLayout {
    pub lines: Vec<LineLayout>,
    pub line_height: f32,
}

impl BlockLayout {
    /// Tight bounds of the placed lines.
    pub fn bounds(&self) -> Option<Rect> {
        self.lines
            .iter()
            .map(|line| Rect::new(line.x, line.y, line.width, self.line_height))
            .reduce(|a, b| a.union(&b))
    }
}

/// One placed word.
#[derive(Debug, Clone, PartialEq)]
pub struct WordBox {
    /// Index into the cue's word slice.
    pub index: usize,
    pub text: String,
    pub rect: Rect,
}

pub fn line_height(font: &FontSpec) -> f32 {
    font.size * LINE_HEIGHT_FACTOR
}

fn line_x(style: &RenderStyle, line_width: f32) -> f32 {
    match style.align {
        Alignment::Left => style.x,
        Alignment::Center => style.x + (style.width - line_width) / 2.0,
        Alignment::Right => style.x + style.width - line_width,
    }
}

fn block_top(style: &RenderStyle, lines: usize) -> f32 {
    style.y + (style.height - lines as f32 * line_height(&style.font)) / 2.0
}

/// Wrap `text` greedily at spaces so each line fits `max_width` where
/// possible. A word wider than `max_width` gets a line of its own, and `\n`
/// always breaks. Returns each line with its measured width.
pub fn wrap_text(
    text: &str,
    font: &FontSpec,
    max_width: f32,
    rasterizer: &mut dyn TextRasterizer,
) -> SubforgeResult<Vec<(String, f32)>> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut current = String::new();
        let mut current_width = 0.0;
        for word in paragraph.split_whitespace() {
            if current.is_empty() {
                current = word.to_string();
                current_width = rasterizer.measure(font, &current)?;
                continue;
            }
            let candidate = format!("{current} {word}");
            let width = rasterizer.measure(font, &candidate)?;
            if width > max_width {
                lines.push((std::mem::take(&mut current), current_width));
                current = word.to_string();
                current_width = rasterizer.measure(font, &current)?;
            } else {
                current = candidate;
                current_width = width;
            }
        }
        if !current.is_empty() {
            lines.push((current, current_width));
        }
    }
    Ok(lines)
}

/// Wrap and place `text` inside the style block, vertically centered.
pub fn layout_text(
    text: &str,
    style: &RenderStyle,
    rasterizer: &mut dyn TextRasterizer,
) -> SubforgeResult<BlockLayout> {
    let wrapped = wrap_text(text, &style.font, style.width, rasterizer)?;
    let height = line_height(&style.font);
    let top = block_top(style, wrapped.len());

    let lines = wrapped
        .into_iter()
        .enumerate()
        .map(|(i, (text, width))| LineLayout {
            x: line_x(style, width),
            y: top + i as f32 * height,
            width,
            text,
        })
        .collect();

    Ok(BlockLayout {
        lines,
        line_height: height,
    })
}

/// Place each word of a cue, wrapping greedily with measured word and
/// space widths and aligning every line on its own.
pub fn layout_words(
    words: &[WordChunk],
    style: &RenderStyle,
    rasterizer: &mut dyn TextRasterizer,
) -> SubforgeResult<Vec<WordBox>> {
    let space = rasterizer.measure(&style.font, " ")?;
    let height = line_height(&style.font);

    // (index, text, width) per line
    let mut lines: Vec<Vec<(usize, String, f32)>> = vec![Vec::new()];
    let mut cursor = 0.0;
    for (index, word) in words.iter().enumerate() {
        let text = word.text.trim().to_string();
        let width = rasterizer.measure(&style.font, &text)?;
        let Some(line) = lines.last_mut() else {
            continue;
        };
        if !line.is_empty() && cursor + space + width > style.width {
            lines.push(vec![(index, text, width)]);
            cursor = width;
        } else {
            if !line.is_empty() {
                cursor += space;
            }
            cursor += width;
            line.push((index, text, width));
        }
    }

    let top = block_top(style, lines.len());
    let mut boxes = Vec::with_capacity(words.len());
    for (row, line) in lines.into_iter().enumerate() {
        let line_width: f32 = line.iter().map(|(_, _, w)| w).sum::<f32>()
            + space * line.len().saturating_sub(1) as f32;
        let mut x = line_x(style, line_width);
        let y = top + row as f32 * height;
        for (index, text, width) in line {
            boxes.push(WordBox {
                index,
                text,
                rect: Rect::new(x, y, width, height),
            });
            x += width + space;
        }
    }
    Ok(boxes)
}

//! Render style snapshot.
//!
//! A `RenderStyle` is captured once per render and never mutated while the
//! pipeline runs. Edits go through [`crate::store::StyleStore`].

use std::fmt;

use serde::{Deserialize, Serialize};
use subforge_common::error::{SubforgeError, SubforgeResult};

/// 8-bit straight-alpha color, serialized as `#rrggbb` or `#rrggbbaa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba::rgb(255, 255, 255);
    pub const BLACK: Rgba = Rgba::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa` (the `#` is optional).
    pub fn from_hex(hex: &str) -> SubforgeResult<Self> {
        let digits = hex.trim().trim_start_matches('#');
        let bad = || SubforgeError::config(format!("invalid color {hex:?}"));
        if !digits.is_ascii() {
            return Err(bad());
        }
        let byte = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| bad());

        match digits.len() {
            3 => {
                let nibble = |i: usize| {
                    u8::from_str_radix(&digits[i..i + 1], 16)
                        .map(|v| v * 17)
                        .map_err(|_| bad())
                };
                Ok(Self::rgb(nibble(0)?, nibble(1)?, nibble(2)?))
            }
            6 => Ok(Self::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Ok(Self::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => Err(bad()),
        }
    }

    /// Copy with alpha multiplied by `opacity` in `[0, 1]`.
    pub fn with_opacity(self, opacity: f32) -> Self {
        let opacity = opacity.clamp(0.0, 1.0);
        Self {
            a: (self.a as f32 * opacity).round() as u8,
            ..self
        }
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 255 {
            write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            write!(f, "#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl TryFrom<String> for Rgba {
    type Error = SubforgeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<Rgba> for String {
    fn from(value: Rgba) -> Self {
        value.to_string()
    }
}

/// Horizontal alignment of each text line inside the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    Left,
    #[default]
    Center,
    Right,
}

/// Font selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontSpec {
    /// Family name as reported by the font file (e.g. "DejaVu Sans").
    pub family: String,
    /// CSS-style weight, 100..=900.
    pub weight: u16,
    /// Pixel size of the em square.
    pub size: f32,
}

/// Background box drawn behind the text or the highlighted word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundStyle {
    pub color: Rgba,
    pub padding: f32,
    pub corner_radius: f32,
    /// Multiplier applied to `color`'s alpha, `[0, 1]`.
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    #[serde(default)]
    pub stroke: Option<StrokeStyle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokeStyle {
    pub color: Rgba,
    pub width: f32,
}

/// Per-word animation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WordAnimationStyle {
    /// Scale the active word up and back down over its duration.
    pub pop_enabled: bool,
    /// Peak scale factor of the pop (e.g. 1.15).
    pub pop_scale: f32,

    /// Slide the highlight box from the previous word to the active one.
    pub slide_enabled: bool,
    /// Fraction of the active word's duration spent sliding.
    pub slide_duration_fraction: f32,

    /// Box drawn behind the active word.
    pub highlight: Option<BackgroundStyle>,

    /// Font changes applied to the active word only.
    pub font_override: Option<FontOverride>,
}

/// Font attributes overridden on the active word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FontOverride {
    pub color: Option<Rgba>,
    pub weight: Option<u16>,
}

/// Complete style snapshot used for one render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderStyle {
    /// Top-left corner of the text block.
    pub x: f32,
    pub y: f32,
    /// Size of the text block; lines wrap against `width`.
    pub width: f32,
    pub height: f32,

    pub font: FontSpec,

    pub fill: Rgba,
    pub stroke: Rgba,
    /// Stroke radius in pixels; zero disables the outline.
    pub stroke_width: f32,

    #[serde(default)]
    pub align: Alignment,

    #[serde(default)]
    pub background: Option<BackgroundStyle>,

    #[serde(default)]
    pub word_animation: Option<WordAnimationStyle>,
}

fn default_opacity() -> f32 {
    1.0
}

impl Default for WordAnimationStyle {
    fn default() -> Self {
        Self {
            pop_enabled: true,
            pop_scale: 1.15,
            slide_enabled: false,
            slide_duration_fraction: 0.3,
            highlight: Some(BackgroundStyle {
                color: Rgba::rgb(0x3b, 0x82, 0xf6),
                padding: 6.0,
                corner_radius: 8.0,
                opacity: 0.9,
                stroke: None,
            }),
            font_override: Some(FontOverride {
                color: Some(Rgba::WHITE),
                weight: Some(800),
            }),
        }
    }
}

impl RenderStyle {
    /// A readable lower-third style sized for a `width`×`height` video.
    pub fn default_for(width: u32, height: u32) -> Self {
        let w = width as f32;
        let h = height as f32;
        let block_width = w * 0.8;
        let block_height = h * 0.2;
        Self {
            x: (w - block_width) / 2.0,
            y: h * 0.75,
            width: block_width,
            height: block_height,
            font: FontSpec {
                family: "DejaVu Sans".to_string(),
                weight: 700,
                size: (h / 18.0).round().max(12.0),
            },
            fill: Rgba::WHITE,
            stroke: Rgba::BLACK,
            stroke_width: 2.0,
            align: Alignment::Center,
            background: None,
            word_animation: None,
        }
    }

    /// Load a style from JSON.
    pub fn from_json(json: &str) -> SubforgeResult<Self> {
        let style: Self = serde_json::from_str(json)?;
        style.validate()?;
        Ok(style)
    }

    /// Reject styles that cannot be laid out.
    pub fn validate(&self) -> SubforgeResult<()> {
        if !(self.font.size.is_finite() && self.font.size > 0.0) {
            return Err(SubforgeError::config(format!(
                "font size must be positive, got {}",
                self.font.size
            )));
        }
        if !(self.width.is_finite() && self.width > 0.0) {
            return Err(SubforgeError::config(format!(
                "block width must be positive, got {}",
                self.width
            )));
        }
        if self.stroke_width < 0.0 {
            return Err(SubforgeError::config("stroke width must not be negative"));
        }
        if let Some(anim) = &self.word_animation {
            if !(0.0..=1.0).contains(&anim.slide_duration_fraction) {
                return Err(SubforgeError::config(format!(
                    "slide duration fraction must be within [0, 1], got {}",
                    anim.slide_duration_fraction
                )));
            }
            if anim.pop_scale <= 0.0 {
                return Err(SubforgeError::config("pop scale must be positive"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_parsing() {
        assert_eq!(Rgba::from_hex("#fff").unwrap(), Rgba::WHITE);
        assert_eq!(Rgba::from_hex("1a1a1a").unwrap(), Rgba::rgb(26, 26, 26));
        assert_eq!(
            Rgba::from_hex("#00000080").unwrap(),
            Rgba::rgba(0, 0, 0, 128)
        );
        assert!(Rgba::from_hex("#12345").is_err());
        assert!(Rgba::from_hex("#zzzzzz").is_err());
    }

    #[test]
    fn test_color_serde_roundtrip_format() {
        let json = serde_json::to_string(&Rgba::rgba(255, 0, 16, 200)).unwrap();
        assert_eq!(json, "\"#ff0010c8\"");
        let back: Rgba = serde_json::from_str("\"#ff0010\"").unwrap();
        assert_eq!(back.a, 255);
    }

    #[test]
    fn test_opacity() {
        assert_eq!(Rgba::WHITE.with_opacity(0.5).a, 128);
        assert_eq!(Rgba::WHITE.with_opacity(3.0).a, 255);
    }

    #[test]
    fn test_default_style_fits_frame() {
        let style = RenderStyle::default_for(1280, 720);
        assert!(style.x >= 0.0 && style.x + style.width <= 1280.0);
        assert!(style.y + style.height <= 720.0);
        assert_eq!(style.font.size, 40.0);
        assert!(style.validate().is_ok());
    }

    #[test]
    fn test_style_json_defaults() {
        let json = r##"{
            "x": 10, "y": 20, "width": 600, "height": 100,
            "font": {"family": "DejaVu Sans", "weight": 400, "size": 32},
            "fill": "#ffffff", "stroke": "#000000", "stroke_width": 0,
            "word_animation": {"pop_enabled": false}
        }"##;
        let style = RenderStyle::from_json(json).unwrap();
        assert_eq!(style.align, Alignment::Center);
        let anim = style.word_animation.unwrap();
        assert!(!anim.pop_enabled);
        assert_eq!(anim.slide_duration_fraction, 0.3);
    }

    #[test]
    fn test_validate_rejects_bad_fraction() {
        let mut style = RenderStyle::default_for(640, 360);
        style.word_animation = Some(WordAnimationStyle {
            slide_duration_fraction: 1.5,
            ..Default::default()
        });
        assert!(style.validate().is_err());
    }
}

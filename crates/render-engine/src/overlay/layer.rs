//! Overlay display list.

use subforge_common::error::SubforgeResult;
use subforge_cue_model::{FontSpec, Rgba, StrokeStyle};

use super::raster::{fill_rounded_rect, TextRasterizer};
use crate::codec::VideoFrame;

/// Axis-aligned rectangle in output pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Grow on every side by `amount`.
    pub fn inflate(&self, amount: f32) -> Self {
        Self {
            x: self.x - amount,
            y: self.y - amount,
            width: self.width + amount * 2.0,
            height: self.height + amount * 2.0,
        }
    }

    /// Scale around the center.
    pub fn scale_from_center(&self, scale: f32) -> Self {
        let dx = self.width * (scale - 1.0) / 2.0;
        let dy = self.height * (scale - 1.0) / 2.0;
        Self {
            x: self.x - dx,
            y: self.y - dy,
            width: self.width * scale,
            height: self.height * scale,
        }
    }

    /// Smallest rectangle covering both.
    pub fn union(&self, other: &Rect) -> Self {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = (self.x + self.width).max(other.x + other.width);
        let bottom = (self.y + self.height).max(other.y + other.height);
        Self::new(x, y, right - x, bottom - y)
    }

    /// Component-wise interpolation, `t` in `[0, 1]`.
    pub fn lerp(&self, to: &Rect, t: f32) -> Self {
        let mix = |a: f32, b: f32| a + (b - a) * t;
        Self::new(
            mix(self.x, to.x),
            mix(self.y, to.y),
            mix(self.width, to.width),
            mix(self.height, to.height),
        )
    }
}

/// Colors and font for one text run.
#[derive(Debug, Clone, PartialEq)]
pub struct TextPaint {
    pub font: FontSpec,
    pub fill: Rgba,
    pub stroke: Rgba,
    pub stroke_width: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    RoundedRect {
        rect: Rect,
        radius: f32,
        color: Rgba,
        stroke: Option<StrokeStyle>,
    },
    /// A single line of text whose line box starts at (x, y).
    Text {
        x: f32,
        y: f32,
        text: String,
        paint: TextPaint,
    },
}

/// Ordered drawing operations, painted back to front.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayLayer {
    ops: Vec<DrawOp>,
}

impl OverlayLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: DrawOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Composite every op onto `frame`.
    pub fn paint(
        &self,
        frame: &mut VideoFrame,
        rasterizer: &mut dyn TextRasterizer,
    ) -> SubforgeResult<()> {
        for op in &self.ops {
            match op {
                DrawOp::RoundedRect {
                    rect,
                    radius,
                    color,
                    stroke,
                } => fill_rounded_rect(frame, rect, *radius, *color, stroke.as_ref()),
                DrawOp::Text { x, y, text, paint } => {
                    rasterizer.draw_text(frame, *x, *y, text, paint)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_from_center_keeps_center() {
        let rect = Rect::new(10.0, 20.0, 40.0, 20.0);
        let scaled = rect.scale_from_center(1.5);
        assert_eq!(scaled.x, 0.0);
        assert_eq!(scaled.y, 15.0);
        assert_eq!(scaled.width, 60.0);
        assert_eq!(scaled.height, 30.0);
    }

    #[test]
    fn test_union_and_inflate() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(20.0, 5.0, 10.0, 10.0);
        assert_eq!(a.union(&b), Rect::new(0.0, 0.0, 30.0, 15.0));
        assert_eq!(a.inflate(2.0), Rect::new(-2.0, -2.0, 14.0, 14.0));
    }

    #[test]
    fn test_lerp_endpoints() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(100.0, 50.0, 20.0, 10.0);
        assert_eq!(a.lerp(&b, 0.0), a);
        assert_eq!(a.lerp(&b, 1.0), b);
        assert_eq!(a.lerp(&b, 0.5).x, 50.0);
    }
}

//! Renderer-agnostic debug draw sink
//!
//! The navigation crates never depend on a renderer. Debug output goes
//! through the [`DebugDraw`] trait as begin/vertex/end triangle or line
//! batches, and a renderer implements the trait on its side.

use crate::math::lerp;

/// Color representation for debug visualization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    /// Creates a new color
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Creates a color from RGB values (alpha = 1.0)
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::new(r, g, b, 1.0)
    }

    /// Creates a color from RGBA bytes
    pub const fn from_rgba_bytes(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::new(
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
            a as f32 / 255.0,
        )
    }

    /// Packs the color into 0xAABBGGRR byte order
    pub fn pack(&self) -> u32 {
        let r = (self.r.clamp(0.0, 1.0) * 255.0) as u32;
        let g = (self.g.clamp(0.0, 1.0) * 255.0) as u32;
        let b = (self.b.clamp(0.0, 1.0) * 255.0) as u32;
        let a = (self.a.clamp(0.0, 1.0) * 255.0) as u32;
        (a << 24) | (b << 16) | (g << 8) | r
    }

    /// Interpolates between two colors by a shading value in [-1, 1],
    /// where -1 maps to `low` and 1 maps to `high`.
    pub fn shade(low: Color, high: Color, value: f32) -> Color {
        let t = (value.clamp(-1.0, 1.0) + 1.0) * 0.5;
        Color::new(
            lerp(low.r, high.r, t),
            lerp(low.g, high.g, t),
            lerp(low.b, high.b, t),
            lerp(low.a, high.a, t),
        )
    }
}

/// Common debug colors
impl Color {
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const RED: Color = Color::rgb(1.0, 0.0, 0.0);
    pub const GREEN: Color = Color::rgb(0.0, 1.0, 0.0);
    pub const BLUE: Color = Color::rgb(0.0, 0.0, 1.0);
    pub const GRAY: Color = Color::rgb(0.5, 0.5, 0.5);
}

/// Primitive kind for a debug draw batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugDrawPrimitive {
    /// Individual line segments, two vertices each
    Lines,
    /// Individual triangles, three vertices each
    Tris,
}

/// Render-primitive sink consumed by the debug visualization helpers
pub trait DebugDraw {
    /// Starts a new primitive batch
    fn begin(&mut self, primitive: DebugDrawPrimitive);

    /// Submits one vertex with a packed 0xAABBGGRR color
    fn vertex(&mut self, x: f32, y: f32, z: f32, color: u32);

    /// Ends the current batch
    fn end(&mut self);
}

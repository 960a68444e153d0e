use serde::{Deserialize, Serialize};

/// Straight-alpha RGBA color with channels in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Color {
  pub r: f32,
  pub g: f32,
  pub b: f32,
  pub a: f32,
}

impl Color {
  pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);
  pub const BLACK: Color = Color::rgba(0.0, 0.0, 0.0, 1.0);
  pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);

  pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
    Self { r, g, b, a }
  }

  /// Opaque gray with every channel set to `v`.
  pub fn gray(v: f32) -> Self {
    let v = v.clamp(0.0, 1.0);
    Self::rgba(v, v, v, 1.0)
  }

  pub fn from_array(c: [f32; 4]) -> Self {
    Self::rgba(c[0], c[1], c[2], c[3])
  }

  pub fn to_array(self) -> [f32; 4] {
    [self.r, self.g, self.b, self.a]
  }

  /// Rec. 709 luma.
  pub fn luminance(self) -> f32 {
    0.2126 * self.r + 0.7152 * self.g + 0.0722 * self.b
  }

  pub fn to_rgba8(self) -> image::Rgba<u8> {
    let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    image::Rgba([q(self.r), q(self.g), q(self.b), q(self.a)])
  }
}

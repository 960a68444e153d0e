//! Render programs executed by a resource context.
//!
//! A program reads named uniforms and writes every pixel of an output
//! texture. Two programs are always registered: [`Fill`] under `"fill"` and
//! [`AffineResample`] under `"affine_resample"`.

use std::collections::{BTreeMap, HashMap};

use image::{Rgba, RgbaImage};
use kurbo::{Affine, Point};

use crate::color::Color;
use crate::error::ResourceError;
use crate::manager::ResourceId;

/// A single uniform value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Uniform {
  Float(f32),
  Color(Color),
  /// Affine coefficients in `kurbo` order `[a, b, c, d, e, f]`.
  Matrix([f64; 6]),
  Texture(ResourceId),
}

pub type Uniforms = BTreeMap<String, Uniform>;

/// Read-only view handed to a program while it renders.
pub struct ProgramInputs<'a> {
  program: &'a str,
  uniforms: &'a Uniforms,
  textures: &'a HashMap<ResourceId, RgbaImage>,
}

impl<'a> ProgramInputs<'a> {
  pub(crate) fn new(
    program: &'a str,
    uniforms: &'a Uniforms,
    textures: &'a HashMap<ResourceId, RgbaImage>,
  ) -> Self {
    Self {
      program,
      uniforms,
      textures,
    }
  }

  fn get(&self, name: &str) -> Result<&Uniform, ResourceError> {
    self
      .uniforms
      .get(name)
      .ok_or_else(|| ResourceError::MissingUniform {
        program: self.program.to_string(),
        name: name.to_string(),
      })
  }

  fn invalid(&self, name: &str) -> ResourceError {
    ResourceError::InvalidUniform {
      program: self.program.to_string(),
      name: name.to_string(),
    }
  }

  pub fn float(&self, name: &str) -> Result<f32, ResourceError> {
    match self.get(name)? {
      Uniform::Float(v) => Ok(*v),
      _ => Err(self.invalid(name)),
    }
  }

  pub fn color(&self, name: &str) -> Result<Color, ResourceError> {
    match self.get(name)? {
      Uniform::Color(c) => Ok(*c),
      _ => Err(self.invalid(name)),
    }
  }

  /// Like [`color`](Self::color) but falls back when the uniform is absent.
  pub fn color_or(&self, name: &str, fallback: Color) -> Result<Color, ResourceError> {
    if self.uniforms.contains_key(name) {
      self.color(name)
    } else {
      Ok(fallback)
    }
  }

  pub fn matrix(&self, name: &str) -> Result<Affine, ResourceError> {
    match self.get(name)? {
      Uniform::Matrix(m) => Ok(Affine::new(*m)),
      _ => Err(self.invalid(name)),
    }
  }

  pub fn texture(&self, name: &str) -> Result<&'a RgbaImage, ResourceError> {
    match self.get(name)? {
      Uniform::Texture(id) => self
        .textures
        .get(id)
        .ok_or(ResourceError::UnknownResource(*id)),
      _ => Err(self.invalid(name)),
    }
  }
}

/// A render program.
pub trait Program: Send + Sync {
  fn render(&self, inputs: &ProgramInputs<'_>, output: &mut RgbaImage) -> Result<(), ResourceError>;
}

impl<F> Program for F
where
  F: Fn(&ProgramInputs<'_>, &mut RgbaImage) -> Result<(), ResourceError> + Send + Sync,
{
  fn render(&self, inputs: &ProgramInputs<'_>, output: &mut RgbaImage) -> Result<(), ResourceError> {
    self(inputs, output)
  }
}

/// Writes the `color` uniform to every pixel.
pub struct Fill;

impl Program for Fill {
  fn render(&self, inputs: &ProgramInputs<'_>, output: &mut RgbaImage) -> Result<(), ResourceError> {
    let px = inputs.color("color")?.to_rgba8();
    for p in output.pixels_mut() {
      *p = px;
    }
    Ok(())
  }
}

/// Resamples `source` through `matrix` into the output.
///
/// `matrix` maps source pixel coordinates to output pixel coordinates. Each
/// output pixel center is pulled back through the inverse and sampled
/// bilinearly; samples outside the source take the `fill` color (transparent
/// when absent).
pub struct AffineResample;

impl Program for AffineResample {
  fn render(&self, inputs: &ProgramInputs<'_>, output: &mut RgbaImage) -> Result<(), ResourceError> {
    let source = inputs.texture("source")?;
    let matrix = inputs.matrix("matrix")?;
    let fill = inputs.color_or("fill", Color::TRANSPARENT)?;
    let fill = [fill.r, fill.g, fill.b, fill.a];

    if matrix.determinant().abs() < 1e-12 {
      let px = Color::from_array(fill).to_rgba8();
      for p in output.pixels_mut() {
        *p = px;
      }
      return Ok(());
    }

    let inverse = matrix.inverse();
    for (x, y, px) in output.enumerate_pixels_mut() {
      let p = inverse * Point::new(x as f64 + 0.5, y as f64 + 0.5);
      let s = sample_bilinear(source, p.x - 0.5, p.y - 0.5, fill);
      *px = Color::from_array(s).to_rgba8();
    }
    Ok(())
  }
}

fn texel(source: &RgbaImage, x: i64, y: i64, fill: [f32; 4]) -> [f32; 4] {
  if x < 0 || y < 0 || x >= source.width() as i64 || y >= source.height() as i64 {
    return fill;
  }
  let Rgba(c) = *source.get_pixel(x as u32, y as u32);
  [
    c[0] as f32 / 255.0,
    c[1] as f32 / 255.0,
    c[2] as f32 / 255.0,
    c[3] as f32 / 255.0,
  ]
}

fn sample_bilinear(source: &RgbaImage, x: f64, y: f64, fill: [f32; 4]) -> [f32; 4] {
  let x0 = x.floor();
  let y0 = y.floor();
  let tx = (x - x0) as f32;
  let ty = (y - y0) as f32;
  let (x0, y0) = (x0 as i64, y0 as i64);

  let c00 = texel(source, x0, y0, fill);
  let c10 = texel(source, x0 + 1, y0, fill);
  let c01 = texel(source, x0, y0 + 1, fill);
  let c11 = texel(source, x0 + 1, y0 + 1, fill);

  let mut out = [0.0; 4];
  for i in 0..4 {
    let top = c00[i] + (c10[i] - c00[i]) * tx;
    let bottom = c01[i] + (c11[i] - c01[i]) * tx;
    out[i] = top + (bottom - top) * ty;
  }
  out
}

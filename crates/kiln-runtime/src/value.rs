//! Values flowing along edges.

use std::collections::BTreeMap;

use image::RgbaImage;
use kiln_graph::DataType;
use kiln_resource::{Color, ResourceHandle};
use kurbo::Affine;
use serde::{Deserialize, Serialize};

/// An image living in the resource context, carried with a pending transform.
///
/// `transform` maps texture pixel space to canvas space. `base_transform` is
/// the transform the producing node inherited when its pixels were last
/// computed; local-transform nodes recompose `transform` on top of it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Texture {
  pub handle: ResourceHandle,
  pub transform: Affine,
  pub base_transform: Affine,
}

impl Texture {
  /// A texture with identity transforms.
  pub fn new(handle: ResourceHandle) -> Self {
    Self {
      handle,
      transform: Affine::IDENTITY,
      base_transform: Affine::IDENTITY,
    }
  }

  pub fn has_pending_transform(&self) -> bool {
    !is_identity(self.transform)
  }

  pub fn dimensions(&self) -> (u32, u32) {
    (self.handle.width, self.handle.height)
  }
}

pub(crate) fn is_identity(affine: Affine) -> bool {
  let id = Affine::IDENTITY.as_coeffs();
  affine
    .as_coeffs()
    .iter()
    .zip(id.iter())
    .all(|(a, b)| (a - b).abs() < 1e-9)
}

/// A value produced on an output port or consumed on an input port.
///
/// Cloning a `Value` does not retain its texture. Outputs returned from a
/// compute routine own one reference per texture.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Number(f64),
  Boolean(bool),
  Color(Color),
  Text(String),
  /// Host-side plain pixel buffer.
  Pixels(RgbaImage),
  Texture(Texture),
}

impl Value {
  pub fn as_number(&self) -> Option<f64> {
    match self {
      Value::Number(v) => Some(*v),
      _ => None,
    }
  }

  pub fn as_texture(&self) -> Option<&Texture> {
    match self {
      Value::Texture(t) => Some(t),
      _ => None,
    }
  }

  /// Dimensions of image-like values.
  pub fn image_dimensions(&self) -> Option<(u32, u32)> {
    match self {
      Value::Texture(t) => Some(t.dimensions()),
      Value::Pixels(p) => Some(p.dimensions()),
      _ => None,
    }
  }

  pub fn snapshot(&self) -> ValueSnapshot {
    match self {
      Value::Number(v) => ValueSnapshot::Number { value: *v },
      Value::Boolean(v) => ValueSnapshot::Boolean { value: *v },
      Value::Color(c) => ValueSnapshot::Color {
        value: c.to_array(),
      },
      Value::Text(s) => ValueSnapshot::Text { value: s.clone() },
      Value::Pixels(p) => ValueSnapshot::Pixels {
        width: p.width(),
        height: p.height(),
      },
      Value::Texture(t) => ValueSnapshot::Texture {
        resource_id: t.handle.id,
        width: t.handle.width,
        height: t.handle.height,
        transform: t.transform.as_coeffs(),
        base_transform: t.base_transform.as_coeffs(),
      },
    }
  }
}

/// Outputs of one node, keyed by port id.
pub type NodeOutputs = BTreeMap<String, Value>;

/// Serializable summary of a [`Value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueSnapshot {
  Number {
    value: f64,
  },
  Boolean {
    value: bool,
  },
  Color {
    value: [f32; 4],
  },
  Text {
    value: String,
  },
  Pixels {
    width: u32,
    height: u32,
  },
  Texture {
    resource_id: u64,
    width: u32,
    height: u32,
    transform: [f64; 6],
    base_transform: [f64; 6],
  },
}

pub fn snapshot_outputs(outputs: &NodeOutputs) -> BTreeMap<String, ValueSnapshot> {
  outputs
    .iter()
    .map(|(port, value)| (port.clone(), value.snapshot()))
    .collect()
}

/// Parse a color written as `[r, g, b]`, `[r, g, b, a]`, or a single gray
/// level.
pub fn color_from_json(json: &serde_json::Value) -> Option<Color> {
  match json {
    serde_json::Value::Number(n) => n.as_f64().map(|v| Color::gray(v as f32)),
    serde_json::Value::Array(items) if items.len() == 3 || items.len() == 4 => {
      let mut c = [0.0, 0.0, 0.0, 1.0];
      for (slot, item) in c.iter_mut().zip(items) {
        *slot = item.as_f64()? as f32;
      }
      Some(Color::from_array(c))
    }
    _ => None,
  }
}

/// Convert a JSON parameter or port default to a value of `data_type`.
///
/// Image-like types have no JSON form and yield `None`.
pub fn value_from_json(data_type: DataType, json: &serde_json::Value) -> Option<Value> {
  match data_type {
    DataType::Number => match json {
      serde_json::Value::Bool(b) => Some(Value::Number(if *b { 1.0 } else { 0.0 })),
      other => other.as_f64().map(Value::Number),
    },
    DataType::Boolean => match json {
      serde_json::Value::Number(n) => n.as_f64().map(|v| Value::Boolean(v != 0.0)),
      other => other.as_bool().map(Value::Boolean),
    },
    DataType::Color => color_from_json(json).map(Value::Color),
    DataType::String => json.as_str().map(|s| Value::Text(s.to_string())),
    DataType::Image | DataType::Mask => None,
    DataType::Any => match json {
      serde_json::Value::Bool(b) => Some(Value::Boolean(*b)),
      serde_json::Value::Number(n) => n.as_f64().map(Value::Number),
      serde_json::Value::String(s) => Some(Value::Text(s.clone())),
      serde_json::Value::Array(_) => color_from_json(json).map(Value::Color),
      _ => None,
    },
  }
}

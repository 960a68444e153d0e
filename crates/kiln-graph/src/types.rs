use std::fmt;

use serde::{Deserialize, Serialize};

/// Data type tag of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
  Image,
  Mask,
  Number,
  Color,
  Boolean,
  String,
  /// Wildcard, compatible with everything.
  Any,
}

impl DataType {
  /// Whether values of this type are backed by pixels.
  pub fn is_image_like(self) -> bool {
    matches!(self, DataType::Image | DataType::Mask)
  }

  /// Whether an output of type `self` may feed an input of type `target`.
  ///
  /// The relation is not symmetric: a number can become an image, but an
  /// image never becomes a number.
  pub fn can_feed(self, target: DataType) -> bool {
    use DataType::*;

    if self == target || self == Any || target == Any {
      return true;
    }

    matches!(
      (self, target),
      (Image, Mask)
        | (Mask, Image)
        | (Number, Boolean)
        | (Boolean, Number)
        | (Number, Color)
        | (Number, Image)
        | (Number, Mask)
        | (Color, Image)
        | (Color, Mask)
        | (Color, Number)
    )
  }

  /// Whether a value crossing from `self` to `target` must be converted.
  pub fn needs_coercion(self, target: DataType) -> bool {
    if self == target || self == DataType::Any || target == DataType::Any {
      return false;
    }
    !(self.is_image_like() && target.is_image_like())
  }
}

impl fmt::Display for DataType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      DataType::Image => "image",
      DataType::Mask => "mask",
      DataType::Number => "number",
      DataType::Color => "color",
      DataType::Boolean => "boolean",
      DataType::String => "string",
      DataType::Any => "any",
    };
    f.write_str(s)
  }
}

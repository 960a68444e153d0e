use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunable defaults used by the execution engine.
///
/// Every field has a default so partial documents are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
  /// Width of images produced by scalar-to-image coercion when no sibling
  /// image input determines the size.
  pub coercion_width: u32,
  /// Height counterpart of `coercion_width`.
  pub coercion_height: u32,
  /// Pivot in normalized image coordinates for local transforms that do not
  /// set `pivot_x` / `pivot_y`.
  pub default_pivot: [f64; 2],
  /// Fill color for areas exposed when baking a transform.
  /// `None` means transparent black.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub canvas_fill: Option<[f32; 4]>,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      coercion_width: 512,
      coercion_height: 512,
      default_pivot: [0.5, 0.5],
      canvas_fill: None,
    }
  }
}

impl EngineSettings {
  /// Load settings from a JSON file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.display().to_string(),
      source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.display().to_string(),
      source,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partial_settings_use_defaults() {
    let settings: EngineSettings = serde_json::from_str(r#"{ "coercion_width": 64 }"#).unwrap();
    assert_eq!(settings.coercion_width, 64);
    assert_eq!(settings.coercion_height, 512);
    assert_eq!(settings.default_pivot, [0.5, 0.5]);
    assert_eq!(settings.canvas_fill, None);
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{ "canvas_fill": [0, 0, 1, 1] }"#).unwrap();

    let settings = EngineSettings::load(&path).unwrap();
    assert_eq!(settings.canvas_fill, Some([0.0, 0.0, 1.0, 1.0]));
  }

  #[test]
  fn test_missing_file_is_io_error() {
    let err = EngineSettings::load("/definitely/not/here.json").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
  }
}

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::edge::EdgeDef;
use crate::error::ConfigError;
use crate::node::NodeDef;
use crate::settings::EngineSettings;

/// A serialized node graph document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
  pub name: String,
  #[serde(default)]
  pub nodes: Vec<NodeDef>,
  #[serde(default)]
  pub edges: Vec<EdgeDef>,
  /// Engine settings stored with the document, if any.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub settings: Option<EngineSettings>,
}

impl GraphDef {
  /// Parse a graph document from a JSON string.
  pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(json)
  }

  /// Load a graph document from a JSON file.
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
  fn test_parse_minimal_document() {
    let json = r#"{
      "name": "chain",
      "nodes": [
        { "node_id": "a", "type": "solid", "parameters": { "color": [1, 0, 0, 1] } },
        { "node_id": "b", "type": "blur" }
      ],
      "edges": [
        { "edge_id": "e1", "source": "a", "source_port": "image", "target": "b", "target_port": "image" }
      ]
    }"#;

    let def = GraphDef::from_json(json).unwrap();
    assert_eq!(def.name, "chain");
    assert_eq!(def.nodes.len(), 2);
    assert_eq!(def.nodes[1].node_type, "blur");
    assert!(def.nodes[1].parameters.is_empty());
    assert_eq!(def.edges[0].target_port, "image");
    assert!(def.settings.is_none());
  }

  #[test]
  fn test_load_reports_path_on_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = GraphDef::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("broken.json"));
  }
}

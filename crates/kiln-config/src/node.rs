use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Parameter values of a node, keyed by parameter name.
///
/// Values are plain JSON: numbers, booleans, strings, and colors as
/// `[r, g, b, a]` arrays in the `0.0..=1.0` range.
pub type Parameters = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  pub node_id: String,
  /// Type tag resolved against the node registry, e.g. "blur".
  #[serde(rename = "type")]
  pub node_type: String,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub parameters: Parameters,
}

use serde::{Deserialize, Serialize};

/// A connection from one node's output port to another node's input port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDef {
  pub edge_id: String,
  pub source: String,
  pub source_port: String,
  pub target: String,
  pub target_port: String,
}

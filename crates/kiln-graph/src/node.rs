use kiln_config::{EdgeDef, NodeDef, Parameters};
use serde::{Deserialize, Serialize};

/// A node instance in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
  pub node_id: String,
  /// Type tag, resolved to a definition by the node registry.
  pub node_type: String,
  pub parameters: Parameters,
}

impl Node {
  pub fn new(node_id: impl Into<String>, node_type: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      node_type: node_type.into(),
      parameters: Parameters::new(),
    }
  }

  /// Builder-style parameter setter.
  pub fn with_param(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
    self.parameters.insert(name.into(), value);
    self
  }
}

impl From<&NodeDef> for Node {
  fn from(def: &NodeDef) -> Self {
    Self {
      node_id: def.node_id.clone(),
      node_type: def.node_type.clone(),
      parameters: def.parameters.clone(),
    }
  }
}

/// A connection `(source, source_port) -> (target, target_port)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
  pub edge_id: String,
  pub source: String,
  pub source_port: String,
  pub target: String,
  pub target_port: String,
}

impl Edge {
  pub fn new(
    edge_id: impl Into<String>,
    source: impl Into<String>,
    source_port: impl Into<String>,
    target: impl Into<String>,
    target_port: impl Into<String>,
  ) -> Self {
    Self {
      edge_id: edge_id.into(),
      source: source.into(),
      source_port: source_port.into(),
      target: target.into(),
      target_port: target_port.into(),
    }
  }
}

impl From<&EdgeDef> for Edge {
  fn from(def: &EdgeDef) -> Self {
    Self {
      edge_id: def.edge_id.clone(),
      source: def.source.clone(),
      source_port: def.source_port.clone(),
      target: def.target.clone(),
      target_port: def.target_port.clone(),
    }
  }
}

impl From<&Edge> for EdgeDef {
  fn from(edge: &Edge) -> Self {
    Self {
      edge_id: edge.edge_id.clone(),
      source: edge.source.clone(),
      source_port: edge.source_port.clone(),
      target: edge.target.clone(),
      target_port: edge.target_port.clone(),
    }
  }
}

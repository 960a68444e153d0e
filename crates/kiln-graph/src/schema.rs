//! Port and parameter schemas of node types.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::DataType;

/// A typed connection point declared by a node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
  pub id: String,
  pub data_type: DataType,
  /// Required inputs must be connected or have a default.
  pub required: bool,
  /// Value used when the input has no incoming edge.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default: Option<serde_json::Value>,
}

impl PortSpec {
  /// A required port.
  pub fn new(id: impl Into<String>, data_type: DataType) -> Self {
    Self {
      id: id.into(),
      data_type,
      required: true,
      default: None,
    }
  }

  /// Mark the port as optional.
  pub fn optional(mut self) -> Self {
    self.required = false;
    self
  }

  /// Set the value used when nothing is connected.
  pub fn with_default(mut self, value: serde_json::Value) -> Self {
    self.default = Some(value);
    self
  }
}

/// A node parameter and its default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
  pub id: String,
  pub data_type: DataType,
  pub default: serde_json::Value,
}

impl ParamSpec {
  pub fn new(id: impl Into<String>, data_type: DataType, default: serde_json::Value) -> Self {
    Self {
      id: id.into(),
      data_type,
      default,
    }
  }
}

/// Immutable description of a node type: ports, parameters and capability
/// flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSchema {
  pub inputs: Vec<PortSpec>,
  pub outputs: Vec<PortSpec>,
  pub parameters: Vec<ParamSpec>,
  /// Parameters encode a pivot-relative transform that is carried on the
  /// output instead of being resampled into it.
  #[serde(default)]
  pub has_local_transform: bool,
  /// Input pixels must be in their final position before the node runs.
  #[serde(default)]
  pub requires_spatial_coherence: bool,
}

impl NodeSchema {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn input(mut self, port: PortSpec) -> Self {
    self.inputs.push(port);
    self
  }

  pub fn output(mut self, port: PortSpec) -> Self {
    self.outputs.push(port);
    self
  }

  pub fn param(mut self, param: ParamSpec) -> Self {
    self.parameters.push(param);
    self
  }

  pub fn with_local_transform(mut self) -> Self {
    self.has_local_transform = true;
    self
  }

  pub fn with_spatial_coherence(mut self) -> Self {
    self.requires_spatial_coherence = true;
    self
  }

  pub fn input_port(&self, port_id: &str) -> Option<&PortSpec> {
    self.inputs.iter().find(|p| p.id == port_id)
  }

  pub fn output_port(&self, port_id: &str) -> Option<&PortSpec> {
    self.outputs.iter().find(|p| p.id == port_id)
  }
}

/// Resolves a node type tag to its schema.
pub trait SchemaLookup {
  fn schema(&self, node_type: &str) -> Option<&NodeSchema>;
}

impl SchemaLookup for HashMap<String, NodeSchema> {
  fn schema(&self, node_type: &str) -> Option<&NodeSchema> {
    self.get(node_type)
  }
}

impl SchemaLookup for HashMap<String, Arc<NodeSchema>> {
  fn schema(&self, node_type: &str) -> Option<&NodeSchema> {
    self.get(node_type).map(|s| s.as_ref())
  }
}

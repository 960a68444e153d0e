//! Node definition contract and registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use kiln_config::Parameters;
use kiln_graph::{NodeSchema, SchemaLookup};
use kiln_resource::Color;

use crate::context::NodeContext;
use crate::error::NodeError;
use crate::value::{NodeOutputs, Texture, Value, color_from_json};

/// Behavior of one node type.
///
/// The engine depends only on this trait. `execute` receives read-only views
/// of its inputs and must return freshly owned outputs: every texture in the
/// returned map carries one reference, either newly created or obtained with
/// [`retain`](kiln_resource::ResourceManager::retain) when an input is passed
/// through.
#[async_trait]
pub trait NodeDefinition: Send + Sync {
  fn schema(&self) -> &NodeSchema;

  async fn execute(
    &self,
    inputs: &NodeInputs,
    params: &Parameters,
    ctx: &NodeContext<'_>,
  ) -> Result<NodeOutputs, NodeError>;
}

/// Resolved input values, keyed by port id. Ports with no value are absent.
#[derive(Debug, Clone, Default)]
pub struct NodeInputs {
  values: BTreeMap<String, Value>,
}

impl NodeInputs {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, port: impl Into<String>, value: Value) {
    self.values.insert(port.into(), value);
  }

  pub fn get(&self, port: &str) -> Option<&Value> {
    self.values.get(port)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
    self.values.iter()
  }

  pub fn number(&self, port: &str) -> Option<f64> {
    self.get(port).and_then(Value::as_number)
  }

  pub fn color(&self, port: &str) -> Option<Color> {
    match self.get(port) {
      Some(Value::Color(c)) => Some(*c),
      _ => None,
    }
  }

  /// The texture on `port`, or an error naming the port.
  pub fn texture(&self, port: &str) -> Result<&Texture, NodeError> {
    self
      .get(port)
      .and_then(Value::as_texture)
      .ok_or_else(|| NodeError::new(format!("input '{}' is not a texture", port)))
  }
}

/// Typed accessors for node parameters.
pub trait ParamsExt {
  fn number(&self, key: &str) -> Option<f64>;
  fn number_or(&self, key: &str, default: f64) -> f64;
  fn color(&self, key: &str) -> Option<Color>;
  fn text(&self, key: &str) -> Option<&str>;
}

impl ParamsExt for Parameters {
  fn number(&self, key: &str) -> Option<f64> {
    self.get(key).and_then(|v| v.as_f64())
  }

  fn number_or(&self, key: &str, default: f64) -> f64 {
    self.number(key).unwrap_or(default)
  }

  fn color(&self, key: &str) -> Option<Color> {
    self.get(key).and_then(color_from_json)
  }

  fn text(&self, key: &str) -> Option<&str> {
    self.get(key).and_then(|v| v.as_str())
  }
}

/// Node parameters overlaid on the schema's parameter defaults.
pub(crate) fn effective_params(schema: &NodeSchema, params: &Parameters) -> Parameters {
  let mut merged: Parameters = schema
    .parameters
    .iter()
    .map(|p| (p.id.clone(), p.default.clone()))
    .collect();
  merged.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
  merged
}

/// Maps node type tags to their definitions.
#[derive(Clone, Default)]
pub struct NodeRegistry {
  definitions: HashMap<String, Arc<dyn NodeDefinition>>,
}

impl NodeRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a definition, replacing any previous one for `node_type`.
  pub fn register(&mut self, node_type: impl Into<String>, definition: impl NodeDefinition + 'static) {
    self.register_arc(node_type, Arc::new(definition));
  }

  pub fn register_arc(&mut self, node_type: impl Into<String>, definition: Arc<dyn NodeDefinition>) {
    self.definitions.insert(node_type.into(), definition);
  }

  pub fn get(&self, node_type: &str) -> Option<&Arc<dyn NodeDefinition>> {
    self.definitions.get(node_type)
  }

  pub fn contains(&self, node_type: &str) -> bool {
    self.definitions.contains_key(node_type)
  }

  /// Registered type tags, sorted.
  pub fn node_types(&self) -> Vec<&str> {
    let mut types: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
    types.sort_unstable();
    types
  }
}

impl SchemaLookup for NodeRegistry {
  fn schema(&self, node_type: &str) -> Option<&NodeSchema> {
    self.definitions.get(node_type).map(|d| d.schema())
  }
}

#[cfg(test)]
mod tests {
  use kiln_graph::{DataType, ParamSpec};
  use serde_json::json;

  use super::*;

  #[test]
  fn test_effective_params_overlay_defaults() {
    let schema = NodeSchema::new()
      .param(ParamSpec::new("radius", DataType::Number, json!(2.0)))
      .param(ParamSpec::new("mode", DataType::String, json!("fast")));
    let mut params = Parameters::new();
    params.insert("radius".into(), json!(5.0));
    params.insert("extra".into(), json!(true));

    let merged = effective_params(&schema, &params);
    assert_eq!(merged.number("radius"), Some(5.0));
    assert_eq!(merged.text("mode"), Some("fast"));
    assert_eq!(merged.get("extra"), Some(&json!(true)));
  }
}

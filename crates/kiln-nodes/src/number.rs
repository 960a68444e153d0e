use async_trait::async_trait;
use kiln_config::Parameters;
use kiln_graph::{DataType, NodeSchema, ParamSpec, PortSpec};
use kiln_runtime::{NodeContext, NodeDefinition, NodeError, NodeInputs, NodeOutputs, ParamsExt, Value};
use serde_json::json;

use crate::single;

/// Constant number.
pub struct Number {
  schema: NodeSchema,
}

impl Number {
  pub fn new() -> Self {
    Self {
      schema: NodeSchema::new()
        .output(PortSpec::new("value", DataType::Number))
        .param(ParamSpec::new("value", DataType::Number, json!(0.0))),
    }
  }
}

impl Default for Number {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl NodeDefinition for Number {
  fn schema(&self) -> &NodeSchema {
    &self.schema
  }

  async fn execute(
    &self,
    _inputs: &NodeInputs,
    params: &Parameters,
    _ctx: &NodeContext<'_>,
  ) -> Result<NodeOutputs, NodeError> {
    Ok(single("value", Value::Number(params.number_or("value", 0.0))))
  }
}

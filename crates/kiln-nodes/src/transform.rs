use async_trait::async_trait;
use kiln_config::Parameters;
use kiln_graph::{DataType, NodeSchema, ParamSpec, PortSpec};
use kiln_runtime::{
  NodeContext, NodeDefinition, NodeError, NodeInputs, NodeOutputs, TRANSFORM_PARAMS, Texture, Value,
};
use serde_json::json;

use crate::single;

/// Places its input with a translate, rotate, scale, skew and pivot
/// transform. Pixels are never touched here; the transform stays pending
/// until a spatially coherent consumer bakes it.
pub struct Transform {
  schema: NodeSchema,
}

impl Transform {
  pub fn new() -> Self {
    let mut schema = NodeSchema::new()
      .input(PortSpec::new("image", DataType::Image))
      .output(PortSpec::new("image", DataType::Image))
      .with_local_transform();
    // Pivot falls back to the engine's default pivot, so it has no schema default.
    for name in TRANSFORM_PARAMS.into_iter().filter(|n| !n.starts_with("pivot")) {
      let default = match name {
        "scale_x" | "scale_y" => json!(1.0),
        _ => json!(0.0),
      };
      schema = schema.param(ParamSpec::new(name, DataType::Number, default));
    }
    Self { schema }
  }
}

impl Default for Transform {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl NodeDefinition for Transform {
  fn schema(&self) -> &NodeSchema {
    &self.schema
  }

  async fn execute(
    &self,
    inputs: &NodeInputs,
    params: &Parameters,
    ctx: &NodeContext<'_>,
  ) -> Result<NodeOutputs, NodeError> {
    let input = inputs.texture("image")?;
    let (width, height) = input.dimensions();
    ctx.resources().retain(input.handle.id)?;
    let output = Texture {
      handle: input.handle,
      transform: ctx.local_transform(params, width, height) * input.transform,
      base_transform: input.transform,
    };
    Ok(single("image", Value::Texture(output)))
  }
}

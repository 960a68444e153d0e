use async_trait::async_trait;
use kiln_config::Parameters;
use kiln_graph::{DataType, NodeSchema, ParamSpec, PortSpec};
use kiln_resource::{Color, Uniform, Uniforms};
use kiln_runtime::{
  NodeContext, NodeDefinition, NodeError, NodeInputs, NodeOutputs, ParamsExt, Texture, Value,
};
use serde_json::json;

use crate::single;

/// Uniform color image.
pub struct Solid {
  schema: NodeSchema,
}

impl Solid {
  pub fn new() -> Self {
    Self {
      schema: NodeSchema::new()
        .output(PortSpec::new("image", DataType::Image))
        .param(ParamSpec::new("color", DataType::Color, json!([0.0, 0.0, 0.0, 1.0])))
        .param(ParamSpec::new("width", DataType::Number, json!(256)))
        .param(ParamSpec::new("height", DataType::Number, json!(256))),
    }
  }
}

impl Default for Solid {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl NodeDefinition for Solid {
  fn schema(&self) -> &NodeSchema {
    &self.schema
  }

  async fn execute(
    &self,
    _inputs: &NodeInputs,
    params: &Parameters,
    ctx: &NodeContext<'_>,
  ) -> Result<NodeOutputs, NodeError> {
    let color = params.color("color").unwrap_or(Color::BLACK);
    let width = params.number_or("width", 256.0).max(1.0) as u32;
    let height = params.number_or("height", 256.0).max(1.0) as u32;

    let handle = ctx.resources().create_empty(width, height)?;
    let uniforms = Uniforms::from([("color".to_string(), Uniform::Color(color))]);
    if let Err(e) = ctx.resources().render_using_program("fill", &uniforms, &handle) {
      ctx.resources().release(handle.id)?;
      return Err(e.into());
    }
    Ok(single("image", Value::Texture(Texture::new(handle))))
  }
}

use async_trait::async_trait;
use kiln_config::Parameters;
use kiln_graph::{DataType, NodeSchema, PortSpec};
use kiln_runtime::{NodeContext, NodeDefinition, NodeError, NodeInputs, NodeOutputs, Texture, Value};
use serde_json::json;

use crate::{pass_through, single};

/// Adds `amount` (in `-1.0..=1.0` of full scale) to every color channel.
///
/// Pointwise, so any pending transform on the input is carried through to
/// the output unchanged.
pub struct Brightness {
  schema: NodeSchema,
}

impl Brightness {
  pub fn new() -> Self {
    Self {
      schema: NodeSchema::new()
        .input(PortSpec::new("image", DataType::Image))
        .input(
          PortSpec::new("amount", DataType::Number)
            .optional()
            .with_default(json!(0.0)),
        )
        .output(PortSpec::new("image", DataType::Image)),
    }
  }
}

impl Default for Brightness {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl NodeDefinition for Brightness {
  fn schema(&self) -> &NodeSchema {
    &self.schema
  }

  async fn execute(
    &self,
    inputs: &NodeInputs,
    _params: &Parameters,
    ctx: &NodeContext<'_>,
  ) -> Result<NodeOutputs, NodeError> {
    let input = inputs.texture("image")?;
    let amount = inputs.number("amount").unwrap_or(0.0).clamp(-1.0, 1.0);
    let delta = (amount * 255.0).round() as i32;
    if delta == 0 {
      return Ok(single("image", pass_through(ctx, input)?));
    }

    let pixels = ctx.resources().download(&input.handle)?;
    let adjusted = image::imageops::brighten(&pixels, delta);
    let handle = ctx.resources().create_from_pixels(&adjusted)?;
    Ok(single(
      "image",
      Value::Texture(Texture {
        handle,
        transform: input.transform,
        base_transform: input.transform,
      }),
    ))
  }
}

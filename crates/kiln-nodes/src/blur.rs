use async_trait::async_trait;
use kiln_config::Parameters;
use kiln_graph::{DataType, NodeSchema, ParamSpec, PortSpec};
use kiln_runtime::{NodeContext, NodeDefinition, NodeError, NodeInputs, NodeOutputs, ParamsExt};
use kurbo::Affine;
use serde_json::json;
use tracing::debug;

use crate::{pass_through, single, upload};

/// Gaussian blur. Samples neighbours, so its input must be baked first.
pub struct Blur {
  schema: NodeSchema,
}

impl Blur {
  pub fn new() -> Self {
    Self {
      schema: NodeSchema::new()
        .input(PortSpec::new("image", DataType::Image))
        .output(PortSpec::new("image", DataType::Image))
        .param(ParamSpec::new("radius", DataType::Number, json!(2.0)))
        .with_spatial_coherence(),
    }
  }
}

impl Default for Blur {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl NodeDefinition for Blur {
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
    let radius = params.number_or("radius", 2.0) as f32;
    if radius <= 0.0 {
      return Ok(single("image", pass_through(ctx, input)?));
    }

    let pixels = ctx.resources().download(&input.handle)?;
    ctx.report_progress(0.25);
    let blurred = tokio::task::spawn_blocking(move || image::imageops::blur(&pixels, radius))
      .await
      .map_err(|e| NodeError::with_source("blur task failed", e))?;
    ctx.report_progress(0.75);

    if ctx.is_cancelled() {
      return Err(NodeError::new("cancelled"));
    }
    debug!(node_id = ctx.node_id(), radius, "blur_applied");
    Ok(single("image", upload(ctx, &blurred, Affine::IDENTITY)?))
  }
}

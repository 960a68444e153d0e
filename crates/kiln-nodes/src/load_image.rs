use async_trait::async_trait;
use kiln_config::Parameters;
use kiln_graph::{DataType, NodeSchema, ParamSpec, PortSpec};
use kiln_runtime::{NodeContext, NodeDefinition, NodeError, NodeInputs, NodeOutputs, ParamsExt};
use kurbo::Affine;
use serde_json::json;
use tracing::debug;

use crate::{single, upload};

/// Decodes an image file from the `path` parameter.
pub struct LoadImage {
  schema: NodeSchema,
}

impl LoadImage {
  pub fn new() -> Self {
    Self {
      schema: NodeSchema::new()
        .output(PortSpec::new("image", DataType::Image))
        .param(ParamSpec::new("path", DataType::String, json!(""))),
    }
  }
}

impl Default for LoadImage {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl NodeDefinition for LoadImage {
  fn schema(&self) -> &NodeSchema {
    &self.schema
  }

  async fn execute(
    &self,
    _inputs: &NodeInputs,
    params: &Parameters,
    ctx: &NodeContext<'_>,
  ) -> Result<NodeOutputs, NodeError> {
    let path = params
      .text("path")
      .filter(|p| !p.is_empty())
      .ok_or_else(|| NodeError::new("parameter 'path' is not set"))?
      .to_string();

    let decoded = tokio::task::spawn_blocking({
      let path = path.clone();
      move || image::open(&path)
    })
    .await
    .map_err(|e| NodeError::with_source("image decoding task failed", e))?
    .map_err(|e| NodeError::with_source(format!("failed to load '{}'", path), e))?;

    let pixels = decoded.to_rgba8();
    debug!(path = %path, width = pixels.width(), height = pixels.height(), "image_loaded");
    Ok(single("image", upload(ctx, &pixels, Affine::IDENTITY)?))
  }
}

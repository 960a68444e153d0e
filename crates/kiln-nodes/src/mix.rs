use async_trait::async_trait;
use image::{Rgba, RgbaImage, imageops::FilterType};
use kiln_config::Parameters;
use kiln_graph::{DataType, NodeSchema, PortSpec};
use kiln_runtime::{NodeContext, NodeDefinition, NodeError, NodeInputs, NodeOutputs};
use kurbo::Affine;
use serde_json::json;

use crate::{single, upload};

/// Linear blend of `a` and `b` by `factor`. The output takes the size of
/// `a`; `b` is resized to match when needed.
pub struct Mix {
  schema: NodeSchema,
}

impl Mix {
  pub fn new() -> Self {
    Self {
      schema: NodeSchema::new()
        .input(PortSpec::new("a", DataType::Image))
        .input(PortSpec::new("b", DataType::Image))
        .input(
          PortSpec::new("factor", DataType::Number)
            .optional()
            .with_default(json!(0.5)),
        )
        .output(PortSpec::new("image", DataType::Image))
        .with_spatial_coherence(),
    }
  }
}

impl Default for Mix {
  fn default() -> Self {
    Self::new()
  }
}

fn blend(a: &RgbaImage, b: &RgbaImage, factor: f32) -> RgbaImage {
  RgbaImage::from_fn(a.width(), a.height(), |x, y| {
    let pa = a.get_pixel(x, y).0;
    let pb = b.get_pixel(x, y).0;
    let mut out = [0u8; 4];
    for i in 0..4 {
      let v = pa[i] as f32 + (pb[i] as f32 - pa[i] as f32) * factor;
      out[i] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
  })
}

#[async_trait]
impl NodeDefinition for Mix {
  fn schema(&self) -> &NodeSchema {
    &self.schema
  }

  async fn execute(
    &self,
    inputs: &NodeInputs,
    _params: &Parameters,
    ctx: &NodeContext<'_>,
  ) -> Result<NodeOutputs, NodeError> {
    let a = inputs.texture("a")?;
    let b = inputs.texture("b")?;
    let factor = inputs.number("factor").unwrap_or(0.5).clamp(0.0, 1.0) as f32;

    let pa = ctx.resources().download(&a.handle)?;
    let mut pb = ctx.resources().download(&b.handle)?;
    if pb.dimensions() != pa.dimensions() {
      pb = image::imageops::resize(&pb, pa.width(), pa.height(), FilterType::Triangle);
    }

    let mixed = blend(&pa, &pb, factor);
    Ok(single("image", upload(ctx, &mixed, Affine::IDENTITY)?))
  }
}

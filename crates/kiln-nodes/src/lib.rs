//! Kiln Nodes
//!
//! Reference node definitions used by the `kiln` CLI and by integration
//! tests. Every node follows the ownership rule of
//! [`NodeDefinition`](kiln_runtime::NodeDefinition): outputs are fresh
//! textures or retained pass-throughs, never mutated inputs.

mod blur;
mod brightness;
mod load_image;
mod mix;
mod number;
mod solid;
mod transform;

use image::RgbaImage;
use kiln_runtime::{NodeContext, NodeError, NodeOutputs, NodeRegistry, Texture, Value};
use kurbo::Affine;

pub use blur::Blur;
pub use brightness::Brightness;
pub use load_image::LoadImage;
pub use mix::Mix;
pub use number::Number;
pub use solid::Solid;
pub use transform::Transform;

/// A registry holding every node in this crate under its type tag.
pub fn registry() -> NodeRegistry {
  let mut registry = NodeRegistry::new();
  registry.register("solid", Solid::new());
  registry.register("load_image", LoadImage::new());
  registry.register("number", Number::new());
  registry.register("transform", Transform::new());
  registry.register("blur", Blur::new());
  registry.register("brightness", Brightness::new());
  registry.register("mix", Mix::new());
  registry
}

fn single(port: &str, value: Value) -> NodeOutputs {
  NodeOutputs::from([(port.to_string(), value)])
}

/// Upload `pixels` as a texture carrying `transform` as both current and
/// base transform.
fn upload(ctx: &NodeContext<'_>, pixels: &RgbaImage, transform: Affine) -> Result<Value, NodeError> {
  let handle = ctx.resources().create_from_pixels(pixels)?;
  Ok(Value::Texture(Texture {
    handle,
    transform,
    base_transform: transform,
  }))
}

/// Pass `texture` through unchanged, taking a reference for the output.
fn pass_through(ctx: &NodeContext<'_>, texture: &Texture) -> Result<Value, NodeError> {
  ctx.resources().retain(texture.handle.id)?;
  Ok(Value::Texture(*texture))
}

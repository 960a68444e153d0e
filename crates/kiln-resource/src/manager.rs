use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::ResourceError;
use crate::program::Uniforms;

pub type ResourceId = u64;

/// Opaque reference to a texture living in a resource context.
///
/// Copying a handle does not take a reference; ownership is tracked through
/// [`ResourceManager::retain`] and [`ResourceManager::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceHandle {
  pub id: ResourceId,
  pub width: u32,
  pub height: u32,
}

/// The rendering context contract required by the engine.
///
/// Implementations are shared between the engine and node compute routines,
/// so every method takes `&self`.
pub trait ResourceManager: Send + Sync {
  /// Upload a pixel buffer. The new handle has a reference count of one.
  fn create_from_pixels(&self, pixels: &RgbaImage) -> Result<ResourceHandle, ResourceError>;

  /// Allocate a transparent texture. The new handle has a reference count of
  /// one.
  fn create_empty(&self, width: u32, height: u32) -> Result<ResourceHandle, ResourceError>;

  /// Add a reference. Returns the new count.
  fn retain(&self, id: ResourceId) -> Result<u32, ResourceError>;

  /// Drop a reference, freeing the texture at zero. Returns the new count.
  fn release(&self, id: ResourceId) -> Result<u32, ResourceError>;

  /// Read a texture back into host memory.
  fn download(&self, handle: &ResourceHandle) -> Result<RgbaImage, ResourceError>;

  /// Run a named program, writing into `output`.
  fn render_using_program(
    &self,
    program: &str,
    uniforms: &Uniforms,
    output: &ResourceHandle,
  ) -> Result<(), ResourceError>;

  /// Current reference count, or `None` if the texture is not live.
  fn ref_count(&self, id: ResourceId) -> Option<u32>;

  /// Free every live texture and shut the context down.
  fn dispose(&self) -> Result<(), ResourceError>;
}

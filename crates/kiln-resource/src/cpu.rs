//! Host-memory resource context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use image::RgbaImage;
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::error::ResourceError;
use crate::manager::{ResourceHandle, ResourceId, ResourceManager};
use crate::program::{AffineResample, Fill, Program, ProgramInputs, Uniform, Uniforms};

/// Lifetime counters for a resource context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceStats {
  pub created: u64,
  pub retained: u64,
  pub released: u64,
  pub freed: u64,
  pub live: usize,
  /// Textures still live when the context was disposed.
  pub leaked: u64,
}

#[derive(Default)]
struct State {
  next_id: ResourceId,
  pixels: HashMap<ResourceId, RgbaImage>,
  ref_counts: HashMap<ResourceId, u32>,
  stats: ResourceStats,
  disposed: bool,
}

impl State {
  fn check(&self) -> Result<(), ResourceError> {
    if self.disposed {
      Err(ResourceError::Disposed)
    } else {
      Ok(())
    }
  }

  fn insert(&mut self, pixels: RgbaImage) -> ResourceHandle {
    self.next_id += 1;
    let id = self.next_id;
    let handle = ResourceHandle {
      id,
      width: pixels.width(),
      height: pixels.height(),
    };
    self.pixels.insert(id, pixels);
    self.ref_counts.insert(id, 1);
    self.stats.created += 1;
    self.stats.live = self.pixels.len();
    trace!(resource_id = id, width = handle.width, height = handle.height, "resource_created");
    handle
  }
}

/// A [`ResourceManager`] that keeps textures as [`RgbaImage`]s.
pub struct CpuResourceManager {
  state: Mutex<State>,
  programs: RwLock<HashMap<String, Arc<dyn Program>>>,
}

impl CpuResourceManager {
  pub fn new() -> Self {
    let mut programs: HashMap<String, Arc<dyn Program>> = HashMap::new();
    programs.insert("fill".to_string(), Arc::new(Fill));
    programs.insert("affine_resample".to_string(), Arc::new(AffineResample));
    Self {
      state: Mutex::new(State::default()),
      programs: RwLock::new(programs),
    }
  }

  /// Register (or replace) a named program.
  pub fn register_program(&self, name: impl Into<String>, program: impl Program + 'static) {
    self
      .programs
      .write()
      .unwrap()
      .insert(name.into(), Arc::new(program));
  }

  pub fn stats(&self) -> ResourceStats {
    self.state.lock().unwrap().stats
  }

  pub fn is_disposed(&self) -> bool {
    self.state.lock().unwrap().disposed
  }
}

impl Default for CpuResourceManager {
  fn default() -> Self {
    Self::new()
  }
}

impl ResourceManager for CpuResourceManager {
  fn create_from_pixels(&self, pixels: &RgbaImage) -> Result<ResourceHandle, ResourceError> {
    if pixels.width() == 0 || pixels.height() == 0 {
      return Err(ResourceError::InvalidDimensions {
        width: pixels.width(),
        height: pixels.height(),
      });
    }
    let mut state = self.state.lock().unwrap();
    state.check()?;
    Ok(state.insert(pixels.clone()))
  }

  fn create_empty(&self, width: u32, height: u32) -> Result<ResourceHandle, ResourceError> {
    if width == 0 || height == 0 {
      return Err(ResourceError::InvalidDimensions { width, height });
    }
    let mut state = self.state.lock().unwrap();
    state.check()?;
    Ok(state.insert(RgbaImage::new(width, height)))
  }

  fn retain(&self, id: ResourceId) -> Result<u32, ResourceError> {
    let mut state = self.state.lock().unwrap();
    state.check()?;
    let count = state
      .ref_counts
      .get_mut(&id)
      .ok_or(ResourceError::UnknownResource(id))?;
    *count += 1;
    let count = *count;
    state.stats.retained += 1;
    Ok(count)
  }

  fn release(&self, id: ResourceId) -> Result<u32, ResourceError> {
    let mut state = self.state.lock().unwrap();
    state.check()?;
    let count = state
      .ref_counts
      .get_mut(&id)
      .ok_or(ResourceError::UnknownResource(id))?;
    *count -= 1;
    let count = *count;
    state.stats.released += 1;
    if count == 0 {
      state.ref_counts.remove(&id);
      state.pixels.remove(&id);
      state.stats.freed += 1;
      state.stats.live = state.pixels.len();
      trace!(resource_id = id, "resource_freed");
    }
    Ok(count)
  }

  fn download(&self, handle: &ResourceHandle) -> Result<RgbaImage, ResourceError> {
    let state = self.state.lock().unwrap();
    state.check()?;
    state
      .pixels
      .get(&handle.id)
      .cloned()
      .ok_or(ResourceError::UnknownResource(handle.id))
  }

  fn render_using_program(
    &self,
    program: &str,
    uniforms: &Uniforms,
    output: &ResourceHandle,
  ) -> Result<(), ResourceError> {
    let renderer = self
      .programs
      .read()
      .unwrap()
      .get(program)
      .cloned()
      .ok_or_else(|| ResourceError::UnknownProgram(program.to_string()))?;

    let aliased = uniforms
      .iter()
      .find(|(_, u)| matches!(u, Uniform::Texture(id) if *id == output.id));
    if let Some((name, _)) = aliased {
      return Err(ResourceError::InvalidUniform {
        program: program.to_string(),
        name: name.clone(),
      });
    }

    let mut state = self.state.lock().unwrap();
    state.check()?;
    let mut target = state
      .pixels
      .remove(&output.id)
      .ok_or(ResourceError::UnknownResource(output.id))?;

    let result = {
      let inputs = ProgramInputs::new(program, uniforms, &state.pixels);
      renderer.render(&inputs, &mut target)
    };
    state.pixels.insert(output.id, target);
    debug!(program, resource_id = output.id, ok = result.is_ok(), "program_rendered");
    result
  }

  fn ref_count(&self, id: ResourceId) -> Option<u32> {
    self.state.lock().unwrap().ref_counts.get(&id).copied()
  }

  fn dispose(&self) -> Result<(), ResourceError> {
    let mut state = self.state.lock().unwrap();
    state.check()?;
    let leaked = state.pixels.len();
    state.stats.freed += leaked as u64;
    state.stats.leaked += leaked as u64;
    state.pixels.clear();
    state.ref_counts.clear();
    state.stats.live = 0;
    state.disposed = true;
    info!(leaked, "resource_context_disposed");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use image::Rgba;

  use super::*;
  use crate::color::Color;

  #[test]
  fn test_refcount_lifecycle() {
    let rm = CpuResourceManager::new();
    let h = rm.create_empty(2, 2).unwrap();
    assert_eq!(rm.ref_count(h.id), Some(1));
    assert_eq!(rm.retain(h.id).unwrap(), 2);
    assert_eq!(rm.release(h.id).unwrap(), 1);
    assert_eq!(rm.release(h.id).unwrap(), 0);
    assert_eq!(rm.ref_count(h.id), None);
    assert!(matches!(rm.release(h.id), Err(ResourceError::UnknownResource(_))));

    let stats = rm.stats();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.freed, 1);
    assert_eq!(stats.live, 0);
  }

  #[test]
  fn test_fill_and_download() {
    let rm = CpuResourceManager::new();
    let h = rm.create_empty(3, 2).unwrap();
    let mut u = Uniforms::new();
    u.insert("color".into(), Uniform::Color(Color::rgba(0.0, 1.0, 0.0, 1.0)));
    rm.render_using_program("fill", &u, &h).unwrap();
    let img = rm.download(&h).unwrap();
    assert_eq!(img.dimensions(), (3, 2));
    assert!(img.pixels().all(|p| p.0 == [0, 255, 0, 255]));
  }

  struct Invert;

  impl Program for Invert {
    fn render(&self, inputs: &ProgramInputs<'_>, out: &mut RgbaImage) -> Result<(), ResourceError> {
      let src = inputs.texture("source")?;
      for (x, y, p) in out.enumerate_pixels_mut() {
        let Rgba([r, g, b, a]) = *src.get_pixel(x, y);
        *p = Rgba([255 - r, 255 - g, 255 - b, a]);
      }
      Ok(())
    }
  }

  #[test]
  fn test_custom_program() {
    let rm = CpuResourceManager::new();
    rm.register_program("invert", Invert);
    let src = rm
      .create_from_pixels(&RgbaImage::from_pixel(1, 1, Rgba([10, 20, 30, 255])))
      .unwrap();
    let dst = rm.create_empty(1, 1).unwrap();
    let mut u = Uniforms::new();
    u.insert("source".into(), Uniform::Texture(src.id));
    rm.render_using_program("invert", &u, &dst).unwrap();
    assert_eq!(rm.download(&dst).unwrap().get_pixel(0, 0).0, [245, 235, 225, 255]);
  }

  #[test]
  fn test_aliased_output_rejected() {
    let rm = CpuResourceManager::new();
    let h = rm.create_empty(1, 1).unwrap();
    let mut u = Uniforms::new();
    u.insert("source".into(), Uniform::Texture(h.id));
    u.insert("matrix".into(), Uniform::Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]));
    let err = rm.render_using_program("affine_resample", &u, &h).unwrap_err();
    assert!(matches!(err, ResourceError::InvalidUniform { .. }));
    assert!(rm.download(&h).is_ok());
  }

  #[test]
  fn test_unknown_program() {
    let rm = CpuResourceManager::new();
    let h = rm.create_empty(1, 1).unwrap();
    let err = rm.render_using_program("nope", &Uniforms::new(), &h).unwrap_err();
    assert!(matches!(err, ResourceError::UnknownProgram(_)));
  }

  #[test]
  fn test_dispose_frees_everything_and_closes() {
    let rm = CpuResourceManager::new();
    rm.create_empty(1, 1).unwrap();
    rm.create_empty(1, 1).unwrap();
    rm.dispose().unwrap();
    assert!(rm.is_disposed());
    assert_eq!(rm.stats().live, 0);
    assert_eq!(rm.stats().freed, 2);
    assert_eq!(rm.stats().leaked, 2);
    assert!(matches!(rm.create_empty(1, 1), Err(ResourceError::Disposed)));
  }

  #[test]
  fn test_zero_sized_texture_rejected() {
    let rm = CpuResourceManager::new();
    assert!(matches!(
      rm.create_empty(0, 4),
      Err(ResourceError::InvalidDimensions { .. })
    ));
  }
}

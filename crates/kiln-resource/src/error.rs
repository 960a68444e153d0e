use thiserror::Error;

use crate::manager::ResourceId;

/// Errors raised by a resource manager.
#[derive(Debug, Error)]
pub enum ResourceError {
  #[error("unknown resource {0}")]
  UnknownResource(ResourceId),

  #[error("unknown program '{0}'")]
  UnknownProgram(String),

  #[error("program '{program}' is missing uniform '{name}'")]
  MissingUniform { program: String, name: String },

  #[error("program '{program}': uniform '{name}' has the wrong type")]
  InvalidUniform { program: String, name: String },

  #[error("invalid texture dimensions {width}x{height}")]
  InvalidDimensions { width: u32, height: u32 },

  #[error("resource context has been disposed")]
  Disposed,
}

//! Kiln Resource
//!
//! Render resources (textures) are opaque, reference-counted objects owned by
//! a single rendering context. This crate defines the [`ResourceManager`]
//! contract the execution engine drives, and [`CpuResourceManager`], an
//! implementation that keeps pixels in host memory.
//!
//! # Ownership
//!
//! `create_from_pixels` and `create_empty` return a handle with a reference
//! count of one. Every `retain` must be balanced by a `release`; the texture is
//! freed exactly when its count reaches zero. `dispose` frees whatever is left
//! and shuts the context down.

mod color;
mod cpu;
mod error;
mod manager;
mod program;

pub use color::Color;
pub use cpu::{CpuResourceManager, ResourceStats};
pub use error::ResourceError;
pub use manager::{ResourceHandle, ResourceId, ResourceManager};
pub use program::{AffineResample, Fill, Program, ProgramInputs, Uniform, Uniforms};

pub use image::RgbaImage;

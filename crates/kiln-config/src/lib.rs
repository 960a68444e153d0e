//! Kiln Config
//!
//! This crate contains the serializable types for kiln node graphs and engine
//! settings. These types represent a graph document before it is loaded into
//! the in-memory `kiln-graph` representation.
//!
//! Documents can be loaded from:
//! - JSON files (via the CLI, `kiln run graph.json`)
//! - Any other JSON source (editor state, project files) via `serde_json`
//!
//! The engine never mutates these types; the graph store converts them into a
//! `Graph` and back.

mod edge;
mod error;
mod graph;
mod node;
mod settings;

pub use edge::EdgeDef;
pub use error::ConfigError;
pub use graph::GraphDef;
pub use node::{NodeDef, Parameters};
pub use settings::EngineSettings;

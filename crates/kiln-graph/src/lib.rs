//! Kiln Graph
//!
//! This crate provides the in-memory node graph used by the kiln execution
//! engine, together with the structural algorithms the engine relies on:
//!
//! - [`Graph`]: nodes and port-to-port edges, with single-producer inputs
//! - [`NodeSchema`] / [`SchemaLookup`]: port and parameter schemas of node types
//! - Dependency ordering (Kahn's algorithm) with cycle reporting and
//!   reachability queries
//! - [`validate`]: pre-execution structural and type checks
//!
//! The graph is owned by the surrounding editor. The engine only reads it.

mod error;
mod graph;
mod node;
mod schema;
mod sort;
mod types;
mod validate;

pub use error::GraphError;
pub use graph::Graph;
pub use node::{Edge, Node};
pub use schema::{NodeSchema, ParamSpec, PortSpec, SchemaLookup};
pub use sort::TopologicalOrder;
pub use types::DataType;
pub use validate::{IssueKind, Severity, ValidationIssue, ValidationReport, validate};

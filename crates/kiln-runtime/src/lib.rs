//! Kiln Runtime
//!
//! The dataflow execution engine. Given a [`Graph`](kiln_graph::Graph) and a
//! [`NodeRegistry`], the [`Engine`] validates the graph, executes nodes one at
//! a time in dependency order, caches their outputs, and re-executes only what
//! an edit invalidates.
//!
//! # Runs
//!
//! - [`Engine::run_full`]: every node, skipping cache hits
//! - [`Engine::run_partial`]: dirty nodes and everything downstream
//! - [`Engine::execute_node_lazy`]: one node against cached upstream outputs,
//!   served by the transform fast path when the edit allows it
//!
//! Cancellation is cooperative. A cancelled run returns
//! [`RunOutcome::Aborted`] and leaves the cache exactly as it was.

mod cache;
mod context;
mod definition;
mod engine;
mod error;
mod events;
mod execute;
mod fast_path;
mod state;
mod transform;
mod value;

pub use cache::{CacheTransaction, OutputCache};
pub use context::NodeContext;
pub use definition::{NodeDefinition, NodeInputs, NodeRegistry, ParamsExt};
pub use engine::{Engine, RunOutcome, RunReport};
pub use error::{NodeError, RuntimeError};
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use state::{NodeRuntimeState, NodeStatus};
pub use transform::{TRANSFORM_PARAMS, is_transform_only_edit, local_transform};
pub use value::{
  NodeOutputs, Texture, Value, ValueSnapshot, color_from_json, snapshot_outputs, value_from_json,
};

pub use tokio_util::sync::CancellationToken;

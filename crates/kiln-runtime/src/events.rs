//! Execution events and notifiers.
//!
//! Events are emitted while the engine runs so a surrounding editor can show
//! per-node progress, inline errors, and run timing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::value::ValueSnapshot;

/// Events emitted during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// A run has started.
  ExecutionStarted { execution_id: String },

  /// A node has started executing.
  NodeStarted {
    execution_id: String,
    node_id: String,
  },

  /// A node reported progress in `0.0..=1.0`.
  NodeProgress {
    execution_id: String,
    node_id: String,
    progress: f32,
  },

  /// A node has completed successfully, or was updated by the fast path.
  NodeCompleted {
    execution_id: String,
    node_id: String,
    outputs: BTreeMap<String, ValueSnapshot>,
  },

  /// A node has failed.
  NodeFailed {
    execution_id: String,
    node_id: String,
    error: String,
  },

  /// A run has completed.
  ExecutionCompleted { execution_id: String, elapsed_ms: u64 },

  /// A run could not start or failed as a whole.
  ExecutionFailed { execution_id: String, error: String },

  /// A run was cancelled and its results discarded.
  ExecutionAborted { execution_id: String },
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` synchronously for each event; implementations
/// decide whether to forward, record, or drop them.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // NOTE: unbounded so a slow consumer never stalls a run. Volume is a handful
  // of events per node.
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

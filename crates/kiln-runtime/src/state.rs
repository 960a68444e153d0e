//! Per-node runtime state kept alongside the graph.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use kiln_config::Parameters;
use serde::Serialize;

use crate::value::ValueSnapshot;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
  #[default]
  Idle,
  Running,
  Complete,
  Error,
}

/// Runtime side table entry for one node.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeRuntimeState {
  pub status: NodeStatus,
  pub progress: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  /// Unix time in milliseconds at which the last execution started.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub started_at: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub elapsed_ms: Option<u64>,
  /// Parameters used by the last execution or fast-path update.
  #[serde(skip)]
  pub last_params: Option<Parameters>,
  /// Whether the last execution baked a pending transform on an input.
  pub baked: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub last_outputs: Option<BTreeMap<String, ValueSnapshot>>,
}

impl NodeRuntimeState {
  /// Back to `idle`, forgetting results and errors.
  pub(crate) fn reset(&mut self) {
    *self = NodeRuntimeState::default();
  }
}

pub(crate) fn unix_millis() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}

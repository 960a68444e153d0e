use std::sync::Arc;

use kiln_config::{EngineSettings, Parameters};
use kiln_resource::ResourceManager;
use kurbo::Affine;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheTransaction;
use crate::transform::local_transform;
use crate::value::Value;

/// What a compute routine can reach while it runs.
pub struct NodeContext<'a> {
  pub(crate) node_id: &'a str,
  pub(crate) execution_id: &'a str,
  pub(crate) cancel: &'a CancellationToken,
  pub(crate) resources: &'a Arc<dyn ResourceManager>,
  pub(crate) settings: &'a EngineSettings,
  pub(crate) txn: &'a CacheTransaction,
  pub(crate) progress: &'a (dyn Fn(f32) + Send + Sync),
}

impl NodeContext<'_> {
  pub fn node_id(&self) -> &str {
    self.node_id
  }

  pub fn execution_id(&self) -> &str {
    self.execution_id
  }

  pub fn cancel_token(&self) -> &CancellationToken {
    self.cancel
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  pub fn resources(&self) -> &dyn ResourceManager {
    self.resources.as_ref()
  }

  pub fn settings(&self) -> &EngineSettings {
    self.settings
  }

  /// Report progress in `0.0..=1.0`.
  pub fn report_progress(&self, progress: f32) {
    (self.progress)(progress.clamp(0.0, 1.0));
  }

  /// Read a private memo of this node. Textures are not retained.
  pub fn memo(&self, key: &str) -> Option<Value> {
    self.txn.get_memo(self.node_id, key)
  }

  /// Store a private memo. The cache takes ownership of a texture reference.
  pub fn set_memo(&self, key: &str, value: Value) {
    self.txn.set_memo(self.node_id, key, value);
  }

  /// This node's local transform for an image of `width x height`.
  pub fn local_transform(&self, params: &Parameters, width: u32, height: u32) -> Affine {
    local_transform(params, width, height, self.settings.default_pivot)
  }
}

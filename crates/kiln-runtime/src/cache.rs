//! Output cache.
//!
//! The cache exclusively owns stored outputs: each texture in a cached entry
//! holds one reference, released when the entry is evicted. A second
//! namespace keyed `node_id:key` stores node-private memos. Memos are not
//! touched by dirty invalidation and are only dropped with their node.
//!
//! Runs never write to the cache directly. They stage writes and evictions in
//! a [`CacheTransaction`] which either commits as a whole or rolls back,
//! leaving the committed entries untouched.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use kiln_resource::{ResourceError, ResourceManager};
use tracing::{debug, warn};

use crate::value::{NodeOutputs, Value};

fn memo_key(node_id: &str, key: &str) -> String {
  format!("{}:{}", node_id, key)
}

fn memo_prefix(node_id: &str) -> String {
  format!("{}:", node_id)
}

/// Release the texture held by `value`, if any.
pub(crate) fn release_value(resources: &dyn ResourceManager, value: &Value) {
  let Value::Texture(texture) = value else {
    return;
  };
  match resources.release(texture.handle.id) {
    Ok(_) => {}
    Err(ResourceError::UnknownResource(id)) => {
      panic!("cache released resource {} which is not live", id)
    }
    Err(e) => {
      warn!(resource_id = texture.handle.id, error = %e, "cache_release_failed");
    }
  }
}

pub(crate) fn release_outputs(resources: &dyn ResourceManager, outputs: &NodeOutputs) {
  for value in outputs.values() {
    release_value(resources, value);
  }
}

#[derive(Default)]
struct CacheInner {
  outputs: HashMap<String, NodeOutputs>,
  memos: HashMap<String, Value>,
}

impl CacheInner {
  fn remove_outputs(&mut self, resources: &dyn ResourceManager, node_id: &str) -> bool {
    match self.outputs.remove(node_id) {
      Some(outputs) => {
        release_outputs(resources, &outputs);
        true
      }
      None => false,
    }
  }

  fn remove_memos(&mut self, resources: &dyn ResourceManager, node_id: &str) {
    let prefix = memo_prefix(node_id);
    let keys: Vec<String> = self
      .memos
      .keys()
      .filter(|k| k.starts_with(&prefix))
      .cloned()
      .collect();
    for key in keys {
      if let Some(value) = self.memos.remove(&key) {
        release_value(resources, &value);
      }
    }
  }
}

/// Per-node output storage shared by the engine and its transactions.
#[derive(Clone)]
pub struct OutputCache {
  inner: Arc<Mutex<CacheInner>>,
  resources: Arc<dyn ResourceManager>,
}

impl OutputCache {
  pub fn new(resources: Arc<dyn ResourceManager>) -> Self {
    Self {
      inner: Arc::new(Mutex::new(CacheInner::default())),
      resources,
    }
  }

  /// A copy of the outputs cached for `node_id`. Textures are not retained.
  pub fn get(&self, node_id: &str) -> Option<NodeOutputs> {
    self.inner.lock().unwrap().outputs.get(node_id).cloned()
  }

  pub fn get_output(&self, node_id: &str, port_id: &str) -> Option<Value> {
    let inner = self.inner.lock().unwrap();
    inner.outputs.get(node_id)?.get(port_id).cloned()
  }

  pub fn contains(&self, node_id: &str) -> bool {
    self.inner.lock().unwrap().outputs.contains_key(node_id)
  }

  /// Store `outputs`, taking ownership of their texture references. A
  /// previous entry is released first.
  pub fn set(&self, node_id: &str, outputs: NodeOutputs) {
    let mut inner = self.inner.lock().unwrap();
    if let Some(previous) = inner.outputs.insert(node_id.to_string(), outputs) {
      release_outputs(self.resources.as_ref(), &previous);
    }
  }

  /// Evict a node's outputs and memos. Returns whether outputs were cached.
  pub fn delete(&self, node_id: &str) -> bool {
    let mut inner = self.inner.lock().unwrap();
    let removed = inner.remove_outputs(self.resources.as_ref(), node_id);
    inner.remove_memos(self.resources.as_ref(), node_id);
    debug!(node_id, removed, "cache_entry_deleted");
    removed
  }

  /// Evict a node's outputs, keeping its memos. Returns whether outputs were
  /// cached.
  pub fn invalidate(&self, node_id: &str) -> bool {
    let mut inner = self.inner.lock().unwrap();
    inner.remove_outputs(self.resources.as_ref(), node_id)
  }

  /// Evict everything.
  pub fn clear(&self) {
    let mut inner = self.inner.lock().unwrap();
    for outputs in inner.outputs.values() {
      release_outputs(self.resources.as_ref(), outputs);
    }
    for value in inner.memos.values() {
      release_value(self.resources.as_ref(), value);
    }
    inner.outputs.clear();
    inner.memos.clear();
  }

  pub fn get_memo(&self, node_id: &str, key: &str) -> Option<Value> {
    let inner = self.inner.lock().unwrap();
    inner.memos.get(&memo_key(node_id, key)).cloned()
  }

  /// Store a memo, taking ownership of its texture reference.
  pub fn set_memo(&self, node_id: &str, key: &str, value: Value) {
    let mut inner = self.inner.lock().unwrap();
    if let Some(previous) = inner.memos.insert(memo_key(node_id, key), value) {
      release_value(self.resources.as_ref(), &previous);
    }
  }

  /// Ids of nodes with cached outputs, sorted.
  pub fn node_ids(&self) -> Vec<String> {
    let mut ids: Vec<String> = self.inner.lock().unwrap().outputs.keys().cloned().collect();
    ids.sort_unstable();
    ids
  }

  pub fn len(&self) -> usize {
    self.inner.lock().unwrap().outputs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Mutable access to a cached entry, for the transform fast path only.
  pub(crate) fn with_entry_mut<R>(
    &self,
    node_id: &str,
    f: impl FnOnce(&mut NodeOutputs) -> R,
  ) -> Option<R> {
    let mut inner = self.inner.lock().unwrap();
    inner.outputs.get_mut(node_id).map(f)
  }

  pub fn transaction(&self) -> CacheTransaction {
    CacheTransaction {
      cache: self.clone(),
      state: Mutex::new(TxnState::default()),
    }
  }
}

#[derive(Default)]
struct TxnState {
  staged: HashMap<String, NodeOutputs>,
  evicted: HashSet<String>,
  memos: HashMap<String, Value>,
}

impl TxnState {
  fn drop_staged(&mut self, resources: &dyn ResourceManager, node_id: &str) {
    if let Some(outputs) = self.staged.remove(node_id) {
      release_outputs(resources, &outputs);
    }
  }
}

/// Staged cache writes and evictions of one run.
///
/// Reads see staged entries first, then committed entries that were not
/// evicted. Evictions only hide outputs; memos survive re-execution. Dropping
/// a transaction without committing rolls it back.
pub struct CacheTransaction {
  cache: OutputCache,
  state: Mutex<TxnState>,
}

impl CacheTransaction {
  pub fn get(&self, node_id: &str) -> Option<NodeOutputs> {
    let state = self.state.lock().unwrap();
    if let Some(outputs) = state.staged.get(node_id) {
      return Some(outputs.clone());
    }
    if state.evicted.contains(node_id) {
      return None;
    }
    self.cache.get(node_id)
  }

  pub fn get_output(&self, node_id: &str, port_id: &str) -> Option<Value> {
    let state = self.state.lock().unwrap();
    if let Some(outputs) = state.staged.get(node_id) {
      return outputs.get(port_id).cloned();
    }
    if state.evicted.contains(node_id) {
      return None;
    }
    self.cache.get_output(node_id, port_id)
  }

  pub fn contains(&self, node_id: &str) -> bool {
    let state = self.state.lock().unwrap();
    state.staged.contains_key(node_id)
      || (!state.evicted.contains(node_id) && self.cache.contains(node_id))
  }

  /// Hide the committed outputs of `node_id` and drop outputs staged for it.
  pub fn evict(&self, node_id: &str) {
    let mut state = self.state.lock().unwrap();
    state.drop_staged(self.cache.resources.as_ref(), node_id);
    state.evicted.insert(node_id.to_string());
  }

  /// Stage `outputs` for `node_id`, replacing any committed entry on commit.
  pub fn stage(&self, node_id: &str, outputs: NodeOutputs) {
    let mut state = self.state.lock().unwrap();
    if let Some(previous) = state.staged.insert(node_id.to_string(), outputs) {
      release_outputs(self.cache.resources.as_ref(), &previous);
    }
    state.evicted.insert(node_id.to_string());
  }

  pub fn get_memo(&self, node_id: &str, key: &str) -> Option<Value> {
    let state = self.state.lock().unwrap();
    if let Some(value) = state.memos.get(&memo_key(node_id, key)) {
      return Some(value.clone());
    }
    self.cache.get_memo(node_id, key)
  }

  pub fn set_memo(&self, node_id: &str, key: &str, value: Value) {
    let mut state = self.state.lock().unwrap();
    if let Some(previous) = state.memos.insert(memo_key(node_id, key), value) {
      release_value(self.cache.resources.as_ref(), &previous);
    }
  }

  /// Ids evicted or staged so far.
  pub fn touched(&self) -> HashSet<String> {
    self.state.lock().unwrap().evicted.clone()
  }

  /// Apply evictions (releasing their handles), then hand staged entries to
  /// the cache.
  pub fn commit(self) {
    let state = std::mem::take(&mut *self.state.lock().unwrap());
    let resources = self.cache.resources.as_ref();
    let mut inner = self.cache.inner.lock().unwrap();

    for node_id in &state.evicted {
      inner.remove_outputs(resources, node_id);
    }
    for (node_id, outputs) in state.staged {
      inner.outputs.insert(node_id, outputs);
    }
    for (key, value) in state.memos {
      if let Some(previous) = inner.memos.insert(key, value) {
        release_value(resources, &previous);
      }
    }
  }

  /// Release everything staged. Committed entries are untouched.
  pub fn rollback(self) {
    drop(self);
  }
}

impl Drop for CacheTransaction {
  fn drop(&mut self) {
    let state = match self.state.get_mut() {
      Ok(state) => std::mem::take(state),
      Err(poisoned) => std::mem::take(poisoned.into_inner()),
    };
    let resources = self.cache.resources.as_ref();
    for outputs in state.staged.values() {
      release_outputs(resources, outputs);
    }
    for value in state.memos.values() {
      release_value(resources, value);
    }
  }
}

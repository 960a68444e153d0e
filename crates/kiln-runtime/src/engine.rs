//! Execution engine.
//!
//! The [`Engine`] owns the output cache, the per-node runtime state, and the
//! resource context for its whole lifetime. It reads graphs by reference and
//! never mutates them.
//!
//! All runs are serialized behind one async run lock, so nodes never execute
//! concurrently. Starting a single-node lazy run cancels the previous lazy
//! run before waiting for the lock; full and partial runs are never
//! preempted by a lazy request and simply wait their turn.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use kiln_config::EngineSettings;
use kiln_graph::{Graph, ValidationReport, validate};
use kiln_resource::ResourceManager;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{CacheTransaction, OutputCache};
use crate::definition::{NodeRegistry, effective_params};
use crate::error::RuntimeError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::execute::NodeOutcome;
use crate::state::{NodeRuntimeState, NodeStatus};
use crate::value::NodeOutputs;

/// Summary of a completed run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
  pub execution_id: String,
  /// Nodes whose compute routine ran and succeeded.
  pub executed: Vec<String>,
  pub cache_hits: Vec<String>,
  pub failed: Vec<String>,
  /// Dependents of failed nodes, left idle.
  pub skipped: Vec<String>,
  /// Nodes updated by the transform fast path instead of executing.
  pub fast_path: Vec<String>,
  /// Nodes that baked a pending transform on one of their inputs.
  pub baked: Vec<String>,
  pub elapsed_ms: u64,
}

/// Result of a run that was allowed to start.
#[derive(Debug, Clone)]
pub enum RunOutcome {
  Completed(RunReport),
  /// The run was cancelled; nothing it produced reached the cache.
  Aborted,
}

impl RunOutcome {
  pub fn is_aborted(&self) -> bool {
    matches!(self, RunOutcome::Aborted)
  }

  pub fn report(&self) -> Option<&RunReport> {
    match self {
      RunOutcome::Completed(report) => Some(report),
      RunOutcome::Aborted => None,
    }
  }
}

/// Working state of one run.
pub(crate) struct Run<'a> {
  pub(crate) execution_id: String,
  pub(crate) graph: &'a Graph,
  pub(crate) cancel: CancellationToken,
  pub(crate) txn: CacheTransaction,
  pub(crate) report: RunReport,
  /// Failed or skipped nodes whose dependents must be skipped.
  pub(crate) blocked: HashSet<String>,
  started: Instant,
}

impl<'a> Run<'a> {
  fn new(execution_id: String, graph: &'a Graph, cancel: CancellationToken, txn: CacheTransaction) -> Self {
    Self {
      report: RunReport {
        execution_id: execution_id.clone(),
        ..Default::default()
      },
      execution_id,
      graph,
      cancel,
      txn,
      blocked: HashSet::new(),
      started: Instant::now(),
    }
  }
}

/// The dataflow execution engine.
pub struct Engine {
  pub(crate) registry: NodeRegistry,
  pub(crate) resources: Arc<dyn ResourceManager>,
  pub(crate) settings: EngineSettings,
  pub(crate) notifier: Arc<dyn ExecutionNotifier>,
  pub(crate) cache: OutputCache,
  states: Mutex<HashMap<String, NodeRuntimeState>>,
  pub(crate) stale: Mutex<BTreeSet<String>>,
  run_lock: tokio::sync::Mutex<()>,
  lazy_cancel: Mutex<Option<CancellationToken>>,
  disposed: AtomicBool,
}

impl Engine {
  /// Create an engine that owns `resources` until [`dispose`](Self::dispose).
  pub fn new(registry: NodeRegistry, resources: Arc<dyn ResourceManager>) -> Self {
    Self {
      registry,
      cache: OutputCache::new(resources.clone()),
      resources,
      settings: EngineSettings::default(),
      notifier: Arc::new(NoopNotifier),
      states: Mutex::new(HashMap::new()),
      stale: Mutex::new(BTreeSet::new()),
      run_lock: tokio::sync::Mutex::new(()),
      lazy_cancel: Mutex::new(None),
      disposed: AtomicBool::new(false),
    }
  }

  pub fn with_settings(mut self, settings: EngineSettings) -> Self {
    self.settings = settings;
    self
  }

  pub fn with_notifier(mut self, notifier: impl ExecutionNotifier + 'static) -> Self {
    self.notifier = Arc::new(notifier);
    self
  }

  pub fn registry(&self) -> &NodeRegistry {
    &self.registry
  }

  pub fn settings(&self) -> &EngineSettings {
    &self.settings
  }

  pub fn resources(&self) -> &Arc<dyn ResourceManager> {
    &self.resources
  }

  pub fn cache(&self) -> &OutputCache {
    &self.cache
  }

  /// Cached outputs of `node_id`. Textures are not retained.
  pub fn outputs(&self, node_id: &str) -> Option<NodeOutputs> {
    self.cache.get(node_id)
  }

  pub fn node_state(&self, node_id: &str) -> NodeRuntimeState {
    self
      .states
      .lock()
      .unwrap()
      .get(node_id)
      .cloned()
      .unwrap_or_default()
  }

  pub fn node_states(&self) -> BTreeMap<String, NodeRuntimeState> {
    self
      .states
      .lock()
      .unwrap()
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect()
  }

  /// Nodes whose cached output is kept but must be recomputed by the next
  /// full or partial run.
  pub fn stale_nodes(&self) -> BTreeSet<String> {
    self.stale.lock().unwrap().clone()
  }

  pub fn is_disposed(&self) -> bool {
    self.disposed.load(Ordering::SeqCst)
  }

  pub fn validate(&self, graph: &Graph) -> ValidationReport {
    validate(graph, &self.registry)
  }

  /// Validate, then execute every node in dependency order, skipping cache
  /// hits.
  #[instrument(name = "engine_run_full", skip(self, graph, cancel))]
  pub async fn run_full(&self, graph: &Graph, cancel: CancellationToken) -> Result<RunOutcome, RuntimeError> {
    self.run_graph(graph, None, cancel).await
  }

  /// Validate, then re-execute `dirty` and everything downstream of it.
  #[instrument(name = "engine_run_partial", skip(self, graph, dirty, cancel))]
  pub async fn run_partial<I, S>(
    &self,
    graph: &Graph,
    dirty: I,
    cancel: CancellationToken,
  ) -> Result<RunOutcome, RuntimeError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let dirty: BTreeSet<String> = dirty
      .into_iter()
      .map(|id| id.as_ref().to_string())
      .filter(|id| graph.contains_node(id))
      .collect();
    self.run_graph(graph, Some(dirty), cancel).await
  }

  async fn run_graph(
    &self,
    graph: &Graph,
    dirty: Option<BTreeSet<String>>,
    cancel: CancellationToken,
  ) -> Result<RunOutcome, RuntimeError> {
    self.ensure_live()?;
    let _guard = self.run_lock.lock().await;
    self.ensure_live()?;
    self.assert_cache_consistent(graph);

    let execution_id = uuid::Uuid::new_v4().to_string();
    info!(
      execution_id = %execution_id,
      nodes = graph.node_count(),
      partial = dirty.is_some(),
      "execution_started"
    );
    self.notifier.notify(ExecutionEvent::ExecutionStarted {
      execution_id: execution_id.clone(),
    });

    let report = self.validate(graph);
    for warning in &report.warnings {
      warn!(execution_id = %execution_id, warning = %warning, "validation_warning");
    }
    if !report.is_valid() {
      self.fail_validation(graph, &execution_id, &report);
      return Err(RuntimeError::Validation(report));
    }

    let order = graph.topological_order().order;
    let stale: Vec<String> = self.stale.lock().unwrap().iter().cloned().collect();
    let run = Run::new(execution_id, graph, cancel, self.cache.transaction());

    let (targets, sequence): (BTreeSet<String>, Vec<String>) = match dirty {
      None => (
        graph.downstream_closure(stale.iter().map(String::as_str)),
        order,
      ),
      Some(dirty) => {
        let targets = graph.downstream_closure(dirty.iter().chain(stale.iter()).map(String::as_str));
        let sequence = order.into_iter().filter(|id| targets.contains(id)).collect();
        (targets, sequence)
      }
    };
    for node_id in &targets {
      run.txn.evict(node_id);
      self.update_state(node_id, NodeRuntimeState::reset);
    }
    debug!(execution_id = %run.execution_id, invalidated = targets.len(), "cache_invalidated");

    Ok(self.execute_sequence(run, &sequence).await)
  }

  async fn execute_sequence(&self, mut run: Run<'_>, sequence: &[String]) -> RunOutcome {
    let graph = run.graph;
    for node_id in sequence {
      let Some(node) = graph.node(node_id) else {
        continue;
      };

      let upstream_blocked = graph
        .incoming_edges(node_id)
        .any(|edge| run.blocked.contains(&edge.source));
      if upstream_blocked {
        run.txn.evict(node_id);
        self.update_state(node_id, NodeRuntimeState::reset);
        run.blocked.insert(node_id.clone());
        run.report.skipped.push(node_id.clone());
        debug!(execution_id = %run.execution_id, node_id = %node_id, "node_skipped");
        continue;
      }

      if run.txn.contains(node_id) {
        run.report.cache_hits.push(node_id.clone());
        continue;
      }

      match self.execute_node(&mut run, node).await {
        NodeOutcome::Completed => run.report.executed.push(node_id.clone()),
        NodeOutcome::Failed => {
          run.blocked.insert(node_id.clone());
          run.report.failed.push(node_id.clone());
        }
        NodeOutcome::Aborted => return self.abort(run),
      }
    }

    RunOutcome::Completed(self.finish(run))
  }

  /// Mark `node_ids` dirty, evicting exactly them and everything downstream.
  /// Returns the evicted set.
  #[instrument(name = "engine_mark_dirty", skip(self, graph, node_ids))]
  pub async fn mark_dirty<I, S>(&self, graph: &Graph, node_ids: I) -> BTreeSet<String>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let node_ids: Vec<String> = node_ids.into_iter().map(|id| id.as_ref().to_string()).collect();
    let _guard = self.run_lock.lock().await;
    let closure = graph.downstream_closure(node_ids.iter().map(String::as_str));
    for node_id in &closure {
      self.cache.invalidate(node_id);
      self.update_state(node_id, NodeRuntimeState::reset);
    }
    self.stale.lock().unwrap().retain(|id| !closure.contains(id));
    info!(invalidated = closure.len(), "nodes_marked_dirty");
    closure
  }

  /// Execute exactly one node against whatever is cached upstream.
  ///
  /// Transform-only edits of a local-transform node are served by the fast
  /// path without invoking the compute routine. Otherwise the node is
  /// executed and every cached node downstream becomes stale.
  #[instrument(name = "engine_execute_node_lazy", skip(self, graph), fields(node_id = %node_id))]
  pub async fn execute_node_lazy(&self, graph: &Graph, node_id: &str) -> Result<RunOutcome, RuntimeError> {
    self.ensure_live()?;
    let node = graph.node(node_id).ok_or_else(|| RuntimeError::NodeNotFound {
      node_id: node_id.to_string(),
    })?;
    let definition = self
      .registry
      .get(&node.node_type)
      .cloned()
      .ok_or_else(|| RuntimeError::UnknownNodeType {
        node_id: node_id.to_string(),
        node_type: node.node_type.clone(),
      })?;

    let cancel = CancellationToken::new();
    if let Some(previous) = self.lazy_cancel.lock().unwrap().replace(cancel.clone()) {
      previous.cancel();
    }

    let _guard = self.run_lock.lock().await;
    self.ensure_live()?;
    self.assert_cache_consistent(graph);

    let execution_id = uuid::Uuid::new_v4().to_string();
    if cancel.is_cancelled() {
      info!(execution_id = %execution_id, node_id, "execution_aborted");
      self.notifier.notify(ExecutionEvent::ExecutionAborted { execution_id });
      return Ok(RunOutcome::Aborted);
    }

    info!(execution_id = %execution_id, node_id, "execution_started");
    self.notifier.notify(ExecutionEvent::ExecutionStarted {
      execution_id: execution_id.clone(),
    });

    let started = Instant::now();
    let params = effective_params(definition.schema(), &node.parameters);
    if let Some(outputs) = self.try_fast_path(graph, node, definition.schema(), &params) {
      let elapsed_ms = started.elapsed().as_millis() as u64;
      self.notifier.notify(ExecutionEvent::NodeCompleted {
        execution_id: execution_id.clone(),
        node_id: node_id.to_string(),
        outputs,
      });
      self.notifier.notify(ExecutionEvent::ExecutionCompleted {
        execution_id: execution_id.clone(),
        elapsed_ms,
      });
      info!(execution_id = %execution_id, node_id, elapsed_ms, "execution_completed");
      return Ok(RunOutcome::Completed(RunReport {
        execution_id,
        fast_path: vec![node_id.to_string()],
        elapsed_ms,
        ..Default::default()
      }));
    }

    let mut run = Run::new(execution_id, graph, cancel, self.cache.transaction());
    match self.execute_node(&mut run, node).await {
      NodeOutcome::Completed => run.report.executed.push(node_id.to_string()),
      NodeOutcome::Failed => run.report.failed.push(node_id.to_string()),
      NodeOutcome::Aborted => return Ok(self.abort(run)),
    }

    let report = self.finish(run);
    let downstream = graph.reachable_downstream(node_id);
    if !downstream.is_empty() {
      debug!(node_id, stale = downstream.len(), "downstream_marked_stale");
      self.stale.lock().unwrap().extend(downstream);
    }
    Ok(RunOutcome::Completed(report))
  }

  /// Forget a node removed from the graph: its cache entry, memos, and
  /// runtime state.
  pub async fn remove_node(&self, node_id: &str) {
    let _guard = self.run_lock.lock().await;
    self.cache.delete(node_id);
    self.states.lock().unwrap().remove(node_id);
    self.stale.lock().unwrap().remove(node_id);
  }

  /// Evict every cache entry and reset all runtime state.
  pub async fn clear_cache(&self) {
    let _guard = self.run_lock.lock().await;
    self.cache.clear();
    self.states.lock().unwrap().clear();
    self.stale.lock().unwrap().clear();
  }

  /// Release every cached handle, then dispose the resource context.
  ///
  /// Cancels an in-flight lazy run and waits for any other run to finish.
  /// Calling `dispose` twice is a no-op.
  pub async fn dispose(&self) -> Result<(), RuntimeError> {
    if let Some(token) = self.lazy_cancel.lock().unwrap().take() {
      token.cancel();
    }
    let _guard = self.run_lock.lock().await;
    if self.disposed.swap(true, Ordering::SeqCst) {
      return Ok(());
    }
    self.cache.clear();
    self.states.lock().unwrap().clear();
    self.stale.lock().unwrap().clear();
    self.resources.dispose()?;
    info!("engine_disposed");
    Ok(())
  }

  fn ensure_live(&self) -> Result<(), RuntimeError> {
    if self.is_disposed() {
      Err(RuntimeError::Disposed)
    } else {
      Ok(())
    }
  }

  /// Cache entries must belong to nodes of the graph being run.
  fn assert_cache_consistent(&self, graph: &Graph) {
    for node_id in self.cache.node_ids() {
      if !graph.contains_node(&node_id) {
        panic!(
          "cache holds outputs for node '{}' which is not in the graph; call Engine::remove_node when deleting nodes",
          node_id
        );
      }
    }
  }

  pub(crate) fn update_state(&self, node_id: &str, f: impl FnOnce(&mut NodeRuntimeState)) {
    let mut states = self.states.lock().unwrap();
    f(states.entry(node_id.to_string()).or_default());
  }

  /// Evict offending nodes and their dependents, then mark the offending
  /// nodes `Error`. Nothing they cached may be served by a later run.
  fn fail_validation(&self, graph: &Graph, execution_id: &str, report: &ValidationReport) {
    let offending = report.offending_nodes();
    let closure = graph.downstream_closure(
      offending
        .iter()
        .map(String::as_str)
        .filter(|id| graph.contains_node(id)),
    );
    for node_id in &closure {
      self.cache.invalidate(node_id);
      self.update_state(node_id, NodeRuntimeState::reset);
    }
    self.stale.lock().unwrap().retain(|id| !closure.contains(id));
    debug!(execution_id = %execution_id, invalidated = closure.len(), "invalid_nodes_evicted");

    for node_id in offending {
      let message = report.message_for(&node_id).unwrap_or("invalid node").to_string();
      self.update_state(&node_id, |state| {
        state.reset();
        state.status = NodeStatus::Error;
        state.error = Some(message.clone());
      });
      self.notifier.notify(ExecutionEvent::NodeFailed {
        execution_id: execution_id.to_string(),
        node_id,
        error: message,
      });
    }
    error!(
      execution_id = %execution_id,
      errors = report.errors.len(),
      error = %report,
      "execution_failed"
    );
    self.notifier.notify(ExecutionEvent::ExecutionFailed {
      execution_id: execution_id.to_string(),
      error: report.to_string(),
    });
  }

  /// Commit a run that went to completion.
  fn finish(&self, run: Run<'_>) -> RunReport {
    let Run {
      execution_id,
      graph,
      txn,
      mut report,
      started,
      ..
    } = run;

    let touched = txn.touched();
    txn.commit();
    self
      .stale
      .lock()
      .unwrap()
      .retain(|id| !touched.contains(id) && graph.contains_node(id));

    report.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
      execution_id = %execution_id,
      executed = report.executed.len(),
      cache_hits = report.cache_hits.len(),
      failed = report.failed.len(),
      elapsed_ms = report.elapsed_ms,
      "execution_completed"
    );
    self.notifier.notify(ExecutionEvent::ExecutionCompleted {
      execution_id,
      elapsed_ms: report.elapsed_ms,
    });
    report
  }

  /// Roll back a cancelled run. Committed entries it had evicted are kept but
  /// become stale.
  fn abort(&self, run: Run<'_>) -> RunOutcome {
    let Run {
      execution_id,
      txn,
      report,
      ..
    } = run;

    let touched = txn.touched();
    txn.rollback();
    for node_id in &report.executed {
      self.update_state(node_id, NodeRuntimeState::reset);
    }
    {
      let mut stale = self.stale.lock().unwrap();
      stale.extend(touched.into_iter().filter(|id| self.cache.contains(id)));
    }

    info!(execution_id = %execution_id, executed = report.executed.len(), "execution_aborted");
    self.notifier.notify(ExecutionEvent::ExecutionAborted { execution_id });
    RunOutcome::Aborted
  }
}

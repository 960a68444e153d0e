//! Transform fast path.
//!
//! A transform-only edit of a local-transform node is applied by rewriting
//! the transform of its cached textures in place and pushing the new
//! transform into cached nodes downstream. No compute routine runs and no
//! pixels move.

use std::collections::{BTreeMap, BTreeSet};

use kiln_config::Parameters;
use kiln_graph::{Graph, Node, NodeSchema, SchemaLookup};
use kurbo::Affine;
use tracing::{debug, info};

use crate::definition::effective_params;
use crate::engine::Engine;
use crate::transform::{is_transform_only_edit, rebase_in_place, recompose_in_place};
use crate::value::{ValueSnapshot, snapshot_outputs};

impl Engine {
  /// Apply `params` to `node` through the fast path if it is eligible.
  /// Returns the node's updated output snapshot on success.
  pub(crate) fn try_fast_path(
    &self,
    graph: &Graph,
    node: &Node,
    schema: &NodeSchema,
    params: &Parameters,
  ) -> Option<BTreeMap<String, ValueSnapshot>> {
    let node_id = node.node_id.as_str();
    if !schema.has_local_transform || self.stale.lock().unwrap().contains(node_id) {
      return None;
    }
    let state = self.node_state(node_id);
    if state.baked || !is_transform_only_edit(state.last_params.as_ref()?, params) {
      return None;
    }

    let pivot = self.settings.default_pivot;
    let updated = self
      .cache
      .with_entry_mut(node_id, |outputs| recompose_in_place(outputs, params, pivot))?;
    if updated == 0 {
      return None;
    }

    let snapshot = snapshot_outputs(&self.cache.get(node_id)?);
    self.update_state(node_id, |state| {
      state.last_params = Some(params.clone());
      state.last_outputs = Some(snapshot.clone());
    });
    info!(node_id, updated, "fast_path_applied");

    self.propagate_transforms(graph, node_id);
    Some(snapshot)
  }

  /// Push transforms from `origin` into every cached node downstream of it,
  /// in dependency order.
  ///
  /// Spatially coherent nodes still receive the new transform but become
  /// stale together with everything downstream of them; baking waits for
  /// their next real execution.
  fn propagate_transforms(&self, graph: &Graph, origin: &str) {
    let downstream = graph.reachable_downstream(origin);
    if downstream.is_empty() {
      return;
    }

    let mut newly_stale = BTreeSet::new();
    let order = graph.topological_order().order;
    for node_id in order.iter().filter(|id| downstream.contains(*id)) {
      let Some(node) = graph.node(node_id) else {
        continue;
      };
      let Some(schema) = self.registry.schema(&node.node_type) else {
        continue;
      };
      if !self.cache.contains(node_id) {
        continue;
      }
      let Some(inherited) = self.first_image_transform(graph, node, schema) else {
        continue;
      };

      let params = effective_params(schema, &node.parameters);
      let local = schema
        .has_local_transform
        .then_some((&params, self.settings.default_pivot));
      self
        .cache
        .with_entry_mut(node_id, |outputs| rebase_in_place(outputs, inherited, local));

      if let Some(outputs) = self.cache.get(node_id) {
        let snapshot = snapshot_outputs(&outputs);
        self.update_state(node_id, |state| state.last_outputs = Some(snapshot));
      }
      if schema.requires_spatial_coherence {
        newly_stale.extend(graph.downstream_closure([node_id.as_str()]));
      }
      debug!(origin, node_id = %node_id, "transform_propagated");
    }

    if !newly_stale.is_empty() {
      debug!(origin, stale = newly_stale.len(), "spatial_nodes_marked_stale");
      self.stale.lock().unwrap().extend(newly_stale);
    }
  }

  /// Current transform of the texture feeding the first image-like input.
  fn first_image_transform(&self, graph: &Graph, node: &Node, schema: &NodeSchema) -> Option<Affine> {
    schema
      .inputs
      .iter()
      .filter(|port| port.data_type.is_image_like())
      .find_map(|port| {
        let edge = graph.incoming_edge(&node.node_id, &port.id)?;
        let value = self.cache.get_output(&edge.source, &edge.source_port)?;
        value.as_texture().map(|texture| texture.transform)
      })
  }
}

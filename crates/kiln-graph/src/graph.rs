use std::collections::{BTreeMap, HashMap};

use kiln_config::{GraphDef, NodeDef};
use tracing::debug;

use crate::error::GraphError;
use crate::node::{Edge, Node};

/// A node graph: node instances plus port-to-port edges.
///
/// Both maps are ordered by id so every traversal over the same graph visits
/// nodes in the same order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
  pub(crate) nodes: BTreeMap<String, Node>,
  pub(crate) edges: BTreeMap<String, Edge>,
}

impl Graph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build a graph from a serialized document.
  ///
  /// The document is taken as-is: dangling edges are kept so the validator
  /// can report them. A later edge into an already occupied input replaces
  /// the earlier one.
  pub fn from_def(def: &GraphDef) -> Self {
    let mut graph = Self::new();
    for node in &def.nodes {
      graph.nodes.insert(node.node_id.clone(), Node::from(node));
    }
    for edge in &def.edges {
      graph.insert_edge(Edge::from(edge));
    }
    graph
  }

  /// Serialize back into a document with the given name.
  pub fn to_def(&self, name: impl Into<String>) -> GraphDef {
    GraphDef {
      name: name.into(),
      nodes: self
        .nodes
        .values()
        .map(|n| NodeDef {
          node_id: n.node_id.clone(),
          node_type: n.node_type.clone(),
          parameters: n.parameters.clone(),
        })
        .collect(),
      edges: self.edges.values().map(Into::into).collect(),
      settings: None,
    }
  }

  pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
    if self.nodes.contains_key(&node.node_id) {
      return Err(GraphError::DuplicateNode(node.node_id));
    }
    self.nodes.insert(node.node_id.clone(), node);
    Ok(())
  }

  /// Remove a node and every edge touching it.
  pub fn remove_node(&mut self, node_id: &str) -> Result<Node, GraphError> {
    let node = self
      .nodes
      .remove(node_id)
      .ok_or_else(|| GraphError::NodeNotFound(node_id.to_string()))?;
    self
      .edges
      .retain(|_, e| e.source != node_id && e.target != node_id);
    Ok(node)
  }

  /// Add an edge. Returns the edge it displaced if the target input was
  /// already connected.
  pub fn connect(&mut self, edge: Edge) -> Result<Option<Edge>, GraphError> {
    for id in [&edge.source, &edge.target] {
      if !self.nodes.contains_key(id) {
        return Err(GraphError::NodeNotFound(id.clone()));
      }
    }
    if self.edges.contains_key(&edge.edge_id) {
      return Err(GraphError::DuplicateEdge(edge.edge_id));
    }
    Ok(self.insert_edge(edge))
  }

  /// Like [`Graph::connect`], but refuses edges that would close a cycle.
  pub fn try_connect(&mut self, edge: Edge) -> Result<Option<Edge>, GraphError> {
    if self.would_create_cycle(&edge.source, &edge.target) {
      return Err(GraphError::WouldCreateCycle {
        source_node: edge.source,
        target: edge.target,
      });
    }
    self.connect(edge)
  }

  pub fn disconnect(&mut self, edge_id: &str) -> Result<Edge, GraphError> {
    self
      .edges
      .remove(edge_id)
      .ok_or_else(|| GraphError::EdgeNotFound(edge_id.to_string()))
  }

  pub fn set_parameter(
    &mut self,
    node_id: &str,
    name: impl Into<String>,
    value: serde_json::Value,
  ) -> Result<(), GraphError> {
    let node = self
      .nodes
      .get_mut(node_id)
      .ok_or_else(|| GraphError::NodeNotFound(node_id.to_string()))?;
    node.parameters.insert(name.into(), value);
    Ok(())
  }

  pub fn node(&self, node_id: &str) -> Option<&Node> {
    self.nodes.get(node_id)
  }

  pub fn contains_node(&self, node_id: &str) -> bool {
    self.nodes.contains_key(node_id)
  }

  /// Nodes in id order.
  pub fn nodes(&self) -> impl Iterator<Item = &Node> {
    self.nodes.values()
  }

  /// Edges in id order.
  pub fn edges(&self) -> impl Iterator<Item = &Edge> {
    self.edges.values()
  }

  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  /// The edge feeding `port_id` of `node_id`, if any.
  pub fn incoming_edge(&self, node_id: &str, port_id: &str) -> Option<&Edge> {
    self
      .edges
      .values()
      .find(|e| e.target == node_id && e.target_port == port_id)
  }

  /// All edges entering `node_id`.
  pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
    self.edges.values().filter(move |e| e.target == node_id)
  }

  /// All edges leaving `node_id`.
  pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
    self.edges.values().filter(move |e| e.source == node_id)
  }

  /// Adjacency lists over edges whose endpoints both exist.
  ///
  /// Returns `(downstream, upstream)`. Every node has an entry; neighbor
  /// lists are deduplicated and follow edge id order.
  pub(crate) fn adjacency(&self) -> (HashMap<&str, Vec<&str>>, HashMap<&str, Vec<&str>>) {
    let mut downstream: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut upstream: HashMap<&str, Vec<&str>> = HashMap::new();

    for node_id in self.nodes.keys() {
      downstream.entry(node_id.as_str()).or_default();
      upstream.entry(node_id.as_str()).or_default();
    }

    for edge in self.edges.values() {
      if !self.nodes.contains_key(&edge.source) || !self.nodes.contains_key(&edge.target) {
        continue;
      }
      let down = downstream.entry(edge.source.as_str()).or_default();
      if !down.contains(&edge.target.as_str()) {
        down.push(edge.target.as_str());
      }
      let up = upstream.entry(edge.target.as_str()).or_default();
      if !up.contains(&edge.source.as_str()) {
        up.push(edge.source.as_str());
      }
    }

    (downstream, upstream)
  }

  fn insert_edge(&mut self, edge: Edge) -> Option<Edge> {
    let occupied = self
      .edges
      .values()
      .find(|e| e.target == edge.target && e.target_port == edge.target_port)
      .map(|e| e.edge_id.clone());

    let replaced = occupied.and_then(|id| self.edges.remove(&id));
    if let Some(old) = &replaced {
      debug!(
        replaced_edge = %old.edge_id,
        edge_id = %edge.edge_id,
        target = %edge.target,
        target_port = %edge.target_port,
        "input already connected, replacing edge"
      );
    }

    self.edges.insert(edge.edge_id.clone(), edge);
    replaced
  }
}

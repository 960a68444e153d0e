//! Dependency ordering and reachability.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::graph::Graph;

/// Result of a topological sort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologicalOrder {
  /// Nodes in an order consistent with every edge. Partial when a cycle
  /// exists.
  pub order: Vec<String>,
  /// Every node absent from `order`: the nodes on a cycle plus anything
  /// only reachable through one. Empty for a DAG.
  pub cycle_nodes: Vec<String>,
}

impl TopologicalOrder {
  pub fn has_cycle(&self) -> bool {
    !self.cycle_nodes.is_empty()
  }

  /// Position of each node in the order.
  pub fn positions(&self) -> HashMap<&str, usize> {
    self
      .order
      .iter()
      .enumerate()
      .map(|(i, id)| (id.as_str(), i))
      .collect()
  }
}

impl Graph {
  /// Sort the graph with Kahn's algorithm.
  ///
  /// Ties are broken by node id so identical graphs always produce the same
  /// order.
  pub fn topological_order(&self) -> TopologicalOrder {
    let (downstream, _) = self.adjacency();

    let mut in_degree: HashMap<&str, usize> = self.nodes.keys().map(|id| (id.as_str(), 0)).collect();
    for targets in downstream.values() {
      for &target in targets {
        *in_degree.entry(target).or_default() += 1;
      }
    }

    let mut queue: VecDeque<&str> = self
      .nodes
      .keys()
      .map(String::as_str)
      .filter(|id| in_degree.get(id) == Some(&0))
      .collect();

    let mut order = Vec::with_capacity(self.nodes.len());
    while let Some(node_id) = queue.pop_front() {
      order.push(node_id.to_string());
      for &next in downstream.get(node_id).map(Vec::as_slice).unwrap_or(&[]) {
        if let Some(degree) = in_degree.get_mut(next) {
          *degree -= 1;
          if *degree == 0 {
            queue.push_back(next);
          }
        }
      }
    }

    let cycle_nodes = if order.len() < self.nodes.len() {
      let placed: BTreeSet<&str> = order.iter().map(String::as_str).collect();
      self
        .nodes
        .keys()
        .filter(|id| !placed.contains(id.as_str()))
        .cloned()
        .collect()
    } else {
      Vec::new()
    };

    TopologicalOrder { order, cycle_nodes }
  }

  /// Every node reachable by following edges forward from `node_id`,
  /// excluding `node_id` itself unless it sits on a cycle.
  pub fn reachable_downstream(&self, node_id: &str) -> BTreeSet<String> {
    let (downstream, _) = self.adjacency();
    bfs(&downstream, node_id)
  }

  /// Every node `node_id` transitively depends on.
  pub fn reachable_upstream(&self, node_id: &str) -> BTreeSet<String> {
    let (_, upstream) = self.adjacency();
    bfs(&upstream, node_id)
  }

  /// The union of the downstream closures of `node_ids`, plus the ids
  /// themselves.
  pub fn downstream_closure<'a>(
    &self,
    node_ids: impl IntoIterator<Item = &'a str>,
  ) -> BTreeSet<String> {
    let (downstream, _) = self.adjacency();
    let mut closure = BTreeSet::new();
    for id in node_ids {
      closure.insert(id.to_string());
      closure.extend(bfs(&downstream, id));
    }
    closure
  }

  /// Whether adding an edge `source -> target` would close a cycle.
  pub fn would_create_cycle(&self, source: &str, target: &str) -> bool {
    source == target || self.reachable_downstream(target).contains(source)
  }
}

fn bfs(adjacency: &HashMap<&str, Vec<&str>>, start: &str) -> BTreeSet<String> {
  let mut seen = BTreeSet::new();
  let mut queue: VecDeque<&str> = VecDeque::from([start]);

  while let Some(current) = queue.pop_front() {
    for &next in adjacency.get(current).map(Vec::as_slice).unwrap_or(&[]) {
      if seen.insert(next.to_string()) {
        queue.push_back(next);
      }
    }
  }

  seen
}

#[cfg(test)]
mod tests {
  use crate::{Edge, Graph, Node};

  fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> Graph {
    let mut graph = Graph::new();
    for id in nodes {
      graph.add_node(Node::new(*id, "pass")).unwrap();
    }
    for (i, (from, to)) in edges.iter().enumerate() {
      // Distinct target ports so fan-in edges do not replace each other.
      graph
        .connect(Edge::new(
          format!("e{i}"),
          *from,
          "out",
          *to,
          format!("in_{from}"),
        ))
        .unwrap();
    }
    graph
  }

  #[test]
  fn test_chain_order() {
    let g = graph(&["c", "b", "a"], &[("a", "b"), ("b", "c")]);
    let sorted = g.topological_order();
    assert_eq!(sorted.order, vec!["a", "b", "c"]);
    assert!(!sorted.has_cycle());
  }

  #[test]
  fn test_order_respects_every_edge() {
    let g = graph(
      &["a", "b", "c", "d", "e", "f"],
      &[
        ("f", "a"),
        ("a", "c"),
        ("b", "c"),
        ("c", "d"),
        ("b", "e"),
        ("e", "d"),
      ],
    );
    let sorted = g.topological_order();
    let pos = sorted.positions();
    for edge in g.edges() {
      assert!(pos[edge.source.as_str()] < pos[edge.target.as_str()]);
    }
  }

  #[test]
  fn test_order_is_deterministic() {
    let g = graph(&["x", "m", "a", "q"], &[("q", "a")]);
    let first = g.topological_order();
    for _ in 0..5 {
      assert_eq!(g.clone().topological_order(), first);
    }
    assert_eq!(first.order, vec!["m", "q", "x", "a"]);
  }

  #[test]
  fn test_cycle_reports_every_unplaced_node() {
    // a -> b -> c -> a, plus d only reachable through the cycle.
    let g = graph(
      &["a", "b", "c", "d", "z"],
      &[("a", "b"), ("b", "c"), ("c", "a"), ("c", "d")],
    );
    let sorted = g.topological_order();
    assert!(sorted.has_cycle());
    assert_eq!(sorted.order, vec!["z"]);
    assert_eq!(sorted.cycle_nodes, vec!["a", "b", "c", "d"]);
  }

  #[test]
  fn test_reachability() {
    let g = graph(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("a", "d")]);

    let down: Vec<_> = g.reachable_downstream("a").into_iter().collect();
    assert_eq!(down, vec!["b", "c", "d"]);

    let up: Vec<_> = g.reachable_upstream("c").into_iter().collect();
    assert_eq!(up, vec!["a", "b"]);

    assert!(g.reachable_downstream("c").is_empty());
  }

  #[test]
  fn test_would_create_cycle() {
    let g = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
    assert!(g.would_create_cycle("c", "a"));
    assert!(g.would_create_cycle("b", "b"));
    assert!(!g.would_create_cycle("a", "c"));
  }

  #[test]
  fn test_downstream_closure_includes_seeds() {
    let g = graph(&["a", "b", "c", "d"], &[("a", "b"), ("c", "d")]);
    let closure: Vec<_> = g.downstream_closure(["b", "c"]).into_iter().collect();
    assert_eq!(closure, vec!["b", "c", "d"]);
  }
}

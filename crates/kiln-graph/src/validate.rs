//! Pre-execution structural and type checks.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::graph::Graph;
use crate::schema::SchemaLookup;

/// Category of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
  UnknownNodeType,
  MissingInput,
  Disconnected,
  TypeMismatch,
  Cycle,
  /// A node with no edges at all. Reported as a warning.
  IsolatedNode,
}

impl fmt::Display for IssueKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::UnknownNodeType => "unknown_node_type",
      Self::MissingInput => "missing_input",
      Self::Disconnected => "disconnected",
      Self::TypeMismatch => "type_mismatch",
      Self::Cycle => "cycle",
      Self::IsolatedNode => "isolated_node",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
  Error,
  Warning,
}

/// A single problem found in a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
  pub kind: IssueKind,
  pub severity: Severity,
  /// The offending node. Edge issues point at the edge's target when it
  /// exists, else its source.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub node_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub edge_id: Option<String>,
  pub message: String,
}

impl fmt::Display for ValidationIssue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}] {}", self.kind, self.message)
  }
}

/// Everything found by [`validate`]. Errors block execution; warnings do not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
  pub errors: Vec<ValidationIssue>,
  pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
  pub fn is_valid(&self) -> bool {
    self.errors.is_empty()
  }

  /// Ids of nodes named by at least one error.
  pub fn offending_nodes(&self) -> BTreeSet<String> {
    self
      .errors
      .iter()
      .filter_map(|issue| issue.node_id.clone())
      .collect()
  }

  /// Nodes reported as part of (or only reachable through) a cycle.
  pub fn cycle_nodes(&self) -> BTreeSet<String> {
    self
      .errors
      .iter()
      .filter(|issue| issue.kind == IssueKind::Cycle)
      .filter_map(|issue| issue.node_id.clone())
      .collect()
  }

  pub fn errors_of(&self, kind: IssueKind) -> impl Iterator<Item = &ValidationIssue> {
    self.errors.iter().filter(move |issue| issue.kind == kind)
  }

  /// First message for a node, used as its inline error.
  pub fn message_for(&self, node_id: &str) -> Option<&str> {
    self
      .errors
      .iter()
      .find(|issue| issue.node_id.as_deref() == Some(node_id))
      .map(|issue| issue.message.as_str())
  }

  fn error(&mut self, kind: IssueKind, node_id: Option<&str>, edge_id: Option<&str>, message: String) {
    self.errors.push(ValidationIssue {
      kind,
      severity: Severity::Error,
      node_id: node_id.map(str::to_string),
      edge_id: edge_id.map(str::to_string),
      message,
    });
  }
}

impl fmt::Display for ValidationReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "graph validation failed with {} error(s)", self.errors.len())?;
    for issue in &self.errors {
      write!(f, "\n  {}", issue)?;
    }
    Ok(())
  }
}

/// Check a graph against the schemas of its node types.
///
/// Every problem is collected; validation never stops at the first error.
pub fn validate(graph: &Graph, schemas: &impl SchemaLookup) -> ValidationReport {
  let mut report = ValidationReport::default();

  for node in graph.nodes() {
    let Some(schema) = schemas.schema(&node.node_type) else {
      report.error(
        IssueKind::UnknownNodeType,
        Some(&node.node_id),
        None,
        format!("node '{}' has unknown type '{}'", node.node_id, node.node_type),
      );
      continue;
    };

    for port in &schema.inputs {
      let connected = graph.incoming_edge(&node.node_id, &port.id).is_some();
      if port.required && !connected && port.default.is_none() {
        report.error(
          IssueKind::MissingInput,
          Some(&node.node_id),
          None,
          format!("required input '{}' of node '{}' is not connected", port.id, node.node_id),
        );
      }
    }
  }

  for edge in graph.edges() {
    let source = graph.node(&edge.source);
    let target = graph.node(&edge.target);
    let blamed = if target.is_some() { &edge.target } else { &edge.source };

    let (Some(source), Some(target)) = (source, target) else {
      report.error(
        IssueKind::Disconnected,
        Some(blamed),
        Some(&edge.edge_id),
        format!(
          "edge '{}' references a missing node ('{}' -> '{}')",
          edge.edge_id, edge.source, edge.target
        ),
      );
      continue;
    };

    // Unknown types were reported above; their ports cannot be checked.
    let (Some(source_schema), Some(target_schema)) = (
      schemas.schema(&source.node_type),
      schemas.schema(&target.node_type),
    ) else {
      continue;
    };

    let source_port = source_schema.output_port(&edge.source_port);
    let target_port = target_schema.input_port(&edge.target_port);

    let (Some(source_port), Some(target_port)) = (source_port, target_port) else {
      report.error(
        IssueKind::Disconnected,
        Some(blamed),
        Some(&edge.edge_id),
        format!(
          "edge '{}' references a missing port ('{}.{}' -> '{}.{}')",
          edge.edge_id, edge.source, edge.source_port, edge.target, edge.target_port
        ),
      );
      continue;
    };

    if !source_port.data_type.can_feed(target_port.data_type) {
      report.error(
        IssueKind::TypeMismatch,
        Some(blamed),
        Some(&edge.edge_id),
        format!(
          "cannot connect {} output '{}.{}' to {} input '{}.{}'",
          source_port.data_type,
          edge.source,
          edge.source_port,
          target_port.data_type,
          edge.target,
          edge.target_port
        ),
      );
    }
  }

  let sorted = graph.topological_order();
  for node_id in &sorted.cycle_nodes {
    report.error(
      IssueKind::Cycle,
      Some(node_id),
      None,
      format!("node '{}' is part of or downstream of a cycle", node_id),
    );
  }

  if graph.node_count() > 1 {
    let connected: HashSet<&str> = graph
      .edges()
      .flat_map(|e| [e.source.as_str(), e.target.as_str()])
      .collect();
    for node in graph.nodes() {
      if !connected.contains(node.node_id.as_str()) {
        report.warnings.push(ValidationIssue {
          kind: IssueKind::IsolatedNode,
          severity: Severity::Warning,
          node_id: Some(node.node_id.clone()),
          edge_id: None,
          message: format!("node '{}' is not connected to any other node", node.node_id),
        });
      }
    }
  }

  debug!(
    errors = report.errors.len(),
    warnings = report.warnings.len(),
    "graph validated"
  );

  report
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use serde_json::json;

  use super::*;
  use crate::{DataType, Edge, Node, NodeSchema, PortSpec};

  fn schemas() -> HashMap<String, NodeSchema> {
    let mut map = HashMap::new();
    map.insert(
      "source".to_string(),
      NodeSchema::new().output(PortSpec::new("image", DataType::Image)),
    );
    map.insert(
      "filter".to_string(),
      NodeSchema::new()
        .input(PortSpec::new("image", DataType::Image))
        .input(PortSpec::new("amount", DataType::Number).with_default(json!(1.0)))
        .output(PortSpec::new("image", DataType::Image)),
    );
    map.insert(
      "label".to_string(),
      NodeSchema::new()
        .input(PortSpec::new("text", DataType::String))
        .output(PortSpec::new("text", DataType::String)),
    );
    map
  }

  #[test]
  fn test_valid_chain() {
    let mut graph = Graph::new();
    graph.add_node(Node::new("a", "source")).unwrap();
    graph.add_node(Node::new("b", "filter")).unwrap();
    graph
      .connect(Edge::new("e1", "a", "image", "b", "image"))
      .unwrap();

    let report = validate(&graph, &schemas());
    assert!(report.is_valid(), "{report}");
    assert!(report.warnings.is_empty());
  }

  #[test]
  fn test_collects_all_errors() {
    let mut graph = Graph::new();
    graph.add_node(Node::new("a", "source")).unwrap();
    graph.add_node(Node::new("b", "filter")).unwrap();
    graph.add_node(Node::new("c", "mystery")).unwrap();
    graph.add_node(Node::new("d", "label")).unwrap();
    graph
      .connect(Edge::new("e1", "a", "image", "d", "text"))
      .unwrap();
    graph
      .connect(Edge::new("e2", "a", "nope", "c", "x"))
      .unwrap();

    let report = validate(&graph, &schemas());

    assert_eq!(report.errors_of(IssueKind::UnknownNodeType).count(), 1);
    // "b" has no image input and no default.
    assert_eq!(report.errors_of(IssueKind::MissingInput).count(), 1);
    assert_eq!(report.errors_of(IssueKind::TypeMismatch).count(), 1);
    assert_eq!(report.offending_nodes().len(), 3);
    assert!(report.message_for("d").unwrap().contains("string"));
  }

  #[test]
  fn test_missing_port_is_disconnected() {
    let mut graph = Graph::new();
    graph.add_node(Node::new("a", "source")).unwrap();
    graph.add_node(Node::new("b", "filter")).unwrap();
    graph
      .connect(Edge::new("e1", "a", "mask", "b", "image"))
      .unwrap();

    let report = validate(&graph, &schemas());
    let issue = report.errors_of(IssueKind::Disconnected).next().unwrap();
    assert_eq!(issue.edge_id.as_deref(), Some("e1"));
    assert_eq!(issue.node_id.as_deref(), Some("b"));
  }

  #[test]
  fn test_cycle_nodes_reported() {
    let mut graph = Graph::new();
    for id in ["a", "b", "c"] {
      graph.add_node(Node::new(id, "filter")).unwrap();
    }
    graph.connect(Edge::new("e1", "a", "image", "b", "image")).unwrap();
    graph.connect(Edge::new("e2", "b", "image", "c", "image")).unwrap();
    graph.connect(Edge::new("e3", "c", "image", "a", "image")).unwrap();

    let report = validate(&graph, &schemas());
    let cycle: Vec<_> = report.cycle_nodes().into_iter().collect();
    assert_eq!(cycle, vec!["a", "b", "c"]);
    assert!(report.to_string().contains("cycle"));
  }

  #[test]
  fn test_isolated_node_is_only_a_warning() {
    let mut graph = Graph::new();
    graph.add_node(Node::new("a", "source")).unwrap();
    graph.add_node(Node::new("b", "filter")).unwrap();
    graph.add_node(Node::new("lonely", "source")).unwrap();
    graph.connect(Edge::new("e1", "a", "image", "b", "image")).unwrap();

    let report = validate(&graph, &schemas());
    assert!(report.is_valid());
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].node_id.as_deref(), Some("lonely"));
  }
}

//! Runtime error types.

use kiln_graph::ValidationReport;
use kiln_resource::ResourceError;

/// Errors returned by engine entry points.
///
/// Cancellation is not an error; see [`RunOutcome::Aborted`](crate::RunOutcome).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  /// The graph failed pre-execution validation.
  #[error("graph validation failed: {0}")]
  Validation(ValidationReport),

  #[error("node '{node_id}' not found in graph")]
  NodeNotFound { node_id: String },

  #[error("node '{node_id}' has unknown type '{node_type}'")]
  UnknownNodeType { node_id: String, node_type: String },

  #[error("resource error: {source}")]
  Resource {
    #[from]
    source: ResourceError,
  },

  #[error("engine has been disposed")]
  Disposed,
}

/// Failure of a single node's compute routine or of its input gathering.
///
/// Recorded on that node's runtime state; the run continues.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct NodeError {
  pub message: String,
  #[source]
  pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl NodeError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      source: None,
    }
  }

  pub fn with_source(
    message: impl Into<String>,
    source: impl std::error::Error + Send + Sync + 'static,
  ) -> Self {
    Self {
      message: message.into(),
      source: Some(Box::new(source)),
    }
  }
}

impl From<ResourceError> for NodeError {
  fn from(e: ResourceError) -> Self {
    NodeError::with_source(format!("resource error: {}", e), e)
  }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("node not found: {0}")]
  NodeNotFound(String),

  #[error("duplicate node id: {0}")]
  DuplicateNode(String),

  #[error("duplicate edge id: {0}")]
  DuplicateEdge(String),

  #[error("edge not found: {0}")]
  EdgeNotFound(String),

  #[error("connecting '{source_node}' -> '{target}' would create a cycle")]
  WouldCreateCycle { source_node: String, target: String },
}

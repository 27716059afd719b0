use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
  #[error("node not found: {0}")]
  NodeNotFound(String),

  #[error("node already exists: {0}")]
  DuplicateNode(String),

  #[error("edge references unknown node: from={source_id}, to={target_id}")]
  InvalidReference {
    source_id: String,
    target_id: String,
  },

  #[error("workflow has no trigger nodes")]
  NoTrigger,

  #[error("node '{source_id}' is connected to missing node '{target_id}'")]
  DanglingReference {
    source_id: String,
    target_id: String,
  },
}

impl WorkflowError {
  /// The node id this error is attributed to, if any.
  pub fn node_id(&self) -> Option<&str> {
    match self {
      WorkflowError::NodeNotFound(id) | WorkflowError::DuplicateNode(id) => Some(id),
      WorkflowError::InvalidReference { source_id, .. }
      | WorkflowError::DanglingReference { source_id, .. } => Some(source_id),
      WorkflowError::NoTrigger => None,
    }
  }
}

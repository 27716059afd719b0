//! Engine errors.

use std::fmt;

use flowsim_workflow::WorkflowError;
use thiserror::Error;

use crate::session::WorkflowState;

/// One reason a workflow was refused by the validation gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
  /// The offending node, if the issue is attributable to one.
  pub node_id: Option<String>,
  pub message: String,
}

impl fmt::Display for ValidationIssue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.node_id {
      Some(id) => write!(f, "[{}] {}", id, self.message),
      None => f.write_str(&self.message),
    }
  }
}

/// A run was refused before any node changed state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("workflow cannot run: {}", join_issues(.issues))]
pub struct ValidationError {
  pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
  /// Ids of the offending nodes, deduplicated, in report order.
  pub fn node_ids(&self) -> Vec<&str> {
    let mut ids: Vec<&str> = Vec::new();
    for id in self.issues.iter().filter_map(|i| i.node_id.as_deref()) {
      if !ids.contains(&id) {
        ids.push(id);
      }
    }
    ids
  }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
  issues
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join("; ")
}

/// Errors surfaced by a run handle.
#[derive(Debug, Error)]
pub enum EngineError {
  /// The scheduler task panicked or was aborted.
  #[error("run '{run_id}' was lost: {message}")]
  RunLost { run_id: String, message: String },
}

/// Errors from the hosting session.
#[derive(Debug, Error)]
pub enum SessionError {
  /// The operation needs a different workflow state.
  #[error("workflow is {state}, operation not allowed")]
  Busy { state: WorkflowState },

  /// `wait` or `cancel` without an active run.
  #[error("no run in progress")]
  NotRunning,

  #[error(transparent)]
  Workflow(#[from] WorkflowError),

  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error(transparent)]
  Engine(#[from] EngineError),
}

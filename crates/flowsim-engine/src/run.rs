use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use flowsim_workflow::ExecutionResult;
use serde::{Deserialize, Serialize};

/// Workflow-level status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl RunOutcome {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, RunOutcome::Running)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      RunOutcome::Running => "running",
      RunOutcome::Completed => "completed",
      RunOutcome::Failed => "failed",
      RunOutcome::Cancelled => "cancelled",
    }
  }
}

impl fmt::Display for RunOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
  pub at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub node_id: Option<String>,
  pub message: String,
}

/// Record of a single run. Lives only as long as the caller keeps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRun {
  pub run_id: String,
  pub workflow_id: String,
  pub started_at: DateTime<Utc>,
  /// Stamped when the run completes, fails or is cancelled, whichever comes first.
  pub completed_at: Option<DateTime<Utc>>,
  pub logs: Vec<LogEntry>,
  /// Last result per node id.
  pub node_results: HashMap<String, ExecutionResult>,
  /// Nodes on a branch that was not taken, in the order they were passed over.
  pub skipped: Vec<String>,
  pub failed_node: Option<String>,
  pub cancelled: bool,
}

impl ExecutionRun {
  pub(crate) fn new(run_id: String, workflow_id: String) -> Self {
    Self {
      run_id,
      workflow_id,
      started_at: Utc::now(),
      completed_at: None,
      logs: Vec::new(),
      node_results: HashMap::new(),
      skipped: Vec::new(),
      failed_node: None,
      cancelled: false,
    }
  }

  /// Derived outcome. A failure wins over a later cancellation.
  pub fn outcome(&self) -> RunOutcome {
    if self.failed_node.is_some() {
      RunOutcome::Failed
    } else if self.cancelled {
      RunOutcome::Cancelled
    } else if self.completed_at.is_some() {
      RunOutcome::Completed
    } else {
      RunOutcome::Running
    }
  }

  pub(crate) fn log(&mut self, node_id: Option<&str>, message: impl Into<String>) {
    self.logs.push(LogEntry {
      at: Utc::now(),
      node_id: node_id.map(str::to_string),
      message: message.into(),
    });
  }

  pub(crate) fn finish(&mut self) {
    if self.completed_at.is_none() {
      self.completed_at = Some(Utc::now());
    }
  }
}

//! Execution events and notifiers for observability.
//!
//! Every state transition the scheduler makes is emitted as an
//! [`ExecutionEvent`]. The engine never blocks on an observer: notifiers
//! decide what to do with events (forward, record, ignore).

use std::sync::{Arc, Mutex, PoisonError};

use flowsim_workflow::{ExecutionResult, NodeStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::run::RunOutcome;

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
  tag = "eventType",
  rename_all = "snake_case",
  rename_all_fields = "camelCase"
)]
pub enum ExecutionEvent {
  /// A node changed status.
  NodeStatus {
    run_id: String,
    node_id: String,
    status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<ExecutionResult>,
    /// True on the final node transition of the run.
    #[serde(default)]
    is_last_node: bool,
    workflow_status: RunOutcome,
  },

  /// A human-readable log line, optionally attributed to a node.
  Log {
    run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    log: String,
  },

  /// Every reachable node finished and none failed.
  RunCompleted { run_id: String },

  /// A node failed; nothing new is started after this.
  RunFailed { run_id: String, node_id: String },

  /// The run was cancelled before finishing.
  RunCancelled { run_id: String },
}

impl ExecutionEvent {
  pub fn run_id(&self) -> &str {
    match self {
      ExecutionEvent::NodeStatus { run_id, .. }
      | ExecutionEvent::Log { run_id, .. }
      | ExecutionEvent::RunCompleted { run_id }
      | ExecutionEvent::RunFailed { run_id, .. }
      | ExecutionEvent::RunCancelled { run_id } => run_id,
    }
  }

  pub fn node_id(&self) -> Option<&str> {
    match self {
      ExecutionEvent::NodeStatus { node_id, .. } | ExecutionEvent::RunFailed { node_id, .. } => {
        Some(node_id)
      }
      ExecutionEvent::Log { node_id, .. } => node_id.as_deref(),
      _ => None,
    }
  }

  /// Whether this event ends the run.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      ExecutionEvent::RunCompleted { .. }
        | ExecutionEvent::RunFailed { .. }
        | ExecutionEvent::RunCancelled { .. }
    )
  }
}

/// Trait for receiving execution events.
///
/// The scheduler calls `notify` for each event from inside its task, so
/// implementations must not block.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

impl<N: ExecutionNotifier + ?Sized> ExecutionNotifier for Arc<N> {
  fn notify(&self, event: ExecutionEvent) {
    (**self).notify(event)
  }
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// Event volume is a handful per node, so the channel stays small as long as
/// someone drains it.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

/// Records every event in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
  events: Mutex<Vec<ExecutionEvent>>,
}

impl MemoryNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  /// Snapshot of the events recorded so far.
  pub fn events(&self) -> Vec<ExecutionEvent> {
    self
      .events
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Log lines recorded so far, in order.
  pub fn logs(&self) -> Vec<String> {
    self
      .events()
      .into_iter()
      .filter_map(|e| match e {
        ExecutionEvent::Log { log, .. } => Some(log),
        _ => None,
      })
      .collect()
  }

  pub fn clear(&self) {
    self
      .events
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clear();
  }
}

impl ExecutionNotifier for MemoryNotifier {
  fn notify(&self, event: ExecutionEvent) {
    self
      .events
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(event);
  }
}

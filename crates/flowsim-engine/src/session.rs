//! Hosting session: one authored workflow and its current run.

use std::fmt;
use std::sync::Arc;

use flowsim_workflow::{Node, NodeUpdate, Workflow, WorkflowError};
use serde::{Deserialize, Serialize};

use crate::engine::{Engine, RunHandle};
use crate::error::SessionError;
use crate::events::{ExecutionNotifier, NoopNotifier};
use crate::run::{ExecutionRun, RunOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
  Ready,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl fmt::Display for WorkflowState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      WorkflowState::Ready => "ready",
      WorkflowState::Running => "running",
      WorkflowState::Completed => "completed",
      WorkflowState::Failed => "failed",
      WorkflowState::Cancelled => "cancelled",
    })
  }
}

impl From<RunOutcome> for WorkflowState {
  fn from(outcome: RunOutcome) -> Self {
    match outcome {
      RunOutcome::Running => WorkflowState::Running,
      RunOutcome::Completed => WorkflowState::Completed,
      RunOutcome::Failed => WorkflowState::Failed,
      RunOutcome::Cancelled => WorkflowState::Cancelled,
    }
  }
}

/// Owns an authored workflow and serializes access to it.
///
/// Structural edits are only accepted in the `ready` state. A finished run
/// leaves the node statuses in place until [`WorkflowSession::reset`].
pub struct WorkflowSession<N: ExecutionNotifier = NoopNotifier> {
  engine: Arc<Engine<N>>,
  workflow: Workflow,
  state: WorkflowState,
  active: Option<RunHandle>,
  last_run: Option<ExecutionRun>,
}

impl<N: ExecutionNotifier + 'static> WorkflowSession<N> {
  pub fn new(engine: Arc<Engine<N>>, workflow: Workflow) -> Self {
    Self {
      engine,
      workflow,
      state: WorkflowState::Ready,
      active: None,
      last_run: None,
    }
  }

  pub fn state(&self) -> WorkflowState {
    self.state
  }

  /// The authored workflow. While a run is active this is the pre-run copy.
  pub fn workflow(&self) -> &Workflow {
    &self.workflow
  }

  pub fn last_run(&self) -> Option<&ExecutionRun> {
    self.last_run.as_ref()
  }

  pub fn active_run_id(&self) -> Option<&str> {
    self.active.as_ref().map(RunHandle::run_id)
  }

  /// Apply an arbitrary edit. Fails with `Busy` unless the session is `ready`.
  pub fn edit<R>(
    &mut self,
    f: impl FnOnce(&mut Workflow) -> Result<R, WorkflowError>,
  ) -> Result<R, SessionError> {
    self.ensure_ready()?;
    Ok(f(&mut self.workflow)?)
  }

  pub fn add_node(&mut self, node: Node) -> Result<(), SessionError> {
    self.edit(|wf| wf.add_node(node))
  }

  pub fn update_node(&mut self, node_id: &str, update: NodeUpdate) -> Result<(), SessionError> {
    self.edit(|wf| wf.update_node(node_id, update))
  }

  pub fn remove_node(&mut self, node_id: &str) -> Result<Node, SessionError> {
    self.edit(|wf| wf.remove_node(node_id))
  }

  pub fn add_edge(&mut self, source_id: &str, target_id: &str) -> Result<(), SessionError> {
    self.edit(|wf| wf.add_edge(source_id, target_id))
  }

  pub fn remove_edge(&mut self, source_id: &str, target_id: &str) -> Result<bool, SessionError> {
    self.edit(|wf| wf.remove_edge(source_id, target_id))
  }

  /// Start a run. A finished session is reset first; an active run is `Busy`.
  pub fn start(&mut self) -> Result<String, SessionError> {
    if self.state == WorkflowState::Running {
      return Err(SessionError::Busy { state: self.state });
    }
    if self.state != WorkflowState::Ready {
      self.workflow.reset();
      self.state = WorkflowState::Ready;
    }

    let handle = self.engine.run(&self.workflow)?;
    let run_id = handle.run_id().to_string();
    self.active = Some(handle);
    self.state = WorkflowState::Running;
    Ok(run_id)
  }

  pub fn cancel(&self) -> Result<(), SessionError> {
    self
      .active
      .as_ref()
      .ok_or(SessionError::NotRunning)?
      .cancel();
    Ok(())
  }

  /// Wait for the active run and take its results back into the session.
  pub async fn wait(&mut self) -> Result<&ExecutionRun, SessionError> {
    let handle = self.active.take().ok_or(SessionError::NotRunning)?;
    let report = match handle.wait().await {
      Ok(report) => report,
      Err(err) => {
        self.state = WorkflowState::Failed;
        return Err(err.into());
      }
    };

    self.workflow = report.workflow;
    self.state = report.run.outcome().into();
    Ok(&*self.last_run.insert(report.run))
  }

  /// Return every node to `idle` and the session to `ready`.
  pub fn reset(&mut self) -> Result<(), SessionError> {
    if self.state == WorkflowState::Running {
      return Err(SessionError::Busy { state: self.state });
    }
    self.workflow.reset();
    self.state = WorkflowState::Ready;
    Ok(())
  }

  fn ensure_ready(&self) -> Result<(), SessionError> {
    if self.state == WorkflowState::Ready {
      Ok(())
    } else {
      Err(SessionError::Busy { state: self.state })
    }
  }
}

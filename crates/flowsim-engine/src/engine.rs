//! Workflow execution engine.
//!
//! The [`Engine`] validates a workflow and hands it to a scheduler task. It
//! holds no per-run state, so one engine can drive any number of runs.

use std::sync::Arc;

use flowsim_workflow::Workflow;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::decision::Decisions;
use crate::error::{EngineError, ValidationError, ValidationIssue};
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::run::ExecutionRun;
use crate::scheduler::Scheduler;

/// Final state of a run: the run record and the workflow with its node
/// statuses and results as the run left them.
#[derive(Debug, Clone)]
pub struct RunReport {
  pub run: ExecutionRun,
  pub workflow: Workflow,
}

/// A handle to a run in progress.
///
/// Dropping the handle does not stop the run; call [`RunHandle::cancel`].
#[derive(Debug)]
pub struct RunHandle {
  run_id: String,
  workflow_id: String,
  cancel: CancellationToken,
  join: JoinHandle<RunReport>,
}

impl RunHandle {
  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  pub fn workflow_id(&self) -> &str {
    &self.workflow_id
  }

  /// Request cancellation. Pending starts are dropped and running nodes go
  /// back to `idle`.
  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  pub fn cancellation_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  pub fn is_finished(&self) -> bool {
    self.join.is_finished()
  }

  /// Wait for the run to reach a terminal state.
  pub async fn wait(self) -> Result<RunReport, EngineError> {
    let RunHandle { run_id, join, .. } = self;
    join.await.map_err(|e| EngineError::RunLost {
      run_id,
      message: e.to_string(),
    })
  }
}

/// The workflow execution engine.
///
/// Generic over `N: ExecutionNotifier` to allow different notification strategies.
/// Use `Engine::new()` for an engine that discards events, or
/// `Engine::with_notifier()` to observe them.
pub struct Engine<N: ExecutionNotifier = NoopNotifier> {
  config: EngineConfig,
  decisions: Decisions,
  notifier: Arc<N>,
}

impl Engine<NoopNotifier> {
  pub fn new(config: EngineConfig) -> Self {
    Self::with_notifier(config, NoopNotifier)
  }
}

impl<N: ExecutionNotifier + 'static> Engine<N> {
  pub fn with_notifier(config: EngineConfig, notifier: N) -> Self {
    Self::with_shared_notifier(config, Arc::new(notifier))
  }

  pub fn with_shared_notifier(config: EngineConfig, notifier: Arc<N>) -> Self {
    let decisions = Decisions::random(config.failure_rate);
    Self {
      config,
      decisions,
      notifier,
    }
  }

  /// Replace the decision sources, e.g. with seeded or scripted ones.
  pub fn with_decisions(mut self, decisions: Decisions) -> Self {
    self.decisions = decisions;
    self
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub fn notifier(&self) -> &Arc<N> {
    &self.notifier
  }

  /// The validation gate: structural checks, then per-node configuration errors.
  pub fn validate(&self, workflow: &Workflow) -> Result<(), ValidationError> {
    let mut issues: Vec<ValidationIssue> = workflow
      .structural_issues()
      .into_iter()
      .map(|err| ValidationIssue {
        node_id: err.node_id().map(str::to_string),
        message: err.to_string(),
      })
      .collect();

    for node in workflow.nodes() {
      for finding in node.configuration_errors() {
        issues.push(ValidationIssue {
          node_id: Some(node.id.clone()),
          message: format!("{}: {}", node.label(), finding.message),
        });
      }
    }

    if issues.is_empty() {
      Ok(())
    } else {
      Err(ValidationError { issues })
    }
  }

  /// Start a run of `workflow`.
  ///
  /// The run works on its own copy of the workflow with every node reset to
  /// `idle`. A workflow that fails validation is refused before any event
  /// other than a single log entry naming the offenders.
  ///
  /// Must be called from within a tokio runtime.
  pub fn run(&self, workflow: &Workflow) -> Result<RunHandle, ValidationError> {
    let run_id = uuid::Uuid::new_v4().to_string();

    if let Err(err) = self.validate(workflow) {
      warn!(
        run_id = %run_id,
        workflow_id = %workflow.workflow_id,
        offenders = ?err.node_ids(),
        "run refused"
      );
      self.notifier.notify(ExecutionEvent::Log {
        run_id,
        node_id: None,
        log: err.to_string(),
      });
      return Err(err);
    }

    let mut workflow = workflow.clone();
    workflow.reset();
    let workflow_id = workflow.workflow_id.clone();

    info!(run_id = %run_id, workflow_id = %workflow_id, "spawning run");

    let cancel = CancellationToken::new();
    let scheduler = Scheduler::new(
      run_id.clone(),
      workflow,
      self.config.clone(),
      self.decisions.clone(),
      self.notifier.clone(),
      cancel.clone(),
    );
    let join = tokio::spawn(scheduler.drive());

    Ok(RunHandle {
      run_id,
      workflow_id,
      cancel,
      join,
    })
  }
}

//! The run driver.
//!
//! A run is a single task that waits on a set of timers. Each timer resolves
//! to a [`Step`]: `Start` moves a node to `running` and arms its settle timer,
//! `Settle` decides the node's outcome and arms `Start` timers for the
//! successors it activates. Cancellation drops every pending timer.

use std::sync::Arc;
use std::time::Duration;

use flowsim_workflow::{ExecutionResult, Graph, Node, NodeConfig, NodeStatus, Workflow};
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::condition::branch_fires;
use crate::config::EngineConfig;
use crate::decision::Decisions;
use crate::engine::RunReport;
use crate::events::{ExecutionEvent, ExecutionNotifier};
use crate::run::{ExecutionRun, RunOutcome};

/// A node activation and the path of nodes that led to it (inclusive).
struct Activation {
  node_id: String,
  path: Vec<String>,
}

enum Step {
  Start(Activation),
  Settle(Activation),
}

/// What a successful node hands to its successors.
#[derive(Default)]
struct Plan {
  activations: Vec<(Duration, Activation)>,
  skipped: Vec<String>,
  logs: Vec<(Option<String>, String)>,
}

pub(crate) struct Scheduler<N> {
  workflow: Workflow,
  graph: Graph,
  run: ExecutionRun,
  config: EngineConfig,
  decisions: Decisions,
  notifier: Arc<N>,
  cancel: CancellationToken,
  pending: FuturesUnordered<BoxFuture<'static, Step>>,
  /// Start timers not yet fired.
  queued: usize,
  /// Nodes currently running.
  in_flight: usize,
}

impl<N: ExecutionNotifier> Scheduler<N> {
  pub(crate) fn new(
    run_id: String,
    workflow: Workflow,
    config: EngineConfig,
    decisions: Decisions,
    notifier: Arc<N>,
    cancel: CancellationToken,
  ) -> Self {
    let run = ExecutionRun::new(run_id, workflow.workflow_id.clone());
    Self {
      graph: workflow.graph(),
      workflow,
      run,
      config,
      decisions,
      notifier,
      cancel,
      pending: FuturesUnordered::new(),
      queued: 0,
      in_flight: 0,
    }
  }

  #[instrument(
    name = "workflow_run",
    skip(self),
    fields(
      run_id = %self.run.run_id,
      workflow_id = %self.run.workflow_id,
    )
  )]
  pub(crate) async fn drive(mut self) -> RunReport {
    let reachable = self
      .graph
      .reachable_from(self.workflow.triggers().map(|n| n.id.as_str()));
    let unreachable: Vec<&str> = self
      .workflow
      .nodes()
      .iter()
      .filter(|n| !reachable.contains(&n.id))
      .map(|n| n.id.as_str())
      .collect();
    info!(
      run_id = %self.run.run_id,
      triggers = self.workflow.triggers().count(),
      reachable = reachable.len(),
      "run_started"
    );
    if !unreachable.is_empty() {
      debug!(run_id = %self.run.run_id, ?unreachable, "nodes not reachable from any trigger");
    }
    let start_message = format!("Starting execution of workflow \"{}\"", self.workflow.name);
    self.log(None, start_message);
    self.schedule_triggers();

    loop {
      if self.run.outcome().is_terminal() && self.in_flight == 0 {
        break;
      }

      let next = tokio::select! {
        biased;
        _ = self.cancel.cancelled() => None,
        step = self.pending.next() => Some(step),
      };

      match next {
        None => {
          self.cancel_run();
          break;
        }
        Some(None) => break,
        Some(Some(Step::Start(activation))) => self.start(activation),
        Some(Some(Step::Settle(activation))) => self.settle(activation),
      }
    }

    if matches!(
      self.run.outcome(),
      RunOutcome::Running | RunOutcome::Completed
    ) {
      self.complete();
    }

    RunReport {
      run: self.run,
      workflow: self.workflow,
    }
  }

  fn schedule_triggers(&mut self) {
    let triggers: Vec<String> = self.workflow.triggers().map(|n| n.id.clone()).collect();
    for (index, id) in triggers.into_iter().enumerate() {
      let delay = self.config.trigger_stagger() * index as u32;
      self.queue(
        delay,
        Activation {
          path: vec![id.clone()],
          node_id: id,
        },
      );
    }
  }

  fn queue(&mut self, delay: Duration, activation: Activation) {
    self.queued += 1;
    self.arm(delay, Step::Start(activation));
  }

  fn arm(&mut self, delay: Duration, step: Step) {
    self.pending.push(Box::pin(async move {
      tokio::time::sleep(delay).await;
      step
    }));
  }

  fn start(&mut self, activation: Activation) {
    self.queued -= 1;

    if self.run.failed_node.is_some() {
      debug!(node_id = %activation.node_id, "start dropped after failure");
      return;
    }

    let Some(node) = self.workflow.get_node_mut(&activation.node_id) else {
      return;
    };
    node.status = NodeStatus::Running;
    let settle = settle_time(&self.config, node);
    let message = if node.is_trigger() {
      format!("Executing trigger: {}", node.label())
    } else {
      format!("Executing: {}", node.label())
    };

    info!(
      run_id = %self.run.run_id,
      node_id = %activation.node_id,
      settle_ms = settle.as_millis() as u64,
      "node_started"
    );
    self.emit_status(
      &activation.node_id,
      NodeStatus::Running,
      None,
      false,
      RunOutcome::Running,
    );
    self.log(Some(&activation.node_id), message);

    self.in_flight += 1;
    self.arm(settle, Step::Settle(activation));
  }

  fn settle(&mut self, activation: Activation) {
    self.in_flight -= 1;

    let Some(node) = self.workflow.get_node(&activation.node_id).cloned() else {
      return;
    };

    if self.run.failed_node.is_some() {
      self.abort_node(&node);
    } else if !node.is_trigger() && self.decisions.failures.should_fail(&node) {
      self.fail_node(&node);
    } else {
      self.succeed_node(&node, &activation.path);
    }
  }

  fn succeed_node(&mut self, node: &Node, path: &[String]) {
    let branch = match node.config() {
      NodeConfig::Condition(condition) => Some(self.decisions.conditions.decide(node, &condition)),
      _ => None,
    };
    let result = self.decisions.synth.success(node, branch);
    self.record(&node.id, NodeStatus::Success, result.clone());

    let plan = self.plan(node, path, branch);
    let is_last = self.in_flight == 0 && self.queued == 0 && plan.activations.is_empty();
    let workflow_status = if is_last {
      self.run.finish();
      RunOutcome::Completed
    } else {
      RunOutcome::Running
    };

    info!(
      run_id = %self.run.run_id,
      node_id = %node.id,
      duration_ms = result.duration,
      activations = plan.activations.len(),
      "node_succeeded"
    );
    self.emit_status(
      &node.id,
      NodeStatus::Success,
      Some(result),
      is_last,
      workflow_status,
    );
    let message = if node.is_trigger() {
      format!("Trigger {} executed successfully", node.label())
    } else {
      format!("{} executed successfully", node.label())
    };
    self.log(Some(&node.id), message);

    for (node_id, message) in plan.logs {
      self.log(node_id.as_deref(), message);
    }
    self.run.skipped.extend(plan.skipped);
    for (delay, activation) in plan.activations {
      self.queue(delay, activation);
    }
  }

  fn fail_node(&mut self, node: &Node) {
    let result = self.decisions.synth.failure();
    self.record(&node.id, NodeStatus::Error, result.clone());
    self.run.failed_node = Some(node.id.clone());
    self.run.finish();

    error!(run_id = %self.run.run_id, node_id = %node.id, "node_failed");
    self.emit_status(
      &node.id,
      NodeStatus::Error,
      Some(result),
      self.in_flight == 0,
      RunOutcome::Failed,
    );
    self.log(
      Some(&node.id),
      format!("Error: {} execution failed", node.label()),
    );

    error!(
      run_id = %self.run.run_id,
      node_id = %node.id,
      still_running = self.in_flight,
      "run_failed"
    );
    self.notifier.notify(ExecutionEvent::RunFailed {
      run_id: self.run.run_id.clone(),
      node_id: node.id.clone(),
    });
    self.log(None, "Workflow execution failed due to an error".to_string());
  }

  /// A node that was already running when another node failed.
  fn abort_node(&mut self, node: &Node) {
    let result = self.decisions.synth.failure();
    self.record(&node.id, NodeStatus::Error, result.clone());

    warn!(run_id = %self.run.run_id, node_id = %node.id, "node aborted after run failure");
    self.emit_status(
      &node.id,
      NodeStatus::Error,
      Some(result),
      self.in_flight == 0,
      RunOutcome::Failed,
    );
    self.log(
      Some(&node.id),
      format!("{} stopped: workflow already failed", node.label()),
    );
  }

  fn plan(&self, node: &Node, path: &[String], branch: Option<bool>) -> Plan {
    let mut plan = Plan::default();
    let targets = self.graph.downstream(&node.id);
    if targets.is_empty() {
      return plan;
    }

    if path.len() > self.config.max_depth {
      warn!(
        run_id = %self.run.run_id,
        node_id = %node.id,
        max_depth = self.config.max_depth,
        "maximum depth reached"
      );
      plan.logs.push((
        Some(node.id.clone()),
        "Warning: Maximum workflow depth reached, execution stopped".to_string(),
      ));
      return plan;
    }

    if let Some(take_true) = branch {
      plan.logs.push((
        Some(node.id.clone()),
        format!(
          "Condition {} evaluated to {}",
          node.label(),
          if take_true { "TRUE" } else { "FALSE" }
        ),
      ));
    }

    for (index, target_id) in targets.iter().enumerate() {
      let Some(target) = self.workflow.get_node(target_id) else {
        continue;
      };

      if path.iter().any(|id| id == target_id) {
        warn!(
          run_id = %self.run.run_id,
          node_id = %node.id,
          target = %target_id,
          "cycle detected"
        );
        plan.logs.push((
          Some(target_id.clone()),
          format!(
            "Warning: Cycle detected in workflow at node {}, skipping",
            target.label()
          ),
        ));
        continue;
      }

      if let Some(take_true) = branch {
        if !branch_fires(index, take_true) {
          plan.logs.push((
            Some(target_id.clone()),
            format!("Skipping: {} (condition path not taken)", target.label()),
          ));
          plan.skipped.push(target_id.clone());
          continue;
        }
      }

      let mut next_path = path.to_vec();
      next_path.push(target_id.clone());
      plan.activations.push((
        self.config.branch_stagger() * (index as u32 + 1),
        Activation {
          node_id: target_id.clone(),
          path: next_path,
        },
      ));
    }

    plan
  }

  fn cancel_run(&mut self) {
    if self.run.failed_node.is_none() {
      self.run.cancelled = true;
      self.run.finish();
    }

    let running: Vec<String> = self
      .workflow
      .nodes()
      .iter()
      .filter(|n| n.status == NodeStatus::Running)
      .map(|n| n.id.clone())
      .collect();
    if self.run.failed_node.is_some() {
      // A failed run never hands a started node back to `idle`.
      self.in_flight = running.len();
      for id in &running {
        self.in_flight -= 1;
        if let Some(node) = self.workflow.get_node(id).cloned() {
          self.abort_node(&node);
        }
      }
    } else {
      for id in &running {
        if let Some(node) = self.workflow.get_node_mut(id) {
          node.status = NodeStatus::Idle;
        }
        self.emit_status(id, NodeStatus::Idle, None, false, self.run.outcome());
      }
    }

    self.pending.clear();
    self.queued = 0;
    self.in_flight = 0;

    if self.run.cancelled {
      warn!(
        run_id = %self.run.run_id,
        interrupted = running.len(),
        "run_cancelled"
      );
      self.log(None, "Workflow execution cancelled".to_string());
      self.notifier.notify(ExecutionEvent::RunCancelled {
        run_id: self.run.run_id.clone(),
      });
    }
  }

  fn complete(&mut self) {
    self.run.finish();
    info!(
      run_id = %self.run.run_id,
      nodes = self.run.node_results.len(),
      skipped = self.run.skipped.len(),
      "run_completed"
    );
    self.log(None, "Workflow execution completed successfully".to_string());
    self.notifier.notify(ExecutionEvent::RunCompleted {
      run_id: self.run.run_id.clone(),
    });
  }

  fn record(&mut self, node_id: &str, status: NodeStatus, result: ExecutionResult) {
    if let Some(node) = self.workflow.get_node_mut(node_id) {
      node.status = status;
      node.execution_result = Some(result.clone());
    }
    self.run.node_results.insert(node_id.to_string(), result);
  }

  fn emit_status(
    &self,
    node_id: &str,
    status: NodeStatus,
    result: Option<ExecutionResult>,
    is_last_node: bool,
    workflow_status: RunOutcome,
  ) {
    self.notifier.notify(ExecutionEvent::NodeStatus {
      run_id: self.run.run_id.clone(),
      node_id: node_id.to_string(),
      status,
      result,
      is_last_node,
      workflow_status,
    });
  }

  fn log(&mut self, node_id: Option<&str>, message: String) {
    self.run.log(node_id, message.clone());
    self.notifier.notify(ExecutionEvent::Log {
      run_id: self.run.run_id.clone(),
      node_id: node_id.map(str::to_string),
      log: message,
    });
  }
}

/// How long a node stays `running`.
fn settle_time(config: &EngineConfig, node: &Node) -> Duration {
  if node.is_trigger() {
    return config.trigger_settle();
  }
  node
    .config()
    .delay_duration()
    .unwrap_or_else(|| config.node_latency())
}

use std::sync::Arc;
use std::time::Duration;

use flowsim_engine::{
  ConditionPolicy, Decisions, Engine, EngineConfig, ExecutionEvent, FailNodes, FailurePolicy,
  FixedPolicy, MemoryNotifier, NeverFail, RunOutcome,
};
use flowsim_workflow::{Node, NodeParameter, NodeStatus, ParameterType, Workflow};
use tokio::time::Instant;

fn engine(
  failures: impl FailurePolicy + 'static,
  conditions: impl ConditionPolicy + 'static,
) -> (Engine<MemoryNotifier>, Arc<MemoryNotifier>) {
  let memory = Arc::new(MemoryNotifier::new());
  let engine = Engine::with_shared_notifier(EngineConfig::default(), memory.clone()).with_decisions(
    Decisions::seeded(0.0, 42)
      .with_failures(failures)
      .with_conditions(conditions),
  );
  (engine, memory)
}

fn workflow(nodes: Vec<Node>) -> Workflow {
  Workflow::from_nodes("wf-1", "Test workflow", nodes).unwrap()
}

/// Node ids in the order they entered `running`.
fn started(events: &[ExecutionEvent]) -> Vec<String> {
  events
    .iter()
    .filter_map(|e| match e {
      ExecutionEvent::NodeStatus {
        node_id,
        status: NodeStatus::Running,
        ..
      } => Some(node_id.clone()),
      _ => None,
    })
    .collect()
}

fn statuses(events: &[ExecutionEvent], id: &str) -> Vec<NodeStatus> {
  events
    .iter()
    .filter_map(|e| match e {
      ExecutionEvent::NodeStatus {
        node_id, status, ..
      } if node_id == id => Some(*status),
      _ => None,
    })
    .collect()
}

fn last_node_flags(events: &[ExecutionEvent]) -> Vec<(String, RunOutcome)> {
  events
    .iter()
    .filter_map(|e| match e {
      ExecutionEvent::NodeStatus {
        node_id,
        is_last_node: true,
        workflow_status,
        ..
      } => Some((node_id.clone(), *workflow_status)),
      _ => None,
    })
    .collect()
}

fn chain(len: usize) -> Vec<Node> {
  let mut nodes = vec![Node::trigger("t", "Start").connect(["n1"])];
  for i in 1..=len {
    let node = Node::action(format!("n{}", i), format!("Step {}", i));
    nodes.push(if i < len {
      node.connect([format!("n{}", i + 1)])
    } else {
      node
    });
  }
  nodes
}

#[tokio::test(start_paused = true)]
async fn test_linear_success() {
  let (engine, memory) = engine(NeverFail, FixedPolicy(true));
  let wf = workflow(vec![
    Node::trigger("t", "Start").connect(["a"]),
    Node::action("a", "Fetch").connect(["b"]),
    Node::action("b", "Notify").with_config("actionType", "email"),
  ]);

  let report = engine.run(&wf).unwrap().wait().await.unwrap();
  let events = memory.events();

  assert_eq!(started(&events), vec!["t", "a", "b"]);
  for id in ["t", "a", "b"] {
    assert_eq!(
      statuses(&events, id),
      vec![NodeStatus::Running, NodeStatus::Success]
    );
    assert_eq!(
      report.workflow.get_node(id).unwrap().status,
      NodeStatus::Success
    );
  }
  assert_eq!(
    last_node_flags(&events),
    vec![("b".to_string(), RunOutcome::Completed)]
  );
  assert!(matches!(
    events.last(),
    Some(ExecutionEvent::RunCompleted { .. })
  ));

  assert_eq!(report.run.outcome(), RunOutcome::Completed);
  assert_eq!(report.run.node_results.len(), 3);
  assert!(report.run.completed_at.is_some());

  let logs = memory.logs();
  assert!(logs.contains(&"Executing trigger: Start".to_string()));
  assert!(logs.contains(&"Trigger Start executed successfully".to_string()));
  assert!(logs.contains(&"Notify executed successfully".to_string()));
  assert_eq!(
    logs.last().map(String::as_str),
    Some("Workflow execution completed successfully")
  );

  // The caller's workflow is untouched.
  assert_eq!(wf.get_node("a").unwrap().status, NodeStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_validation_refuses_before_any_transition() {
  let (engine, memory) = engine(NeverFail, FixedPolicy(true));
  let wf = workflow(vec![Node::action("a", "Orphan")]);

  let err = engine.run(&wf).unwrap_err();
  assert!(err.to_string().contains("no trigger"));

  let events = memory.events();
  assert_eq!(events.len(), 1);
  assert!(matches!(&events[0], ExecutionEvent::Log { node_id: None, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_validation_names_unconfigured_nodes() {
  let (engine, memory) = engine(NeverFail, FixedPolicy(true));
  let mut send = Node::action("send", "Send email").with_config("actionType", "email");
  send.inputs.push(NodeParameter {
    id: "recipient".to_string(),
    name: "Recipient".to_string(),
    param_type: ParameterType::String,
    required: true,
    description: None,
    default_value: None,
  });
  let wf = workflow(vec![Node::trigger("t", "Start").connect(["send"]), send]);

  let err = engine.run(&wf).unwrap_err();
  assert_eq!(err.node_ids(), vec!["send"]);
  assert!(started(&memory.events()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_mid_chain_failure_stops_downstream() {
  let (engine, memory) = engine(FailNodes::new(["b"]), FixedPolicy(true));
  let wf = workflow(vec![
    Node::trigger("t", "Start").connect(["a"]),
    Node::action("a", "A").connect(["b"]),
    Node::action("b", "B").connect(["c"]),
    Node::action("c", "C"),
  ]);

  let report = engine.run(&wf).unwrap().wait().await.unwrap();
  let events = memory.events();

  assert_eq!(started(&events), vec!["t", "a", "b"]);
  assert_eq!(
    statuses(&events, "b"),
    vec![NodeStatus::Running, NodeStatus::Error]
  );
  assert!(statuses(&events, "c").is_empty());
  assert!(events.contains(&ExecutionEvent::RunFailed {
    run_id: report.run.run_id.clone(),
    node_id: "b".to_string(),
  }));
  assert!(
    !events
      .iter()
      .any(|e| matches!(e, ExecutionEvent::RunCompleted { .. }))
  );

  assert_eq!(report.run.outcome(), RunOutcome::Failed);
  assert_eq!(report.run.failed_node.as_deref(), Some("b"));
  let failed = report.workflow.get_node("b").unwrap();
  assert_eq!(failed.status, NodeStatus::Error);
  assert_eq!(
    failed.execution_result.as_ref().unwrap().message,
    "Execution failed due to an error"
  );
  assert_eq!(report.workflow.get_node("c").unwrap().status, NodeStatus::Idle);
  assert!(
    memory
      .logs()
      .contains(&"Error: B execution failed".to_string())
  );
}

#[tokio::test(start_paused = true)]
async fn test_failure_forces_running_siblings_to_error() {
  // Trigger settles at 1.5s; siblings start at 2.3s, 3.1s, 3.9s and 4.7s.
  // `a` fails at 4.3s while `b` and `c` are running and `d` has not started.
  let (engine, memory) = engine(FailNodes::new(["a"]), FixedPolicy(true));
  let wf = workflow(vec![
    Node::trigger("t", "Start").connect(["a", "b", "c", "d"]),
    Node::action("a", "A"),
    Node::action("b", "B"),
    Node::action("c", "C"),
    Node::action("d", "D"),
  ]);

  let report = engine.run(&wf).unwrap().wait().await.unwrap();
  let events = memory.events();

  assert_eq!(started(&events), vec!["t", "a", "b", "c"]);
  for id in ["b", "c"] {
    assert_eq!(
      statuses(&events, id),
      vec![NodeStatus::Running, NodeStatus::Error]
    );
  }
  assert!(statuses(&events, "d").is_empty());
  assert_eq!(
    events
      .iter()
      .filter(|e| matches!(e, ExecutionEvent::RunFailed { .. }))
      .count(),
    1
  );
  assert_eq!(
    last_node_flags(&events),
    vec![("c".to_string(), RunOutcome::Failed)]
  );
  assert_eq!(report.run.outcome(), RunOutcome::Failed);
  assert_eq!(report.run.failed_node.as_deref(), Some("a"));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_failure_keeps_running_nodes_in_error() {
  // `a` fails at 4.3s; `b` waits a minute, so it is still running at 5s.
  let (engine, memory) = engine(FailNodes::new(["a"]), FixedPolicy(true));
  let wf = workflow(vec![
    Node::trigger("t", "Start").connect(["a", "b"]),
    Node::action("a", "A"),
    Node::delay("b", "Wait")
      .with_config("delayAmount", 60)
      .with_config("delayUnit", "seconds"),
  ]);

  let handle = engine.run(&wf).unwrap();
  tokio::time::sleep(Duration::from_millis(5000)).await;
  handle.cancel();
  let report = handle.wait().await.unwrap();
  let events = memory.events();

  assert_eq!(report.run.outcome(), RunOutcome::Failed);
  assert_eq!(
    statuses(&events, "b"),
    vec![NodeStatus::Running, NodeStatus::Error]
  );
  assert_eq!(report.workflow.get_node("b").unwrap().status, NodeStatus::Error);
  assert!(report.run.node_results.contains_key("b"));
  assert_eq!(
    last_node_flags(&events),
    vec![("b".to_string(), RunOutcome::Failed)]
  );
  assert!(
    !events
      .iter()
      .any(|e| matches!(e, ExecutionEvent::RunCancelled { .. }))
  );
}

#[tokio::test(start_paused = true)]
async fn test_nan_failure_rate_runs_without_failures() {
  let config = EngineConfig::default().with_failure_rate(f64::NAN);
  let engine = Engine::new(config.clone())
    .with_decisions(Decisions::seeded(config.failure_rate, 9));
  let wf = workflow(vec![
    Node::trigger("t", "Start").connect(["a"]),
    Node::action("a", "A"),
  ]);

  let report = engine.run(&wf).unwrap().wait().await.unwrap();
  assert_eq!(report.run.outcome(), RunOutcome::Completed);

  let unclamped = Engine::new(EngineConfig::default())
    .with_decisions(Decisions::seeded(f64::NAN, 9));
  let report = unclamped.run(&wf).unwrap().wait().await.unwrap();
  assert_eq!(report.run.outcome(), RunOutcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_nodes_never_start() {
  let (engine, memory) = engine(NeverFail, FixedPolicy(true));
  let wf = workflow(vec![
    Node::trigger("t", "Start").connect(["a"]),
    Node::action("a", "A"),
    Node::action("island", "Island").connect(["a"]),
  ]);

  let report = engine.run(&wf).unwrap().wait().await.unwrap();
  let events = memory.events();

  assert_eq!(started(&events), vec!["t", "a"]);
  assert_eq!(
    last_node_flags(&events),
    vec![("a".to_string(), RunOutcome::Completed)]
  );
  assert_eq!(report.workflow.get_node("island").unwrap().status, NodeStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_condition_takes_exactly_one_branch() {
  for take_true in [true, false] {
    let (engine, memory) = engine(NeverFail, FixedPolicy(take_true));
    let wf = workflow(vec![
      Node::trigger("t", "Start").connect(["c"]),
      Node::condition("c", "Large order?")
        .with_config("operator", "greaterThan")
        .connect(["yes", "no"]),
      Node::action("yes", "Yes path"),
      Node::action("no", "No path"),
    ]);

    let report = engine.run(&wf).unwrap().wait().await.unwrap();
    let started = started(&memory.events());
    let (taken, skipped, skipped_title) = if take_true {
      ("yes", "no", "No path")
    } else {
      ("no", "yes", "Yes path")
    };

    assert!(started.contains(&taken.to_string()));
    assert!(!started.contains(&skipped.to_string()));
    assert_eq!(report.run.skipped, vec![skipped.to_string()]);
    assert!(memory.logs().contains(&format!(
      "Skipping: {} (condition path not taken)",
      skipped_title
    )));

    let data = report.run.node_results["c"].data.clone().unwrap();
    assert_eq!(data["result"], take_true);
    assert_eq!(report.run.outcome(), RunOutcome::Completed);
  }
}

#[tokio::test(start_paused = true)]
async fn test_single_edge_false_branch_is_skipped() {
  let (engine, memory) = engine(NeverFail, FixedPolicy(false));
  let wf = workflow(vec![
    Node::trigger("t", "Start").connect(["c"]),
    Node::condition("c", "Check").connect(["only"]),
    Node::action("only", "Only"),
  ]);

  let report = engine.run(&wf).unwrap().wait().await.unwrap();
  let events = memory.events();

  assert!(statuses(&events, "only").is_empty());
  assert_eq!(
    last_node_flags(&events),
    vec![("c".to_string(), RunOutcome::Completed)]
  );
  assert!(
    memory
      .logs()
      .contains(&"Condition Check evaluated to FALSE".to_string())
  );
  assert_eq!(report.run.outcome(), RunOutcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_operand_condition_uses_literals() {
  let memory = Arc::new(MemoryNotifier::new());
  let engine = Engine::with_shared_notifier(EngineConfig::default(), memory.clone())
    .with_decisions(Decisions::seeded(0.0, 3).with_failures(NeverFail));
  let wf = workflow(vec![
    Node::trigger("t", "Start").connect(["c"]),
    Node::condition("c", "Amount over limit")
      .with_config("operator", "lessThan")
      .with_config("leftOperand", 20)
      .with_config("rightOperand", "10")
      .connect(["over", "under"]),
    Node::action("over", "Over"),
    Node::action("under", "Under"),
  ]);

  let report = engine.run(&wf).unwrap().wait().await.unwrap();
  assert_eq!(report.run.skipped, vec!["over".to_string()]);
  assert_eq!(
    report.workflow.get_node("under").unwrap().status,
    NodeStatus::Success
  );
}

#[tokio::test(start_paused = true)]
async fn test_cycle_is_not_reentered() {
  let (engine, memory) = engine(NeverFail, FixedPolicy(true));
  let wf = workflow(vec![
    Node::trigger("t", "Start").connect(["a"]),
    Node::action("a", "A").connect(["b"]),
    Node::action("b", "B").connect(["a"]),
  ]);

  let report = engine.run(&wf).unwrap().wait().await.unwrap();

  assert_eq!(started(&memory.events()), vec!["t", "a", "b"]);
  assert!(
    memory
      .logs()
      .contains(&"Warning: Cycle detected in workflow at node A, skipping".to_string())
  );
  assert_eq!(report.run.outcome(), RunOutcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_self_loop_terminates() {
  let (engine, memory) = engine(NeverFail, FixedPolicy(true));
  let wf = workflow(vec![
    Node::trigger("t", "Start").connect(["a"]),
    Node::action("a", "Retry").connect(["a"]),
  ]);

  let report = engine.run(&wf).unwrap().wait().await.unwrap();
  assert_eq!(statuses(&memory.events(), "a").len(), 2);
  assert_eq!(report.run.outcome(), RunOutcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_depth_ceiling_stops_long_chains() {
  let (engine, memory) = engine(NeverFail, FixedPolicy(true));
  let wf = workflow(chain(25));

  let report = engine.run(&wf).unwrap().wait().await.unwrap();
  let started = started(&memory.events());

  assert_eq!(started.len(), 21);
  assert_eq!(started.last().map(String::as_str), Some("n20"));
  assert!(
    memory
      .logs()
      .contains(&"Warning: Maximum workflow depth reached, execution stopped".to_string())
  );
  assert_eq!(report.workflow.get_node("n21").unwrap().status, NodeStatus::Idle);
  assert_eq!(report.run.outcome(), RunOutcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_diamond_join_runs_per_activation() {
  let (engine, memory) = engine(NeverFail, FixedPolicy(true));
  let wf = workflow(vec![
    Node::trigger("t", "Start").connect(["a", "b"]),
    Node::action("a", "A").connect(["j"]),
    Node::action("b", "B").connect(["j"]),
    Node::action("j", "Join"),
  ]);

  let report = engine.run(&wf).unwrap().wait().await.unwrap();
  let events = memory.events();

  assert_eq!(started(&events).iter().filter(|id| *id == "j").count(), 2);
  assert_eq!(last_node_flags(&events).len(), 1);
  assert_eq!(report.run.outcome(), RunOutcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_triggers_start_staggered_in_authoring_order() {
  let (engine, memory) = engine(NeverFail, FixedPolicy(true));
  let wf = workflow(vec![
    Node::trigger("t1", "First"),
    Node::trigger("t2", "Second"),
  ]);

  let begin = Instant::now();
  let report = engine.run(&wf).unwrap().wait().await.unwrap();
  let elapsed = begin.elapsed();

  assert_eq!(started(&memory.events()), vec!["t1", "t2"]);
  assert!(elapsed >= Duration::from_millis(2000), "{:?}", elapsed);
  assert!(elapsed < Duration::from_millis(2100), "{:?}", elapsed);
  assert_eq!(report.run.outcome(), RunOutcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_delay_node_waits_configured_amount() {
  let (engine, _memory) = engine(NeverFail, FixedPolicy(true));
  let wf = workflow(vec![
    Node::trigger("t", "Start").connect(["d"]),
    Node::delay("d", "Wait")
      .with_config("delayAmount", "3")
      .with_config("delayUnit", "seconds"),
  ]);

  let begin = Instant::now();
  let report = engine.run(&wf).unwrap().wait().await.unwrap();
  let elapsed = begin.elapsed();

  // 1.5s trigger settle, 0.8s edge stagger, 3s delay.
  assert!(elapsed >= Duration::from_millis(5300), "{:?}", elapsed);
  assert!(elapsed < Duration::from_millis(5400), "{:?}", elapsed);
  let data = report.run.node_results["d"].data.clone().unwrap();
  assert_eq!(data["delayUnit"], "seconds");
}

#[tokio::test(start_paused = true)]
async fn test_cancel_returns_running_nodes_to_idle() {
  let (engine, memory) = engine(NeverFail, FixedPolicy(true));
  let wf = workflow(vec![
    Node::trigger("t", "Start").connect(["a"]),
    Node::action("a", "A").connect(["b"]),
    Node::action("b", "B"),
  ]);

  let handle = engine.run(&wf).unwrap();
  // `a` runs from 2.3s to 4.3s.
  tokio::time::sleep(Duration::from_millis(3000)).await;
  handle.cancel();
  let report = handle.wait().await.unwrap();
  let events = memory.events();

  assert_eq!(report.run.outcome(), RunOutcome::Cancelled);
  assert_eq!(
    statuses(&events, "a"),
    vec![NodeStatus::Running, NodeStatus::Idle]
  );
  assert!(statuses(&events, "b").is_empty());
  assert_eq!(report.workflow.get_node("a").unwrap().status, NodeStatus::Idle);
  assert!(matches!(
    events.last(),
    Some(ExecutionEvent::RunCancelled { .. })
  ));
  assert!(
    !events
      .iter()
      .any(|e| matches!(e, ExecutionEvent::RunCompleted { .. }))
  );
}

#[tokio::test(start_paused = true)]
async fn test_seeded_runs_replay_identically() {
  let wf = workflow(vec![
    Node::trigger("t", "Start").connect(["c"]),
    Node::condition("c", "Check")
      .with_config("conditionType", "comparison")
      .connect(["a", "b"]),
    Node::action("a", "A").connect(["x"]),
    Node::action("b", "B").connect(["x"]),
    Node::action("x", "X"),
  ]);

  let mut outcomes = Vec::new();
  for _ in 0..2 {
    let memory = Arc::new(MemoryNotifier::new());
    let engine = Engine::with_shared_notifier(EngineConfig::default(), memory.clone())
      .with_decisions(Decisions::seeded(0.5, 99));
    let report = engine.run(&wf).unwrap().wait().await.unwrap();
    outcomes.push((started(&memory.events()), report.run.outcome()));
  }

  assert_eq!(outcomes[0], outcomes[1]);
}

//! Flowsim Engine
//!
//! This crate simulates the execution of a [`flowsim_workflow::Workflow`]. Nothing
//! real runs: every node settles after a timed wait and reports a synthesized
//! result, so a workflow can be previewed end to end.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                              │
//! │  - run(workflow) → RunHandle (validation gate first)        │
//! │  - owns config, decision sources and the notifier           │
//! └─────────────────────────────────────────────────────────────┘
//!                               │ spawns
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Scheduler                            │
//! │  - timed start/settle steps on a single task                │
//! │  - branching, cycle and depth guards, fail-fast             │
//! └─────────────────────────────────────────────────────────────┘
//!          │ consults                         │ emits
//!          ▼                                  ▼
//!   ConditionPolicy / FailurePolicy    ExecutionNotifier
//!   ResultSynthesizer                  (noop, channel, memory)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use flowsim_engine::{ChannelNotifier, Engine, EngineConfig};
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let engine = Engine::with_notifier(EngineConfig::default(), ChannelNotifier::new(tx));
//!
//! let handle = engine.run(&workflow)?;
//! let report = handle.wait().await?;
//! println!("{:?}", report.run.outcome());
//! ```

mod condition;
mod config;
mod decision;
mod engine;
mod error;
mod events;
mod run;
mod scheduler;
mod session;
mod synth;

pub use condition::{
  ConditionPolicy, FixedPolicy, OperandPolicy, RandomPolicy, ScriptedPolicy, branch_fires, compare,
};
pub use config::EngineConfig;
pub use decision::{Decisions, FailNodes, FailurePolicy, NeverFail, RandomFailures};
pub use engine::{Engine, RunHandle, RunReport};
pub use error::{EngineError, SessionError, ValidationError, ValidationIssue};
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, MemoryNotifier, NoopNotifier};
pub use run::{ExecutionRun, LogEntry, RunOutcome};
pub use session::{WorkflowSession, WorkflowState};
pub use synth::ResultSynthesizer;

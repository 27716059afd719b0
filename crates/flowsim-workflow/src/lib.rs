//! Flowsim Workflow
//!
//! This crate provides the authored workflow representation for flowsim.
//! A workflow is a set of nodes keyed by id, each carrying an ordered list of
//! downstream node ids (`connected_to`).
//!
//! Key responsibilities:
//! - Structural edits (add/update/remove nodes, add/remove edges)
//! - Validation (at least one trigger, no dangling edges, node configuration)
//! - Forward and reverse adjacency queries via [`Graph`]
//! - Typed views over the open per-node configuration map via [`NodeConfig`]
//!
//! Nothing in this crate performs I/O or waits on timers.

mod config;
mod error;
mod graph;
mod node;
mod workflow;

pub use config::{ActionKind, ConditionConfig, ConditionOperator, DelayUnit, NodeConfig};
pub use error::WorkflowError;
pub use graph::Graph;
pub use node::{
  DataMapping, ExecutionResult, Node, NodeParameter, NodeStatus, NodeType, NodeUpdate,
  NodeValidationError, ParameterType, ValidationSeverity,
};
pub use workflow::Workflow;

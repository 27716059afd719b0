//! Branch decisions for condition nodes.
//!
//! A condition node's first edge is its "true" branch and every later edge
//! belongs to the "false" branch. Which branch fires is decided by a
//! [`ConditionPolicy`]; the scheduler never looks at operands itself.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use flowsim_workflow::{ConditionConfig, ConditionOperator, Node};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

/// Decides whether a condition node takes its true branch.
pub trait ConditionPolicy: Send + Sync {
  fn decide(&self, node: &Node, condition: &ConditionConfig) -> bool;
}

/// Whether edge `index` of a condition node fires for the given decision.
pub fn branch_fires(index: usize, take_true: bool) -> bool {
  if index == 0 { take_true } else { !take_true }
}

/// Coin flip weighted towards the true branch when the node is configured.
///
/// Configured nodes take the true branch 70% of the time, unconfigured ones 50%.
pub struct RandomPolicy {
  rng: Mutex<StdRng>,
}

impl RandomPolicy {
  pub fn new() -> Self {
    Self {
      rng: Mutex::new(StdRng::from_entropy()),
    }
  }

  pub fn seeded(seed: u64) -> Self {
    Self {
      rng: Mutex::new(StdRng::seed_from_u64(seed)),
    }
  }
}

impl Default for RandomPolicy {
  fn default() -> Self {
    Self::new()
  }
}

impl ConditionPolicy for RandomPolicy {
  fn decide(&self, _node: &Node, condition: &ConditionConfig) -> bool {
    let threshold = if condition.configured { 0.3 } else { 0.5 };
    let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
    rng.r#gen::<f64>() > threshold
  }
}

/// Always returns the same decision.
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy(pub bool);

impl ConditionPolicy for FixedPolicy {
  fn decide(&self, _node: &Node, _condition: &ConditionConfig) -> bool {
    self.0
  }
}

/// Per-node decisions for replaying a run, with a fallback for unlisted nodes.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPolicy {
  outcomes: HashMap<String, bool>,
  fallback: bool,
}

impl ScriptedPolicy {
  pub fn new(fallback: bool) -> Self {
    Self {
      outcomes: HashMap::new(),
      fallback,
    }
  }

  pub fn with(mut self, node_id: impl Into<String>, take_true: bool) -> Self {
    self.outcomes.insert(node_id.into(), take_true);
    self
  }

  pub fn set(&mut self, node_id: impl Into<String>, take_true: bool) {
    self.outcomes.insert(node_id.into(), take_true);
  }
}

impl ConditionPolicy for ScriptedPolicy {
  fn decide(&self, node: &Node, _condition: &ConditionConfig) -> bool {
    self.outcomes.get(&node.id).copied().unwrap_or(self.fallback)
  }
}

/// Compares literal operands when the node has them, otherwise defers to `inner`.
///
/// A left operand written as a `{{...}}` reference has nothing to resolve
/// against in a simulation and is treated as absent.
pub struct OperandPolicy<P> {
  inner: P,
}

impl<P: ConditionPolicy> OperandPolicy<P> {
  pub fn new(inner: P) -> Self {
    Self { inner }
  }
}

impl<P: ConditionPolicy> ConditionPolicy for OperandPolicy<P> {
  fn decide(&self, node: &Node, condition: &ConditionConfig) -> bool {
    match condition.left_operand.as_ref().filter(|v| !is_reference(v)) {
      Some(left) => compare(
        condition.operator,
        left,
        condition.right_operand.as_ref().unwrap_or(&Value::Null),
      ),
      None => self.inner.decide(node, condition),
    }
  }
}

fn is_reference(value: &Value) -> bool {
  matches!(value, Value::String(s) if s.trim_start().starts_with("{{"))
}

/// Apply a comparison operator to two JSON operands.
///
/// Numbers and numeric strings compare numerically. Ordering operators on
/// non-numeric operands are false.
pub fn compare(operator: ConditionOperator, left: &Value, right: &Value) -> bool {
  match operator {
    ConditionOperator::Equals => loosely_equal(left, right),
    ConditionOperator::NotEquals => !loosely_equal(left, right),
    ConditionOperator::GreaterThan => match (as_number(left), as_number(right)) {
      (Some(l), Some(r)) => l > r,
      _ => false,
    },
    ConditionOperator::LessThan => match (as_number(left), as_number(right)) {
      (Some(l), Some(r)) => l < r,
      _ => false,
    },
    ConditionOperator::Contains => match left {
      Value::Array(items) => items.iter().any(|item| loosely_equal(item, right)),
      Value::String(haystack) => haystack.contains(&display(right)),
      _ => false,
    },
  }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
  if left == right {
    return true;
  }
  match (as_number(left), as_number(right)) {
    (Some(l), Some(r)) => l == r,
    _ => matches!((left, right), (Value::String(_), _) | (_, Value::String(_)))
      && display(left) == display(right),
  }
}

fn as_number(value: &Value) -> Option<f64> {
  match value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

fn display(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

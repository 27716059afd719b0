//! Engine timing and failure configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::decision::clamp_rate;

/// Timings are stored in milliseconds so the struct round-trips through JSON
/// settings files unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Delay between successive trigger starts.
  pub trigger_stagger_ms: u64,
  /// How long a trigger stays running.
  pub trigger_settle_ms: u64,
  /// Per-edge stagger; edge `i` starts after `(i + 1) * branch_stagger_ms`.
  pub branch_stagger_ms: u64,
  /// Simulated latency of every non-trigger, non-delay node.
  pub node_latency_ms: u64,
  /// Maximum number of hops followed from a trigger.
  pub max_depth: usize,
  /// Probability that a non-trigger node fails.
  pub failure_rate: f64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      trigger_stagger_ms: 500,
      trigger_settle_ms: 1500,
      branch_stagger_ms: 800,
      node_latency_ms: 2000,
      max_depth: 20,
      failure_rate: 0.1,
    }
  }
}

impl EngineConfig {
  pub fn with_trigger_stagger(mut self, stagger: Duration) -> Self {
    self.trigger_stagger_ms = stagger.as_millis() as u64;
    self
  }

  pub fn with_trigger_settle(mut self, settle: Duration) -> Self {
    self.trigger_settle_ms = settle.as_millis() as u64;
    self
  }

  pub fn with_branch_stagger(mut self, stagger: Duration) -> Self {
    self.branch_stagger_ms = stagger.as_millis() as u64;
    self
  }

  pub fn with_node_latency(mut self, latency: Duration) -> Self {
    self.node_latency_ms = latency.as_millis() as u64;
    self
  }

  pub fn with_max_depth(mut self, max_depth: usize) -> Self {
    self.max_depth = max_depth;
    self
  }

  /// Clamped to `0.0..=1.0`; `NaN` and infinities become `0.0`.
  pub fn with_failure_rate(mut self, rate: f64) -> Self {
    self.failure_rate = clamp_rate(rate);
    self
  }

  pub fn trigger_stagger(&self) -> Duration {
    Duration::from_millis(self.trigger_stagger_ms)
  }

  pub fn trigger_settle(&self) -> Duration {
    Duration::from_millis(self.trigger_settle_ms)
  }

  pub fn branch_stagger(&self) -> Duration {
    Duration::from_millis(self.branch_stagger_ms)
  }

  pub fn node_latency(&self) -> Duration {
    Duration::from_millis(self.node_latency_ms)
  }
}

//! Bounded exponential reconnect backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
  pub base_interval_ms: u64,
  pub factor: f64,
  pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
  fn default() -> Self {
    Self {
      base_interval_ms: 3000,
      factor: 1.5,
      max_attempts: 5,
    }
  }
}

impl ReconnectPolicy {
  pub fn new(base_interval: Duration, factor: f64, max_attempts: u32) -> Self {
    Self {
      base_interval_ms: base_interval.as_millis() as u64,
      factor,
      max_attempts,
    }
  }

  /// Wait before reconnect attempt `attempt` (1-based), or `None` once the
  /// attempts are used up.
  pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
    if attempt == 0 || attempt > self.max_attempts {
      return None;
    }
    let scale = self.factor.max(1.0).powi(attempt as i32 - 1);
    Some(Duration::from_millis(
      (self.base_interval_ms as f64 * scale) as u64,
    ))
  }
}

/// Attempt counter over a [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
  policy: ReconnectPolicy,
  attempts: u32,
}

impl Backoff {
  pub fn new(policy: ReconnectPolicy) -> Self {
    Self { policy, attempts: 0 }
  }

  /// Count an attempt and return how long to wait before making it.
  pub fn next_delay(&mut self) -> Option<Duration> {
    let delay = self.policy.delay_for(self.attempts + 1)?;
    self.attempts += 1;
    Some(delay)
  }

  pub fn attempts(&self) -> u32 {
    self.attempts
  }

  pub fn reset(&mut self) {
    self.attempts = 0;
  }
}

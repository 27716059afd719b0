//! Injected decision sources.
//!
//! Every random choice a run makes goes through [`Decisions`]: branch
//! decisions, node failures and the content of synthesized results. Seeding
//! them makes a run reproducible.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use flowsim_workflow::Node;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::condition::{ConditionPolicy, OperandPolicy, RandomPolicy};
use crate::synth::ResultSynthesizer;

/// Decides whether a node's simulated execution fails.
///
/// Triggers never fail; the scheduler does not consult the policy for them.
pub trait FailurePolicy: Send + Sync {
  fn should_fail(&self, node: &Node) -> bool;
}

/// Bounds a probability to `0.0..=1.0`. Non-finite rates count as `0.0`.
pub(crate) fn clamp_rate(rate: f64) -> f64 {
  if rate.is_finite() {
    rate.clamp(0.0, 1.0)
  } else {
    0.0
  }
}

/// Each node fails independently with probability `rate`.
pub struct RandomFailures {
  rate: f64,
  rng: Mutex<StdRng>,
}

impl RandomFailures {
  pub fn new(rate: f64) -> Self {
    Self {
      rate: clamp_rate(rate),
      rng: Mutex::new(StdRng::from_entropy()),
    }
  }

  pub fn seeded(rate: f64, seed: u64) -> Self {
    Self {
      rate: clamp_rate(rate),
      rng: Mutex::new(StdRng::seed_from_u64(seed)),
    }
  }
}

impl FailurePolicy for RandomFailures {
  fn should_fail(&self, _node: &Node) -> bool {
    let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
    rng.gen_bool(self.rate)
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverFail;

impl FailurePolicy for NeverFail {
  fn should_fail(&self, _node: &Node) -> bool {
    false
  }
}

/// Fails exactly the listed nodes.
#[derive(Debug, Clone, Default)]
pub struct FailNodes {
  ids: HashSet<String>,
}

impl FailNodes {
  pub fn new<I, S>(ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      ids: ids.into_iter().map(Into::into).collect(),
    }
  }
}

impl FailurePolicy for FailNodes {
  fn should_fail(&self, node: &Node) -> bool {
    self.ids.contains(&node.id)
  }
}

/// The decision sources a run consults.
#[derive(Clone)]
pub struct Decisions {
  pub(crate) conditions: Arc<dyn ConditionPolicy>,
  pub(crate) failures: Arc<dyn FailurePolicy>,
  pub(crate) synth: Arc<ResultSynthesizer>,
}

impl Decisions {
  /// Entropy-seeded sources: literal operands are compared, everything else is
  /// a weighted coin flip.
  pub fn random(failure_rate: f64) -> Self {
    Self {
      conditions: Arc::new(OperandPolicy::new(RandomPolicy::new())),
      failures: Arc::new(RandomFailures::new(failure_rate)),
      synth: Arc::new(ResultSynthesizer::new()),
    }
  }

  /// Like [`Decisions::random`], but every source derives from `seed`.
  pub fn seeded(failure_rate: f64, seed: u64) -> Self {
    Self {
      conditions: Arc::new(OperandPolicy::new(RandomPolicy::seeded(seed))),
      failures: Arc::new(RandomFailures::seeded(failure_rate, seed.wrapping_add(1))),
      synth: Arc::new(ResultSynthesizer::seeded(seed.wrapping_add(2))),
    }
  }

  pub fn with_conditions(mut self, policy: impl ConditionPolicy + 'static) -> Self {
    self.conditions = Arc::new(policy);
    self
  }

  pub fn with_failures(mut self, policy: impl FailurePolicy + 'static) -> Self {
    self.failures = Arc::new(policy);
    self
  }

  pub fn with_synthesizer(mut self, synth: ResultSynthesizer) -> Self {
    self.synth = Arc::new(synth);
    self
  }
}

impl std::fmt::Debug for Decisions {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Decisions").finish_non_exhaustive()
  }
}

//! Synthetic node results.

use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use flowsim_workflow::{ActionKind, ExecutionResult, Node, NodeConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

const FAILURE_MESSAGE: &str = "Execution failed due to an error";
const FAILURE_LOGS: [&str; 3] = [
  "Error occurred during execution",
  "Connection timeout or server error",
  "Check node configuration and try again",
];

/// Produces plausible, type-specific results for simulated nodes.
pub struct ResultSynthesizer {
  rng: Mutex<StdRng>,
}

impl Default for ResultSynthesizer {
  fn default() -> Self {
    Self::new()
  }
}

impl ResultSynthesizer {
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

  /// Result of a successful node. `branch` is the decision taken by a
  /// condition node and is echoed in its data.
  pub fn success(&self, node: &Node, branch: Option<bool>) -> ExecutionResult {
    let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
    let duration: u64 = rng.gen_range(100..1100);
    let title = node.label();
    let now = Utc::now().to_rfc3339();

    let data = match node.config() {
      NodeConfig::Trigger { event } => Some(json!({
        "triggerId": short_id(&mut rng, "trig"),
        "timestamp": now,
        "event": event,
      })),
      NodeConfig::Action {
        kind: ActionKind::Api,
        ..
      } => Some(json!({
        "statusCode": 200,
        "responseTime": duration,
        "response": {
          "success": true,
          "id": short_id(&mut rng, "res"),
          "timestamp": now,
        },
      })),
      NodeConfig::Action {
        kind: ActionKind::Email,
        ..
      } => Some(json!({
        "messageId": short_id(&mut rng, "msg"),
        "recipients": 1,
        "status": "sent",
      })),
      NodeConfig::Action { .. } => Some(json!({
        "actionId": short_id(&mut rng, "act"),
        "status": "completed",
      })),
      NodeConfig::Condition(condition) => Some(json!({
        "evaluated": true,
        "result": branch.unwrap_or(true),
        "condition": condition.condition_type,
      })),
      NodeConfig::Delay { amount, unit } => Some(json!({
        "delayAmount": amount,
        "delayUnit": unit.as_str(),
        "resumedAt": now,
      })),
      NodeConfig::Data => None,
    };

    ExecutionResult {
      success: true,
      message: format!("{} executed successfully", title),
      logs: vec![
        format!("Started execution of {}", title),
        format!("Completed {}", title),
      ],
      data,
      duration,
    }
  }

  /// The fixed result of a failed node.
  pub fn failure(&self) -> ExecutionResult {
    ExecutionResult {
      success: false,
      message: FAILURE_MESSAGE.to_string(),
      logs: FAILURE_LOGS.iter().map(|l| l.to_string()).collect(),
      data: None,
      duration: 0,
    }
  }
}

/// `prefix_` followed by eight lowercase base-36 characters.
fn short_id(rng: &mut StdRng, prefix: &str) -> String {
  let suffix: String = (0..8)
    .filter_map(|_| char::from_digit(rng.gen_range(0..36), 36))
    .collect();
  format!("{}_{}", prefix, suffix)
}

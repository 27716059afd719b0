//! Typed views over the open node configuration map.
//!
//! Authoring tools store configuration as free-form JSON keyed by camelCase
//! names (`delayAmount`, `conditionType`, ...). The engine reads it through
//! [`NodeConfig`], a tagged union with one variant per node type. Parsing is
//! lenient: missing or malformed values fall back to the authoring defaults,
//! and numeric fields accept both numbers and numeric strings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::node::NodeType;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
  Trigger {
    event: String,
  },
  Action {
    kind: ActionKind,
    api_method: Option<String>,
    api_url: Option<String>,
  },
  Condition(ConditionConfig),
  Delay {
    amount: u64,
    unit: DelayUnit,
  },
  Data,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
  Api,
  Email,
  Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionConfig {
  pub condition_type: String,
  pub operator: ConditionOperator,
  pub left_operand: Option<Value>,
  pub right_operand: Option<Value>,
  /// False when the node carried no configuration at all.
  pub configured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOperator {
  Equals,
  NotEquals,
  GreaterThan,
  LessThan,
  Contains,
}

impl ConditionOperator {
  fn parse(value: &str) -> Option<Self> {
    match value {
      "equals" => Some(Self::Equals),
      "notEquals" => Some(Self::NotEquals),
      "greaterThan" => Some(Self::GreaterThan),
      "lessThan" => Some(Self::LessThan),
      "contains" => Some(Self::Contains),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
  Seconds,
  Minutes,
  Hours,
  Days,
}

impl DelayUnit {
  fn parse(value: &str) -> Option<Self> {
    match value {
      "seconds" => Some(Self::Seconds),
      "minutes" => Some(Self::Minutes),
      "hours" => Some(Self::Hours),
      "days" => Some(Self::Days),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      DelayUnit::Seconds => "seconds",
      DelayUnit::Minutes => "minutes",
      DelayUnit::Hours => "hours",
      DelayUnit::Days => "days",
    }
  }

  pub fn millis(&self) -> u64 {
    match self {
      DelayUnit::Seconds => 1_000,
      DelayUnit::Minutes => 60_000,
      DelayUnit::Hours => 3_600_000,
      DelayUnit::Days => 86_400_000,
    }
  }
}

const DEFAULT_DELAY_AMOUNT: u64 = 5;

impl NodeConfig {
  pub fn from_map(node_type: NodeType, map: &Map<String, Value>) -> Self {
    match node_type {
      NodeType::Trigger => NodeConfig::Trigger {
        event: string_field(map, "triggerEvent").unwrap_or_else(|| "manual".to_string()),
      },
      NodeType::Action => {
        let kind = match string_field(map, "actionType").as_deref() {
          None | Some("api") => ActionKind::Api,
          Some("email") => ActionKind::Email,
          Some(other) => ActionKind::Other(other.to_string()),
        };
        NodeConfig::Action {
          kind,
          api_method: string_field(map, "apiMethod"),
          api_url: string_field(map, "apiUrl"),
        }
      }
      NodeType::Condition => NodeConfig::Condition(ConditionConfig {
        condition_type: string_field(map, "conditionType")
          .unwrap_or_else(|| "comparison".to_string()),
        operator: string_field(map, "operator")
          .and_then(|op| ConditionOperator::parse(&op))
          .unwrap_or(ConditionOperator::Equals),
        left_operand: value_field(map, "leftOperand"),
        right_operand: value_field(map, "rightOperand"),
        configured: !map.is_empty(),
      }),
      NodeType::Delay => NodeConfig::Delay {
        amount: u64_field(map, "delayAmount").unwrap_or(DEFAULT_DELAY_AMOUNT),
        unit: string_field(map, "delayUnit")
          .and_then(|u| DelayUnit::parse(&u))
          .unwrap_or(DelayUnit::Minutes),
      },
      NodeType::Data => NodeConfig::Data,
    }
  }

  /// The configured wait of a delay node.
  pub fn delay_duration(&self) -> Option<Duration> {
    match self {
      NodeConfig::Delay { amount, unit } => {
        Some(Duration::from_millis(amount.saturating_mul(unit.millis())))
      }
      _ => None,
    }
  }
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
  match map.get(key)? {
    Value::String(s) if !s.is_empty() => Some(s.clone()),
    _ => None,
  }
}

fn value_field(map: &Map<String, Value>, key: &str) -> Option<Value> {
  match map.get(key)? {
    Value::Null => None,
    Value::String(s) if s.is_empty() => None,
    other => Some(other.clone()),
  }
}

fn u64_field(map: &Map<String, Value>, key: &str) -> Option<u64> {
  match map.get(key)? {
    Value::Number(n) => n
      .as_u64()
      .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

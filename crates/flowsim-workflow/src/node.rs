use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::NodeConfig;

/// The kind of work a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
  Trigger,
  Action,
  Condition,
  Delay,
  Data,
}

impl NodeType {
  pub fn as_str(&self) -> &'static str {
    match self {
      NodeType::Trigger => "trigger",
      NodeType::Action => "action",
      NodeType::Condition => "condition",
      NodeType::Delay => "delay",
      NodeType::Data => "data",
    }
  }
}

/// Execution status of a single node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
  #[default]
  Idle,
  Running,
  Success,
  Error,
}

impl NodeStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, NodeStatus::Success | NodeStatus::Error)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
  String,
  Number,
  Boolean,
  Object,
  Array,
  Date,
}

/// An input or output parameter declared on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeParameter {
  pub id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub param_type: ParameterType,
  #[serde(default)]
  pub required: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default_value: Option<Value>,
}

/// Maps an output parameter of an upstream node onto one of this node's inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataMapping {
  pub source_node_id: String,
  pub source_parameter_id: String,
  pub target_parameter_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationSeverity {
  Warning,
  Error,
}

/// A configuration problem attached to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeValidationError {
  pub param_id: String,
  pub message: String,
  pub severity: ValidationSeverity,
}

/// The synthesized outcome of a node run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
  pub success: bool,
  pub message: String,
  #[serde(default)]
  pub logs: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
  /// Simulated duration in milliseconds.
  #[serde(default)]
  pub duration: u64,
}

/// A node in a workflow graph.
///
/// The node type is fixed at construction; changing it means replacing the node.
/// `status` and `execution_result` belong to the scheduler and are only written
/// while a run owns the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
  pub id: String,
  #[serde(rename = "type")]
  node_type: NodeType,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub description: String,
  #[serde(default, alias = "configData")]
  pub configuration: Map<String, Value>,
  #[serde(default)]
  pub connected_to: Vec<String>,
  #[serde(default)]
  pub inputs: Vec<NodeParameter>,
  #[serde(default)]
  pub outputs: Vec<NodeParameter>,
  #[serde(default)]
  pub data_mappings: Vec<DataMapping>,
  #[serde(default)]
  pub validation_errors: Vec<NodeValidationError>,
  #[serde(default)]
  pub status: NodeStatus,
  #[serde(default, skip_serializing_if = "Option::is_none", alias = "executionResults")]
  pub execution_result: Option<ExecutionResult>,
}

impl Node {
  pub fn new(id: impl Into<String>, node_type: NodeType, title: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      node_type,
      title: title.into(),
      description: String::new(),
      configuration: Map::new(),
      connected_to: Vec::new(),
      inputs: Vec::new(),
      outputs: Vec::new(),
      data_mappings: Vec::new(),
      validation_errors: Vec::new(),
      status: NodeStatus::Idle,
      execution_result: None,
    }
  }

  pub fn trigger(id: impl Into<String>, title: impl Into<String>) -> Self {
    Self::new(id, NodeType::Trigger, title)
  }

  pub fn action(id: impl Into<String>, title: impl Into<String>) -> Self {
    Self::new(id, NodeType::Action, title)
  }

  pub fn condition(id: impl Into<String>, title: impl Into<String>) -> Self {
    Self::new(id, NodeType::Condition, title)
  }

  pub fn delay(id: impl Into<String>, title: impl Into<String>) -> Self {
    Self::new(id, NodeType::Delay, title)
  }

  pub fn data(id: impl Into<String>, title: impl Into<String>) -> Self {
    Self::new(id, NodeType::Data, title)
  }

  /// Set a configuration entry, builder style.
  pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.configuration.insert(key.into(), value.into());
    self
  }

  /// Append downstream targets, builder style.
  pub fn connect<I, S>(mut self, targets: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self
      .connected_to
      .extend(targets.into_iter().map(Into::into));
    self
  }

  pub fn node_type(&self) -> NodeType {
    self.node_type
  }

  pub fn is_trigger(&self) -> bool {
    self.node_type == NodeType::Trigger
  }

  /// Typed view of the configuration map for this node's type.
  pub fn config(&self) -> NodeConfig {
    NodeConfig::from_map(self.node_type, &self.configuration)
  }

  /// Display label, falling back to the id when no title was authored.
  pub fn label(&self) -> &str {
    if self.title.is_empty() {
      &self.id
    } else {
      &self.title
    }
  }

  /// Return the node to its pre-run state.
  pub fn reset(&mut self) {
    self.status = NodeStatus::Idle;
    self.execution_result = None;
  }

  /// Every configuration finding for this node, warnings included.
  ///
  /// Authored findings come first, followed by the computed ones: a required
  /// input needs either a literal value (a configuration entry under the
  /// parameter id, or a declared default) or a data mapping targeting it.
  pub fn validation_findings(&self) -> Vec<NodeValidationError> {
    let mut findings = self.validation_errors.clone();

    for input in self.inputs.iter().filter(|i| i.required) {
      let has_mapping = self
        .data_mappings
        .iter()
        .any(|m| m.target_parameter_id == input.id);
      let has_value = self
        .configuration
        .get(&input.id)
        .is_some_and(|v| !v.is_null())
        || input.default_value.as_ref().is_some_and(|v| !v.is_null());

      if !has_mapping && !has_value {
        findings.push(NodeValidationError {
          param_id: input.id.clone(),
          message: format!("{} is required but has no value or mapping", input.name),
          severity: ValidationSeverity::Error,
        });
      }
    }

    if self.node_type == NodeType::Condition && self.outputs.len() < 2 {
      findings.push(NodeValidationError {
        param_id: "outputs".to_string(),
        message: "condition nodes should declare two outputs (true/false)".to_string(),
        severity: ValidationSeverity::Warning,
      });
    }

    findings
  }

  /// Findings that block execution.
  pub fn configuration_errors(&self) -> Vec<NodeValidationError> {
    self
      .validation_findings()
      .into_iter()
      .filter(|f| f.severity == ValidationSeverity::Error)
      .collect()
  }
}

/// A partial update applied by [`crate::Workflow::update_node`].
///
/// Updates never touch `type` or `id`.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
  pub title: Option<String>,
  pub description: Option<String>,
  pub configuration: Option<Map<String, Value>>,
  pub inputs: Option<Vec<NodeParameter>>,
  pub outputs: Option<Vec<NodeParameter>>,
  pub data_mappings: Option<Vec<DataMapping>>,
  pub validation_errors: Option<Vec<NodeValidationError>>,
}

impl NodeUpdate {
  pub(crate) fn apply(self, node: &mut Node) {
    if let Some(title) = self.title {
      node.title = title;
    }
    if let Some(description) = self.description {
      node.description = description;
    }
    if let Some(configuration) = self.configuration {
      node.configuration = configuration;
    }
    if let Some(inputs) = self.inputs {
      node.inputs = inputs;
    }
    if let Some(outputs) = self.outputs {
      node.outputs = outputs;
    }
    if let Some(data_mappings) = self.data_mappings {
      node.data_mappings = data_mappings;
    }
    if let Some(validation_errors) = self.validation_errors {
      node.validation_errors = validation_errors;
    }
  }
}

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::graph::Graph;
use crate::node::{Node, NodeUpdate};

/// An authored workflow.
///
/// Nodes are kept in authoring order (trigger start order follows it) and are
/// unique by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
  #[serde(default)]
  pub workflow_id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  nodes: Vec<Node>,
}

impl Workflow {
  pub fn new(workflow_id: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      workflow_id: workflow_id.into(),
      name: name.into(),
      description: String::new(),
      nodes: Vec::new(),
    }
  }

  /// Build a workflow from a node list, rejecting duplicate ids.
  pub fn from_nodes(
    workflow_id: impl Into<String>,
    name: impl Into<String>,
    nodes: Vec<Node>,
  ) -> Result<Self, WorkflowError> {
    let mut workflow = Self::new(workflow_id, name);
    for node in nodes {
      workflow.add_node(node)?;
    }
    Ok(workflow)
  }

  pub fn nodes(&self) -> &[Node] {
    &self.nodes
  }

  pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
    self.nodes.iter_mut()
  }

  pub fn get_node(&self, node_id: &str) -> Option<&Node> {
    self.nodes.iter().find(|n| n.id == node_id)
  }

  pub fn get_node_mut(&mut self, node_id: &str) -> Option<&mut Node> {
    self.nodes.iter_mut().find(|n| n.id == node_id)
  }

  pub fn contains(&self, node_id: &str) -> bool {
    self.get_node(node_id).is_some()
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Trigger nodes in authoring order.
  pub fn triggers(&self) -> impl Iterator<Item = &Node> {
    self.nodes.iter().filter(|n| n.is_trigger())
  }

  pub fn add_node(&mut self, node: Node) -> Result<(), WorkflowError> {
    if self.contains(&node.id) {
      return Err(WorkflowError::DuplicateNode(node.id));
    }
    self.nodes.push(node);
    Ok(())
  }

  pub fn update_node(&mut self, node_id: &str, update: NodeUpdate) -> Result<(), WorkflowError> {
    let node = self
      .get_node_mut(node_id)
      .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))?;
    update.apply(node);
    Ok(())
  }

  /// Remove a node along with every edge pointing at it.
  pub fn remove_node(&mut self, node_id: &str) -> Result<Node, WorkflowError> {
    let index = self
      .nodes
      .iter()
      .position(|n| n.id == node_id)
      .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))?;
    let removed = self.nodes.remove(index);

    for node in &mut self.nodes {
      node.connected_to.retain(|target| target != node_id);
      node
        .data_mappings
        .retain(|mapping| mapping.source_node_id != node_id);
    }

    Ok(removed)
  }

  pub fn add_edge(&mut self, source_id: &str, target_id: &str) -> Result<(), WorkflowError> {
    if !self.contains(source_id) || !self.contains(target_id) {
      return Err(WorkflowError::InvalidReference {
        source_id: source_id.to_string(),
        target_id: target_id.to_string(),
      });
    }
    if let Some(source) = self.get_node_mut(source_id) {
      source.connected_to.push(target_id.to_string());
    }
    Ok(())
  }

  /// Remove the first `source -> target` edge. Returns whether one was removed.
  pub fn remove_edge(&mut self, source_id: &str, target_id: &str) -> Result<bool, WorkflowError> {
    let source = self
      .get_node_mut(source_id)
      .ok_or_else(|| WorkflowError::NodeNotFound(source_id.to_string()))?;

    match source.connected_to.iter().position(|t| t == target_id) {
      Some(index) => {
        source.connected_to.remove(index);
        Ok(true)
      }
      None => Ok(false),
    }
  }

  /// Check the structural invariants, reporting the first violation.
  pub fn validate(&self) -> Result<(), WorkflowError> {
    match self.structural_issues().into_iter().next() {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }

  /// Every structural violation: missing trigger first, then dangling edges
  /// in authoring order.
  pub fn structural_issues(&self) -> Vec<WorkflowError> {
    let mut issues = Vec::new();

    if self.triggers().next().is_none() {
      issues.push(WorkflowError::NoTrigger);
    }

    for node in &self.nodes {
      for target in &node.connected_to {
        if !self.contains(target) {
          issues.push(WorkflowError::DanglingReference {
            source_id: node.id.clone(),
            target_id: target.clone(),
          });
        }
      }
    }

    issues
  }

  /// Return every node to `idle` with no result.
  pub fn reset(&mut self) {
    for node in &mut self.nodes {
      node.reset();
    }
  }

  pub fn graph(&self) -> Graph {
    Graph::new(&self.nodes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::node::{DataMapping, ExecutionResult, NodeStatus};

  fn linear() -> Workflow {
    Workflow::from_nodes(
      "wf",
      "Linear",
      vec![
        Node::trigger("t1", "Start").connect(["a1"]),
        Node::action("a1", "First").connect(["a2"]),
        Node::action("a2", "Second"),
      ],
    )
    .unwrap()
  }

  #[test]
  fn test_duplicate_node_rejected() {
    let mut wf = linear();
    let err = wf.add_node(Node::action("a1", "Again")).unwrap_err();
    assert_eq!(err, WorkflowError::DuplicateNode("a1".to_string()));
  }

  #[test]
  fn test_add_edge_requires_both_ends() {
    let mut wf = linear();
    assert!(matches!(
      wf.add_edge("a2", "missing"),
      Err(WorkflowError::InvalidReference { .. })
    ));
    assert!(matches!(
      wf.add_edge("missing", "a2"),
      Err(WorkflowError::InvalidReference { .. })
    ));

    wf.add_edge("a2", "t1").unwrap();
    assert_eq!(wf.get_node("a2").unwrap().connected_to, vec!["t1"]);
  }

  #[test]
  fn test_remove_edge_removes_first_match_only() {
    let mut wf = linear();
    wf.add_edge("t1", "a1").unwrap();
    assert_eq!(wf.get_node("t1").unwrap().connected_to, vec!["a1", "a1"]);

    assert!(wf.remove_edge("t1", "a1").unwrap());
    assert_eq!(wf.get_node("t1").unwrap().connected_to, vec!["a1"]);
    assert!(!wf.remove_edge("t1", "a2").unwrap());
  }

  #[test]
  fn test_remove_node_drops_incoming_edges_and_mappings() {
    let mut wf = linear();
    wf.get_node_mut("a2").unwrap().data_mappings.push(DataMapping {
      source_node_id: "a1".to_string(),
      source_parameter_id: "out".to_string(),
      target_parameter_id: "in".to_string(),
    });

    let removed = wf.remove_node("a1").unwrap();
    assert_eq!(removed.id, "a1");
    assert!(wf.get_node("t1").unwrap().connected_to.is_empty());
    assert!(wf.get_node("a2").unwrap().data_mappings.is_empty());
    assert!(wf.validate().is_ok());
  }

  #[test]
  fn test_update_node_keeps_type() {
    let mut wf = linear();
    wf.update_node(
      "a1",
      NodeUpdate {
        title: Some("Renamed".to_string()),
        ..Default::default()
      },
    )
    .unwrap();
    let node = wf.get_node("a1").unwrap();
    assert_eq!(node.title, "Renamed");
    assert_eq!(node.node_type(), crate::NodeType::Action);

    assert!(matches!(
      wf.update_node("nope", NodeUpdate::default()),
      Err(WorkflowError::NodeNotFound(_))
    ));
  }

  #[test]
  fn test_validate_no_trigger() {
    let wf = Workflow::from_nodes("wf", "No trigger", vec![Node::action("a", "A")]).unwrap();
    assert_eq!(wf.validate(), Err(WorkflowError::NoTrigger));
  }

  #[test]
  fn test_validate_dangling_reference() {
    let wf = Workflow::from_nodes(
      "wf",
      "Dangling",
      vec![Node::trigger("t", "Start").connect(["ghost"])],
    )
    .unwrap();
    assert_eq!(
      wf.validate(),
      Err(WorkflowError::DanglingReference {
        source_id: "t".to_string(),
        target_id: "ghost".to_string(),
      })
    );
  }

  #[test]
  fn test_reset_matches_fresh_workflow() {
    let fresh = linear();
    let mut wf = fresh.clone();
    for node in wf.nodes_mut() {
      node.status = NodeStatus::Success;
      node.execution_result = Some(ExecutionResult {
        success: true,
        message: "ok".to_string(),
        logs: vec![],
        data: None,
        duration: 5,
      });
    }

    wf.reset();
    assert_eq!(wf, fresh);
  }
}

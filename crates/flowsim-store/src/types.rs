use std::collections::HashSet;

use chrono::{DateTime, Utc};
use flowsim_workflow::{Node, Workflow, WorkflowError};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// A workflow definition as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StoredWorkflow {
  pub id: i64,
  pub owner_id: i64,
  pub name: String,
  pub description: Option<String>,
  pub nodes: Json<Vec<Node>>,
  pub complexity_score: i64,
  pub is_public: bool,
  pub is_featured: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl StoredWorkflow {
  pub(crate) fn from_new(id: i64, new: NewWorkflow) -> Self {
    let now = Utc::now();
    Self {
      id,
      owner_id: new.owner_id,
      name: new.name,
      description: new.description,
      complexity_score: complexity_score(&new.nodes),
      nodes: Json(new.nodes),
      is_public: new.is_public,
      is_featured: new.is_featured,
      created_at: now,
      updated_at: now,
    }
  }

  /// Build a runnable workflow from the stored nodes.
  pub fn to_workflow(&self) -> Result<Workflow, WorkflowError> {
    let mut workflow = Workflow::from_nodes(self.id.to_string(), self.name.clone(), self.nodes.0.clone())?;
    workflow.description = self.description.clone().unwrap_or_default();
    Ok(workflow)
  }
}

/// Fields for a new definition. The id and timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWorkflow {
  pub owner_id: i64,
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub nodes: Vec<Node>,
  #[serde(default)]
  pub is_public: bool,
  #[serde(default)]
  pub is_featured: bool,
}

impl NewWorkflow {
  pub fn new(owner_id: i64, name: impl Into<String>, nodes: Vec<Node>) -> Self {
    Self {
      owner_id,
      name: name.into(),
      description: None,
      nodes,
      is_public: false,
      is_featured: false,
    }
  }

  pub fn public(mut self) -> Self {
    self.is_public = true;
    self
  }

  pub fn featured(mut self) -> Self {
    self.is_featured = true;
    self
  }
}

/// A partial update. `None` leaves the field alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowPatch {
  pub name: Option<String>,
  pub description: Option<String>,
  pub nodes: Option<Vec<Node>>,
  pub is_public: Option<bool>,
  pub is_featured: Option<bool>,
}

impl WorkflowPatch {
  /// Apply to `stored`, bumping `updated_at`. Replacing the nodes rescores the definition.
  pub fn apply(self, stored: &mut StoredWorkflow) {
    if let Some(name) = self.name {
      stored.name = name;
    }
    if let Some(description) = self.description {
      stored.description = Some(description);
    }
    if let Some(nodes) = self.nodes {
      stored.complexity_score = complexity_score(&nodes);
      stored.nodes = Json(nodes);
    }
    if let Some(is_public) = self.is_public {
      stored.is_public = is_public;
    }
    if let Some(is_featured) = self.is_featured {
      stored.is_featured = is_featured;
    }
    stored.updated_at = Utc::now();
  }
}

/// Rough size of a definition: 10 per node, 5 per edge, 15 per distinct
/// node type and 3 per configuration key.
pub fn complexity_score(nodes: &[Node]) -> i64 {
  let edges: usize = nodes.iter().map(|n| n.connected_to.len()).sum();
  let types: HashSet<_> = nodes.iter().map(Node::node_type).collect();
  let config_keys: usize = nodes.iter().map(|n| n.configuration.len()).sum();

  (nodes.len() * 10 + edges * 5 + types.len() * 15 + config_keys * 3) as i64
}

use std::collections::{HashMap, HashSet, VecDeque};

use crate::Node;

/// Adjacency snapshot of a workflow for traversal and analysis.
///
/// Edges pointing at unknown nodes are kept in the forward list so callers
/// can still see them, but they never show up as upstream of anything.
#[derive(Debug, Clone)]
pub struct Graph {
  /// node_id -> downstream node_ids, in `connected_to` order.
  adjacency: HashMap<String, Vec<String>>,
  /// node_id -> upstream node_ids.
  reverse_adjacency: HashMap<String, Vec<String>>,
}

impl Graph {
  pub fn new(nodes: &[Node]) -> Self {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for node in nodes {
      adjacency.entry(node.id.clone()).or_default();
      reverse_adjacency.entry(node.id.clone()).or_default();
    }

    for node in nodes {
      for target in &node.connected_to {
        adjacency
          .entry(node.id.clone())
          .or_default()
          .push(target.clone());
        if let Some(upstream) = reverse_adjacency.get_mut(target) {
          upstream.push(node.id.clone());
        }
      }
    }

    Self {
      adjacency,
      reverse_adjacency,
    }
  }

  pub fn downstream(&self, node_id: &str) -> &[String] {
    self
      .adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  pub fn upstream(&self, node_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Every known node reachable from `roots` (roots included).
  pub fn reachable_from<'a, I>(&self, roots: I) -> HashSet<String>
  where
    I: IntoIterator<Item = &'a str>,
  {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<&str> = roots.into_iter().collect();

    while let Some(id) = queue.pop_front() {
      if !self.adjacency.contains_key(id) || !seen.insert(id.to_string()) {
        continue;
      }
      for next in self.downstream(id) {
        queue.push_back(next);
      }
    }

    seen
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn diamond() -> Vec<Node> {
    vec![
      Node::trigger("t", "Start").connect(["a", "b"]),
      Node::action("a", "A").connect(["j"]),
      Node::action("b", "B").connect(["j"]),
      Node::action("j", "Join"),
      Node::action("orphan", "Orphan"),
    ]
  }

  #[test]
  fn test_adjacency() {
    let graph = Graph::new(&diamond());
    assert_eq!(graph.downstream("t"), ["a", "b"]);
    assert_eq!(graph.upstream("j"), ["a", "b"]);
    assert!(graph.upstream("t").is_empty());
    assert!(graph.downstream("orphan").is_empty());
  }

  #[test]
  fn test_reachable_skips_unconnected() {
    let graph = Graph::new(&diamond());
    let reachable = graph.reachable_from(["t"]);
    assert_eq!(reachable.len(), 4);
    assert!(!reachable.contains("orphan"));
  }

  #[test]
  fn test_reachable_terminates_on_cycle() {
    let nodes = vec![
      Node::trigger("t", "Start").connect(["a"]),
      Node::action("a", "A").connect(["b"]),
      Node::action("b", "B").connect(["a"]),
    ];
    let graph = Graph::new(&nodes);
    assert_eq!(graph.reachable_from(["t"]).len(), 3);
    assert_eq!(graph.upstream("a"), ["t", "b"]);
  }
}

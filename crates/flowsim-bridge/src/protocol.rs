//! JSON wire messages exchanged over the websocket.
//!
//! Every message is an object with a `type` field. Field names are camelCase.

use std::fmt;

use flowsim_engine::{ExecutionEvent, RunOutcome};
use flowsim_workflow::{ExecutionResult, Node, NodeStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Identifier as sent by browsers: a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireId {
  Int(i64),
  Str(String),
}

impl fmt::Display for WireId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WireId::Int(n) => write!(f, "{n}"),
      WireId::Str(s) => f.write_str(s),
    }
  }
}

impl From<&str> for WireId {
  fn from(s: &str) -> Self {
    WireId::Str(s.to_string())
  }
}

impl From<String> for WireId {
  fn from(s: String) -> Self {
    WireId::Str(s)
  }
}

impl From<i64> for WireId {
  fn from(n: i64) -> Self {
    WireId::Int(n)
  }
}

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
  Auth {
    #[serde(default)]
    user_id: Option<WireId>,
  },
  Subscribe {
    #[serde(default)]
    workflow_id: Option<WireId>,
  },
  Unsubscribe {
    #[serde(default)]
    workflow_id: Option<WireId>,
  },
  /// Run the supplied nodes on the server and stream progress to subscribers.
  WorkflowExecute {
    workflow_id: WireId,
    nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    test_name: Option<String>,
  },
  Ping,
  Pong,
}

const CLIENT_TYPES: &[&str] = &[
  "auth",
  "subscribe",
  "unsubscribe",
  "workflow_execute",
  "ping",
  "pong",
];

impl ClientMessage {
  /// Parse a text frame.
  ///
  /// Anything that is not a JSON object with a string `type` is malformed. A
  /// well-formed message with a `type` this server does not handle is
  /// reported separately so the two get distinct replies.
  pub fn decode(text: &str) -> Result<Self, ProtocolError> {
    let value: Value =
      serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let kind = value
      .get("type")
      .and_then(Value::as_str)
      .ok_or_else(|| ProtocolError::Malformed("missing 'type'".to_string()))?;

    if !CLIENT_TYPES.contains(&kind) {
      return Err(ProtocolError::UnknownType(kind.to_string()));
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
  }
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
  /// Sent once, right after the socket opens.
  Connection { client_id: String, message: String },
  Auth { success: bool, message: String },
  Subscribe {
    success: bool,
    entity: String,
    entity_id: WireId,
  },
  Unsubscribe {
    success: bool,
    entity: String,
    entity_id: WireId,
  },
  Pong,
  WorkflowExecutionUpdate {
    workflow_id: WireId,
    run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<NodeStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    results: Option<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_last_node: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workflow_status: Option<RunOutcome>,
  },
  WorkflowExecutionComplete {
    workflow_id: WireId,
    run_id: String,
    status: RunOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failed_node_id: Option<String>,
  },
  Error { message: String },
}

impl ServerMessage {
  pub fn error(message: impl Into<String>) -> Self {
    ServerMessage::Error {
      message: message.into(),
    }
  }

  /// Translate an engine event for a run of `workflow_id`.
  pub fn from_event(workflow_id: &WireId, event: &ExecutionEvent) -> Self {
    let workflow_id = workflow_id.clone();
    match event {
      ExecutionEvent::NodeStatus {
        run_id,
        node_id,
        status,
        result,
        is_last_node,
        workflow_status,
      } => ServerMessage::WorkflowExecutionUpdate {
        workflow_id,
        run_id: run_id.clone(),
        node_id: Some(node_id.clone()),
        status: Some(*status),
        log: None,
        results: result.clone(),
        is_last_node: Some(*is_last_node),
        workflow_status: Some(*workflow_status),
      },
      ExecutionEvent::Log {
        run_id,
        node_id,
        log,
      } => ServerMessage::WorkflowExecutionUpdate {
        workflow_id,
        run_id: run_id.clone(),
        node_id: node_id.clone(),
        status: None,
        log: Some(log.clone()),
        results: None,
        is_last_node: None,
        workflow_status: None,
      },
      ExecutionEvent::RunCompleted { run_id } => ServerMessage::WorkflowExecutionComplete {
        workflow_id,
        run_id: run_id.clone(),
        status: RunOutcome::Completed,
        failed_node_id: None,
      },
      ExecutionEvent::RunFailed { run_id, node_id } => ServerMessage::WorkflowExecutionComplete {
        workflow_id,
        run_id: run_id.clone(),
        status: RunOutcome::Failed,
        failed_node_id: Some(node_id.clone()),
      },
      ExecutionEvent::RunCancelled { run_id } => ServerMessage::WorkflowExecutionComplete {
        workflow_id,
        run_id: run_id.clone(),
        status: RunOutcome::Cancelled,
        failed_node_id: None,
      },
    }
  }

  pub fn encode(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_decode_known_messages() {
    assert_eq!(
      ClientMessage::decode(r#"{"type":"auth","userId":7}"#).unwrap(),
      ClientMessage::Auth {
        user_id: Some(WireId::Int(7))
      }
    );
    assert_eq!(
      ClientMessage::decode(r#"{"type":"subscribe","workflowId":"wf-1"}"#).unwrap(),
      ClientMessage::Subscribe {
        workflow_id: Some("wf-1".into())
      }
    );
    assert_eq!(
      ClientMessage::decode(r#"{"type":"unsubscribe"}"#).unwrap(),
      ClientMessage::Unsubscribe { workflow_id: None }
    );
    assert_eq!(
      ClientMessage::decode(r#"{"type":"ping"}"#).unwrap(),
      ClientMessage::Ping
    );
  }

  #[test]
  fn test_decode_workflow_execute() {
    let text = json!({
      "type": "workflow_execute",
      "workflowId": 12,
      "testName": "smoke",
      "nodes": [Node::trigger("t", "Start").connect(["a"]), Node::action("a", "Act")],
    })
    .to_string();

    match ClientMessage::decode(&text).unwrap() {
      ClientMessage::WorkflowExecute {
        workflow_id,
        nodes,
        test_name,
      } => {
        assert_eq!(workflow_id.to_string(), "12");
        assert_eq!(nodes.len(), 2);
        assert_eq!(test_name.as_deref(), Some("smoke"));
      }
      other => panic!("unexpected {other:?}"),
    }
  }

  #[test]
  fn test_decode_errors() {
    let unknown = ClientMessage::decode(r#"{"type":"launch_rockets"}"#).unwrap_err();
    assert_eq!(unknown, ProtocolError::UnknownType("launch_rockets".to_string()));
    assert_eq!(unknown.wire_message(), "Unknown message type");

    for text in ["not json", r#"{"workflowId":1}"#, r#"{"type":3}"#, r#"{"type":"workflow_execute"}"#] {
      let err = ClientMessage::decode(text).unwrap_err();
      assert!(matches!(err, ProtocolError::Malformed(_)), "{text}");
      assert_eq!(err.wire_message(), "Invalid message format");
    }
  }

  #[test]
  fn test_update_wire_shape() {
    let event = ExecutionEvent::NodeStatus {
      run_id: "r".to_string(),
      node_id: "a".to_string(),
      status: NodeStatus::Success,
      result: Some(ExecutionResult {
        success: true,
        message: "Act executed successfully".to_string(),
        logs: vec![],
        data: None,
        duration: 120,
      }),
      is_last_node: true,
      workflow_status: RunOutcome::Completed,
    };
    let value = serde_json::to_value(ServerMessage::from_event(&WireId::Int(5), &event)).unwrap();

    assert_eq!(value["type"], "workflow_execution_update");
    assert_eq!(value["workflowId"], 5);
    assert_eq!(value["nodeId"], "a");
    assert_eq!(value["status"], "success");
    assert_eq!(value["results"]["duration"], 120);
    assert_eq!(value["isLastNode"], true);
    assert_eq!(value["workflowStatus"], "completed");
    assert!(value.get("log").is_none());
  }

  #[test]
  fn test_terminal_events_become_complete() {
    let failed = ServerMessage::from_event(
      &"wf".into(),
      &ExecutionEvent::RunFailed {
        run_id: "r".to_string(),
        node_id: "b".to_string(),
      },
    );
    let value = serde_json::to_value(&failed).unwrap();
    assert_eq!(value["type"], "workflow_execution_complete");
    assert_eq!(value["status"], "failed");
    assert_eq!(value["failedNodeId"], "b");

    let log = ServerMessage::from_event(
      &"wf".into(),
      &ExecutionEvent::Log {
        run_id: "r".to_string(),
        node_id: None,
        log: "Workflow execution cancelled".to_string(),
      },
    );
    let value = serde_json::to_value(&log).unwrap();
    assert_eq!(value["log"], "Workflow execution cancelled");
    assert!(value.get("nodeId").is_none());
  }

  #[test]
  fn test_server_message_round_trips_for_clients() {
    let text = json!({
      "type": "connection",
      "clientId": "c-1",
      "message": "Connected to flowsim bridge",
    })
    .to_string();
    let msg: ServerMessage = serde_json::from_str(&text).unwrap();
    assert_eq!(
      msg,
      ServerMessage::Connection {
        client_id: "c-1".to_string(),
        message: "Connected to flowsim bridge".to_string(),
      }
    );
  }
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use flowsim_bridge::{
  BridgeClient, BridgeConfig, BridgeServer, ClientConfig, ConnectionState, Hub, LocalFanout,
  ReconnectPolicy, ServerMessage,
};
use flowsim_engine::{Decisions, EngineConfig, RunOutcome};
use flowsim_workflow::Node;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

fn fast_engine() -> EngineConfig {
  EngineConfig::default()
    .with_trigger_stagger(Duration::from_millis(5))
    .with_trigger_settle(Duration::from_millis(10))
    .with_branch_stagger(Duration::from_millis(5))
    .with_node_latency(Duration::from_millis(10))
}

struct Running {
  addr: SocketAddr,
  hub: Arc<Hub>,
  shutdown: CancellationToken,
}

impl Drop for Running {
  fn drop(&mut self) {
    self.shutdown.cancel();
  }
}

async fn serve(config: BridgeConfig) -> Running {
  let hub = Hub::new(config, fast_engine(), Arc::new(LocalFanout::default()))
    .with_decisions(Decisions::seeded(0.0, 7));
  let server = BridgeServer::new(hub);
  let hub = server.hub().clone();

  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let shutdown = CancellationToken::new();
  let token = shutdown.clone();
  tokio::spawn(async move { server.serve_with_shutdown(listener, token).await });

  Running {
    addr,
    hub,
    shutdown,
  }
}

fn ws_url(addr: SocketAddr) -> String {
  format!("ws://{addr}/ws")
}

async fn connect(addr: SocketAddr) -> Socket {
  let (socket, _) = connect_async(ws_url(addr)).await.unwrap();
  socket
}

async fn send(socket: &mut Socket, value: Value) {
  socket.send(Message::Text(value.to_string())).await.unwrap();
}

async fn next_json(socket: &mut Socket) -> Value {
  loop {
    let frame = tokio::time::timeout(WAIT, socket.next())
      .await
      .expect("timed out waiting for a message")
      .expect("socket closed")
      .unwrap();
    if let Message::Text(text) = frame {
      return serde_json::from_str(&text).unwrap();
    }
  }
}

/// Read until the run's completion message, returning everything received.
async fn until_complete(socket: &mut Socket) -> Vec<Value> {
  let mut seen = Vec::new();
  loop {
    let msg = next_json(socket).await;
    let done = msg["type"] == "workflow_execution_complete";
    seen.push(msg);
    if done {
      return seen;
    }
  }
}

fn linear_nodes() -> Vec<Node> {
  vec![
    Node::trigger("t", "Start").connect(["a"]),
    Node::action("a", "Notify"),
  ]
}

#[tokio::test]
async fn test_welcome_and_protocol_errors() {
  let server = serve(BridgeConfig::default()).await;
  let mut socket = connect(server.addr).await;

  let welcome = next_json(&mut socket).await;
  assert_eq!(welcome["type"], "connection");
  assert!(welcome["clientId"].as_str().is_some());

  socket.send(Message::Text("{not json".to_string())).await.unwrap();
  let reply = next_json(&mut socket).await;
  assert_eq!(reply, json!({ "type": "error", "message": "Invalid message format" }));

  send(&mut socket, json!({ "type": "dance" })).await;
  let reply = next_json(&mut socket).await;
  assert_eq!(reply, json!({ "type": "error", "message": "Unknown message type" }));

  // The connection survives bad input.
  send(&mut socket, json!({ "type": "ping" })).await;
  assert_eq!(next_json(&mut socket).await, json!({ "type": "pong" }));
}

#[tokio::test]
async fn test_execute_streams_only_to_subscribers() {
  let server = serve(BridgeConfig::default()).await;
  let mut requester = connect(server.addr).await;
  let mut watcher = connect(server.addr).await;
  let mut bystander = connect(server.addr).await;
  for socket in [&mut requester, &mut watcher, &mut bystander] {
    next_json(socket).await;
  }

  send(&mut watcher, json!({ "type": "subscribe", "workflowId": 42 })).await;
  assert_eq!(next_json(&mut watcher).await["success"], true);

  send(
    &mut requester,
    json!({ "type": "workflow_execute", "workflowId": 42, "nodes": linear_nodes(), "testName": "smoke" }),
  )
  .await;

  let seen = until_complete(&mut requester).await;
  let last = seen.last().unwrap();
  assert_eq!(last["status"], "completed");
  assert_eq!(last["workflowId"], 42);

  let finished: Vec<&Value> = seen
    .iter()
    .filter(|m| m["type"] == "workflow_execution_update" && m["status"] == "success")
    .collect();
  assert_eq!(finished.len(), 2);
  assert_eq!(finished[1]["nodeId"], "a");
  assert_eq!(finished[1]["isLastNode"], true);
  assert_eq!(finished[1]["results"]["message"], "Notify executed successfully");
  assert!(
    seen
      .iter()
      .any(|m| m["log"] == "Workflow execution completed successfully")
  );

  let watched = until_complete(&mut watcher).await;
  assert_eq!(watched.len(), seen.len());

  // Nothing was queued for the bystander ahead of its pong.
  send(&mut bystander, json!({ "type": "ping" })).await;
  assert_eq!(next_json(&mut bystander).await["type"], "pong");
}

#[tokio::test]
async fn test_execute_without_trigger_is_refused() {
  let server = serve(BridgeConfig::default()).await;
  let mut socket = connect(server.addr).await;
  next_json(&mut socket).await;

  send(
    &mut socket,
    json!({ "type": "workflow_execute", "workflowId": "wf", "nodes": [Node::action("a", "A")] }),
  )
  .await;
  let reply = next_json(&mut socket).await;
  assert_eq!(reply["type"], "error");
  assert!(reply["message"].as_str().unwrap().contains("trigger"));
}

#[tokio::test]
async fn test_heartbeat_terminates_silent_client() {
  let server = serve(
    BridgeConfig::default().with_heartbeat_interval(Duration::from_millis(100)),
  )
  .await;

  // Never read, so pings are never answered.
  let _silent = connect(server.addr).await;

  let deadline = tokio::time::Instant::now() + WAIT;
  loop {
    if server.hub.client_count().await == 0 {
      break;
    }
    assert!(tokio::time::Instant::now() < deadline, "client was never terminated");
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
}

#[tokio::test]
async fn test_client_runs_workflow() {
  let server = serve(BridgeConfig::default()).await;
  let mut client = BridgeClient::connect(ClientConfig::new(ws_url(server.addr)));

  tokio::time::timeout(WAIT, client.wait_for_state(ConnectionState::Open))
    .await
    .unwrap()
    .unwrap();
  assert!(matches!(
    client.recv().await,
    Some(ServerMessage::Connection { .. })
  ));

  assert!(client.authenticate("alice"));
  assert!(matches!(
    client.recv().await,
    Some(ServerMessage::Auth { success: true, .. })
  ));

  assert!(client.execute("wf-9", linear_nodes(), Some("smoke".to_string())));
  let outcome = tokio::time::timeout(WAIT, async {
    loop {
      if let Some(ServerMessage::WorkflowExecutionComplete { status, .. }) = client.recv().await {
        return status;
      }
    }
  })
  .await
  .unwrap();
  assert_eq!(outcome, RunOutcome::Completed);

  client.close().await;
}

#[tokio::test]
async fn test_manual_reconnect_opens_new_connection() {
  let server = serve(BridgeConfig::default()).await;
  let mut client = BridgeClient::connect(ClientConfig::new(ws_url(server.addr)));

  let first = match tokio::time::timeout(WAIT, client.recv()).await.unwrap() {
    Some(ServerMessage::Connection { client_id, .. }) => client_id,
    other => panic!("expected welcome, got {other:?}"),
  };

  assert!(client.reconnect());
  let second = match tokio::time::timeout(WAIT, client.recv()).await.unwrap() {
    Some(ServerMessage::Connection { client_id, .. }) => client_id,
    other => panic!("expected welcome, got {other:?}"),
  };
  assert_ne!(first, second);
  assert_eq!(client.state(), ConnectionState::Open);

  client.close().await;
}

#[tokio::test]
async fn test_client_gives_up_on_dead_address() {
  let addr = {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
  };

  let config = ClientConfig::new(ws_url(addr)).with_reconnect(ReconnectPolicy::new(
    Duration::from_millis(10),
    1.0,
    2,
  ));
  let client = BridgeClient::connect(config);

  tokio::time::timeout(WAIT, client.wait_for_state(ConnectionState::Error))
    .await
    .unwrap()
    .unwrap();
  assert!(!client.ping());

  client.close().await;
}

#[tokio::test]
async fn test_client_drops_silent_server() {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    let (stream, _) = listener.accept().await.unwrap();
    let _socket = tokio_tungstenite::accept_async(stream).await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
  });

  let config = ClientConfig::new(ws_url(addr))
    .with_auto_reconnect(false)
    .with_read_timeout(Duration::from_millis(200));
  let client = BridgeClient::connect(config);

  tokio::time::timeout(WAIT, client.wait_for_state(ConnectionState::Open))
    .await
    .unwrap()
    .unwrap();
  tokio::time::timeout(WAIT, client.wait_for_state(ConnectionState::Closed))
    .await
    .unwrap()
    .unwrap();

  client.close().await;
}

//! Connection registry, message handling and run streaming.
//!
//! ```text
//!   socket ──text──▶ Hub::handle_text ──▶ Engine::run
//!                                            │ ExecutionEvent
//!                                            ▼
//!                         pump ──Envelope──▶ Fanout ──▶ dispatcher ──▶ client queues
//! ```
//!
//! Each client has a bounded outbound queue. Delivery is best effort: a full
//! queue drops the message, and nothing is kept for clients that are gone.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use flowsim_engine::{Decisions, Engine, EngineConfig, ExecutionEvent, ExecutionNotifier};
use flowsim_workflow::{Node, Workflow};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::fanout::{Channel, Envelope, Fanout};
use crate::protocol::{ClientMessage, ServerMessage, WireId};

const WELCOME: &str = "Connected to flowsim bridge";

/// A frame queued for one client's socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
  Text(String),
  Ping,
  Close,
}

struct ClientEntry {
  user_id: Option<String>,
  subscriptions: HashSet<String>,
  sender: mpsc::Sender<Outbound>,
  alive: bool,
}

impl ClientEntry {
  fn matches(&self, channel: &Channel) -> bool {
    match channel {
      Channel::Broadcast => true,
      Channel::User(id) => self.user_id.as_deref() == Some(id.as_str()),
      Channel::Workflow(id) => self.subscriptions.contains(id),
    }
  }
}

enum PumpItem {
  Event(ExecutionEvent),
  /// The run's task has returned; every event it will emit is already queued.
  Finished { run_id: String },
}

/// Forwards engine events into the hub's pump.
struct PumpNotifier {
  tx: mpsc::UnboundedSender<PumpItem>,
}

impl ExecutionNotifier for PumpNotifier {
  fn notify(&self, event: ExecutionEvent) {
    let _ = self.tx.send(PumpItem::Event(event));
  }
}

pub struct Hub {
  config: BridgeConfig,
  clients: RwLock<HashMap<String, ClientEntry>>,
  fanout: Arc<dyn Fanout>,
  engine: Engine<PumpNotifier>,
  /// run id -> workflow id, for runs whose events are still in flight.
  runs: Mutex<HashMap<String, WireId>>,
  pump_tx: mpsc::UnboundedSender<PumpItem>,
  pump_rx: Mutex<Option<mpsc::UnboundedReceiver<PumpItem>>>,
}

impl Hub {
  pub fn new(config: BridgeConfig, engine_config: EngineConfig, fanout: Arc<dyn Fanout>) -> Self {
    let (pump_tx, pump_rx) = mpsc::unbounded_channel();
    let engine = Engine::with_notifier(
      engine_config,
      PumpNotifier {
        tx: pump_tx.clone(),
      },
    );
    Self {
      config,
      clients: RwLock::new(HashMap::new()),
      fanout,
      engine,
      runs: Mutex::new(HashMap::new()),
      pump_tx,
      pump_rx: Mutex::new(Some(pump_rx)),
    }
  }

  /// Replace the engine's decision sources.
  pub fn with_decisions(mut self, decisions: Decisions) -> Self {
    self.engine = self.engine.with_decisions(decisions);
    self
  }

  pub fn config(&self) -> &BridgeConfig {
    &self.config
  }

  /// Spawn the event pump, the fan-out dispatcher and the heartbeat.
  ///
  /// Only the first call spawns anything; later calls return no handles.
  pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
    let rx = self
      .pump_rx
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    let Some(rx) = rx else {
      warn!("bridge hub already started");
      return Vec::new();
    };

    let mut tasks = Vec::with_capacity(3);
    tasks.push(tokio::spawn(self.clone().pump(rx)));

    let deliveries = self.fanout.subscribe();
    tasks.push(tokio::spawn(self.clone().dispatch(deliveries)));

    let hub = self.clone();
    tasks.push(tokio::spawn(async move {
      let mut ticker = tokio::time::interval(hub.config.heartbeat_interval());
      ticker.tick().await;
      loop {
        ticker.tick().await;
        hub.heartbeat().await;
      }
    }));

    info!(
      heartbeat_ms = self.config.heartbeat_interval_ms,
      "bridge hub started"
    );
    tasks
  }

  /// Add a client and queue its welcome message. Returns the client id.
  pub async fn register(&self, sender: mpsc::Sender<Outbound>) -> String {
    let client_id = uuid::Uuid::new_v4().to_string();
    let welcome = ServerMessage::Connection {
      client_id: client_id.clone(),
      message: WELCOME.to_string(),
    };
    if let Ok(text) = welcome.encode() {
      let _ = sender.try_send(Outbound::Text(text));
    }

    self.clients.write().await.insert(
      client_id.clone(),
      ClientEntry {
        user_id: None,
        subscriptions: HashSet::new(),
        sender,
        alive: true,
      },
    );
    info!(client_id = %client_id, "client connected");
    client_id
  }

  pub async fn unregister(&self, client_id: &str) {
    if self.clients.write().await.remove(client_id).is_some() {
      info!(client_id = %client_id, "client disconnected");
    }
  }

  pub async fn client_count(&self) -> usize {
    self.clients.read().await.len()
  }

  /// Record a pong (or any sign of life) from a client.
  pub async fn mark_alive(&self, client_id: &str) {
    if let Some(entry) = self.clients.write().await.get_mut(client_id) {
      entry.alive = true;
    }
  }

  /// Handle one text frame from a client.
  pub async fn handle_text(&self, client_id: &str, text: &str) {
    let msg = match ClientMessage::decode(text) {
      Ok(msg) => msg,
      Err(err) => {
        debug!(client_id = %client_id, error = %err, "rejected client message");
        self
          .send_to(client_id, &ServerMessage::error(err.wire_message()))
          .await;
        return;
      }
    };

    match msg {
      ClientMessage::Auth { user_id } => {
        let reply = match user_id {
          Some(user_id) => {
            if let Some(entry) = self.clients.write().await.get_mut(client_id) {
              entry.user_id = Some(user_id.to_string());
            }
            debug!(client_id = %client_id, user_id = %user_id, "client authenticated");
            ServerMessage::Auth {
              success: true,
              message: "Authentication successful".to_string(),
            }
          }
          None => ServerMessage::Auth {
            success: false,
            message: "Invalid authentication".to_string(),
          },
        };
        self.send_to(client_id, &reply).await;
      }
      ClientMessage::Subscribe { workflow_id } => {
        let Some(workflow_id) = workflow_id else {
          self.send_to(client_id, &ServerMessage::error("workflowId is required")).await;
          return;
        };
        self.subscribe(client_id, &workflow_id).await;
        let ack = ServerMessage::Subscribe {
          success: true,
          entity: "workflow".to_string(),
          entity_id: workflow_id,
        };
        self.send_to(client_id, &ack).await;
      }
      ClientMessage::Unsubscribe { workflow_id } => {
        let Some(workflow_id) = workflow_id else {
          self.send_to(client_id, &ServerMessage::error("workflowId is required")).await;
          return;
        };
        if let Some(entry) = self.clients.write().await.get_mut(client_id) {
          entry.subscriptions.remove(&workflow_id.to_string());
        }
        let ack = ServerMessage::Unsubscribe {
          success: true,
          entity: "workflow".to_string(),
          entity_id: workflow_id,
        };
        self.send_to(client_id, &ack).await;
      }
      ClientMessage::WorkflowExecute {
        workflow_id,
        nodes,
        test_name,
      } => {
        if let Err(message) = self.execute(client_id, workflow_id, nodes, test_name).await {
          self.send_to(client_id, &ServerMessage::error(message)).await;
        }
      }
      ClientMessage::Ping => {
        self.mark_alive(client_id).await;
        self.send_to(client_id, &ServerMessage::Pong).await;
      }
      ClientMessage::Pong => self.mark_alive(client_id).await,
    }
  }

  /// Publish a message to every client.
  pub async fn broadcast(&self, msg: &ServerMessage) -> Result<(), BridgeError> {
    self.publish(Channel::Broadcast, msg).await
  }

  /// Publish a message to every connection authenticated as `user_id`.
  pub async fn send_to_user(&self, user_id: &str, msg: &ServerMessage) -> Result<(), BridgeError> {
    self.publish(Channel::User(user_id.to_string()), msg).await
  }

  /// Publish a message to subscribers of `workflow_id`.
  pub async fn send_to_workflow(
    &self,
    workflow_id: &WireId,
    msg: &ServerMessage,
  ) -> Result<(), BridgeError> {
    self
      .publish(Channel::Workflow(workflow_id.to_string()), msg)
      .await
  }

  pub async fn publish(&self, channel: Channel, msg: &ServerMessage) -> Result<(), BridgeError> {
    let payload = msg.encode()?;
    self.fanout.publish(Envelope { channel, payload }).await
  }

  /// Ping every client, terminating those that missed the previous ping.
  /// Returns the number of clients terminated.
  pub async fn heartbeat(&self) -> usize {
    let mut clients = self.clients.write().await;
    let mut dead = Vec::new();

    for (client_id, entry) in clients.iter_mut() {
      if !entry.alive {
        let _ = entry.sender.try_send(Outbound::Close);
        dead.push(client_id.clone());
        continue;
      }
      entry.alive = false;
      let _ = entry.sender.try_send(Outbound::Ping);
    }

    for client_id in &dead {
      clients.remove(client_id);
      warn!(client_id = %client_id, "terminating unresponsive client");
    }
    dead.len()
  }

  async fn subscribe(&self, client_id: &str, workflow_id: &WireId) {
    if let Some(entry) = self.clients.write().await.get_mut(client_id) {
      entry.subscriptions.insert(workflow_id.to_string());
      debug!(client_id = %client_id, workflow_id = %workflow_id, "subscribed");
    }
  }

  async fn execute(
    &self,
    client_id: &str,
    workflow_id: WireId,
    nodes: Vec<Node>,
    test_name: Option<String>,
  ) -> Result<(), String> {
    let name = test_name.unwrap_or_else(|| "Test run".to_string());
    let workflow =
      Workflow::from_nodes(workflow_id.to_string(), name, nodes).map_err(|e| e.to_string())?;

    self.subscribe(client_id, &workflow_id).await;

    // The map entry must exist before the run's first event reaches the pump.
    let handle = {
      let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
      let handle = self.engine.run(&workflow).map_err(|e| e.to_string())?;
      runs.insert(handle.run_id().to_string(), workflow_id.clone());
      handle
    };

    info!(
      client_id = %client_id,
      workflow_id = %workflow_id,
      run_id = %handle.run_id(),
      "remote run started"
    );

    let pump = self.pump_tx.clone();
    tokio::spawn(async move {
      let run_id = handle.run_id().to_string();
      if let Err(err) = handle.wait().await {
        warn!(run_id = %run_id, error = %err, "run ended abnormally");
      }
      let _ = pump.send(PumpItem::Finished { run_id });
    });
    Ok(())
  }

  async fn pump(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<PumpItem>) {
    while let Some(item) = rx.recv().await {
      match item {
        PumpItem::Event(event) => {
          let workflow_id = self
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event.run_id())
            .cloned();
          let Some(workflow_id) = workflow_id else {
            debug!(run_id = %event.run_id(), "event for untracked run");
            continue;
          };
          let msg = ServerMessage::from_event(&workflow_id, &event);
          if let Err(err) = self.send_to_workflow(&workflow_id, &msg).await {
            warn!(run_id = %event.run_id(), error = %err, "failed to publish run event");
          }
        }
        PumpItem::Finished { run_id } => {
          self
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&run_id);
        }
      }
    }
  }

  async fn dispatch(self: Arc<Self>, mut deliveries: broadcast::Receiver<Envelope>) {
    loop {
      match deliveries.recv().await {
        Ok(envelope) => self.deliver(&envelope).await,
        Err(broadcast::error::RecvError::Lagged(missed)) => {
          warn!(missed, "fan-out dispatcher lagged, messages dropped");
        }
        Err(broadcast::error::RecvError::Closed) => break,
      }
    }
  }

  async fn deliver(&self, envelope: &Envelope) {
    let clients = self.clients.read().await;
    for (client_id, entry) in clients.iter() {
      if !entry.matches(&envelope.channel) {
        continue;
      }
      if entry
        .sender
        .try_send(Outbound::Text(envelope.payload.clone()))
        .is_err()
      {
        debug!(client_id = %client_id, channel = %envelope.channel, "dropped message for slow client");
      }
    }
  }

  async fn send_to(&self, client_id: &str, msg: &ServerMessage) {
    let text = match msg.encode() {
      Ok(text) => text,
      Err(err) => {
        warn!(error = %err, "failed to encode reply");
        return;
      }
    };
    if let Some(entry) = self.clients.read().await.get(client_id) {
      let _ = entry.sender.try_send(Outbound::Text(text));
    }
  }
}

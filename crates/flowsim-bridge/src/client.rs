//! Reconnecting websocket client for observers.
//!
//! The connection lives in a background task. Commands go in over a channel,
//! decoded server messages come out over another, and the connection state is
//! published through a watch channel.

use std::time::Duration;

use flowsim_workflow::Node;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::error::BridgeError;
use crate::protocol::{ClientMessage, ServerMessage, WireId};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Connecting,
  Open,
  Closed,
  Error,
}

enum Command {
  Send(String),
  Reconnect,
  Close,
}

enum SessionEnd {
  /// Closed on request; the task exits.
  Closed,
  /// Manual reconnect; connect again right away.
  Reconnect,
  /// The peer went away or stopped answering.
  Dropped,
}

pub struct BridgeClient {
  commands: mpsc::UnboundedSender<Command>,
  state: watch::Receiver<ConnectionState>,
  inbound: mpsc::UnboundedReceiver<ServerMessage>,
  task: JoinHandle<()>,
}

impl BridgeClient {
  /// Start connecting in the background. Must be called within a tokio runtime.
  pub fn connect(config: ClientConfig) -> Self {
    let (commands, command_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound) = mpsc::unbounded_channel();
    let (state_tx, state) = watch::channel(ConnectionState::Connecting);

    let task = tokio::spawn(connection_loop(config, state_tx, command_rx, inbound_tx));
    Self {
      commands,
      state,
      inbound,
      task,
    }
  }

  pub fn state(&self) -> ConnectionState {
    *self.state.borrow()
  }

  pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
    self.state.clone()
  }

  /// Wait until the connection reaches `target`.
  pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), BridgeError> {
    let mut state = self.state.clone();
    state
      .wait_for(|s| *s == target)
      .await
      .map(|_| ())
      .map_err(|_| BridgeError::ClientClosed)
  }

  /// Queue a message. Returns false unless the connection is open.
  pub fn send(&self, msg: &ClientMessage) -> bool {
    if self.state() != ConnectionState::Open {
      debug!("not connected, message not sent");
      return false;
    }
    match serde_json::to_string(msg) {
      Ok(text) => self.commands.send(Command::Send(text)).is_ok(),
      Err(err) => {
        warn!(error = %err, "failed to encode client message");
        false
      }
    }
  }

  pub fn authenticate(&self, user_id: impl Into<WireId>) -> bool {
    self.send(&ClientMessage::Auth {
      user_id: Some(user_id.into()),
    })
  }

  pub fn subscribe(&self, workflow_id: impl Into<WireId>) -> bool {
    self.send(&ClientMessage::Subscribe {
      workflow_id: Some(workflow_id.into()),
    })
  }

  pub fn unsubscribe(&self, workflow_id: impl Into<WireId>) -> bool {
    self.send(&ClientMessage::Unsubscribe {
      workflow_id: Some(workflow_id.into()),
    })
  }

  /// Ask the server to run `nodes` as workflow `workflow_id`.
  pub fn execute(
    &self,
    workflow_id: impl Into<WireId>,
    nodes: Vec<Node>,
    test_name: Option<String>,
  ) -> bool {
    self.send(&ClientMessage::WorkflowExecute {
      workflow_id: workflow_id.into(),
      nodes,
      test_name,
    })
  }

  pub fn ping(&self) -> bool {
    self.send(&ClientMessage::Ping)
  }

  /// Drop the current connection and connect again with a fresh attempt budget.
  pub fn reconnect(&self) -> bool {
    self.commands.send(Command::Reconnect).is_ok()
  }

  /// Next message from the server. `None` once the client has shut down.
  pub async fn recv(&mut self) -> Option<ServerMessage> {
    self.inbound.recv().await
  }

  /// Close the connection and stop reconnecting.
  pub async fn close(self) {
    let _ = self.commands.send(Command::Close);
    if let Err(err) = self.task.await {
      warn!(error = %err, "client task ended abnormally");
    }
  }
}

async fn connection_loop(
  config: ClientConfig,
  state: watch::Sender<ConnectionState>,
  mut commands: mpsc::UnboundedReceiver<Command>,
  inbound: mpsc::UnboundedSender<ServerMessage>,
) {
  let mut backoff = Backoff::new(config.reconnect.clone());

  'connect: loop {
    state.send_replace(ConnectionState::Connecting);

    match connect_async(config.url.as_str()).await {
      Ok((socket, _)) => {
        backoff.reset();
        state.send_replace(ConnectionState::Open);
        info!(url = %config.url, "connected");

        match session(socket, &config, &mut commands, &inbound).await {
          SessionEnd::Closed => {
            state.send_replace(ConnectionState::Closed);
            return;
          }
          SessionEnd::Reconnect => {
            backoff.reset();
            continue 'connect;
          }
          SessionEnd::Dropped => {
            state.send_replace(ConnectionState::Closed);
            info!(url = %config.url, "connection lost");
          }
        }
      }
      Err(err) => {
        warn!(url = %config.url, error = %err, "connect failed");
        state.send_replace(ConnectionState::Error);
      }
    }

    let delay = if config.auto_reconnect {
      backoff.next_delay()
    } else {
      None
    };

    let Some(delay) = delay else {
      if config.auto_reconnect {
        warn!(attempts = backoff.attempts(), "giving up on reconnecting");
      }
      // Idle until asked to reconnect or close.
      loop {
        match commands.recv().await {
          Some(Command::Reconnect) => {
            backoff.reset();
            continue 'connect;
          }
          Some(Command::Send(_)) => {}
          Some(Command::Close) | None => return,
        }
      }
    };

    debug!(attempt = backoff.attempts(), delay_ms = delay.as_millis() as u64, "reconnecting");
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
      tokio::select! {
        _ = &mut sleep => continue 'connect,
        cmd = commands.recv() => match cmd {
          Some(Command::Reconnect) => {
            backoff.reset();
            continue 'connect;
          }
          Some(Command::Send(_)) => {}
          Some(Command::Close) | None => {
            state.send_replace(ConnectionState::Closed);
            return;
          }
        },
      }
    }
  }
}

async fn session(
  socket: Socket,
  config: &ClientConfig,
  commands: &mut mpsc::UnboundedReceiver<Command>,
  inbound: &mpsc::UnboundedSender<ServerMessage>,
) -> SessionEnd {
  let (mut sink, mut stream) = socket.split();
  let ping_every = config.ping_interval().max(Duration::from_millis(1));
  let mut ping = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
  ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
  let mut last_seen = Instant::now();

  loop {
    let deadline = last_seen + config.read_timeout();
    tokio::select! {
      frame = stream.next() => match frame {
        Some(Ok(Message::Text(text))) => {
          last_seen = Instant::now();
          match serde_json::from_str::<ServerMessage>(&text) {
            Ok(msg) => {
              let _ = inbound.send(msg);
            }
            Err(err) => debug!(error = %err, "ignoring undecodable server message"),
          }
        }
        Some(Ok(Message::Close(_))) | None => return SessionEnd::Dropped,
        Some(Ok(_)) => last_seen = Instant::now(),
        Some(Err(err)) => {
          warn!(error = %err, "websocket error");
          return SessionEnd::Dropped;
        }
      },
      cmd = commands.recv() => match cmd {
        Some(Command::Send(text)) => {
          if sink.send(Message::Text(text)).await.is_err() {
            return SessionEnd::Dropped;
          }
        }
        Some(Command::Reconnect) => {
          let _ = sink.send(Message::Close(None)).await;
          return SessionEnd::Reconnect;
        }
        Some(Command::Close) | None => {
          let _ = sink.send(Message::Close(None)).await;
          return SessionEnd::Closed;
        }
      },
      _ = ping.tick() => {
        if let Ok(text) = serde_json::to_string(&ClientMessage::Ping) {
          if sink.send(Message::Text(text)).await.is_err() {
            return SessionEnd::Dropped;
          }
        }
      }
      _ = tokio::time::sleep_until(deadline) => {
        warn!(timeout_ms = config.read_timeout_ms, "no traffic from server, dropping connection");
        return SessionEnd::Dropped;
      }
    }
  }
}

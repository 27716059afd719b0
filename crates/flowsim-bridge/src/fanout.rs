//! Pub/sub fan-out between the run pump and connected clients.
//!
//! Messages are published on named channels. Every server process subscribes
//! to the whole stream and delivers each envelope to its own matching
//! clients, so a shared backend can stand in for [`LocalFanout`] when more
//! than one process serves the same observers.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::BridgeError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
  /// Every connected client.
  Broadcast,
  /// Clients authenticated as this user.
  User(String),
  /// Clients subscribed to this workflow id.
  Workflow(String),
}

impl fmt::Display for Channel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Channel::Broadcast => f.write_str("broadcast"),
      Channel::User(id) => write!(f, "user:{id}"),
      Channel::Workflow(id) => write!(f, "workflow:{id}"),
    }
  }
}

/// An encoded server message addressed to a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
  pub channel: Channel,
  pub payload: String,
}

#[async_trait]
pub trait Fanout: Send + Sync {
  async fn publish(&self, envelope: Envelope) -> Result<(), BridgeError>;

  /// A receiver for every envelope published after this call.
  fn subscribe(&self) -> broadcast::Receiver<Envelope>;
}

/// In-process fan-out over a tokio broadcast channel.
///
/// Publishing with nobody subscribed is not an error; the envelope is dropped.
#[derive(Debug, Clone)]
pub struct LocalFanout {
  tx: broadcast::Sender<Envelope>,
}

impl LocalFanout {
  pub fn new(capacity: usize) -> Self {
    let (tx, _) = broadcast::channel(capacity.max(1));
    Self { tx }
  }
}

impl Default for LocalFanout {
  fn default() -> Self {
    Self::new(1024)
  }
}

#[async_trait]
impl Fanout for LocalFanout {
  async fn publish(&self, envelope: Envelope) -> Result<(), BridgeError> {
    let _ = self.tx.send(envelope);
    Ok(())
  }

  fn subscribe(&self) -> broadcast::Receiver<Envelope> {
    self.tx.subscribe()
  }
}

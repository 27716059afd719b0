//! Bridge server and client configuration.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::ReconnectPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
  pub host: String,
  pub port: u16,
  /// Interval between server pings; a client that has not answered the
  /// previous ping when the next one is due is terminated.
  pub heartbeat_interval_ms: u64,
  /// Outbound buffer per client. Messages beyond it are dropped.
  pub client_buffer: usize,
  /// Capacity of the in-process fan-out channel.
  pub fanout_capacity: usize,
}

impl Default for BridgeConfig {
  fn default() -> Self {
    Self {
      host: "127.0.0.1".to_string(),
      port: 8080,
      heartbeat_interval_ms: 30_000,
      client_buffer: 256,
      fanout_capacity: 1024,
    }
  }
}

impl BridgeConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_host(mut self, host: &str) -> Self {
    self.host = host.to_string();
    self
  }

  pub fn with_port(mut self, port: u16) -> Self {
    self.port = port;
    self
  }

  pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
    self.heartbeat_interval_ms = interval.as_millis() as u64;
    self
  }

  pub fn with_client_buffer(mut self, buffer: usize) -> Self {
    self.client_buffer = buffer.max(1);
    self
  }

  pub fn heartbeat_interval(&self) -> Duration {
    Duration::from_millis(self.heartbeat_interval_ms)
  }

  pub fn socket_addr(&self) -> SocketAddr {
    format!("{}:{}", self.host, self.port)
      .parse()
      .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], self.port)))
  }
}

/// Settings for [`crate::BridgeClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
  /// Full websocket URL, e.g. `ws://127.0.0.1:8080/ws`.
  pub url: String,
  pub reconnect: ReconnectPolicy,
  pub auto_reconnect: bool,
  /// Interval between application-level `ping` messages while open.
  pub ping_interval_ms: u64,
  /// A connection with no inbound traffic for this long is considered dead.
  pub read_timeout_ms: u64,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      url: "ws://127.0.0.1:8080/ws".to_string(),
      reconnect: ReconnectPolicy::default(),
      auto_reconnect: true,
      ping_interval_ms: 30_000,
      read_timeout_ms: 75_000,
    }
  }
}

impl ClientConfig {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      ..Self::default()
    }
  }

  pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
    self.reconnect = policy;
    self
  }

  pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
    self.auto_reconnect = enabled;
    self
  }

  pub fn with_ping_interval(mut self, interval: Duration) -> Self {
    self.ping_interval_ms = interval.as_millis() as u64;
    self
  }

  pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
    self.read_timeout_ms = timeout.as_millis() as u64;
    self
  }

  pub fn ping_interval(&self) -> Duration {
    Duration::from_millis(self.ping_interval_ms)
  }

  pub fn read_timeout(&self) -> Duration {
    Duration::from_millis(self.read_timeout_ms)
  }
}

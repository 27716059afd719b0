use std::net::SocketAddr;

use thiserror::Error;

/// A client message the server could not act on.
///
/// Both variants are answered with an `error` message; the connection stays up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
  #[error("malformed message: {0}")]
  Malformed(String),

  #[error("unknown message type: {0}")]
  UnknownType(String),
}

impl ProtocolError {
  /// The text sent back to the client.
  pub fn wire_message(&self) -> &'static str {
    match self {
      ProtocolError::Malformed(_) => "Invalid message format",
      ProtocolError::UnknownType(_) => "Unknown message type",
    }
  }
}

#[derive(Debug, Error)]
pub enum BridgeError {
  #[error("failed to bind {addr}")]
  Bind {
    addr: SocketAddr,
    #[source]
    source: std::io::Error,
  },

  #[error("server error: {0}")]
  Serve(#[source] std::io::Error),

  #[error("failed to encode message: {0}")]
  Encode(#[from] serde_json::Error),

  #[error("client is shut down")]
  ClientClosed,
}

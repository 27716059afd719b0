//! axum websocket server in front of a [`Hub`].

use std::sync::Arc;

use axum::{
  Router,
  body::Bytes,
  extract::{
    State,
    ws::{Message, WebSocket, WebSocketUpgrade},
  },
  response::IntoResponse,
  routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::hub::{Hub, Outbound};

/// Routes: `/ws` for the websocket, `/health` for a liveness probe.
pub fn router(hub: Arc<Hub>) -> Router {
  Router::new()
    .route("/ws", get(ws_upgrade))
    .route("/health", get(health))
    .layer(TraceLayer::new_for_http())
    .with_state(hub)
}

async fn health() -> &'static str {
  "ok"
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> impl IntoResponse {
  ws.on_upgrade(move |socket| handle_socket(hub, socket))
}

async fn handle_socket(hub: Arc<Hub>, socket: WebSocket) {
  let (mut sink, mut stream) = socket.split();
  let (tx, mut rx) = mpsc::channel::<Outbound>(hub.config().client_buffer);
  let client_id = hub.register(tx).await;

  let send_task = tokio::spawn(async move {
    while let Some(out) = rx.recv().await {
      let frame = match out {
        Outbound::Text(text) => Message::Text(text.into()),
        Outbound::Ping => Message::Ping(Bytes::new()),
        Outbound::Close => {
          let _ = sink.send(Message::Close(None)).await;
          break;
        }
      };
      if sink.send(frame).await.is_err() {
        break;
      }
    }
  });

  let recv_hub = hub.clone();
  let recv_id = client_id.clone();
  let receive_task = tokio::spawn(async move {
    while let Some(result) = stream.next().await {
      match result {
        Ok(Message::Text(text)) => recv_hub.handle_text(&recv_id, text.as_str()).await,
        Ok(Message::Pong(_)) => recv_hub.mark_alive(&recv_id).await,
        Ok(Message::Close(_)) => break,
        Ok(_) => {}
        Err(err) => {
          debug!(client_id = %recv_id, error = %err, "websocket read error");
          break;
        }
      }
    }
  });

  let (send_abort, receive_abort) = (send_task.abort_handle(), receive_task.abort_handle());
  tokio::select! {
    _ = send_task => receive_abort.abort(),
    _ = receive_task => send_abort.abort(),
  }

  hub.unregister(&client_id).await;
}

/// The bridge server: a shared hub and its router.
pub struct BridgeServer {
  hub: Arc<Hub>,
}

impl BridgeServer {
  pub fn new(hub: Hub) -> Self {
    Self { hub: Arc::new(hub) }
  }

  pub fn hub(&self) -> &Arc<Hub> {
    &self.hub
  }

  pub fn router(&self) -> Router {
    router(self.hub.clone())
  }

  /// Bind the configured address.
  pub async fn bind(&self) -> Result<TcpListener, BridgeError> {
    let addr = self.hub.config().socket_addr();
    TcpListener::bind(addr)
      .await
      .map_err(|source| BridgeError::Bind { addr, source })
  }

  /// Serve until the process exits.
  pub async fn serve(&self, listener: TcpListener) -> Result<(), BridgeError> {
    self
      .serve_with_shutdown(listener, CancellationToken::new())
      .await
  }

  /// Serve until `shutdown` is cancelled. Hub tasks are stopped on return.
  pub async fn serve_with_shutdown(
    &self,
    listener: TcpListener,
    shutdown: CancellationToken,
  ) -> Result<(), BridgeError> {
    let tasks = self.hub.start();
    if let Ok(addr) = listener.local_addr() {
      info!(addr = %addr, "bridge listening");
    }

    let result = axum::serve(listener, self.router())
      .with_graceful_shutdown(async move { shutdown.cancelled().await })
      .await
      .map_err(BridgeError::Serve);

    for task in tasks {
      task.abort();
    }
    if let Err(err) = &result {
      warn!(error = %err, "bridge server stopped with an error");
    }
    result
  }
}

//! Flowsim Bridge
//!
//! Delivers execution events to observers over websockets.
//!
//! - [`protocol`]: the JSON messages both sides exchange
//! - [`Hub`]: the client registry; runs `workflow_execute` requests on its
//!   own engine and streams progress to subscribers of the workflow id
//! - [`Fanout`]: channel-addressed pub/sub between the hub's run pump and the
//!   clients; [`LocalFanout`] keeps it in-process
//! - [`BridgeServer`]: the axum router and serve loop
//! - [`BridgeClient`]: a reconnecting client with bounded exponential backoff

mod backoff;
mod client;
mod config;
mod error;
mod fanout;
mod hub;
pub mod protocol;
mod server;

pub use backoff::{Backoff, ReconnectPolicy};
pub use client::{BridgeClient, ConnectionState};
pub use config::{BridgeConfig, ClientConfig};
pub use error::{BridgeError, ProtocolError};
pub use fanout::{Channel, Envelope, Fanout, LocalFanout};
pub use hub::{Hub, Outbound};
pub use protocol::{ClientMessage, ServerMessage, WireId};
pub use server::{BridgeServer, router};

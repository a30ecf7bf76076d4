//! plume-client: Minimal NATS-style pub/sub client
//!
//! The entry point is [`Connection::open`], which dials the server and runs
//! the INFO/CONNECT handshake in the background. Callers await
//! [`Connection::connected`] for handshake completion and push raw framed
//! bytes through [`Connection::publish`]; outbound bytes hit the wire in
//! publish order.
//!
//! Protocol coverage is deliberately narrow: the handshake plus raw
//! outbound publishing. Subscriptions, PING/PONG keepalive, reconnection
//! and TLS are out of scope.

mod connection;
mod queue;

pub use connection::{Connection, ConnectionState, Options, PublishReceipt};
pub use plume_utils::{PlumeError, Result};

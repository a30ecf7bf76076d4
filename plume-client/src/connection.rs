//! Client-server connection management
//!
//! Dials the server over TCP, runs the INFO/CONNECT handshake and drives
//! the two socket loops (sole reader, sole writer) in a background task.

mod engine;
mod state;

pub use engine::{Connection, Options, PublishReceipt};
pub use state::ConnectionState;

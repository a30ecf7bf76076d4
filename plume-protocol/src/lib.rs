//! plume-protocol: Wire-level definitions for the plume client
//!
//! This crate defines the CRLF line framing used by the text protocol and
//! the JSON payload shapes exchanged during the INFO/CONNECT handshake.

pub mod codec;
pub mod handshake;

// Re-export main types at crate root
pub use codec::{CodecError, LineCodec};
pub use handshake::{ConnectInfo, ServerInfo};

/// Prefix of the server's handshake line
pub const INFO_PREFIX: &str = "INFO ";

/// Verb of the client's handshake line
pub const CONNECT_VERB: &str = "CONNECT";

/// Terminator of every protocol text line
pub const CRLF: &str = "\r\n";

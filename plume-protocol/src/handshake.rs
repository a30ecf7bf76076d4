//! INFO/CONNECT handshake payloads
//!
//! JSON shapes for the first exchange on a fresh connection: the server
//! announces itself with `INFO <json>`, the client answers with
//! `CONNECT <json>`. Both structs live for one connection attempt.

use serde::{Deserialize, Serialize};

/// Server capabilities announced in the INFO handshake line.
///
/// Unknown fields are ignored so newer servers stay decodable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    /// Unique identifier of the server
    pub server_id: Option<String>,

    /// Configured name of the server
    pub server_name: Option<String>,

    /// Version of the server
    pub version: Option<String>,

    /// Version of golang the server was built with
    pub go: Option<String>,

    /// IP address the server was started on
    pub host: Option<String>,

    /// Port the server is listening on
    pub port: u16,

    /// Maximum payload size, in bytes, the server accepts
    pub max_payload: u64,

    /// Protocol level; 1 means the server supports the echo feature
    pub proto: i32,

    /// Internal client identifier assigned by the server
    pub client_id: Option<u64>,

    /// Client IP as observed by the server
    pub client_ip: Option<String>,

    /// Whether the client should authenticate upon connect
    pub auth_required: bool,

    /// Whether the client must perform the TLS handshake
    pub tls_required: bool,

    /// Whether the client must provide a certificate during TLS
    pub tls_verify: bool,

    /// Other server urls a client can connect to
    pub connect_urls: Option<Vec<String>>,

    /// Whether the server has transitioned to lame duck mode
    pub ldm: bool,
}

impl ServerInfo {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Client capabilities sent in the CONNECT handshake line.
///
/// Every field is optional and omitted when unset, so the default payload
/// serializes to `{}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectInfo {
    /// Turns on +OK protocol acknowledgements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,

    /// Turns on additional strict format checking
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pedantic: Option<bool>,

    /// Whether the client requires a TLS connection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_required: Option<bool>,

    /// Authorization token (if auth_required is set)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Connection username (if auth_required is set)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Connection password (if auth_required is set)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,

    /// Client name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Implementation language of the client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,

    /// Version of the client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Protocol level; 1 opts in to asynchronous INFO updates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<i32>,

    /// When true the server will not echo this connection's own messages
    /// back to its subscriptions (requires proto >= 1)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo: Option<bool>,

    /// Signed server nonce, when the INFO carried one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,

    /// JWT identifying user permissions and account
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
}

impl ConnectInfo {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

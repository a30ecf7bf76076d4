//! Connection lifecycle state

/// Lifecycle of a client connection.
///
/// Transitions are driven solely by handshake progress and lifecycle
/// calls: `NotConnected` → `Connecting` on dial, `Connecting` →
/// `Connected` on a decoded INFO, anything → `Disposed` when the engine
/// exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotConnected,
    Connecting,
    Connected,
    Disposed,
}

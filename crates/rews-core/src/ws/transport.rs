//! Transport abstraction: the leaf dependency that actually speaks WebSocket.
//!
//! A [`Transport`] opens one physical connection per call and reports its
//! lifecycle through a [`TransportEvents`] callback set. The reconnecting
//! socket never touches frames or sockets directly; everything goes through
//! these traits, so tests can substitute a scripted transport.

use std::collections::HashMap;
use std::sync::Arc;

/// Close code for a normal, caller-initiated closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Everything needed to (re)open a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Full WebSocket URL (e.g. `wss://example.com/ws`).
    pub url: String,
    /// Extra HTTP headers for the handshake.
    pub headers: HashMap<String, String>,
}

impl ConnectRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), headers: HashMap::new() }
    }
}

/// A single physical connection returned by [`Transport::open`].
///
/// All methods are non-blocking. Sends are best-effort: `false` means the
/// payload was not accepted (not yet open, already closed, or queue gone).
pub trait Connection: Send + Sync {
    /// Transport-assigned identifier, used in log lines.
    fn id(&self) -> u64;
    /// The request this connection was opened from.
    fn request(&self) -> &ConnectRequest;
    fn send_text(&self, text: &str) -> bool;
    fn send_binary(&self, data: &[u8]) -> bool;
    /// Start a close handshake. Returns `false` if the connection is already gone.
    fn close(&self, code: u16, reason: &str) -> bool;
}

/// Shared handle to a live connection.
pub type ConnectionHandle = Arc<dyn Connection>;

/// Lifecycle callbacks delivered by a transport.
///
/// Every method has an empty default so that external listeners only need
/// to override the events they care about. For one connection `on_open`
/// always precedes the other events.
#[allow(unused_variables)]
pub trait TransportEvents: Send + Sync {
    fn on_open(&self, conn: &ConnectionHandle) {}
    fn on_text(&self, conn: &ConnectionHandle, text: &str) {}
    fn on_binary(&self, conn: &ConnectionHandle, data: &[u8]) {}
    /// The peer sent a close frame; the handshake is not finished yet.
    fn on_closing(&self, conn: &ConnectionHandle, code: u16, reason: &str) {}
    /// The connection is fully closed.
    fn on_closed(&self, conn: &ConnectionHandle, code: u16, reason: &str) {}
    /// Handshake or I/O failure. Terminal for this connection.
    fn on_failure(&self, conn: &ConnectionHandle, error: &str) {}
}

/// Opens physical WebSocket connections.
pub trait Transport: Send + Sync {
    /// Begin opening a connection. Must return immediately; the outcome is
    /// reported through `events`.
    fn open(&self, request: ConnectRequest, events: Arc<dyn TransportEvents>) -> ConnectionHandle;
}

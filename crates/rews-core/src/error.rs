//! Typed error definitions for the reconnecting socket.
//!
//! [`RewsError`] covers the few places where the socket reports misuse to the
//! caller. Transport failures are never surfaced here: they are absorbed by the
//! reconnect loop and only reported through the `Error` event handler.

use thiserror::Error;

/// Errors returned by [`ReconnectingSocket`](crate::ReconnectingSocket) and the
/// configuration loader.
#[derive(Debug, Error)]
pub enum RewsError {
    /// Missing or invalid configuration (no URL, inverted delay bounds, ...).
    #[error("config error: {0}")]
    Config(String),

    /// WebSocket request construction or handshake error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// The socket was stopped and cannot be started again.
    #[error("socket stopped")]
    Stopped,
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, RewsError>;

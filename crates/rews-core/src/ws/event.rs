//! Named socket events and the callback types registered for them.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::RewsError;

use super::transport::ConnectionHandle;

/// Lifecycle events a caller can attach a handler to.
///
/// At most one handler is kept per event; registering again replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketEvent {
    /// Handshake completed.
    Open,
    /// Peer started the close handshake.
    Closing,
    /// Connection fully closed.
    Closed,
    /// Transport failure.
    Error,
    /// A reconnect was scheduled. The info string carries the delay.
    Reconnect,
}

impl SocketEvent {
    pub const ALL: [SocketEvent; 5] = [
        SocketEvent::Open,
        SocketEvent::Closing,
        SocketEvent::Closed,
        SocketEvent::Error,
        SocketEvent::Reconnect,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SocketEvent::Open => "open",
            SocketEvent::Closing => "closing",
            SocketEvent::Closed => "closed",
            SocketEvent::Error => "error",
            SocketEvent::Reconnect => "reconnect",
        }
    }
}

impl fmt::Display for SocketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocketEvent {
    type Err = RewsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(SocketEvent::Open),
            "closing" => Ok(SocketEvent::Closing),
            "closed" => Ok(SocketEvent::Closed),
            "error" => Ok(SocketEvent::Error),
            "reconnect" => Ok(SocketEvent::Reconnect),
            other => Err(RewsError::Config(format!("unknown socket event: {other}"))),
        }
    }
}

/// Event handler: `(connection, human-readable info)`.
pub type EventHandler = Arc<dyn Fn(&ConnectionHandle, &str) + Send + Sync>;

/// Consumer for inbound text frames.
pub type TextConsumer = Arc<dyn Fn(&ConnectionHandle, &str) + Send + Sync>;

/// Consumer for inbound binary frames.
pub type BinaryConsumer = Arc<dyn Fn(&ConnectionHandle, &[u8]) + Send + Sync>;

/// Called after a replacement connection was opened: `(new, previous)`.
pub type ReconnectedHook = Arc<dyn Fn(&ConnectionHandle, &ConnectionHandle) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_round_trip() {
        for ev in SocketEvent::ALL {
            assert_eq!(ev.as_str().parse::<SocketEvent>().unwrap(), ev);
        }
        assert_eq!("CLOSED".parse::<SocketEvent>().unwrap(), SocketEvent::Closed);
    }

    #[test]
    fn unknown_event_is_config_error() {
        assert!(matches!("message".parse::<SocketEvent>(), Err(RewsError::Config(_))));
    }
}

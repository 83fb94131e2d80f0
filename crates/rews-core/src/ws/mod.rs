//! WebSocket transport seam and the reconnecting socket built on top of it.

pub mod event;
pub mod socket;
pub mod transport;
pub mod tungstenite;

pub use event::{BinaryConsumer, EventHandler, ReconnectedHook, SocketEvent, TextConsumer};
pub use socket::{ReconnectingSocket, SocketState};
pub use transport::{ConnectRequest, Connection, ConnectionHandle, Transport, TransportEvents};
pub use tungstenite::TungsteniteTransport;

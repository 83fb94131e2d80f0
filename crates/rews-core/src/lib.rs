//! # rews-core
//!
//! Reconnecting WebSocket client, providing:
//!
//! - **Socket** (`ws::socket`): `ReconnectingSocket`, one logical connection
//!   over many physical ones with randomized reconnect delays
//! - **Transport** (`ws::transport`, `ws::tungstenite`): the connection seam
//!   and its `tokio-tungstenite` implementation
//! - **Scheduler** (`scheduler`): single-lane timers (tokio and virtual clock)
//! - **Configuration** (`config`): JSON config deserialization
//! - **Error types** (`error`): `RewsError` via thiserror
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod ws;

pub use error::RewsError;
pub use ws::{ReconnectingSocket, SocketEvent, SocketState};

//! Default [`Transport`] backed by `tokio-tungstenite`.
//!
//! Each [`Transport::open`] call spawns one tokio task that:
//! 1. Connects to the endpoint (TLS when `wss://`) with the extra headers.
//! 2. Reports `on_open`.
//! 3. Forwards inbound frames to the callbacks and outbound commands to the wire.
//! 4. Sends a WebSocket ping frame every `ping_interval` to keep the link alive.
//! 5. Reports `on_closing`/`on_closed` or `on_failure` exactly once, then exits.
//!
//! There is no retry in here: reconnecting is the socket's job.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, info, warn};

use crate::error::{Result, RewsError};

use super::transport::{ConnectRequest, Connection, ConnectionHandle, Transport, TransportEvents};

/// Default keep-alive ping interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Status reported when the peer closed without a close code.
const NO_STATUS_RECEIVED: u16 = 1005;

/// How long to wait for the peer to answer our close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

enum Command {
    Text(String),
    Binary(Vec<u8>),
    Close(u16, String),
}

/// Transport that opens real WebSocket connections on a tokio runtime.
pub struct TungsteniteTransport {
    runtime: Handle,
    ping_interval: Option<Duration>,
    next_id: AtomicU64,
}

impl TungsteniteTransport {
    /// Create a transport that spawns its connection tasks on `runtime`.
    pub fn new(runtime: Handle, ping_interval: Option<Duration>) -> Self {
        // A zero period would panic in `interval_at`; treat it as disabled.
        let ping_interval = ping_interval.filter(|p| !p.is_zero());
        Self { runtime, ping_interval, next_id: AtomicU64::new(0) }
    }

    /// Create a transport bound to the runtime of the calling context.
    pub fn try_current(ping_interval: Option<Duration>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| RewsError::Config(format!("no tokio runtime for transport: {e}")))?;
        Ok(Self::new(runtime, ping_interval))
    }
}

impl Transport for TungsteniteTransport {
    fn open(&self, request: ConnectRequest, events: Arc<dyn TransportEvents>) -> ConnectionHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(TungsteniteConnection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            request,
            open: AtomicBool::new(false),
            cmd_tx,
        });

        self.runtime.spawn(connection_task(conn.clone(), events, cmd_rx, self.ping_interval));
        conn
    }
}

/// Handle to one connection task.
struct TungsteniteConnection {
    id: u64,
    request: ConnectRequest,
    open: AtomicBool,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl Connection for TungsteniteConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn request(&self) -> &ConnectRequest {
        &self.request
    }

    fn send_text(&self, text: &str) -> bool {
        self.open.load(Ordering::Acquire) && self.cmd_tx.send(Command::Text(text.to_owned())).is_ok()
    }

    fn send_binary(&self, data: &[u8]) -> bool {
        self.open.load(Ordering::Acquire) && self.cmd_tx.send(Command::Binary(data.to_vec())).is_ok()
    }

    fn close(&self, code: u16, reason: &str) -> bool {
        self.open.store(false, Ordering::Release);
        self.cmd_tx.send(Command::Close(code, reason.to_owned())).is_ok()
    }
}

/// Connect, pump frames until the connection ends, report the outcome.
async fn connection_task(
    conn: Arc<TungsteniteConnection>,
    events: Arc<dyn TransportEvents>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    ping_interval: Option<Duration>,
) {
    let handle: ConnectionHandle = conn.clone();
    let conn_id = conn.id;

    info!("[ws-{conn_id}] connecting to {}", conn.request.url);

    // A close requested while the handshake is in flight cancels it.
    let ws_stream = tokio::select! {
        res = connect_ws(&conn.request) => match res {
            Ok(s) => s,
            Err(e) => {
                error!("[ws-{conn_id}] connection failed: {e}");
                events.on_failure(&handle, &e.to_string());
                return;
            }
        },
        (code, reason) = wait_for_close(&mut cmd_rx) => {
            info!("[ws-{conn_id}] closed before handshake completed");
            events.on_closed(&handle, code, &reason);
            return;
        }
    };

    info!("[ws-{conn_id}] connected");
    conn.open.store(true, Ordering::Release);
    events.on_open(&handle);

    let (mut ws_write, mut ws_read) = ws_stream.split();

    tokio::pin! {
        let ping_tick = async {
            if let Some(period) = ping_interval {
                let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                loop {
                    interval.tick().await;
                }
            } else {
                std::future::pending::<()>().await
            }
        };
    }

    // Set once we sent our own close frame; reported when the peer confirms.
    let mut local_close: Option<(u16, String)> = None;

    loop {
        tokio::select! {
            msg = ws_read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => events.on_text(&handle, text.as_str()),
                    Some(Ok(Message::Binary(data))) => events.on_binary(&handle, &data),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        conn.open.store(false, Ordering::Release);
                        let (code, reason) = match (&local_close, frame) {
                            (Some(local), _) => local.clone(),
                            (None, Some(f)) => (u16::from(f.code), f.reason.as_str().to_owned()),
                            (None, None) => (NO_STATUS_RECEIVED, String::new()),
                        };
                        warn!("[ws-{conn_id}] received close frame [{code}] {reason}");
                        if local_close.is_none() {
                            events.on_closing(&handle, code, &reason);
                        }
                        // Flush the queued close reply.
                        let _ = ws_write.close().await;
                        events.on_closed(&handle, code, &reason);
                        return;
                    }
                    Some(Err(e)) => {
                        conn.open.store(false, Ordering::Release);
                        match local_close.take() {
                            Some((code, reason)) => {
                                debug!("[ws-{conn_id}] read error after local close: {e}");
                                events.on_closed(&handle, code, &reason);
                            }
                            None => {
                                error!("[ws-{conn_id}] read error: {e}");
                                events.on_failure(&handle, &e.to_string());
                            }
                        }
                        return;
                    }
                    None => {
                        conn.open.store(false, Ordering::Release);
                        match local_close.take() {
                            Some((code, reason)) => events.on_closed(&handle, code, &reason),
                            None => {
                                warn!("[ws-{conn_id}] stream ended");
                                events.on_failure(&handle, "stream ended");
                            }
                        }
                        return;
                    }
                    _ => {} // Pong, Frame
                }
            }

            Some(cmd) = cmd_rx.recv(), if local_close.is_none() => {
                let result = match cmd {
                    Command::Text(text) => ws_write.send(Message::Text(text.into())).await,
                    Command::Binary(data) => ws_write.send(Message::Binary(data.into())).await,
                    Command::Close(code, reason) => {
                        debug!("[ws-{conn_id}] closing [{code}] {reason}");
                        let frame = CloseFrame { code: CloseCode::from(code), reason: reason.clone().into() };
                        local_close = Some((code, reason));
                        ws_write.send(Message::Close(Some(frame))).await
                    }
                };
                if let Err(e) = result {
                    conn.open.store(false, Ordering::Release);
                    match local_close.take() {
                        Some((code, reason)) => events.on_closed(&handle, code, &reason),
                        None => {
                            error!("[ws-{conn_id}] send error: {e}");
                            events.on_failure(&handle, &e.to_string());
                        }
                    }
                    return;
                }
            }

            _ = tokio::time::sleep(CLOSE_TIMEOUT), if local_close.is_some() => {
                if let Some((code, reason)) = local_close.take() {
                    warn!("[ws-{conn_id}] peer did not confirm close within {CLOSE_TIMEOUT:?}");
                    events.on_closed(&handle, code, &reason);
                }
                return;
            }

            _ = &mut ping_tick, if local_close.is_none() => {
                if let Err(e) = ws_write.send(Message::Ping(Vec::new().into())).await {
                    conn.open.store(false, Ordering::Release);
                    error!("[ws-{conn_id}] ping send error: {e}");
                    events.on_failure(&handle, &e.to_string());
                    return;
                }
            }
        }
    }
}

/// Resolve once a close command arrives; outbound frames queued before the
/// handshake are dropped.
async fn wait_for_close(cmd_rx: &mut mpsc::UnboundedReceiver<Command>) -> (u16, String) {
    while let Some(cmd) = cmd_rx.recv().await {
        if let Command::Close(code, reason) = cmd {
            return (code, reason);
        }
    }
    std::future::pending().await
}

/// Perform the WebSocket handshake with the request's extra headers.
async fn connect_ws(request: &ConnectRequest) -> anyhow::Result<WsStream> {
    let mut req = request.url.as_str().into_client_request()?;

    for (key, value) in &request.headers {
        req.headers_mut()
            .insert(HeaderName::from_bytes(key.as_bytes())?, HeaderValue::from_str(value)?);
    }

    let (stream, _response) = tokio_tungstenite::connect_async(req).await?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::transport::NORMAL_CLOSURE;
    use tokio::net::TcpListener;

    struct Recorder(mpsc::UnboundedSender<String>);

    impl TransportEvents for Recorder {
        fn on_open(&self, _conn: &ConnectionHandle) {
            let _ = self.0.send("open".into());
        }
        fn on_text(&self, _conn: &ConnectionHandle, text: &str) {
            let _ = self.0.send(format!("text:{text}"));
        }
        fn on_closing(&self, _conn: &ConnectionHandle, code: u16, reason: &str) {
            let _ = self.0.send(format!("closing:{code}:{reason}"));
        }
        fn on_closed(&self, _conn: &ConnectionHandle, code: u16, reason: &str) {
            let _ = self.0.send(format!("closed:{code}:{reason}"));
        }
        fn on_failure(&self, _conn: &ConnectionHandle, _error: &str) {
            let _ = self.0.send("failure".into());
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap()
    }

    /// Echo server that answers `"bye"` with a normal close.
    async fn spawn_echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Text(t) if t.as_str() == "bye" => {
                        let frame = CloseFrame { code: CloseCode::Normal, reason: "done".into() };
                        let _ = ws.close(Some(frame)).await;
                    }
                    Message::Text(t) => {
                        let _ = ws.send(Message::Text(t)).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn echo_then_server_close() {
        let url = spawn_echo_server().await;
        let transport = TungsteniteTransport::try_current(None).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let conn = transport.open(ConnectRequest::new(url), Arc::new(Recorder(tx)));
        assert!(!conn.send_text("too early"));

        assert_eq!(next_event(&mut rx).await, "open");
        assert!(conn.send_text("hello"));
        assert_eq!(next_event(&mut rx).await, "text:hello");

        assert!(conn.send_text("bye"));
        assert_eq!(next_event(&mut rx).await, "closing:1000:done");
        assert_eq!(next_event(&mut rx).await, "closed:1000:done");
        assert!(!conn.send_text("after close"));
    }

    #[tokio::test]
    async fn client_close_reports_closed_without_closing() {
        let url = spawn_echo_server().await;
        let transport = TungsteniteTransport::try_current(None).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let conn = transport.open(ConnectRequest::new(url), Arc::new(Recorder(tx)));
        assert_eq!(next_event(&mut rx).await, "open");

        assert!(conn.close(NORMAL_CLOSURE, "paused"));
        assert_eq!(next_event(&mut rx).await, "closed:1000:paused");
    }

    #[tokio::test]
    async fn zero_ping_interval_disables_pings() {
        let transport = TungsteniteTransport::try_current(Some(Duration::ZERO)).unwrap();
        assert_eq!(transport.ping_interval, None);

        let url = spawn_echo_server().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = transport.open(ConnectRequest::new(url), Arc::new(Recorder(tx)));
        assert_eq!(next_event(&mut rx).await, "open");
        assert!(conn.send_text("still alive"));
        assert_eq!(next_event(&mut rx).await, "text:still alive");
    }

    #[tokio::test]
    async fn refused_connection_reports_failure() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = TungsteniteTransport::try_current(None).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        transport.open(ConnectRequest::new(format!("ws://127.0.0.1:{port}")), Arc::new(Recorder(tx)));
        assert_eq!(next_event(&mut rx).await, "failure");
    }
}

//! Reconnecting WebSocket facade.
//!
//! [`ReconnectingSocket`] keeps one *logical* connection alive over a sequence
//! of physical ones:
//! 1. `start()` opens the first connection through the [`Transport`].
//! 2. On open it sends the auto-send messages and arms the periodic timer.
//! 3. On close or failure it cancels its timers, draws a delay uniformly from
//!    `[delay_min, delay_max]` seconds and schedules a reopen of the same
//!    request on the [`Scheduler`].
//! 4. `pause()`/`resume()` switch reconnection off and on; `stop()` is terminal.
//!
//! Retries never give up: there is no attempt limit.
//!
//! All mutable state sits behind one mutex. Caller callbacks are always invoked
//! with no lock held, so they may call back into the socket.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_DELAY_MAX_SEC, DEFAULT_DELAY_MIN_SEC, SocketConfig, validate_delay_range};
use crate::error::{Result, RewsError};
use crate::scheduler::{Scheduler, TimerHandle, TokioScheduler};

use super::event::{BinaryConsumer, EventHandler, ReconnectedHook, SocketEvent, TextConsumer};
use super::transport::{
    ConnectRequest, ConnectionHandle, NORMAL_CLOSURE, Transport, TransportEvents,
};
use super::tungstenite::{DEFAULT_PING_INTERVAL, TungsteniteTransport};

/// Connection lifecycle as seen by the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Constructed, not started.
    Idle,
    /// A transport open was requested.
    Connecting,
    /// The transport reported the handshake complete.
    Open,
    /// The peer started a close handshake.
    Closing,
    /// The connection closed; a reconnect may be pending.
    Closed,
    /// The connection failed; a reconnect may be pending.
    Failed,
    /// Reconnection disabled by the caller.
    Paused,
    /// Terminal.
    Stopped,
}

/// Caller configuration. Read when a connection opens, never mid-callback.
struct Options {
    url: Option<String>,
    headers: HashMap<String, String>,
    initial_messages: Vec<String>,
    periodic_messages: Vec<String>,
    period: Duration,
    delay_min: u64,
    delay_max: u64,
    ping_interval: Option<Duration>,
    handlers: HashMap<SocketEvent, EventHandler>,
    text_consumer: Option<TextConsumer>,
    binary_consumer: Option<BinaryConsumer>,
    reconnected: Option<ReconnectedHook>,
    listener: Option<Arc<dyn TransportEvents>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            url: None,
            headers: HashMap::new(),
            initial_messages: Vec::new(),
            periodic_messages: Vec::new(),
            period: Duration::ZERO,
            delay_min: DEFAULT_DELAY_MIN_SEC,
            delay_max: DEFAULT_DELAY_MAX_SEC,
            ping_interval: Some(DEFAULT_PING_INTERVAL),
            handlers: HashMap::new(),
            text_consumer: None,
            binary_consumer: None,
            reconnected: None,
            listener: None,
        }
    }
}

/// Connection bookkeeping shared by the transport lane and the scheduler lane.
struct Shared {
    state: SocketState,
    reconnect_enabled: bool,
    /// Sequence number of the latest open request. Events tagged with an older
    /// number come from a superseded connection.
    attempt: u64,
    /// Handle returned for the latest open request (may still be connecting).
    latest: Option<ConnectionHandle>,
    /// Last connection that reported open.
    current: Option<ConnectionHandle>,
    request: Option<ConnectRequest>,
    periodic_timer: Option<TimerHandle>,
    reconnect_timer: Option<TimerHandle>,
    transport: Option<Arc<dyn Transport>>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl Shared {
    fn take_timers(&mut self) -> [Option<TimerHandle>; 2] {
        [self.periodic_timer.take(), self.reconnect_timer.take()]
    }
}

fn cancel_all(timers: [Option<TimerHandle>; 2]) {
    for timer in timers.into_iter().flatten() {
        timer.cancel();
    }
}

struct Inner {
    options: Mutex<Options>,
    shared: Mutex<Shared>,
}

/// A WebSocket client that reconnects by itself.
///
/// Configure with the builder methods, then call [`start`](Self::start).
/// Dropping the socket stops it.
///
/// ```ignore
/// let socket = ReconnectingSocket::new("wss://example.com/ws")
///     .autosend("subscribe:A")
///     .periodic(["ping"], Duration::from_secs(5))
///     .reconnect_delay(1, 10)
///     .on_text(|_conn, text| println!("{text}"))
///     .on(SocketEvent::Reconnect, |_conn, info| println!("{info}"));
/// socket.start()?;
/// ```
pub struct ReconnectingSocket {
    inner: Arc<Inner>,
}

impl Default for ReconnectingSocket {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                options: Mutex::new(Options::default()),
                shared: Mutex::new(Shared {
                    state: SocketState::Idle,
                    reconnect_enabled: true,
                    attempt: 0,
                    latest: None,
                    current: None,
                    request: None,
                    periodic_timer: None,
                    reconnect_timer: None,
                    transport: None,
                    scheduler: None,
                }),
            }),
        }
    }
}

impl ReconnectingSocket {
    /// Create a socket for `url`. Nothing connects until [`start`](Self::start).
    pub fn new(url: impl Into<String>) -> Self {
        let socket = Self::default();
        socket.set_url(url);
        socket
    }

    /// Build a socket from a validated [`SocketConfig`].
    pub fn from_config(config: &SocketConfig) -> Result<Self> {
        config.validate()?;

        let mut socket = Self::new(config.url.clone())
            .headers(config.extra_headers.clone())
            .autosend_all(config.autosend.clone())
            .reconnect_delay(config.reconnect.delay_min_sec, config.reconnect.delay_max_sec)
            .reconnect_enabled(config.reconnect.enabled)
            .ping_interval(config.ping_interval());
        if let Some(periodic) = &config.periodic {
            socket = socket.periodic(periodic.messages.clone(), Duration::from_secs(periodic.interval_sec));
        }
        Ok(socket)
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// Change the URL. Takes effect on the next [`start`](Self::start).
    pub fn set_url(&self, url: impl Into<String>) {
        self.inner.options.lock().url = Some(url.into());
    }

    /// Add an extra handshake header.
    pub fn header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.options.lock().headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.inner.options.lock().headers.extend(headers);
        self
    }

    /// Queue a message sent once after every successful connection.
    pub fn autosend(self, message: impl Into<String>) -> Self {
        self.inner.options.lock().initial_messages.push(message.into());
        self
    }

    pub fn autosend_all<I, S>(self, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.options.lock().initial_messages.extend(messages.into_iter().map(Into::into));
        self
    }

    /// Add messages re-sent every `interval` while connected. The interval
    /// applies to the whole periodic set; the last call wins.
    pub fn periodic<I, S>(self, messages: I, interval: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut options = self.inner.options.lock();
        options.periodic_messages.extend(messages.into_iter().map(Into::into));
        options.period = interval;
        drop(options);
        self
    }

    /// Reconnect delay bounds in whole seconds, both inclusive.
    pub fn reconnect_delay(self, min_sec: u64, max_sec: u64) -> Self {
        let mut options = self.inner.options.lock();
        options.delay_min = min_sec;
        options.delay_max = max_sec;
        drop(options);
        self
    }

    pub fn reconnect_enabled(self, enabled: bool) -> Self {
        self.inner.shared.lock().reconnect_enabled = enabled;
        self
    }

    /// Keep-alive ping interval of the default transport (`None` or zero disables).
    pub fn ping_interval(self, interval: Option<Duration>) -> Self {
        self.inner.options.lock().ping_interval = interval.filter(|p| !p.is_zero());
        self
    }

    /// Register the handler for `event`, replacing any previous one.
    pub fn on<F>(self, event: SocketEvent, handler: F) -> Self
    where
        F: Fn(&ConnectionHandle, &str) + Send + Sync + 'static,
    {
        self.inner.options.lock().handlers.insert(event, Arc::new(handler));
        self
    }

    pub fn on_text<F>(self, consumer: F) -> Self
    where
        F: Fn(&ConnectionHandle, &str) + Send + Sync + 'static,
    {
        self.inner.options.lock().text_consumer = Some(Arc::new(consumer));
        self
    }

    pub fn on_binary<F>(self, consumer: F) -> Self
    where
        F: Fn(&ConnectionHandle, &[u8]) + Send + Sync + 'static,
    {
        self.inner.options.lock().binary_consumer = Some(Arc::new(consumer));
        self
    }

    /// Called with `(new, previous)` after a replacement connection was opened.
    pub fn on_reconnected<F>(self, hook: F) -> Self
    where
        F: Fn(&ConnectionHandle, &ConnectionHandle) + Send + Sync + 'static,
    {
        self.inner.options.lock().reconnected = Some(Arc::new(hook));
        self
    }

    /// Raw passthrough listener, invoked before the socket's own handling.
    pub fn listener(self, listener: Arc<dyn TransportEvents>) -> Self {
        self.inner.options.lock().listener = Some(listener);
        self
    }

    /// Use a custom transport instead of [`TungsteniteTransport`].
    pub fn transport(self, transport: Arc<dyn Transport>) -> Self {
        self.inner.shared.lock().transport = Some(transport);
        self
    }

    /// Use a custom scheduler instead of [`TokioScheduler`].
    pub fn scheduler(self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.inner.shared.lock().scheduler = Some(scheduler);
        self
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open the first connection.
    ///
    /// Calling `start` again opens another connection that supersedes the
    /// previous one. Fails after [`stop`](Self::stop), without a URL, with
    /// inverted delay bounds or with periodic messages but a zero interval.
    pub fn start(&self) -> Result<()> {
        let (request, ping_interval) = {
            let options = self.inner.options.lock();
            let url = options.url.clone().ok_or_else(|| RewsError::Config("url not set".into()))?;
            validate_delay_range(options.delay_min, options.delay_max)?;
            if !options.periodic_messages.is_empty() && options.period.is_zero() {
                return Err(RewsError::Config("periodic interval must be > 0".into()));
            }
            (ConnectRequest { url, headers: options.headers.clone() }, options.ping_interval)
        };

        {
            let mut shared = self.inner.shared.lock();
            if shared.state == SocketState::Stopped {
                return Err(RewsError::Stopped);
            }
            if shared.latest.is_some() {
                warn!("[rews] start called again, superseding the current connection");
            }
            if shared.transport.is_none() {
                shared.transport = Some(Arc::new(TungsteniteTransport::try_current(ping_interval)?));
            }
            if shared.scheduler.is_none() {
                shared.scheduler = Some(Arc::new(TokioScheduler::try_current()?));
            }
            shared.request = Some(request);
        }

        info!("[rews] starting");
        self.inner.open_connection(false);
        Ok(())
    }

    /// Send a text frame on the current connection.
    ///
    /// Returns `false` when no connection is open, which is expected while a
    /// reconnect is pending.
    pub fn send(&self, text: &str) -> bool {
        let current = self.inner.shared.lock().current.clone();
        current.is_some_and(|conn| conn.send_text(text))
    }

    /// Send a binary frame on the current connection.
    pub fn send_binary(&self, data: &[u8]) -> bool {
        let current = self.inner.shared.lock().current.clone();
        current.is_some_and(|conn| conn.send_binary(data))
    }

    /// Disable reconnection and close the current connection normally.
    pub fn pause(&self) {
        let (timers, latest) = {
            let mut shared = self.inner.shared.lock();
            // Must be off before close() so a fast on_closed cannot reconnect.
            shared.reconnect_enabled = false;
            if shared.state != SocketState::Stopped {
                shared.state = SocketState::Paused;
            }
            (shared.take_timers(), shared.latest.clone())
        };
        cancel_all(timers);

        if let Some(conn) = latest {
            info!("[ws-{}] pausing", conn.id());
            conn.close(NORMAL_CLOSURE, "paused");
        }
    }

    /// Re-enable reconnection and open a new connection right away.
    ///
    /// Before the first [`start`](Self::start) this behaves like `start`.
    pub fn resume(&self) -> Result<()> {
        let (timers, previous, prev_live) = {
            let mut shared = self.inner.shared.lock();
            if shared.state == SocketState::Stopped {
                return Err(RewsError::Stopped);
            }
            shared.reconnect_enabled = true;
            if shared.request.is_none() {
                drop(shared);
                return self.start();
            }
            let live = matches!(
                shared.state,
                SocketState::Connecting | SocketState::Open | SocketState::Closing
            );
            shared.current = None;
            (shared.take_timers(), shared.latest.clone(), live)
        };
        cancel_all(timers);

        if let Some(prev) = &previous {
            self.inner.fire(SocketEvent::Reconnect, prev, "reconnect in 0 sec");
        }
        info!("[rews] resuming");
        let new = self.inner.open_connection(false);
        if let Some(prev) = previous {
            // Closed after the new attempt exists, so its close is superseded.
            if prev_live {
                info!("[ws-{}] replaced by resume, closing it", prev.id());
                prev.close(NORMAL_CLOSURE, "superseded");
            }
            if let Some(new) = new {
                self.inner.notify_reconnected(&new, &prev);
            }
        }
        Ok(())
    }

    /// Pause, release the transport and shut the scheduler down. Terminal.
    pub fn stop(&self) {
        if self.state() == SocketState::Stopped {
            return;
        }
        self.pause();

        let scheduler = {
            let mut shared = self.inner.shared.lock();
            shared.state = SocketState::Stopped;
            shared.current = None;
            shared.latest = None;
            shared.transport = None;
            shared.scheduler.take()
        };
        if let Some(scheduler) = scheduler {
            scheduler.shutdown();
        }
        info!("[rews] stopped");
    }

    pub fn state(&self) -> SocketState {
        self.inner.shared.lock().state
    }
}

impl Drop for ReconnectingSocket {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

impl Inner {
    /// Open a connection for the last known request and make it the latest.
    ///
    /// Timer-driven reopens pass `require_enabled` so that a pause racing
    /// with the timer wins.
    fn open_connection(self: &Arc<Self>, require_enabled: bool) -> Option<ConnectionHandle> {
        let (transport, request, attempt) = {
            let mut shared = self.shared.lock();
            if shared.state == SocketState::Stopped || (require_enabled && !shared.reconnect_enabled) {
                return None;
            }
            let transport = shared.transport.clone()?;
            let request = shared.request.clone()?;
            shared.attempt += 1;
            shared.state = SocketState::Connecting;
            (transport, request, shared.attempt)
        };

        let events = Arc::new(AttemptEvents { inner: Arc::downgrade(self), attempt });
        // No lock held: a transport may report events before open() returns.
        let conn = transport.open(request, events);
        debug!("[ws-{}] open requested (attempt {attempt})", conn.id());

        let mut shared = self.shared.lock();
        if shared.attempt == attempt && shared.state != SocketState::Stopped {
            shared.latest = Some(conn.clone());
        }
        Some(conn)
    }

    fn is_latest(&self, attempt: u64) -> bool {
        self.shared.lock().attempt == attempt
    }

    fn listener(&self) -> Option<Arc<dyn TransportEvents>> {
        self.options.lock().listener.clone()
    }

    fn fire(&self, event: SocketEvent, conn: &ConnectionHandle, info: &str) {
        let handler = self.options.lock().handlers.get(&event).cloned();
        if let Some(handler) = handler {
            handler(conn, info);
        }
    }

    fn notify_reconnected(&self, new: &ConnectionHandle, previous: &ConnectionHandle) {
        let hook = self.options.lock().reconnected.clone();
        if let Some(hook) = hook {
            hook(new, previous);
        }
    }

    fn handle_open(self: &Arc<Self>, attempt: u64, conn: &ConnectionHandle) {
        if let Some(listener) = self.listener() {
            listener.on_open(conn);
        }

        let scheduler = {
            let mut shared = self.shared.lock();
            if shared.attempt != attempt || shared.state == SocketState::Stopped {
                None
            } else if shared.state == SocketState::Paused {
                // pause() already asked this connection to close.
                debug!("[ws-{}] opened while paused, ignoring", conn.id());
                return;
            } else {
                shared.current = Some(conn.clone());
                shared.state = SocketState::Open;
                Some(shared.scheduler.clone())
            }
        };
        let Some(scheduler) = scheduler else {
            warn!("[ws-{}] stale connection opened, closing it", conn.id());
            conn.close(NORMAL_CLOSURE, "superseded");
            return;
        };

        info!("[ws-{}] open", conn.id());
        self.fire(SocketEvent::Open, conn, &format!("open:{}", conn.request().url));

        let (initial, periodic, period) = {
            let options = self.options.lock();
            (options.initial_messages.clone(), options.periodic_messages.clone(), options.period)
        };

        for message in &initial {
            if !conn.send_text(message) {
                debug!("[ws-{}] autosend dropped: {message}", conn.id());
            }
        }

        if periodic.is_empty() {
            return;
        }
        let Some(scheduler) = scheduler else { return };

        let tick_conn = conn.clone();
        let timer = scheduler.schedule_repeating(
            period,
            Arc::new(move || {
                for message in &periodic {
                    if !tick_conn.send_text(message) {
                        debug!("[ws-{}] periodic send dropped: {message}", tick_conn.id());
                    }
                }
            }),
        );

        let mut shared = self.shared.lock();
        if shared.attempt == attempt && shared.state == SocketState::Open {
            if let Some(old) = shared.periodic_timer.replace(timer) {
                old.cancel();
            }
        } else {
            // Closed or superseded while arming.
            timer.cancel();
        }
    }

    fn handle_text(&self, attempt: u64, conn: &ConnectionHandle, text: &str) {
        if let Some(listener) = self.listener() {
            listener.on_text(conn, text);
        }
        if !self.is_latest(attempt) {
            return;
        }
        let consumer = self.options.lock().text_consumer.clone();
        if let Some(consumer) = consumer {
            consumer(conn, text);
        }
    }

    fn handle_binary(&self, attempt: u64, conn: &ConnectionHandle, data: &[u8]) {
        if let Some(listener) = self.listener() {
            listener.on_binary(conn, data);
        }
        if !self.is_latest(attempt) {
            return;
        }
        let consumer = self.options.lock().binary_consumer.clone();
        if let Some(consumer) = consumer {
            consumer(conn, data);
        }
    }

    fn handle_closing(&self, attempt: u64, conn: &ConnectionHandle, code: u16, reason: &str) {
        if let Some(listener) = self.listener() {
            listener.on_closing(conn, code, reason);
        }
        if !self.mark_terminal(attempt, SocketState::Closing) {
            return;
        }
        self.fire(SocketEvent::Closing, conn, &format!("closing:[{code}]{reason}"));
    }

    fn handle_closed(self: &Arc<Self>, attempt: u64, conn: &ConnectionHandle, code: u16, reason: &str) {
        if let Some(listener) = self.listener() {
            listener.on_closed(conn, code, reason);
        }
        if !self.mark_terminal(attempt, SocketState::Closed) {
            debug!("[ws-{}] superseded connection closed", conn.id());
            return;
        }
        info!("[ws-{}] closed [{code}] {reason}", conn.id());
        self.fire(SocketEvent::Closed, conn, &format!("closed:[{code}]{reason}"));
        self.reconnect(conn);
    }

    fn handle_failure(self: &Arc<Self>, attempt: u64, conn: &ConnectionHandle, error: &str) {
        if let Some(listener) = self.listener() {
            listener.on_failure(conn, error);
        }
        if !self.mark_terminal(attempt, SocketState::Failed) {
            debug!("[ws-{}] superseded connection failed: {error}", conn.id());
            return;
        }
        warn!("[ws-{}] failure: {error}", conn.id());
        self.fire(SocketEvent::Error, conn, &format!("error:{error}"));
        self.reconnect(conn);
    }

    /// Record a closing/closed/failed transition for the latest attempt.
    /// Returns `false` for superseded attempts.
    fn mark_terminal(&self, attempt: u64, state: SocketState) -> bool {
        let mut shared = self.shared.lock();
        if shared.attempt != attempt {
            return false;
        }
        if !matches!(shared.state, SocketState::Paused | SocketState::Stopped) {
            shared.state = state;
        }
        true
    }

    /// Cancel timers and, if enabled, schedule a reopen after a random delay.
    fn reconnect(self: &Arc<Self>, old: &ConnectionHandle) {
        let (min, max) = {
            let options = self.options.lock();
            (options.delay_min, options.delay_max)
        };

        let scheduler = {
            let mut shared = self.shared.lock();
            let timers = shared.take_timers();
            cancel_all(timers);
            if !shared.reconnect_enabled || shared.state == SocketState::Stopped {
                debug!("[ws-{}] reconnect disabled", old.id());
                return;
            }
            match shared.scheduler.clone() {
                Some(s) => s,
                None => return,
            }
        };

        let delay = draw_delay(min, max);
        let weak = Arc::downgrade(self);
        let previous = old.clone();
        let timer = scheduler.schedule_once(
            Duration::from_secs(delay),
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.reopen(&previous);
                }
            }),
        );

        {
            let mut shared = self.shared.lock();
            if !shared.reconnect_enabled || shared.state == SocketState::Stopped {
                // Paused or stopped while scheduling.
                timer.cancel();
                return;
            }
            if let Some(stale) = shared.reconnect_timer.replace(timer) {
                stale.cancel();
            }
        }

        info!("[ws-{}] reconnect in {delay} sec", old.id());
        self.fire(SocketEvent::Reconnect, old, &format!("reconnect in {delay} sec"));
    }

    /// Reconnect timer fired.
    fn reopen(self: &Arc<Self>, previous: &ConnectionHandle) {
        self.shared.lock().reconnect_timer = None;
        if let Some(new) = self.open_connection(true) {
            self.notify_reconnected(&new, previous);
        }
    }
}

/// Uniform integer delay in `[min, max]` seconds.
fn draw_delay(min: u64, max: u64) -> u64 {
    if min >= max {
        return min;
    }
    rand::thread_rng().gen_range(min..=max)
}

/// Per-attempt callback adapter handed to the transport.
struct AttemptEvents {
    inner: Weak<Inner>,
    attempt: u64,
}

impl TransportEvents for AttemptEvents {
    fn on_open(&self, conn: &ConnectionHandle) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_open(self.attempt, conn);
        }
    }

    fn on_text(&self, conn: &ConnectionHandle, text: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_text(self.attempt, conn, text);
        }
    }

    fn on_binary(&self, conn: &ConnectionHandle, data: &[u8]) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_binary(self.attempt, conn, data);
        }
    }

    fn on_closing(&self, conn: &ConnectionHandle, code: u16, reason: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_closing(self.attempt, conn, code, reason);
        }
    }

    fn on_closed(&self, conn: &ConnectionHandle, code: u16, reason: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_closed(self.attempt, conn, code, reason);
        }
    }

    fn on_failure(&self, conn: &ConnectionHandle, error: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_failure(self.attempt, conn, error);
        }
    }
}

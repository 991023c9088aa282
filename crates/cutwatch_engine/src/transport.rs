//! Push channel: one websocket, typed dispatch, bounded reconnect.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cutwatch_logging::{watch_debug, watch_error, watch_info, watch_warn};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::types::{lock, ConnectionState, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PING_FRAME: &str = r#"{"type":"ping"}"#;

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub url: String,
    /// Delay unit; attempt `n` waits `n * reconnect_base`.
    pub reconnect_base: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws".to_string(),
            reconnect_base: Duration::from_secs(1),
            max_reconnect_attempts: 5,
            heartbeat_interval: Duration::from_secs(20),
        }
    }
}

/// One decoded text frame. `kind` is the lowercased `type` field.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: String,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `disconnect()` was called.
    Requested,
    Remote,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Closed { reason: CloseReason },
    Error(String),
    Message(Frame),
}

/// What a listener wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Messages whose `type` equals the given token.
    Kind(String),
    /// Every message regardless of type.
    Any,
    Open,
    Close,
    Error,
}

impl Topic {
    pub fn kind(kind: impl Into<String>) -> Self {
        Self::Kind(kind.into())
    }

    fn accepts(&self, event: &TransportEvent) -> bool {
        match (self, event) {
            (Topic::Any, TransportEvent::Message(_)) => true,
            (Topic::Kind(kind), TransportEvent::Message(frame)) => kind.eq_ignore_ascii_case(&frame.kind),
            (Topic::Open, TransportEvent::Open)
            | (Topic::Close, TransportEvent::Closed { .. })
            | (Topic::Error, TransportEvent::Error(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

/// Process-wide push connection. Cloning shares the same connection.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

/// Sender half of the outbound queue, tagged with the session that owns it.
struct Outbound {
    session: u64,
    tx: mpsc::UnboundedSender<Message>,
}

struct Inner {
    settings: TransportSettings,
    listeners: Mutex<Vec<(ListenerId, Topic, Listener)>>,
    next_listener: AtomicU64,
    outbound: Mutex<Option<Outbound>>,
    session: Mutex<Option<CancellationToken>>,
    /// Id of the newest session started by `connect()`.
    current_session: AtomicU64,
    next_session: AtomicU64,
    /// Serializes Open/Closed announcements across sessions.
    lifecycle: Mutex<()>,
    state: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
}

impl Transport {
    pub fn new(settings: TransportSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                settings,
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                outbound: Mutex::new(None),
                session: Mutex::new(None),
                current_session: AtomicU64::new(0),
                next_session: AtomicU64::new(1),
                lifecycle: Mutex::new(()),
                state,
                attempts: AtomicU32::new(0),
            }),
        }
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.inner.settings
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Reconnect attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn on<F>(&self, topic: Topic, listener: F) -> ListenerId
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.listeners).push((id, topic, Arc::new(listener)));
        id
    }

    /// Returns whether a listener was removed.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.inner.listeners);
        let before = listeners.len();
        listeners.retain(|(listener_id, _, _)| *listener_id != id);
        before != listeners.len()
    }

    /// Opens the channel. Fails without scheduling a retry; automatic
    /// reconnect only applies to a channel that was open and dropped.
    pub async fn connect(&self) -> Result<(), TransportError> {
        if self.state() == ConnectionState::Open {
            return Ok(());
        }
        let url = url::Url::parse(&self.inner.settings.url)
            .map_err(|err| TransportError::InvalidUrl(err.to_string()))?;

        // From here on a previous session's task may still be winding down,
        // but it no longer owns the outbound queue or the lifecycle events.
        let session = self.inner.next_session.fetch_add(1, Ordering::SeqCst);
        self.inner.current_session.store(session, Ordering::SeqCst);
        if let Some(previous) = lock(&self.inner.session).take() {
            previous.cancel();
        }
        self.inner.state.send_replace(ConnectionState::Connecting);

        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                let cancel = CancellationToken::new();
                *lock(&self.inner.session) = Some(cancel.clone());
                let outbound = self.inner.open_session(session);
                tokio::spawn(drive(self.inner.clone(), session, stream, outbound, cancel));
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                watch_warn!("push channel connect to {} failed: {}", url, message);
                self.inner.state.send_replace(ConnectionState::Disconnected);
                self.inner.emit(&TransportEvent::Error(message.clone()));
                Err(TransportError::Connect(message))
            }
        }
    }

    /// Fire-and-forget. Silently dropped (logged only) when the channel is
    /// not open; callers must not assume delivery.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(err) => {
                watch_warn!("push channel could not encode outbound frame: {}", err);
                return;
            }
        };
        match lock(&self.inner.outbound).as_ref() {
            Some(outbound) => {
                if outbound.tx.send(Message::Text(text)).is_err() {
                    watch_debug!("push channel closed while queueing outbound frame");
                }
            }
            None => watch_debug!("push channel not open; dropping outbound frame"),
        }
    }

    /// Closes the channel and stops any reconnect loop.
    pub fn disconnect(&self) {
        if let Some(session) = lock(&self.inner.session).take() {
            session.cancel();
        }
        lock(&self.inner.outbound).take();
        self.inner.state.send_replace(ConnectionState::Disconnected);
    }
}

impl Inner {
    fn owns(&self, session: u64) -> bool {
        self.current_session.load(Ordering::SeqCst) == session
    }

    fn open_session(&self, session: u64) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _lifecycle = lock(&self.lifecycle);
        *lock(&self.outbound) = Some(Outbound { session, tx });
        self.attempts.store(0, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Open);
        watch_info!("push channel open: {}", self.settings.url);
        self.emit(&TransportEvent::Open);
        rx
    }

    /// Drops the outbound queue and announces the close, unless a newer
    /// session has taken over in the meantime.
    fn close_session(&self, session: u64, reason: &CloseReason) {
        let _lifecycle = lock(&self.lifecycle);
        {
            let mut outbound = lock(&self.outbound);
            if outbound.as_ref().is_some_and(|current| current.session == session) {
                outbound.take();
            }
        }
        if !self.owns(session) {
            watch_debug!("push channel session {} ended after being superseded", session);
            return;
        }
        match reason {
            CloseReason::Requested => watch_info!("push channel closed on request"),
            other => watch_warn!("push channel dropped: {:?}", other),
        }
        self.emit(&TransportEvent::Closed {
            reason: reason.clone(),
        });
    }

    fn emit(&self, event: &TransportEvent) {
        let targets: Vec<Listener> = lock(&self.listeners)
            .iter()
            .filter(|(_, topic, _)| topic.accepts(event))
            .map(|(_, _, listener)| listener.clone())
            .collect();
        for listener in targets {
            listener(event);
        }
    }

    fn dispatch_text(&self, text: &str) {
        let body: Value = match serde_json::from_str(text) {
            Ok(body) => body,
            Err(err) => {
                watch_warn!("dropping undecodable push frame: {}", err);
                return;
            }
        };
        let kind = body
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase();
        self.emit(&TransportEvent::Message(Frame { kind, body }));
    }
}

async fn drive(
    inner: Arc<Inner>,
    session: u64,
    mut stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        let reason = run_session(&inner, stream, outbound, &cancel).await;
        inner.close_session(session, &reason);
        if reason == CloseReason::Requested || cancel.is_cancelled() {
            return;
        }
        match reconnect(&inner, session, &cancel).await {
            Some(next) => {
                stream = next;
                outbound = inner.open_session(session);
            }
            None => return,
        }
    }
}

async fn run_session(
    inner: &Inner,
    stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    cancel: &CancellationToken,
) -> CloseReason {
    let (mut sink, mut source) = stream.split();
    let period = inner.settings.heartbeat_interval.max(Duration::from_millis(100));
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return CloseReason::Requested;
            }
            Some(message) = outbound.recv() => {
                if let Err(err) = sink.send(message).await {
                    return CloseReason::Failed(err.to_string());
                }
            }
            _ = heartbeat.tick() => {
                if let Err(err) = sink.send(Message::Text(PING_FRAME.to_string())).await {
                    return CloseReason::Failed(err.to_string());
                }
            }
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => inner.dispatch_text(&text),
                Some(Ok(Message::Close(_))) | None => return CloseReason::Remote,
                Some(Ok(_)) => {}
                Some(Err(err)) => return CloseReason::Failed(err.to_string()),
            },
        }
    }
}

async fn reconnect(inner: &Inner, session: u64, cancel: &CancellationToken) -> Option<WsStream> {
    let settings = &inner.settings;
    for attempt in 1..=settings.max_reconnect_attempts {
        if cancel.is_cancelled() || !inner.owns(session) {
            return None;
        }
        inner.attempts.store(attempt, Ordering::SeqCst);
        inner
            .state
            .send_replace(ConnectionState::Reconnecting { attempt });
        let delay = settings.reconnect_base * attempt;
        watch_info!(
            "push channel reconnect attempt {}/{} in {:?}",
            attempt,
            settings.max_reconnect_attempts,
            delay
        );

        let connected = tokio::select! {
            _ = cancel.cancelled() => return None,
            connected = async {
                tokio::time::sleep(delay).await;
                connect_async(settings.url.as_str()).await
            } => connected,
        };
        match connected {
            Ok(_) if cancel.is_cancelled() || !inner.owns(session) => return None,
            Ok((stream, _response)) => return Some(stream),
            Err(err) => {
                watch_warn!("push channel reconnect attempt {} failed: {}", attempt, err);
                inner.emit(&TransportEvent::Error(err.to_string()));
            }
        }
    }

    if !inner.owns(session) {
        return None;
    }
    watch_error!(
        "push channel gave up after {} reconnect attempts; waiting for an explicit connect",
        settings.max_reconnect_attempts
    );
    inner.state.send_replace(ConnectionState::Disconnected);
    None
}

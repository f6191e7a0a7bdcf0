//! Realtime push channel.
//!
//! One Socket.IO connection per channel, opened on demand and shared by
//! every subscriber. The connection lives in a background task; the
//! channel only keeps its shutdown handle.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::{SinkExt, StreamExt, future, stream::BoxStream};
use neuralflow_core::{
    AiCompletion, Listener, ListenerHandle, ListenerId, ListenerRegistry, RealtimeEvent,
    events::AI_COMPLETED,
};
use reqwest::cookie::{CookieStore, Jar};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::{
    sync::{broadcast, oneshot, watch},
    task::JoinHandle,
    time::{Duration, Instant, sleep_until},
};
use tokio_stream::wrappers::BroadcastStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Message,
        client::IntoClientRequest,
        http::{HeaderValue, header::COOKIE},
    },
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::protocol::{EnginePacket, ProtocolError, SocketPacket};

const EVENT_CAPACITY: usize = 256;

/// Handler registration id returned by [`RealtimeChannel::on`].
pub type HandlerId = ListenerId;

/// Realtime channel error.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Unsupported socket URL scheme: {0}")]
    Scheme(String),
    #[error("Handshake failed: {0}")]
    Handshake(String),
    #[error("Connection lost: {0}")]
    Socket(String),
    #[error("Server rejected namespace connect: {0}")]
    Rejected(String),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Connection state of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Connection {
    generation: u64,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Inner {
    socket_url: Url,
    jar: Option<Arc<Jar>>,
    state: watch::Sender<ConnectionState>,
    handlers: RwLock<HashMap<String, ListenerRegistry<Value>>>,
    subscribers: Mutex<HashSet<String>>,
    connection: Mutex<Option<Connection>>,
    events: broadcast::Sender<RealtimeEvent>,
    attempts: AtomicU64,
}

/// Shared realtime connection with reference-counted lifetime.
///
/// Cloning is cheap; clones share the same connection and handlers.
#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<Inner>,
}

impl fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("socket_url", &self.inner.socket_url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RealtimeChannel {
    /// Create a disconnected channel for `socket_url`.
    ///
    /// When `jar` is given, its cookies for `socket_url` are sent with the
    /// upgrade request.
    #[must_use]
    pub fn new(socket_url: Url, jar: Option<Arc<Jar>>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                socket_url,
                jar,
                state,
                handlers: RwLock::new(HashMap::new()),
                subscribers: Mutex::new(HashSet::new()),
                connection: Mutex::new(None),
                events,
                attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Open the connection. No-op while connecting or connected.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Close the connection. No-op when not connected.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Register `subscriber` as a user of the connection, opening it for
    /// the first one. Returns the number of subscribers.
    pub fn acquire(&self, subscriber: impl Into<String>) -> usize {
        let mut subscribers = self.inner.lock_subscribers();
        let subscriber = subscriber.into();
        if subscribers.insert(subscriber.clone()) {
            debug!(%subscriber, count = subscribers.len(), "Realtime subscriber acquired");
        }
        self.inner.connect();
        subscribers.len()
    }

    /// Drop `subscriber`, closing the connection after the last one.
    /// Returns the number of remaining subscribers.
    pub fn release(&self, subscriber: &str) -> usize {
        let mut subscribers = self.inner.lock_subscribers();
        if subscribers.remove(subscriber) {
            debug!(%subscriber, count = subscribers.len(), "Realtime subscriber released");
            if subscribers.is_empty() {
                self.inner.disconnect();
            }
        }
        subscribers.len()
    }

    /// Register a handler for `event`. Handlers receive the first event
    /// argument, or `null` when the server sent none.
    pub fn on(&self, event: &str, handler: Listener<Value>) -> HandlerId {
        self.inner.registry(event).add(handler)
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn off(&self, event: &str, id: HandlerId) -> bool {
        let handlers = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        handlers.get(event).is_some_and(|registry| registry.remove(id))
    }

    /// Call `handler` for every `ai:completed` event of `task_id`.
    ///
    /// Completions for other tasks are ignored. The handler stays
    /// registered until the returned subscription is dropped.
    pub fn on_ai_completed<F>(&self, task_id: impl Into<String>, handler: F) -> TaskSubscription
    where
        F: Fn(&AiCompletion) + Send + Sync + 'static,
    {
        let task_id = task_id.into();
        let filter_id = task_id.clone();
        let listener = self
            .inner
            .registry(AI_COMPLETED)
            .subscribe(Arc::new(move |payload: &Value| {
                match AiCompletion::from_payload(payload) {
                    Some(completion) if completion.is_for(&filter_id) => handler(&completion),
                    Some(_) => {}
                    None => warn!(task_id = %filter_id, "Ignoring malformed ai:completed payload"),
                }
            }));
        TaskSubscription {
            task_id,
            _listener: listener,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Stream of every event received after the call.
    #[must_use]
    pub fn events(&self) -> BoxStream<'static, RealtimeEvent> {
        BroadcastStream::new(self.inner.events.subscribe())
            .filter_map(|res| future::ready(res.ok()))
            .boxed()
    }

    /// Number of connections opened so far.
    #[must_use]
    pub fn connection_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock_subscribers().len()
    }
}

/// Registration returned by [`RealtimeChannel::on_ai_completed`].
///
/// Dropping it deregisters the handler.
#[must_use = "dropping the subscription deregisters the handler"]
pub struct TaskSubscription {
    task_id: String,
    _listener: ListenerHandle,
}

impl TaskSubscription {
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl fmt::Debug for TaskSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSubscription")
            .field("task_id", &self.task_id)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock_subscribers(&self) -> MutexGuard<'_, HashSet<String>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_connection(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry(&self, event: &str) -> ListenerRegistry<Value> {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.entry(event.to_string()).or_default().clone()
    }

    fn connect(self: &Arc<Self>) {
        let mut slot = self.lock_connection();
        if slot.is_some() {
            return;
        }
        let generation = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let (shutdown, shutdown_rx) = oneshot::channel();
        self.state.send_replace(ConnectionState::Connecting);
        info!(url = %self.socket_url, generation, "Opening realtime connection");

        let task = tokio::spawn(run_connection(Arc::downgrade(self), generation, shutdown_rx));
        *slot = Some(Connection {
            generation,
            shutdown,
            task,
        });
    }

    fn disconnect(&self) {
        let Some(connection) = self.lock_connection().take() else {
            return;
        };
        info!(generation = connection.generation, "Closing realtime connection");
        // The task may already be gone.
        let _ = connection.shutdown.send(());
        self.state.send_replace(ConnectionState::Disconnected);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_connection()
            .as_ref()
            .is_some_and(|c| c.generation == generation)
    }

    fn mark_connected(&self, generation: u64) {
        if self.is_current(generation) {
            self.state.send_replace(ConnectionState::Connected);
            info!(generation, "Realtime connection established");
        }
    }

    fn finish(&self, generation: u64) {
        let mut slot = self.lock_connection();
        if slot.as_ref().is_some_and(|c| c.generation == generation) {
            *slot = None;
            self.state.send_replace(ConnectionState::Disconnected);
        }
    }

    fn dispatch(&self, name: &str, payload: Value) {
        let registry = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        if let Some(registry) = registry {
            registry.emit(&payload);
        }
        // No stream receivers is fine.
        let _ = self.events.send(RealtimeEvent::from_parts(name, payload));
    }

    fn endpoint(&self) -> Result<Url, RealtimeError> {
        socket_endpoint(&self.socket_url)
    }

    fn cookie_header(&self) -> Option<HeaderValue> {
        let jar = self.jar.as_ref()?;
        let value = jar.cookies(&self.socket_url)?;
        HeaderValue::from_bytes(value.as_bytes()).ok()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(connection) = self
            .connection
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            connection.task.abort();
        }
    }
}

/// Build the Engine.IO websocket endpoint for a server base URL.
///
/// # Errors
/// Returns error for schemes other than http(s) and ws(s).
pub fn socket_endpoint(base: &Url) -> Result<Url, RealtimeError> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(RealtimeError::Scheme(other.to_string())),
    };
    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|()| RealtimeError::Scheme(base.scheme().to_string()))?;
    let path = format!("{}/socket.io/", base.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_fragment(None);
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");
    Ok(url)
}

async fn run_connection(inner: Weak<Inner>, generation: u64, shutdown: oneshot::Receiver<()>) {
    match drive(&inner, generation, shutdown).await {
        Ok(()) => debug!(generation, "Realtime connection finished"),
        Err(e) => error!(generation, "Realtime connection failed: {e}"),
    }
    if let Some(inner) = inner.upgrade() {
        inner.finish(generation);
    }
}

async fn drive(
    weak: &Weak<Inner>,
    generation: u64,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<(), RealtimeError> {
    let request = {
        let Some(inner) = weak.upgrade() else {
            return Ok(());
        };
        let mut request = inner
            .endpoint()?
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::Handshake(e.to_string()))?;
        if let Some(cookie) = inner.cookie_header() {
            request.headers_mut().insert(COOKIE, cookie);
        }
        request
    };

    let (stream, _) = tokio::select! {
        _ = &mut shutdown => return Ok(()),
        res = connect_async(request) => {
            res.map_err(|e| RealtimeError::Handshake(e.to_string()))?
        }
    };
    let (mut sink, mut stream) = stream.split();

    // Armed by the open handshake, pushed forward by every server ping.
    let mut ping_window: Option<Duration> = None;
    let mut ping_deadline = Instant::now();

    loop {
        let frame = tokio::select! {
            _ = &mut shutdown => {
                let goodbye = SocketPacket::disconnect().to_frame();
                let _ = sink.send(Message::Text(goodbye.into())).await;
                let _ = sink.close().await;
                return Ok(());
            }
            () = sleep_until(ping_deadline), if ping_window.is_some() => {
                return Err(RealtimeError::Socket("ping timeout".to_string()));
            }
            msg = stream.next() => msg,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => return Ok(()),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(RealtimeError::Socket(e.to_string())),
        };

        let packet = match EnginePacket::decode(text.as_str()) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping realtime frame: {e}");
                continue;
            }
        };

        let reply = match packet {
            EnginePacket::Open(handshake) => {
                debug!(
                    sid = %handshake.sid,
                    ping_interval = handshake.ping_interval,
                    ping_timeout = handshake.ping_timeout,
                    "Engine.IO open"
                );
                let window = handshake.ping_window();
                ping_window = Some(window);
                ping_deadline = Instant::now() + window;
                Some(SocketPacket::connect().to_frame())
            }
            EnginePacket::Ping(data) => {
                if let Some(window) = ping_window {
                    ping_deadline = Instant::now() + window;
                }
                Some(EnginePacket::Pong(data).encode())
            }
            EnginePacket::Close => return Ok(()),
            EnginePacket::Message(payload) => {
                let Some(inner) = weak.upgrade() else {
                    return Ok(());
                };
                match SocketPacket::decode(&payload) {
                    Ok(SocketPacket::Connect { .. }) => inner.mark_connected(generation),
                    Ok(SocketPacket::Event { name, args, .. }) => {
                        let payload = args.into_iter().next().unwrap_or(Value::Null);
                        inner.dispatch(&name, payload);
                    }
                    Ok(SocketPacket::ConnectError { data, .. }) => {
                        let reason = data.map_or_else(String::new, |d| d.to_string());
                        return Err(RealtimeError::Rejected(reason));
                    }
                    Ok(SocketPacket::Disconnect { .. }) => {
                        info!(generation, "Server closed realtime connection");
                        return Ok(());
                    }
                    Ok(SocketPacket::Ack { .. }) => {}
                    Err(e) => warn!("Dropping realtime packet: {e}"),
                }
                None
            }
            EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => None,
        };

        if let Some(reply) = reply {
            sink.send(Message::Text(reply.into()))
                .await
                .map_err(|e| RealtimeError::Socket(e.to_string()))?;
        }
    }
}

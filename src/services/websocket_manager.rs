/// WebSocket connection manager for real-time delivery.
/// Owns the single socket to the realtime endpoint, reconnects with capped
/// exponential backoff, routes inbound frames to topic subscribers and
/// queues outbound frames while the socket is not open.
///
/// None of the public methods fail: socket errors, refused connections and
/// unexpected closes all end up as state transitions, observable through
/// [`ConnectionManager::watch_status`] and [`ConnectionManager::subscribe_status`].

use crate::config::ReconnectPolicy;
use crate::error::{ClientError, Result};
use crate::models::Frame;
use crate::services::pubsub::{lock, Handler, SubscriptionId, TopicRegistry};
use futures::future::{self, BoxFuture};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::connect_async;
use url::Url;

/// Outbound half of an open socket, carrying serialized text frames
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ClientError> + Send>>;

/// Inbound half of an open socket; ends when the peer closes
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Opens a fresh socket for every connection attempt
pub trait Connector: Send + Sync {
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<(FrameSink, FrameStream)>>;
}

/// Supplies the auth credential embedded in the socket URL.
/// Consulted on every connect and reconnect decision.
pub trait CredentialSource: Send + Sync {
    fn credential(&self) -> Option<String>;
}

/// tokio-tungstenite backed connector
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<(FrameSink, FrameStream)>> {
        Box::pin(async move {
            let (ws_stream, _) = connect_async(url.as_str()).await?;
            let (write, read) = ws_stream.split();

            let sink = write
                .with(|text: String| {
                    future::ready(Ok::<_, tungstenite::Error>(Message::Text(text.into())))
                })
                .sink_map_err(ClientError::from);

            let stream = read.filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(_) => None,
                    Err(e) => Some(Err(ClientError::from(e))),
                })
            });

            let sink: FrameSink = Box::pin(sink);
            let stream: FrameStream = Box::pin(stream);
            Ok((sink, stream))
        })
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// A retry is scheduled
    Reconnecting,
}

/// Connection lifecycle notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Reconnect attempts since the last successful open
    pub attempt: u32,
}

const STATUS_TOPIC: &str = "connection_status";

struct Link {
    state: ConnectionState,
    attempts: u32,
    /// Bumped whenever the current socket or pending attempt is abandoned
    generation: u64,
    writer: Option<mpsc::UnboundedSender<String>>,
    queue: VecDeque<String>,
    reconnect_timer: Option<JoinHandle<()>>,
    connect_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
}

impl Link {
    fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            attempt: self.attempts,
        }
    }

    fn cancel_tasks(&mut self) {
        for handle in [
            self.reconnect_timer.take(),
            self.connect_task.take(),
            self.reader_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

struct Shared {
    endpoint: String,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialSource>,
    link: Mutex<Link>,
    topics: Mutex<TopicRegistry<Value>>,
    status_handlers: Mutex<TopicRegistry<ConnectionStatus>>,
    status_tx: watch::Sender<ConnectionStatus>,
}

/// Handle to the shared connection. Clones refer to the same socket.
///
/// Must be used from within a tokio runtime. Call [`ConnectionManager::shutdown`]
/// when the authenticated session ends; background tasks keep the manager
/// alive until then.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(
        endpoint: impl Into<String>,
        policy: ReconnectPolicy,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        let initial = ConnectionStatus {
            state: ConnectionState::Disconnected,
            attempt: 0,
        };
        let (status_tx, _) = watch::channel(initial);

        ConnectionManager {
            shared: Arc::new(Shared {
                endpoint: endpoint.into(),
                policy,
                connector,
                credentials,
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    attempts: 0,
                    generation: 0,
                    writer: None,
                    queue: VecDeque::new(),
                    reconnect_timer: None,
                    connect_task: None,
                    reader_task: None,
                }),
                topics: Mutex::new(TopicRegistry::new()),
                status_handlers: Mutex::new(TopicRegistry::new()),
                status_tx,
            }),
        }
    }

    /// Open the socket unless it is already connecting or open, or no
    /// credential is available. A pending retry is replaced by an immediate
    /// attempt and the attempt counter starts over.
    pub fn connect(&self) {
        let Some(token) = self.shared.credentials.credential() else {
            log::debug!("No credential available, not connecting");
            return;
        };

        let mut link = self.shared.link();
        if matches!(
            link.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            return;
        }

        link.cancel_tasks();
        link.attempts = 0;
        link.generation += 1;
        link.state = ConnectionState::Connecting;
        let generation = link.generation;
        let status = link.status();
        drop(link);

        if self.shared.publish_status(generation, status) {
            self.shared.spawn_attempt(generation, &token);
        }
    }

    /// Cancel any scheduled retry and close the socket. Idempotent.
    pub fn disconnect(&self) {
        let mut link = self.shared.link();
        link.attempts = 0;
        // Nothing is scheduled or open once settled at disconnected
        if link.state == ConnectionState::Disconnected {
            return;
        }
        link.generation += 1;
        link.cancel_tasks();
        // Dropping the writer lets the write task close the socket
        link.writer = None;
        link.state = ConnectionState::Disconnected;
        let generation = link.generation;
        let status = link.status();
        drop(link);

        log::info!("WebSocket disconnected by client");
        self.shared.publish_status(generation, status);
    }

    /// Disconnect and forget every subscriber and queued frame.
    pub fn shutdown(&self) {
        self.disconnect();
        self.shared.link().queue.clear();
        self.shared.topics().clear();
        lock(&self.shared.status_handlers).clear();
        log::info!("Connection manager shut down");
    }

    pub fn subscribe<F>(&self, topic: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe_handler(topic, Arc::new(handler))
    }

    pub fn subscribe_handler(&self, topic: &str, handler: Handler<Value>) -> SubscriptionId {
        self.shared.topics().subscribe(topic, handler)
    }

    /// Remove a handler; unknown handles are ignored.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) {
        self.shared.topics().unsubscribe(topic, id);
    }

    /// Transmit `{type: topic, payload}` now if the socket is open, otherwise
    /// queue it for replay, in order, on the next open.
    pub fn send(&self, topic: &str, payload: Value) {
        let text = match serde_json::to_string(&Frame::new(topic, payload)) {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to serialize frame for {}: {}", topic, e);
                return;
            }
        };

        let mut link = self.shared.link();
        let text = match (&link.state, &link.writer) {
            (ConnectionState::Connected, Some(writer)) => match writer.send(text) {
                Ok(()) => return,
                Err(mpsc::error::SendError(text)) => text,
            },
            _ => text,
        };

        link.queue.push_back(text);
        log::warn!("WebSocket is not connected. Message queued for later delivery.");
    }

    pub fn subscribe_status<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        lock(&self.shared.status_handlers).subscribe(STATUS_TOPIC, Arc::new(handler))
    }

    pub fn unsubscribe_status(&self, id: SubscriptionId) {
        lock(&self.shared.status_handlers).unsubscribe(STATUS_TOPIC, id);
    }

    /// Latest status as a tokio watch channel
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.link().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn attempts(&self) -> u32 {
        self.shared.link().attempts
    }

    /// Number of frames waiting for an open socket
    pub fn queued(&self) -> usize {
        self.shared.link().queue.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.shared.topics().subscriber_count(topic)
    }
}

impl Shared {
    fn link(&self) -> MutexGuard<'_, Link> {
        lock(&self.link)
    }

    fn topics(&self) -> MutexGuard<'_, TopicRegistry<Value>> {
        lock(&self.topics)
    }

    fn socket_url(&self, token: &str) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    /// Publish a transition made under `generation`. Returns false once a
    /// later connect or disconnect has superseded it, in which case the rest
    /// of the handlers are skipped and the caller must not act on it either.
    fn publish_status(&self, generation: u64, status: ConnectionStatus) -> bool {
        {
            let link = self.link();
            if link.generation != generation {
                log::debug!("Dropping superseded status {:?}", status.state);
                return false;
            }
            self.status_tx.send_replace(status);
        }

        let handlers = lock(&self.status_handlers).handlers(STATUS_TOPIC);
        for (id, handler) in handlers {
            // A handler may reconnect, disconnect or unsubscribe others
            if self.link().generation != generation {
                return false;
            }
            if !lock(&self.status_handlers).contains(STATUS_TOPIC, id) {
                continue;
            }
            handler(&status);
        }
        self.link().generation == generation
    }

    fn spawn_attempt(self: &Arc<Self>, generation: u64, token: &str) {
        let url = match self.socket_url(token) {
            Ok(url) => url,
            Err(e) => {
                log::error!("Invalid WebSocket endpoint {}: {}", self.endpoint, e);
                self.on_closed(generation);
                return;
            }
        };

        let shared = Arc::clone(self);
        let handle = tokio::spawn(async move {
            match shared.connector.connect(url).await {
                Ok((sink, stream)) => shared.on_open(generation, sink, stream),
                Err(e) => {
                    log::warn!("WebSocket connection attempt failed: {}", e);
                    shared.on_closed(generation);
                }
            }
        });

        let mut link = self.link();
        if link.generation == generation {
            link.connect_task = Some(handle);
        }
    }

    fn on_open(self: &Arc<Self>, generation: u64, sink: FrameSink, stream: FrameStream) {
        let mut link = self.link();
        if link.generation != generation || link.state != ConnectionState::Connecting {
            drop(link);
            log::debug!("Discarding socket from an abandoned attempt");
            tokio::spawn(async move {
                let mut sink = sink;
                let _ = sink.close().await;
            });
            return;
        }

        let (writer, rx) = mpsc::unbounded_channel::<String>();
        let replayed = link.queue.len();
        for frame in link.queue.drain(..) {
            // Receiver is alive until the write task starts
            let _ = writer.send(frame);
        }

        link.writer = Some(writer);
        link.state = ConnectionState::Connected;
        link.attempts = 0;
        link.connect_task = None;

        let shared = Arc::clone(self);
        tokio::spawn(write_loop(shared, generation, sink, rx));
        let shared = Arc::clone(self);
        link.reader_task = Some(tokio::spawn(read_loop(shared, generation, stream)));

        let status = link.status();
        drop(link);

        log::info!("WebSocket connected to {}", self.endpoint);
        if replayed > 0 {
            log::info!("Replayed {} queued frame(s)", replayed);
        }
        self.publish_status(generation, status);
    }

    /// Socket closed, errored, or never opened: fall back to disconnected and
    /// schedule the next retry while the policy and the credential allow it.
    fn on_closed(self: &Arc<Self>, generation: u64) {
        let mut link = self.link();
        if link.generation != generation
            || !matches!(
                link.state,
                ConnectionState::Connecting | ConnectionState::Connected
            )
        {
            return;
        }

        link.writer = None;
        link.connect_task = None;
        if let Some(reader) = link.reader_task.take() {
            reader.abort();
        }
        link.state = ConnectionState::Disconnected;
        let mut events = vec![link.status()];

        let has_credential = self.credentials.credential().is_some();
        if has_credential && self.policy.allows(link.attempts) {
            link.attempts += 1;
            link.generation += 1;
            link.state = ConnectionState::Reconnecting;

            let attempt = link.attempts;
            let delay = self.policy.delay_for(attempt);
            let retry_generation = link.generation;
            let shared = Arc::clone(self);
            link.reconnect_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                shared.fire_reconnect(retry_generation);
            }));

            log::info!(
                "Reconnecting in {:?} (attempt {}/{})",
                delay,
                attempt,
                self.policy.max_attempts
            );
            events.push(link.status());
        } else if has_credential {
            log::warn!(
                "Giving up after {} reconnect attempts",
                self.policy.max_attempts
            );
        }
        let current = link.generation;
        drop(link);

        for status in events {
            if !self.publish_status(current, status) {
                break;
            }
        }
    }

    fn fire_reconnect(self: &Arc<Self>, generation: u64) {
        let mut link = self.link();
        if link.generation != generation || link.state != ConnectionState::Reconnecting {
            return;
        }
        link.reconnect_timer = None;

        let Some(token) = self.credentials.credential() else {
            link.state = ConnectionState::Disconnected;
            let status = link.status();
            drop(link);
            log::info!("Credential gone, abandoning reconnect");
            self.publish_status(generation, status);
            return;
        };

        link.state = ConnectionState::Connecting;
        let status = link.status();
        drop(link);

        log::info!(
            "Attempting to reconnect ({}/{})",
            status.attempt,
            self.policy.max_attempts
        );
        if self.publish_status(generation, status) {
            self.spawn_attempt(generation, &token);
        }
    }

    fn dispatch(&self, generation: u64, text: &str) {
        if self.link().generation != generation {
            return;
        }

        let Some(frame) = Frame::parse(text) else {
            log::debug!("Dropping malformed frame: {}", text);
            return;
        };

        let handlers = self.topics().handlers(&frame.topic);
        if handlers.is_empty() {
            log::debug!("No subscribers for {}", frame.topic);
        }
        for (id, handler) in handlers {
            // Skip handlers removed by an earlier handler for this frame
            if !self.topics().contains(&frame.topic, id) {
                continue;
            }
            handler(&frame.payload);
        }
    }
}

async fn write_loop(
    shared: Arc<Shared>,
    generation: u64,
    mut sink: FrameSink,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sink.send(frame).await {
            log::error!("Failed to send WebSocket message: {}", e);
            shared.on_closed(generation);
            return;
        }
    }

    // Writer dropped: disconnect() or the reader saw the socket close
    if let Err(e) = sink.close().await {
        log::debug!("Error while closing WebSocket: {}", e);
    }
}

async fn read_loop(shared: Arc<Shared>, generation: u64, mut stream: FrameStream) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(text) => shared.dispatch(generation, &text),
            Err(e) => {
                log::error!("WebSocket error: {}", e);
                break;
            }
        }
    }

    log::info!("WebSocket connection closed");
    shared.on_closed(generation);
}

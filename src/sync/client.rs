use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SyncClientConfig;
use crate::models::{LessonUpdate, UserActivity};
use crate::services::UpdatePublisher;
use crate::store::{CacheStore, StatusPatch};
use crate::sync::protocol::{ClientEvent, ServerEvent};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Applies the lesson updates carried by `event` to the store and returns
/// how many touched a cached lesson.
///
/// Statuses are per user, so updates published by anyone other than
/// `user_id` are ignored.
pub fn apply_server_event(store: &CacheStore, user_id: &str, event: &ServerEvent) -> usize {
    match event {
        ServerEvent::RecentUpdates(updates) => updates
            .iter()
            .filter(|u| apply_update(store, user_id, u))
            .count(),
        ServerEvent::LessonUpdated(update) => usize::from(apply_update(store, user_id, update)),
        _ => 0,
    }
}

fn apply_update(store: &CacheStore, user_id: &str, update: &LessonUpdate) -> bool {
    if update.user_id != user_id {
        return false;
    }
    store
        .update_status(
            &update.lesson_id,
            StatusPatch::set(update.kind, update.action.value()),
        )
        .is_some()
}

/// Client end of the sync channel. One per process, shared by `Arc`.
///
/// A background task owns the socket: it authenticates, applies incoming
/// updates to the store, sends heartbeats and reconnects after a loss.
/// The store keeps serving its snapshot while disconnected.
pub struct SyncChannel {
    user_id: String,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    connected: watch::Receiver<bool>,
    events: broadcast::Sender<ServerEvent>,
    shutdown: watch::Sender<bool>,
    clock: Arc<dyn Clock>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncChannel {
    pub fn connect(
        config: SyncClientConfig,
        user_id: impl Into<String>,
        store: Arc<CacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let user_id = user_id.into();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected) = watch::channel(false);
        let (events, _) = broadcast::channel(64);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            config,
            user_id: user_id.clone(),
            store,
            outbound_rx,
            connected: connected_tx,
            events: events.clone(),
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(worker.run());

        Arc::new(Self {
            user_id,
            outbound,
            connected,
            events,
            shutdown,
            clock,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Waits until the handshake has been sent. Returns false on timeout.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut connected = self.connected.clone();
        matches!(
            tokio::time::timeout(timeout, connected.wait_for(|c| *c)).await,
            Ok(Ok(_))
        )
    }

    /// Server events, after they have been applied to the store.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    pub fn heartbeat(&self) -> bool {
        self.send(ClientEvent::Heartbeat)
    }

    pub fn report_activity(&self, action: impl Into<String>, lesson_id: Option<String>) -> bool {
        self.send(ClientEvent::UserActivity(UserActivity {
            user_id: self.user_id.clone(),
            action: action.into(),
            lesson_id,
            timestamp: self.clock.now(),
        }))
    }

    fn send(&self, event: ClientEvent) -> bool {
        self.is_connected() && self.outbound.send(event).is_ok()
    }

    /// Stops reconnecting and closes the socket.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl UpdatePublisher for SyncChannel {
    fn is_connected(&self) -> bool {
        SyncChannel::is_connected(self)
    }

    fn publish(&self, update: LessonUpdate) -> bool {
        self.send(ClientEvent::LessonUpdate(update))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Lost,
    Shutdown,
}

struct Worker {
    config: SyncClientConfig,
    user_id: String,
    store: Arc<CacheStore>,
    outbound_rx: mpsc::UnboundedReceiver<ClientEvent>,
    connected: watch::Sender<bool>,
    events: broadcast::Sender<ServerEvent>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        let mut reconnecting = false;
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match connect_async(self.config.url.as_str()).await {
                Ok((socket, _)) => {
                    info!("sync channel connected to {}", self.config.url);
                    if reconnecting {
                        // the replay only covers the last few updates
                        self.store.invalidate_all();
                    }
                    let end = self.session(socket).await;
                    self.connected.send_replace(false);
                    if end == SessionEnd::Shutdown {
                        break;
                    }
                    warn!("sync channel lost, retrying in {:?}", self.config.reconnect_delay);
                }
                Err(err) => {
                    warn!("sync channel connect to {} failed: {}", self.config.url, err);
                }
            }
            reconnecting = true;

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }
        debug!("sync channel stopped");
    }

    async fn session(&mut self, socket: Socket) -> SessionEnd {
        let (mut sink, mut source) = socket.split();

        if send_event(&mut sink, &ClientEvent::Authenticate(self.user_id.clone()))
            .await
            .is_err()
        {
            return SessionEnd::Lost;
        }
        self.connected.send_replace(true);

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }
                _ = heartbeat.tick() => {
                    if send_event(&mut sink, &ClientEvent::Heartbeat).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
                out = self.outbound_rx.recv() => {
                    let Some(event) = out else {
                        let _ = sink.close().await;
                        return SessionEnd::Shutdown;
                    };
                    if send_event(&mut sink, &event).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
                msg = source.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<ServerEvent>(text.as_str()) {
                                Ok(event) => self.dispatch(event),
                                Err(err) => warn!("unreadable sync event: {}", err),
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => return SessionEnd::Lost,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!("sync channel error: {}", err);
                            return SessionEnd::Lost;
                        }
                    }
                }
            }
        }
    }

    fn dispatch(&self, event: ServerEvent) {
        match &event {
            ServerEvent::Error(payload) => warn!("sync server rejected an event: {}", payload.message),
            _ => {
                let applied = apply_server_event(&self.store, &self.user_id, &event);
                if applied > 0 {
                    debug!("applied {} sync updates", applied);
                }
            }
        }
        let _ = self.events.send(event);
    }
}

async fn send_event<S>(sink: &mut S, event: &ClientEvent) -> Result<(), ()>
where
    S: SinkExt<WsMessage> + Unpin,
{
    let json = serde_json::to_string(event).map_err(|err| {
        warn!("failed to encode sync event: {}", err);
    })?;
    sink.send(WsMessage::text(json)).await.map_err(|_| ())
}

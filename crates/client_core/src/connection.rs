use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use shared::protocol::{ClientFrame, RelayEvent};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot, watch},
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{config::relay_ws_url, error::ConnectionError};

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    Connected { connection_id: String },
    Relay(RelayEvent),
}

pub type EventHandler = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Default)]
struct HandlerTable {
    handlers: RwLock<BTreeMap<String, EventHandler>>,
}

impl HandlerTable {
    fn set(&self, slot: &str, handler: EventHandler) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(slot.to_string(), handler)
            .is_some()
    }

    fn remove(&self, slot: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(slot)
            .is_some()
    }

    fn dispatch(&self, event: &ConnectionEvent) {
        let current: Vec<EventHandler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for handler in current {
            handler(event);
        }
    }
}

struct ActiveSession {
    endpoint: String,
    generation: u64,
    // Dropping this sender stops the supervisor task.
    _shutdown: oneshot::Sender<()>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    connection_id: Option<String>,
}

enum SocketEnd {
    Shutdown,
    Dropped,
}

pub struct ConnectionManager {
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    handlers: HandlerTable,
    session: Mutex<Option<ActiveSession>>,
    generation: AtomicU64,
}

impl ConnectionManager {
    pub fn new(policy: ReconnectPolicy) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            policy,
            state,
            handlers: HandlerTable::default(),
            session: Mutex::new(None),
            generation: AtomicU64::new(0),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn connection_id(&self) -> Option<String> {
        self.lock_session()
            .as_ref()
            .and_then(|session| session.connection_id.clone())
    }

    pub fn subscribe(&self, slot: &str, handler: EventHandler) -> bool {
        self.handlers.set(slot, handler)
    }

    pub fn unsubscribe(&self, slot: &str) -> bool {
        self.handlers.remove(slot)
    }

    pub fn open(self: &Arc<Self>, endpoint: &str) -> Result<(), ConnectionError> {
        let url = relay_ws_url(endpoint).map_err(|err| ConnectionError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: err.to_string(),
        })?;
        let url = url.to_string();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let generation = {
            let mut guard = self.lock_session();
            let state = self.state();
            if let Some(active) = guard.as_ref() {
                if active.endpoint == url && state != ConnectionState::Failed {
                    debug!(endpoint = %url, %state, "relay: open ignored, connection already owned");
                    return Ok(());
                }
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *guard = Some(ActiveSession {
                endpoint: url.clone(),
                generation,
                _shutdown: shutdown_tx,
                outbound: None,
                connection_id: None,
            });
            generation
        };

        info!(endpoint = %url, "relay: opening connection");
        self.publish_state(generation, ConnectionState::Connecting);
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.supervise(url, generation, shutdown_rx).await;
        });
        Ok(())
    }

    /// Releases the socket. Safe to call on every exit path, any number of times.
    pub fn close(&self) {
        let (closed, changed) = {
            let mut guard = self.lock_session();
            let closed = guard.take();
            (closed, self.store_state(ConnectionState::Disconnected))
        };
        if let Some(session) = closed {
            info!(endpoint = %session.endpoint, "relay: closing connection");
        }
        if changed {
            self.notify_state(ConnectionState::Disconnected);
        }
    }

    pub fn emit(&self, frame: &ClientFrame) -> Result<(), ConnectionError> {
        let state = self.state();
        let text = serde_json::to_string(frame)?;
        let guard = self.lock_session();
        let outbound = guard
            .as_ref()
            .and_then(|session| session.outbound.as_ref())
            .filter(|_| state == ConnectionState::Connected)
            .ok_or(ConnectionError::NotConnected(state))?;
        outbound
            .send(text)
            .map_err(|_| ConnectionError::NotConnected(state))?;
        debug!(event = frame.event_name(), "relay: queued frame");
        Ok(())
    }

    async fn supervise(
        self: Arc<Self>,
        endpoint: String,
        generation: u64,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut attempt: u32 = 0;
        loop {
            let connect = tokio::time::timeout(self.policy.connect_timeout, connect_async(endpoint.as_str()));
            let result = tokio::select! {
                _ = &mut shutdown => return,
                result = connect => result,
            };

            match result {
                Ok(Ok((socket, _))) => {
                    attempt = 0;
                    match self.run_socket(socket, generation, &mut shutdown).await {
                        SocketEnd::Shutdown => return,
                        SocketEnd::Dropped => {
                            warn!(endpoint = %endpoint, "relay: connection lost");
                        }
                    }
                }
                Ok(Err(err)) => {
                    warn!(endpoint = %endpoint, attempt, "relay: connect failed: {err}");
                }
                Err(_) => {
                    warn!(
                        endpoint = %endpoint,
                        attempt,
                        timeout_ms = self.policy.connect_timeout.as_millis() as u64,
                        "relay: connect timed out"
                    );
                }
            }

            attempt += 1;
            if attempt > self.policy.max_attempts {
                warn!(
                    endpoint = %endpoint,
                    attempts = self.policy.max_attempts,
                    "relay: reconnection attempts exhausted"
                );
                self.publish_state(generation, ConnectionState::Failed);
                return;
            }
            if !self.publish_state(generation, ConnectionState::Reconnecting) {
                return;
            }
            info!(endpoint = %endpoint, attempt, "relay: reconnecting");
            tokio::select! {
                _ = &mut shutdown => return,
                _ = tokio::time::sleep(self.policy.delay) => {}
            }
        }
    }

    async fn run_socket(
        &self,
        socket: RelaySocket,
        generation: u64,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> SocketEnd {
        let connection_id = Uuid::new_v4().to_string();
        let (mut writer, mut reader) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        {
            let mut guard = self.lock_session();
            match guard.as_mut() {
                Some(session) if session.generation == generation => {
                    session.outbound = Some(outbound_tx);
                    session.connection_id = Some(connection_id.clone());
                }
                _ => return SocketEnd::Shutdown,
            }
        }

        info!(connection_id = %connection_id, "relay: connected");
        if !self.publish_state(generation, ConnectionState::Connected) {
            return SocketEnd::Shutdown;
        }
        self.handlers.dispatch(&ConnectionEvent::Connected {
            connection_id: connection_id.clone(),
        });

        let end = loop {
            tokio::select! {
                _ = &mut *shutdown => {
                    // Frames queued before close (a final leave) still go out.
                    while let Ok(text) = outbound_rx.try_recv() {
                        if writer.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    let _ = writer.send(WsMessage::Close(None)).await;
                    break SocketEnd::Shutdown;
                }
                Some(text) = outbound_rx.recv() => {
                    if let Err(err) = writer.send(WsMessage::Text(text)).await {
                        warn!(connection_id = %connection_id, "relay: send failed: {err}");
                        break SocketEnd::Dropped;
                    }
                }
                frame = reader.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => self.dispatch_inbound(&text),
                    Some(Ok(WsMessage::Close(_))) | None => break SocketEnd::Dropped,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(connection_id = %connection_id, "relay: receive failed: {err}");
                        break SocketEnd::Dropped;
                    }
                },
            }
        };

        {
            let mut guard = self.lock_session();
            if let Some(session) = guard.as_mut().filter(|s| s.generation == generation) {
                session.outbound = None;
                session.connection_id = None;
            }
        }
        if matches!(end, SocketEnd::Dropped) {
            let undelivered = drain_undelivered(&mut outbound_rx);
            if undelivered > 0 {
                warn!(
                    connection_id = %connection_id,
                    undelivered,
                    "relay: connection lost with frames still queued"
                );
            }
        }
        end
    }

    fn dispatch_inbound(&self, text: &str) {
        match serde_json::from_str::<RelayEvent>(text) {
            Ok(event) => self.handlers.dispatch(&ConnectionEvent::Relay(event)),
            Err(err) => warn!("relay: ignoring undecodable event: {err}"),
        }
    }

    fn publish_state(&self, generation: u64, state: ConnectionState) -> bool {
        let changed = {
            let guard = self.lock_session();
            let current = guard
                .as_ref()
                .is_some_and(|session| session.generation == generation);
            if !current {
                return false;
            }
            self.store_state(state)
        };
        if changed {
            self.notify_state(state);
        }
        true
    }

    fn store_state(&self, state: ConnectionState) -> bool {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        })
    }

    // Handlers run outside the session lock so they may emit frames.
    fn notify_state(&self, state: ConnectionState) {
        debug!(%state, "relay: state changed");
        self.handlers.dispatch(&ConnectionEvent::StateChanged(state));
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn drain_undelivered(outbound: &mut mpsc::UnboundedReceiver<String>) -> usize {
    outbound.close();
    let mut undelivered = 0;
    while outbound.try_recv().is_ok() {
        undelivered += 1;
    }
    undelivered
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;

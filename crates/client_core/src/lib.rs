use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use chrono::Utc;
use shared::{
    domain::{Consultation, ConsultationId, Message, MessageId, Participant},
    protocol::{ClientFrame, OutgoingMessage, RelayEvent, TypingNotice, TypingStart, TypingStop},
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

pub mod backend;
pub mod config;
pub mod connection;
pub mod error;
pub mod fallback;
pub mod membership;
pub mod store;
pub mod typing;

pub use backend::{HttpBackend, MessageBackend};
pub use config::{load_settings, ClientSettings};
pub use connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, EventHandler, ReconnectPolicy,
};
pub use error::{BackendError, ConnectionError, SendError};
pub use fallback::FallbackSender;
pub use membership::ChannelMembership;
pub use store::{MergeOutcome, MessageStore};
pub use typing::TypingTracker;

const VIEW_HANDLER_SLOT: &str = "consultation-view";
const MIN_TYPING_SWEEP: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ConnectionChanged(ConnectionState),
    MessagesUpdated {
        consultation_id: ConsultationId,
    },
    TypingUpdated {
        consultation_id: ConsultationId,
        names: Vec<String>,
    },
    SendFailed {
        error: String,
        restored_body: Option<String>,
    },
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRoute {
    Live,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub route: SendRoute,
    /// Placeholder id for live sends, confirmed id for fallback sends.
    pub message_id: MessageId,
}

impl From<&ClientSettings> for ReconnectPolicy {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            max_attempts: settings.reconnection_attempts,
            delay: settings.reconnection_delay(),
            connect_timeout: settings.connect_timeout(),
        }
    }
}

struct ViewState {
    consultation: Option<Consultation>,
    store: Option<MessageStore>,
    typing: TypingTracker,
}

pub struct ConsultationClient {
    settings: ClientSettings,
    participant: Participant,
    connection: Arc<ConnectionManager>,
    membership: ChannelMembership,
    backend: Arc<dyn MessageBackend>,
    fallback: FallbackSender,
    view: Mutex<ViewState>,
    typing_sweeper: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<ClientEvent>,
}

impl ConsultationClient {
    pub fn new(settings: ClientSettings, participant: Participant) -> Result<Arc<Self>> {
        settings.validate()?;
        let backend = Arc::new(HttpBackend::new(settings.api_base_url.clone()));
        Ok(Self::new_with_backend(settings, participant, backend))
    }

    pub fn new_with_backend(
        settings: ClientSettings,
        participant: Participant,
        backend: Arc<dyn MessageBackend>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        let connection = ConnectionManager::new(ReconnectPolicy::from(&settings));
        let typing = TypingTracker::new(settings.typing_expiry());
        let client = Arc::new(Self {
            membership: ChannelMembership::new(Arc::clone(&connection)),
            fallback: FallbackSender::new(Arc::clone(&backend)),
            settings,
            participant,
            connection,
            backend,
            view: Mutex::new(ViewState {
                consultation: None,
                store: None,
                typing,
            }),
            typing_sweeper: Mutex::new(None),
            events,
        });

        let weak: Weak<Self> = Arc::downgrade(&client);
        client.connection.subscribe(
            VIEW_HANDLER_SLOT,
            Arc::new(move |event: &ConnectionEvent| {
                if let Some(client) = weak.upgrade() {
                    client.handle_connection_event(event);
                }
            }),
        );
        client
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn open(self: &Arc<Self>) -> Result<(), ConnectionError> {
        self.connection.open(&self.settings.relay_url)?;
        self.start_typing_sweeper();
        Ok(())
    }

    pub fn close(&self) {
        self.leave_consultation();
        if let Some(handle) = self.lock_sweeper().take() {
            handle.abort();
        }
        self.connection.close();
    }

    pub fn active_consultation(&self) -> Option<ConsultationId> {
        self.lock_view()
            .store
            .as_ref()
            .map(|store| store.consultation_id().clone())
    }

    pub fn consultation(&self) -> Option<Consultation> {
        self.lock_view().consultation.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock_view()
            .store
            .as_ref()
            .map(|store| store.messages().to_vec())
            .unwrap_or_default()
    }

    pub fn pending_messages(&self) -> Vec<Message> {
        self.lock_view()
            .store
            .as_ref()
            .map(|store| store.pending().cloned().collect())
            .unwrap_or_default()
    }

    pub fn typing_names(&self) -> Vec<String> {
        self.lock_view().typing.names()
    }

    pub async fn select_consultation(&self, consultation_id: ConsultationId) -> Result<()> {
        let switched = {
            let mut view = self.lock_view();
            let same = view
                .store
                .as_ref()
                .is_some_and(|store| *store.consultation_id() == consultation_id);
            if !same {
                view.store = Some(MessageStore::new(consultation_id.clone()));
                view.consultation = None;
                view.typing.activate(Some(consultation_id.clone()));
            }
            !same
        };
        self.membership.switch_to(Some(&consultation_id));
        if switched {
            info!(%consultation_id, "client: switched consultation");
            self.emit(ClientEvent::MessagesUpdated {
                consultation_id: consultation_id.clone(),
            });
        }

        let history = match self.backend.fetch_history(&consultation_id).await {
            Ok(history) => history,
            Err(err) => {
                self.emit(ClientEvent::Error(format!(
                    "failed to load history for consultation {consultation_id}: {err}"
                )));
                return Err(err)
                    .with_context(|| format!("failed to load consultation {consultation_id}"));
            }
        };

        let seeded = {
            let mut view = self.lock_view();
            let ViewState {
                consultation,
                store,
                ..
            } = &mut *view;
            match store.as_mut() {
                Some(store) if *store.consultation_id() == consultation_id => {
                    let mut messages = history.messages;
                    for message in &mut messages {
                        label_sender(Some(&history.consultation), message);
                    }
                    let added = store.seed_history(messages);
                    *consultation = Some(history.consultation);
                    Some(added)
                }
                _ => None,
            }
        };

        match seeded {
            Some(added) => {
                debug!(%consultation_id, added, "client: history seeded");
                self.emit(ClientEvent::MessagesUpdated { consultation_id });
            }
            None => {
                debug!(%consultation_id, "client: dropping history for inactive consultation");
            }
        }
        Ok(())
    }

    pub fn leave_consultation(&self) {
        {
            let mut view = self.lock_view();
            view.store = None;
            view.consultation = None;
            view.typing.activate(None);
        }
        self.membership.switch_to(None);
    }

    pub async fn send(&self, body: &str) -> Result<SendReceipt, SendError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(SendError::EmptyBody);
        }
        let consultation_id = self
            .active_consultation()
            .ok_or(SendError::NoActiveConsultation)?;

        let mut optimistic_id = None;
        if self.connection.is_connected() {
            let optimistic = {
                let mut view = self.lock_view();
                let store = view
                    .store
                    .as_mut()
                    .filter(|store| *store.consultation_id() == consultation_id)
                    .ok_or(SendError::NoActiveConsultation)?;
                store.insert_optimistic(&self.participant, body, Utc::now())
            };
            self.emit(ClientEvent::MessagesUpdated {
                consultation_id: consultation_id.clone(),
            });

            let frame = ClientFrame::SendMessage(OutgoingMessage {
                consultation_id: consultation_id.clone(),
                sender_id: self.participant.user_id.clone(),
                sender_type: self.participant.sender_type,
                body: body.to_string(),
                sender_name: self.participant.display_name.clone(),
            });
            match self.connection.emit(&frame) {
                Ok(()) => {
                    return Ok(SendReceipt {
                        route: SendRoute::Live,
                        message_id: optimistic.id,
                    });
                }
                Err(err) => {
                    warn!(%consultation_id, "client: live send failed, using fallback: {err}");
                    optimistic_id = Some(optimistic.id);
                }
            }
        }

        match self
            .fallback
            .send(&consultation_id, &self.participant, body)
            .await
        {
            Ok(message) => {
                let message_id = message.id.clone();
                self.apply_confirmed(message);
                Ok(SendReceipt {
                    route: SendRoute::Fallback,
                    message_id,
                })
            }
            Err(err) => {
                if let Some(placeholder_id) = optimistic_id {
                    self.discard_pending(&consultation_id, &placeholder_id);
                }
                self.emit(ClientEvent::SendFailed {
                    error: err.to_string(),
                    restored_body: err.restored_body().map(str::to_string),
                });
                Err(err)
            }
        }
    }

    pub fn start_typing(&self) -> bool {
        let Some(consultation_id) = self.active_consultation() else {
            return false;
        };
        self.emit_typing(ClientFrame::TypingStart(TypingStart {
            consultation_id,
            user_name: self.participant.display_name.clone(),
        }))
    }

    pub fn stop_typing(&self) -> bool {
        let Some(consultation_id) = self.active_consultation() else {
            return false;
        };
        self.emit_typing(ClientFrame::TypingStop(TypingStop { consultation_id }))
    }

    fn emit_typing(&self, frame: ClientFrame) -> bool {
        if !self.connection.is_connected() {
            debug!(event = frame.event_name(), "client: typing signal dropped while offline");
            return false;
        }
        match self.connection.emit(&frame) {
            Ok(()) => true,
            Err(err) => {
                debug!(event = frame.event_name(), "client: typing signal failed: {err}");
                false
            }
        }
    }

    fn handle_connection_event(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged(state) => {
                self.emit(ClientEvent::ConnectionChanged(*state));
            }
            ConnectionEvent::Connected { connection_id } => {
                info!(%connection_id, "client: relay connected");
                self.membership.rejoin();
            }
            ConnectionEvent::Relay(event) => self.handle_relay_event(event),
        }
    }

    fn handle_relay_event(&self, event: &RelayEvent) {
        match event {
            RelayEvent::NewMessage(message) => {
                self.apply_confirmed(message.clone());
            }
            RelayEvent::MessageSent(ack) => match &ack.message {
                Some(message) => {
                    self.apply_confirmed(message.clone());
                }
                None => debug!(message_id = ?ack.message_id, "client: relay acknowledged send"),
            },
            RelayEvent::MessageError(err) => {
                warn!(error = %err.error, "client: relay rejected message");
                self.emit(ClientEvent::SendFailed {
                    error: err.error.clone(),
                    restored_body: None,
                });
            }
            RelayEvent::UserTyping(notice) => self.update_typing(notice, true),
            RelayEvent::UserStoppedTyping(notice) => self.update_typing(notice, false),
            RelayEvent::JoinedConsultation(ack) => {
                debug!(consultation_id = ?ack.consultation_id, "client: relay confirmed join");
            }
            RelayEvent::LeftConsultation(ack) => {
                debug!(consultation_id = ?ack.consultation_id, "client: relay confirmed leave");
            }
        }
    }

    fn apply_confirmed(&self, mut message: Message) -> MergeOutcome {
        let consultation_id = message.consultation_id.clone();
        let outcome = {
            let mut view = self.lock_view();
            let ViewState {
                consultation,
                store,
                ..
            } = &mut *view;
            let Some(store) = store.as_mut() else {
                return MergeOutcome::Ignored;
            };
            label_sender(consultation.as_ref(), &mut message);
            store.merge_confirmed(message)
        };
        debug!(%consultation_id, ?outcome, "client: merged confirmed message");
        if outcome.changed() {
            self.emit(ClientEvent::MessagesUpdated { consultation_id });
        }
        outcome
    }

    fn discard_pending(&self, consultation_id: &ConsultationId, placeholder_id: &MessageId) {
        let removed = self
            .lock_view()
            .store
            .as_mut()
            .filter(|store| store.consultation_id() == consultation_id)
            .is_some_and(|store| store.discard_pending(placeholder_id));
        if removed {
            self.emit(ClientEvent::MessagesUpdated {
                consultation_id: consultation_id.clone(),
            });
        }
    }

    fn update_typing(&self, notice: &TypingNotice, started: bool) {
        let update = {
            let mut view = self.lock_view();
            let changed = if started {
                view.typing.start(
                    notice.consultation_id.as_ref(),
                    &notice.user_name,
                    Instant::now(),
                )
            } else {
                view.typing
                    .stop(notice.consultation_id.as_ref(), &notice.user_name)
            };
            typing_snapshot(&view.typing, changed)
        };
        if let Some((consultation_id, names)) = update {
            self.emit(ClientEvent::TypingUpdated {
                consultation_id,
                names,
            });
        }
    }

    fn expire_typing(&self, now: Instant) {
        let update = {
            let mut view = self.lock_view();
            let changed = view.typing.expire(now);
            typing_snapshot(&view.typing, changed)
        };
        if let Some((consultation_id, names)) = update {
            self.emit(ClientEvent::TypingUpdated {
                consultation_id,
                names,
            });
        }
    }

    fn start_typing_sweeper(self: &Arc<Self>) {
        let Some(expiry) = self.settings.typing_expiry() else {
            return;
        };
        let mut slot = self.lock_sweeper();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let weak = Arc::downgrade(self);
        let period = (expiry / 4).max(MIN_TYPING_SWEEP);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(client) = weak.upgrade() else {
                    break;
                };
                client.expire_typing(Instant::now());
            }
        }));
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn lock_view(&self) -> MutexGuard<'_, ViewState> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_sweeper(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.typing_sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConsultationClient {
    fn drop(&mut self) {
        self.connection.unsubscribe(VIEW_HANDLER_SLOT);
        self.close();
    }
}

fn label_sender(consultation: Option<&Consultation>, message: &mut Message) {
    if !message.sender_name.is_empty() {
        return;
    }
    if let Some(name) =
        consultation.and_then(|c| c.display_name_for(&message.sender_id, message.sender_type))
    {
        message.sender_name = name.to_string();
    }
}

fn typing_snapshot(
    typing: &TypingTracker,
    changed: bool,
) -> Option<(ConsultationId, Vec<String>)> {
    if !changed {
        return None;
    }
    typing.active().cloned().map(|id| (id, typing.names()))
}

#[cfg(test)]
#[path = "tests/mock_relay.rs"]
mod mock_relay;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

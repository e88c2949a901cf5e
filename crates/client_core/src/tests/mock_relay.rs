use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::Utc;
use shared::{
    domain::{Message as ChatMessage, MessageId},
    protocol::{ClientFrame, RelayEvent},
};
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc, Mutex},
};

#[derive(Debug, Clone)]
enum RelayCommand {
    Event(String),
    Drop,
}

#[derive(Clone)]
struct RelayState {
    frames: mpsc::UnboundedSender<ClientFrame>,
    commands: broadcast::Sender<RelayCommand>,
    connections: Arc<AtomicUsize>,
    confirm_delay_ms: i64,
    echo_sends: bool,
    next_id: Arc<AtomicUsize>,
}

pub(crate) struct MockRelay {
    pub(crate) url: String,
    frames: Mutex<mpsc::UnboundedReceiver<ClientFrame>>,
    commands: broadcast::Sender<RelayCommand>,
    connections: Arc<AtomicUsize>,
}

impl MockRelay {
    /// Relay that records frames and only pushes what the test tells it to.
    pub(crate) async fn spawn() -> MockRelay {
        Self::spawn_with(false).await
    }

    /// Relay that answers every `send-message` with a confirmed `new-message`
    /// stamped 1.2s after receipt.
    pub(crate) async fn spawn_echoing() -> MockRelay {
        Self::spawn_with(true).await
    }

    async fn spawn_with(echo_sends: bool) -> MockRelay {
        std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
        let addr = listener.local_addr().expect("relay addr");
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (commands, _) = broadcast::channel(64);
        let connections = Arc::new(AtomicUsize::new(0));
        let state = RelayState {
            frames: frames_tx,
            commands: commands.clone(),
            connections: Arc::clone(&connections),
            confirm_delay_ms: 1200,
            echo_sends,
            next_id: Arc::new(AtomicUsize::new(1)),
        };
        let app = Router::new()
            .route("/socket", get(relay_socket))
            .with_state(state);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        MockRelay {
            url: format!("ws://{addr}/socket"),
            frames: Mutex::new(frames_rx),
            commands,
            connections,
        }
    }

    pub(crate) fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_for_connections(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.connections() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("relay connection timeout");
    }

    pub(crate) fn push(&self, event: &RelayEvent) {
        let text = serde_json::to_string(event).expect("encode relay event");
        self.commands
            .send(RelayCommand::Event(text))
            .expect("no relay session listening");
    }

    /// Drops every open socket without a close handshake.
    pub(crate) fn drop_connections(&self) {
        let _ = self.commands.send(RelayCommand::Drop);
    }

    pub(crate) async fn next_frame(&self) -> ClientFrame {
        tokio::time::timeout(Duration::from_secs(2), async {
            self.frames.lock().await.recv().await
        })
        .await
        .expect("relay frame timeout")
        .expect("relay frame channel closed")
    }

    pub(crate) async fn next_frame_matching(
        &self,
        predicate: impl Fn(&ClientFrame) -> bool,
    ) -> ClientFrame {
        loop {
            let frame = self.next_frame().await;
            if predicate(&frame) {
                return frame;
            }
        }
    }

    pub(crate) async fn assert_no_frame(&self) {
        let next = tokio::time::timeout(Duration::from_millis(150), async {
            self.frames.lock().await.recv().await
        })
        .await;
        assert!(next.is_err(), "unexpected relay frame: {next:?}");
    }
}

async fn relay_socket(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay_session(socket, state))
}

async fn relay_session(mut socket: WebSocket, state: RelayState) {
    let mut commands = state.commands.subscribe();
    state.connections.fetch_add(1, Ordering::SeqCst);
    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else {
                        continue;
                    };
                    if state.echo_sends {
                        if let ClientFrame::SendMessage(outgoing) = &frame {
                            let id = state.next_id.fetch_add(1, Ordering::SeqCst);
                            let confirmed = ChatMessage {
                                id: MessageId(format!("msg-{id}")),
                                consultation_id: outgoing.consultation_id.clone(),
                                sender_id: outgoing.sender_id.clone(),
                                sender_type: outgoing.sender_type,
                                body: outgoing.body.clone(),
                                created_at: Utc::now()
                                    + chrono::Duration::milliseconds(state.confirm_delay_ms),
                                sender_name: outgoing.sender_name.clone(),
                            };
                            let event = RelayEvent::NewMessage(confirmed);
                            let text = serde_json::to_string(&event).expect("encode echo");
                            if socket.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                    }
                    let _ = state.frames.send(frame);
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            command = commands.recv() => match command {
                Ok(RelayCommand::Event(text)) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(RelayCommand::Drop) | Err(_) => break,
            },
        }
    }
}

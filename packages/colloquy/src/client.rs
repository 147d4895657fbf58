//! Connection actor and its handle.
//!
//! One tokio task owns the WebSocket and the [`Session`] state machine.
//! Everything funnels through a single mpsc channel: caller operations
//! from [`ClientHandle`] and inbound socket traffic from the reader task
//! alike. That gives the session exactly one writer, so no locking and no
//! interleaving of half-applied operations.
//!
//! Consumers observe the session through [`ClientEvent`]s on a broadcast
//! channel, plus on-demand [`SessionSnapshot`]s.

use std::sync::Arc;

use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use colloquy_wire::{ClientFrame, Feedback, ServerFrame};

use crate::config::ClientConfig;
use crate::metrics::{ClientMetrics, MetricsSnapshot};
use crate::session::{ConnectionState, Session, SessionSnapshot};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Commands accepted by the actor. Caller operations carry a responder
/// for errors surfaced at dispatch; socket-originated variants are fed by
/// the reader task.
enum Command {
    Connect,
    Disconnect,
    Shutdown,
    SetDraft(String),
    SubmitPrompt(String),
    SelectConversation(String),
    StartNewConversation,
    RequestNewConversation,
    DeleteConversation(String),
    RenameConversation { id: String, title: String },
    Replay,
    SendFeedback(Feedback),
    RequestHistory { limit: u32, offset: u32 },
    RequestConversation(String),
    SetProvider(String),
    SetModel(Option<String>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Inbound(String),
    SocketError(String),
    SocketClosed,
}

/// Notifications emitted as the session changes. Lossy by design: a slow
/// subscriber misses events rather than stalling the actor, and can
/// resynchronize from a snapshot.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connection(ConnectionState),
    AssistantStarted,
    Delta(String),
    TurnCompleted { server_id: Option<i64> },
    StreamError(String),
    ProvidersUpdated,
    ModelsUpdated,
    HistoryUpdated,
    ConversationLoaded,
    ConversationCreated(String),
    ConversationDeleted(String),
    TitleChanged { id: String, title: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client actor is gone")]
    Gone,
}

/// The actor task. Owns the session, the write half of the socket, and
/// the reader task handle.
struct ClientActor {
    session: Session,
    receiver: mpsc::Receiver<Command>,
    /// Cloned into the reader task so socket traffic joins the queue.
    self_sender: mpsc::Sender<Command>,
    events: broadcast::Sender<ClientEvent>,
    writer: Option<WsSink>,
    reader: Option<JoinHandle<()>>,
    url: String,
    metrics: Arc<ClientMetrics>,
}

/// Cloneable handle to a running [`ClientActor`].
#[derive(Clone)]
pub struct ClientHandle {
    sender: mpsc::Sender<Command>,
    events: broadcast::Sender<ClientEvent>,
    metrics: Arc<ClientMetrics>,
}

pub struct ChatClient;

impl ChatClient {
    /// Spawn the actor and return a handle to it. The connection is not
    /// opened until [`ClientHandle::connect`] is called.
    pub fn spawn(config: &ClientConfig) -> ClientHandle {
        let (sender, receiver) = mpsc::channel(config.command_buffer);
        let (events, _) = broadcast::channel(config.event_buffer);
        let metrics = Arc::new(ClientMetrics::new());

        let actor = ClientActor {
            session: Session::new(
                config.provider.clone(),
                config.model.clone(),
                config.history_limit,
                metrics.clone(),
            ),
            receiver,
            self_sender: sender.clone(),
            events: events.clone(),
            writer: None,
            reader: None,
            url: config.server_url.clone(),
            metrics: metrics.clone(),
        };
        tokio::spawn(actor.run());

        ClientHandle {
            sender,
            events,
            metrics,
        }
    }
}

impl ClientActor {
    async fn run(mut self) {
        while let Some(command) = self.receiver.recv().await {
            if self.handle_command(command).await {
                break;
            }
        }
        self.teardown(true).await;
        debug!("client actor stopped");
    }

    /// Returns true when the actor should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect => self.handle_connect().await,
            Command::Disconnect => self.teardown(true).await,
            Command::Shutdown => return true,
            Command::SetDraft(text) => self.session.set_draft(text),
            Command::SubmitPrompt(text) => {
                let frames = self.session.submit_prompt(&text);
                self.send_frames(frames).await;
            }
            Command::SelectConversation(id) => {
                let frames = self.session.select_conversation(id);
                self.send_frames(frames).await;
            }
            Command::StartNewConversation => self.session.start_new_conversation(),
            Command::RequestNewConversation => {
                let frames = self.session.request_new_conversation();
                self.send_frames(frames).await;
            }
            Command::DeleteConversation(id) => {
                let frames = self.session.delete_conversation(id);
                self.send_frames(frames).await;
            }
            Command::RenameConversation { id, title } => {
                let frames = self.session.rename_conversation(id, title);
                self.send_frames(frames).await;
            }
            Command::Replay => {
                let frames = self.session.replay();
                self.send_frames(frames).await;
            }
            Command::SendFeedback(feedback) => {
                let frames = self.session.send_feedback(feedback);
                self.send_frames(frames).await;
            }
            Command::RequestHistory { limit, offset } => {
                let frames = self.session.request_history(limit, offset);
                self.send_frames(frames).await;
            }
            Command::RequestConversation(id) => {
                let frames = self.session.request_conversation(id);
                self.send_frames(frames).await;
            }
            Command::SetProvider(provider) => {
                let frames = self.session.set_provider(provider);
                self.send_frames(frames).await;
            }
            Command::SetModel(model) => self.session.set_model(model),
            Command::Snapshot(respond_to) => {
                let _ = respond_to.send(self.session.snapshot());
            }
            Command::Inbound(raw) => self.handle_inbound(&raw).await,
            Command::SocketError(message) => {
                warn!(%message, "socket error");
                self.session.transport_error(message);
                self.teardown(false).await;
            }
            Command::SocketClosed => {
                info!("server closed the connection");
                self.teardown(false).await;
            }
        }
        false
    }

    async fn handle_connect(&mut self) {
        if self.writer.is_some() || self.session.connection() != ConnectionState::Idle {
            debug!("connect ignored; already connected or connecting");
            return;
        }
        self.session.connection_opening();
        self.emit(ClientEvent::Connection(ConnectionState::Connecting));

        match connect_async(self.url.as_str()).await {
            Ok((socket, _response)) => {
                info!(url = %self.url, "connected");
                let (sink, stream) = socket.split();
                self.writer = Some(sink);
                self.reader = Some(spawn_reader(stream, self.self_sender.clone()));

                let frames = self.session.connection_opened();
                self.emit(ClientEvent::Connection(ConnectionState::Open));
                self.send_frames(frames).await;
            }
            Err(err) => {
                error!(url = %self.url, %err, "connect failed");
                self.session.transport_error(err.to_string());
                self.session.connection_closed();
                self.emit(ClientEvent::Connection(ConnectionState::Idle));
            }
        }
    }

    /// Drop the socket and reset the connection state. `graceful` sends a
    /// close frame first; a dead socket skips it.
    async fn teardown(&mut self, graceful: bool) {
        if let Some(mut writer) = self.writer.take() {
            if graceful {
                let _ = writer.send(Message::Close(None)).await;
            }
            let _ = writer.close().await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if self.session.connection() != ConnectionState::Idle {
            self.session.connection_closed();
            self.emit(ClientEvent::Connection(ConnectionState::Idle));
        }
    }

    async fn handle_inbound(&mut self, raw: &str) {
        let Some(frame) = self.session.parse_frame(raw) else {
            return;
        };
        let event = event_for(&frame);
        let replies = self.session.handle_frame(frame);
        if let Some(event) = event {
            self.emit(event);
        }
        self.send_frames(replies).await;
    }

    async fn send_frames(&mut self, frames: Vec<ClientFrame>) {
        for frame in frames {
            let Some(writer) = self.writer.as_mut() else {
                // The session guards sends, but the socket can die between
                // the guard and the write.
                self.metrics.send_suppressed();
                debug!("frame dropped; no open socket");
                return;
            };
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(err) => {
                    error!(%err, "frame serialization failed");
                    continue;
                }
            };
            if let Err(err) = writer.send(Message::text(text)).await {
                warn!(%err, "socket write failed");
                self.session.transport_error(err.to_string());
                self.teardown(false).await;
                return;
            }
            self.metrics.frame_sent();
        }
    }

    fn emit(&self, event: ClientEvent) {
        // Err means no subscribers, which is fine.
        let _ = self.events.send(event);
    }
}

/// Map an inbound frame to the event subscribers should see. `None` for
/// frames that change nothing consumers watch.
fn event_for(frame: &ServerFrame) -> Option<ClientEvent> {
    match frame {
        ServerFrame::Info { .. } => None,
        ServerFrame::Providers { .. } => Some(ClientEvent::ProvidersUpdated),
        ServerFrame::Models { .. } => Some(ClientEvent::ModelsUpdated),
        ServerFrame::Start { .. } => Some(ClientEvent::AssistantStarted),
        ServerFrame::Delta { data } => Some(ClientEvent::Delta(data.clone())),
        ServerFrame::Done { message_id } => Some(ClientEvent::TurnCompleted {
            server_id: message_id
                .as_ref()
                .and_then(colloquy_wire::message_id_as_i64),
        }),
        ServerFrame::Error { error } => Some(ClientEvent::StreamError(
            error.clone().unwrap_or_else(|| "server error".to_string()),
        )),
        ServerFrame::ConversationDeleted { id } => {
            Some(ClientEvent::ConversationDeleted(id.clone()))
        }
        ServerFrame::History { .. } => Some(ClientEvent::HistoryUpdated),
        ServerFrame::Conversation { .. } => Some(ClientEvent::ConversationLoaded),
        ServerFrame::ConversationTitle { id, title } => Some(ClientEvent::TitleChanged {
            id: id.clone(),
            title: title.clone(),
        }),
        ServerFrame::ConversationCreated { id, .. } => {
            Some(ClientEvent::ConversationCreated(id.clone()))
        }
    }
}

/// Forward inbound socket traffic into the actor's queue. Text frames
/// become `Inbound`; anything terminal reports and ends the task.
fn spawn_reader(
    mut stream: futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    sender: mpsc::Sender<Command>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if sender.send(Command::Inbound(text.to_string())).await.is_err() {
                        return;
                    }
                }
                Ok(Message::Close(_)) => break,
                // Ping/pong handled by tungstenite; binary is not part of
                // this protocol.
                Ok(_) => {}
                Err(err) => {
                    let _ = sender.send(Command::SocketError(err.to_string())).await;
                    return;
                }
            }
        }
        let _ = sender.send(Command::SocketClosed).await;
    })
}

impl ClientHandle {
    async fn dispatch(&self, command: Command) -> Result<(), ClientError> {
        self.sender.send(command).await.map_err(|_| ClientError::Gone)
    }

    /// Open the WebSocket connection. Idempotent while a connection is
    /// live or being established.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.dispatch(Command::Connect).await
    }

    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.dispatch(Command::Disconnect).await
    }

    /// Stop the actor. Outstanding handles error with [`ClientError::Gone`]
    /// afterwards.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.dispatch(Command::Shutdown).await
    }

    pub async fn set_draft(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.dispatch(Command::SetDraft(text.into())).await
    }

    pub async fn submit_prompt(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.dispatch(Command::SubmitPrompt(text.into())).await
    }

    pub async fn select_conversation(&self, id: impl Into<String>) -> Result<(), ClientError> {
        self.dispatch(Command::SelectConversation(id.into())).await
    }

    pub async fn start_new_conversation(&self) -> Result<(), ClientError> {
        self.dispatch(Command::StartNewConversation).await
    }

    pub async fn request_new_conversation(&self) -> Result<(), ClientError> {
        self.dispatch(Command::RequestNewConversation).await
    }

    pub async fn delete_conversation(&self, id: impl Into<String>) -> Result<(), ClientError> {
        self.dispatch(Command::DeleteConversation(id.into())).await
    }

    pub async fn rename_conversation(
        &self,
        id: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.dispatch(Command::RenameConversation {
            id: id.into(),
            title: title.into(),
        })
        .await
    }

    /// Resubmit the current conversation's prompts into a fresh one.
    pub async fn replay(&self) -> Result<(), ClientError> {
        self.dispatch(Command::Replay).await
    }

    pub async fn send_feedback(&self, feedback: Feedback) -> Result<(), ClientError> {
        self.dispatch(Command::SendFeedback(feedback)).await
    }

    pub async fn request_history(&self, limit: u32, offset: u32) -> Result<(), ClientError> {
        self.dispatch(Command::RequestHistory { limit, offset }).await
    }

    pub async fn request_conversation(&self, id: impl Into<String>) -> Result<(), ClientError> {
        self.dispatch(Command::RequestConversation(id.into())).await
    }

    pub async fn set_provider(&self, provider: impl Into<String>) -> Result<(), ClientError> {
        self.dispatch(Command::SetProvider(provider.into())).await
    }

    pub async fn set_model(&self, model: Option<String>) -> Result<(), ClientError> {
        self.dispatch(Command::SetModel(model)).await
    }

    /// Fetch a point-in-time copy of the session state.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| ClientError::Gone)
    }

    /// Subscribe to session events. Each subscriber gets events from the
    /// moment of subscription onward.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

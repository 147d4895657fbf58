//! Protocol state machine for one chat session.
//!
//! ## Signal flow
//!
//! The session is synchronous and owns no I/O. Operations (submit a
//! prompt, select a conversation, replay) and parsed server frames go in;
//! the [`ClientFrame`]s to transmit come out. The connection actor in
//! `client.rs` is the only caller, so every mutation happens on one task.
//!
//! ## Turn discipline
//!
//! At most one assistant turn is active at a time: `start` allocates the
//! active message, `delta` appends to it, `done`/`error` finalize it. A
//! `start` that arrives while a turn is still active force-finalizes the
//! previous turn (its partial content is preserved) rather than letting
//! two messages grow concurrently.
//!
//! ## Conversation creation
//!
//! A prompt submitted with no current conversation is held as the pending
//! prompt while a `new_chat` round-trip is in flight; `conversation_created`
//! flushes it against the confirmed id. At most one prompt is ever pending.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use colloquy_wire::{
    ClientFrame, ConversationSummary, Feedback, Role, ServerFrame, SnapshotMessage,
    message_id_as_i64,
};

use crate::metrics::ClientMetrics;

/// Connection lifecycle. Close and error both reset to `Idle`; there is
/// no automatic reconnect, so a closed connection and a never-opened one
/// are the same state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
}

/// One message in the local conversation view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    /// Process-unique local id, assigned at creation.
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Backend id, attached once the server confirms persistence.
    pub server_id: Option<i64>,
}

impl ChatMessage {
    fn local(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            server_id: None,
        }
    }
}

/// Read-only view of the session for consumers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub draft: String,
    pub provider: String,
    pub model: Option<String>,
    pub providers: Vec<String>,
    pub models: Vec<String>,
    pub messages: Vec<ChatMessage>,
    pub streaming: bool,
    pub error: Option<String>,
    pub history: Vec<ConversationSummary>,
    pub history_loaded: bool,
    pub current_conversation: Option<String>,
    pub pending_prompt: Option<String>,
    pub replay_remaining: usize,
}

pub struct Session {
    connection: ConnectionState,
    draft: String,
    provider: String,
    model: Option<String>,
    providers: Vec<String>,
    models: Vec<String>,
    messages: Vec<ChatMessage>,
    /// Local id of the message the active turn is streaming into.
    /// Invariant: `streaming` is true iff this is `Some`.
    current_assistant: Option<String>,
    streaming: bool,
    error: Option<String>,
    history: Vec<ConversationSummary>,
    history_loaded: bool,
    current_conversation: Option<String>,
    pending_prompt: Option<String>,
    replay_queue: VecDeque<String>,
    history_limit: u32,
    metrics: Arc<ClientMetrics>,
}

impl Session {
    pub fn new(
        provider: String,
        model: Option<String>,
        history_limit: u32,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        Self {
            connection: ConnectionState::Idle,
            draft: String::new(),
            provider,
            model,
            providers: Vec::new(),
            models: Vec::new(),
            messages: Vec::new(),
            current_assistant: None,
            streaming: false,
            error: None,
            history: Vec::new(),
            history_loaded: false,
            current_conversation: None,
            pending_prompt: None,
            replay_queue: VecDeque::new(),
            history_limit,
            metrics,
        }
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection: self.connection,
            draft: self.draft.clone(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            providers: self.providers.clone(),
            models: self.models.clone(),
            messages: self.messages.clone(),
            streaming: self.streaming,
            error: self.error.clone(),
            history: self.history.clone(),
            history_loaded: self.history_loaded,
            current_conversation: self.current_conversation.clone(),
            pending_prompt: self.pending_prompt.clone(),
            replay_remaining: self.replay_queue.len(),
        }
    }

    // -------------------------------------------------------------------
    // Connection lifecycle (driven by the actor)
    // -------------------------------------------------------------------

    pub fn connection_opening(&mut self) {
        self.connection = ConnectionState::Connecting;
    }

    /// The socket is open: request the provider list and a first history
    /// page, then flush a staged draft if one exists.
    pub fn connection_opened(&mut self) -> Vec<ClientFrame> {
        self.connection = ConnectionState::Open;
        let mut out = vec![
            ClientFrame::Providers,
            ClientFrame::History {
                limit: self.history_limit,
                offset: 0,
            },
        ];
        if !self.draft.trim().is_empty() {
            let staged = std::mem::take(&mut self.draft);
            out.extend(self.submit_prompt(&staged));
        }
        out
    }

    /// Socket closed or errored: reset to idle and force any in-flight
    /// turn to a terminal state. The pending prompt is deliberately left
    /// in place; the server may still confirm creation after a reconnect.
    pub fn connection_closed(&mut self) {
        self.connection = ConnectionState::Idle;
        self.streaming = false;
        self.current_assistant = None;
    }

    /// Transport fault: record it for consumers; the actor follows up
    /// with `connection_closed`.
    pub fn transport_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    // -------------------------------------------------------------------
    // Orchestrator operations
    // -------------------------------------------------------------------

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Submit one prompt.
    ///
    /// Empty prompts and prompts submitted mid-turn are ignored. While
    /// disconnected the text is staged as the draft (the next successful
    /// connect flushes it) and nothing is emitted. With no current
    /// conversation the prompt is held pending and a `new_chat` goes out;
    /// otherwise a `prompt` frame is emitted directly.
    pub fn submit_prompt(&mut self, text: &str) -> Vec<ClientFrame> {
        let text = text.trim();
        if text.is_empty() {
            self.metrics.operation_rejected();
            return Vec::new();
        }
        if self.streaming {
            self.metrics.operation_rejected();
            debug!("prompt ignored while a turn is streaming");
            return Vec::new();
        }
        if self.connection != ConnectionState::Open {
            self.draft = text.to_string();
            self.metrics.send_suppressed();
            debug!("not connected; prompt staged as draft");
            return Vec::new();
        }

        self.draft.clear();
        self.messages.push(ChatMessage::local(Role::User, text));
        match self.current_conversation.clone() {
            Some(conversation_id) => vec![ClientFrame::Prompt {
                prompt: text.to_string(),
                provider: self.provider.clone(),
                model: self.model.clone(),
                conversation_id,
            }],
            None => {
                self.pending_prompt = Some(text.to_string());
                vec![ClientFrame::NewChat {
                    provider: self.provider.clone(),
                    model: self.model.clone(),
                }]
            }
        }
    }

    /// Select a conversation and request its message snapshot. Abandons
    /// any replay in progress: queued prompts belong to the replay's own
    /// conversation and must never leak into the selected one.
    pub fn select_conversation(&mut self, id: impl Into<String>) -> Vec<ClientFrame> {
        let id = id.into();
        self.replay_queue.clear();
        self.current_conversation = Some(id.clone());
        self.guarded(vec![ClientFrame::Conversation { id }])
    }

    /// Clear the local view; the next prompt creates a conversation
    /// lazily. Abandons any replay in progress. The draft survives.
    pub fn start_new_conversation(&mut self) {
        self.messages.clear();
        self.error = None;
        self.streaming = false;
        self.current_assistant = None;
        self.current_conversation = None;
        self.replay_queue.clear();
    }

    /// Eagerly ask the server for a fresh conversation (no prompt held).
    pub fn request_new_conversation(&mut self) -> Vec<ClientFrame> {
        self.guarded(vec![ClientFrame::NewChat {
            provider: self.provider.clone(),
            model: self.model.clone(),
        }])
    }

    pub fn delete_conversation(&mut self, id: impl Into<String>) -> Vec<ClientFrame> {
        self.guarded(vec![ClientFrame::DeleteConversation { id: id.into() }])
    }

    /// Request a rename. The local summary is only updated when the
    /// server confirms with `conversation_title`.
    pub fn rename_conversation(
        &mut self,
        id: impl Into<String>,
        title: impl Into<String>,
    ) -> Vec<ClientFrame> {
        self.guarded(vec![ClientFrame::RenameConversation {
            id: id.into(),
            title: title.into(),
        }])
    }

    pub fn request_history(&mut self, limit: u32, offset: u32) -> Vec<ClientFrame> {
        self.guarded(vec![ClientFrame::History { limit, offset }])
    }

    pub fn request_conversation(&mut self, id: impl Into<String>) -> Vec<ClientFrame> {
        self.guarded(vec![ClientFrame::Conversation { id: id.into() }])
    }

    pub fn send_feedback(&mut self, feedback: Feedback) -> Vec<ClientFrame> {
        if !(-1..=1).contains(&feedback.vote) {
            self.metrics.operation_rejected();
            warn!(vote = feedback.vote, "feedback vote outside -1..=1 dropped");
            return Vec::new();
        }
        self.guarded(vec![ClientFrame::Rate {
            message_id: feedback.message_id,
            vote: feedback.vote,
            score: feedback.score,
            label: feedback.label,
            comment: feedback.comment,
        }])
    }

    /// Switch provider and ask for its model list. The model selection is
    /// cleared; the `models` response picks the first entry.
    pub fn set_provider(&mut self, provider: impl Into<String>) -> Vec<ClientFrame> {
        self.provider = provider.into();
        self.model = None;
        self.models.clear();
        self.guarded(vec![ClientFrame::Models {
            provider: self.provider.clone(),
        }])
    }

    pub fn set_model(&mut self, model: Option<String>) {
        self.model = model;
    }

    // -------------------------------------------------------------------
    // Replay driver
    // -------------------------------------------------------------------

    /// Resubmit the current conversation's user prompts, in order, into a
    /// fresh conversation: the first goes through the normal creation
    /// path, the rest queue up and are released one per completed turn.
    pub fn replay(&mut self) -> Vec<ClientFrame> {
        if self.connection != ConnectionState::Open {
            self.metrics.operation_rejected();
            debug!("replay ignored while not connected");
            return Vec::new();
        }
        let mut prompts: VecDeque<String> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .collect();
        let Some(first) = prompts.pop_front() else {
            debug!("replay ignored; no user prompts to resubmit");
            return Vec::new();
        };
        self.start_new_conversation();
        self.replay_queue = prompts;
        self.metrics.replay_started();
        self.submit_prompt(&first)
    }

    /// Release the next queued replay prompt, if any. Called only when a
    /// real turn completes.
    fn advance_replay(&mut self) -> Vec<ClientFrame> {
        let Some(next) = self.replay_queue.pop_front() else {
            return Vec::new();
        };
        debug!(remaining = self.replay_queue.len(), "replay advancing");
        self.submit_prompt(&next)
    }

    // -------------------------------------------------------------------
    // Inbound frame router
    // -------------------------------------------------------------------

    /// Parse one raw text frame. Malformed frames and unknown `type`
    /// discriminants are dropped and counted; the wire is allowed to be
    /// noisy and to grow new frame types.
    pub fn parse_frame(&self, raw: &str) -> Option<ServerFrame> {
        self.metrics.frame_received();
        match serde_json::from_str::<ServerFrame>(raw) {
            Ok(frame) => Some(frame),
            Err(err) => {
                self.metrics.frame_rejected();
                debug!(%err, "dropping unrecognized frame");
                None
            }
        }
    }

    pub fn handle_text(&mut self, raw: &str) -> Vec<ClientFrame> {
        match self.parse_frame(raw) {
            Some(frame) => self.handle_frame(frame),
            None => Vec::new(),
        }
    }

    pub fn handle_frame(&mut self, frame: ServerFrame) -> Vec<ClientFrame> {
        match frame {
            ServerFrame::Info { .. } => Vec::new(),
            ServerFrame::Providers { providers } => self.on_providers(providers),
            ServerFrame::Models { models, .. } => {
                self.models = models;
                if self.model.is_none() {
                    self.model = self.models.first().cloned();
                }
                Vec::new()
            }
            ServerFrame::Start { .. } => {
                self.on_start();
                Vec::new()
            }
            ServerFrame::Delta { data } => {
                self.on_delta(&data);
                Vec::new()
            }
            ServerFrame::Done { message_id } => self.on_done(message_id),
            ServerFrame::Error { error } => self.on_error(error),
            ServerFrame::ConversationDeleted { id } => {
                self.on_deleted(&id);
                Vec::new()
            }
            ServerFrame::History { items } => {
                // Wholesale replacement keeps reapplication idempotent.
                self.history = items;
                self.history_loaded = true;
                Vec::new()
            }
            ServerFrame::Conversation { messages, .. } => {
                self.on_conversation_snapshot(messages);
                Vec::new()
            }
            ServerFrame::ConversationTitle { id, title } => self.on_title(&id, title),
            ServerFrame::ConversationCreated { id, .. } => self.on_created(id),
        }
    }

    fn on_providers(&mut self, providers: Vec<String>) -> Vec<ClientFrame> {
        self.providers = providers;
        if !self.providers.is_empty() && !self.providers.contains(&self.provider) {
            let adopted = self.providers[0].clone();
            debug!(provider = %adopted, "selected provider not offered; adopting first");
            return self.set_provider(adopted);
        }
        Vec::new()
    }

    fn on_start(&mut self) {
        if self.current_assistant.is_some() {
            // The server began a new turn before closing the previous
            // one. Finalize the old message in place; its partial content
            // stays, and only the new message grows from here.
            self.metrics.stray_stream_event();
            warn!("start received while a turn was active; finalizing previous turn");
        }
        let message = ChatMessage::local(Role::Assistant, "");
        self.current_assistant = Some(message.id.clone());
        self.messages.push(message);
        self.streaming = true;
    }

    fn on_delta(&mut self, data: &str) {
        match self.active_message_mut() {
            Some(message) => message.content.push_str(data),
            None => {
                self.metrics.stray_stream_event();
                debug!("delta with no active turn dropped");
            }
        }
    }

    fn on_done(&mut self, message_id: Option<Value>) -> Vec<ClientFrame> {
        let had_turn = self.current_assistant.is_some();
        let server_id = message_id.as_ref().and_then(message_id_as_i64);
        match self.active_message_mut() {
            Some(message) => message.server_id = server_id,
            None => self.metrics.stray_stream_event(),
        }
        self.current_assistant = None;
        self.streaming = false;
        if had_turn {
            self.metrics.turn_completed();
            self.advance_replay()
        } else {
            Vec::new()
        }
    }

    fn on_error(&mut self, error: Option<String>) -> Vec<ClientFrame> {
        let had_turn = self.current_assistant.is_some();
        self.error = Some(error.unwrap_or_else(|| "server error".to_string()));
        // Partial content already streamed stays in the message.
        self.current_assistant = None;
        self.streaming = false;
        if had_turn {
            self.metrics.turn_completed();
            self.advance_replay()
        } else {
            Vec::new()
        }
    }

    fn on_deleted(&mut self, id: &str) {
        self.history.retain(|h| h.id != id);
        if self.current_conversation.as_deref() == Some(id) {
            self.start_new_conversation();
        }
    }

    fn on_conversation_snapshot(&mut self, messages: Vec<SnapshotMessage>) {
        // Adopt provider/model from the last snapshot message carrying
        // them, so follow-up prompts continue the conversation's setup.
        if let Some(last) = messages
            .iter()
            .rev()
            .find(|m| m.provider.is_some() || m.model.is_some())
        {
            if let Some(provider) = &last.provider {
                self.provider = provider.clone();
            }
            if let Some(model) = &last.model {
                self.model = Some(model.clone());
            }
        }
        // A snapshot replaces the view wholesale; any in-flight turn is
        // reset defensively.
        self.current_assistant = None;
        self.streaming = false;
        self.messages = messages
            .into_iter()
            .map(|m| ChatMessage {
                id: m.id.to_string(),
                role: m.role,
                content: m.content,
                server_id: Some(m.id),
            })
            .collect();
    }

    fn on_title(&mut self, id: &str, title: String) -> Vec<ClientFrame> {
        if let Some(item) = self.history.iter_mut().find(|h| h.id == id) {
            item.title = title;
        }
        // Ordering and updated_at may have changed server-side; refresh.
        self.guarded(vec![ClientFrame::History {
            limit: self.history_limit,
            offset: 0,
        }])
    }

    fn on_created(&mut self, id: String) -> Vec<ClientFrame> {
        self.current_conversation = Some(id.clone());
        let mut out = Vec::new();
        if let Some(pending) = self.pending_prompt.take() {
            out.push(ClientFrame::Prompt {
                prompt: pending,
                provider: self.provider.clone(),
                model: self.model.clone(),
                conversation_id: id.clone(),
            });
        }
        // Keep secondary views consistent with the new conversation.
        out.push(ClientFrame::Conversation { id });
        out.push(ClientFrame::History {
            limit: self.history_limit,
            offset: 0,
        });
        self.guarded(out)
    }

    // -------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------

    fn active_message_mut(&mut self) -> Option<&mut ChatMessage> {
        let id = self.current_assistant.as_deref()?;
        let idx = self.messages.iter().position(|m| m.id == id)?;
        self.messages.get_mut(idx)
    }

    /// Best-effort send guard: frames go out only while the connection is
    /// open. Anything else is discarded and counted, never queued.
    fn guarded(&self, frames: Vec<ClientFrame>) -> Vec<ClientFrame> {
        if self.connection == ConnectionState::Open {
            frames
        } else {
            for _ in &frames {
                self.metrics.send_suppressed();
            }
            debug!(count = frames.len(), "frames discarded; connection not open");
            Vec::new()
        }
    }
}

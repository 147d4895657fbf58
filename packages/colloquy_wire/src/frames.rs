use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ConversationSummary, SnapshotMessage};

/// Frames sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Ask for the list of available providers.
    Providers,
    /// Ask for the models offered by one provider.
    Models { provider: String },
    /// Create a new conversation with the given defaults.
    NewChat {
        provider: String,
        model: Option<String>,
    },
    /// Submit one user prompt into an existing conversation.
    Prompt {
        prompt: String,
        provider: String,
        model: Option<String>,
        conversation_id: String,
    },
    /// Page through the conversation list.
    History { limit: u32, offset: u32 },
    /// Fetch the full message snapshot of one conversation.
    Conversation { id: String },
    DeleteConversation { id: String },
    RenameConversation { id: String, title: String },
    /// Rate a persisted message; vote is -1, 0, or 1.
    Rate {
        message_id: i64,
        vote: i8,
        #[serde(skip_serializing_if = "Option::is_none")]
        score: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
}

/// Frames received from the server.
///
/// Parsing is tolerant where the backend is loose: `done.message_id`
/// arrives as an integer or a numeric string (see [`message_id_as_i64`]),
/// `error.error` may be absent, and unknown fields are ignored. A frame
/// with an unknown `type` fails to parse and is dropped by the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Info { message: Option<String> },
    Providers { providers: Vec<String> },
    Models {
        models: Vec<String>,
        provider: Option<String>,
    },
    /// An assistant turn has begun.
    Start {
        provider: Option<String>,
        model: Option<String>,
    },
    /// One streamed chunk of the active assistant turn.
    Delta { data: String },
    /// The active turn finished; `message_id` is the persisted id.
    Done { message_id: Option<Value> },
    /// The active turn (or a request) failed.
    Error { error: Option<String> },
    ConversationDeleted { id: String },
    History { items: Vec<ConversationSummary> },
    Conversation {
        id: Option<String>,
        messages: Vec<SnapshotMessage>,
    },
    ConversationTitle { id: String, title: String },
    ConversationCreated {
        id: String,
        provider: Option<String>,
        title: Option<String>,
    },
}

/// Extract a server message id from the lenient `done.message_id` value:
/// accepts an integer or a string holding one.
pub fn message_id_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

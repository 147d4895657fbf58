use serde::{Deserialize, Serialize};

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry in the server's conversation list.
///
/// Summaries are only ever produced by the server (`history` snapshots);
/// the client mutates titles in place on `conversation_title` events and
/// removes entries on `conversation_deleted`, but never fabricates one.
/// Timestamps are carried verbatim as ISO-8601 text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub started_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub default_provider: String,
    pub default_model: Option<String>,
    #[serde(default)]
    pub message_count: u64,
    pub last_message_preview: Option<String>,
}

/// One persisted message inside a `conversation` snapshot.
///
/// The `id` is the backend's database id; the client adopts it as the
/// server id when replacing its local message list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMessage {
    pub id: i64,
    pub role: Role,
    pub content: String,
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// A rating for a persisted assistant message.
///
/// `vote` is -1 (down), 0 (retract a previous vote), or 1 (up). The
/// optional fields refine an up/down vote; the server models no
/// acknowledgment, so neither does the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub message_id: i64,
    pub vote: i8,
    pub score: Option<u8>,
    pub label: Option<String>,
    pub comment: Option<String>,
}

impl Feedback {
    /// A bare vote with no score/label/comment.
    pub fn vote(message_id: i64, vote: i8) -> Self {
        Self {
            message_id,
            vote,
            score: None,
            label: None,
            comment: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serde_is_lowercase() {
        assert_eq!(serde_json::to_value(Role::User).unwrap(), "user");
        assert_eq!(serde_json::to_value(Role::Assistant).unwrap(), "assistant");
        let r: Role = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(r, Role::System);
    }

    #[test]
    fn summary_parses_backend_shape() {
        // The backend also embeds a full `messages` array in each history
        // item; unknown fields must be ignored.
        let json = serde_json::json!({
            "id": "c1",
            "title": "Rust questions",
            "started_at": "2026-01-02T03:04:05",
            "updated_at": "2026-01-02T03:10:00",
            "default_provider": "openai",
            "default_model": null,
            "message_count": 4,
            "last_message_preview": "Sure, here's how...",
            "messages": [{"id": 1, "role": "user", "content": "hi"}],
        });
        let item: ConversationSummary = serde_json::from_value(json).unwrap();
        assert_eq!(item.id, "c1");
        assert_eq!(item.title, "Rust questions");
        assert_eq!(item.message_count, 4);
        assert_eq!(item.default_model, None);
        assert_eq!(item.last_message_preview.as_deref(), Some("Sure, here's how..."));
    }

    #[test]
    fn snapshot_message_optional_provider() {
        let json = serde_json::json!({"id": 7, "role": "assistant", "content": "hello"});
        let m: SnapshotMessage = serde_json::from_value(json).unwrap();
        assert_eq!(m.id, 7);
        assert_eq!(m.role, Role::Assistant);
        assert!(m.provider.is_none());
    }
}

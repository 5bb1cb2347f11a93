use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Who produced a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// A human-authored turn.
    User,
    /// An assistant-authored turn.
    Assistant,
}

/// Lifecycle state of an assistant [`Message`] as it streams in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Still streaming.
    Pending,
    /// Completed successfully.
    Success,
    /// Terminated with an error.
    Failed,
}

/// One lifecycle transition recorded against a [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StatusTrace {
    /// The status reached at this point.
    pub status: MessageStatus,
    /// When this transition occurred.
    pub at: DateTime<Utc>,
    /// Optional human-readable detail (e.g. an error message).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Optional metadata attached to an assistant [`Message`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MessageMetadata {
    /// Model identifier that produced this message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Prompt token count, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    /// Completion token count, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    /// End-to-end latency in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// A single turn in a conversation's chat transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Message {
    /// Unique message identifier.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Owning conversation.
    pub conversation_id: String,
    /// Who authored this message.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// For an assistant message, the id of the user message it answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_message_id: Option<String>,
    /// Message text.
    pub content: String,
    /// Delivery status; only meaningful for assistant messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    /// Optional generation metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    /// Ordered lifecycle transitions.
    #[serde(default)]
    pub status_traces: Vec<StatusTrace>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A compact chat-history entry as carried by [`crate::SessionData`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChatHistoryEntry {
    /// `"user"` or `"assistant"`.
    pub role: String,
    /// Message text.
    pub content: String,
    /// When this turn occurred.
    pub timestamp: DateTime<Utc>,
}

impl ChatHistoryEntry {
    /// Construct a user-authored entry stamped at `timestamp`.
    #[must_use]
    pub fn user(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            timestamp,
        }
    }

    /// Construct an assistant-authored entry stamped at `timestamp`.
    #[must_use]
    pub fn assistant(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            timestamp,
        }
    }
}

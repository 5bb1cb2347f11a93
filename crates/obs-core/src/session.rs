use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::message::ChatHistoryEntry;
use crate::{DEFAULT_CHAT_HISTORY_COUNT, DEFAULT_SESSION_TTL_SECS};

/// Per-conversation agent configuration cached alongside chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SessionConfig {
    /// Agent/backend kind this session is bound to (e.g. `"responses"`, `"workflow"`).
    pub agent_kind: String,
    /// Maximum number of chat-history entries retained; defaults to 30.
    #[serde(default = "default_chat_history_count")]
    pub chat_history_count: usize,
    /// Opaque backend-specific configuration (endpoint, model, etc.).
    #[serde(default)]
    pub backend_config: std::collections::BTreeMap<String, serde_json::Value>,
}

fn default_chat_history_count() -> usize {
    DEFAULT_CHAT_HISTORY_COUNT
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            agent_kind: String::new(),
            chat_history_count: DEFAULT_CHAT_HISTORY_COUNT,
            backend_config: std::collections::BTreeMap::new(),
        }
    }
}

/// Cached per-conversation agent session: config, a bounded chat-history
/// window, and the identity triple that scopes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SessionData {
    /// Cached agent configuration.
    pub config: SessionConfig,
    /// Chat-history window, oldest first, capped at `config.chat_history_count`.
    #[serde(default)]
    pub chat_history: Vec<ChatHistoryEntry>,
    /// Owning tenant.
    pub tenant_id: String,
    /// Owning user.
    pub user_id: String,
    /// Owning conversation.
    pub conversation_id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl SessionData {
    /// Cache key for this session: `session:<tenant>:<user>:<conversation>`.
    #[must_use]
    pub fn cache_key(tenant_id: &str, user_id: &str, conversation_id: &str) -> String {
        format!("session:{tenant_id}:{user_id}:{conversation_id}")
    }

    /// This session's own cache key.
    #[must_use]
    pub fn key(&self) -> String {
        Self::cache_key(&self.tenant_id, &self.user_id, &self.conversation_id)
    }

    /// Append `entries` to the chat history and trim from the front so the
    /// window never exceeds `config.chat_history_count`.
    pub fn push_chat_history(&mut self, entries: impl IntoIterator<Item = ChatHistoryEntry>) {
        self.chat_history.extend(entries);
        let cap = self.config.chat_history_count;
        if self.chat_history.len() > cap {
            let excess = self.chat_history.len() - cap;
            self.chat_history.drain(0..excess);
        }
    }

    /// Default TTL, in seconds, new sessions should be stored with.
    #[must_use]
    pub fn default_ttl_secs() -> u64 {
        DEFAULT_SESSION_TTL_SECS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_cap(cap: usize) -> SessionData {
        let now = Utc::now();
        SessionData {
            config: SessionConfig {
                agent_kind: "responses".to_string(),
                chat_history_count: cap,
                backend_config: Default::default(),
            },
            chat_history: vec![],
            tenant_id: "t1".to_string(),
            user_id: "u1".to_string(),
            conversation_id: "c1".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn cache_key_has_expected_format() {
        assert_eq!(
            SessionData::cache_key("t1", "u1", "c1"),
            "session:t1:u1:c1"
        );
    }

    #[test]
    fn key_matches_cache_key_of_own_fields() {
        let session = session_with_cap(30);
        assert_eq!(session.key(), "session:t1:u1:c1");
    }

    #[test]
    fn push_chat_history_trims_from_front_when_over_cap() {
        let mut session = session_with_cap(2);
        let t = Utc::now();
        session.push_chat_history(vec![
            ChatHistoryEntry::user("one", t),
            ChatHistoryEntry::assistant("two", t),
            ChatHistoryEntry::user("three", t),
        ]);
        assert_eq!(session.chat_history.len(), 2);
        assert_eq!(session.chat_history[0].content, "two");
        assert_eq!(session.chat_history[1].content, "three");
    }

    #[test]
    fn push_chat_history_under_cap_keeps_everything() {
        let mut session = session_with_cap(30);
        session.push_chat_history(vec![ChatHistoryEntry::user("hi", Utc::now())]);
        assert_eq!(session.chat_history.len(), 1);
    }

    #[test]
    fn default_chat_history_count_is_thirty() {
        assert_eq!(SessionConfig::default().chat_history_count, 30);
    }
}

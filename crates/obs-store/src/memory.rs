use std::collections::HashMap;

use async_trait::async_trait;
use obs_core::{Message, Trace, TraceNode};
use obs_error::ObsError;
use tokio::sync::RwLock;

use crate::{ListOpts, MessageStore, TraceStore};

fn apply_opts<T>(mut items: Vec<T>, opts: &ListOpts) -> Vec<T> {
    if opts.offset > 0 {
        if opts.offset >= items.len() {
            return Vec::new();
        }
        items.drain(0..opts.offset);
    }
    if let Some(limit) = opts.limit {
        items.truncate(limit);
    }
    items
}

/// In-memory [`TraceStore`], keyed by `(tenant_id, id)`.
#[derive(Default)]
pub struct InMemoryTraceStore {
    traces: RwLock<HashMap<(String, String), Trace>>,
}

impl InMemoryTraceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TraceStore for InMemoryTraceStore {
    async fn create(&self, trace: Trace) -> Result<Trace, ObsError> {
        let mut guard = self.traces.write().await;
        let key = (trace.tenant_id.clone(), trace.id.clone());
        if guard.contains_key(&key) {
            return Err(ObsError::conflict(format!("trace {} already exists", trace.id)));
        }
        if let Some(reference_id) = &trace.reference_id {
            let taken = guard
                .values()
                .any(|t| t.tenant_id == trace.tenant_id && t.reference_id.as_deref() == Some(reference_id.as_str()));
            if taken {
                return Err(ObsError::conflict(format!("reference id {reference_id} already in use")));
            }
        }
        guard.insert(key, trace.clone());
        Ok(trace)
    }

    async fn get(&self, tenant_id: &str, id: &str) -> Result<Option<Trace>, ObsError> {
        let guard = self.traces.read().await;
        Ok(guard.get(&(tenant_id.to_string(), id.to_string())).cloned())
    }

    async fn get_by_conversation(&self, tenant_id: &str, conversation_id: &str) -> Result<Option<Trace>, ObsError> {
        let guard = self.traces.read().await;
        Ok(guard
            .values()
            .find(|t| t.tenant_id == tenant_id && t.conversation_id.as_deref() == Some(conversation_id))
            .cloned())
    }

    async fn get_by_reference_id(&self, tenant_id: &str, reference_id: &str) -> Result<Option<Trace>, ObsError> {
        let guard = self.traces.read().await;
        Ok(guard
            .values()
            .find(|t| t.tenant_id == tenant_id && t.reference_id.as_deref() == Some(reference_id))
            .cloned())
    }

    async fn list(&self, tenant_id: &str, opts: ListOpts) -> Result<Vec<Trace>, ObsError> {
        let guard = self.traces.read().await;
        let mut items: Vec<Trace> = guard.values().filter(|t| t.tenant_id == tenant_id).cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(apply_opts(items, &opts))
    }

    async fn update(&self, trace: Trace) -> Result<Trace, ObsError> {
        let mut guard = self.traces.write().await;
        let key = (trace.tenant_id.clone(), trace.id.clone());
        if !guard.contains_key(&key) {
            return Err(ObsError::not_found(format!("trace {} not found", trace.id)));
        }
        guard.insert(key, trace.clone());
        Ok(trace)
    }

    async fn add_nodes(&self, tenant_id: &str, id: &str, nodes: Vec<TraceNode>) -> Result<(), ObsError> {
        let mut guard = self.traces.write().await;
        let trace = guard
            .get_mut(&(tenant_id.to_string(), id.to_string()))
            .ok_or_else(|| ObsError::not_found(format!("trace {id} not found")))?;
        trace.nodes.extend(nodes);
        Ok(())
    }

    async fn add_logs(&self, tenant_id: &str, id: &str, logs: Vec<String>) -> Result<(), ObsError> {
        let mut guard = self.traces.write().await;
        let trace = guard
            .get_mut(&(tenant_id.to_string(), id.to_string()))
            .ok_or_else(|| ObsError::not_found(format!("trace {id} not found")))?;
        trace.logs.extend(logs);
        Ok(())
    }

    async fn delete(&self, tenant_id: &str, id: &str) -> Result<(), ObsError> {
        self.traces.write().await.remove(&(tenant_id.to_string(), id.to_string()));
        Ok(())
    }

    async fn delete_by_conversation(&self, tenant_id: &str, conversation_id: &str) -> Result<(), ObsError> {
        self.traces
            .write()
            .await
            .retain(|_, t| !(t.tenant_id == tenant_id && t.conversation_id.as_deref() == Some(conversation_id)));
        Ok(())
    }

    async fn delete_by_autonomous_agent(&self, tenant_id: &str, autonomous_agent_id: &str) -> Result<(), ObsError> {
        self.traces.write().await.retain(|_, t| {
            !(t.tenant_id == tenant_id && t.autonomous_agent_id.as_deref() == Some(autonomous_agent_id))
        });
        Ok(())
    }

    async fn list_by_conversation(&self, tenant_id: &str, conversation_id: &str) -> Result<Vec<Trace>, ObsError> {
        let guard = self.traces.read().await;
        Ok(guard
            .values()
            .filter(|t| t.tenant_id == tenant_id && t.conversation_id.as_deref() == Some(conversation_id))
            .cloned()
            .collect())
    }

    async fn ensure_indexes(&self) -> Result<(), ObsError> {
        Ok(())
    }
}

/// In-memory [`MessageStore`], keyed by `(tenant_id, id)`.
#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<HashMap<(String, String), Message>>,
}

impl InMemoryMessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn add(&self, message: Message) -> Result<Message, ObsError> {
        let mut guard = self.messages.write().await;
        let key = (message.tenant_id.clone(), message.id.clone());
        if guard.contains_key(&key) {
            return Err(ObsError::conflict(format!("message {} already exists", message.id)));
        }
        guard.insert(key, message.clone());
        Ok(message)
    }

    async fn get(&self, tenant_id: &str, id: &str) -> Result<Option<Message>, ObsError> {
        let guard = self.messages.read().await;
        Ok(guard.get(&(tenant_id.to_string(), id.to_string())).cloned())
    }

    async fn get_by_user_message_id(&self, tenant_id: &str, user_message_id: &str) -> Result<Option<Message>, ObsError> {
        let guard = self.messages.read().await;
        Ok(guard
            .values()
            .find(|m| m.tenant_id == tenant_id && m.user_message_id.as_deref() == Some(user_message_id))
            .cloned())
    }

    async fn list(&self, tenant_id: &str, opts: ListOpts) -> Result<Vec<Message>, ObsError> {
        let guard = self.messages.read().await;
        let mut items: Vec<Message> = guard.values().filter(|m| m.tenant_id == tenant_id).cloned().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(apply_opts(items, &opts))
    }

    async fn list_chat_history(&self, tenant_id: &str, conversation_id: &str, opts: ListOpts) -> Result<Vec<Message>, ObsError> {
        let guard = self.messages.read().await;
        let mut items: Vec<Message> = guard
            .values()
            .filter(|m| m.tenant_id == tenant_id && m.conversation_id == conversation_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(apply_opts(items, &opts))
    }

    async fn update(&self, message: Message) -> Result<Message, ObsError> {
        let mut guard = self.messages.write().await;
        let key = (message.tenant_id.clone(), message.id.clone());
        if !guard.contains_key(&key) {
            return Err(ObsError::not_found(format!("message {} not found", message.id)));
        }
        guard.insert(key, message.clone());
        Ok(message)
    }

    async fn delete(&self, tenant_id: &str, conversation_id: &str, opts: ListOpts) -> Result<(), ObsError> {
        let mut guard = self.messages.write().await;
        let to_remove: Vec<(String, String)> = {
            let mut matches: Vec<&Message> = guard
                .values()
                .filter(|m| m.tenant_id == tenant_id && m.conversation_id == conversation_id)
                .collect();
            matches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            apply_opts(matches, &opts)
                .into_iter()
                .map(|m| (m.tenant_id.clone(), m.id.clone()))
                .collect()
        };
        for key in to_remove {
            guard.remove(&key);
        }
        Ok(())
    }

    async fn count_by_conversation(&self, tenant_id: &str, conversation_id: &str) -> Result<usize, ObsError> {
        let guard = self.messages.read().await;
        Ok(guard
            .values()
            .filter(|m| m.tenant_id == tenant_id && m.conversation_id == conversation_id)
            .count())
    }

    async fn ensure_indexes(&self) -> Result<(), ObsError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use obs_core::{MessageType, TraceContext};

    fn trace(tenant: &str, id: &str, conversation: &str) -> Trace {
        let now = Utc::now();
        Trace {
            id: id.to_string(),
            tenant_id: tenant.to_string(),
            context_type: TraceContext::Conversation,
            application_id: Some("app".to_string()),
            conversation_id: Some(conversation.to_string()),
            autonomous_agent_id: None,
            reference_id: None,
            reference_name: None,
            reference_metadata: Default::default(),
            logs: vec![],
            nodes: vec![],
            created_at: now,
            updated_at: now,
            created_by: None,
            updated_by: None,
        }
    }

    fn message(tenant: &str, id: &str, conversation: &str) -> Message {
        Message {
            id: id.to_string(),
            tenant_id: tenant.to_string(),
            conversation_id: conversation.to_string(),
            message_type: MessageType::User,
            user_message_id: None,
            content: "hi".to_string(),
            status: None,
            metadata: None,
            status_traces: vec![],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = InMemoryTraceStore::new();
        let t = trace("t1", "trace_1", "conv_1");
        store.create(t.clone()).await.unwrap();
        let got = store.get("t1", "trace_1").await.unwrap().unwrap();
        assert_eq!(got.id, t.id);
    }

    #[tokio::test]
    async fn create_duplicate_id_conflicts() {
        let store = InMemoryTraceStore::new();
        let t = trace("t1", "trace_1", "conv_1");
        store.create(t.clone()).await.unwrap();
        let err = store.create(t).await.unwrap_err();
        assert_eq!(err.kind, obs_error::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn get_by_conversation_finds_match() {
        let store = InMemoryTraceStore::new();
        store.create(trace("t1", "trace_1", "conv_1")).await.unwrap();
        let got = store.get_by_conversation("t1", "conv_1").await.unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn update_missing_trace_not_found() {
        let store = InMemoryTraceStore::new();
        let err = store.update(trace("t1", "missing", "conv_1")).await.unwrap_err();
        assert_eq!(err.kind, obs_error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn delete_by_conversation_removes_all_matches() {
        let store = InMemoryTraceStore::new();
        store.create(trace("t1", "trace_1", "conv_1")).await.unwrap();
        store.create(trace("t1", "trace_2", "conv_1")).await.unwrap();
        store.delete_by_conversation("t1", "conv_1").await.unwrap();
        assert!(store.list_by_conversation("t1", "conv_1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn message_count_by_conversation() {
        let store = InMemoryMessageStore::new();
        store.add(message("t1", "m1", "conv_1")).await.unwrap();
        store.add(message("t1", "m2", "conv_1")).await.unwrap();
        store.add(message("t1", "m3", "conv_2")).await.unwrap();
        assert_eq!(store.count_by_conversation("t1", "conv_1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn list_opts_applies_offset_and_limit() {
        let store = InMemoryMessageStore::new();
        for i in 0..5 {
            store.add(message("t1", &format!("m{i}"), "conv_1")).await.unwrap();
        }
        let page = store
            .list("t1", ListOpts { limit: Some(2), offset: 1 })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
    }
}

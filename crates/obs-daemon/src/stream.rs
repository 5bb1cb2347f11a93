// SPDX-License-Identifier: MIT OR Apache-2.0
//! Streaming agent-invocation endpoint: relays the backend-agnostic chunk
//! stream of `obs_stream` to the client as Server-Sent Events (§4.6, §6.2).

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::Utc;
use obs_core::{CancellationToken, ChatHistoryEntry, MessageType, SessionConfig, SessionData};
use obs_error::{ErrorKind, ObsError};
use obs_stream::{invoke_stream, InvokeRequest, StreamChunk, StreamChunkKind, StreamReader};
use obs_store::ListOpts;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use crate::{ApiError, AppState};

fn default_user_id() -> String {
    "anonymous".to_string()
}

/// Body for `POST /tenants/{t}/conversations/{c}/invoke`.
#[derive(Debug, Deserialize)]
pub struct InvokeConversationRequest {
    /// The user message to send to the backend.
    pub message: String,
    /// Which backend to invoke: `"responses"` or `"workflow"`.
    pub backend: String,
    /// Acting user, used to scope the session cache key. Defaults to `"anonymous"`.
    #[serde(default = "default_user_id")]
    pub user_id: String,
    /// Backend session id to resume, if the caller already has one.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Wire shape for one SSE record (§6.2): distinct fields apply per `type`.
#[derive(Debug, Serialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "messageId")]
    message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    done: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "traceId")]
    trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl WireEvent {
    fn message(content: Option<String>, message_id: Option<String>, done: Option<bool>, trace_id: Option<String>) -> Self {
        Self {
            kind: "message",
            content,
            message_id,
            done,
            trace_id,
            code: None,
            message: None,
            details: None,
        }
    }

    fn trace(trace_id: Option<String>, details: Option<serde_json::Value>) -> Self {
        Self {
            kind: "trace",
            content: None,
            message_id: None,
            done: None,
            trace_id,
            code: None,
            message: None,
            details,
        }
    }

    fn error(code: &str, message: Option<String>) -> Self {
        Self {
            kind: "error",
            content: None,
            message_id: None,
            done: Some(true),
            trace_id: None,
            code: Some(code.to_string()),
            message,
            details: None,
        }
    }
}

fn metadata_to_value(metadata: Option<std::collections::BTreeMap<String, serde_json::Value>>) -> Option<serde_json::Value> {
    metadata.map(|m| serde_json::Value::Object(m.into_iter().collect()))
}

/// Maps one [`StreamChunk`] to the wire shape described in §6.2.
fn stream_chunk_to_wire(chunk: StreamChunk) -> WireEvent {
    match chunk.kind {
        StreamChunkKind::Content => WireEvent::message(chunk.content, None, None, None),
        StreamChunkKind::NewMessage => {
            let message_id = chunk
                .metadata
                .as_ref()
                .and_then(|m| m.get("message_id"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            WireEvent::message(None, message_id, None, None)
        }
        StreamChunkKind::Metadata => WireEvent::trace(None, metadata_to_value(chunk.metadata)),
        StreamChunkKind::Done => WireEvent::message(None, None, Some(true), chunk.execution_id).with_details(metadata_to_value(chunk.metadata)),
        StreamChunkKind::Error => WireEvent::error("service_unavailable", chunk.error),
    }
}

impl WireEvent {
    fn with_details(mut self, details: Option<serde_json::Value>) -> Self {
        self.details = details;
        self
    }
}

/// `POST /tenants/{t}/conversations/{c}/invoke`: opens a live invocation
/// against the configured backend and relays it to the client as SSE.
pub async fn invoke_conversation(
    State(state): State<Arc<AppState>>,
    Path((tenant, conversation)): Path<(String, String)>,
    Json(body): Json<InvokeConversationRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let cached = state.session_cache.get(&tenant, &body.user_id, &conversation).await?;

    let chat_history = match &cached {
        Some(session) => session.chat_history.clone(),
        None => state
            .message_store
            .list_chat_history(&tenant, &conversation, ListOpts::default())
            .await?
            .into_iter()
            .map(|m| ChatHistoryEntry {
                role: match m.message_type {
                    MessageType::User => "user".to_string(),
                    MessageType::Assistant => "assistant".to_string(),
                },
                content: m.content,
                timestamp: m.created_at,
            })
            .collect(),
    };

    let session_id = body.session_id.clone().or_else(|| {
        cached
            .as_ref()
            .and_then(|s| s.config.backend_config.get("session_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    });
    let session_existed = cached.is_some();

    let req = InvokeRequest {
        conversation_id: Some(conversation.clone()),
        message: body.message.clone(),
        session_id: session_id.clone(),
        chat_history: chat_history.clone(),
    };

    let cancel = CancellationToken::new();
    let rx = match body.backend.as_str() {
        "responses" => {
            let client = state
                .responses_stream_client
                .clone()
                .ok_or_else(|| ObsError::new(ErrorKind::ServiceUnavailable, "responses backend is not configured"))?;
            let source = client.open(&req).await?;
            invoke_stream(cancel, StreamReader::new(source))
        }
        "workflow" => {
            let client = state
                .workflow_stream_client
                .clone()
                .ok_or_else(|| ObsError::new(ErrorKind::ServiceUnavailable, "workflow backend is not configured"))?;
            let source = client.open(&req).await?;
            invoke_stream(cancel, StreamReader::new(source))
        }
        other => return Err(ObsError::validation(format!("unknown backend '{other}', expected 'responses' or 'workflow'")).into()),
    };

    let session_cache = Arc::clone(&state.session_cache);
    let tenant_for_cache = tenant.clone();
    let user_for_cache = body.user_id.clone();
    let conversation_for_cache = conversation.clone();
    let user_turn = ChatHistoryEntry::user(body.message.clone(), Utc::now());
    let accumulated = Arc::new(Mutex::new(String::new()));
    let session_ttl = Duration::from_secs(state.config.session_ttl_secs);
    let agent_kind = body.backend.clone();
    let chat_history_count = state.config.chat_history_count;
    let seed_chat_history = chat_history;
    let seed_session_id = session_id;

    let stream = ReceiverStream::new(rx).map(move |chunk| {
        if chunk.kind == StreamChunkKind::Content {
            if let Some(text) = &chunk.content {
                accumulated.lock().unwrap().push_str(text);
            }
        }
        let terminal = matches!(chunk.kind, StreamChunkKind::Done | StreamChunkKind::Error);
        if terminal {
            let assistant_text = accumulated.lock().unwrap().clone();
            if !assistant_text.is_empty() {
                let cache = Arc::clone(&session_cache);
                let tenant = tenant_for_cache.clone();
                let user = user_for_cache.clone();
                let conversation = conversation_for_cache.clone();
                let user_turn = user_turn.clone();
                let agent_kind = agent_kind.clone();
                let seed_chat_history = seed_chat_history.clone();
                let seed_session_id = seed_session_id.clone();
                tokio::spawn(async move {
                    let entries = vec![user_turn, ChatHistoryEntry::assistant(assistant_text, Utc::now())];
                    if session_existed {
                        if cache.update_chat_history(&tenant, &user, &conversation, entries, session_ttl).await.is_err() {
                            warn!(target: "obs.daemon", %tenant, %conversation, "no cached session to update after invocation");
                        }
                        return;
                    }

                    let mut backend_config = BTreeMap::new();
                    if let Some(session_id) = seed_session_id {
                        backend_config.insert("session_id".to_string(), serde_json::json!(session_id));
                    }
                    let now = Utc::now();
                    let mut session = SessionData {
                        config: SessionConfig { agent_kind, chat_history_count, backend_config },
                        chat_history: seed_chat_history,
                        tenant_id: tenant.clone(),
                        user_id: user.clone(),
                        conversation_id: conversation.clone(),
                        created_at: now,
                        updated_at: now,
                    };
                    session.push_chat_history(entries);
                    if cache.set(&session, session_ttl).await.is_err() {
                        warn!(target: "obs.daemon", %tenant, %conversation, "failed to seed session cache after invocation");
                    }
                });
            }
        }
        let wire = stream_chunk_to_wire(chunk);
        Ok(Event::default().json_data(wire).unwrap_or_else(|_| Event::default().data("{}")))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_chunk_maps_to_message_event_without_done() {
        let wire = stream_chunk_to_wire(StreamChunk::content("hi"));
        assert_eq!(wire.kind, "message");
        assert_eq!(wire.content.as_deref(), Some("hi"));
        assert_eq!(wire.done, None);
    }

    #[test]
    fn new_message_chunk_carries_message_id() {
        let chunk = StreamChunk::new_message("m1", "assistant");
        let wire = stream_chunk_to_wire(chunk);
        assert_eq!(wire.kind, "message");
        assert_eq!(wire.message_id.as_deref(), Some("m1"));
    }

    #[test]
    fn done_chunk_sets_done_true_and_trace_id() {
        let chunk = StreamChunk::done(Some("exec_1".to_string()), Default::default());
        let wire = stream_chunk_to_wire(chunk);
        assert_eq!(wire.kind, "message");
        assert_eq!(wire.done, Some(true));
        assert_eq!(wire.trace_id.as_deref(), Some("exec_1"));
    }

    #[test]
    fn error_chunk_maps_to_error_event_with_code() {
        let wire = stream_chunk_to_wire(StreamChunk::error("backend died"));
        assert_eq!(wire.kind, "error");
        assert_eq!(wire.code.as_deref(), Some("service_unavailable"));
        assert_eq!(wire.message.as_deref(), Some("backend died"));
    }

    #[test]
    fn metadata_chunk_maps_to_trace_event() {
        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("action_id".to_string(), serde_json::json!("a1"));
        let wire = stream_chunk_to_wire(StreamChunk::metadata(metadata));
        assert_eq!(wire.kind, "trace");
        assert!(wire.details.is_some());
    }
}

//! SSE adapter for the Responses backend (§4.6, §6.4).
//!
//! The backend's event discriminator lives inside the JSON payload's `type`
//! field, so the optional `event: <name>` line is parsed only to know where
//! one record ends and the next begins; the mapping table keys off `type`.

use std::collections::BTreeMap;

use obs_error::ObsError;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::bytes_lines::ByteLineReader;
use crate::{ChunkSource, InvokeRequest, StreamChunk};

/// Builds the POST body for `{endpoint}/openai/responses` from an [`InvokeRequest`].
fn request_body(req: &InvokeRequest) -> Value {
    let history: Vec<Value> = req
        .chat_history
        .iter()
        .map(|entry| serde_json::json!({ "role": entry.role, "content": entry.content }))
        .collect();
    serde_json::json!({
        "conversationId": req.conversation_id,
        "input": req.message,
        "sessionId": req.session_id,
        "chatHistory": history,
        "stream": true,
    })
}

/// Client for the Responses backend's streaming chat endpoint.
#[derive(Debug, Clone)]
pub struct ResponsesStreamClient {
    http: Client,
    endpoint: String,
    api_version: String,
    bearer_token: String,
}

impl ResponsesStreamClient {
    /// Builds a client pointed at `endpoint`, using `api_version` as the
    /// `api-version` query parameter and `bearer_token` for the
    /// `Authorization` header.
    pub fn new(endpoint: impl Into<String>, api_version: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
            api_version: api_version.into(),
            bearer_token: bearer_token.into(),
        }
    }

    /// Opens a streaming invocation, returning a [`ResponsesChunkSource`]
    /// adapting the backend's SSE wire format to [`ChunkSource`].
    pub async fn open(&self, req: &InvokeRequest) -> Result<ResponsesChunkSource, ObsError> {
        let url = format!("{}/openai/responses", self.endpoint.trim_end_matches('/'));
        debug!(target: "obs.stream", %url, "opening responses stream");

        let response = self
            .http
            .post(&url)
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(&self.bearer_token)
            .json(&request_body(req))
            .send()
            .await
            .map_err(|e| {
                ObsError::new(obs_error::ErrorKind::ServiceUnavailable, "responses stream request failed").with_source(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ObsError::new(
                obs_error::ErrorKind::ServiceUnavailable,
                format!("responses stream: backend returned {status}"),
            )
            .with_context("status", status.as_u16())
            .with_context("body", body));
        }

        Ok(ResponsesChunkSource {
            lines: ByteLineReader::new(response.bytes_stream()),
            last_message_id: None,
            seen_any_message: false,
        })
    }
}

/// Adapts the Responses backend's SSE stream to [`ChunkSource`].
pub struct ResponsesChunkSource {
    lines: ByteLineReader<bytes::Bytes, reqwest::Error>,
    last_message_id: Option<String>,
    seen_any_message: bool,
}

impl ResponsesChunkSource {
    fn map_event(&mut self, value: Value) -> Option<StreamChunk> {
        let event_type = value.get("type")?.as_str()?;
        match event_type {
            "response.output_text.delta" => {
                let delta = value.get("delta")?.as_str()?;
                Some(StreamChunk::content(delta))
            }
            "response.output_item.added" => {
                let item = value.get("item")?;
                match item.get("type").and_then(Value::as_str)? {
                    "message" => {
                        let id = item.get("id")?.as_str()?.to_string();
                        let is_first = !self.seen_any_message;
                        let changed = self.last_message_id.as_deref() != Some(id.as_str());
                        self.last_message_id = Some(id.clone());
                        self.seen_any_message = true;
                        if is_first || !changed {
                            None
                        } else {
                            let role = item.get("role").and_then(Value::as_str).unwrap_or_default().to_string();
                            Some(StreamChunk::new_message(id, role))
                        }
                    }
                    "workflow_action" => {
                        let mut metadata = BTreeMap::new();
                        metadata.insert("kind".to_string(), item.get("kind").cloned().unwrap_or(Value::Null));
                        metadata.insert("action_id".to_string(), item.get("id").cloned().unwrap_or(Value::Null));
                        metadata.insert(
                            "parent_action_id".to_string(),
                            item.get("parent_action_id").cloned().unwrap_or(Value::Null),
                        );
                        metadata.insert(
                            "previous_action_id".to_string(),
                            item.get("previous_action_id").cloned().unwrap_or(Value::Null),
                        );
                        metadata.insert("status".to_string(), item.get("status").cloned().unwrap_or(Value::Null));
                        Some(StreamChunk::metadata(metadata))
                    }
                    _ => None,
                }
            }
            "response.output_item.done" => {
                let item = value.get("item")?;
                if item.get("type").and_then(Value::as_str)? != "message" {
                    return None;
                }
                let mut metadata = BTreeMap::new();
                metadata.insert("message_id".to_string(), item.get("id").cloned().unwrap_or(Value::Null));
                metadata.insert("role".to_string(), item.get("role").cloned().unwrap_or(Value::Null));
                metadata.insert("status".to_string(), item.get("status").cloned().unwrap_or(Value::Null));
                metadata.insert("agent".to_string(), item.get("agent").cloned().unwrap_or(Value::Null));
                metadata.insert("response_id".to_string(), value.get("response_id").cloned().unwrap_or(Value::Null));
                Some(StreamChunk::metadata(metadata))
            }
            "response.completed" => {
                let response = value.get("response")?;
                let execution_id = response.get("id").and_then(Value::as_str).map(str::to_string);
                let mut metadata = BTreeMap::new();
                metadata.insert("usage".to_string(), response.get("usage").cloned().unwrap_or(Value::Null));
                metadata.insert("agent".to_string(), response.get("agent").cloned().unwrap_or(Value::Null));
                metadata.insert(
                    "conversation_id".to_string(),
                    response.get("conversation_id").cloned().unwrap_or(Value::Null),
                );
                Some(StreamChunk::done(execution_id, metadata))
            }
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl ChunkSource for ResponsesChunkSource {
    async fn next_chunk(&mut self) -> Result<Option<StreamChunk>, ObsError> {
        let mut data_lines: Vec<String> = Vec::new();

        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };

            if line.is_empty() {
                if data_lines.is_empty() {
                    continue;
                }
                match finalize_record(std::mem::take(&mut data_lines)) {
                    Some(Record::Eof) => return Ok(None),
                    Some(Record::Value(value)) => {
                        if let Some(chunk) = self.map_event(value) {
                            return Ok(Some(chunk));
                        }
                    }
                    None => {}
                }
                continue;
            }

            // `event:` lines are redundant with the `type` field inside the
            // JSON payload and carry no information map_event needs.
            if line.starts_with("event:") {
                continue;
            }
            if let Some(rest) = line.strip_prefix("data:") {
                data_lines.push(rest.trim_start().to_string());
                continue;
            }

            // Bare JSON line with no `event:`/`data:` prefix: one-line record.
            match finalize_record(vec![line]) {
                Some(Record::Eof) => return Ok(None),
                Some(Record::Value(value)) => {
                    if let Some(chunk) = self.map_event(value) {
                        return Ok(Some(chunk));
                    }
                }
                None => {}
            }
        }
    }

    async fn close(&mut self) {
        self.lines.close();
    }
}

enum Record {
    Eof,
    Value(Value),
}

fn finalize_record(data_lines: Vec<String>) -> Option<Record> {
    let joined = data_lines.join("\n");
    if joined.trim() == "[DONE]" {
        return Some(Record::Eof);
    }
    serde_json::from_str(&joined).ok().map(Record::Value)
}

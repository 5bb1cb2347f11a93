//! Line-delimited-JSON adapter for the Workflow backend (§4.6, §6.4).
//!
//! The backend emits no completion marker; the stream's natural EOF is the
//! only end-of-turn signal, so `next_chunk` returns `Ok(None)` there rather
//! than synthesizing a `done` chunk.

use std::collections::BTreeMap;

use obs_error::ObsError;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::bytes_lines::ByteLineReader;
use crate::{ChunkSource, InvokeRequest, StreamChunk};

/// Client for the Workflow backend's streaming chat endpoint.
#[derive(Debug, Clone)]
pub struct WorkflowStreamClient {
    http: Client,
    chat_url: String,
    basic_auth: Option<(String, String)>,
}

impl WorkflowStreamClient {
    /// Builds a client posting to `chat_url`, optionally with HTTP basic auth.
    pub fn new(chat_url: impl Into<String>, basic_auth: Option<(String, String)>) -> Self {
        Self {
            http: Client::new(),
            chat_url: chat_url.into(),
            basic_auth,
        }
    }

    /// Opens a streaming invocation, returning a [`WorkflowChunkSource`]
    /// adapting the backend's LDJSON wire format to [`ChunkSource`].
    pub async fn open(&self, req: &InvokeRequest) -> Result<WorkflowChunkSource, ObsError> {
        debug!(target: "obs.stream", url = %self.chat_url, "opening workflow stream");

        let mut builder = self.http.post(&self.chat_url).json(&serde_json::json!({
            "chatInput": req.message,
            "sessionId": req.session_id,
        }));
        if let Some((user, pass)) = &self.basic_auth {
            builder = builder.basic_auth(user, Some(pass));
        }

        let response = builder.send().await.map_err(|e| {
            ObsError::new(obs_error::ErrorKind::ServiceUnavailable, "workflow stream request failed").with_source(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ObsError::new(
                obs_error::ErrorKind::ServiceUnavailable,
                format!("workflow stream: backend returned {status}"),
            )
            .with_context("status", status.as_u16())
            .with_context("body", body));
        }

        Ok(WorkflowChunkSource {
            lines: ByteLineReader::new(response.bytes_stream()),
        })
    }
}

/// Adapts the Workflow backend's line-delimited-JSON stream to [`ChunkSource`].
pub struct WorkflowChunkSource {
    lines: ByteLineReader<bytes::Bytes, reqwest::Error>,
}

fn map_line(value: &Value) -> Option<StreamChunk> {
    if let Some(content) = value.get("content").and_then(Value::as_str) {
        return Some(StreamChunk::content(content));
    }
    if let Some(execution_id) = value.get("executionId").and_then(Value::as_str) {
        let mut metadata = BTreeMap::new();
        metadata.insert("execution_id".to_string(), Value::String(execution_id.to_string()));
        return Some(StreamChunk::metadata(metadata));
    }
    if let Some(run_info) = value.get("runInfo") {
        let mut metadata = BTreeMap::new();
        metadata.insert("run_info".to_string(), run_info.clone());
        return Some(StreamChunk::metadata(metadata));
    }
    let has_token_usage = value.get("promptTokens").is_some()
        || value.get("completionTokens").is_some()
        || value.get("totalTokens").is_some();
    if has_token_usage {
        let mut metadata = BTreeMap::new();
        metadata.insert("usage".to_string(), value.clone());
        return Some(StreamChunk::metadata(metadata));
    }
    None
}

#[async_trait::async_trait]
impl ChunkSource for WorkflowChunkSource {
    async fn next_chunk(&mut self) -> Result<Option<StreamChunk>, ObsError> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
                continue;
            };
            if let Some(chunk) = map_line(&value) {
                return Ok(Some(chunk));
            }
        }
    }

    async fn close(&mut self) {
        self.lines.close();
    }
}

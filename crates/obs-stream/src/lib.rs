//! Backend-agnostic streaming invocation layer (§4.6).
//!
//! [`ChunkSource`] is the adapter seam: the Responses backend's SSE client
//! ([`sse::ResponsesChunkSource`]) and the Workflow backend's
//! line-delimited-JSON client ([`ldjson::WorkflowChunkSource`]) both produce
//! [`StreamChunk`]s without exposing their wire formats to callers.
//! [`invoke`] and [`invoke_stream`] are written once, generically, over any
//! [`ChunkSource`].
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bytes_lines;
/// Line-delimited-JSON adapter for the Workflow backend.
pub mod ldjson;
/// Server-sent-events adapter for the Responses backend.
pub mod sse;

use std::collections::BTreeMap;

use obs_core::{CancellationToken, ChatHistoryEntry};
use obs_error::{ErrorKind, ObsError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use ldjson::WorkflowStreamClient;
pub use sse::ResponsesStreamClient;

/// Channel capacity used by [`invoke_stream`]'s fan-out producer (§4.6).
pub const STREAM_CHANNEL_CAPACITY: usize = 100;

/// A request to invoke an external agent backend.
#[derive(Debug, Clone, Default)]
pub struct InvokeRequest {
    /// Conversation this invocation belongs to, if any.
    pub conversation_id: Option<String>,
    /// The user message to send.
    pub message: String,
    /// Backend session id, if a prior turn established one.
    pub session_id: Option<String>,
    /// Prior turns to prime the backend with.
    pub chat_history: Vec<ChatHistoryEntry>,
}

/// Discriminant for [`StreamChunk::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamChunkKind {
    /// An incremental content delta.
    Content,
    /// Out-of-band metadata about the in-flight turn.
    Metadata,
    /// A terminal error; no further chunks follow.
    Error,
    /// The turn completed; no further chunks follow.
    Done,
    /// The backend started a new message within the same turn.
    NewMessage,
}

/// A single chunk of a streaming invocation (§4.6). Only the fields that
/// apply to `kind` are populated; the rest are `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Discriminant driving which other fields are meaningful.
    pub kind: StreamChunkKind,
    /// Present on `content` chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Present on `done` chunks once the backend reports one.
    #[serde(skip_serializing_if = "Option::is_none", rename = "executionId")]
    pub execution_id: Option<String>,
    /// Present on `metadata`, `new_message`, and `done` chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
    /// Present on `error` chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamChunk {
    /// Builds a `content` chunk.
    #[must_use]
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            kind: StreamChunkKind::Content,
            content: Some(text.into()),
            execution_id: None,
            metadata: None,
            error: None,
        }
    }

    /// Builds a `metadata` chunk.
    #[must_use]
    pub fn metadata(metadata: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            kind: StreamChunkKind::Metadata,
            content: None,
            execution_id: None,
            metadata: Some(metadata),
            error: None,
        }
    }

    /// Builds a `new_message` chunk carrying `{message_id, role}`.
    #[must_use]
    pub fn new_message(message_id: impl Into<String>, role: impl Into<String>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("message_id".to_string(), serde_json::Value::String(message_id.into()));
        metadata.insert("role".to_string(), serde_json::Value::String(role.into()));
        Self {
            kind: StreamChunkKind::NewMessage,
            content: None,
            execution_id: None,
            metadata: Some(metadata),
            error: None,
        }
    }

    /// Builds a `done` chunk.
    #[must_use]
    pub fn done(execution_id: Option<String>, metadata: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            kind: StreamChunkKind::Done,
            content: None,
            execution_id,
            metadata: Some(metadata),
            error: None,
        }
    }

    /// Builds a terminal `error` chunk.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: StreamChunkKind::Error,
            content: None,
            execution_id: None,
            metadata: None,
            error: Some(message.into()),
        }
    }
}

/// The accumulated result of a synchronous [`invoke`] call.
#[derive(Debug, Clone, Default)]
pub struct InvokeResponse {
    /// Concatenation of every `content` chunk's text.
    pub content: String,
    /// The last `executionId` observed, if any.
    pub execution_id: Option<String>,
    /// Echoes the request's session id; backends do not currently mint one.
    pub session_id: Option<String>,
    /// The last metadata map observed (from a `metadata`, `new_message`, or `done` chunk).
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// A backend-specific producer of [`StreamChunk`]s. Implementations own the
/// network connection and the wire-format parsing; callers never see it.
#[async_trait::async_trait]
pub trait ChunkSource: Send {
    /// Pulls the next chunk. `Ok(None)` signals a clean end of stream.
    async fn next_chunk(&mut self) -> Result<Option<StreamChunk>, ObsError>;

    /// Stops reading and releases the underlying network reader.
    async fn close(&mut self);
}

/// Pull-model reader over a [`ChunkSource`] (§4.6's `invokeStreamReader`).
pub struct StreamReader<S> {
    source: Option<S>,
}

impl<S: ChunkSource> StreamReader<S> {
    /// Wraps a fresh chunk source.
    pub fn new(source: S) -> Self {
        Self { source: Some(source) }
    }

    /// Reads the next chunk. The returned `bool` is `true` once the caller
    /// has seen the last chunk of the stream (a `done`/`error` chunk, or a
    /// clean `None`).
    pub async fn read(&mut self) -> Result<(Option<StreamChunk>, bool), ObsError> {
        let Some(source) = self.source.as_mut() else {
            return Ok((None, true));
        };
        match source.next_chunk().await {
            Ok(Some(chunk)) => {
                let eof = matches!(chunk.kind, StreamChunkKind::Done | StreamChunkKind::Error);
                if eof {
                    self.close().await;
                }
                Ok((Some(chunk), eof))
            }
            Ok(None) => {
                self.close().await;
                Ok((None, true))
            }
            Err(err) => {
                self.close().await;
                Err(err)
            }
        }
    }

    /// Closes the underlying source. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close().await;
        }
    }
}

/// Runs `reader` to completion, accumulating content and the last metadata
/// seen, and closes the reader on every exit path (§4.6).
pub async fn invoke<S: ChunkSource>(req: &InvokeRequest, mut reader: StreamReader<S>) -> Result<InvokeResponse, ObsError> {
    let mut response = InvokeResponse {
        session_id: req.session_id.clone(),
        ..Default::default()
    };

    loop {
        let (chunk, eof) = match reader.read().await {
            Ok(pair) => pair,
            Err(err) => {
                reader.close().await;
                return Err(err);
            }
        };

        if let Some(chunk) = chunk {
            match chunk.kind {
                StreamChunkKind::Content => {
                    if let Some(text) = chunk.content {
                        response.content.push_str(&text);
                    }
                }
                StreamChunkKind::Metadata | StreamChunkKind::NewMessage => {
                    if let Some(metadata) = chunk.metadata {
                        response.metadata = metadata;
                    }
                }
                StreamChunkKind::Done => {
                    if chunk.execution_id.is_some() {
                        response.execution_id = chunk.execution_id;
                    }
                    if let Some(metadata) = chunk.metadata {
                        response.metadata = metadata;
                    }
                }
                StreamChunkKind::Error => {
                    reader.close().await;
                    return Err(ObsError::new(
                        ErrorKind::ServiceUnavailable,
                        chunk.error.unwrap_or_else(|| "backend stream error".to_string()),
                    ));
                }
            }
        }

        if eof {
            break;
        }
    }

    reader.close().await;
    Ok(response)
}

/// Spawns a single producer task that drains `reader` into a channel of
/// capacity [`STREAM_CHANNEL_CAPACITY`], selecting on `cancel` so a cancelled
/// consumer unblocks the send and closes the underlying reader (§4.6).
pub fn invoke_stream<S>(cancel: CancellationToken, mut reader: StreamReader<S>) -> mpsc::Receiver<StreamChunk>
where
    S: ChunkSource + 'static,
{
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    reader.close().await;
                    break;
                }
                result = reader.read() => {
                    match result {
                        Ok((Some(chunk), eof)) => {
                            if tx.send(chunk).await.is_err() {
                                reader.close().await;
                                break;
                            }
                            if eof {
                                break;
                            }
                        }
                        Ok((None, _)) => break,
                        Err(err) => {
                            let _ = tx.send(StreamChunk::error(err.to_string())).await;
                            break;
                        }
                    }
                }
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct VecChunkSource {
        chunks: std::collections::VecDeque<StreamChunk>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ChunkSource for VecChunkSource {
        async fn next_chunk(&mut self) -> Result<Option<StreamChunk>, ObsError> {
            Ok(self.chunks.pop_front())
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn invoke_accumulates_content_and_last_metadata() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut metadata = BTreeMap::new();
        metadata.insert("agent".to_string(), serde_json::json!("triage"));
        let source = VecChunkSource {
            chunks: vec![
                StreamChunk::content("hel"),
                StreamChunk::content("lo"),
                StreamChunk::done(Some("exec_1".to_string()), metadata.clone()),
            ]
            .into(),
            closed: Arc::clone(&closed),
        };

        let response = invoke(&InvokeRequest::default(), StreamReader::new(source)).await.unwrap();
        assert_eq!(response.content, "hello");
        assert_eq!(response.execution_id.as_deref(), Some("exec_1"));
        assert_eq!(response.metadata, metadata);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invoke_surfaces_error_chunk_and_closes() {
        let closed = Arc::new(AtomicUsize::new(0));
        let source = VecChunkSource {
            chunks: vec![StreamChunk::content("partial"), StreamChunk::error("backend died")].into(),
            closed: Arc::clone(&closed),
        };

        let err = invoke(&InvokeRequest::default(), StreamReader::new(source)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invoke_stream_forwards_every_chunk_then_closes_channel() {
        let closed = Arc::new(AtomicUsize::new(0));
        let source = VecChunkSource {
            chunks: vec![StreamChunk::content("a"), StreamChunk::done(None, BTreeMap::new())].into(),
            closed: Arc::clone(&closed),
        };

        let mut rx = invoke_stream(CancellationToken::new(), StreamReader::new(source));
        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, StreamChunkKind::Content);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, StreamChunkKind::Done);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn invoke_stream_cancellation_closes_reader_without_draining_remaining_chunks() {
        let closed = Arc::new(AtomicUsize::new(0));
        let source = VecChunkSource {
            chunks: vec![StreamChunk::content("a"), StreamChunk::content("b"), StreamChunk::content("c")].into(),
            closed: Arc::clone(&closed),
        };

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut rx = invoke_stream(cancel, StreamReader::new(source));
        assert!(rx.recv().await.is_none());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}

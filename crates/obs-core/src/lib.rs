//! obs-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable data model for the observability service: [`Trace`] and
//! [`TraceNode`] (execution trees), [`Message`]/[`ChatHistoryEntry`]/
//! [`SessionData`] (streaming-path state), and the validation contract that
//! every trace must satisfy before it is persisted.
//!
//! If you only take one dependency, take this one.

/// Trace entity, its context, and validation.
pub mod trace;
/// Recursive trace node and its payload types.
pub mod node;
/// Message and chat-history types carried by the session cache.
pub mod message;
/// Cached per-conversation agent session state.
pub mod session;
/// Ergonomic builders for [`Trace`] and [`TraceNode`].
pub mod builder;
/// Shared cancellation token for the job queue and streaming layer.
pub mod cancel;

pub use builder::{TraceBuilder, TraceNodeBuilder};
pub use cancel::CancellationToken;
pub use message::{ChatHistoryEntry, Message, MessageStatus, MessageType, StatusTrace};
pub use node::{NodeData, NodeIo, NodeStatus, NodeType, TraceNode};
pub use session::{SessionConfig, SessionData};
pub use trace::{Trace, TraceContext};

/// Current contract version embedded in API responses and stored documents.
pub const CONTRACT_VERSION: &str = "obs/v1";

/// Default `chatHistory` cap applied to [`SessionData`] when not overridden.
pub const DEFAULT_CHAT_HISTORY_COUNT: usize = 30;

/// Default session TTL in seconds.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 180;

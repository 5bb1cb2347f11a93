//! Abstract document-store port for traces and messages (§4.8).
//!
//! The core depends only on the [`TraceStore`] and [`MessageStore`] traits;
//! the backing database is out of scope. [`memory`] provides an
//! in-process implementation suitable for tests and single-node
//! development deployments.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// In-memory implementation of [`TraceStore`] and [`MessageStore`].
pub mod memory;

use async_trait::async_trait;
use obs_core::{Message, Trace, TraceNode};
use obs_error::ObsError;

/// Pagination/filter options shared by list operations.
#[derive(Debug, Clone, Default)]
pub struct ListOpts {
    /// Maximum number of results to return; `None` means no limit.
    pub limit: Option<usize>,
    /// Number of matching results to skip before collecting `limit`.
    pub offset: usize,
}

/// Abstract repository for [`Trace`] documents, scoped per tenant.
#[async_trait]
pub trait TraceStore: Send + Sync {
    /// Persists a new trace. Errors with `conflict` if `(tenant_id, id)` or
    /// a non-empty `reference_id` already exists for the tenant.
    async fn create(&self, trace: Trace) -> Result<Trace, ObsError>;
    /// Fetches a trace by internal id.
    async fn get(&self, tenant_id: &str, id: &str) -> Result<Option<Trace>, ObsError>;
    /// Fetches the (at most one) trace for a conversation.
    async fn get_by_conversation(&self, tenant_id: &str, conversation_id: &str) -> Result<Option<Trace>, ObsError>;
    /// Fetches a trace by its external `reference_id`.
    async fn get_by_reference_id(&self, tenant_id: &str, reference_id: &str) -> Result<Option<Trace>, ObsError>;
    /// Lists traces for a tenant, newest-created first.
    async fn list(&self, tenant_id: &str, opts: ListOpts) -> Result<Vec<Trace>, ObsError>;
    /// Replaces a trace in place (refresh/re-import path).
    async fn update(&self, trace: Trace) -> Result<Trace, ObsError>;
    /// Appends root nodes to an existing trace.
    async fn add_nodes(&self, tenant_id: &str, id: &str, nodes: Vec<TraceNode>) -> Result<(), ObsError>;
    /// Appends log lines to an existing trace.
    async fn add_logs(&self, tenant_id: &str, id: &str, logs: Vec<String>) -> Result<(), ObsError>;
    /// Deletes a trace by id.
    async fn delete(&self, tenant_id: &str, id: &str) -> Result<(), ObsError>;
    /// Deletes every trace for a conversation.
    async fn delete_by_conversation(&self, tenant_id: &str, conversation_id: &str) -> Result<(), ObsError>;
    /// Deletes every trace for an autonomous-agent context.
    async fn delete_by_autonomous_agent(&self, tenant_id: &str, autonomous_agent_id: &str) -> Result<(), ObsError>;
    /// Lists every trace for a conversation (a conversation normally has at
    /// most one, but historical/duplicate data may have more).
    async fn list_by_conversation(&self, tenant_id: &str, conversation_id: &str) -> Result<Vec<Trace>, ObsError>;
    /// Ensures logical indexes exist; a no-op for backends without a
    /// separate index-creation step.
    async fn ensure_indexes(&self) -> Result<(), ObsError>;
}

/// Abstract repository for [`Message`] documents, scoped per tenant.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists a new message.
    async fn add(&self, message: Message) -> Result<Message, ObsError>;
    /// Fetches a message by id.
    async fn get(&self, tenant_id: &str, id: &str) -> Result<Option<Message>, ObsError>;
    /// Fetches the assistant message answering a given user message, if any.
    async fn get_by_user_message_id(&self, tenant_id: &str, user_message_id: &str) -> Result<Option<Message>, ObsError>;
    /// Lists messages for a tenant.
    async fn list(&self, tenant_id: &str, opts: ListOpts) -> Result<Vec<Message>, ObsError>;
    /// Lists a conversation's chat history, oldest first.
    async fn list_chat_history(&self, tenant_id: &str, conversation_id: &str, opts: ListOpts) -> Result<Vec<Message>, ObsError>;
    /// Replaces a message in place (status/metadata updates as a stream progresses).
    async fn update(&self, message: Message) -> Result<Message, ObsError>;
    /// Deletes messages matching `opts` scoped to a conversation.
    async fn delete(&self, tenant_id: &str, conversation_id: &str, opts: ListOpts) -> Result<(), ObsError>;
    /// Counts messages in a conversation.
    async fn count_by_conversation(&self, tenant_id: &str, conversation_id: &str) -> Result<usize, ObsError>;
    /// Ensures logical indexes exist; a no-op for backends without a
    /// separate index-creation step.
    async fn ensure_indexes(&self) -> Result<(), ObsError>;
}

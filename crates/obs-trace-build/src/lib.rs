//! Hierarchical trace builders.
//!
//! Each external backend hands us a flat, backend-native shape — a
//! newest-first item list for the Responses backend, a single execution
//! response for the Workflow backend — and this crate turns it into the
//! ordered [`obs_core::TraceNode`] tree the rest of the system stores.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Responses-backend conversation-item builder (§4.2).
pub mod responses;
/// Workflow-backend execution-response builder (§4.3).
pub mod workflow;

pub use responses::{build_responses_nodes, ConversationItem};
pub use workflow::{build_workflow_nodes, extract_session_id, ExecutionResponse, NodeExecution, ResultData, WorkflowData};

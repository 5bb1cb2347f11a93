use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::node::{NodeData, NodeStatus, NodeType, TraceNode};
use crate::trace::{Trace, TraceContext};

/// Builder for constructing [`Trace`]s ergonomically.
///
/// # Examples
///
/// ```
/// use obs_core::TraceBuilder;
///
/// let trace = TraceBuilder::new("trace_1", "tenant_a")
///     .conversation("app_1", "conv_1")
///     .reference_id("ext-123")
///     .build();
///
/// assert_eq!(trace.id, "trace_1");
/// assert_eq!(trace.conversation_id.as_deref(), Some("conv_1"));
/// ```
#[derive(Debug)]
pub struct TraceBuilder {
    id: String,
    tenant_id: String,
    application_id: Option<String>,
    conversation_id: Option<String>,
    autonomous_agent_id: Option<String>,
    reference_id: Option<String>,
    reference_name: Option<String>,
    reference_metadata: BTreeMap<String, serde_json::Value>,
    logs: Vec<String>,
    nodes: Vec<TraceNode>,
    created_at: Option<DateTime<Utc>>,
    created_by: Option<String>,
}

impl TraceBuilder {
    /// Create a new builder for a trace with the given id and tenant.
    #[must_use]
    pub fn new(id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            application_id: None,
            conversation_id: None,
            autonomous_agent_id: None,
            reference_id: None,
            reference_name: None,
            reference_metadata: BTreeMap::new(),
            logs: vec![],
            nodes: vec![],
            created_at: None,
            created_by: None,
        }
    }

    /// Set the conversation context (application + conversation id).
    #[must_use]
    pub fn conversation(mut self, application_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self.conversation_id = Some(conversation_id.into());
        self.autonomous_agent_id = None;
        self
    }

    /// Set the autonomous-agent context.
    #[must_use]
    pub fn autonomous_agent(mut self, autonomous_agent_id: impl Into<String>) -> Self {
        self.autonomous_agent_id = Some(autonomous_agent_id.into());
        self.application_id = None;
        self.conversation_id = None;
        self
    }

    /// Set the external reference id.
    #[must_use]
    pub fn reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    /// Set the external reference name.
    #[must_use]
    pub fn reference_name(mut self, reference_name: impl Into<String>) -> Self {
        self.reference_name = Some(reference_name.into());
        self
    }

    /// Set the external reference metadata map.
    #[must_use]
    pub fn reference_metadata(mut self, metadata: BTreeMap<String, serde_json::Value>) -> Self {
        self.reference_metadata = metadata;
        self
    }

    /// Set the full ordered log list.
    #[must_use]
    pub fn logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }

    /// Append a single root node.
    #[must_use]
    pub fn add_node(mut self, node: TraceNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Set the full root node list.
    #[must_use]
    pub fn nodes(mut self, nodes: Vec<TraceNode>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Override the creation timestamp (defaults to `Utc::now()` at `build()`).
    #[must_use]
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Set the creating identity.
    #[must_use]
    pub fn created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = Some(created_by.into());
        self
    }

    /// Consume the builder and produce a [`Trace`].
    ///
    /// `context_type` is derived from whichever context fields were set;
    /// if neither or both were set, the resulting trace will fail
    /// [`Trace::validate`] — the builder does not pre-validate.
    #[must_use]
    pub fn build(self) -> Trace {
        let context_type = Trace::infer_context(
            &self.application_id,
            &self.conversation_id,
            &self.autonomous_agent_id,
        )
        .unwrap_or(TraceContext::Conversation);
        let now = self.created_at.unwrap_or_else(Utc::now);
        Trace {
            id: self.id,
            tenant_id: self.tenant_id,
            context_type,
            application_id: self.application_id,
            conversation_id: self.conversation_id,
            autonomous_agent_id: self.autonomous_agent_id,
            reference_id: self.reference_id,
            reference_name: self.reference_name,
            reference_metadata: self.reference_metadata,
            logs: self.logs,
            nodes: self.nodes,
            created_at: now,
            updated_at: now,
            created_by: self.created_by,
            updated_by: None,
        }
    }
}

/// Builder for constructing [`TraceNode`]s ergonomically.
///
/// # Examples
///
/// ```
/// use obs_core::{TraceNodeBuilder, NodeType, NodeStatus};
///
/// let node = TraceNodeBuilder::new("n1", "Assistant Response", NodeType::Llm)
///     .status(NodeStatus::Completed)
///     .build();
///
/// assert_eq!(node.name, "Assistant Response");
/// assert_eq!(node.status, NodeStatus::Completed);
/// ```
#[derive(Debug)]
pub struct TraceNodeBuilder {
    id: String,
    name: String,
    node_type: NodeType,
    status: NodeStatus,
    reference_id: Option<String>,
    start_at: Option<DateTime<Utc>>,
    end_at: Option<DateTime<Utc>>,
    data: Option<NodeData>,
    metadata: BTreeMap<String, serde_json::Value>,
    nodes: Vec<TraceNode>,
    logs: Vec<String>,
}

impl TraceNodeBuilder {
    /// Create a new builder with the given id, name, and node type.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node_type,
            status: NodeStatus::Pending,
            reference_id: None,
            start_at: None,
            end_at: None,
            data: None,
            metadata: BTreeMap::new(),
            nodes: vec![],
            logs: vec![],
        }
    }

    /// Set the lifecycle status.
    #[must_use]
    pub fn status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the source-item reference id.
    #[must_use]
    pub fn reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    /// Set the start and end timestamps.
    #[must_use]
    pub fn interval(mut self, start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> Self {
        self.start_at = Some(start_at);
        self.end_at = Some(end_at);
        self
    }

    /// Set the input/output payload.
    #[must_use]
    pub fn data(mut self, data: NodeData) -> Self {
        self.data = Some(data);
        self
    }

    /// Insert a metadata entry.
    #[must_use]
    pub fn metadata_entry(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Append a child node.
    #[must_use]
    pub fn add_child(mut self, child: TraceNode) -> Self {
        self.nodes.push(child);
        self
    }

    /// Consume the builder and produce a [`TraceNode`].
    ///
    /// `duration` is derived from `start_at`/`end_at` when both are set.
    #[must_use]
    pub fn build(self) -> TraceNode {
        let duration = match (self.start_at, self.end_at) {
            (Some(s), Some(e)) => Some((e - s).num_milliseconds() as f64 / 1000.0),
            _ => None,
        };
        let now = Utc::now();
        TraceNode {
            id: self.id,
            reference_id: self.reference_id,
            name: self.name,
            node_type: self.node_type,
            status: self.status,
            start_at: self.start_at,
            end_at: self.end_at,
            duration,
            data: self.data,
            metadata: self.metadata,
            nodes: self.nodes,
            logs: self.logs,
            created_at: now,
            updated_at: now,
            created_by: None,
            updated_by: None,
        }
    }
}

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use obs_error::ObsError;

/// Kind of work a [`TraceNode`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// An autonomous or sub-agent invocation.
    Agent,
    /// A tool/function call, including MCP tool calls.
    Tool,
    /// A direct LLM call (chat completion or message turn).
    Llm,
    /// A composed sequence of sub-steps.
    Chain,
    /// A retrieval step (e.g. vector search).
    Retriever,
    /// A workflow-engine action.
    Workflow,
    /// A plain function invocation.
    Function,
    /// An outbound HTTP call.
    Http,
    /// A code-execution step.
    Code,
    /// A branch/switch decision point.
    Conditional,
    /// A loop iteration container.
    Loop,
    /// Anything that does not fit the above.
    Custom,
}

/// Lifecycle state of a [`TraceNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Not yet started.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Not executed (e.g. short-circuited branch).
    Skipped,
    /// Explicitly cancelled (e.g. a rejected MCP approval).
    Cancelled,
}

/// Input or output payload attached to a [`TraceNode`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NodeIo {
    /// Human-readable text representation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Opaque structured payload (e.g. parsed JSON arguments).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<serde_json::Value>,
    /// Free-form metadata about this side of the node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

impl NodeIo {
    /// Construct an I/O payload carrying only text.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            extra_data: None,
            metadata: None,
        }
    }
}

/// Input/output data attached to a [`TraceNode`], if any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NodeData {
    /// What went into this node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<NodeIo>,
    /// What came out of this node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<NodeIo>,
}

/// A single node in a [`crate::Trace`]'s execution tree.
///
/// Modeled as a tagged discriminated value rather than an inheritance
/// hierarchy: `type` and `status` select the meaning of the node, and
/// `nodes` is a value-owned sequence of children of the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TraceNode {
    /// Unique within the owning trace.
    pub id: String,
    /// Identity of the external item this node was derived from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    /// Human-readable name.
    pub name: String,
    /// What kind of work this node represents.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Lifecycle state.
    pub status: NodeStatus,
    /// When the node started, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    /// When the node ended, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    /// Duration in seconds, derived from `start_at`/`end_at` when both are known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Input/output payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<NodeData>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Children, in emission order.
    #[serde(default)]
    pub nodes: Vec<TraceNode>,
    /// Ordered log lines attached to this node.
    #[serde(default)]
    pub logs: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Identity that created this node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    /// Identity that last updated this node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

impl TraceNode {
    /// Validate this node and all of its descendants, returning the first
    /// violation found in depth-first, sibling order.
    pub fn validate(&self) -> Result<(), ObsError> {
        if self.id.trim().is_empty() {
            return Err(ObsError::validation("node id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(ObsError::validation("node name must not be empty")
                .with_context("node_id", self.id.clone()));
        }
        if let (Some(start), Some(end)) = (self.start_at, self.end_at) {
            if end < start {
                return Err(ObsError::validation("node end_at precedes start_at")
                    .with_context("node_id", self.id.clone()));
            }
        }
        let mut seen_ids = std::collections::HashSet::new();
        seen_ids.insert(self.id.as_str());
        for child in &self.nodes {
            if !seen_ids.insert(child.id.as_str()) {
                return Err(ObsError::validation("duplicate node id in subtree")
                    .with_context("node_id", child.id.clone()));
            }
            child.validate()?;
        }
        Ok(())
    }

    /// Total node count in this subtree, including `self`.
    #[must_use]
    pub fn subtree_len(&self) -> usize {
        1 + self.nodes.iter().map(TraceNode::subtree_len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TraceNodeBuilder;

    #[test]
    fn empty_id_is_validation_error() {
        let mut node = TraceNodeBuilder::new("n1", "name", NodeType::Llm).build();
        node.id = String::new();
        assert!(node.validate().is_err());
    }

    #[test]
    fn empty_name_is_validation_error() {
        let mut node = TraceNodeBuilder::new("n1", "name", NodeType::Llm).build();
        node.name = "  ".to_string();
        assert!(node.validate().is_err());
    }

    #[test]
    fn end_before_start_is_validation_error() {
        let start = Utc::now();
        let end = start - chrono::Duration::seconds(1);
        let node = TraceNodeBuilder::new("n1", "name", NodeType::Llm)
            .interval(start, end)
            .build();
        assert!(node.validate().is_err());
    }

    #[test]
    fn duplicate_child_id_matching_parent_is_rejected() {
        let mut parent = TraceNodeBuilder::new("n1", "parent", NodeType::Chain).build();
        parent.nodes.push(TraceNodeBuilder::new("n1", "child", NodeType::Llm).build());
        assert!(parent.validate().is_err());
    }

    #[test]
    fn valid_recursive_tree_passes() {
        let child = TraceNodeBuilder::new("c1", "child", NodeType::Llm).build();
        let parent = TraceNodeBuilder::new("p1", "parent", NodeType::Chain)
            .add_child(child)
            .build();
        assert!(parent.validate().is_ok());
    }

    #[test]
    fn subtree_len_counts_self_and_descendants() {
        let grandchild = TraceNodeBuilder::new("g1", "g", NodeType::Llm).build();
        let child = TraceNodeBuilder::new("c1", "c", NodeType::Chain)
            .add_child(grandchild)
            .build();
        let parent = TraceNodeBuilder::new("p1", "p", NodeType::Chain)
            .add_child(child)
            .build();
        assert_eq!(parent.subtree_len(), 3);
    }
}

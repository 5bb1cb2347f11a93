use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::node::TraceNode;
use obs_error::ObsError;

/// Which of the two mutually-exclusive contexts a [`Trace`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TraceContext {
    /// A human conversation turn: `application_id` + `conversation_id`.
    Conversation,
    /// An unattended agent run: `autonomous_agent_id`.
    AutonomousAgent,
}

/// Root entity of an execution recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Trace {
    /// Unique within `tenant_id`.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Which context this trace belongs to.
    pub context_type: TraceContext,
    /// Set iff `context_type == Conversation`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    /// Set iff `context_type == Conversation`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Set iff `context_type == AutonomousAgent`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autonomous_agent_id: Option<String>,
    /// External-system identity; unique per tenant when set, and the upsert
    /// lookup key for import flows that key on reference identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    /// Human-readable name of the external reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_name: Option<String>,
    /// Free-form provenance about the external reference.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reference_metadata: BTreeMap<String, serde_json::Value>,
    /// Ordered log lines.
    #[serde(default)]
    pub logs: Vec<String>,
    /// Root nodes, in emission order.
    #[serde(default)]
    pub nodes: Vec<TraceNode>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Identity that created this trace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    /// Identity that last updated this trace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

impl Trace {
    /// Validate the complete invariant set from the data model: context
    /// exclusivity, node validity (recursively), and id non-emptiness.
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<(), ObsError> {
        if self.id.trim().is_empty() {
            return Err(ObsError::validation("trace id must not be empty"));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(ObsError::validation("tenant_id must not be empty"));
        }

        let has_conversation = self.application_id.is_some() && self.conversation_id.is_some();
        let has_autonomous = self.autonomous_agent_id.is_some();
        match (has_conversation, has_autonomous) {
            (true, true) => {
                return Err(ObsError::validation(
                    "trace must not set both conversation and autonomous-agent context",
                ));
            }
            (false, false) => {
                return Err(ObsError::validation(
                    "trace must set exactly one of conversation or autonomous-agent context",
                ));
            }
            (true, false) => {
                if self.context_type != TraceContext::Conversation {
                    return Err(ObsError::validation(
                        "context_type must be conversation when conversation ids are set",
                    ));
                }
            }
            (false, true) => {
                if self.context_type != TraceContext::AutonomousAgent {
                    return Err(ObsError::validation(
                        "context_type must be autonomous_agent when autonomous_agent_id is set",
                    ));
                }
            }
        }

        // Partial conversation context (one of the two ids set, not both) is
        // itself a context-exclusivity violation distinct from the has/has-not
        // check above.
        if (self.application_id.is_some()) != (self.conversation_id.is_some())
            && !has_autonomous
        {
            return Err(ObsError::validation(
                "application_id and conversation_id must be set together",
            ));
        }

        let mut seen_ids = HashSet::new();
        for node in &self.nodes {
            if !seen_ids.insert(node.id.as_str()) {
                return Err(ObsError::validation("duplicate root node id")
                    .with_context("node_id", node.id.clone()));
            }
            node.validate()?;
        }

        Ok(())
    }

    /// Derive the correct [`TraceContext`] from which identifiers are set,
    /// per the upsert-policy contract (§4.4): used when constructing a new
    /// trace during import rather than trusting caller-supplied context.
    #[must_use]
    pub fn infer_context(
        application_id: &Option<String>,
        conversation_id: &Option<String>,
        autonomous_agent_id: &Option<String>,
    ) -> Option<TraceContext> {
        let conversation = application_id.is_some() && conversation_id.is_some();
        let autonomous = autonomous_agent_id.is_some();
        match (conversation, autonomous) {
            (true, false) => Some(TraceContext::Conversation),
            (false, true) => Some(TraceContext::AutonomousAgent),
            _ => None,
        }
    }
}

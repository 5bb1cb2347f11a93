use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use obs_core::{NodeData, NodeIo, NodeStatus, NodeType, TraceNode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The static shape of the workflow: node name → external type string.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowData {
    /// e.g. `"Chat Trigger" -> "n8n-nodes-base.chatTrigger"`.
    pub nodes: BTreeMap<String, String>,
}

/// The wire shape of a single node definition in the Workflow backend's
/// `workflowData.nodes` array.
#[derive(Debug, Clone, Deserialize)]
struct WireNodeDef {
    name: String,
    #[serde(rename = "type")]
    type_: String,
}

/// The Workflow backend actually serializes `workflowData.nodes` as an
/// array of `{name, type, ...}` objects, not a map; accept either shape so
/// the map form can also be constructed directly in tests.
impl<'de> Deserialize<'de> for WorkflowData {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Map(BTreeMap<String, String>),
            List(Vec<WireNodeDef>),
        }

        #[derive(Deserialize)]
        struct Wrapper {
            nodes: Repr,
        }

        let wrapper = Wrapper::deserialize(deserializer)?;
        let nodes = match wrapper.nodes {
            Repr::Map(m) => m,
            Repr::List(list) => list.into_iter().map(|n| (n.name, n.type_)).collect(),
        };
        Ok(WorkflowData { nodes })
    }
}

/// Token-usage and sub-execution metadata optionally attached to a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionMetadata {
    /// Raw vendor token-usage payload, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<serde_json::Value>,
    /// Sub-execution reference, if this node delegated to another workflow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_execution: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WireOutputData {
    #[serde(default)]
    main: Vec<Vec<serde_json::Value>>,
}

fn deserialize_main<'de, D>(deserializer: D) -> Result<Vec<Vec<serde_json::Value>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let wrapped = Option::<WireOutputData>::deserialize(deserializer)?;
    Ok(wrapped.map(|w| w.main).unwrap_or_default())
}

fn serialize_main<S>(data: &[Vec<serde_json::Value>], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    #[derive(Serialize)]
    struct Wrapped<'a> {
        main: &'a [Vec<serde_json::Value>],
    }
    Wrapped { main: data }.serialize(serializer)
}

/// One execution of a single workflow node. A node may execute more than
/// once within the same run (e.g. inside a loop).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecution {
    /// Start time, milliseconds since the Unix epoch.
    pub start_time: i64,
    /// Wall-clock duration of this execution, in milliseconds.
    pub execution_time: i64,
    /// `"success"` or `"error"`.
    pub execution_status: String,
    /// Present when the execution failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    /// Upstream node names/branches this execution consumed.
    #[serde(default)]
    pub source: Vec<serde_json::Value>,
    /// Output items, grouped by output branch (wire shape: `data.main[branch][item]`).
    #[serde(default, rename = "data", deserialize_with = "deserialize_main", serialize_with = "serialize_main")]
    pub data: Vec<Vec<serde_json::Value>>,
    /// Raw override of this node's input, when the engine bypassed normal wiring.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_override: Option<serde_json::Value>,
    /// Optional token-usage / sub-execution metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<NodeExecutionMetadata>,
}

/// `resultData.runData`: node name → the list of times it executed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultData {
    /// Keyed by node name.
    pub run_data: BTreeMap<String, Vec<NodeExecution>>,
}

/// A single Workflow-backend execution record, as fetched via
/// `GET /api/v1/executions/{id}?includeData=true` (§6.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    /// Static node-name → type map.
    pub workflow_data: WorkflowData,
    /// Per-node execution history.
    pub result_data: ResultData,
}

fn epoch_ms(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

const DB_FAMILIES: &[&str] = &[
    "postgres", "mysql", "mongodb", "redis", "dynamodb", "sqlite", "mssql", "snowflake",
];

/// Map an external node-type string onto [`NodeType`] via case-insensitive
/// substring precedence (§4.3 step 2).
fn map_node_type(external_type: &str) -> NodeType {
    let t = external_type.to_lowercase();
    if t.contains("trigger") {
        NodeType::Workflow
    } else if t.contains("agent") {
        NodeType::Agent
    } else if t.contains("lmchat") || t.contains("openai") || t.contains("anthropic") {
        NodeType::Llm
    } else if t.contains("httprequest") {
        NodeType::Http
    } else if t.contains("code") || t.contains("function") {
        NodeType::Code
    } else if t.contains("switch") || t.contains("if") {
        NodeType::Conditional
    } else if t.contains("merge") {
        NodeType::Workflow
    } else if DB_FAMILIES.iter().any(|f| t.contains(f)) {
        NodeType::Tool
    } else if t.contains("tool") {
        NodeType::Tool
    } else {
        NodeType::Custom
    }
}

fn map_status(execution: &NodeExecution) -> NodeStatus {
    if execution.error.is_some() {
        return NodeStatus::Failed;
    }
    match execution.execution_status.to_lowercase().as_str() {
        "success" => NodeStatus::Completed,
        "error" => NodeStatus::Failed,
        _ => NodeStatus::Completed,
    }
}

fn first_output_item(execution: &NodeExecution) -> Option<&serde_json::Value> {
    execution.data.iter().flatten().next()
}

fn extract_text_field(item: &serde_json::Value) -> Option<String> {
    for key in ["text", "output", "response"] {
        if let Some(s) = item.get(key).and_then(|v| v.as_str()) {
            return Some(s.to_string());
        }
        if let Some(v) = item.get(key) {
            if v.is_object() || v.is_array() {
                if let Some(s) = v.get("text").and_then(|t| t.as_str()) {
                    return Some(s.to_string());
                }
            }
        }
    }
    None
}

fn build_output_io(execution: &NodeExecution) -> Option<NodeIo> {
    let texts: Vec<String> = execution
        .data
        .iter()
        .flatten()
        .filter_map(extract_text_field)
        .collect();
    if !texts.is_empty() {
        return Some(NodeIo::text(texts.join("\n")));
    }
    first_output_item(execution).map(|item| NodeIo {
        text: None,
        extra_data: Some(item.clone()),
        metadata: None,
    })
}

fn build_input_io(execution: &NodeExecution) -> Option<NodeIo> {
    if let Some(first) = first_output_item(execution) {
        for key in ["chatInput", "action"] {
            if let Some(s) = first.get(key).and_then(|v| v.as_str()) {
                return Some(NodeIo::text(s.to_string()));
            }
        }
    }
    execution.input_override.as_ref().map(|v| NodeIo {
        text: None,
        extra_data: Some(v.clone()),
        metadata: None,
    })
}

fn fresh_id() -> String {
    format!("node_{}", Uuid::new_v4())
}

/// Build the full node list for one [`ExecutionResponse`], sorted ascending
/// by `start_at` (§4.3 step 3). Nodes without a `start_at` sort first,
/// stably, though every Workflow-backend execution carries one in practice.
pub fn build_workflow_nodes(execution: &ExecutionResponse) -> Vec<TraceNode> {
    let mut nodes: Vec<TraceNode> = Vec::new();

    for (node_name, runs) in &execution.result_data.run_data {
        let external_type = execution
            .workflow_data
            .nodes
            .get(node_name)
            .cloned()
            .unwrap_or_default();
        let node_type = map_node_type(&external_type);

        for (run_index, run) in runs.iter().enumerate() {
            let start_at = epoch_ms(run.start_time);
            let end_at = start_at.map(|s| s + chrono::Duration::milliseconds(run.execution_time));
            let duration = Some(run.execution_time as f64 / 1000.0);

            let mut metadata: BTreeMap<String, serde_json::Value> = BTreeMap::new();
            metadata.insert("n8n_node_type".to_string(), serde_json::json!(external_type));
            metadata.insert("run_index".to_string(), serde_json::json!(run_index));
            if let Some(meta) = &run.metadata {
                if let Some(tu) = &meta.token_usage {
                    metadata.insert("token_usage".to_string(), tu.clone());
                }
                if let Some(se) = &meta.sub_execution {
                    metadata.insert("sub_execution".to_string(), se.clone());
                }
            }
            if let Some(err) = &run.error {
                metadata.insert("error".to_string(), err.clone());
            }
            if !run.source.is_empty() {
                metadata.insert("sources".to_string(), serde_json::json!(run.source));
            }

            let data = match (build_input_io(run), build_output_io(run)) {
                (None, None) => None,
                (input, output) => Some(NodeData { input, output }),
            };

            let now = Utc::now();
            nodes.push(TraceNode {
                id: fresh_id(),
                reference_id: Some(node_name.clone()),
                name: node_name.clone(),
                node_type,
                status: map_status(run),
                start_at,
                end_at,
                duration,
                data,
                metadata,
                nodes: vec![],
                logs: vec![],
                created_at: now,
                updated_at: now,
                created_by: None,
                updated_by: None,
            });
        }
    }

    nodes.sort_by(|a, b| match (a.start_at, b.start_at) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(&y),
    });

    nodes
}

/// Scan run-data for nodes whose name case-insensitively contains "chat" or
/// "trigger", returning the first `sessionId` found in their first output
/// item's JSON payload (§4.3 step 4).
pub fn extract_session_id(execution: &ExecutionResponse) -> Option<String> {
    for (node_name, runs) in &execution.result_data.run_data {
        let lname = node_name.to_lowercase();
        if !lname.contains("chat") && !lname.contains("trigger") {
            continue;
        }
        for run in runs {
            if let Some(item) = first_output_item(run) {
                if let Some(sid) = item.get("sessionId").and_then(|v| v.as_str()) {
                    return Some(sid.to_string());
                }
            }
        }
    }
    None
}

use std::collections::{BTreeMap, HashMap};

use obs_core::{NodeData, NodeIo, NodeStatus, NodeType, TraceNode};
use uuid::Uuid;

/// A single item as returned by the Responses backend's conversation-items
/// endpoint (§6.4). Newest-first when received from the backend.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationItem {
    /// Item identity at the external backend.
    pub id: String,
    /// Discriminator: `"message"`, `"workflow_action"`, `"mcp_approval_request"`,
    /// `"mcp_call"`, `"mcp_approval_response"`, `"mcp_list_tools"`, or anything
    /// else (treated as unknown).
    #[serde(rename = "type")]
    pub item_type: String,
    /// Lifecycle status as reported by the backend.
    pub status: Option<String>,
    /// `"user"` or `"assistant"`, for `message` items.
    pub role: Option<String>,
    /// `workflow_action` discriminator, e.g. `"SendActivity"`, `"EndConversation"`.
    pub kind: Option<String>,
    /// May contain `response_id` and `agent` keys.
    pub created_by: BTreeMap<String, serde_json::Value>,
    /// Opaque content list; text pieces are read from `content[*].text`.
    pub content: Vec<serde_json::Value>,
    /// MCP server label, for `mcp_*` items.
    pub server_label: Option<String>,
    /// Tool/approval name.
    pub name: Option<String>,
    /// Tool-call arguments payload.
    pub arguments: Option<serde_json::Value>,
    /// Tool-call output payload.
    pub output: Option<serde_json::Value>,
    /// Groups `mcp_approval_request`/`mcp_approval_response`/`mcp_call` triples.
    pub approval_request_id: Option<String>,
    /// Whether an `mcp_approval_response` approved the paired request.
    pub approve: Option<bool>,
    /// Backend-internal partitioning key, carried through untouched.
    pub partition_key: Option<String>,
}

impl ConversationItem {
    fn response_id(&self) -> Option<&str> {
        self.created_by.get("response_id").and_then(|v| v.as_str())
    }
}

/// Map a Responses-backend status string onto [`NodeStatus`] (§4.2 step 4).
///
/// `completed|failed|cancelled|pending` map to themselves; `running` and
/// `in_progress` both map to `running`; anything empty or unrecognized maps
/// to `completed`. Defined for every possible input string.
fn map_status(status: Option<&str>) -> NodeStatus {
    match status.map(str::to_lowercase).as_deref() {
        Some("completed") => NodeStatus::Completed,
        Some("failed") => NodeStatus::Failed,
        Some("cancelled") => NodeStatus::Cancelled,
        Some("pending") => NodeStatus::Pending,
        Some("running") | Some("in_progress") => NodeStatus::Running,
        _ => NodeStatus::Completed,
    }
}

/// Insert a space before each uppercase run: `"EndConversation"` becomes
/// `"End Conversation"`.
fn humanize_kind(kind: &str) -> String {
    let chars: Vec<char> = kind.chars().collect();
    let mut out = String::with_capacity(kind.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && c.is_uppercase() && !chars[i - 1].is_uppercase() {
            out.push(' ');
        }
        out.push(c);
    }
    out
}

fn content_text(content: &[serde_json::Value]) -> String {
    content
        .iter()
        .filter_map(|v| v.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn fresh_id() -> String {
    format!("node_{}", Uuid::new_v4())
}

/// Build the flat forest of [`TraceNode`]s for a newest-first sequence of
/// [`ConversationItem`]s, per the algorithm in §4.2.
///
/// Deterministic for a fixed input, modulo fresh node-id generation and
/// timestamps.
pub fn build_responses_nodes(items: &[ConversationItem]) -> Vec<TraceNode> {
    let reversed: Vec<&ConversationItem> = items.iter().rev().collect();

    let mut group_by_response: HashMap<&str, Vec<&ConversationItem>> = HashMap::new();
    let mut group_by_approval: HashMap<&str, Vec<&ConversationItem>> = HashMap::new();
    let mut send_activities: HashMap<&str, &ConversationItem> = HashMap::new();

    for item in &reversed {
        if let Some(rid) = item.response_id() {
            group_by_response.entry(rid).or_default().push(item);
        }
        if let Some(aid) = item.approval_request_id.as_deref() {
            group_by_approval.entry(aid).or_default().push(item);
        }
        if item.item_type == "workflow_action"
            && item.kind.as_deref() == Some("SendActivity")
            && item.response_id().is_some()
        {
            send_activities.insert(item.response_id().unwrap(), item);
        }
    }

    let mut roots = Vec::new();
    let mut processed: std::collections::HashSet<&str> = std::collections::HashSet::new();

    for item in &reversed {
        if processed.contains(item.id.as_str()) {
            continue;
        }
        if item.item_type == "mcp_approval_response" {
            // Never a root; consumed by its owning mcp_approval_request group.
            processed.insert(item.id.as_str());
            continue;
        }
        if item.item_type == "mcp_call" {
            if let Some(aid) = item.approval_request_id.as_deref() {
                if group_by_approval
                    .get(aid)
                    .is_some_and(|g| g.iter().any(|i| i.item_type == "mcp_approval_request"))
                {
                    // Consumed as the call leg of an approval group below.
                    continue;
                }
            }
        }
        if let Some(rid) = item.response_id() {
            if let Some(container) = send_activities.get(rid) {
                if container.id != item.id {
                    // Emitted as a descendant of the SendActivity container.
                    continue;
                }
            }
        }

        let node = dispatch(item, &group_by_response, &group_by_approval, &mut processed);
        processed.insert(item.id.as_str());
        roots.push(node);
    }

    roots
}

fn should_skip_as_group_member(
    item: &ConversationItem,
    group_by_approval: &HashMap<&str, Vec<&ConversationItem>>,
) -> bool {
    if item.item_type == "mcp_approval_response" {
        return true;
    }
    if item.item_type == "mcp_call" {
        if let Some(aid) = item.approval_request_id.as_deref() {
            return group_by_approval
                .get(aid)
                .is_some_and(|g| g.iter().any(|i| i.item_type == "mcp_approval_request"));
        }
    }
    false
}

fn dispatch<'a>(
    item: &'a ConversationItem,
    group_by_response: &HashMap<&'a str, Vec<&'a ConversationItem>>,
    group_by_approval: &HashMap<&'a str, Vec<&'a ConversationItem>>,
    processed: &mut std::collections::HashSet<&'a str>,
) -> TraceNode {
    match item.item_type.as_str() {
        "message" => build_message_node(item),
        "workflow_action" if item.kind.as_deref() == Some("SendActivity") && item.response_id().is_some() => {
            build_send_activity_container(item, group_by_response, group_by_approval, processed)
        }
        "workflow_action" => build_workflow_action_node(item),
        "mcp_approval_request" => build_approval_group_node(item, group_by_approval, processed),
        "mcp_call" => build_mcp_call_node(item),
        "mcp_list_tools" => build_mcp_list_tools_node(item),
        _ => build_unknown_node(item),
    }
}

fn now_pair() -> (chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>) {
    let now = chrono::Utc::now();
    (now, now)
}

fn base_node(item: &ConversationItem, name: String, node_type: NodeType, status: NodeStatus) -> TraceNode {
    let (created_at, updated_at) = now_pair();
    TraceNode {
        id: fresh_id(),
        reference_id: Some(item.id.clone()),
        name,
        node_type,
        status,
        start_at: None,
        end_at: None,
        duration: None,
        data: None,
        metadata: BTreeMap::new(),
        nodes: vec![],
        logs: vec![],
        created_at,
        updated_at,
        created_by: None,
        updated_by: None,
    }
}

fn build_message_node(item: &ConversationItem) -> TraceNode {
    let text = content_text(&item.content);
    let (name, data) = match item.role.as_deref() {
        Some("user") => (
            "User Message",
            NodeData {
                input: Some(NodeIo::text(text)),
                output: None,
            },
        ),
        Some("assistant") => (
            "Assistant Response",
            NodeData {
                input: None,
                output: Some(NodeIo::text(text)),
            },
        ),
        _ => (
            "Message",
            NodeData {
                input: None,
                output: Some(NodeIo::text(text)),
            },
        ),
    };
    let mut node = base_node(item, name.to_string(), NodeType::Llm, map_status(item.status.as_deref()));
    node.data = Some(data);
    node
}

fn build_workflow_action_node(item: &ConversationItem) -> TraceNode {
    let name = item
        .kind
        .as_deref()
        .map(humanize_kind)
        .unwrap_or_else(|| "Workflow Action".to_string());
    base_node(item, name, NodeType::Workflow, map_status(item.status.as_deref()))
}

fn build_send_activity_container<'a>(
    item: &'a ConversationItem,
    group_by_response: &HashMap<&'a str, Vec<&'a ConversationItem>>,
    group_by_approval: &HashMap<&'a str, Vec<&'a ConversationItem>>,
    processed: &mut std::collections::HashSet<&'a str>,
) -> TraceNode {
    processed.insert(item.id.as_str());
    let rid = item.response_id().expect("checked by caller");
    let mut node = base_node(item, "SendActivity".to_string(), NodeType::Workflow, map_status(item.status.as_deref()));
    if let Some(members) = group_by_response.get(rid) {
        for child in members {
            if child.id == item.id {
                continue;
            }
            if processed.contains(child.id.as_str()) {
                continue;
            }
            if should_skip_as_group_member(child, group_by_approval) {
                continue;
            }
            let child_node = dispatch(child, group_by_response, group_by_approval, processed);
            processed.insert(child.id.as_str());
            node.nodes.push(child_node);
        }
    }
    node
}

fn build_approval_group_node<'a>(
    item: &'a ConversationItem,
    group_by_approval: &HashMap<&'a str, Vec<&'a ConversationItem>>,
    processed: &mut std::collections::HashSet<&'a str>,
) -> TraceNode {
    let aid = item.approval_request_id.as_deref().unwrap_or_default();
    let group = group_by_approval.get(aid);
    let response = group.and_then(|g| g.iter().find(|i| i.item_type == "mcp_approval_response").copied());
    let call = group.and_then(|g| g.iter().find(|i| i.item_type == "mcp_call").copied());

    let name = item.name.clone().unwrap_or_else(|| "Approval Request".to_string());
    let status = match response {
        Some(r) if r.approve == Some(false) => NodeStatus::Cancelled,
        Some(_) => NodeStatus::Completed,
        None => map_status(item.status.as_deref()),
    };
    let mut node = base_node(item, name, NodeType::Tool, status);

    node.nodes.push(base_node(
        item,
        "Approval Request".to_string(),
        NodeType::Tool,
        map_status(item.status.as_deref()),
    ));
    processed.insert(item.id.as_str());

    if let Some(r) = response {
        let mut response_node = base_node(
            r,
            "Approval Response".to_string(),
            NodeType::Tool,
            if r.approve == Some(false) {
                NodeStatus::Cancelled
            } else {
                NodeStatus::Completed
            },
        );
        response_node.data = Some(NodeData {
            input: None,
            output: Some(NodeIo::text(r.approve.unwrap_or(false).to_string())),
        });
        node.nodes.push(response_node);
        processed.insert(r.id.as_str());
    }
    if let Some(c) = call {
        node.nodes.push(build_mcp_call_node(c));
        processed.insert(c.id.as_str());
    }
    node
}

fn build_mcp_call_node(item: &ConversationItem) -> TraceNode {
    let name = item.name.clone().unwrap_or_else(|| "Tool Call".to_string());
    let mut node = base_node(item, name, NodeType::Tool, map_status(item.status.as_deref()));
    let input = item.arguments.as_ref().map(|a| NodeIo {
        text: None,
        extra_data: Some(a.clone()),
        metadata: None,
    });
    let output = item.output.as_ref().map(|o| NodeIo {
        text: None,
        extra_data: Some(o.clone()),
        metadata: None,
    });
    if input.is_some() || output.is_some() {
        node.data = Some(NodeData { input, output });
    }
    node
}

fn build_mcp_list_tools_node(item: &ConversationItem) -> TraceNode {
    let name = item.name.clone().unwrap_or_else(|| "List Tools".to_string());
    let mut node = base_node(item, name, NodeType::Tool, map_status(item.status.as_deref()));
    let text = serde_json::to_string(&item.content).unwrap_or_default();
    node.data = Some(NodeData {
        input: None,
        output: Some(NodeIo::text(text)),
    });
    node
}

fn build_unknown_node(item: &ConversationItem) -> TraceNode {
    let name = format!("Unknown: {}", item.item_type);
    let mut node = base_node(item, name, NodeType::Custom, map_status(item.status.as_deref()));
    let text = serde_json::to_string(item).unwrap_or_default();
    node.data = Some(NodeData {
        input: Some(NodeIo::text(text)),
        output: None,
    });
    node
}

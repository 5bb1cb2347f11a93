// SPDX-License-Identifier: MIT OR Apache-2.0
//! Trace CRUD, listing, and import HTTP handlers (§6.1).

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use obs_core::{Trace, TraceBuilder, TraceContext, TraceNode};
use obs_error::{ErrorKind, ObsError};
use obs_import::{ImportContext, ImportRequest};
use obs_store::ListOpts;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{ApiError, AppState};

/// Response body shared by every endpoint that only needs to echo an id.
#[derive(Debug, Serialize)]
pub struct IdResponse {
    /// The trace id created, found, or re-imported.
    pub id: String,
}

// ---------------------------------------------------------------------------
// POST /tenants/{tenant}/traces
// ---------------------------------------------------------------------------

/// Body for `POST /tenants/{tenant}/traces`.
#[derive(Debug, Deserialize)]
pub struct CreateTraceRequest {
    /// Set together with `conversation_id` for conversation-context traces.
    #[serde(default)]
    pub application_id: Option<String>,
    /// Set together with `application_id` for conversation-context traces.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Set for autonomous-agent-context traces.
    #[serde(default)]
    pub autonomous_agent_id: Option<String>,
    /// External-system identity.
    #[serde(default)]
    pub reference_id: Option<String>,
    /// Human-readable name of the external reference.
    #[serde(default)]
    pub reference_name: Option<String>,
    /// Free-form provenance about the external reference.
    #[serde(default)]
    pub reference_metadata: BTreeMap<String, Value>,
    /// Initial ordered log lines.
    #[serde(default)]
    pub logs: Vec<String>,
    /// Initial root nodes.
    #[serde(default)]
    pub nodes: Vec<TraceNode>,
    /// Identity creating the trace.
    #[serde(default)]
    pub created_by: Option<String>,
}

/// `POST /tenants/{tenant}/traces` — create a trace, rejecting a duplicate
/// conversation with 409.
pub async fn create_trace(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
    Json(body): Json<CreateTraceRequest>,
) -> Result<(StatusCode, Json<IdResponse>), ApiError> {
    if let Some(conversation_id) = &body.conversation_id {
        if state.trace_store.get_by_conversation(&tenant, conversation_id).await?.is_some() {
            return Err(ObsError::conflict(format!("trace already exists for conversation {conversation_id}")).into());
        }
    }

    let mut builder = TraceBuilder::new(format!("trace_{}", Uuid::new_v4()), tenant);
    builder = match (&body.application_id, &body.conversation_id, &body.autonomous_agent_id) {
        (Some(app), Some(conv), None) => builder.conversation(app.clone(), conv.clone()),
        (None, None, Some(agent)) => builder.autonomous_agent(agent.clone()),
        _ => {
            return Err(ObsError::validation(
                "exactly one of (application_id + conversation_id) or autonomous_agent_id must be set",
            )
            .into());
        }
    };
    if let Some(reference_id) = body.reference_id {
        builder = builder.reference_id(reference_id);
    }
    if let Some(reference_name) = body.reference_name {
        builder = builder.reference_name(reference_name);
    }
    builder = builder.reference_metadata(body.reference_metadata).logs(body.logs).nodes(body.nodes);
    if let Some(created_by) = body.created_by {
        builder = builder.created_by(created_by);
    }

    let trace = builder.build();
    trace.validate()?;
    let created = state.trace_store.create(trace).await?;
    Ok((StatusCode::CREATED, Json(IdResponse { id: created.id })))
}

// ---------------------------------------------------------------------------
// GET/DELETE /tenants/{tenant}/traces/{id}
// ---------------------------------------------------------------------------

/// `GET /tenants/{tenant}/traces/{id}`.
pub async fn get_trace(
    State(state): State<Arc<AppState>>,
    Path((tenant, id)): Path<(String, String)>,
) -> Result<Json<Trace>, ApiError> {
    let trace = state
        .trace_store
        .get(&tenant, &id)
        .await?
        .ok_or_else(|| ObsError::not_found(format!("trace {id} not found")))?;
    Ok(Json(trace))
}

/// `DELETE /tenants/{tenant}/traces/{id}`.
pub async fn delete_trace(
    State(state): State<Arc<AppState>>,
    Path((tenant, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.trace_store.delete(&tenant, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// POST /tenants/{tenant}/traces/{id}/nodes, /logs
// ---------------------------------------------------------------------------

/// Body for `POST /tenants/{tenant}/traces/{id}/nodes`.
#[derive(Debug, Deserialize)]
pub struct AddNodesRequest {
    /// Root nodes to append, in emission order.
    pub nodes: Vec<TraceNode>,
}

/// `POST /tenants/{tenant}/traces/{id}/nodes` — append root nodes.
pub async fn add_nodes(
    State(state): State<Arc<AppState>>,
    Path((tenant, id)): Path<(String, String)>,
    Json(body): Json<AddNodesRequest>,
) -> Result<StatusCode, ApiError> {
    for node in &body.nodes {
        node.validate()?;
    }
    state.trace_store.add_nodes(&tenant, &id, body.nodes).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Body for `POST /tenants/{tenant}/traces/{id}/logs`.
#[derive(Debug, Deserialize)]
pub struct AddLogsRequest {
    /// Log lines to append, in order.
    pub logs: Vec<String>,
}

/// `POST /tenants/{tenant}/traces/{id}/logs` — append log lines.
pub async fn add_logs(
    State(state): State<Arc<AppState>>,
    Path((tenant, id)): Path<(String, String)>,
    Json(body): Json<AddLogsRequest>,
) -> Result<StatusCode, ApiError> {
    state.trace_store.add_logs(&tenant, &id, body.logs).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// GET/PUT /tenants/{tenant}/conversations/{conversation}/traces
// ---------------------------------------------------------------------------

/// `GET /tenants/{tenant}/conversations/{conversation}/traces`.
pub async fn list_conversation_traces(
    State(state): State<Arc<AppState>>,
    Path((tenant, conversation)): Path<(String, String)>,
) -> Result<Json<Vec<Trace>>, ApiError> {
    let traces = state.trace_store.list_by_conversation(&tenant, &conversation).await?;
    Ok(Json(traces))
}

/// Body for `PUT /tenants/{tenant}/conversations/{conversation}/traces`.
#[derive(Debug, Deserialize)]
pub struct RefreshConversationTraceRequest {
    /// Replacement external-system identity.
    #[serde(default)]
    pub reference_id: Option<String>,
    /// Replacement reference display name.
    #[serde(default)]
    pub reference_name: Option<String>,
    /// Replacement reference metadata.
    #[serde(default)]
    pub reference_metadata: BTreeMap<String, Value>,
    /// Replacement log lines.
    #[serde(default)]
    pub logs: Vec<String>,
    /// Replacement root nodes.
    #[serde(default)]
    pub nodes: Vec<TraceNode>,
    /// Identity performing the refresh.
    #[serde(default)]
    pub updated_by: Option<String>,
}

/// `PUT /tenants/{tenant}/conversations/{conversation}/traces` — fully
/// replaces `reference_id`/`reference_name`/`reference_metadata`, `logs`,
/// and `nodes` on the conversation's trace in place.
pub async fn refresh_conversation_trace(
    State(state): State<Arc<AppState>>,
    Path((tenant, conversation)): Path<(String, String)>,
    Json(body): Json<RefreshConversationTraceRequest>,
) -> Result<Json<Trace>, ApiError> {
    let mut trace = state
        .trace_store
        .get_by_conversation(&tenant, &conversation)
        .await?
        .ok_or_else(|| ObsError::not_found(format!("no trace for conversation {conversation}")))?;

    trace.reference_id = body.reference_id;
    trace.reference_name = body.reference_name;
    trace.reference_metadata = body.reference_metadata;
    trace.logs = body.logs;
    trace.nodes = body.nodes;
    trace.updated_at = Utc::now();
    trace.updated_by = body.updated_by;
    trace.validate()?;

    let updated = state.trace_store.update(trace).await?;
    Ok(Json(updated))
}

// ---------------------------------------------------------------------------
// GET /tenants/{tenant}/autonomous-agents/traces
// ---------------------------------------------------------------------------

/// Query parameters for `GET /tenants/{tenant}/autonomous-agents/traces`.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Number of matching traces to skip.
    #[serde(default)]
    pub skip: usize,
    /// Maximum number of traces to return.
    #[serde(default)]
    pub limit: Option<usize>,
}

fn paginate(mut items: Vec<Trace>, skip: usize, limit: Option<usize>) -> Vec<Trace> {
    if skip >= items.len() {
        return Vec::new();
    }
    items.drain(0..skip);
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
}

/// `GET /tenants/{tenant}/autonomous-agents/traces` — paginated list of
/// every autonomous-agent-context trace for the tenant.
pub async fn list_autonomous_agent_traces(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Trace>>, ApiError> {
    let all = state.trace_store.list(&tenant, ListOpts::default()).await?;
    let agent_traces: Vec<Trace> = all.into_iter().filter(|t| t.context_type == TraceContext::AutonomousAgent).collect();
    Ok(Json(paginate(agent_traces, page.skip, page.limit)))
}

// ---------------------------------------------------------------------------
// PUT /tenants/{tenant}/autonomous-agents/{agent}/traces/import[/refresh]
// ---------------------------------------------------------------------------

/// Body shared by the autonomous-agent import and import-refresh endpoints.
#[derive(Debug, Deserialize)]
pub struct ImportAutonomousAgentRequest {
    /// Registered importer kind (`"responses"` or `"workflow"`).
    pub kind: String,
    /// External-system identity used to find a prior import of this agent
    /// run, when present. Ignored by the refresh endpoint, which already
    /// knows the trace id from the path.
    #[serde(default)]
    pub reference_id: Option<String>,
    /// Log lines to attach.
    #[serde(default)]
    pub logs: Vec<String>,
    /// Identity performing the import.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Importer-specific configuration (endpoint, credentials, …).
    #[serde(default)]
    pub backend_config: BTreeMap<String, Value>,
}

/// `PUT /tenants/{tenant}/autonomous-agents/{agent}/traces/import` —
/// synchronous import. Pre-resolves an existing trace by `reference_id`
/// (the importer-internal upsert policy only resolves by trace-id hint or
/// conversation id, neither of which apply to a fresh autonomous-agent
/// import) so the response status can distinguish create from upsert.
pub async fn import_autonomous_agent_trace(
    State(state): State<Arc<AppState>>,
    Path((tenant, agent)): Path<(String, String)>,
    Json(body): Json<ImportAutonomousAgentRequest>,
) -> Result<(StatusCode, Json<IdResponse>), ApiError> {
    let existing_trace_id = match &body.reference_id {
        Some(reference_id) => state
            .trace_store
            .get_by_reference_id(&tenant, reference_id)
            .await?
            .map(|t| t.id),
        None => None,
    };
    let status = if existing_trace_id.is_some() { StatusCode::OK } else { StatusCode::CREATED };

    let req = ImportRequest {
        tenant_id: tenant,
        conversation_id: None,
        application_id: None,
        autonomous_agent_id: Some(agent),
        logs: body.logs,
        user_id: body.user_id,
        existing_trace_id,
        backend_config: body.backend_config,
    };
    let id = state.import_service.import(&body.kind, &ImportContext::default(), &req).await?;
    Ok((status, Json(IdResponse { id })))
}

/// `PUT /tenants/{tenant}/autonomous-agents/{agent}/traces/{id}/import/refresh`
/// — revalidates that `id` belongs to `agent`, then re-imports into the same
/// trace id.
pub async fn refresh_autonomous_agent_trace(
    State(state): State<Arc<AppState>>,
    Path((tenant, agent, id)): Path<(String, String, String)>,
    Json(body): Json<ImportAutonomousAgentRequest>,
) -> Result<Json<IdResponse>, ApiError> {
    let trace = state
        .trace_store
        .get(&tenant, &id)
        .await?
        .ok_or_else(|| ObsError::not_found(format!("trace {id} not found")))?;
    if trace.autonomous_agent_id.as_deref() != Some(agent.as_str()) {
        return Err(ObsError::new(ErrorKind::Forbidden, format!("trace {id} does not belong to agent {agent}")).into());
    }

    let req = ImportRequest {
        tenant_id: tenant,
        conversation_id: None,
        application_id: None,
        autonomous_agent_id: Some(agent),
        logs: body.logs,
        user_id: body.user_id,
        existing_trace_id: Some(id),
        backend_config: body.backend_config,
    };
    let id = state.import_service.import(&body.kind, &ImportContext::default(), &req).await?;
    Ok(Json(IdResponse { id }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use obs_cache::{ChaChaCipher, InMemoryByteCache, SessionCache};
    use obs_config::CoreConfig;
    use obs_import::ImporterRegistry;
    use obs_platform_client::PlatformConfigClient;
    use obs_store::memory::{InMemoryMessageStore, InMemoryTraceStore};
    use std::sync::Arc;

    fn state() -> Arc<AppState> {
        Arc::new(AppState {
            trace_store: Arc::new(InMemoryTraceStore::new()),
            message_store: Arc::new(InMemoryMessageStore::new()),
            import_service: Arc::new(obs_import::ImportService::new(Arc::new(ImporterRegistry::new()), 16, 1)),
            session_cache: Arc::new(SessionCache::new(InMemoryByteCache::new(), ChaChaCipher::new(&[7u8; 32]))),
            platform_client: Arc::new(PlatformConfigClient::new("http://localhost", "tok", "svc", "key")),
            responses_stream_client: None,
            workflow_stream_client: None,
            config: Arc::new(CoreConfig::default()),
        })
    }

    #[tokio::test]
    async fn create_and_fetch_conversation_trace() {
        let state = state();
        let (status, Json(created)) = create_trace(
            State(Arc::clone(&state)),
            Path("tenant_a".to_string()),
            Json(CreateTraceRequest {
                application_id: Some("app_1".to_string()),
                conversation_id: Some("conv_1".to_string()),
                autonomous_agent_id: None,
                reference_id: None,
                reference_name: None,
                reference_metadata: BTreeMap::new(),
                logs: vec![],
                nodes: vec![],
                created_by: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let Json(fetched) = get_trace(State(state), Path(("tenant_a".to_string(), created.id.clone()))).await.unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.conversation_id.as_deref(), Some("conv_1"));
    }

    #[tokio::test]
    async fn create_trace_rejects_duplicate_conversation() {
        let state = state();
        let body = || CreateTraceRequest {
            application_id: Some("app_1".to_string()),
            conversation_id: Some("conv_1".to_string()),
            autonomous_agent_id: None,
            reference_id: None,
            reference_name: None,
            reference_metadata: BTreeMap::new(),
            logs: vec![],
            nodes: vec![],
            created_by: None,
        };
        create_trace(State(Arc::clone(&state)), Path("tenant_a".to_string()), Json(body())).await.unwrap();
        let err = create_trace(State(state), Path("tenant_a".to_string()), Json(body())).await.unwrap_err();
        assert_eq!(err.0.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn create_trace_rejects_mixed_context() {
        let state = state();
        let err = create_trace(
            State(state),
            Path("tenant_a".to_string()),
            Json(CreateTraceRequest {
                application_id: Some("app_1".to_string()),
                conversation_id: Some("conv_1".to_string()),
                autonomous_agent_id: Some("agent_1".to_string()),
                reference_id: None,
                reference_name: None,
                reference_metadata: BTreeMap::new(),
                logs: vec![],
                nodes: vec![],
                created_by: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn refresh_conversation_trace_replaces_fields_and_bumps_updated_at() {
        let state = state();
        let (_, Json(created)) = create_trace(
            State(Arc::clone(&state)),
            Path("tenant_a".to_string()),
            Json(CreateTraceRequest {
                application_id: Some("app_1".to_string()),
                conversation_id: Some("conv_1".to_string()),
                autonomous_agent_id: None,
                reference_id: None,
                reference_name: None,
                reference_metadata: BTreeMap::new(),
                logs: vec!["first".to_string()],
                nodes: vec![],
                created_by: None,
            }),
        )
        .await
        .unwrap();

        let Json(refreshed) = refresh_conversation_trace(
            State(Arc::clone(&state)),
            Path(("tenant_a".to_string(), "conv_1".to_string())),
            Json(RefreshConversationTraceRequest {
                reference_id: Some("ext-1".to_string()),
                reference_name: None,
                reference_metadata: BTreeMap::new(),
                logs: vec!["second".to_string()],
                nodes: vec![],
                updated_by: Some("svc".to_string()),
            }),
        )
        .await
        .unwrap();

        assert_eq!(refreshed.id, created.id);
        assert_eq!(refreshed.logs, vec!["second".to_string()]);
        assert_eq!(refreshed.reference_id.as_deref(), Some("ext-1"));
        assert!(refreshed.updated_at >= refreshed.created_at);
    }

    #[tokio::test]
    async fn get_missing_trace_is_not_found() {
        let state = state();
        let err = get_trace(State(state), Path(("tenant_a".to_string(), "nope".to_string()))).await.unwrap_err();
        assert_eq!(err.0.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn list_autonomous_agent_traces_excludes_conversation_traces() {
        let state = state();
        create_trace(
            State(Arc::clone(&state)),
            Path("tenant_a".to_string()),
            Json(CreateTraceRequest {
                application_id: Some("app_1".to_string()),
                conversation_id: Some("conv_1".to_string()),
                autonomous_agent_id: None,
                reference_id: None,
                reference_name: None,
                reference_metadata: BTreeMap::new(),
                logs: vec![],
                nodes: vec![],
                created_by: None,
            }),
        )
        .await
        .unwrap();
        create_trace(
            State(Arc::clone(&state)),
            Path("tenant_a".to_string()),
            Json(CreateTraceRequest {
                application_id: None,
                conversation_id: None,
                autonomous_agent_id: Some("agent_1".to_string()),
                reference_id: None,
                reference_name: None,
                reference_metadata: BTreeMap::new(),
                logs: vec![],
                nodes: vec![],
                created_by: None,
            }),
        )
        .await
        .unwrap();

        let Json(agent_traces) = list_autonomous_agent_traces(
            State(state),
            Path("tenant_a".to_string()),
            Query(PageQuery { skip: 0, limit: None }),
        )
        .await
        .unwrap();
        assert_eq!(agent_traces.len(), 1);
        assert_eq!(agent_traces[0].autonomous_agent_id.as_deref(), Some("agent_1"));
    }

    #[tokio::test]
    async fn import_autonomous_agent_trace_without_registered_importer_is_not_found() {
        let state = state();
        let err = import_autonomous_agent_trace(
            State(state),
            Path(("tenant_a".to_string(), "agent_1".to_string())),
            Json(ImportAutonomousAgentRequest {
                kind: "responses".to_string(),
                reference_id: None,
                logs: vec![],
                user_id: None,
                backend_config: BTreeMap::new(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn refresh_autonomous_agent_trace_rejects_mismatched_owner() {
        let state = state();
        let (_, Json(created)) = create_trace(
            State(Arc::clone(&state)),
            Path("tenant_a".to_string()),
            Json(CreateTraceRequest {
                application_id: None,
                conversation_id: None,
                autonomous_agent_id: Some("agent_1".to_string()),
                reference_id: None,
                reference_name: None,
                reference_metadata: BTreeMap::new(),
                logs: vec![],
                nodes: vec![],
                created_by: None,
            }),
        )
        .await
        .unwrap();

        let err = refresh_autonomous_agent_trace(
            State(state),
            Path(("tenant_a".to_string(), "agent_2".to_string(), created.id)),
            Json(ImportAutonomousAgentRequest {
                kind: "responses".to_string(),
                reference_id: None,
                logs: vec![],
                user_id: None,
                backend_config: BTreeMap::new(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0.kind, ErrorKind::Forbidden);
    }
}

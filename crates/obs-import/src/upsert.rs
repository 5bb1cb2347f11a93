//! Shared upsert policy (§4.4): every backend importer resolves an existing
//! trace the same way before replacing or creating it.

use std::collections::BTreeMap;

use chrono::Utc;
use obs_core::{Trace, TraceContext, TraceNode};
use obs_error::ObsError;
use obs_store::TraceStore;
use uuid::Uuid;

use crate::ImportRequest;

/// Fields a builder derives from the external backend, independent of the
/// upsert policy itself.
pub struct BuiltTrace {
    /// External-system identity (conversation id, execution id, …).
    pub reference_id: Option<String>,
    /// Human-readable name of the external reference.
    pub reference_name: Option<String>,
    /// Free-form provenance about the external reference.
    pub reference_metadata: BTreeMap<String, serde_json::Value>,
    /// Root trace nodes produced by the hierarchical builder.
    pub nodes: Vec<TraceNode>,
}

/// Resolves an existing trace per §4.4's three-step lookup order and either
/// updates it in place or creates a new one, returning the trace id.
pub async fn upsert_trace(
    store: &dyn TraceStore,
    req: &ImportRequest,
    built: BuiltTrace,
) -> Result<String, ObsError> {
    let now = Utc::now();

    if let Some(existing_id) = &req.existing_trace_id {
        if let Some(mut trace) = store.get(&req.tenant_id, existing_id).await? {
            apply_built(&mut trace, req, built, now);
            trace.validate()?;
            let updated = store.update(trace).await?;
            return Ok(updated.id);
        }
    }

    if let Some(conversation_id) = &req.conversation_id {
        if let Some(mut trace) = store.get_by_conversation(&req.tenant_id, conversation_id).await? {
            apply_built(&mut trace, req, built, now);
            trace.validate()?;
            let updated = store.update(trace).await?;
            return Ok(updated.id);
        }
    }

    let context_type = Trace::infer_context(&req.application_id, &req.conversation_id, &req.autonomous_agent_id)
        .ok_or_else(|| ObsError::validation("exactly one of (applicationId+conversationId) or autonomousAgentId must be set"))?;

    let trace = Trace {
        id: format!("trace_{}", Uuid::new_v4()),
        tenant_id: req.tenant_id.clone(),
        context_type,
        application_id: req.application_id.clone(),
        conversation_id: req.conversation_id.clone(),
        autonomous_agent_id: req.autonomous_agent_id.clone(),
        reference_id: built.reference_id,
        reference_name: built.reference_name,
        reference_metadata: built.reference_metadata,
        logs: req.logs.clone(),
        nodes: built.nodes,
        created_at: now,
        updated_at: now,
        created_by: req.user_id.clone(),
        updated_by: req.user_id.clone(),
    };
    trace.validate()?;
    let created = store.create(trace).await?;
    Ok(created.id)
}

fn apply_built(trace: &mut Trace, req: &ImportRequest, built: BuiltTrace, now: chrono::DateTime<Utc>) {
    trace.reference_id = built.reference_id;
    trace.reference_name = built.reference_name;
    trace.reference_metadata = built.reference_metadata;
    trace.logs = req.logs.clone();
    trace.nodes = built.nodes;
    trace.updated_at = now;
    trace.updated_by = req.user_id.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use obs_store::memory::InMemoryTraceStore;

    fn req(tenant: &str, conversation: Option<&str>) -> ImportRequest {
        ImportRequest {
            tenant_id: tenant.to_string(),
            conversation_id: conversation.map(str::to_string),
            application_id: conversation.map(|_| "app".to_string()),
            autonomous_agent_id: None,
            logs: vec!["started".to_string()],
            user_id: Some("user_1".to_string()),
            existing_trace_id: None,
            backend_config: BTreeMap::new(),
        }
    }

    fn built() -> BuiltTrace {
        BuiltTrace {
            reference_id: Some("ext_1".to_string()),
            reference_name: Some("conversation".to_string()),
            reference_metadata: BTreeMap::new(),
            nodes: vec![],
        }
    }

    #[tokio::test]
    async fn creates_new_trace_when_nothing_matches() {
        let store = InMemoryTraceStore::new();
        let id = upsert_trace(&store, &req("t1", Some("conv_1")), built()).await.unwrap();
        assert!(id.starts_with("trace_"));
        let trace = store.get("t1", &id).await.unwrap().unwrap();
        assert_eq!(trace.context_type, TraceContext::Conversation);
    }

    #[tokio::test]
    async fn second_import_for_same_conversation_updates_in_place() {
        let store = InMemoryTraceStore::new();
        let first = upsert_trace(&store, &req("t1", Some("conv_1")), built()).await.unwrap();
        let second = upsert_trace(&store, &req("t1", Some("conv_1")), built()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn existing_trace_id_hint_preserves_id_even_without_conversation_match() {
        let store = InMemoryTraceStore::new();
        let id = upsert_trace(&store, &req("t1", Some("conv_1")), built()).await.unwrap();

        let mut refresh_req = req("t1", Some("conv_1"));
        refresh_req.existing_trace_id = Some(id.clone());
        let refreshed = upsert_trace(&store, &refresh_req, built()).await.unwrap();
        assert_eq!(refreshed, id);

        let trace = store.get("t1", &id).await.unwrap().unwrap();
        assert!(trace.updated_at >= trace.created_at);
    }

    #[tokio::test]
    async fn ambiguous_context_is_a_validation_error() {
        let store = InMemoryTraceStore::new();
        let mut ambiguous = req("t1", None);
        ambiguous.application_id = None;
        let err = upsert_trace(&store, &ambiguous, built()).await.unwrap_err();
        assert_eq!(err.kind, obs_error::ErrorKind::Validation);
    }
}

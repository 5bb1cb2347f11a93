//! Importer for the Workflow backend (C2b + C5 wired into the upsert policy).

use obs_backend::WorkflowBackendClient;
use obs_error::ObsError;
use obs_store::TraceStore;
use std::sync::Arc;

use crate::upsert::{upsert_trace, BuiltTrace};
use crate::{ImportContext, ImportRequest, Importer};

/// Configuration keys this importer reads from `ImportRequest.backend_config`.
pub mod config_keys {
    /// Execution id at the Workflow backend.
    pub const EXECUTION_ID: &str = "executionId";
    /// Workflow backend base URL, e.g. `https://host`.
    pub const BASE_URL: &str = "baseUrl";
    /// `X-N8N-API-KEY` value.
    pub const API_KEY: &str = "apiKey";
}

fn config_str(req: &ImportRequest, key: &str) -> Result<String, ObsError> {
    req.backend_config
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ObsError::validation(format!("backendConfig.{key} is required")))
}

/// Fetches an execution record from the Workflow backend, builds trace
/// nodes, and upserts a trace.
pub struct WorkflowImporter {
    store: Arc<dyn TraceStore>,
}

impl WorkflowImporter {
    /// Constructs an importer backed by `store`.
    #[must_use]
    pub fn new(store: Arc<dyn TraceStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Importer for WorkflowImporter {
    fn kind(&self) -> &str {
        "workflow"
    }

    async fn import(&self, ctx: &ImportContext, req: &ImportRequest) -> Result<String, ObsError> {
        let execution_id = config_str(req, config_keys::EXECUTION_ID)?;
        let base_url = config_str(req, config_keys::BASE_URL)?;
        let api_key = config_str(req, config_keys::API_KEY)?;

        let client = WorkflowBackendClient::new(base_url, api_key);
        let execution = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                return Err(ObsError::new(obs_error::ErrorKind::Timeout, "import cancelled during fetch"));
            }
            result = client.fetch_execution(&execution_id) => result?,
        };

        let nodes = obs_trace_build::build_workflow_nodes(&execution);
        let session_id = obs_trace_build::extract_session_id(&execution);

        upsert_trace(
            self.store.as_ref(),
            req,
            BuiltTrace {
                reference_id: Some(execution_id),
                reference_name: session_id,
                reference_metadata: Default::default(),
                nodes,
            },
        )
        .await
    }
}

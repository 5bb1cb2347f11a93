//! Importer for the Responses backend (C2a + C5 wired into the upsert policy).

use obs_backend::ResponsesBackendClient;
use obs_error::ObsError;
use obs_store::TraceStore;
use std::sync::Arc;

use crate::upsert::{upsert_trace, BuiltTrace};
use crate::{ImportContext, ImportRequest, Importer};

/// Configuration keys this importer reads from `ImportRequest.backend_config`.
pub mod config_keys {
    /// External conversation id at the Responses backend.
    pub const EXTERNAL_CONVERSATION_ID: &str = "externalConversationId";
    /// Responses backend endpoint, e.g. `https://host`.
    pub const ENDPOINT: &str = "endpoint";
    /// `api-version` query parameter value.
    pub const API_VERSION: &str = "apiVersion";
    /// Bearer token for the Responses backend.
    pub const BEARER_TOKEN: &str = "bearerToken";
}

fn config_str(req: &ImportRequest, key: &str) -> Result<String, ObsError> {
    req.backend_config
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ObsError::validation(format!("backendConfig.{key} is required")))
}

/// Fetches conversation items from the Responses backend, builds trace
/// nodes, and upserts a trace.
pub struct ResponsesImporter {
    store: Arc<dyn TraceStore>,
}

impl ResponsesImporter {
    /// Constructs an importer backed by `store`.
    #[must_use]
    pub fn new(store: Arc<dyn TraceStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Importer for ResponsesImporter {
    fn kind(&self) -> &str {
        "responses"
    }

    async fn import(&self, ctx: &ImportContext, req: &ImportRequest) -> Result<String, ObsError> {
        let external_conversation_id = config_str(req, config_keys::EXTERNAL_CONVERSATION_ID)?;
        let endpoint = config_str(req, config_keys::ENDPOINT)?;
        let api_version = config_str(req, config_keys::API_VERSION)?;
        let bearer_token = config_str(req, config_keys::BEARER_TOKEN)?;

        let client = ResponsesBackendClient::new(endpoint, api_version, bearer_token);
        let items = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                return Err(ObsError::new(obs_error::ErrorKind::Timeout, "import cancelled during fetch"));
            }
            result = client.fetch_conversation_items(&external_conversation_id) => result?,
        };
        let nodes = obs_trace_build::build_responses_nodes(&items);

        upsert_trace(
            self.store.as_ref(),
            req,
            BuiltTrace {
                reference_id: Some(external_conversation_id),
                reference_name: None,
                reference_metadata: Default::default(),
                nodes,
            },
        )
        .await
    }
}

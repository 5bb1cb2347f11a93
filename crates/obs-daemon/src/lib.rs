// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP control-plane daemon wiring the observability core into a single
//! process (§4.11).
//!
//! [`AppState`] holds every collaborator the handlers need: the document
//! store, the importer registry's [`ImportService`] (which constructs its
//! own backend fetchers per import from `backend_config`), the encrypted
//! session cache, the platform-config client, and the streaming backend
//! clients used by the live invocation endpoint. [`build_app`] wires them
//! behind a shared `Arc` into a single axum [`Router`].
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Trace/message CRUD and import handlers (§6.1).
pub mod api;
/// Request-id and request-logging middleware.
pub mod middleware;
/// Streaming agent-invocation endpoint (§4.6, §6.2).
pub mod stream;

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::Router;
use chrono::Utc;
use obs_cache::{ChaChaCipher, InMemoryByteCache, SessionCache};
use obs_config::CoreConfig;
use obs_error::ObsError;
use obs_import::ImportService;
use obs_platform_client::PlatformConfigClient;
use obs_stream::{ResponsesStreamClient, WorkflowStreamClient};
use obs_store::{MessageStore, TraceStore};
use serde_json::json;

/// Shared state handed to every handler behind an `Arc`.
pub struct AppState {
    /// Abstract trace repository (§4.8).
    pub trace_store: Arc<dyn TraceStore>,
    /// Abstract message repository (§4.8).
    pub message_store: Arc<dyn MessageStore>,
    /// Importer dispatch, synchronous and queued (§4.4, §4.5).
    pub import_service: Arc<ImportService>,
    /// Encrypted per-conversation session cache (§4.7).
    pub session_cache: Arc<SessionCache<InMemoryByteCache, ChaChaCipher>>,
    /// Typed client for the platform-configuration service (§6.3).
    pub platform_client: Arc<PlatformConfigClient>,
    /// Responses-backend SSE client for the live invocation endpoint, if configured.
    pub responses_stream_client: Option<Arc<ResponsesStreamClient>>,
    /// Workflow-backend line-delimited-JSON client for the live invocation endpoint, if configured.
    pub workflow_stream_client: Option<Arc<WorkflowStreamClient>>,
    /// Effective, validated configuration this process booted with.
    pub config: Arc<CoreConfig>,
}

/// Maps an [`ObsError`] to its wire representation and HTTP status (§7).
#[derive(Debug)]
pub struct ApiError(pub ObsError);

impl From<ObsError> for ApiError {
    fn from(err: ObsError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = axum::http::StatusCode::from_u16(self.0.http_status()).unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.to_response())).into_response()
    }
}

/// Builds the axum router for every endpoint in §6.1 plus the streaming
/// invocation endpoint of §6.2, behind request-id and request-logging
/// middleware.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(cmd_health))
        .route("/tenants/{tenant}/traces", post(api::create_trace))
        .route(
            "/tenants/{tenant}/traces/{id}",
            get(api::get_trace).delete(api::delete_trace),
        )
        .route("/tenants/{tenant}/traces/{id}/nodes", post(api::add_nodes))
        .route("/tenants/{tenant}/traces/{id}/logs", post(api::add_logs))
        .route(
            "/tenants/{tenant}/conversations/{conversation}/traces",
            get(api::list_conversation_traces).put(api::refresh_conversation_trace),
        )
        .route(
            "/tenants/{tenant}/autonomous-agents/traces",
            get(api::list_autonomous_agent_traces),
        )
        .route(
            "/tenants/{tenant}/autonomous-agents/{agent}/traces/import",
            put(api::import_autonomous_agent_trace),
        )
        .route(
            "/tenants/{tenant}/autonomous-agents/{agent}/traces/{id}/import/refresh",
            put(api::refresh_autonomous_agent_trace),
        )
        .route(
            "/tenants/{tenant}/conversations/{conversation}/invoke",
            post(stream::invoke_conversation),
        )
        .route_layer(axum::middleware::from_fn(middleware::request_logger))
        .route_layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .with_state(state)
}

async fn cmd_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "contractVersion": obs_core::CONTRACT_VERSION,
        "time": Utc::now().to_rfc3339(),
        "queueCapacity": state.config.queue_capacity,
    }))
}

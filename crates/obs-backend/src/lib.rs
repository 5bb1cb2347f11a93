//! HTTP fetchers for the two external agent backends.
//!
//! Neither client implements a shared trait: the Responses backend returns a
//! flat newest-first item list, the Workflow backend returns a single
//! execution response, and [`obs_import`]'s `Importer` trait is the
//! backend-agnostic seam — not these fetchers.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use obs_error::ObsError;
use obs_trace_build::{ConversationItem, ExecutionResponse};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

/// Wraps a non-2xx or transport failure from a backend call into the
/// domain error taxonomy, per §7: transport errors become
/// `service_unavailable`, timeouts become `timeout`.
fn wrap_transport_error(context: &str, err: reqwest::Error) -> ObsError {
    if err.is_timeout() {
        return ObsError::new(obs_error::ErrorKind::Timeout, format!("{context}: timed out"))
            .with_source(err);
    }
    ObsError::new(
        obs_error::ErrorKind::ServiceUnavailable,
        format!("{context}: request failed"),
    )
    .with_source(err)
}

fn wrap_status_error(context: &str, status: StatusCode, body: &str) -> ObsError {
    ObsError::new(
        obs_error::ErrorKind::ServiceUnavailable,
        format!("{context}: backend returned {status}"),
    )
    .with_context("status", status.as_u16())
    .with_context("body", body)
}

/// Fetcher for the OpenAI-style Responses backend.
#[derive(Debug, Clone)]
pub struct ResponsesBackendClient {
    http: Client,
    endpoint: String,
    api_version: String,
    bearer_token: String,
}

impl ResponsesBackendClient {
    /// Builds a client pointed at `endpoint` (e.g. `https://host`), using
    /// `api_version` as the `api-version` query parameter and `bearer_token`
    /// for the `Authorization` header.
    pub fn new(endpoint: impl Into<String>, api_version: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
            api_version: api_version.into(),
            bearer_token: bearer_token.into(),
        }
    }

    /// Fetches every conversation item for an external conversation id, via
    /// `GET {endpoint}/openai/conversations/{extConv}/items?api-version=…`.
    ///
    /// The backend returns items newest-first; callers pass the result
    /// straight into [`obs_trace_build::build_responses_nodes`].
    pub async fn fetch_conversation_items(
        &self,
        external_conversation_id: &str,
    ) -> Result<Vec<ConversationItem>, ObsError> {
        let url = format!(
            "{}/openai/conversations/{}/items",
            self.endpoint.trim_end_matches('/'),
            external_conversation_id
        );
        debug!(target: "obs.backend", %url, "fetching responses conversation items");

        let response = self
            .http
            .get(&url)
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(|e| wrap_transport_error("responses conversation fetch", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(target: "obs.backend", %status, "responses backend returned error status");
            return Err(wrap_status_error("responses conversation fetch", status, &body));
        }

        #[derive(serde::Deserialize)]
        struct ItemsPage {
            data: Vec<ConversationItem>,
        }

        let page: ItemsPage = response
            .json()
            .await
            .map_err(|e| wrap_transport_error("responses conversation fetch: decode", e))?;
        Ok(page.data)
    }
}

/// Fetcher for the n8n-style Workflow backend.
#[derive(Debug, Clone)]
pub struct WorkflowBackendClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl WorkflowBackendClient {
    /// Builds a client pointed at `base_url`, authenticating with
    /// `X-N8N-API-KEY: {api_key}`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Fetches a single execution record, via
    /// `GET {base}/api/v1/executions/{id}?includeData=true`.
    pub async fn fetch_execution(&self, execution_id: &str) -> Result<ExecutionResponse, ObsError> {
        let url = format!(
            "{}/api/v1/executions/{}",
            self.base_url.trim_end_matches('/'),
            execution_id
        );
        debug!(target: "obs.backend", %url, "fetching workflow execution");

        let response = self
            .http
            .get(&url)
            .query(&[("includeData", "true")])
            .header("X-N8N-API-KEY", &self.api_key)
            .send()
            .await
            .map_err(|e| wrap_transport_error("workflow execution fetch", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(target: "obs.backend", %status, "workflow backend returned error status");
            return Err(wrap_status_error("workflow execution fetch", status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| wrap_transport_error("workflow execution fetch: decode", e))
    }

    /// Fetches up to the 100 most recent successful executions with their
    /// data included, for the session-id scan described in §4.3.
    pub async fn fetch_recent_successful_executions(&self) -> Result<Vec<ExecutionResponse>, ObsError> {
        let url = format!("{}/api/v1/executions", self.base_url.trim_end_matches('/'));
        debug!(target: "obs.backend", %url, "fetching recent workflow executions for session lookup");

        let response = self
            .http
            .get(&url)
            .query(&[("status", "success"), ("limit", "100"), ("includeData", "true")])
            .header("X-N8N-API-KEY", &self.api_key)
            .send()
            .await
            .map_err(|e| wrap_transport_error("workflow executions list", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(wrap_status_error("workflow executions list", status, &body));
        }

        #[derive(serde::Deserialize)]
        struct ExecutionsPage {
            data: Vec<ExecutionResponse>,
        }

        let page: ExecutionsPage = response
            .json()
            .await
            .map_err(|e| wrap_transport_error("workflow executions list: decode", e))?;
        Ok(page.data)
    }

    /// Finds the Workflow-backend `sessionId` for `execution_id` by fetching
    /// it and scanning its run data per [`obs_trace_build::extract_session_id`].
    pub async fn fetch_session_id(&self, execution_id: &str) -> Result<Option<String>, ObsError> {
        let execution = self.fetch_execution(execution_id).await?;
        Ok(obs_trace_build::extract_session_id(&execution))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_conversation_items_parses_data_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/openai/conversations/conv_1/items"))
            .and(query_param("api-version", "2024-01-01"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {
                        "id": "i1",
                        "type": "message",
                        "role": "user",
                        "created_by": {},
                        "content": [{"text": "hi"}]
                    }
                ]
            })))
            .mount(&server)
            .await;

        let client = ResponsesBackendClient::new(server.uri(), "2024-01-01", "secret");
        let items = client.fetch_conversation_items("conv_1").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "i1");
    }

    #[tokio::test]
    async fn fetch_conversation_items_maps_401_to_service_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("nope"))
            .mount(&server)
            .await;

        let client = ResponsesBackendClient::new(server.uri(), "v1", "secret");
        let err = client.fetch_conversation_items("conv_1").await.unwrap_err();
        assert_eq!(err.kind, obs_error::ErrorKind::ServiceUnavailable);
    }

    #[tokio::test]
    async fn fetch_execution_sends_api_key_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/executions/exec_1"))
            .and(header("x-n8n-api-key", "key123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "workflowData": {"nodes": []},
                "resultData": {"runData": {}}
            })))
            .mount(&server)
            .await;

        let client = WorkflowBackendClient::new(server.uri(), "key123");
        let exec = client.fetch_execution("exec_1").await.unwrap();
        assert!(exec.result_data.run_data.is_empty());
    }

    #[tokio::test]
    async fn fetch_recent_successful_executions_passes_query_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/executions"))
            .and(query_param("status", "success"))
            .and(query_param("limit", "100"))
            .and(query_param("includeData", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        let client = WorkflowBackendClient::new(server.uri(), "key123");
        let execs = client.fetch_recent_successful_executions().await.unwrap();
        assert!(execs.is_empty());
    }
}

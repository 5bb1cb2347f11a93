//! Typed RPC client for the platform-configuration service (§6.3).
//!
//! Three of the four endpoints authenticate with a bearer token plus a
//! service key; the autonomous-agent endpoint authenticates with a plain
//! API key instead. Status mapping is exact and shared by every call.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use obs_error::{ErrorKind, ObsError};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Per-application configuration served by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationConfig {
    /// Application identifier.
    pub application_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Human-readable application name.
    pub display_name: String,
    /// Opaque application settings.
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

/// A conversation record as known to the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation identifier.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Owning user.
    pub user_id: String,
    /// Owning application.
    pub application_id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Result of validating that a conversation belongs to a tenant/user pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationValidation {
    /// Whether the conversation is valid for the given identity.
    pub valid: bool,
    /// Human-readable reason when `valid` is `false`.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Configuration for an autonomous agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutonomousAgentConfig {
    /// Agent identifier.
    pub agent_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Whether the agent is currently enabled.
    pub enabled: bool,
    /// Opaque agent settings.
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

/// Maps a non-2xx platform response to the domain error taxonomy, per §6.3:
/// 401→unauthorized, 403→forbidden, 404→not_found, anything else→
/// service_unavailable with the response body echoed in context.
fn map_status_error(context: &str, status: StatusCode, body: &str) -> ObsError {
    let kind = match status {
        StatusCode::UNAUTHORIZED => ErrorKind::Unauthorized,
        StatusCode::FORBIDDEN => ErrorKind::Forbidden,
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        _ => ErrorKind::ServiceUnavailable,
    };
    ObsError::new(kind, format!("{context}: platform returned {status}"))
        .with_context("status", status.as_u16())
        .with_context("body", body)
}

fn wrap_transport_error(context: &str, err: reqwest::Error) -> ObsError {
    if err.is_timeout() {
        return ObsError::new(ErrorKind::Timeout, format!("{context}: timed out")).with_source(err);
    }
    ObsError::new(ErrorKind::ServiceUnavailable, format!("{context}: request failed")).with_source(err)
}

/// Client for the platform-configuration service.
#[derive(Debug, Clone)]
pub struct PlatformConfigClient {
    http: Client,
    base_url: String,
    bearer_token: String,
    service_key: String,
    api_key: String,
}

impl PlatformConfigClient {
    /// Builds a client pointed at `base_url`. `bearer_token`/`service_key`
    /// authenticate the three service endpoints; `api_key` authenticates
    /// the autonomous-agent endpoint.
    pub fn new(
        base_url: impl Into<String>,
        bearer_token: impl Into<String>,
        service_key: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            bearer_token: bearer_token.into(),
            service_key: service_key.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    /// `GET {base}/applications/{application_id}/config`.
    pub async fn get_application_config(&self, application_id: &str) -> Result<ApplicationConfig, ObsError> {
        let url = self.url(&format!("/applications/{application_id}/config"));
        debug!(target: "obs.platform", %url, "fetching application config");

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .header("X-Service-Key", &self.service_key)
            .send()
            .await
            .map_err(|e| wrap_transport_error("get application config", e))?;

        self.decode(response, "get application config").await
    }

    /// `GET {base}/conversations/{conversation_id}`.
    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, ObsError> {
        let url = self.url(&format!("/conversations/{conversation_id}"));
        debug!(target: "obs.platform", %url, "fetching conversation");

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .header("X-Service-Key", &self.service_key)
            .send()
            .await
            .map_err(|e| wrap_transport_error("get conversation", e))?;

        self.decode(response, "get conversation").await
    }

    /// `POST {base}/conversations/{conversation_id}/validate`, scoping the
    /// check to `tenant_id`/`user_id`.
    pub async fn validate_conversation(
        &self,
        conversation_id: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<ConversationValidation, ObsError> {
        let url = self.url(&format!("/conversations/{conversation_id}/validate"));
        debug!(target: "obs.platform", %url, "validating conversation");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.bearer_token)
            .header("X-Service-Key", &self.service_key)
            .json(&serde_json::json!({ "tenantId": tenant_id, "userId": user_id }))
            .send()
            .await
            .map_err(|e| wrap_transport_error("validate conversation", e))?;

        self.decode(response, "validate conversation").await
    }

    /// `GET {base}/autonomous-agents/{agent_id}/config`, authenticated with
    /// the plain API key rather than bearer + service key.
    pub async fn get_autonomous_agent_config(&self, agent_id: &str) -> Result<AutonomousAgentConfig, ObsError> {
        let url = self.url(&format!("/autonomous-agents/{agent_id}/config"));
        debug!(target: "obs.platform", %url, "fetching autonomous agent config");

        let response = self
            .http
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| wrap_transport_error("get autonomous agent config", e))?;

        self.decode(response, "get autonomous agent config").await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(&self, response: reqwest::Response, context: &str) -> Result<T, ObsError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(target: "obs.platform", %status, context, "platform config call returned error status");
            return Err(map_status_error(context, status, &body));
        }
        response.json().await.map_err(|e| wrap_transport_error(&format!("{context}: decode"), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> PlatformConfigClient {
        PlatformConfigClient::new(base, "bearer-tok", "svc-key", "api-key")
    }

    #[tokio::test]
    async fn get_application_config_sends_bearer_and_service_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/applications/app1/config"))
            .and(header("authorization", "Bearer bearer-tok"))
            .and(header("x-service-key", "svc-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "applicationId": "app1",
                "tenantId": "t1",
                "displayName": "App One",
            })))
            .mount(&server)
            .await;

        let config = client(&server.uri()).get_application_config("app1").await.unwrap();
        assert_eq!(config.display_name, "App One");
    }

    #[tokio::test]
    async fn get_autonomous_agent_config_uses_api_key_not_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/autonomous-agents/agent1/config"))
            .and(header("x-api-key", "api-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "agentId": "agent1",
                "tenantId": "t1",
                "enabled": true,
            })))
            .mount(&server)
            .await;

        let config = client(&server.uri()).get_autonomous_agent_config("agent1").await.unwrap();
        assert!(config.enabled);
    }

    #[tokio::test]
    async fn validate_conversation_posts_tenant_and_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversations/conv1/validate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "valid": true })))
            .mount(&server)
            .await;

        let result = client(&server.uri()).validate_conversation("conv1", "t1", "u1").await.unwrap();
        assert!(result.valid);
        assert!(result.reason.is_none());
    }

    #[tokio::test]
    async fn status_mapping_covers_each_documented_code() {
        for (status, expected) in [
            (401, ErrorKind::Unauthorized),
            (403, ErrorKind::Forbidden),
            (404, ErrorKind::NotFound),
            (500, ErrorKind::ServiceUnavailable),
            (503, ErrorKind::ServiceUnavailable),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(status).set_body_string("denied"))
                .mount(&server)
                .await;

            let err = client(&server.uri()).get_conversation("conv1").await.unwrap_err();
            assert_eq!(err.kind, expected, "status {status}");
        }
    }
}

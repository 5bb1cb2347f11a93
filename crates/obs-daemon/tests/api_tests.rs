// SPDX-License-Identifier: MIT OR Apache-2.0
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use obs_cache::{ChaChaCipher, InMemoryByteCache, SessionCache};
use obs_config::CoreConfig;
use obs_daemon::{build_app, AppState};
use obs_import::ImporterRegistry;
use obs_platform_client::PlatformConfigClient;
use obs_store::memory::{InMemoryMessageStore, InMemoryTraceStore};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn test_state() -> Arc<AppState> {
    Arc::new(AppState {
        trace_store: Arc::new(InMemoryTraceStore::new()),
        message_store: Arc::new(InMemoryMessageStore::new()),
        import_service: Arc::new(obs_import::ImportService::new(Arc::new(ImporterRegistry::new()), 16, 1)),
        session_cache: Arc::new(SessionCache::new(InMemoryByteCache::new(), ChaChaCipher::new(&[9u8; 32]))),
        platform_client: Arc::new(PlatformConfigClient::new("http://localhost", "tok", "svc", "key")),
        responses_stream_client: None,
        workflow_stream_client: None,
        config: Arc::new(CoreConfig::default()),
    })
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let app = build_app(test_state());

    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["contractVersion"], obs_core::CONTRACT_VERSION);
}

#[tokio::test]
async fn create_trace_returns_201_and_sets_request_id_header() {
    let app = build_app(test_state());

    let body = json!({
        "application_id": "app_1",
        "conversation_id": "conv_1",
    });
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tenants/tenant_a/traces")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(resp.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn create_trace_duplicate_conversation_returns_409() {
    let state = test_state();
    let app = build_app(Arc::clone(&state));

    let body = || {
        Body::from(
            json!({
                "application_id": "app_1",
                "conversation_id": "conv_dup",
            })
            .to_string(),
        )
    };

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tenants/tenant_a/traces")
                .header("content-type", "application/json")
                .body(body())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tenants/tenant_a/traces")
                .header("content-type", "application/json")
                .body(body())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let json = body_json(second).await;
    assert_eq!(json["code"], "CONFLICT");
}

#[tokio::test]
async fn create_trace_mixed_context_returns_400() {
    let app = build_app(test_state());

    let body = json!({
        "application_id": "app_1",
        "conversation_id": "conv_1",
        "autonomous_agent_id": "agent_1",
    });
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tenants/tenant_a/traces")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_missing_trace_returns_404() {
    let app = build_app(test_state());

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/tenants/tenant_a/traces/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn refresh_conversation_trace_round_trips_through_http() {
    let state = test_state();
    let app = build_app(Arc::clone(&state));

    let create_body = json!({
        "application_id": "app_1",
        "conversation_id": "conv_refresh",
        "logs": ["first"],
    });
    let created = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tenants/tenant_a/traces")
                .header("content-type", "application/json")
                .body(Body::from(create_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let created_id = body_json(created).await["id"].as_str().unwrap().to_string();

    let refresh_body = json!({
        "logs": ["second"],
        "reference_id": "ext-1",
    });
    let refreshed = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/tenants/tenant_a/conversations/conv_refresh/traces")
                .header("content-type", "application/json")
                .body(Body::from(refresh_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(refreshed.status(), StatusCode::OK);
    let json = body_json(refreshed).await;
    assert_eq!(json["id"], created_id);
    assert_eq!(json["logs"], serde_json::json!(["second"]));
    assert_eq!(json["reference_id"], "ext-1");
}

#[tokio::test]
async fn import_autonomous_agent_trace_without_registered_importer_returns_404() {
    let app = build_app(test_state());

    let body = json!({ "kind": "responses" });
    let resp = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/tenants/tenant_a/autonomous-agents/agent_1/traces/import")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invoke_conversation_with_unconfigured_backend_returns_503() {
    let app = build_app(test_state());

    let body = json!({ "message": "hello", "backend": "responses" });
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tenants/tenant_a/conversations/conv_1/invoke")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn invoke_conversation_unknown_backend_returns_400() {
    let app = build_app(test_state());

    let body = json!({ "message": "hello", "backend": "carrier-pigeon" });
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tenants/tenant_a/conversations/conv_1/invoke")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

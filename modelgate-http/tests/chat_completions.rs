//! End-to-end tests against the real axum router (§8 scenario 1, §6
//! "Authentication"), wired with [`InMemoryTenantStore`] — no network call
//! ever happens in these tests because the policy stage that denies the
//! request runs before any provider adapter is touched.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use gateway_config::{ModelRestriction, ProviderConfig, ProviderFamily, RestrictionMode, RolePolicy};
use modelgate_core::{InMemoryApiKeyDirectory, InMemoryTenantStore};
use modelgate_http::{chat_router, AppState};

fn openai_provider_config() -> ProviderConfig {
    ProviderConfig {
        provider: "openai".into(),
        family: ProviderFamily::Openai,
        base_url: "https://api.openai.com/v1".into(),
        default_timeout_secs: 60,
    }
}

fn build_state(policy: RolePolicy) -> Arc<AppState> {
    let store = Arc::new(InMemoryTenantStore::new());
    store.set_role_policy("tenant-a", "default", policy);
    let directory = Arc::new(InMemoryApiKeyDirectory::new(store.clone()));
    directory.register("sk-test", "tenant-a", vec!["default".to_string()]);

    let dispatcher = Arc::new(modelgate_core::Dispatcher::new(
        vec![openai_provider_config()],
        "test-master-key",
        Arc::new(modelgate_core::tool_catalog::NoopToolCatalogClient),
    ));

    Arc::new(AppState {
        dispatcher,
        api_keys: directory,
    })
}

#[tokio::test]
async fn missing_bearer_token_is_rejected_with_401() {
    let state = build_state(RolePolicy::default());
    let app = chat_router(state);

    let body = serde_json::json!({
        "model": "openai/gpt-4o",
        "messages": [{"role": "user", "content": "hi"}],
    });
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn model_not_on_whitelist_is_rejected_with_403() {
    let mut policy = RolePolicy {
        id: "default".into(),
        ..Default::default()
    };
    policy.model_restriction = ModelRestriction {
        enabled: true,
        mode: Some(RestrictionMode::Whitelist),
        models: vec!["openai/gpt-3.5-turbo".into()],
        providers: vec![],
    };
    let state = build_state(policy);
    let app = chat_router(state);

    let body = serde_json::json!({
        "model": "openai/gpt-4",
        "messages": [{"role": "user", "content": "Hello"}],
    });
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .header("authorization", "Bearer sk-test")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed["error"]["code"], "model_not_allowed");
}

#[tokio::test]
async fn health_endpoint_reports_healthy_without_auth() {
    let state = build_state(RolePolicy::default());
    let app = chat_router(state);

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed["status"], "healthy");
}

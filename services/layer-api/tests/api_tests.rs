//! HTTP surface of the layer API.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use layer_api::{
    router, AppState, LayerLifecycleManager, ReadinessConfig, ReadinessInitializer,
    ReadinessState,
};
use layer_common::PublishError;
use serde_json::{json, Value};
use storage::{CacheKey, MemoryMetadataCache, MetadataCache};
use test_utils::{names, temperature_classification, FakePublisher, InMemoryStore};
use tower::ServiceExt;

struct TestApp {
    app: Router,
    publisher: Arc<FakePublisher>,
    readiness: Arc<ReadinessInitializer>,
}

async fn app_with(publisher: FakePublisher, wait_ready: bool) -> TestApp {
    let publisher = Arc::new(publisher);
    let cache = Arc::new(MemoryMetadataCache::new(16));
    let readiness = ReadinessInitializer::new(
        publisher.clone(),
        ReadinessConfig {
            initial_delay: Duration::from_millis(1),
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts: 2,
        },
    );
    let manager = LayerLifecycleManager::new(
        publisher.clone(),
        Arc::new(InMemoryStore::new()),
        cache.clone(),
        readiness.subscribe(),
        Duration::from_secs(60),
    );
    if wait_ready {
        readiness.start();
        readiness.wait_terminal().await;
    }

    let state = Arc::new(AppState::new(manager, Arc::clone(&readiness), cache));
    TestApp {
        app: router(state),
        publisher,
        readiness,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn publish_body() -> Value {
    json!({
        "identity": {"country": "Laos", "dataset_kind": "climate", "variable": "temp", "scenario": "rcp45"},
        "artifact_path": "/data/cogs/laos_temp_rcp45.tif",
        "params": {"classification": temperature_classification()}
    })
}

#[tokio::test]
async fn test_health_endpoints() {
    let t = app_with(FakePublisher::new(), false).await;

    for uri in ["/health", "/api/health"] {
        let (status, body) = send(&t.app, "GET", uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["geoserver"]["state"], "not_started");
    }

    let (status, body) = send(&t.app, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "layer-api");
}

#[tokio::test]
async fn test_ready_endpoint() {
    let t = app_with(FakePublisher::new(), false).await;
    let (status, body) = send(&t.app, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["state"], "not_started");

    t.readiness.start();
    t.readiness.wait_terminal().await;
    let (status, body) = send(&t.app, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "ready");
}

#[tokio::test]
async fn test_publish_before_ready_is_503() {
    let t = app_with(FakePublisher::new(), false).await;
    let (status, body) = send(&t.app, "POST", "/api/publish", Some(publish_body())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "service_not_ready");
}

#[tokio::test]
async fn test_publish_and_read_back() {
    let t = app_with(FakePublisher::new(), true).await;

    let (status, body) = send(&t.app, "POST", "/api/publish", Some(publish_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["external_name"], names::LAOS_TEMP);
    assert!(body["wms_url"].as_str().is_some());
    assert!(body.get("wfs_url").is_none());

    let (status, body) = send(&t.app, "GET", "/api/layers/laos", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["climate"][0]["layer_name"], names::LAOS_TEMP);

    let (status, body) = send(&t.app, "GET", "/api/layers/list", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["layers"], json!([names::LAOS_TEMP]));
    assert_eq!(body["details"][0]["managed"], true);
}

#[tokio::test]
async fn test_publish_invalid_identity_is_400() {
    let t = app_with(FakePublisher::new(), true).await;
    let body = json!({
        "identity": {"country": "Laos", "dataset_kind": "energy", "variable": "solar", "scenario": "rcp45"},
        "artifact_path": "postgis:laos_solar",
        "params": {"capacity_attribute": "capacity_mw"}
    });
    let (status, body) = send(&t.app, "POST", "/api/publish", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
    assert_eq!(t.publisher.publish_calls(), 0);
}

#[tokio::test]
async fn test_publish_rejection_is_422() {
    let publisher = FakePublisher::new();
    publisher.fail_publish(names::LAOS_TEMP, PublishError::rejected("not a GeoTIFF"));
    let t = app_with(publisher, true).await;

    let (status, body) = send(&t.app, "POST", "/api/publish", Some(publish_body())).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "rejected");
    assert!(body["message"].as_str().unwrap().contains(names::LAOS_TEMP));
}

#[tokio::test]
async fn test_cleanup_endpoints() {
    let publisher = FakePublisher::new().with_layers([
        names::LAOS_TEMP,
        names::LAOS_TEMP_T1,
        names::BHUTAN_BOUNDARY,
        names::FOREIGN,
    ]);
    let t = app_with(publisher, true).await;

    let (status, body) = send(&t.app, "POST", "/api/cleanup/layers/laos", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "complete");
    assert_eq!(body["deleted"], 1);
    assert_eq!(body["kept"], 1);
    assert_eq!(body["deleted_layers"], json!([names::LAOS_TEMP_T1]));
    assert!(t.publisher.has_layer(names::LAOS_TEMP));

    let (status, body) = send(&t.app, "POST", "/api/cleanup/layers/all", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["countries_processed"], 2);
    assert_eq!(body["total_deleted"], 0);
    assert!(t.publisher.has_layer(names::FOREIGN));
}

#[tokio::test]
async fn test_init_retry_endpoint() {
    let publisher = FakePublisher::new();
    publisher.script_workspace([Err(PublishError::rejected("403 Forbidden"))]);
    let t = app_with(publisher, true).await;
    assert!(matches!(t.readiness.state(), ReadinessState::Failed { .. }));

    let (status, body) = send(&t.app, "POST", "/api/geoserver/init/retry", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["retrying"], true);

    assert_eq!(t.readiness.wait_terminal().await, ReadinessState::Ready);
    let (status, _) = send(&t.app, "POST", "/api/geoserver/init/retry", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_proxy_disabled_without_client() {
    let t = app_with(FakePublisher::new(), false).await;
    let (status, body) = send(
        &t.app,
        "GET",
        "/api/geoserver/escap_climate/wms?service=WMS&request=GetCapabilities",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_metrics_endpoint_without_recorder() {
    let t = app_with(FakePublisher::new(), false).await;
    let (status, _) = send(&t.app, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_shutdown_releases_cache() {
    let publisher = Arc::new(FakePublisher::new());
    let cache = Arc::new(MemoryMetadataCache::new(16));
    let readiness = ReadinessInitializer::new(
        publisher.clone(),
        ReadinessConfig {
            initial_delay: Duration::from_secs(60),
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts: 2,
        },
    );
    let manager = LayerLifecycleManager::new(
        publisher.clone(),
        Arc::new(InMemoryStore::new()),
        cache.clone(),
        readiness.subscribe(),
        Duration::from_secs(60),
    );
    cache
        .put(&CacheKey::country("laos"), json!({"country": "laos"}), Duration::from_secs(60))
        .await
        .unwrap();
    readiness.start();

    let state = AppState::new(manager, Arc::clone(&readiness), cache.clone());
    state.shutdown().await;

    assert!(cache.is_empty().await);
    assert!(!matches!(readiness.state(), ReadinessState::Initializing { .. }));
    assert_eq!(publisher.create_workspace_calls(), 0);
}

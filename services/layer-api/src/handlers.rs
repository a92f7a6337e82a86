//! HTTP handlers for the layer API.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, RawQuery},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use layer_common::LifecycleError;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::lifecycle::PublishRequest;
use crate::state::AppState;

const SERVICE_NAME: &str = "layer-api";

/// OWS endpoints the proxy forwards to.
const PROXY_ENDPOINTS: [&str; 4] = ["wms", "wfs", "wcs", "ows"];

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    let json = serde_json::to_string(body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(json.into())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn error_response(err: &LifecycleError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        warn!(code = err.code(), error = %err, "Request failed");
    }
    json_response(
        status,
        &json!({
            "error": err.code(),
            "message": err.to_string(),
        }),
    )
}

fn respond<T: Serialize>(result: Result<T, LifecycleError>) -> Response {
    match result {
        Ok(body) => json_response(StatusCode::OK, &body),
        Err(e) => error_response(&e),
    }
}

/// GET / - Service landing
pub async fn landing_handler() -> Json<serde_json::Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "features": [
            "layer_publishing",
            "duplicate_cleanup",
            "metadata_cache",
            "boundary_bootstrap",
            "geoserver_proxy",
        ],
    }))
}

/// GET /health, /api/health - Liveness, with the map server state for information
pub async fn health_handler(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "geoserver": state.readiness.state(),
    }))
}

/// GET /ready - 503 until the map server is initialized
pub async fn ready_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let readiness = state.readiness.state();
    let status = if readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    json_response(status, &readiness)
}

/// POST /api/publish
pub async fn publish_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let request: PublishRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => return error_response(&LifecycleError::InvalidRequest(e.to_string())),
    };
    respond(state.manager.publish(request).await)
}

/// GET /api/layers/list
pub async fn list_layers_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    respond(state.manager.list_all_layers().await)
}

/// GET /api/layers/:country
pub async fn country_layers_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(country): Path<String>,
) -> Response {
    respond(state.manager.get_country_layers(&country).await)
}

/// POST /api/cleanup/layers/all
pub async fn cleanup_all_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    respond(state.manager.cleanup_all().await)
}

/// POST /api/cleanup/layers/:country
pub async fn cleanup_country_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(country): Path<String>,
) -> Response {
    respond(state.manager.cleanup_country(&country).await)
}

/// POST /api/geoserver/init/retry
pub async fn init_retry_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    if state.readiness.retry() {
        info!("Manual map server initialization retry started");
        json_response(
            StatusCode::ACCEPTED,
            &json!({ "retrying": true, "geoserver": state.readiness.state() }),
        )
    } else {
        json_response(
            StatusCode::CONFLICT,
            &json!({
                "retrying": false,
                "message": "initialization can only be retried after it failed",
                "geoserver": state.readiness.state(),
            }),
        )
    }
}

/// GET /api/geoserver/:workspace/*path - Read-only OWS proxy
pub async fn geoserver_proxy_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((workspace, path)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Response {
    let Some(client) = state.proxy.as_ref() else {
        return json_response(
            StatusCode::NOT_FOUND,
            &json!({ "error": "not_found", "message": "proxy is disabled" }),
        );
    };

    if proxy_endpoint(&workspace, &path).is_none() {
        return json_response(
            StatusCode::BAD_REQUEST,
            &json!({
                "error": "invalid_request",
                "message": format!("'{}/{}' is not an OWS endpoint", workspace, path),
            }),
        );
    }

    match client.proxy_get(&workspace, &path, query.as_deref()).await {
        Ok(upstream) => {
            let status =
                StatusCode::from_u16(upstream.status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let content_type = upstream
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string());
            Response::builder()
                .status(status)
                .header(header::CONTENT_TYPE, content_type)
                .body(upstream.body.into())
                .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
        }
        Err(e) => error_response(&LifecycleError::Backend(e)),
    }
}

/// The OWS service a proxied request targets. `None` when the path names
/// anything else or has a segment that could climb out of the workspace.
fn proxy_endpoint(workspace: &str, path: &str) -> Option<&'static str> {
    let unsafe_segment = |segment: &str| {
        segment == "." || segment == ".." || segment.contains('\\')
    };
    if workspace.is_empty() || workspace.contains('/') || unsafe_segment(workspace) {
        return None;
    }

    let path = path.trim_start_matches('/');
    if path.split('/').any(unsafe_segment) {
        return None;
    }
    let first = path.split('/').next()?.to_lowercase();
    PROXY_ENDPOINTS.iter().copied().find(|e| *e == first)
}

/// GET /metrics - Prometheus exposition
pub async fn metrics_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let body = state
        .prometheus
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(body.into())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use layer_common::PublishError;

    #[tokio::test]
    async fn test_landing_handler() {
        let Json(body) = landing_handler().await;
        assert_eq!(body["service"], SERVICE_NAME);
        assert!(body["features"].as_array().unwrap().len() >= 4);
    }

    #[test]
    fn test_proxy_endpoint() {
        assert_eq!(proxy_endpoint("escap_climate", "wms"), Some("wms"));
        assert_eq!(proxy_endpoint("escap_climate", "/WFS"), Some("wfs"));
        assert_eq!(proxy_endpoint("escap_climate", "ows/extra"), Some("ows"));
        assert_eq!(proxy_endpoint("escap_climate", "rest/layers"), None);
        assert_eq!(proxy_endpoint("escap_climate", ""), None);
    }

    #[test]
    fn test_proxy_endpoint_rejects_traversal() {
        assert_eq!(proxy_endpoint("escap_climate", "wms/../web"), None);
        assert_eq!(proxy_endpoint("escap_climate", "wms/./wms"), None);
        assert_eq!(proxy_endpoint("escap_climate", "wms/sub/../../rest"), None);
        assert_eq!(proxy_endpoint("escap_climate", "wms\\..\\web"), None);
        assert_eq!(proxy_endpoint("..", "wms"), None);
        assert_eq!(proxy_endpoint("a/b", "wms"), None);
    }

    #[test]
    fn test_error_response_status() {
        let response = error_response(&LifecycleError::ServiceNotReady("initializing".into()));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = error_response(&LifecycleError::Publish {
            name: "laos_boundary".into(),
            source: PublishError::rejected("bad zip"),
        });
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}

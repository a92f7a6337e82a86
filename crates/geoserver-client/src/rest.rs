//! GeoServer REST payloads and response classification.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

use layer_common::PublishError;

/// Longest response body excerpt kept in error details.
const MAX_DETAIL_BODY: usize = 300;

/// Classify a non-success HTTP status into a publish error.
///
/// 502/503/504 mean the server (or the proxy in front of it) is not up yet
/// and are treated as unreachable; 404 is not found; everything else is a
/// rejection that retrying will not fix.
pub fn status_error(status: StatusCode, operation: &str, body: &str) -> PublishError {
    let body = body.trim();
    let excerpt: String = body.chars().take(MAX_DETAIL_BODY).collect();
    let detail = if excerpt.is_empty() {
        format!("{}: HTTP {}", operation, status.as_u16())
    } else {
        format!("{}: HTTP {}: {}", operation, status.as_u16(), excerpt)
    };

    match status {
        StatusCode::NOT_FOUND => PublishError::not_found(detail),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            PublishError::unreachable(detail)
        }
        _ => PublishError::rejected(detail),
    }
}

/// Classify a transport-level failure.
pub fn transport_error(operation: &str, err: &reqwest::Error) -> PublishError {
    if err.is_timeout() {
        PublishError::unreachable(format!("{}: request timed out", operation))
    } else if err.is_connect() {
        PublishError::unreachable(format!("{}: connection failed: {}", operation, err))
    } else {
        PublishError::unreachable(format!("{}: {}", operation, err))
    }
}

/// Whether a rejection only says the resource already exists.
pub fn is_already_exists(err: &PublishError) -> bool {
    err.detail.contains("HTTP 409") || err.detail.to_lowercase().contains("already exists")
}

/// Body for `POST /rest/workspaces`.
pub fn workspace_body(name: &str) -> serde_json::Value {
    json!({ "workspace": { "name": name } })
}

/// Body for creating or updating a feature type.
pub fn feature_type_body(name: &str, native_name: &str, keywords: &[String]) -> serde_json::Value {
    json!({
        "featureType": {
            "name": name,
            "nativeName": native_name,
            "title": name,
            "srs": "EPSG:4326",
            "enabled": true,
            "keywords": { "string": keywords },
        }
    })
}

/// Body for setting a layer's default style.
pub fn default_style_body(workspace: &str, style: &str) -> serde_json::Value {
    json!({
        "layer": {
            "defaultStyle": { "name": format!("{}:{}", workspace, style) },
            "enabled": true,
        }
    })
}

#[derive(Debug, Deserialize)]
struct LayersEnvelope {
    layers: LayersField,
}

/// GeoServer returns `"layers": ""` for an empty workspace.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LayersField {
    List { layer: Vec<LayerRef> },
    Empty(String),
}

/// One entry of a layer listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerRef {
    pub name: String,
    #[serde(default)]
    pub href: Option<String>,
}

/// Parse the body of `GET /rest/workspaces/{ws}/layers.json`.
pub fn parse_layer_list(body: &str) -> Result<Vec<String>, PublishError> {
    let envelope: LayersEnvelope = serde_json::from_str(body)
        .map_err(|e| PublishError::rejected(format!("unexpected layer listing: {}", e)))?;

    Ok(match envelope.layers {
        LayersField::List { layer } => layer.into_iter().map(|l| l.name).collect(),
        LayersField::Empty(_) => Vec::new(),
    })
}

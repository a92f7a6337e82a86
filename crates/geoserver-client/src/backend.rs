//! The publish capability consumed by the lifecycle manager.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use layer_common::{normalize_field, LayerRegistration, PublishError, PublishResult};

/// OGC service a layer URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Wms,
    Wfs,
}

/// Attribute hints attached to vector layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeHints {
    /// Attribute shown on hover (boundaries)
    pub hover_attribute: Option<String>,
    /// Attribute holding installed capacity (energy points)
    pub capacity_attribute: Option<String>,
}

impl AttributeHints {
    /// Keywords recorded on the published feature type.
    pub fn keywords(&self) -> Vec<String> {
        let mut keywords = Vec::new();
        if let Some(hover) = &self.hover_attribute {
            keywords.push(format!("hover_attribute:{}", hover));
        }
        if let Some(capacity) = &self.capacity_attribute {
            keywords.push(format!("capacity_attribute:{}", capacity));
        }
        keywords
    }
}

/// Where a vector artifact lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// A table in the shared PostGIS datastore (`postgis:<table>`).
    PostgisTable(String),
    /// A shapefile on a path the map server can read.
    Shapefile(String),
    /// A zipped shapefile uploaded with the request.
    ZippedShapefile(String),
}

impl ArtifactSource {
    pub fn parse(artifact_path: &str) -> PublishResult<Self> {
        if let Some(table) = artifact_path.strip_prefix("postgis:") {
            if table.is_empty() {
                return Err(PublishError::rejected("empty PostGIS table name"));
            }
            return Ok(ArtifactSource::PostgisTable(table.to_string()));
        }

        let lower = artifact_path.to_lowercase();
        if lower.ends_with(".shp") {
            Ok(ArtifactSource::Shapefile(artifact_path.to_string()))
        } else if lower.ends_with(".zip") {
            Ok(ArtifactSource::ZippedShapefile(artifact_path.to_string()))
        } else {
            Err(PublishError::rejected(format!(
                "unsupported vector artifact: {}",
                artifact_path
            )))
        }
    }

    /// Native feature type name inside the store.
    pub fn native_name(&self) -> String {
        match self {
            ArtifactSource::PostgisTable(table) => table.clone(),
            ArtifactSource::Shapefile(path) | ArtifactSource::ZippedShapefile(path) => Path::new(path)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(path)
                .to_string(),
        }
    }
}

/// Administrative operations on the map server.
///
/// Implementations must be idempotent where noted and must not retry;
/// retry policy belongs to the caller.
#[async_trait]
pub trait PublishBackend: Send + Sync {
    /// Workspace all layers are published into.
    fn workspace(&self) -> &str;

    /// Create a workspace. Succeeds if it already exists.
    async fn create_workspace(&self, name: &str) -> PublishResult<()>;

    /// Register or replace a raster layer.
    async fn publish_raster(
        &self,
        external_name: &str,
        artifact_path: &str,
        classification: Option<&serde_json::Value>,
    ) -> PublishResult<()>;

    /// Register or replace a vector layer.
    async fn publish_vector(
        &self,
        external_name: &str,
        artifact_path: &str,
        hints: &AttributeHints,
    ) -> PublishResult<()>;

    /// Names of every layer in the workspace, including foreign ones.
    async fn list_layer_names(&self) -> PublishResult<Vec<String>>;

    /// Registrations recognised by the name codec, optionally for one country.
    async fn list_layers(&self, country: Option<&str>) -> PublishResult<Vec<LayerRegistration>> {
        let names = self.list_layer_names().await?;
        let total = names.len();
        let scope = country.map(normalize_field);

        let registrations: Vec<LayerRegistration> = names
            .into_iter()
            .filter_map(|name| LayerRegistration::from_listed_name(name, None))
            .filter(|reg| scope.as_deref().map_or(true, |c| reg.country() == c))
            .collect();

        debug!(
            total = total,
            matched = registrations.len(),
            scope = ?scope,
            "Listed layer registrations"
        );
        Ok(registrations)
    }

    /// Delete a layer. Succeeds if it is already absent.
    async fn delete_layer(&self, external_name: &str) -> PublishResult<()>;

    /// Public URL for a layer. Pure, no network call.
    fn service_url(&self, kind: ServiceKind, external_name: &str) -> String;
}

//! Layer lifecycle orchestration.
//!
//! [`LayerLifecycleManager`] is the single entry point for publishing,
//! cleaning up and reading layers. It ties together the name codec, the
//! publish backend, the metadata store and the metadata cache:
//!
//! - publishes are gated on map server readiness and serialized per name
//! - every change under a country invalidates that country's cache entry
//! - publish and cleanup work runs in spawned tasks, so a dropped request
//!   cannot leave a half-applied change behind

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use geoserver_client::{AttributeHints, PublishBackend, ServiceKind};
use layer_common::{
    decode, encode, normalize_field, DatasetKind, IdentityError, LayerIdentity,
    LayerRegistration, LifecycleError, LifecycleResult,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use storage::{
    CacheKey, CountryRecords, MetadataCache, MetadataStore, PublishRecord, RecordDetails,
    Statistics,
};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::dedupe::{resolve, Resolution};
use crate::metrics;
use crate::name_locks::NameLocks;
use crate::readiness::ReadinessState;

/// Kind-specific publish parameters sent by the upload pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetParams {
    /// Colour classification (climate, giri)
    #[serde(default)]
    pub classification: Option<serde_json::Value>,
    #[serde(default)]
    pub statistics: Option<Statistics>,
    #[serde(default)]
    pub year_range: Option<String>,
    #[serde(default)]
    pub season: Option<String>,
    /// Attribute shown on hover (boundary)
    #[serde(default)]
    pub hover_attribute: Option<String>,
    /// Attribute holding installed capacity (energy)
    #[serde(default)]
    pub capacity_attribute: Option<String>,
    #[serde(default)]
    pub icon_path: Option<String>,
    #[serde(default)]
    pub feature_count: Option<i64>,
    #[serde(default)]
    pub bounds: Option<serde_json::Value>,
}

/// A request to register one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub identity: LayerIdentity,
    /// Raster path, shapefile path, zip path or `postgis:<table>`
    pub artifact_path: String,
    #[serde(default)]
    pub params: DatasetParams,
}

impl PublishRequest {
    /// Check the kind-specific parameters.
    pub fn validate(&self) -> LifecycleResult<()> {
        fn present(value: &Option<String>) -> bool {
            value.as_deref().is_some_and(|v| !v.trim().is_empty())
        }

        if self.artifact_path.trim().is_empty() {
            return Err(LifecycleError::InvalidRequest(
                "artifact_path must not be empty".to_string(),
            ));
        }

        let kind = self.identity.dataset_kind();
        match kind {
            DatasetKind::Climate | DatasetKind::Giri => {
                let has_classification = self
                    .params
                    .classification
                    .as_ref()
                    .is_some_and(|c| !c.is_null());
                if !has_classification {
                    return Err(LifecycleError::InvalidRequest(format!(
                        "{} layers require a classification",
                        kind
                    )));
                }
            }
            DatasetKind::Energy => {
                if !present(&self.params.capacity_attribute) {
                    return Err(LifecycleError::InvalidRequest(
                        "energy layers require a capacity_attribute".to_string(),
                    ));
                }
            }
            DatasetKind::Boundary => {
                if !present(&self.params.hover_attribute) {
                    return Err(LifecycleError::InvalidRequest(
                        "boundary layers require a hover_attribute".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn record(&self) -> PublishRecord {
        let identity = &self.identity;
        let params = self.params.clone();
        let field = |v: Option<&str>| v.unwrap_or_default().to_string();

        let details = match identity.dataset_kind() {
            DatasetKind::Climate => RecordDetails::Climate {
                variable: field(identity.variable()),
                scenario: field(identity.scenario()),
                year_range: params.year_range,
                season: params.season,
                statistics: params.statistics.unwrap_or_default(),
                classification: params.classification.unwrap_or_default(),
            },
            DatasetKind::Giri => RecordDetails::Giri {
                variable: field(identity.variable()),
                scenario: field(identity.scenario()),
                statistics: params.statistics.unwrap_or_default(),
                classification: params.classification.unwrap_or_default(),
            },
            DatasetKind::Energy => RecordDetails::Energy {
                infrastructure_type: field(identity.variable()),
                capacity_attribute: params.capacity_attribute,
                icon_path: params.icon_path,
                feature_count: params.feature_count,
            },
            DatasetKind::Boundary => RecordDetails::Boundary {
                admin_level: identity.variable().map(str::to_string),
                hover_attribute: params.hover_attribute,
                feature_count: params.feature_count,
                bounds: params.bounds,
            },
        };

        PublishRecord {
            country: identity.country().to_string(),
            file_path: self.artifact_path.clone(),
            details,
        }
    }
}

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub external_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wms_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wfs_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStatus {
    Complete,
    PartialFailure,
}

/// A stale registration that could not be deleted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupFailure {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryCleanupReport {
    pub country: String,
    /// Number of stale registrations removed
    pub deleted: usize,
    /// Number of surviving registrations, one per identity
    pub kept: usize,
    pub deleted_layers: Vec<String>,
    pub kept_layers: Vec<String>,
    pub failures: Vec<CleanupFailure>,
    pub status: CleanupStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupAllReport {
    pub countries_processed: usize,
    pub total_deleted: usize,
    pub total_kept: usize,
    pub per_country: Vec<CountryCleanupReport>,
    pub status: CleanupStatus,
}

/// One layer of the workspace listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerEntry {
    pub name: String,
    /// Whether the name was produced by this service's naming scheme
    pub managed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_kind: Option<DatasetKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerList {
    /// External names as listed by the server
    pub layers: Vec<String>,
    pub count: usize,
    /// Classification of each name, in the same order as `layers`
    pub details: Vec<LayerEntry>,
}

/// Orchestrates publication, cleanup and reads of layers.
pub struct LayerLifecycleManager {
    backend: Arc<dyn PublishBackend>,
    store: Arc<dyn MetadataStore>,
    cache: Arc<dyn MetadataCache>,
    readiness: watch::Receiver<ReadinessState>,
    locks: NameLocks,
    /// Per-country invalidation counter; also serializes cache writes with invalidations
    generations: Mutex<HashMap<String, u64>>,
    cache_ttl: Duration,
}

impl LayerLifecycleManager {
    pub fn new(
        backend: Arc<dyn PublishBackend>,
        store: Arc<dyn MetadataStore>,
        cache: Arc<dyn MetadataCache>,
        readiness: watch::Receiver<ReadinessState>,
        cache_ttl: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            store,
            cache,
            readiness,
            locks: NameLocks::new(),
            generations: Mutex::new(HashMap::new()),
            cache_ttl,
        })
    }

    pub fn readiness(&self) -> ReadinessState {
        self.readiness.borrow().clone()
    }

    /// Register a layer, replacing any existing registration of the same name.
    #[instrument(skip(self, request), fields(identity = %request.identity))]
    pub async fn publish(
        self: &Arc<Self>,
        request: PublishRequest,
    ) -> LifecycleResult<PublishOutcome> {
        request.validate()?;

        let state = self.readiness();
        if !state.is_ready() {
            metrics::record_publish(request.identity.dataset_kind().as_str(), "not_ready");
            return Err(LifecycleError::ServiceNotReady(format!(
                "map server is {}",
                state.label()
            )));
        }

        let this = Arc::clone(self);
        tokio::spawn(async move { this.publish_locked(request).await })
            .await
            .map_err(|e| LifecycleError::Internal(format!("publish task failed: {}", e)))?
    }

    async fn publish_locked(&self, request: PublishRequest) -> LifecycleResult<PublishOutcome> {
        let identity = &request.identity;
        let kind = identity.dataset_kind();
        let name = encode(identity);
        let _guard = self.locks.lock(&name).await;

        let published = if kind.is_raster() {
            self.backend
                .publish_raster(
                    &name,
                    &request.artifact_path,
                    request.params.classification.as_ref(),
                )
                .await
        } else {
            let hints = AttributeHints {
                hover_attribute: request.params.hover_attribute.clone(),
                capacity_attribute: request.params.capacity_attribute.clone(),
            };
            self.backend
                .publish_vector(&name, &request.artifact_path, &hints)
                .await
        };

        if let Err(source) = published {
            metrics::record_publish(kind.as_str(), "failed");
            warn!(layer = %name, error = %source, "Publish failed");
            return Err(LifecycleError::Publish { name, source });
        }

        let recorded = self.store.record_publish(&request.record()).await;
        self.invalidate_country(identity.country()).await;

        if let Err(e) = recorded {
            metrics::record_publish(kind.as_str(), "store_failed");
            warn!(layer = %name, error = %e, "Layer published but metadata was not recorded");
            return Err(LifecycleError::Store(e.to_string()));
        }

        metrics::record_publish(kind.as_str(), "published");
        info!(layer = %name, kind = %kind, artifact = %request.artifact_path, "Layer published");

        let (wms_url, wfs_url) = if kind.is_raster() {
            (Some(self.backend.service_url(ServiceKind::Wms, &name)), None)
        } else {
            (None, Some(self.backend.service_url(ServiceKind::Wfs, &name)))
        };
        Ok(PublishOutcome {
            external_name: name,
            wms_url,
            wfs_url,
        })
    }

    /// Delete stale duplicate registrations of one country.
    #[instrument(skip(self))]
    pub async fn cleanup_country(
        self: &Arc<Self>,
        country: &str,
    ) -> LifecycleResult<CountryCleanupReport> {
        let country = required_country(country)?;
        let registrations = self.backend.list_layers(Some(&country)).await?;

        let this = Arc::clone(self);
        tokio::spawn(async move { this.cleanup_registrations(country, registrations).await })
            .await
            .map_err(|e| LifecycleError::Internal(format!("cleanup task failed: {}", e)))
    }

    /// Delete stale duplicate registrations of every country.
    #[instrument(skip(self))]
    pub async fn cleanup_all(self: &Arc<Self>) -> LifecycleResult<CleanupAllReport> {
        let registrations = self.backend.list_layers(None).await?;

        let mut by_country: BTreeMap<String, Vec<LayerRegistration>> = BTreeMap::new();
        for reg in registrations {
            by_country.entry(reg.country().to_string()).or_default().push(reg);
        }

        let this = Arc::clone(self);
        let per_country = tokio::spawn(async move {
            let mut reports = Vec::with_capacity(by_country.len());
            for (country, regs) in by_country {
                reports.push(this.cleanup_registrations(country, regs).await);
            }
            reports
        })
        .await
        .map_err(|e| LifecycleError::Internal(format!("cleanup task failed: {}", e)))?;

        let status = if per_country
            .iter()
            .all(|r| r.status == CleanupStatus::Complete)
        {
            CleanupStatus::Complete
        } else {
            CleanupStatus::PartialFailure
        };

        let report = CleanupAllReport {
            countries_processed: per_country.len(),
            total_deleted: per_country.iter().map(|r| r.deleted).sum(),
            total_kept: per_country.iter().map(|r| r.kept).sum(),
            per_country,
            status,
        };
        info!(
            countries = report.countries_processed,
            deleted = report.total_deleted,
            kept = report.total_kept,
            status = ?report.status,
            "Cleanup of all countries finished"
        );
        Ok(report)
    }

    async fn cleanup_registrations(
        &self,
        country: String,
        registrations: Vec<LayerRegistration>,
    ) -> CountryCleanupReport {
        let Resolution { kept, stale } = resolve(registrations);

        let mut deleted = Vec::new();
        let mut failures = Vec::new();
        for reg in stale {
            let name = reg.external_name;
            let result = {
                let _guard = self.locks.lock(&name).await;
                self.backend.delete_layer(&name).await
            };
            match result {
                Ok(()) => {
                    debug!(layer = %name, "Deleted stale registration");
                    deleted.push(name);
                }
                Err(e) if e.is_not_found() => deleted.push(name),
                Err(e) => {
                    warn!(layer = %name, error = %e, "Failed to delete stale registration");
                    failures.push(CleanupFailure {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !deleted.is_empty() {
            self.invalidate_country(&country).await;
        }
        metrics::record_cleanup(deleted.len(), failures.len());

        let status = if failures.is_empty() {
            CleanupStatus::Complete
        } else {
            CleanupStatus::PartialFailure
        };
        info!(
            country = %country,
            deleted = deleted.len(),
            kept = kept.len(),
            failed = failures.len(),
            "Country cleanup finished"
        );

        CountryCleanupReport {
            country,
            deleted: deleted.len(),
            kept: kept.len(),
            deleted_layers: deleted,
            kept_layers: kept.into_iter().map(|r| r.external_name).collect(),
            failures,
            status,
        }
    }

    /// Every layer in the workspace, including ones this service did not create.
    pub async fn list_all_layers(&self) -> LifecycleResult<LayerList> {
        let names = self.backend.list_layer_names().await?;
        let details: Vec<LayerEntry> = names
            .iter()
            .map(|name| match decode(name) {
                Some(decoded) => LayerEntry {
                    name: name.clone(),
                    managed: true,
                    country: Some(decoded.identity.country().to_string()),
                    dataset_kind: Some(decoded.identity.dataset_kind()),
                },
                None => LayerEntry {
                    name: name.clone(),
                    managed: false,
                    country: None,
                    dataset_kind: None,
                },
            })
            .collect();

        Ok(LayerList {
            count: names.len(),
            layers: names,
            details,
        })
    }

    /// Layer metadata of one country, served from the cache when fresh.
    #[instrument(skip(self))]
    pub async fn get_country_layers(&self, country: &str) -> LifecycleResult<serde_json::Value> {
        let country = required_country(country)?;
        let key = CacheKey::country(&country);

        match self.cache.get(&key).await {
            Ok(Some(payload)) => {
                metrics::record_cache_hit();
                return Ok(payload);
            }
            Ok(None) => metrics::record_cache_miss(),
            Err(e) => {
                metrics::record_cache_error("get");
                warn!(country = %country, error = %e, "Metadata cache read failed, using store");
            }
        }

        let generation = self.generation(&country).await;
        let records = self
            .store
            .country_records(&country)
            .await
            .map_err(|e| LifecycleError::Store(e.to_string()))?;
        let payload = self.country_payload(&country, &records);

        let generations = self.generations.lock().await;
        if generations.get(&country).copied().unwrap_or(0) == generation {
            if let Err(e) = self.cache.put(&key, payload.clone(), self.cache_ttl).await {
                metrics::record_cache_error("put");
                warn!(country = %country, error = %e, "Metadata cache write failed");
            }
        } else {
            debug!(country = %country, "Country changed while loading, not caching");
        }
        drop(generations);

        Ok(payload)
    }

    /// Whether a boundary is already recorded for the country.
    pub async fn has_boundary(&self, country: &str) -> LifecycleResult<bool> {
        self.store
            .has_boundary(&normalize_field(country))
            .await
            .map_err(|e| LifecycleError::Store(e.to_string()))
    }

    async fn generation(&self, country: &str) -> u64 {
        self.generations
            .lock()
            .await
            .get(country)
            .copied()
            .unwrap_or(0)
    }

    /// Bump the country generation and drop its cache entries.
    async fn invalidate_country(&self, country: &str) {
        let mut generations = self.generations.lock().await;
        *generations.entry(country.to_string()).or_insert(0) += 1;

        match self.cache.invalidate(&CacheKey::country(country)).await {
            Ok(removed) => debug!(country = %country, removed = removed, "Invalidated country cache"),
            Err(e) => {
                metrics::record_cache_error("invalidate");
                warn!(country = %country, error = %e, "Metadata cache invalidation failed");
            }
        }
    }

    /// Layer name and service URL of a stored record, `None` if its fields no longer form a valid identity.
    fn layer_url(
        &self,
        kind: ServiceKind,
        identity: Result<LayerIdentity, IdentityError>,
        record_id: i32,
    ) -> Option<(String, String)> {
        match identity {
            Ok(identity) => {
                let name = encode(&identity);
                let url = self.backend.service_url(kind, &name);
                Some((name, url))
            }
            Err(e) => {
                warn!(record_id = record_id, error = %e, "Skipping record with an invalid identity");
                None
            }
        }
    }

    fn country_payload(&self, country: &str, records: &CountryRecords) -> serde_json::Value {
        let climate: Vec<_> = records
            .climate
            .iter()
            .filter_map(|r| {
                let identity = LayerIdentity::climate(country, &r.variable, &r.scenario);
                let (layer_name, wms_url) = self.layer_url(ServiceKind::Wms, identity, r.id)?;
                Some(json!({
                    "id": r.id,
                    "variable": r.variable,
                    "scenario": r.scenario,
                    "year_range": r.year_range,
                    "season": r.season,
                    "statistics": r.statistics,
                    "classification": r.classification,
                    "layer_name": layer_name,
                    "wms_url": wms_url,
                }))
            })
            .collect();

        let giri: Vec<_> = records
            .giri
            .iter()
            .filter_map(|r| {
                let identity = LayerIdentity::giri(country, &r.variable, &r.scenario);
                let (layer_name, wms_url) = self.layer_url(ServiceKind::Wms, identity, r.id)?;
                Some(json!({
                    "id": r.id,
                    "variable": r.variable,
                    "scenario": r.scenario,
                    "statistics": r.statistics,
                    "classification": r.classification,
                    "layer_name": layer_name,
                    "wms_url": wms_url,
                }))
            })
            .collect();

        let energy: Vec<_> = records
            .energy
            .iter()
            .filter_map(|r| {
                let identity = LayerIdentity::energy(country, &r.infrastructure_type);
                let (layer_name, wfs_url) = self.layer_url(ServiceKind::Wfs, identity, r.id)?;
                Some(json!({
                    "id": r.id,
                    "infrastructure_type": r.infrastructure_type,
                    "capacity_attribute": r.capacity_attribute,
                    "icon_path": r.icon_path,
                    "feature_count": r.feature_count,
                    "layer_name": layer_name,
                    "wfs_url": wfs_url,
                }))
            })
            .collect();

        let boundaries: Vec<_> = records
            .boundaries
            .iter()
            .filter_map(|r| {
                let identity = LayerIdentity::boundary(
                    country,
                    r.admin_level.as_deref().filter(|l| !l.trim().is_empty()),
                );
                let (layer_name, wfs_url) = self.layer_url(ServiceKind::Wfs, identity, r.id)?;
                Some(json!({
                    "id": r.id,
                    "admin_level": r.admin_level,
                    "hover_attribute": r.hover_attribute,
                    "feature_count": r.feature_count,
                    "bounds": r.bounds,
                    "layer_name": layer_name,
                    "wfs_url": wfs_url,
                }))
            })
            .collect();

        json!({
            "country": country,
            "climate": climate,
            "giri": giri,
            "energy": energy,
            "boundaries": boundaries,
        })
    }
}

fn required_country(country: &str) -> LifecycleResult<String> {
    let normalized = normalize_field(country);
    if normalized.is_empty() {
        return Err(LifecycleError::InvalidRequest(format!(
            "'{}' is not a valid country",
            country
        )));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(identity: LayerIdentity, params: DatasetParams) -> PublishRequest {
        PublishRequest {
            identity,
            artifact_path: "/data/cogs/layer.tif".to_string(),
            params,
        }
    }

    #[test]
    fn test_validate_raster_needs_classification() {
        let identity = LayerIdentity::climate("laos", "temp", "rcp45").unwrap();
        let err = request(identity.clone(), DatasetParams::default())
            .validate()
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidRequest(_)));

        let params = DatasetParams {
            classification: Some(json!({"classes": []})),
            ..Default::default()
        };
        assert!(request(identity, params).validate().is_ok());
    }

    #[test]
    fn test_validate_vector_attributes() {
        let energy = LayerIdentity::energy("mongolia", "solar").unwrap();
        assert!(request(energy.clone(), DatasetParams::default()).validate().is_err());
        let params = DatasetParams {
            capacity_attribute: Some("capacity_mw".into()),
            ..Default::default()
        };
        assert!(request(energy, params).validate().is_ok());

        let boundary = LayerIdentity::boundary("laos", None).unwrap();
        let params = DatasetParams {
            hover_attribute: Some("  ".into()),
            ..Default::default()
        };
        assert!(request(boundary, params).validate().is_err());
    }

    #[test]
    fn test_validate_artifact_path() {
        let boundary = LayerIdentity::boundary("laos", None).unwrap();
        let mut req = request(
            boundary,
            DatasetParams {
                hover_attribute: Some("NAME_1".into()),
                ..Default::default()
            },
        );
        req.artifact_path = " ".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_record_for_boundary_carries_admin_level() {
        let identity = LayerIdentity::boundary("Laos", Some("admin 1")).unwrap();
        let record = request(identity, DatasetParams::default()).record();
        assert_eq!(record.country, "laos");
        assert!(matches!(
            record.details,
            RecordDetails::Boundary { admin_level: Some(ref level), .. } if level == "admin_1"
        ));
    }

    #[test]
    fn test_publish_request_deserialize() {
        let req: PublishRequest = serde_json::from_value(json!({
            "identity": {"country": "Laos", "dataset_kind": "climate", "variable": "temp", "scenario": "RCP 4.5"},
            "artifact_path": "/data/cogs/laos_temp.tif",
            "params": {"classification": {"classes": []}, "year_range": "2041-2060"}
        }))
        .unwrap();
        assert_eq!(encode(&req.identity), "laos_temp_rcp__45");
        assert_eq!(req.params.year_range.as_deref(), Some("2041-2060"));
    }

    #[test]
    fn test_required_country() {
        assert_eq!(required_country("Lao PDR").unwrap(), "lao_pdr");
        assert!(required_country("¿?").is_err());
    }
}

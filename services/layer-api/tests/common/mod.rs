//! Shared setup for layer API integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use layer_api::lifecycle::{DatasetParams, LayerLifecycleManager, PublishRequest};
use layer_api::ReadinessState;
use layer_common::LayerIdentity;
use storage::MemoryMetadataCache;
use test_utils::{temperature_classification, FakePublisher, InMemoryStore};
use tokio::sync::watch;

pub const CACHE_TTL: Duration = Duration::from_secs(60);

/// A manager wired to in-memory collaborators.
pub struct Harness {
    pub publisher: Arc<FakePublisher>,
    pub store: Arc<InMemoryStore>,
    pub cache: Arc<MemoryMetadataCache>,
    pub readiness: watch::Sender<ReadinessState>,
    pub manager: Arc<LayerLifecycleManager>,
}

impl Harness {
    pub fn ready(publisher: FakePublisher) -> Self {
        Self::with_state(publisher, ReadinessState::Ready)
    }

    pub fn with_state(publisher: FakePublisher, state: ReadinessState) -> Self {
        let publisher = Arc::new(publisher);
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(MemoryMetadataCache::new(64));
        let (readiness, rx) = watch::channel(state);
        let manager = LayerLifecycleManager::new(
            publisher.clone(),
            store.clone(),
            cache.clone(),
            rx,
            CACHE_TTL,
        );
        Self {
            publisher,
            store,
            cache,
            readiness,
            manager,
        }
    }
}

pub fn climate_request(variable: &str, scenario: &str) -> PublishRequest {
    PublishRequest {
        identity: LayerIdentity::climate("Laos", variable, scenario).unwrap(),
        artifact_path: format!("/data/cogs/laos_{}_{}.tif", variable, scenario),
        params: DatasetParams {
            classification: Some(temperature_classification()),
            year_range: Some("2041-2060".to_string()),
            ..Default::default()
        },
    }
}

pub fn boundary_request(country: &str, admin_level: Option<&str>) -> PublishRequest {
    PublishRequest {
        identity: LayerIdentity::boundary(country, admin_level).unwrap(),
        artifact_path: format!("/data/boundaries/{}.zip", country.to_lowercase()),
        params: DatasetParams {
            hover_attribute: Some("NAME_1".to_string()),
            ..Default::default()
        },
    }
}

pub fn energy_request(country: &str, infrastructure_type: &str) -> PublishRequest {
    PublishRequest {
        identity: LayerIdentity::energy(country, infrastructure_type).unwrap(),
        artifact_path: format!("postgis:{}_{}", country.to_lowercase(), infrastructure_type),
        params: DatasetParams {
            capacity_attribute: Some("capacity_mw".to_string()),
            feature_count: Some(42),
            ..Default::default()
        },
    }
}

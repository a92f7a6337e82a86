//! Application state for the layer API.

use std::sync::Arc;

use geoserver_client::GeoServerClient;
use metrics_exporter_prometheus::PrometheusHandle;
use storage::MetadataCache;
use tracing::warn;

use crate::lifecycle::LayerLifecycleManager;
use crate::readiness::ReadinessInitializer;

/// Shared application state.
pub struct AppState {
    /// Orchestrates publish, cleanup and reads.
    pub manager: Arc<LayerLifecycleManager>,

    /// Map server readiness state machine.
    pub readiness: Arc<ReadinessInitializer>,

    /// Client used by the read-only OWS proxy; `None` disables the proxy.
    pub proxy: Option<GeoServerClient>,

    /// Metadata cache, released on shutdown.
    pub cache: Arc<dyn MetadataCache>,

    /// Prometheus exposition; `None` when no recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        manager: Arc<LayerLifecycleManager>,
        readiness: Arc<ReadinessInitializer>,
        cache: Arc<dyn MetadataCache>,
    ) -> Self {
        Self {
            manager,
            readiness,
            proxy: None,
            cache,
            prometheus: None,
        }
    }

    pub fn with_proxy(mut self, client: GeoServerClient) -> Self {
        self.proxy = Some(client);
        self
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    /// Stop initialization attempts and release the metadata cache.
    pub async fn shutdown(&self) {
        self.readiness.shutdown().await;
        if let Err(e) = self.cache.cleanup().await {
            warn!(error = %e, "Metadata cache cleanup failed");
        }
    }
}

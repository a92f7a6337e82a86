//! Layer lifecycle service.
//!
//! Publishes climate, hazard, energy and boundary layers to the map server,
//! removes stale duplicate registrations and serves cached layer metadata.

pub mod bootstrap;
pub mod config;
pub mod dedupe;
pub mod handlers;
pub mod lifecycle;
pub mod metrics;
pub mod name_locks;
pub mod readiness;
pub mod state;

use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use lifecycle::{LayerLifecycleManager, PublishOutcome, PublishRequest};
pub use readiness::{ReadinessConfig, ReadinessInitializer, ReadinessState};
pub use state::AppState;

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::landing_handler))
        // Health check
        .route("/health", get(handlers::health_handler))
        .route("/api/health", get(handlers::health_handler))
        .route("/ready", get(handlers::ready_handler))
        // Metrics
        .route("/metrics", get(handlers::metrics_handler))
        // Layer lifecycle
        .route("/api/publish", post(handlers::publish_handler))
        .route("/api/layers/list", get(handlers::list_layers_handler))
        .route("/api/layers/:country", get(handlers::country_layers_handler))
        .route("/api/cleanup/layers/all", post(handlers::cleanup_all_handler))
        .route(
            "/api/cleanup/layers/:country",
            post(handlers::cleanup_country_handler),
        )
        // Map server
        .route("/api/geoserver/init/retry", post(handlers::init_retry_handler))
        .route(
            "/api/geoserver/:workspace/*path",
            get(handlers::geoserver_proxy_handler),
        )
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

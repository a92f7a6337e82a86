//! Prometheus metrics for the layer lifecycle service.

use metrics::{counter, gauge};

use crate::readiness::ReadinessState;

/// Record the outcome of a publish.
pub fn record_publish(kind: &str, outcome: &'static str) {
    counter!("layer_publish_total", "kind" => kind.to_string(), "outcome" => outcome).increment(1);
}

/// Record deletions and failures of one country cleanup.
pub fn record_cleanup(deleted: usize, failed: usize) {
    counter!("layer_cleanup_runs_total").increment(1);
    counter!("layer_cleanup_deleted_total").increment(deleted as u64);
    counter!("layer_cleanup_failed_total").increment(failed as u64);
}

pub fn record_cache_hit() {
    counter!("metadata_cache_hits_total").increment(1);
}

pub fn record_cache_miss() {
    counter!("metadata_cache_misses_total").increment(1);
}

pub fn record_cache_error(operation: &'static str) {
    counter!("metadata_cache_errors_total", "operation" => operation).increment(1);
}

/// Publish readiness as a one-hot gauge per state.
pub fn set_readiness(state: &ReadinessState) {
    for label in ["not_started", "initializing", "ready", "failed"] {
        let value = if label == state.label() { 1.0 } else { 0.0 };
        gauge!("geoserver_readiness", "state" => label).set(value);
    }
    if let ReadinessState::Initializing { attempt } = state {
        gauge!("geoserver_init_attempt").set(*attempt as f64);
    }
}

//! Common test fixtures for layer lifecycle tests.

use chrono::{DateTime, TimeZone, Utc};
use layer_common::LayerRegistration;
use serde_json::json;

/// A registration as the listing would report it, with an explicit time.
///
/// Panics if `name` is not a codec name; fixtures only use valid ones.
pub fn registration(name: &str, created_at: Option<DateTime<Utc>>) -> LayerRegistration {
    LayerRegistration::from_listed_name(name, created_at)
        .unwrap_or_else(|| panic!("fixture name '{}' does not decode", name))
}

/// Epoch-seconds timestamp helper.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

/// A five-class temperature classification.
pub fn temperature_classification() -> serde_json::Value {
    json!({
        "classes": [
            {"min": 10.0, "max": 15.0, "color": "#ffffb2", "label": "Cool"},
            {"min": 15.0, "max": 20.0, "color": "#fecc5c", "label": "Mild"},
            {"min": 20.0, "max": 25.0, "color": "#fd8d3c", "label": "Warm"},
            {"min": 25.0, "max": 30.0, "color": "#f03b20", "label": "Hot"},
            {"min": 30.0, "max": 45.0, "color": "#bd0026", "label": "Extreme"}
        ]
    })
}

/// Layer names seen on the development server after repeated uploads.
pub mod names {
    pub const LAOS_TEMP: &str = "laos_temp_rcp45";
    pub const LAOS_TEMP_T1: &str = "laos_temp_rcp45_t1";
    pub const LAOS_TEMP_T2: &str = "laos_temp_rcp45_t2";
    pub const LAOS_BOUNDARY: &str = "laos_boundary";
    pub const LAOS_BOUNDARY_TAGGED: &str = "laos_boundary_1758182825568";
    pub const LAOS_FLOOD_GIRI: &str = "laos_flood_present_giri";
    pub const BHUTAN_BOUNDARY: &str = "bhutan_boundary";
    pub const MONGOLIA_SOLAR: &str = "mongolia_solar_energy";
    /// Not produced by the codec; must never be touched.
    pub const FOREIGN: &str = "ne_10m_admin_0_countries";
}

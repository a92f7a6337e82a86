//! In-memory metadata store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use storage::{
    BoundaryRecord, ClimateRecord, CountryRecords, EnergyRecord, GiriRecord, MetadataStore,
    PublishRecord, RecordDetails, StoreError, StoreResult,
};

/// [`MetadataStore`] backed by a map, with upsert semantics matching the catalog.
#[derive(Default)]
pub struct InMemoryStore {
    countries: Mutex<HashMap<String, CountryRecords>>,
    next_id: AtomicUsize,
    writes: AtomicUsize,
    reads: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self, country: &str) -> CountryRecords {
        self.countries
            .lock()
            .unwrap()
            .get(country)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `record_publish` calls that succeeded.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of `country_records` calls.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Query("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::SeqCst) as i32 + 1
    }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn country_records(&self, country: &str) -> StoreResult<CountryRecords> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.records(country))
    }

    async fn record_publish(&self, record: &PublishRecord) -> StoreResult<()> {
        self.check()?;
        let mut countries = self.countries.lock().unwrap();
        let entry = countries.entry(record.country.clone()).or_default();
        let country = record.country.clone();
        let file_path = record.file_path.clone();

        match record.details.clone() {
            RecordDetails::Climate { variable, scenario, year_range, season, statistics, classification } => {
                let pos = entry
                    .climate
                    .iter()
                    .position(|r| r.variable == variable && r.scenario == scenario);
                let id = pos.map(|i| entry.climate[i].id).unwrap_or_else(|| self.id());
                let row = ClimateRecord { id, country, variable, scenario, year_range, season, file_path, statistics, classification };
                match pos {
                    Some(i) => entry.climate[i] = row,
                    None => entry.climate.push(row),
                }
            }
            RecordDetails::Giri { variable, scenario, statistics, classification } => {
                let pos = entry
                    .giri
                    .iter()
                    .position(|r| r.variable == variable && r.scenario == scenario);
                let id = pos.map(|i| entry.giri[i].id).unwrap_or_else(|| self.id());
                let row = GiriRecord { id, country, variable, scenario, file_path, statistics, classification };
                match pos {
                    Some(i) => entry.giri[i] = row,
                    None => entry.giri.push(row),
                }
            }
            RecordDetails::Energy { infrastructure_type, capacity_attribute, icon_path, feature_count } => {
                let pos = entry
                    .energy
                    .iter()
                    .position(|r| r.infrastructure_type == infrastructure_type);
                let id = pos.map(|i| entry.energy[i].id).unwrap_or_else(|| self.id());
                let row = EnergyRecord { id, country, infrastructure_type, file_path, capacity_attribute, icon_path, feature_count };
                match pos {
                    Some(i) => entry.energy[i] = row,
                    None => entry.energy.push(row),
                }
            }
            RecordDetails::Boundary { admin_level, hover_attribute, feature_count, bounds } => {
                let pos = entry
                    .boundaries
                    .iter()
                    .position(|r| r.admin_level == admin_level);
                let id = pos.map(|i| entry.boundaries[i].id).unwrap_or_else(|| self.id());
                let row = BoundaryRecord { id, country, admin_level, file_path, hover_attribute, feature_count, bounds };
                match pos {
                    Some(i) => entry.boundaries[i] = row,
                    None => entry.boundaries.push(row),
                }
            }
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn has_boundary(&self, country: &str) -> StoreResult<bool> {
        self.check()?;
        Ok(!self.records(country).boundaries.is_empty())
    }
}

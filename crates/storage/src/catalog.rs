//! Layer metadata records and the PostgreSQL catalog.
//!
//! The schema is owned by the upload pipeline. The catalog reads and writes
//! four tables, one per dataset kind:
//!
//! | table           | identity columns                    |
//! |-----------------|-------------------------------------|
//! | `climate_data`  | country, variable, scenario         |
//! | `giri_data`     | country, variable, scenario         |
//! | `energy_data`   | country, infrastructure_type        |
//! | `boundary_data` | country, admin_level                |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, Transaction};
use thiserror::Error;
use tracing::debug;

use layer_common::DatasetKind;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database connection failed: {0}")]
    Connection(String),

    #[error("Database query failed: {0}")]
    Query(String),
}

/// Raster value statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateRecord {
    pub id: i32,
    pub country: String,
    pub variable: String,
    pub scenario: String,
    pub year_range: Option<String>,
    pub season: Option<String>,
    pub file_path: String,
    pub statistics: Statistics,
    pub classification: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiriRecord {
    pub id: i32,
    pub country: String,
    pub variable: String,
    pub scenario: String,
    pub file_path: String,
    pub statistics: Statistics,
    pub classification: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyRecord {
    pub id: i32,
    pub country: String,
    pub infrastructure_type: String,
    pub file_path: String,
    pub capacity_attribute: Option<String>,
    pub icon_path: Option<String>,
    pub feature_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryRecord {
    pub id: i32,
    pub country: String,
    pub admin_level: Option<String>,
    pub file_path: String,
    pub hover_attribute: Option<String>,
    pub feature_count: Option<i64>,
    pub bounds: Option<serde_json::Value>,
}

/// Every record stored for one country.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountryRecords {
    pub climate: Vec<ClimateRecord>,
    pub giri: Vec<GiriRecord>,
    pub energy: Vec<EnergyRecord>,
    pub boundaries: Vec<BoundaryRecord>,
}

impl CountryRecords {
    pub fn is_empty(&self) -> bool {
        self.climate.is_empty()
            && self.giri.is_empty()
            && self.energy.is_empty()
            && self.boundaries.is_empty()
    }
}

/// Kind-specific fields written after a successful publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RecordDetails {
    Climate {
        variable: String,
        scenario: String,
        year_range: Option<String>,
        season: Option<String>,
        statistics: Statistics,
        classification: serde_json::Value,
    },
    Giri {
        variable: String,
        scenario: String,
        statistics: Statistics,
        classification: serde_json::Value,
    },
    Energy {
        infrastructure_type: String,
        capacity_attribute: Option<String>,
        icon_path: Option<String>,
        feature_count: Option<i64>,
    },
    Boundary {
        admin_level: Option<String>,
        hover_attribute: Option<String>,
        feature_count: Option<i64>,
        bounds: Option<serde_json::Value>,
    },
}

/// A record to upsert, keyed by its identity columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub country: String,
    pub file_path: String,
    pub details: RecordDetails,
}

impl PublishRecord {
    pub fn kind(&self) -> DatasetKind {
        match self.details {
            RecordDetails::Climate { .. } => DatasetKind::Climate,
            RecordDetails::Giri { .. } => DatasetKind::Giri,
            RecordDetails::Energy { .. } => DatasetKind::Energy,
            RecordDetails::Boundary { .. } => DatasetKind::Boundary,
        }
    }
}

/// Persistence consumed by the lifecycle manager.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// All records for a (normalized) country.
    async fn country_records(&self, country: &str) -> StoreResult<CountryRecords>;

    /// Insert or replace the record for an identity.
    async fn record_publish(&self, record: &PublishRecord) -> StoreResult<()>;

    /// Whether any boundary record exists for the country.
    async fn has_boundary(&self, country: &str) -> StoreResult<bool>;
}

/// PostgreSQL-backed [`MetadataStore`].
pub struct Catalog {
    pool: PgPool,
}

impl Catalog {
    /// Create a new catalog connection from database URL.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn query_err(e: sqlx::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

#[async_trait]
impl MetadataStore for Catalog {
    async fn country_records(&self, country: &str) -> StoreResult<CountryRecords> {
        let climate = sqlx::query_as::<_, ClimateRow>(
            "SELECT id, country, variable, scenario, year_range, season, file_path, \
             min_value::FLOAT8 AS min_value, max_value::FLOAT8 AS max_value, \
             mean_value::FLOAT8 AS mean_value, classification \
             FROM climate_data WHERE lower(country) = $1 ORDER BY id",
        )
        .bind(country)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        let giri = sqlx::query_as::<_, GiriRow>(
            "SELECT id, country, variable, scenario, file_path, \
             min_value::FLOAT8 AS min_value, max_value::FLOAT8 AS max_value, \
             mean_value::FLOAT8 AS mean_value, classification \
             FROM giri_data WHERE lower(country) = $1 ORDER BY id",
        )
        .bind(country)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        let energy = sqlx::query_as::<_, EnergyRow>(
            "SELECT id, country, infrastructure_type, file_path, capacity_attribute, \
             icon_path, feature_count::BIGINT AS feature_count \
             FROM energy_data WHERE lower(country) = $1 ORDER BY id",
        )
        .bind(country)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        let boundaries = sqlx::query_as::<_, BoundaryRow>(
            "SELECT id, country, admin_level, file_path, hover_attribute, \
             feature_count::BIGINT AS feature_count, bounds \
             FROM boundary_data WHERE lower(country) = $1 ORDER BY id",
        )
        .bind(country)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        let records = CountryRecords {
            climate: climate.into_iter().map(Into::into).collect(),
            giri: giri.into_iter().map(Into::into).collect(),
            energy: energy.into_iter().map(Into::into).collect(),
            boundaries: boundaries.into_iter().map(Into::into).collect(),
        };
        debug!(
            country = %country,
            climate = records.climate.len(),
            giri = records.giri.len(),
            energy = records.energy.len(),
            boundaries = records.boundaries.len(),
            "Loaded country records"
        );
        Ok(records)
    }

    async fn record_publish(&self, record: &PublishRecord) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(query_err)?;
        upsert(&mut tx, record).await?;
        tx.commit().await.map_err(query_err)?;
        debug!(country = %record.country, kind = %record.kind(), "Recorded publish");
        Ok(())
    }

    async fn has_boundary(&self, country: &str) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM boundary_data WHERE lower(country) = $1)",
        )
        .bind(country)
        .fetch_one(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(exists)
    }
}

/// Update the row for the record's identity, inserting when none matched.
async fn upsert(tx: &mut Transaction<'_, Postgres>, record: &PublishRecord) -> StoreResult<()> {
    let country = record.country.as_str();
    let file_path = record.file_path.as_str();

    let updated = match &record.details {
        RecordDetails::Climate {
            variable,
            scenario,
            year_range,
            season,
            statistics,
            classification,
        } => {
            sqlx::query(
                "UPDATE climate_data SET file_path = $4, year_range = $5, season = $6, \
                 min_value = $7, max_value = $8, mean_value = $9, classification = $10 \
                 WHERE lower(country) = $1 AND variable = $2 AND scenario = $3",
            )
            .bind(country)
            .bind(variable)
            .bind(scenario)
            .bind(file_path)
            .bind(year_range)
            .bind(season)
            .bind(statistics.min)
            .bind(statistics.max)
            .bind(statistics.mean)
            .bind(classification)
            .execute(&mut **tx)
            .await
            .map_err(query_err)?
            .rows_affected()
        }
        RecordDetails::Giri {
            variable,
            scenario,
            statistics,
            classification,
        } => {
            sqlx::query(
                "UPDATE giri_data SET file_path = $4, min_value = $5, max_value = $6, \
                 mean_value = $7, classification = $8 \
                 WHERE lower(country) = $1 AND variable = $2 AND scenario = $3",
            )
            .bind(country)
            .bind(variable)
            .bind(scenario)
            .bind(file_path)
            .bind(statistics.min)
            .bind(statistics.max)
            .bind(statistics.mean)
            .bind(classification)
            .execute(&mut **tx)
            .await
            .map_err(query_err)?
            .rows_affected()
        }
        RecordDetails::Energy {
            infrastructure_type,
            capacity_attribute,
            icon_path,
            feature_count,
        } => {
            sqlx::query(
                "UPDATE energy_data SET file_path = $3, capacity_attribute = $4, \
                 icon_path = $5, feature_count = $6 \
                 WHERE lower(country) = $1 AND infrastructure_type = $2",
            )
            .bind(country)
            .bind(infrastructure_type)
            .bind(file_path)
            .bind(capacity_attribute)
            .bind(icon_path)
            .bind(feature_count)
            .execute(&mut **tx)
            .await
            .map_err(query_err)?
            .rows_affected()
        }
        RecordDetails::Boundary {
            admin_level,
            hover_attribute,
            feature_count,
            bounds,
        } => {
            sqlx::query(
                "UPDATE boundary_data SET file_path = $3, hover_attribute = $4, \
                 feature_count = $5, bounds = $6 \
                 WHERE lower(country) = $1 AND admin_level IS NOT DISTINCT FROM $2",
            )
            .bind(country)
            .bind(admin_level)
            .bind(file_path)
            .bind(hover_attribute)
            .bind(feature_count)
            .bind(bounds)
            .execute(&mut **tx)
            .await
            .map_err(query_err)?
            .rows_affected()
        }
    };

    if updated > 0 {
        return Ok(());
    }

    match &record.details {
        RecordDetails::Climate {
            variable,
            scenario,
            year_range,
            season,
            statistics,
            classification,
        } => sqlx::query(
            "INSERT INTO climate_data (country, variable, scenario, file_path, year_range, \
             season, min_value, max_value, mean_value, classification) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(country)
        .bind(variable)
        .bind(scenario)
        .bind(file_path)
        .bind(year_range)
        .bind(season)
        .bind(statistics.min)
        .bind(statistics.max)
        .bind(statistics.mean)
        .bind(classification)
        .execute(&mut **tx)
        .await
        .map_err(query_err)?,
        RecordDetails::Giri {
            variable,
            scenario,
            statistics,
            classification,
        } => sqlx::query(
            "INSERT INTO giri_data (country, variable, scenario, file_path, min_value, \
             max_value, mean_value, classification) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(country)
        .bind(variable)
        .bind(scenario)
        .bind(file_path)
        .bind(statistics.min)
        .bind(statistics.max)
        .bind(statistics.mean)
        .bind(classification)
        .execute(&mut **tx)
        .await
        .map_err(query_err)?,
        RecordDetails::Energy {
            infrastructure_type,
            capacity_attribute,
            icon_path,
            feature_count,
        } => sqlx::query(
            "INSERT INTO energy_data (country, infrastructure_type, file_path, \
             capacity_attribute, icon_path, feature_count) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(country)
        .bind(infrastructure_type)
        .bind(file_path)
        .bind(capacity_attribute)
        .bind(icon_path)
        .bind(feature_count)
        .execute(&mut **tx)
        .await
        .map_err(query_err)?,
        RecordDetails::Boundary {
            admin_level,
            hover_attribute,
            feature_count,
            bounds,
        } => sqlx::query(
            "INSERT INTO boundary_data (country, admin_level, file_path, hover_attribute, \
             feature_count, bounds) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(country)
        .bind(admin_level)
        .bind(file_path)
        .bind(hover_attribute)
        .bind(feature_count)
        .bind(bounds)
        .execute(&mut **tx)
        .await
        .map_err(query_err)?,
    };

    Ok(())
}

#[derive(FromRow)]
struct ClimateRow {
    id: i32,
    country: String,
    variable: String,
    scenario: String,
    year_range: Option<String>,
    season: Option<String>,
    file_path: String,
    min_value: Option<f64>,
    max_value: Option<f64>,
    mean_value: Option<f64>,
    classification: Option<serde_json::Value>,
}

impl From<ClimateRow> for ClimateRecord {
    fn from(row: ClimateRow) -> Self {
        ClimateRecord {
            id: row.id,
            country: row.country,
            variable: row.variable,
            scenario: row.scenario,
            year_range: row.year_range,
            season: row.season,
            file_path: row.file_path,
            statistics: Statistics {
                min: row.min_value,
                max: row.max_value,
                mean: row.mean_value,
            },
            classification: row.classification.unwrap_or(serde_json::Value::Null),
        }
    }
}

#[derive(FromRow)]
struct GiriRow {
    id: i32,
    country: String,
    variable: String,
    scenario: String,
    file_path: String,
    min_value: Option<f64>,
    max_value: Option<f64>,
    mean_value: Option<f64>,
    classification: Option<serde_json::Value>,
}

impl From<GiriRow> for GiriRecord {
    fn from(row: GiriRow) -> Self {
        GiriRecord {
            id: row.id,
            country: row.country,
            variable: row.variable,
            scenario: row.scenario,
            file_path: row.file_path,
            statistics: Statistics {
                min: row.min_value,
                max: row.max_value,
                mean: row.mean_value,
            },
            classification: row.classification.unwrap_or(serde_json::Value::Null),
        }
    }
}

#[derive(FromRow)]
struct EnergyRow {
    id: i32,
    country: String,
    infrastructure_type: String,
    file_path: String,
    capacity_attribute: Option<String>,
    icon_path: Option<String>,
    feature_count: Option<i64>,
}

impl From<EnergyRow> for EnergyRecord {
    fn from(row: EnergyRow) -> Self {
        EnergyRecord {
            id: row.id,
            country: row.country,
            infrastructure_type: row.infrastructure_type,
            file_path: row.file_path,
            capacity_attribute: row.capacity_attribute,
            icon_path: row.icon_path,
            feature_count: row.feature_count,
        }
    }
}

#[derive(FromRow)]
struct BoundaryRow {
    id: i32,
    country: String,
    admin_level: Option<String>,
    file_path: String,
    hover_attribute: Option<String>,
    feature_count: Option<i64>,
    bounds: Option<serde_json::Value>,
}

impl From<BoundaryRow> for BoundaryRecord {
    fn from(row: BoundaryRow) -> Self {
        BoundaryRecord {
            id: row.id,
            country: row.country,
            admin_level: row.admin_level,
            file_path: row.file_path,
            hover_attribute: row.hover_attribute,
            feature_count: row.feature_count,
            bounds: row.bounds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_record_kind() {
        let record = PublishRecord {
            country: "laos".into(),
            file_path: "postgis:laos_admin_1".into(),
            details: RecordDetails::Boundary {
                admin_level: None,
                hover_attribute: Some("NAME_1".into()),
                feature_count: Some(18),
                bounds: None,
            },
        };
        assert_eq!(record.kind(), DatasetKind::Boundary);
    }

    #[test]
    fn test_record_details_serde_tag() {
        let details = RecordDetails::Energy {
            infrastructure_type: "solar".into(),
            capacity_attribute: Some("capacity_mw".into()),
            icon_path: None,
            feature_count: None,
        };
        let value = serde_json::to_value(&details).unwrap();
        assert_eq!(value["kind"], "energy");
        assert_eq!(value["infrastructure_type"], "solar");
    }

    #[test]
    fn test_row_conversion_defaults_classification() {
        let row = ClimateRow {
            id: 7,
            country: "laos".into(),
            variable: "temp".into(),
            scenario: "rcp45".into(),
            year_range: Some("2041-2060".into()),
            season: None,
            file_path: "/data/cogs/laos_temp.tif".into(),
            min_value: Some(12.5),
            max_value: Some(31.0),
            mean_value: None,
            classification: None,
        };
        let record: ClimateRecord = row.into();
        assert_eq!(record.classification, serde_json::Value::Null);
        assert_eq!(record.statistics.max, Some(31.0));

        assert!(CountryRecords::default().is_empty());
    }
}

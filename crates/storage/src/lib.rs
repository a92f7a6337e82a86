//! Storage abstractions for the layer lifecycle service.
//!
//! Provides:
//! - [`MetadataStore`] over the PostgreSQL layer metadata tables
//! - [`MetadataCache`] with Redis and in-memory LRU backends

pub mod cache;
pub mod catalog;
pub mod memory_cache;

pub use cache::{CacheError, CacheKey, CacheResult, MetadataCache, RedisMetadataCache};
pub use catalog::{
    BoundaryRecord, Catalog, ClimateRecord, CountryRecords, EnergyRecord, GiriRecord,
    MetadataStore, PublishRecord, RecordDetails, Statistics, StoreError, StoreResult,
};
pub use memory_cache::{MemoryCacheStats, MemoryMetadataCache};

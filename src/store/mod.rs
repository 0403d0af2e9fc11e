// ABOUTME: Persistence seam for mapped records
// ABOUTME: PostgreSQL for real runs, an in-memory store for dry runs and tests

pub mod memory;
pub mod postgres;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::mapping::{EntitySchema, MappedRecord, RecordKey};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Rows actually written by one chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkCounts {
    pub inserted: u64,
    pub updated: u64,
}

/// Bulk operations the reconciler needs. Errors propagate verbatim.
#[async_trait]
pub trait Store: Send + Sync {
    /// Which of `keys` already exist in the schema's table.
    async fn existing_keys(
        &self,
        schema: &EntitySchema,
        keys: &[RecordKey],
    ) -> Result<HashSet<RecordKey>>;

    /// Greatest value of the schema's watermark column, if it has one and the
    /// table is not empty.
    async fn max_update_timestamp(&self, schema: &EntitySchema) -> Result<Option<DateTime<Utc>>>;

    /// Insert `inserts` (skipping key conflicts) and update the non-key
    /// columns of `updates`, atomically: either every write lands or none do.
    async fn write_chunk(
        &self,
        schema: &EntitySchema,
        inserts: &[MappedRecord],
        updates: &[MappedRecord],
    ) -> Result<ChunkCounts>;
}

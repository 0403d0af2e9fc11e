// ABOUTME: In-memory Store used by --dry-run and the test suites
// ABOUTME: Mirrors the PostgreSQL semantics, with optional write-failure injection

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ChunkCounts, Store};
use crate::mapping::{EntitySchema, FieldValue, MappedRecord, RecordKey};

pub type Row = HashMap<String, FieldValue>;

#[derive(Debug, Default, Clone)]
struct Table {
    keyed: BTreeMap<RecordKey, Row>,
    unkeyed: Vec<Row>,
}

impl Table {
    fn rows(&self) -> impl Iterator<Item = &Row> {
        self.keyed.values().chain(self.unkeyed.iter())
    }
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, Table>,
    write_calls: usize,
    fail_on_write: Option<usize>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `n`th `write_chunk` call (1-based) fail without writing.
    pub fn fail_on_write(&self, n: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_on_write = Some(n);
        }
    }

    /// Seed a keyed row directly, bypassing the reconciler.
    pub fn seed(&self, table: &str, key: RecordKey, row: Row) -> Result<()> {
        let mut state = self.lock()?;
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .keyed
            .insert(key, row);
        Ok(())
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|s| {
                s.tables
                    .get(table)
                    .map(|t| t.keyed.len() + t.unkeyed.len())
            })
            .unwrap_or(0)
    }

    pub fn keys(&self, table: &str) -> Vec<RecordKey> {
        self.lock()
            .ok()
            .and_then(|s| s.tables.get(table).map(|t| t.keyed.keys().cloned().collect()))
            .unwrap_or_default()
    }

    pub fn row(&self, table: &str, key: &RecordKey) -> Option<Row> {
        self.lock()
            .ok()
            .and_then(|s| s.tables.get(table).and_then(|t| t.keyed.get(key).cloned()))
    }

    pub fn write_calls(&self) -> usize {
        self.lock().map(|s| s.write_calls).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn existing_keys(
        &self,
        schema: &EntitySchema,
        keys: &[RecordKey],
    ) -> Result<HashSet<RecordKey>> {
        let state = self.lock()?;
        let Some(table) = state.tables.get(schema.table()) else {
            return Ok(HashSet::new());
        };
        Ok(keys
            .iter()
            .filter(|k| table.keyed.contains_key(k))
            .cloned()
            .collect())
    }

    async fn max_update_timestamp(&self, schema: &EntitySchema) -> Result<Option<DateTime<Utc>>> {
        let Some(column) = schema.watermark_column() else {
            return Ok(None);
        };
        let state = self.lock()?;
        let Some(table) = state.tables.get(schema.table()) else {
            return Ok(None);
        };
        Ok(table
            .rows()
            .filter_map(|row| match row.get(column) {
                Some(FieldValue::DateTime(ts)) => Some(*ts),
                _ => None,
            })
            .max())
    }

    async fn write_chunk(
        &self,
        schema: &EntitySchema,
        inserts: &[MappedRecord],
        updates: &[MappedRecord],
    ) -> Result<ChunkCounts> {
        let mut state = self.lock()?;
        state.write_calls += 1;
        if state.fail_on_write == Some(state.write_calls) {
            bail!(
                "injected write failure on call {} for {}",
                state.write_calls,
                schema.table()
            );
        }

        let table = state.tables.entry(schema.table().to_string()).or_default();
        let mut counts = ChunkCounts::default();

        for record in inserts {
            match &record.key {
                Some(key) if table.keyed.contains_key(key) => {}
                Some(key) => {
                    table.keyed.insert(key.clone(), record.fields.clone());
                    counts.inserted += 1;
                }
                None => {
                    table.unkeyed.push(record.fields.clone());
                    counts.inserted += 1;
                }
            }
        }

        for record in updates {
            let Some(row) = record.key.as_ref().and_then(|k| table.keyed.get_mut(k)) else {
                continue;
            };
            for column in schema.update_columns() {
                if let Some(value) = record.fields.get(column) {
                    row.insert(column.clone(), value.clone());
                }
            }
            counts.updated += 1;
        }

        Ok(counts)
    }
}

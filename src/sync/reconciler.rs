// ABOUTME: Partitions mapped records into inserts and updates against a Store
// ABOUTME: Applies both sets in bounded chunks, one transaction per chunk

use std::collections::HashSet;

use crate::mapping::{EntitySchema, MappedRecord, RecordKey};
use crate::store::Store;

/// Totals for one `apply` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Rows newly inserted. Conflicting inserts are ignored, not counted.
    pub inserted: u64,
    /// Rows whose non-key columns were rewritten.
    pub updated: u64,
    /// Records in the failed chunk and every chunk after it.
    pub failed: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("existing-key lookup on {table} failed: {source:#}")]
    KeyLookup {
        table: String,
        #[source]
        source: anyhow::Error,
    },
    /// Chunk `chunk` (0-based) was rolled back; earlier chunks stay committed.
    #[error("chunk {chunk} of {table} was rolled back: {source:#}")]
    ChunkFailed {
        table: String,
        chunk: usize,
        committed: ReconcileOutcome,
        #[source]
        source: anyhow::Error,
    },
}

impl ReconcileError {
    /// Work that was committed before the failure.
    pub fn committed(&self) -> ReconcileOutcome {
        match self {
            ReconcileError::KeyLookup { .. } => ReconcileOutcome::default(),
            ReconcileError::ChunkFailed { committed, .. } => *committed,
        }
    }
}

/// Records split by whether their key is already stored.
#[derive(Debug, Default)]
pub struct Partition {
    pub inserts: Vec<MappedRecord>,
    pub updates: Vec<MappedRecord>,
}

/// Split `records` by key membership in `existing`. Keyless records always
/// insert. Every record lands in exactly one set.
pub fn partition(records: Vec<MappedRecord>, existing: &HashSet<RecordKey>) -> Partition {
    let mut split = Partition::default();
    for record in records {
        match &record.key {
            Some(key) if existing.contains(key) => split.updates.push(record),
            _ => split.inserts.push(record),
        }
    }
    split
}

pub struct Reconciler<'a> {
    store: &'a dyn Store,
    chunk_size: usize,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn Store, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Reconcile one batch of records into the schema's table.
    ///
    /// Chunk `i` holds the `i`th slice of inserts together with the `i`th slice
    /// of updates and is written atomically. The first failing chunk stops the
    /// batch; the error carries what earlier chunks committed.
    pub async fn apply(
        &self,
        schema: &EntitySchema,
        records: Vec<MappedRecord>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        if records.is_empty() {
            return Ok(ReconcileOutcome::default());
        }

        let existing = if schema.has_primary_key() {
            let keys: Vec<RecordKey> = records
                .iter()
                .filter_map(|r| r.key.clone())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            self.store
                .existing_keys(schema, &keys)
                .await
                .map_err(|source| ReconcileError::KeyLookup {
                    table: schema.table().to_string(),
                    source,
                })?
        } else {
            HashSet::new()
        };

        let split = partition(records, &existing);
        tracing::debug!(
            "{}: {} to insert, {} to update",
            schema.table(),
            split.inserts.len(),
            split.updates.len()
        );

        let insert_chunks: Vec<&[MappedRecord]> = split.inserts.chunks(self.chunk_size).collect();
        let update_chunks: Vec<&[MappedRecord]> = split.updates.chunks(self.chunk_size).collect();
        let num_chunks = insert_chunks.len().max(update_chunks.len());

        let mut outcome = ReconcileOutcome::default();
        for chunk in 0..num_chunks {
            let inserts = insert_chunks.get(chunk).copied().unwrap_or(&[]);
            let updates = update_chunks.get(chunk).copied().unwrap_or(&[]);

            match self.store.write_chunk(schema, inserts, updates).await {
                Ok(counts) => {
                    outcome.inserted += counts.inserted;
                    outcome.updated += counts.updated;
                }
                Err(source) => {
                    let remaining: usize = insert_chunks[chunk.min(insert_chunks.len())..]
                        .iter()
                        .chain(update_chunks[chunk.min(update_chunks.len())..].iter())
                        .map(|c| c.len())
                        .sum();
                    outcome.failed = remaining as u64;
                    return Err(ReconcileError::ChunkFailed {
                        table: schema.table().to_string(),
                        chunk,
                        committed: outcome,
                        source,
                    });
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{FieldDescriptor, FieldType, FieldValue};
    use crate::store::MemoryStore;
    use std::collections::HashMap;

    fn schema() -> EntitySchema {
        EntitySchema::builder("Company", "companies")
            .field(
                "id",
                FieldDescriptor::new("id", "id", FieldType::Int)
                    .required()
                    .primary_key(),
            )
            .field("name", FieldDescriptor::new("name", "name", FieldType::String))
            .build()
            .unwrap()
    }

    fn record(id: i64, name: &str) -> MappedRecord {
        MappedRecord {
            key: Some(RecordKey::Int(id)),
            fields: HashMap::from([
                ("id".to_string(), FieldValue::Int(id)),
                ("name".to_string(), FieldValue::Text(name.to_string())),
            ]),
            degraded: Vec::new(),
        }
    }

    fn batch(ids: std::ops::Range<i64>, name: &str) -> Vec<MappedRecord> {
        ids.map(|id| record(id, name)).collect()
    }

    #[test]
    fn test_partition_is_total_and_disjoint() {
        let existing: HashSet<RecordKey> = (0..5).map(RecordKey::Int).collect();
        let mut records = batch(0..10, "x");
        records.push(MappedRecord {
            key: None,
            fields: HashMap::new(),
            degraded: Vec::new(),
        });

        let split = partition(records, &existing);
        assert_eq!(split.inserts.len() + split.updates.len(), 11);
        assert_eq!(split.updates.len(), 5);
        assert!(split
            .updates
            .iter()
            .all(|r| existing.contains(r.key.as_ref().unwrap())));
        assert!(split
            .inserts
            .iter()
            .all(|r| r.key.as_ref().map_or(true, |k| !existing.contains(k))));
    }

    #[tokio::test]
    async fn test_apply_inserts_then_updates() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(&store, 3);
        let schema = schema();

        let first = reconciler.apply(&schema, batch(0..7, "v1")).await.unwrap();
        assert_eq!(first, ReconcileOutcome { inserted: 7, updated: 0, failed: 0 });
        assert_eq!(store.write_calls(), 3);

        let second = reconciler.apply(&schema, batch(5..10, "v2")).await.unwrap();
        assert_eq!(second.inserted, 3);
        assert_eq!(second.updated, 2);
        assert_eq!(store.row_count("companies"), 10);
        assert_eq!(
            store.row("companies", &RecordKey::Int(5)).unwrap()["name"],
            FieldValue::Text("v2".into())
        );
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(&store, 4);
        let schema = schema();

        reconciler.apply(&schema, batch(0..10, "same")).await.unwrap();
        let keys_before = store.keys("companies");
        let rows_before: Vec<_> = keys_before
            .iter()
            .map(|k| store.row("companies", k))
            .collect();

        let again = reconciler.apply(&schema, batch(0..10, "same")).await.unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.updated, 10);
        assert_eq!(store.keys("companies"), keys_before);
        let rows_after: Vec<_> = keys_before
            .iter()
            .map(|k| store.row("companies", k))
            .collect();
        assert_eq!(rows_after, rows_before);
    }

    #[tokio::test]
    async fn test_failed_chunk_keeps_earlier_chunks() {
        let store = MemoryStore::new();
        store.fail_on_write(2);
        let reconciler = Reconciler::new(&store, 4);
        let schema = schema();

        let err = reconciler.apply(&schema, batch(0..10, "x")).await.unwrap_err();
        match &err {
            ReconcileError::ChunkFailed { chunk, committed, .. } => {
                assert_eq!(*chunk, 1);
                assert_eq!(committed.inserted, 4);
                assert_eq!(committed.failed, 6);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(store.row_count("companies"), 4);
        assert_eq!(err.committed().inserted, 4);
    }

    #[tokio::test]
    async fn test_keyless_schema_always_inserts() {
        let store = MemoryStore::new();
        let reconciler = Reconciler::new(&store, 100);
        let schema = EntitySchema::builder("ContactPhone", "contact_phones")
            .field(
                "phone",
                FieldDescriptor::new("homePhone", "home_phone", FieldType::String),
            )
            .build()
            .unwrap();
        let record = MappedRecord {
            key: None,
            fields: HashMap::from([("home_phone".to_string(), FieldValue::Text("555".into()))]),
            degraded: Vec::new(),
        };

        reconciler.apply(&schema, vec![record.clone()]).await.unwrap();
        let outcome = reconciler.apply(&schema, vec![record]).await.unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(store.row_count("contact_phones"), 2);
    }
}

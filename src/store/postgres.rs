// ABOUTME: PostgreSQL Store: key lookup, conflict-ignoring insert and keyed update
// ABOUTME: Builds multi-row statements split under the bind parameter limit

use std::collections::HashSet;
use std::error::Error;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Client, Transaction};
use uuid::Uuid;

use super::{ChunkCounts, Store};
use crate::mapping::{EntitySchema, FieldType, FieldValue, MappedRecord, RecordKey};
use crate::sync::{with_backoff, BackoffPolicy};
use crate::utils::{quote_ident, redact_url, validate_postgres_identifier};

/// PostgreSQL accepts at most 65535 bind parameters per statement.
const MAX_PARAMS: usize = 65000;

pub struct PostgresStore {
    client: Mutex<Client>,
}

impl PostgresStore {
    /// Connect over TLS (when the server offers it), retrying transient failures.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = with_backoff(&connect_policy(), || connect_once(url), |_| true)
            .await
            .with_context(|| format!("Failed to connect to {}", redact_url(url)))?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client: Mutex::new(client),
        }
    }
}

/// Four connection attempts, one second apart at first.
fn connect_policy() -> BackoffPolicy {
    BackoffPolicy {
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(8),
        max_attempts: 4,
    }
}

async fn connect_once(url: &str) -> Result<Client> {
    let connector = native_tls::TlsConnector::builder()
        .build()
        .context("Failed to build TLS connector")?;
    let tls = postgres_native_tls::MakeTlsConnector::new(connector);

    let (client, connection) = tokio_postgres::connect(url, tls)
        .await
        .context("Failed to open PostgreSQL connection")?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error: {}", e);
        }
    });

    Ok(client)
}

/// Check every identifier the statements will interpolate.
fn check_identifiers(schema: &EntitySchema) -> Result<()> {
    validate_postgres_identifier(schema.table())
        .with_context(|| format!("Invalid table name for {}", schema.kind()))?;
    for column in schema.columns() {
        validate_postgres_identifier(column)
            .with_context(|| format!("Invalid column name in {}", schema.table()))?;
    }
    Ok(())
}

#[async_trait]
impl Store for PostgresStore {
    async fn existing_keys(
        &self,
        schema: &EntitySchema,
        keys: &[RecordKey],
    ) -> Result<HashSet<RecordKey>> {
        let Some(pk) = schema.primary_key() else {
            return Ok(HashSet::new());
        };
        if keys.is_empty() {
            return Ok(HashSet::new());
        }
        check_identifiers(schema)?;

        let query = build_existing_keys_query(schema.table(), &pk.dest_field, pk.field_type);
        let values: Vec<FieldValue> = keys.iter().map(RecordKey::to_value).collect();

        let client = self.client.lock().await;
        let rows = client
            .query(&query, &[&values])
            .await
            .with_context(|| format!("Failed to look up existing keys in {}", schema.table()))?;

        let mut found = HashSet::with_capacity(rows.len());
        for row in rows {
            let key = match pk.field_type {
                FieldType::Uuid => RecordKey::Uuid(row.try_get::<_, Uuid>(0)?),
                FieldType::Int => RecordKey::Int(row.try_get::<_, i64>(0)?),
                _ => RecordKey::Text(row.try_get::<_, String>(0)?),
            };
            found.insert(key);
        }
        Ok(found)
    }

    async fn max_update_timestamp(&self, schema: &EntitySchema) -> Result<Option<DateTime<Utc>>> {
        let Some(column) = schema.watermark_column() else {
            return Ok(None);
        };
        check_identifiers(schema)?;

        let query = format!(
            "SELECT MAX({})::timestamptz FROM {}",
            quote_ident(column),
            quote_ident(schema.table())
        );

        let client = self.client.lock().await;
        let row = client
            .query_one(&query, &[])
            .await
            .with_context(|| format!("Failed to read watermark of {}", schema.table()))?;
        Ok(row.try_get::<_, Option<DateTime<Utc>>>(0)?)
    }

    async fn write_chunk(
        &self,
        schema: &EntitySchema,
        inserts: &[MappedRecord],
        updates: &[MappedRecord],
    ) -> Result<ChunkCounts> {
        if inserts.is_empty() && updates.is_empty() {
            return Ok(ChunkCounts::default());
        }
        check_identifiers(schema)?;

        let mut client = self.client.lock().await;
        let tx = client
            .transaction()
            .await
            .context("Failed to begin transaction")?;

        let inserted = insert_rows(&tx, schema, inserts).await?;
        let updated = update_rows(&tx, schema, updates).await?;

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit chunk for {}", schema.table()))?;

        Ok(ChunkCounts { inserted, updated })
    }
}

async fn insert_rows(
    tx: &Transaction<'_>,
    schema: &EntitySchema,
    records: &[MappedRecord],
) -> Result<u64> {
    let columns = schema.columns();
    let types = column_types(schema, columns);
    let batch_size = std::cmp::max(1, MAX_PARAMS / columns.len());
    let mut total = 0u64;

    for batch in records.chunks(batch_size) {
        let query = build_insert_query(schema.table(), columns, &types, batch.len());
        let params = row_params(batch, columns);
        total += tx
            .execute(&query, &params)
            .await
            .with_context(|| format!("Failed to insert {} rows into {}", batch.len(), schema.table()))?;
    }

    Ok(total)
}

async fn update_rows(
    tx: &Transaction<'_>,
    schema: &EntitySchema,
    records: &[MappedRecord],
) -> Result<u64> {
    let Some(pk) = schema.primary_key() else {
        return Ok(0);
    };
    if records.is_empty() || schema.update_columns().is_empty() {
        return Ok(0);
    }

    let columns: Vec<String> = std::iter::once(pk.dest_field.clone())
        .chain(schema.update_columns().iter().cloned())
        .collect();
    let types = column_types(schema, &columns);
    let batch_size = std::cmp::max(1, MAX_PARAMS / columns.len());
    let mut total = 0u64;

    for batch in records.chunks(batch_size) {
        let query = build_update_query(schema.table(), &columns, &types, batch.len());
        let params = row_params(batch, &columns);
        total += tx
            .execute(&query, &params)
            .await
            .with_context(|| format!("Failed to update {} rows in {}", batch.len(), schema.table()))?;
    }

    Ok(total)
}

fn column_types(schema: &EntitySchema, columns: &[String]) -> Vec<&'static str> {
    columns
        .iter()
        .map(|c| {
            schema
                .column_type(c)
                .map_or("text", |t| t.sql_type())
        })
        .collect()
}

/// Flatten records into row-major parameters; absent columns bind NULL.
fn row_params<'a>(records: &'a [MappedRecord], columns: &[String]) -> Vec<&'a (dyn ToSql + Sync)> {
    records
        .iter()
        .flat_map(|record| {
            columns.iter().map(move |c| {
                record
                    .fields
                    .get(c)
                    .map_or(&NULL as &(dyn ToSql + Sync), |v| v as &(dyn ToSql + Sync))
            })
        })
        .collect()
}

static NULL: FieldValue = FieldValue::Null;

/// `($1::uuid, $2::text), ($3::uuid, $4::text), ...`
fn values_list(types: &[&str], num_rows: usize) -> String {
    let num_cols = types.len();
    (0..num_rows)
        .map(|row_idx| {
            let placeholders: Vec<String> = types
                .iter()
                .enumerate()
                .map(|(col_idx, ty)| format!("${}::{}", row_idx * num_cols + col_idx + 1, ty))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build a multi-row insert that skips rows hitting a unique constraint.
///
/// ```sql
/// INSERT INTO "jobs" ("id", "name") VALUES ($1::uuid, $2::text), ...
/// ON CONFLICT DO NOTHING
/// ```
fn build_insert_query(table: &str, columns: &[String], types: &[&str], num_rows: usize) -> String {
    let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT DO NOTHING",
        quote_ident(table),
        quoted.join(", "),
        values_list(types, num_rows)
    )
}

/// Build a keyed multi-row update. `columns[0]` is the primary key.
///
/// ```sql
/// UPDATE "jobs" AS t SET "name" = v."name"
/// FROM (VALUES ($1::uuid, $2::text), ...) AS v("id", "name")
/// WHERE t."id" = v."id"
/// ```
fn build_update_query(table: &str, columns: &[String], types: &[&str], num_rows: usize) -> String {
    let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let assignments: Vec<String> = quoted[1..]
        .iter()
        .map(|c| format!("{} = v.{}", c, c))
        .collect();
    format!(
        "UPDATE {} AS t SET {} FROM (VALUES {}) AS v({}) WHERE t.{} = v.{}",
        quote_ident(table),
        assignments.join(", "),
        values_list(types, num_rows),
        quoted.join(", "),
        quoted[0],
        quoted[0]
    )
}

fn build_existing_keys_query(table: &str, pk: &str, pk_type: FieldType) -> String {
    let pk = quote_ident(pk);
    let sql_type = pk_type.sql_type();
    format!(
        "SELECT {pk}::{sql_type} FROM {table} WHERE {pk} = ANY($1::{sql_type}[])",
        pk = pk,
        sql_type = sql_type,
        table = quote_ident(table)
    )
}

impl ToSql for FieldValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            FieldValue::Null => Ok(IsNull::Yes),
            FieldValue::Uuid(v) => checked(v, ty, out),
            FieldValue::DateTime(v) => checked(v, ty, out),
            FieldValue::Bool(v) => checked(v, ty, out),
            FieldValue::Int(v) => checked(v, ty, out),
            FieldValue::Float(v) => checked(v, ty, out),
            FieldValue::Decimal(v) => checked(v, ty, out),
            FieldValue::Text(v) => checked(v, ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn checked<T: ToSql>(
    value: &T,
    ty: &Type,
    out: &mut BytesMut,
) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
    if !T::accepts(ty) {
        return Err(format!("cannot bind {} to a {} parameter", std::any::type_name::<T>(), ty).into());
    }
    value.to_sql(ty, out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_policy_doubles_from_one_second() {
        let policy = connect_policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay(0), Duration::from_secs(1));
        assert_eq!(policy.base_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_build_insert_query() {
        let columns = vec!["id".to_string(), "type".to_string()];
        let query = build_insert_query("activities", &columns, &["uuid", "text"], 2);
        assert_eq!(
            query,
            "INSERT INTO \"activities\" (\"id\", \"type\") VALUES ($1::uuid, $2::text), \
             ($3::uuid, $4::text) ON CONFLICT DO NOTHING"
        );
    }

    #[test]
    fn test_build_update_query() {
        let columns = vec!["id".to_string(), "name".to_string(), "is_active".to_string()];
        let query = build_update_query("employees", &columns, &["uuid", "text", "boolean"], 1);
        assert_eq!(
            query,
            "UPDATE \"employees\" AS t SET \"name\" = v.\"name\", \"is_active\" = v.\"is_active\" \
             FROM (VALUES ($1::uuid, $2::text, $3::boolean)) AS v(\"id\", \"name\", \"is_active\") \
             WHERE t.\"id\" = v.\"id\""
        );
    }

    #[test]
    fn test_build_existing_keys_query() {
        assert_eq!(
            build_existing_keys_query("companies", "id", FieldType::Int),
            "SELECT \"id\"::bigint FROM \"companies\" WHERE \"id\" = ANY($1::bigint[])"
        );
    }

    #[test]
    fn test_row_params_bind_null_for_missing_columns() {
        let record = MappedRecord {
            key: Some(RecordKey::Int(1)),
            fields: [("id".to_string(), FieldValue::Int(1))].into_iter().collect(),
            degraded: Vec::new(),
        };
        let columns = vec!["id".to_string(), "name".to_string()];
        let params = row_params(std::slice::from_ref(&record), &columns);
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_field_value_rejects_mismatched_type() {
        let mut buf = BytesMut::new();
        let err = FieldValue::Bool(true).to_sql(&Type::UUID, &mut buf);
        assert!(err.is_err());
        let ok = FieldValue::Int(7).to_sql(&Type::INT8, &mut buf).unwrap();
        assert!(matches!(ok, IsNull::No));
    }
}

// ABOUTME: Declarative mapping from feed entries to typed records
// ABOUTME: Entity kinds are schema values, not per-entity code

pub mod mapper;
pub mod schema;
pub mod value;

pub use mapper::{extract, extract_all, MappedBatch, MappedRecord, SkipReason};
pub use schema::{EntitySchema, FieldDescriptor, SchemaError};
pub use value::{coerce, parse_datetime, FieldType, FieldValue, RecordKey};

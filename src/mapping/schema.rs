// ABOUTME: Declarative field descriptors and per-entity schemas
// ABOUTME: Validates descriptor intent and precomputes column lists at build time

use std::collections::HashSet;

use super::value::{FieldType, FieldValue};

/// Reasons a schema declaration is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("schema '{0}' declares no fields")]
    Empty(String),
    #[error("field '{0}' cannot be both required and have a default value")]
    RequiredWithDefault(String),
    #[error("default for field '{field}' is not a {expected} value")]
    DefaultTypeMismatch { field: String, expected: FieldType },
    #[error("field '{0}' is declared more than once")]
    DuplicateField(String),
    #[error("schema '{0}' declares more than one primary key")]
    MultiplePrimaryKeys(String),
    #[error("primary key '{field}' has type {field_type}, which cannot identify records")]
    UnsupportedKeyType { field: String, field_type: FieldType },
    #[error("primary key '{0}' must be required")]
    OptionalPrimaryKey(String),
    #[error("watermark column '{0}' is not a date-time field of the schema")]
    InvalidWatermark(String),
}

/// How one upstream tag maps onto one destination column.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub source_tag: String,
    pub dest_field: String,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<FieldValue>,
    pub is_primary_key: bool,
}

impl FieldDescriptor {
    pub fn new(source_tag: &str, dest_field: &str, field_type: FieldType) -> Self {
        Self {
            source_tag: source_tag.to_string(),
            dest_field: dest_field.to_string(),
            field_type,
            required: false,
            default: None,
            is_primary_key: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Value stored when the tag is missing, null, or fails to coerce.
    pub fn with_default(mut self, value: impl Into<FieldValue>) -> Self {
        let value = value.into();
        self.default = if value.is_null() { None } else { Some(value) };
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    fn validate(&self, name: &str) -> Result<(), SchemaError> {
        if let Some(default) = &self.default {
            if self.required {
                return Err(SchemaError::RequiredWithDefault(name.to_string()));
            }
            if default.field_type() != Some(self.field_type) {
                return Err(SchemaError::DefaultTypeMismatch {
                    field: name.to_string(),
                    expected: self.field_type,
                });
            }
        }
        if self.is_primary_key {
            if !self.field_type.can_be_key() {
                return Err(SchemaError::UnsupportedKeyType {
                    field: name.to_string(),
                    field_type: self.field_type,
                });
            }
            if !self.required {
                return Err(SchemaError::OptionalPrimaryKey(name.to_string()));
            }
        }
        Ok(())
    }
}

/// Ordered field table for one record kind. Immutable once built.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    kind: String,
    table: String,
    fields: Vec<(String, FieldDescriptor)>,
    primary_key: Option<usize>,
    watermark_column: Option<String>,
    columns: Vec<String>,
    update_columns: Vec<String>,
}

impl EntitySchema {
    pub fn builder(kind: &str, table: &str) -> SchemaBuilder {
        SchemaBuilder {
            kind: kind.to_string(),
            table: table.to_string(),
            fields: Vec::new(),
            watermark_column: None,
        }
    }

    /// Logical record kind, e.g. `Activity`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Destination table in the store.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Fields in declaration order, keyed by logical name.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldDescriptor)> {
        self.fields.iter().map(|(name, d)| (name.as_str(), d))
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
    }

    pub fn primary_key(&self) -> Option<&FieldDescriptor> {
        self.primary_key.map(|idx| &self.fields[idx].1)
    }

    pub fn has_primary_key(&self) -> bool {
        self.primary_key.is_some()
    }

    /// Column holding the last-update timestamp used as the incremental watermark.
    pub fn watermark_column(&self) -> Option<&str> {
        self.watermark_column.as_deref()
    }

    /// Every destination column, in declaration order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Destination columns rewritten by a keyed update (all but the key).
    pub fn update_columns(&self) -> &[String] {
        &self.update_columns
    }

    /// Field type of a destination column.
    pub fn column_type(&self, column: &str) -> Option<FieldType> {
        self.fields
            .iter()
            .find(|(_, d)| d.dest_field == column)
            .map(|(_, d)| d.field_type)
    }
}

pub struct SchemaBuilder {
    kind: String,
    table: String,
    fields: Vec<(String, FieldDescriptor)>,
    watermark_column: Option<String>,
}

impl SchemaBuilder {
    pub fn field(mut self, name: &str, descriptor: FieldDescriptor) -> Self {
        self.fields.push((name.to_string(), descriptor));
        self
    }

    /// Mark a date-time destination column as the incremental watermark.
    pub fn watermark(mut self, column: &str) -> Self {
        self.watermark_column = Some(column.to_string());
        self
    }

    pub fn build(self) -> Result<EntitySchema, SchemaError> {
        if self.fields.is_empty() {
            return Err(SchemaError::Empty(self.kind));
        }

        let mut names = HashSet::new();
        let mut dests = HashSet::new();
        let mut primary_key = None;

        for (idx, (name, descriptor)) in self.fields.iter().enumerate() {
            descriptor.validate(name)?;
            if !names.insert(name.as_str()) {
                return Err(SchemaError::DuplicateField(name.clone()));
            }
            if !dests.insert(descriptor.dest_field.as_str()) {
                return Err(SchemaError::DuplicateField(descriptor.dest_field.clone()));
            }
            if descriptor.is_primary_key {
                if primary_key.is_some() {
                    return Err(SchemaError::MultiplePrimaryKeys(self.kind.clone()));
                }
                primary_key = Some(idx);
            }
        }

        if let Some(column) = &self.watermark_column {
            let is_datetime = self
                .fields
                .iter()
                .any(|(_, d)| &d.dest_field == column && d.field_type == FieldType::DateTime);
            if !is_datetime {
                return Err(SchemaError::InvalidWatermark(column.clone()));
            }
        }

        let columns: Vec<String> = self
            .fields
            .iter()
            .map(|(_, d)| d.dest_field.clone())
            .collect();
        let update_columns = self
            .fields
            .iter()
            .filter(|(_, d)| !d.is_primary_key)
            .map(|(_, d)| d.dest_field.clone())
            .collect();

        Ok(EntitySchema {
            kind: self.kind,
            table: self.table,
            fields: self.fields,
            primary_key,
            watermark_column: self.watermark_column,
            columns,
            update_columns,
        })
    }
}

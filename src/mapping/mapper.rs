// ABOUTME: Schema-driven extraction of typed records from parsed feed entries
// ABOUTME: Coercion failures on optional fields degrade to defaults and are counted

use std::collections::HashMap;

use crate::feed::{self, RawEntry};

use super::schema::EntitySchema;
use super::value::{coerce, FieldValue, RecordKey};

/// Why an entry produced no record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SkipReason {
    #[error("required field '{0}' is missing or could not be converted")]
    MissingRequiredField(String),
    #[error("entry has no properties block")]
    MissingProperties,
}

/// One record ready for reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRecord {
    /// Primary key value, `None` when the schema declares no key.
    pub key: Option<RecordKey>,
    /// Destination column -> value. Every schema column is present.
    pub fields: HashMap<String, FieldValue>,
    /// Optional fields whose text was present but failed to coerce.
    pub degraded: Vec<String>,
}

impl MappedRecord {
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.fields.get(column)
    }
}

/// Extract one record from `entry` according to `schema`.
///
/// Descriptors are applied in schema order. A required field without a usable
/// value rejects the whole entry; an optional field whose text fails to
/// coerce is stored as its default (or null) and listed in
/// [`MappedRecord::degraded`].
pub fn extract(entry: &RawEntry, schema: &EntitySchema) -> Result<MappedRecord, SkipReason> {
    if !entry.has_properties() {
        return Err(SkipReason::MissingProperties);
    }

    let mut fields = HashMap::with_capacity(schema.columns().len());
    let mut degraded = Vec::new();
    let mut key = None;

    for (name, descriptor) in schema.fields() {
        let raw = feed::text(entry, &descriptor.source_tag);
        let coerced = raw.and_then(|text| coerce(text, descriptor.field_type));

        if coerced.is_none() {
            if descriptor.required {
                return Err(SkipReason::MissingRequiredField(name.to_string()));
            }
            if let Some(text) = raw.filter(|t| !t.trim().is_empty()) {
                tracing::warn!(
                    "{}: could not convert '{}' to {} for field '{}'",
                    schema.kind(),
                    text,
                    descriptor.field_type,
                    name
                );
                degraded.push(name.to_string());
            }
        }

        if descriptor.is_primary_key {
            key = coerced.as_ref().and_then(RecordKey::from_value);
        }

        let value = coerced
            .or_else(|| descriptor.default.clone())
            .unwrap_or(FieldValue::Null);
        fields.insert(descriptor.dest_field.clone(), value);
    }

    Ok(MappedRecord {
        key,
        fields,
        degraded,
    })
}

/// Result of mapping a whole page of entries.
#[derive(Debug, Default)]
pub struct MappedBatch {
    pub records: Vec<MappedRecord>,
    pub skipped: usize,
    pub degraded_fields: usize,
}

/// Map every entry, skipping (and logging) the ones that cannot be extracted.
pub fn extract_all(entries: &[RawEntry], schema: &EntitySchema) -> MappedBatch {
    let mut batch = MappedBatch::default();

    for (idx, entry) in entries.iter().enumerate() {
        match extract(entry, schema) {
            Ok(record) => {
                batch.degraded_fields += record.degraded.len();
                batch.records.push(record);
            }
            Err(reason) => {
                let id = schema
                    .primary_key()
                    .and_then(|pk| feed::text(entry, &pk.source_tag))
                    .unwrap_or("<unknown>");
                tracing::warn!(
                    "{}: skipping entry {} (id {}): {}",
                    schema.kind(),
                    idx,
                    id,
                    reason
                );
                batch.skipped += 1;
            }
        }
    }

    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::schema::FieldDescriptor;
    use crate::mapping::value::FieldType;
    use uuid::Uuid;

    const ID: &str = "8f14e45f-ceea-467f-a0e6-b1f2c3d4e5f6";

    fn schema() -> EntitySchema {
        EntitySchema::builder("Employee", "employees")
            .field(
                "id",
                FieldDescriptor::new("id", "id", FieldType::Uuid)
                    .required()
                    .primary_key(),
            )
            .field("name", FieldDescriptor::new("name", "name", FieldType::String))
            .field(
                "company_id",
                FieldDescriptor::new("companyId", "company_id", FieldType::Int),
            )
            .field(
                "is_active",
                FieldDescriptor::new("isActive", "is_active", FieldType::Bool).with_default(true),
            )
            .build()
            .unwrap()
    }

    fn entry(props: &[(&str, Option<&str>)]) -> RawEntry {
        RawEntry::from_properties(
            props
                .iter()
                .map(|(k, v)| (k.to_string(), v.map(str::to_string))),
        )
    }

    #[test]
    fn test_extracts_typed_fields_and_key() {
        let record = extract(
            &entry(&[
                ("id", Some(ID)),
                ("name", Some("Pat")),
                ("companyId", Some("17")),
                ("isActive", Some("False")),
            ]),
            &schema(),
        )
        .unwrap();

        assert_eq!(record.key, Some(RecordKey::Uuid(Uuid::parse_str(ID).unwrap())));
        assert_eq!(record.get("name"), Some(&FieldValue::Text("Pat".into())));
        assert_eq!(record.get("company_id"), Some(&FieldValue::Int(17)));
        assert_eq!(record.get("is_active"), Some(&FieldValue::Bool(false)));
        assert!(record.degraded.is_empty());
    }

    #[test]
    fn test_missing_required_field_skips_record() {
        let err = extract(&entry(&[("name", Some("Pat"))]), &schema()).unwrap_err();
        assert_eq!(err, SkipReason::MissingRequiredField("id".into()));

        let err = extract(&entry(&[("id", Some("not-a-uuid"))]), &schema()).unwrap_err();
        assert_eq!(err, SkipReason::MissingRequiredField("id".into()));

        let err = extract(&entry(&[("id", None)]), &schema()).unwrap_err();
        assert_eq!(err, SkipReason::MissingRequiredField("id".into()));
    }

    #[test]
    fn test_missing_optional_field_uses_default() {
        let record = extract(&entry(&[("id", Some(ID))]), &schema()).unwrap();
        assert_eq!(record.get("is_active"), Some(&FieldValue::Bool(true)));
        assert_eq!(record.get("name"), Some(&FieldValue::Null));
        assert_eq!(record.get("company_id"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_null_marked_bool_uses_default() {
        let record = extract(&entry(&[("id", Some(ID)), ("isActive", None)]), &schema()).unwrap();
        assert_eq!(record.get("is_active"), Some(&FieldValue::Bool(true)));
    }

    #[test]
    fn test_unparsable_optional_field_degrades() {
        let record = extract(
            &entry(&[("id", Some(ID)), ("companyId", Some("seventeen"))]),
            &schema(),
        )
        .unwrap();
        assert_eq!(record.get("company_id"), Some(&FieldValue::Null));
        assert_eq!(record.degraded, vec!["company_id".to_string()]);
    }

    #[test]
    fn test_empty_optional_text_is_not_counted_as_drift() {
        let record = extract(&entry(&[("id", Some(ID)), ("companyId", Some(""))]), &schema())
            .unwrap();
        assert_eq!(record.get("company_id"), Some(&FieldValue::Null));
        assert!(record.degraded.is_empty());
    }

    #[test]
    fn test_entry_without_properties_is_skipped() {
        let err = extract(&RawEntry::default(), &schema()).unwrap_err();
        assert_eq!(err, SkipReason::MissingProperties);
    }

    #[test]
    fn test_schema_without_key_yields_keyless_records() {
        let schema = EntitySchema::builder("ContactPhone", "contact_phones")
            .field(
                "contact_id",
                FieldDescriptor::new("contactId", "contact_id", FieldType::Uuid).required(),
            )
            .field(
                "phone_number",
                FieldDescriptor::new("phoneNumber", "phone_number", FieldType::String),
            )
            .build()
            .unwrap();
        let record = extract(
            &entry(&[("contactId", Some(ID)), ("phoneNumber", Some("555-0100"))]),
            &schema,
        )
        .unwrap();
        assert!(record.key.is_none());
        assert_eq!(record.fields.len(), 2);
    }

    #[test]
    fn test_extract_all_counts_skips_and_drift() {
        let entries = vec![
            entry(&[("id", Some(ID)), ("companyId", Some("x"))]),
            entry(&[("name", Some("no id"))]),
            entry(&[("id", Some(ID))]),
        ];
        let batch = extract_all(&entries, &schema());
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.skipped, 1);
        assert_eq!(batch.degraded_fields, 1);
    }
}

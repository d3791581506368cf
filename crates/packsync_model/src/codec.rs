//! JSON encoding of record sets and lenient import parsing.
//!
//! Storage backends use the strict pair [`encode_records`] /
//! [`decode_records`]: anything they read back was written by them, so a
//! malformed entry means corruption. Imports come from users and go through
//! [`parse_import`], which drops malformed entries one by one and only fails
//! when the payload as a whole is unusable.

use crate::error::{CodecError, CodecResult};
use crate::record::{Record, SerializedRecord};
use serde_json::Value;
use std::collections::HashSet;

/// Records that survived import validation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImportBatch {
    /// Valid records, in payload order.
    pub records: Vec<Record>,
    /// Number of entries that failed validation.
    pub discarded: usize,
}

impl ImportBatch {
    /// Returns the report for this batch.
    pub fn report(&self) -> ImportReport {
        ImportReport {
            imported: self.records.len(),
            discarded: self.discarded,
        }
    }
}

/// Outcome of an import, reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportReport {
    /// Number of records written.
    pub imported: usize,
    /// Number of entries dropped by validation.
    pub discarded: usize,
}

/// Encodes a record set as a pretty-printed JSON array.
pub fn encode_records(records: &[Record]) -> CodecResult<String> {
    let serialized: Vec<SerializedRecord> = records.iter().map(Record::serialize).collect();
    serde_json::to_string_pretty(&serialized).map_err(|e| CodecError::encoding(e.to_string()))
}

/// Decodes a JSON array written by [`encode_records`].
///
/// Fails on the first entry that does not match the record shape.
pub fn decode_records(json: &str) -> CodecResult<Vec<Record>> {
    let serialized: Vec<SerializedRecord> =
        serde_json::from_str(json).map_err(|e| CodecError::invalid_json(e.to_string()))?;
    serialized.into_iter().map(Record::try_from).collect()
}

/// Parses a user-supplied payload, discarding entries that fail validation.
///
/// Ids are unique within a set: an entry whose id was already seen earlier
/// in the payload is discarded as well.
///
/// # Errors
///
/// Returns an error only if the payload is not JSON or is not an array.
pub fn parse_import(json: &str) -> CodecResult<ImportBatch> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| CodecError::invalid_json(e.to_string()))?;

    let entries = match value {
        Value::Array(entries) => entries,
        other => {
            return Err(CodecError::NotAnArray {
                found: json_type_name(&other),
            })
        }
    };

    let mut batch = ImportBatch::default();
    let mut seen = HashSet::new();
    for (index, entry) in entries.into_iter().enumerate() {
        let checked = validate_entry(index, entry).and_then(|record| {
            if seen.insert(record.id) {
                Ok(record)
            } else {
                Err(CodecError::invalid_record(
                    index,
                    format!("duplicate id {}", record.id),
                ))
            }
        });
        match checked {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                tracing::debug!(error = %e, "dropping import entry");
                batch.discarded += 1;
            }
        }
    }

    if batch.discarded > 0 {
        tracing::warn!(
            discarded = batch.discarded,
            kept = batch.records.len(),
            "import filtered invalid entries"
        );
    }

    Ok(batch)
}

fn validate_entry(index: usize, entry: Value) -> CodecResult<Record> {
    if !entry.is_object() {
        return Err(CodecError::invalid_record(
            index,
            format!("expected object, found {}", json_type_name(&entry)),
        ));
    }
    let serialized: SerializedRecord =
        serde_json::from_value(entry).map_err(|e| CodecError::invalid_record(index, e.to_string()))?;
    Record::try_from(serialized)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(id: i64) -> Record {
        Record::new(id, format!("item {id}"), id)
            .with_created_at(Utc.timestamp_opt(1_700_000_000, 0).single().unwrap())
    }

    #[test]
    fn encode_then_decode() {
        let records = vec![record(1), record(2).with_done(true)];
        let json = encode_records(&records).unwrap();
        assert_eq!(decode_records(&json).unwrap(), records);
    }

    #[test]
    fn decode_rejects_bad_entry() {
        let json = r#"[{"id":1,"text":"a","done":false,"createdAt":"nope","order":1}]"#;
        assert!(decode_records(json).is_err());
    }

    #[test]
    fn import_rejects_non_json() {
        assert!(matches!(
            parse_import("not json"),
            Err(CodecError::InvalidJson { .. })
        ));
    }

    #[test]
    fn import_rejects_non_array() {
        assert_eq!(
            parse_import(r#"{"id":1}"#),
            Err(CodecError::NotAnArray { found: "object" })
        );
    }

    #[test]
    fn import_discards_invalid_entries() {
        let json = r#"[
            {"id":1,"text":"passport","done":false,"createdAt":"2024-01-01T00:00:00Z","order":1},
            {"id":"two","text":"bad id","done":false,"createdAt":"2024-01-01T00:00:00Z"},
            {"id":3,"text":"no done","createdAt":"2024-01-01T00:00:00Z"},
            42,
            {"id":5,"text":"legacy","packed":true,"createdAt":"2024-01-02T00:00:00.000Z"}
        ]"#;
        let batch = parse_import(json).unwrap();
        assert_eq!(batch.discarded, 3);
        let ids: Vec<_> = batch.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 5]);
        assert!(batch.records[1].done);
        assert_eq!(batch.records[1].order, 0);
        assert_eq!(
            batch.report(),
            ImportReport {
                imported: 2,
                discarded: 3
            }
        );
    }

    #[test]
    fn import_keeps_first_of_duplicate_ids() {
        let json = r#"[
            {"id":1,"text":"passport","done":false,"createdAt":"2024-01-01T00:00:00Z","order":1},
            {"id":2,"text":"charger","done":false,"createdAt":"2024-01-01T00:00:00Z","order":2},
            {"id":1,"text":"second passport","done":true,"createdAt":"2024-01-01T00:00:00Z","order":3}
        ]"#;
        let batch = parse_import(json).unwrap();
        assert_eq!(
            batch.report(),
            ImportReport {
                imported: 2,
                discarded: 1
            }
        );
        assert_eq!(batch.records[0].text, "passport");
        assert!(!batch.records[0].done);
    }

    #[test]
    fn import_empty_array() {
        let batch = parse_import("[]").unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.discarded, 0);
    }

    #[test]
    fn unknown_fields_ignored() {
        let json = r#"[{"id":1,"text":"a","done":false,"createdAt":"2024-01-01T00:00:00Z","order":1,"isEditing":true}]"#;
        assert_eq!(parse_import(json).unwrap().records.len(), 1);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn entry_strategy() -> impl Strategy<Value = serde_json::Value> {
            prop_oneof![
                (any::<i64>(), "[a-z ]{0,12}", any::<bool>(), 0i64..100).prop_map(
                    |(id, text, done, order)| serde_json::json!({
                        "id": id,
                        "text": text,
                        "done": done,
                        "createdAt": "2024-01-01T00:00:00Z",
                        "order": order,
                    })
                ),
                any::<i64>().prop_map(|n| serde_json::json!(n)),
                "[a-z]{0,8}".prop_map(|s| serde_json::json!({ "id": s })),
                Just(serde_json::Value::Null),
            ]
        }

        proptest! {
            #[test]
            fn import_accounts_for_every_entry(entries in prop::collection::vec(entry_strategy(), 0..32)) {
                let json = serde_json::Value::Array(entries.clone()).to_string();
                let batch = parse_import(&json).unwrap();
                prop_assert_eq!(batch.records.len() + batch.discarded, entries.len());
            }

            #[test]
            fn imported_ids_are_unique(ids in prop::collection::vec(0i64..8, 0..24)) {
                let entries: Vec<_> = ids
                    .iter()
                    .map(|id| serde_json::json!({
                        "id": id,
                        "text": "x",
                        "done": false,
                        "createdAt": "2024-01-01T00:00:00Z",
                    }))
                    .collect();
                let batch = parse_import(&serde_json::Value::Array(entries).to_string()).unwrap();
                let unique: std::collections::HashSet<_> = ids.iter().collect();
                prop_assert_eq!(batch.records.len(), unique.len());
                prop_assert_eq!(batch.discarded, ids.len() - unique.len());
            }
        }
    }
}

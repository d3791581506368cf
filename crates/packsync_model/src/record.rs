//! Record model and canonical forms.

use crate::error::{CodecError, CodecResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A single checklist entry.
///
/// `id` is caller-assigned and is the identity key for every compare and
/// serialize operation. `order` is a sort key and need not be unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Caller-assigned identity key.
    pub id: i64,
    /// Display text.
    pub text: String,
    /// Whether the entry is checked off.
    pub done: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Manual sort key.
    pub order: i64,
}

impl Record {
    /// Creates a record stamped with the current time.
    pub fn new(id: i64, text: impl Into<String>, order: i64) -> Self {
        Self {
            id,
            text: text.into(),
            done: false,
            created_at: Utc::now(),
            order,
        }
    }

    /// Sets the `done` flag.
    #[must_use]
    pub fn with_done(mut self, done: bool) -> Self {
        self.done = done;
        self
    }

    /// Sets the creation time.
    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Converts to the wire shape.
    pub fn serialize(&self) -> SerializedRecord {
        SerializedRecord {
            id: self.id,
            text: self.text.clone(),
            done: self.done,
            created_at: self.created_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            order: self.order,
        }
    }
}

impl TryFrom<SerializedRecord> for Record {
    type Error = CodecError;

    fn try_from(value: SerializedRecord) -> CodecResult<Self> {
        let created_at = DateTime::parse_from_rfc3339(&value.created_at)
            .map_err(|_| CodecError::InvalidTimestamp {
                value: value.created_at.clone(),
            })?
            .with_timezone(&Utc);

        Ok(Self {
            id: value.id,
            text: value.text,
            done: value.done,
            created_at,
            order: value.order,
        })
    }
}

/// Wire shape of a [`Record`], used at every persistence boundary.
///
/// `createdAt` travels as an RFC 3339 string. `packed` is accepted as the
/// legacy name of `done`, and a missing `order` decodes as `0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedRecord {
    /// Caller-assigned identity key.
    pub id: i64,
    /// Display text.
    pub text: String,
    /// Whether the entry is checked off.
    #[serde(alias = "packed")]
    pub done: bool,
    /// Creation time, RFC 3339.
    pub created_at: String,
    /// Manual sort key.
    #[serde(default)]
    pub order: i64,
}

/// Metadata stored next to a remote record set.
///
/// `last_updated` is stamped by the remote side and is the only trusted
/// "last synced at" source across devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Remote write time.
    pub last_updated: DateTime<Utc>,
    /// Number of records in the remote set.
    pub record_count: usize,
}

/// Sorts records by `order` ascending. Ties keep their relative position.
pub fn sort_by_order(records: &mut [Record]) {
    records.sort_by_key(|r| r.order);
}

/// Assigns an `order` to records stored before the field existed.
///
/// Records whose `order` is `0` receive `max_order + n` in the sequence they
/// appear, so they land after every ordered record.
pub fn normalize_order(records: &mut [Record]) {
    let max_order = records.iter().map(|r| r.order).max().unwrap_or(0).max(0);
    let mut next = max_order;
    for record in records.iter_mut().filter(|r| r.order == 0) {
        next += 1;
        record.order = next;
    }
}

/// Returns the comparison key of a record set.
///
/// The set is sorted by `id` and stringified, so two sets compare equal
/// exactly when they hold the same records regardless of their order.
pub fn canonical_key(records: &[Record]) -> String {
    let mut sorted: Vec<SerializedRecord> = records.iter().map(Record::serialize).collect();
    sorted.sort_by_key(|r| r.id);
    // Plain structs of strings and integers always serialize.
    serde_json::to_string(&sorted).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn record(id: i64, order: i64) -> Record {
        Record::new(id, format!("item {id}"), order).with_created_at(at(1_700_000_000 + id))
    }

    #[test]
    fn serialize_uses_rfc3339() {
        let r = record(1, 1);
        let s = r.serialize();
        assert_eq!(s.created_at, "2023-11-14T22:13:21Z");
        assert_eq!(Record::try_from(s).unwrap(), r);
    }

    #[test]
    fn subsecond_precision_survives() {
        let created = Utc.timestamp_opt(1_700_000_000, 123_456_789).single().unwrap();
        let r = record(1, 1).with_created_at(created);
        assert_eq!(Record::try_from(r.serialize()).unwrap(), r);
    }

    #[test]
    fn invalid_timestamp_rejected() {
        let mut s = record(1, 1).serialize();
        s.created_at = "yesterday".into();
        assert!(matches!(
            Record::try_from(s),
            Err(CodecError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn wire_shape_field_names() {
        let json = serde_json::to_value(record(7, 3).serialize()).unwrap();
        let obj = json.as_object().unwrap();
        let mut keys: Vec<_> = obj.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["createdAt", "done", "id", "order", "text"]);
    }

    #[test]
    fn legacy_packed_field_accepted() {
        let s: SerializedRecord = serde_json::from_str(
            r#"{"id":1,"text":"passport","packed":true,"createdAt":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(s.done);
        assert_eq!(s.order, 0);
    }

    #[test]
    fn sort_by_order_is_stable() {
        let mut records = vec![record(1, 2), record(2, 1), record(3, 2)];
        sort_by_order(&mut records);
        let ids: Vec<_> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn normalize_order_appends_legacy_records() {
        let mut records = vec![record(1, 0), record(2, 5), record(3, 0)];
        normalize_order(&mut records);
        let orders: Vec<_> = records.iter().map(|r| r.order).collect();
        assert_eq!(orders, vec![6, 5, 7]);
    }

    #[test]
    fn normalize_order_all_legacy() {
        let mut records = vec![record(1, 0), record(2, 0)];
        normalize_order(&mut records);
        assert_eq!(records[0].order, 1);
        assert_eq!(records[1].order, 2);
    }

    #[test]
    fn canonical_key_ignores_position() {
        let a = vec![record(1, 1), record(2, 2)];
        let b = vec![record(2, 2), record(1, 1)];
        assert_eq!(canonical_key(&a), canonical_key(&b));
    }

    #[test]
    fn canonical_key_sees_field_changes() {
        let a = vec![record(1, 1)];
        let b = vec![record(1, 1).with_done(true)];
        assert_ne!(canonical_key(&a), canonical_key(&b));
    }
}

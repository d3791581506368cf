//! In-memory local store for testing.

use crate::error::{StorageError, StorageResult};
use crate::local::{decode_stored, encode_stored, LocalStore};
use packsync_model::Record;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory local store.
///
/// The set is held in its encoded form, the same way a browser key-value
/// store would hold it, so encoding and legacy repair run exactly as they do
/// for [`super::FileLocalStore`].
///
/// Writes and reads can be made to fail on demand for exercising partial
/// failure paths.
///
/// # Example
///
/// ```rust
/// use packsync_model::Record;
/// use packsync_storage::{InMemoryLocalStore, LocalStore};
///
/// let store = InMemoryLocalStore::new();
/// assert!(!store.has_data());
/// store.save(&[Record::new(1, "socks", 1)]).unwrap();
/// assert!(store.has_data());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryLocalStore {
    data: RwLock<Option<String>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl InMemoryLocalStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `records`.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be encoded.
    pub fn with_records(records: &[Record]) -> StorageResult<Self> {
        let store = Self::new();
        store.save(records)?;
        Ok(store)
    }

    /// Creates a store holding raw, previously stored JSON.
    ///
    /// Useful for testing legacy data.
    #[must_use]
    pub fn with_raw(json: impl Into<String>) -> Self {
        Self {
            data: RwLock::new(Some(json.into())),
            ..Self::default()
        }
    }

    /// Returns the raw stored JSON.
    #[must_use]
    pub fn raw(&self) -> Option<String> {
        self.data.read().clone()
    }

    /// Makes subsequent writes (`save`, `clear`) fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent reads fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected("local store is read-only".into()));
        }
        Ok(())
    }
}

impl LocalStore for InMemoryLocalStore {
    fn save(&self, records: &[Record]) -> StorageResult<()> {
        self.check_writable()?;
        let encoded = encode_stored(records)?;
        *self.data.write() = Some(encoded);
        Ok(())
    }

    fn load(&self) -> StorageResult<Vec<Record>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Corrupted("local store is unreadable".into()));
        }
        match self.data.read().as_deref() {
            Some(json) => decode_stored(json),
            None => Ok(Vec::new()),
        }
    }

    fn clear(&self) -> StorageResult<()> {
        self.check_writable()?;
        *self.data.write() = None;
        Ok(())
    }

    fn has_data(&self) -> bool {
        self.data.read().is_some()
    }

    fn size_bytes(&self) -> u64 {
        self.data.read().as_ref().map_or(0, |s| s.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<Record> {
        vec![Record::new(2, "charger", 2), Record::new(1, "passport", 1)]
    }

    #[test]
    fn memory_new_is_empty() {
        let store = InMemoryLocalStore::new();
        assert!(!store.has_data());
        assert_eq!(store.size_bytes(), 0);
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn memory_load_sorts_by_order() {
        let store = InMemoryLocalStore::with_records(&records()).unwrap();
        let ids: Vec<_> = store.load().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn memory_legacy_data_gets_order() {
        let store = InMemoryLocalStore::with_raw(
            r#"[{"id":1,"text":"a","packed":false,"createdAt":"2024-01-01T00:00:00Z"},
                {"id":2,"text":"b","packed":true,"createdAt":"2024-01-01T00:00:00Z","order":4}]"#,
        );
        let loaded = store.load().unwrap();
        assert_eq!(loaded[0].id, 2);
        assert_eq!(loaded[1].id, 1);
        assert_eq!(loaded[1].order, 5);
    }

    #[test]
    fn memory_clear() {
        let store = InMemoryLocalStore::with_records(&records()).unwrap();
        store.clear().unwrap();
        assert!(!store.has_data());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn memory_size_tracks_encoding() {
        let store = InMemoryLocalStore::with_records(&records()).unwrap();
        assert_eq!(store.size_bytes(), store.raw().unwrap().len() as u64);
    }

    #[test]
    fn memory_failed_write_keeps_data() {
        let store = InMemoryLocalStore::with_records(&records()).unwrap();
        store.set_fail_writes(true);
        assert!(store.save(&[]).is_err());
        assert!(store.clear().is_err());
        assert_eq!(store.load().unwrap().len(), 2);
    }

    #[test]
    fn memory_failed_read() {
        let store = InMemoryLocalStore::new();
        store.set_fail_reads(true);
        assert!(matches!(store.load(), Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn memory_export_import() {
        let source = InMemoryLocalStore::with_records(&records()).unwrap();
        let json = source.export().unwrap();

        let target = InMemoryLocalStore::new();
        let report = target.import(&json).unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(report.discarded, 0);
        assert_eq!(target.load().unwrap(), source.load().unwrap());
    }

    #[test]
    fn memory_import_rejects_garbage() {
        let store = InMemoryLocalStore::with_records(&records()).unwrap();
        assert!(matches!(store.import("not json"), Err(StorageError::Codec(_))));
        assert_eq!(store.load().unwrap().len(), 2);
    }
}

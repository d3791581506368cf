//! Local storage port.

use crate::error::StorageResult;
use packsync_model::{
    decode_records, encode_records, normalize_order, parse_import, sort_by_order, ImportReport,
    Record,
};

/// Durable record-set persistence on this device.
///
/// Local stores are always available and never touch the network. Every call
/// is synchronous; the engine treats them as trivially awaitable.
///
/// # Invariants
///
/// - `save` replaces the whole stored set
/// - `load` returns records sorted by `order` ascending, with legacy records
///   (stored without an `order`) appended after ordered ones
/// - `load` on an empty store returns an empty set, not an error
///
/// # Implementors
///
/// - [`super::InMemoryLocalStore`] - For testing
/// - [`super::FileLocalStore`] - For persistent storage
pub trait LocalStore: Send + Sync {
    /// Replaces the stored record set.
    ///
    /// # Errors
    ///
    /// Returns an error if the set cannot be encoded or written.
    fn save(&self, records: &[Record]) -> StorageResult<()>;

    /// Loads the stored record set.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored data cannot be read or decoded.
    fn load(&self) -> StorageResult<Vec<Record>>;

    /// Removes the stored record set.
    ///
    /// # Errors
    ///
    /// Returns an error if the data cannot be removed.
    fn clear(&self) -> StorageResult<()>;

    /// Returns true if a record set has been stored.
    fn has_data(&self) -> bool;

    /// Returns the size of the stored data in bytes.
    fn size_bytes(&self) -> u64;

    /// Exports the stored set as a pretty-printed JSON array.
    ///
    /// # Errors
    ///
    /// Returns an error if the set cannot be loaded or encoded.
    fn export(&self) -> StorageResult<String> {
        let records = self.load()?;
        Ok(encode_records(&records)?)
    }

    /// Imports a JSON array, discarding entries that fail validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a JSON array or the write fails.
    fn import(&self, json: &str) -> StorageResult<ImportReport> {
        let batch = parse_import(json)?;
        self.save(&batch.records)?;
        Ok(batch.report())
    }
}

/// Encodes a record set for storage.
pub(crate) fn encode_stored(records: &[Record]) -> StorageResult<String> {
    Ok(encode_records(records)?)
}

/// Decodes a stored record set and restores the load ordering.
pub(crate) fn decode_stored(json: &str) -> StorageResult<Vec<Record>> {
    let mut records = decode_records(json)?;
    normalize_order(&mut records);
    sort_by_order(&mut records);
    Ok(records)
}

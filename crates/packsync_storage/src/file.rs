//! File-based local store for persistent storage.

use crate::error::StorageResult;
use crate::local::{decode_stored, encode_stored, LocalStore};
use packsync_model::Record;
use parking_lot::Mutex;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Key used when none is given.
pub const DEFAULT_STORAGE_KEY: &str = "checkItems";

/// A local store backed by one JSON file per storage key.
///
/// The set lives at `<dir>/<key>.json` and survives process restarts.
///
/// # Durability
///
/// `save` writes to a sibling temporary file, syncs it, then renames it over
/// the previous file, so a crash leaves either the old or the new set.
///
/// # Example
///
/// ```no_run
/// use packsync_model::Record;
/// use packsync_storage::{FileLocalStore, LocalStore};
/// use std::path::Path;
///
/// let store = FileLocalStore::open(Path::new("data")).unwrap();
/// store.save(&[Record::new(1, "passport", 1)]).unwrap();
/// ```
#[derive(Debug)]
pub struct FileLocalStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileLocalStore {
    /// Opens the default key in `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        Self::open_with_key(dir, DEFAULT_STORAGE_KEY)
    }

    /// Opens `key` in `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open_with_key(dir: &Path, key: &str) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(format!("{key}.json")),
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    fn read_raw(&self) -> StorageResult<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl LocalStore for FileLocalStore {
    fn save(&self, records: &[Record]) -> StorageResult<()> {
        let encoded = encode_stored(records)?;
        let _guard = self.write_lock.lock();

        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(encoded.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        tracing::debug!(path = %self.path.display(), count = records.len(), "saved local records");
        Ok(())
    }

    fn load(&self) -> StorageResult<Vec<Record>> {
        match self.read_raw()? {
            Some(json) => decode_stored(&json),
            None => Ok(Vec::new()),
        }
    }

    fn clear(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn has_data(&self) -> bool {
        self.path.exists()
    }

    fn size_bytes(&self) -> u64 {
        fs::metadata(&self.path).map_or(0, |m| m.len())
    }
}

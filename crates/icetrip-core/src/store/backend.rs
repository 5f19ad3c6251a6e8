//! Key-value tiers behind [`super::Store`].

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use parking_lot::Mutex;

use super::StoreError;

/// One storage tier. Values are plain strings; callers encode booleans,
/// numbers and JSON themselves.
pub trait KvBackend: Send + Sync {
    /// Read `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tier cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the tier cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete `key`. Missing keys are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the tier cannot be written.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Delete every key.
    ///
    /// # Errors
    ///
    /// Returns an error if the tier cannot be written.
    fn clear(&self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

/// Process-local tier for tests and the simulator.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored entry.
    #[must_use]
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.values.lock().clone()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.lock().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.values.lock().clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileBackend
// ---------------------------------------------------------------------------

const LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// JSON-file tier. The whole map is rewritten on every mutation via a
/// temp file + rename, under an exclusive advisory lock on `<file>.lock`.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    lock_path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileBackend {
    /// Open (or lazily create) the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or is not a JSON
    /// object of strings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.clone(),
                    source,
                });
            }
        };
        let lock_path = path.with_extension("lock");
        Ok(Self {
            path,
            lock_path,
            values: Mutex::new(values),
        })
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let guard = acquire_lock(&self.lock_path)?;
        let encoded = serde_json::to_vec_pretty(values).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, encoded).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        drop(guard);
        Ok(())
    }

    /// Apply `mutate` to a copy of the map and keep it only once it is on
    /// disk.
    fn commit(
        &self,
        mutate: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), StoreError> {
        let mut values = self.values.lock();
        let mut staged = values.clone();
        mutate(&mut staged);
        if staged == *values {
            return Ok(());
        }
        self.persist(&staged)?;
        *values = staged;
        Ok(())
    }
}

fn acquire_lock(path: &Path) -> Result<File, StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(io_err)?;

    let start = Instant::now();
    loop {
        if file.try_lock_exclusive().is_ok() {
            return Ok(file);
        }
        if start.elapsed() >= LOCK_TIMEOUT {
            return Err(StoreError::LockTimeout {
                path: path.to_path_buf(),
                waited: start.elapsed(),
            });
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

impl KvBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.commit(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.commit(|values| {
            values.remove(key);
        })
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.commit(BTreeMap::clear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_backend_survives_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("nested/shared.json");

        let backend = FileBackend::open(&path).expect("open");
        backend.set("itp_mode_value", "Active").expect("set");
        backend.set("itp_installed_flag", "true").expect("set");
        backend.remove("itp_installed_flag").expect("remove");
        drop(backend);

        let reopened = FileBackend::open(&path).expect("reopen");
        assert_eq!(
            reopened.get("itp_mode_value").expect("get").as_deref(),
            Some("Active")
        );
        assert_eq!(reopened.get("itp_installed_flag").expect("get"), None);
    }

    #[test]
    fn file_backend_rejects_garbage() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("shared.json");
        fs::write(&path, "not json").expect("write");

        let err = FileBackend::open(&path).expect_err("garbage must fail");
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn file_backend_clear_empties_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("shared.json");
        let backend = FileBackend::open(&path).expect("open");
        backend.set("a", "1").expect("set");
        backend.clear().expect("clear");

        let reopened = FileBackend::open(&path).expect("reopen");
        assert_eq!(reopened.get("a").expect("get"), None);
    }

    #[test]
    fn failed_write_leaves_memory_untouched() {
        let dir = TempDir::new().expect("tempdir");
        fs::create_dir(dir.path().join("shared.json.tmp")).expect("mkdir");
        let backend = FileBackend::open(dir.path().join("shared.json")).expect("open");

        let err = backend
            .set("itp_mode_value", "Active")
            .expect_err("temp path is a directory");
        assert!(matches!(err, StoreError::Io { .. }));
        assert_eq!(backend.get("itp_mode_value").expect("get"), None);
    }

    #[test]
    fn memory_backend_round_trips() {
        let backend = MemoryBackend::new();
        backend.set("k", "v").expect("set");
        assert_eq!(backend.get("k").expect("get").as_deref(), Some("v"));
        assert_eq!(backend.entries().len(), 1);
        backend.clear().expect("clear");
        assert!(backend.entries().is_empty());
    }
}

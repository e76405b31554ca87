//! Key/blob stores backing the template registry.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{PersistenceError, PersistenceResult};

/// Opaque key/blob persistence.
pub trait Persistence: Send + Sync {
    /// Store `blob` under `key`, replacing any previous value.
    fn save(&self, key: &str, blob: &[u8]) -> PersistenceResult<()>;

    /// Load the blob stored under `key`, if any.
    fn load(&self, key: &str) -> PersistenceResult<Option<Vec<u8>>>;

    /// Remove `key`. Returns whether something was removed.
    fn delete(&self, key: &str) -> PersistenceResult<bool>;

    /// All stored keys, sorted.
    fn keys(&self) -> PersistenceResult<Vec<String>>;
}

/// Keys become file names, so only `[A-Za-z0-9_-]` is accepted.
fn check_key(key: &str) -> PersistenceResult<()> {
    let valid = !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PersistenceError::InvalidKey(key.to_string()))
    }
}

// =============================================================================
// File store
// =============================================================================

/// One `<key>.json` file per entry in a directory.
///
/// The directory is created on first save; a missing directory reads as an
/// empty store.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PersistenceResult<PathBuf> {
        check_key(key)?;
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl Persistence for FileStore {
    fn save(&self, key: &str, blob: &[u8]) -> PersistenceResult<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)?;
        fs::write(path, blob)?;
        Ok(())
    }

    fn load(&self, key: &str) -> PersistenceResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> PersistenceResult<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> PersistenceResult<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if check_key(stem).is_ok() {
                        keys.push(stem.to_string());
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

// =============================================================================
// Memory store
// =============================================================================

/// In-process store, mostly for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for MemoryStore {
    fn save(&self, key: &str, blob: &[u8]) -> PersistenceResult<()> {
        check_key(key)?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), blob.to_vec());
        Ok(())
    }

    fn load(&self, key: &str) -> PersistenceResult<Option<Vec<u8>>> {
        check_key(key)?;
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn delete(&self, key: &str) -> PersistenceResult<bool> {
        check_key(key)?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        Ok(entries.remove(key).is_some())
    }

    fn keys(&self) -> PersistenceResult<Vec<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(store: &dyn Persistence) {
        assert!(store.keys().unwrap().is_empty());
        assert_eq!(store.load("missing").unwrap(), None);

        store.save("b-key", b"two").unwrap();
        store.save("a_key", b"one").unwrap();
        store.save("a_key", b"uno").unwrap();

        assert_eq!(store.load("a_key").unwrap().as_deref(), Some(&b"uno"[..]));
        assert_eq!(store.keys().unwrap(), vec!["a_key", "b-key"]);

        assert!(store.delete("a_key").unwrap());
        assert!(!store.delete("a_key").unwrap());
        assert_eq!(store.keys().unwrap(), vec!["b-key"]);
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_file_store() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("templates"));
        exercise(&store);
        assert!(dir.path().join("templates").join("b-key.json").exists());
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path());
        for key in ["", "../escape", "a/b", "with space"] {
            assert!(matches!(store.save(key, b"x"), Err(PersistenceError::InvalidKey(_))), "{key:?}");
        }
        assert!(matches!(MemoryStore::new().load(".."), Err(PersistenceError::InvalidKey(_))));
    }

    #[test]
    fn test_file_store_ignores_foreign_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::write(dir.path().join("ok.json"), "{}").unwrap();
        let store = FileStore::new(dir.path());
        assert_eq!(store.keys().unwrap(), vec!["ok"]);
    }
}

//! Durable key/value storage for unit artifacts.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Most keys removed by a single delete request.
pub const DELETE_BATCH: usize = 1000;

const PARTIAL_SUFFIX: &str = ".partial";

/// Object storage shared by every unit of a run.
///
/// Keys are `/`-separated relative paths. `put` must be atomic: a reader
/// either sees the whole object or no object at all.
pub trait ArtifactStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Fails with [`Error::MissingArtifact`] when `key` does not exist.
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// Removes up to [`DELETE_BATCH`] keys in one request. Missing keys are
    /// ignored.
    fn delete_batch(&self, keys: &[String]) -> Result<()>;

    /// All keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Removes `keys` in batches of [`DELETE_BATCH`].
    fn delete_many(&self, keys: &[String]) -> Result<usize> {
        for batch in keys.chunks(DELETE_BATCH) {
            self.delete_batch(batch)?;
        }
        Ok(keys.len())
    }
}

// ============================================================================
// Filesystem
// ============================================================================

/// Artifacts as files below a root directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|part| part == ".." || part.is_empty())
        {
            return Err(Error::Store {
                key: key.to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "invalid artifact key"),
            });
        }
        Ok(self.root.join(key))
    }

    fn collect_keys(&self, dir: &Path, keys: &mut Vec<String>) -> io::Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                self.collect_keys(&path, keys)?;
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !key.ends_with(PARTIAL_SUFFIX) {
                keys.push(key);
            }
        }
        Ok(())
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let store_err = |source| Error::Store {
            key: key.to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(store_err)?;
        }
        let mut partial = path.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);
        fs::write(&partial, bytes).map_err(store_err)?;
        fs::rename(&partial, &path).map_err(store_err)?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        fs::read(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                Error::MissingArtifact {
                    key: key.to_string(),
                }
            } else {
                Error::Store {
                    key: key.to_string(),
                    source,
                }
            }
        })
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        path.try_exists().map_err(|source| Error::Store {
            key: key.to_string(),
            source,
        })
    }

    fn delete_batch(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            let path = self.path_for(key)?;
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(Error::Store {
                        key: key.clone(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Only the directory holding the prefix's last segment can match.
        let dir = match prefix.rfind('/') {
            Some(end) => self.path_for(&prefix[..end])?,
            None => self.root.clone(),
        };
        let mut keys = Vec::new();
        self.collect_keys(&dir, &mut keys)
            .map_err(|source| Error::Store {
                key: prefix.to_string(),
                source,
            })?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

// ============================================================================
// Memory
// ============================================================================

/// In-process store; counts delete requests.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    delete_requests: AtomicUsize,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    pub fn delete_requests(&self) -> usize {
        self.delete_requests.load(Ordering::Relaxed)
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.objects.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::MissingArtifact {
                key: key.to_string(),
            })
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().contains_key(key))
    }

    fn delete_batch(&self, keys: &[String]) -> Result<()> {
        debug_assert!(keys.len() <= DELETE_BATCH);
        self.delete_requests.fetch_add(1, Ordering::Relaxed);
        let mut objects = self.objects.lock();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

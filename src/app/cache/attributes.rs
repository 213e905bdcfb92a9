//! Side-channel attribute storage for cache entries
//!
//! Entries carry small key/value attributes (`image_name`, `hits`, `error`)
//! that live outside the file content. Extended attributes are the natural
//! home for them, but not every filesystem supports those, so storage is
//! abstracted behind [`AttributeStore`].
//!
//! Stores whose data is bound to the inode (extended attributes) follow the
//! file through renames for free. Stores keyed by path implement
//! [`AttributeStore::relocate`] and [`AttributeStore::remove_all`] so the
//! cache can move or drop attributes alongside the file.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::constants::attributes;
use crate::errors::{CacheError, CacheResult};

use super::config::AttributeBackend;

/// Path-keyed attribute storage
pub trait AttributeStore: Send + Sync + fmt::Debug {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Read an attribute, `Ok(None)` if it is not set
    fn get_raw(&self, path: &Path, key: &str) -> CacheResult<Option<String>>;

    /// Write an attribute
    fn set(&self, path: &Path, key: &str, value: &str) -> CacheResult<()>;

    /// Read an attribute, falling back to `default` when it is missing or unreadable
    fn get(&self, path: &Path, key: &str, default: &str) -> String {
        match self.get_raw(path, key) {
            Ok(Some(value)) => value,
            Ok(None) => default.to_string(),
            Err(e) => {
                debug!("Attribute read failed, using default: {}", e);
                default.to_string()
            }
        }
    }

    /// Increment an integer attribute, treating a missing or garbled value as 0
    ///
    /// Read-modify-write without locking; concurrent increments may be lost.
    fn increment(&self, path: &Path, key: &str) -> CacheResult<u64> {
        let current = self
            .get_raw(path, key)?
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(0);
        let next = current.saturating_add(1);
        self.set(path, key, &next.to_string())?;
        Ok(next)
    }

    /// Move attributes after the file at `from` was renamed to `to`
    fn relocate(&self, _from: &Path, _to: &Path) -> CacheResult<()> {
        Ok(())
    }

    /// Drop every attribute of a file that is being deleted
    fn remove_all(&self, _path: &Path) -> CacheResult<()> {
        Ok(())
    }
}

/// Build the store for a backend, probing extended attribute support for `Auto`
pub fn build_store(backend: AttributeBackend, root: &Path) -> Arc<dyn AttributeStore> {
    match backend {
        AttributeBackend::Xattr => Arc::new(XattrStore),
        AttributeBackend::Sidecar => Arc::new(SidecarStore::new()),
        AttributeBackend::Memory => Arc::new(MemoryStore::new()),
        AttributeBackend::Auto => {
            if XattrStore::probe(root) {
                debug!("Extended attributes supported under {}", root.display());
                Arc::new(XattrStore)
            } else {
                warn!(
                    "Extended attributes unavailable under {}, using sidecar attribute files",
                    root.display()
                );
                Arc::new(SidecarStore::new())
            }
        }
    }
}

/// Extended attribute store (`user.image_cache.<key>`)
#[derive(Debug, Clone, Copy, Default)]
pub struct XattrStore;

impl XattrStore {
    fn attr_name(key: &str) -> String {
        format!("{}{}", attributes::XATTR_PREFIX, key)
    }

    /// Check whether files under `dir` accept user extended attributes
    pub fn probe(dir: &Path) -> bool {
        if !xattr::SUPPORTED_PLATFORM {
            return false;
        }

        let probe_path = dir.join(attributes::XATTR_PROBE_FILE);
        if std::fs::write(&probe_path, b"").is_err() {
            return false;
        }

        let name = Self::attr_name("probe");
        let supported = xattr::set(&probe_path, &name, b"1").is_ok()
            && matches!(xattr::get(&probe_path, &name), Ok(Some(value)) if value == b"1");

        if let Err(e) = std::fs::remove_file(&probe_path) {
            debug!("Failed to remove xattr probe file: {}", e);
        }
        supported
    }
}

impl AttributeStore for XattrStore {
    fn name(&self) -> &'static str {
        "xattr"
    }

    fn get_raw(&self, path: &Path, key: &str) -> CacheResult<Option<String>> {
        match xattr::get(path, Self::attr_name(key)) {
            Ok(value) => Ok(value.map(|bytes| String::from_utf8_lossy(&bytes).into_owned())),
            Err(source) => Err(CacheError::Attribute {
                path: path.to_path_buf(),
                key: key.to_string(),
                source,
            }),
        }
    }

    fn set(&self, path: &Path, key: &str, value: &str) -> CacheResult<()> {
        xattr::set(path, Self::attr_name(key), value.as_bytes()).map_err(|source| {
            CacheError::Attribute {
                path: path.to_path_buf(),
                key: key.to_string(),
                source,
            }
        })
    }
}

/// JSON sidecar store: attributes of `<dir>/<file>` live in `<dir>/.<file>.attrs`
///
/// Sidecars are rewritten through a temporary file and a rename, so readers
/// never observe a half-written map.
#[derive(Debug, Default)]
pub struct SidecarStore {
    write_counter: AtomicU64,
}

impl SidecarStore {
    /// Create a sidecar store
    pub fn new() -> Self {
        Self::default()
    }

    /// Sidecar file holding the attributes of `path`
    pub fn sidecar_path(path: &Path) -> PathBuf {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let sidecar = format!(
            "{}{}{}",
            attributes::SIDECAR_PREFIX,
            file_name,
            attributes::SIDECAR_SUFFIX
        );
        match path.parent() {
            Some(parent) => parent.join(sidecar),
            None => PathBuf::from(sidecar),
        }
    }

    fn load(&self, path: &Path) -> CacheResult<BTreeMap<String, String>> {
        let sidecar = Self::sidecar_path(path);
        match std::fs::read(&sidecar) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| CacheError::Sidecar {
                path: sidecar,
                source,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(source) => Err(CacheError::Attribute {
                path: path.to_path_buf(),
                key: attributes::SIDECAR_SUFFIX.to_string(),
                source,
            }),
        }
    }

    fn store(&self, path: &Path, key: &str, values: &BTreeMap<String, String>) -> CacheResult<()> {
        let sidecar = Self::sidecar_path(path);
        let sequence = self.write_counter.fetch_add(1, Ordering::Relaxed);
        let temp = PathBuf::from(format!(
            "{}.{}.{}{}",
            sidecar.display(),
            std::process::id(),
            sequence,
            attributes::SIDECAR_TEMP_SUFFIX
        ));

        let attribute_error = |source: io::Error| CacheError::Attribute {
            path: path.to_path_buf(),
            key: key.to_string(),
            source,
        };

        let json = serde_json::to_vec(values).map_err(|source| CacheError::Sidecar {
            path: sidecar.clone(),
            source,
        })?;
        std::fs::write(&temp, json).map_err(attribute_error)?;
        if let Err(e) = std::fs::rename(&temp, &sidecar) {
            let _ = std::fs::remove_file(&temp);
            return Err(attribute_error(e));
        }
        Ok(())
    }
}

impl AttributeStore for SidecarStore {
    fn name(&self) -> &'static str {
        "sidecar"
    }

    fn get_raw(&self, path: &Path, key: &str) -> CacheResult<Option<String>> {
        Ok(self.load(path)?.remove(key))
    }

    fn set(&self, path: &Path, key: &str, value: &str) -> CacheResult<()> {
        let mut values = self.load(path)?;
        values.insert(key.to_string(), value.to_string());
        self.store(path, key, &values)
    }

    fn relocate(&self, from: &Path, to: &Path) -> CacheResult<()> {
        match std::fs::rename(Self::sidecar_path(from), Self::sidecar_path(to)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    fn remove_all(&self, path: &Path) -> CacheResult<()> {
        match std::fs::remove_file(Self::sidecar_path(path)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(e)),
        }
    }
}

/// In-process attribute map
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<PathBuf, HashMap<String, String>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl AttributeStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get_raw(&self, path: &Path, key: &str) -> CacheResult<Option<String>> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(path).and_then(|attrs| attrs.get(key)).cloned())
    }

    fn set(&self, path: &Path, key: &str, value: &str) -> CacheResult<()> {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values
            .entry(path.to_path_buf())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn increment(&self, path: &Path, key: &str) -> CacheResult<u64> {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        let attrs = values.entry(path.to_path_buf()).or_default();
        let next = attrs
            .get(key)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(0)
            .saturating_add(1);
        attrs.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    fn relocate(&self, from: &Path, to: &Path) -> CacheResult<()> {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        match values.remove(from) {
            Some(attrs) => {
                values.insert(to.to_path_buf(), attrs);
            }
            None => {
                values.remove(to);
            }
        }
        Ok(())
    }

    fn remove_all(&self, path: &Path) -> CacheResult<()> {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.remove(path);
        Ok(())
    }
}

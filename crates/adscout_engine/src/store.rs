use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};

use adscout_logging::{scout_debug, scout_info, scout_warn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entry_name::version_entry_name;
use crate::persist::{ensure_dir, AtomicFileWriter, PersistError};

pub type ResourceId = i64;

/// Free-form metadata attached to resources and versions.
pub type Properties = BTreeMap<String, String>;

const MANIFEST_FILE: &str = "manifest.json";
const RESOURCES_DIR: &str = "resources";
const TRASH_DIR: &str = "trash";

/// One discovered origin document and its cached snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResource {
    pub id: ResourceId,
    pub url: String,
    #[serde(default)]
    pub properties: Properties,
    /// Append-only, in creation order.
    #[serde(default)]
    pub versions: Vec<StoredResourceVersion>,
}

impl StoredResource {
    /// Version with the latest `creation_time`; the earliest inserted wins ties.
    pub fn newest_version(&self) -> Option<&StoredResourceVersion> {
        let mut newest: Option<&StoredResourceVersion> = None;
        for version in &self.versions {
            match newest {
                Some(current) if version.creation_time <= current.creation_time => {}
                _ => newest = Some(version),
            }
        }
        newest
    }
}

/// Immutable snapshot of a resource's content. The bytes live in the store and
/// are read with [`ResourceStore::read_content`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResourceVersion {
    pub ordinal: usize,
    pub entry_name: String,
    pub creation_time: DateTime<Utc>,
    pub content_length: u64,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource {id} already exists")]
    Conflict { id: ResourceId },
    #[error("resource {id} not found")]
    NotFound { id: ResourceId },
    #[error("resource {id} is corrupt: {message}")]
    Corrupt { id: ResourceId, message: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("resource store has been destroyed")]
    Destroyed,
}

/// Durable, versioned cache of raw bytes keyed by resource id.
///
/// Every mutating call has persisted its effect when it returns `Ok`.
pub trait ResourceStore: Send + Sync {
    fn exists(&self, id: ResourceId) -> bool;

    /// Lookup that reports absence as `None`; only IO and corruption are errors.
    fn try_get(&self, id: ResourceId) -> Result<Option<StoredResource>, StoreError>;

    fn get(&self, id: ResourceId) -> Result<StoredResource, StoreError> {
        self.try_get(id)?.ok_or(StoreError::NotFound { id })
    }

    /// Creates a resource with no versions; fails with `Conflict` if `id` is taken.
    fn create(
        &self,
        id: ResourceId,
        url: &str,
        properties: Properties,
    ) -> Result<StoredResource, StoreError>;

    /// Deletes the resource and all version content. Returns `false` if it did not exist.
    fn remove(&self, id: ResourceId) -> Result<bool, StoreError>;

    /// Irreversibly deletes the whole repository. Every later call fails with
    /// `Destroyed`, and `exists` reports `false`.
    fn destroy(&self) -> Result<(), StoreError>;

    /// Appends a new version streamed from `content`. Appends to one resource
    /// are serialized and ordinals grow monotonically.
    fn add_version(
        &self,
        resource: &StoredResource,
        creation_time: DateTime<Utc>,
        content: &mut dyn Read,
        properties: Properties,
    ) -> Result<StoredResourceVersion, StoreError>;

    fn read_content(
        &self,
        resource: &StoredResource,
        version: &StoredResourceVersion,
    ) -> Result<Vec<u8>, StoreError>;
}

/// Filesystem store: `<root>/resources/<id>/manifest.json` plus one file per version.
///
/// Content files are renamed into place before the manifest that lists them, so
/// a version is visible only once both are durable. Removal renames the
/// resource directory into `<root>/trash` first, which makes it vanish in one step.
///
/// Every operation holds the read side of `destroyed` while it runs, so
/// `destroy` waits for operations in flight and no operation starts after it.
#[derive(Debug)]
pub struct FsResourceStore {
    root: PathBuf,
    destroyed: RwLock<bool>,
    locks: Mutex<HashMap<ResourceId, Arc<Mutex<()>>>>,
}

impl FsResourceStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        ensure_dir(&root.join(RESOURCES_DIR))?;
        ensure_dir(&root.join(TRASH_DIR))?;
        let store = Self {
            root,
            destroyed: RwLock::new(false),
            locks: Mutex::new(HashMap::new()),
        };
        store.purge_trash();
        scout_info!("Opened resource store at {:?}", store.root);
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resource_dir(&self, id: ResourceId) -> PathBuf {
        self.root.join(RESOURCES_DIR).join(id.to_string())
    }

    fn manifest_path(&self, id: ResourceId) -> PathBuf {
        self.resource_dir(id).join(MANIFEST_FILE)
    }

    fn usable(&self) -> Result<RwLockReadGuard<'_, bool>, StoreError> {
        let destroyed = self.destroyed.read().unwrap_or_else(|e| e.into_inner());
        if *destroyed {
            return Err(StoreError::Destroyed);
        }
        Ok(destroyed)
    }

    /// Runs `op` holding the lock of resource `id`.
    fn with_resource_lock<T>(
        &self,
        id: ResourceId,
        op: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(id).or_default().clone()
        };
        let result = {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            op()
        };
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        drop(lock);
        // Clones are only taken under the map lock, so a count of one means
        // nobody waits on this entry.
        if locks.get(&id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&id);
        }
        result
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn manifest_exists(&self, id: ResourceId) -> bool {
        self.manifest_path(id).is_file()
    }

    fn read_manifest(&self, id: ResourceId) -> Result<Option<StoredResource>, StoreError> {
        let raw = match fs::read(self.manifest_path(id)) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let resource: StoredResource =
            serde_json::from_slice(&raw).map_err(|err| StoreError::Corrupt {
                id,
                message: format!("unreadable manifest: {err}"),
            })?;
        if resource.id != id {
            return Err(StoreError::Corrupt {
                id,
                message: format!("manifest belongs to resource {}", resource.id),
            });
        }
        Ok(Some(resource))
    }

    fn write_manifest(&self, resource: &StoredResource) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(resource).map_err(|err| StoreError::Corrupt {
            id: resource.id,
            message: format!("cannot serialize manifest: {err}"),
        })?;
        AtomicFileWriter::new(self.resource_dir(resource.id)).write(MANIFEST_FILE, &body)?;
        Ok(())
    }

    fn purge_trash(&self) {
        let trash = self.root.join(TRASH_DIR);
        let Ok(entries) = fs::read_dir(&trash) else {
            return;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            if let Err(err) = fs::remove_dir_all(entry.path()) {
                scout_warn!("Could not purge {:?}: {}", entry.path(), err);
            }
        }
    }
}

impl ResourceStore for FsResourceStore {
    fn exists(&self, id: ResourceId) -> bool {
        self.usable().is_ok_and(|_gate| self.manifest_exists(id))
    }

    fn try_get(&self, id: ResourceId) -> Result<Option<StoredResource>, StoreError> {
        let _gate = self.usable()?;
        self.read_manifest(id)
    }

    fn create(
        &self,
        id: ResourceId,
        url: &str,
        properties: Properties,
    ) -> Result<StoredResource, StoreError> {
        let _gate = self.usable()?;
        self.with_resource_lock(id, || {
            if self.manifest_exists(id) {
                return Err(StoreError::Conflict { id });
            }
            let dir = self.resource_dir(id);
            if dir.exists() {
                // Left behind by an interrupted create; it never had a manifest.
                fs::remove_dir_all(&dir)?;
            }
            fs::create_dir_all(&dir)?;

            let resource = StoredResource {
                id,
                url: url.to_string(),
                properties,
                versions: Vec::new(),
            };
            self.write_manifest(&resource)?;
            scout_info!("Created resource {} for {}", id, url);
            Ok(resource)
        })
    }

    fn remove(&self, id: ResourceId) -> Result<bool, StoreError> {
        let _gate = self.usable()?;
        self.with_resource_lock(id, || {
            if !self.manifest_exists(id) {
                return Ok(false);
            }
            let grave = tempfile::Builder::new()
                .prefix(&format!("{id}-"))
                .tempdir_in(self.root.join(TRASH_DIR))?;
            fs::rename(self.resource_dir(id), grave.path().join("resource"))?;
            if let Err(err) = grave.close() {
                scout_warn!("Removed resource {} but could not delete its files: {}", id, err);
            }
            scout_info!("Removed resource {}", id);
            Ok(true)
        })
    }

    fn destroy(&self) -> Result<(), StoreError> {
        let mut destroyed = self.destroyed.write().unwrap_or_else(|e| e.into_inner());
        if *destroyed {
            return Err(StoreError::Destroyed);
        }
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        *destroyed = true;
        scout_info!("Destroyed resource store at {:?}", self.root);
        Ok(())
    }

    fn add_version(
        &self,
        resource: &StoredResource,
        creation_time: DateTime<Utc>,
        content: &mut dyn Read,
        properties: Properties,
    ) -> Result<StoredResourceVersion, StoreError> {
        let _gate = self.usable()?;
        let id = resource.id;
        self.with_resource_lock(id, || {
            // The caller's copy may be stale; the manifest on disk is authoritative.
            let mut current = self.read_manifest(id)?.ok_or(StoreError::NotFound { id })?;
            let ordinal = current.versions.len();
            let entry_name = version_entry_name(&current.url, ordinal);

            let writer = AtomicFileWriter::new(self.resource_dir(id));
            let (_, content_length) = writer.write_from(&entry_name, content)?;

            let version = StoredResourceVersion {
                ordinal,
                entry_name,
                creation_time,
                content_length,
                properties,
            };
            current.versions.push(version.clone());
            self.write_manifest(&current)?;
            scout_debug!(
                "Stored version {} of resource {} ({} bytes)",
                ordinal,
                id,
                content_length
            );
            Ok(version)
        })
    }

    fn read_content(
        &self,
        resource: &StoredResource,
        version: &StoredResourceVersion,
    ) -> Result<Vec<u8>, StoreError> {
        let _gate = self.usable()?;
        let path = self.resource_dir(resource.id).join(&version.entry_name);
        let bytes = fs::read(&path).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StoreError::Corrupt {
                    id: resource.id,
                    message: format!("content of version {} is missing", version.ordinal),
                }
            } else {
                StoreError::Io(err)
            }
        })?;
        if bytes.len() as u64 != version.content_length {
            return Err(StoreError::Corrupt {
                id: resource.id,
                message: format!(
                    "version {} has {} bytes, manifest says {}",
                    version.ordinal,
                    bytes.len(),
                    version.content_length
                ),
            });
        }
        Ok(bytes)
    }
}

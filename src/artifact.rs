// src/artifact.rs

//! Artifact store for built packages
//!
//! Artifacts are keyed by (name, version, build-number, platform). Each stored
//! package carries a record of the recipe checksum it was built from, which is
//! what the classifier compares against to decide whether a rebuild is needed.
//!
//! The filesystem store lays artifacts out as
//! `<root>/<platform>/<name>-<version>-<build>.tar.gz` with a `.json` record
//! beside each package. Writers serialize on an exclusive lock over
//! `<root>/.lock` and publish through rename, so a key never has two live
//! artifacts and the last writer wins.

use crate::error::{Error, Result};
use crate::hash::Digest;
use crate::recipe::{Platform, RecipeId};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Package archive extension
pub const PACKAGE_EXT: &str = "tar.gz";

/// Identity of one artifact slot in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub name: String,
    pub version: String,
    pub build_number: u32,
    pub platform: Platform,
}

impl ArtifactKey {
    pub fn new(id: &RecipeId, platform: Platform) -> Self {
        Self {
            name: id.name.clone(),
            version: id.version.clone(),
            build_number: id.build_number,
            platform,
        }
    }

    /// Package file name, e.g. `samtools-1.9-2.tar.gz`
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}.{}",
            self.name, self.version, self.build_number, PACKAGE_EXT
        )
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}-{}-{}",
            self.platform, self.name, self.version, self.build_number
        )
    }
}

/// Metadata stored alongside each package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Digest of the package bytes
    pub content_hash: Digest,
    /// Checksum of the recipe directory the package was built from
    pub source_checksum: Digest,
    pub recipe: RecipeId,
    pub platform: Platform,
    pub created_at: DateTime<Utc>,
    /// Build log, if one was kept
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    pub size: u64,
}

/// Content-addressed store of built packages
///
/// Implementations must serialize concurrent writers to the same key.
pub trait ArtifactStore: Send + Sync {
    /// Whether a package is stored under `key`
    fn exists(&self, key: &ArtifactKey) -> Result<bool>;

    /// Recipe checksum recorded for the stored package, if any
    fn hash(&self, key: &ArtifactKey) -> Result<Option<Digest>> {
        Ok(self.record(key)?.map(|r| r.source_checksum))
    }

    /// Store a package, superseding whatever was stored under `key`
    fn put(&self, key: &ArtifactKey, bytes: &[u8], record: &ArtifactRecord) -> Result<()>;

    /// Package bytes stored under `key`
    fn get(&self, key: &ArtifactKey) -> Result<Vec<u8>>;

    /// Full record for the stored package, if any
    fn record(&self, key: &ArtifactKey) -> Result<Option<ArtifactRecord>>;
}

/// Artifact store on the local filesystem
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            Error::IoError(format!(
                "Failed to create artifact store {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory build logs are kept in
    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Location of the package file for `key`
    pub fn package_path(&self, key: &ArtifactKey) -> PathBuf {
        self.root
            .join(key.platform.as_ref())
            .join(key.file_name())
    }

    fn record_path(&self, key: &ArtifactKey) -> PathBuf {
        let mut path = self.package_path(key).into_os_string();
        path.push(".json");
        PathBuf::from(path)
    }

    /// Block until this process holds the store's writer lock
    fn lock(&self) -> Result<File> {
        let file = File::create(self.root.join(".lock"))?;
        file.lock_exclusive().map_err(|e| {
            Error::IoError(format!("Failed to lock artifact store: {}", e))
        })?;
        Ok(file)
    }

    /// Write `bytes` to `dest` through a temporary file in the same directory
    fn publish(dest: &Path, bytes: &[u8]) -> Result<()> {
        let dir = dest
            .parent()
            .ok_or_else(|| Error::IoError(format!("No parent for {}", dest.display())))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(dest)
            .map_err(|e| Error::IoError(format!("Failed to publish {}: {}", dest.display(), e)))?;
        Ok(())
    }
}

impl ArtifactStore for FsArtifactStore {
    fn exists(&self, key: &ArtifactKey) -> Result<bool> {
        Ok(self.package_path(key).is_file() && self.record_path(key).is_file())
    }

    fn put(&self, key: &ArtifactKey, bytes: &[u8], record: &ArtifactRecord) -> Result<()> {
        let package_path = self.package_path(key);
        if let Some(parent) = package_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let record_json = serde_json::to_vec_pretty(record)?;

        let lock = self.lock()?;
        // Package first: a record never points at a missing package
        Self::publish(&package_path, bytes)?;
        Self::publish(&self.record_path(key), &record_json)?;
        drop(lock);

        info!(
            "Stored {} ({} bytes, {})",
            key,
            bytes.len(),
            record.content_hash.short()
        );
        Ok(())
    }

    fn get(&self, key: &ArtifactKey) -> Result<Vec<u8>> {
        let path = self.package_path(key);
        fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(format!("artifact {}", key)),
            _ => Error::IoError(format!("Failed to read {}: {}", path.display(), e)),
        })
    }

    fn record(&self, key: &ArtifactKey) -> Result<Option<ArtifactRecord>> {
        if !self.exists(key)? {
            debug!("No artifact for {}", key);
            return Ok(None);
        }
        let path = self.record_path(key);
        let content = fs::read(&path)?;
        match serde_json::from_slice(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                // An unreadable record is treated as absent so the task rebuilds
                warn!("Ignoring corrupt artifact record {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }
}

/// In-memory artifact store for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    entries: Mutex<HashMap<ArtifactKey, (Vec<u8>, ArtifactRecord)>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<ArtifactKey, (Vec<u8>, ArtifactRecord)>>> {
        self.entries
            .lock()
            .map_err(|_| Error::IoError("artifact store lock poisoned".to_string()))
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn exists(&self, key: &ArtifactKey) -> Result<bool> {
        Ok(self.entries()?.contains_key(key))
    }

    fn put(&self, key: &ArtifactKey, bytes: &[u8], record: &ArtifactRecord) -> Result<()> {
        self.entries()?
            .insert(key.clone(), (bytes.to_vec(), record.clone()));
        Ok(())
    }

    fn get(&self, key: &ArtifactKey) -> Result<Vec<u8>> {
        self.entries()?
            .get(key)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| Error::NotFound(format!("artifact {}", key)))
    }

    fn record(&self, key: &ArtifactKey) -> Result<Option<ArtifactRecord>> {
        Ok(self.entries()?.get(key).map(|(_, record)| record.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn key() -> ArtifactKey {
        ArtifactKey::new(&RecipeId::new("samtools", "1.9", 2), Platform::Linux64)
    }

    fn record(bytes: &[u8], source: &str) -> ArtifactRecord {
        ArtifactRecord {
            content_hash: hash_bytes(bytes),
            source_checksum: hash_bytes(source.as_bytes()),
            recipe: RecipeId::new("samtools", "1.9", 2),
            platform: Platform::Linux64,
            created_at: Utc::now(),
            log_path: None,
            size: bytes.len() as u64,
        }
    }

    #[test]
    fn test_key_layout() {
        let tmp = TempDir::new().unwrap();
        let store = FsArtifactStore::open(tmp.path()).unwrap();
        assert_eq!(
            store.package_path(&key()),
            tmp.path().join("linux-64").join("samtools-1.9-2.tar.gz")
        );
        assert_eq!(key().to_string(), "linux-64/samtools-1.9-2");
    }

    #[test]
    fn test_fs_put_get() {
        let tmp = TempDir::new().unwrap();
        let store = FsArtifactStore::open(tmp.path()).unwrap();
        assert!(!store.exists(&key()).unwrap());
        assert_eq!(store.hash(&key()).unwrap(), None);

        store.put(&key(), b"package", &record(b"package", "v1")).unwrap();
        assert!(store.exists(&key()).unwrap());
        assert_eq!(store.get(&key()).unwrap(), b"package");
        assert_eq!(
            store.hash(&key()).unwrap(),
            Some(hash_bytes(b"v1"))
        );
    }

    #[test]
    fn test_fs_put_supersedes() {
        let tmp = TempDir::new().unwrap();
        let store = FsArtifactStore::open(tmp.path()).unwrap();
        store.put(&key(), b"old", &record(b"old", "v1")).unwrap();
        store.put(&key(), b"new", &record(b"new", "v2")).unwrap();

        assert_eq!(store.get(&key()).unwrap(), b"new");
        assert_eq!(store.hash(&key()).unwrap(), Some(hash_bytes(b"v2")));

        let files: Vec<_> = fs::read_dir(tmp.path().join("linux-64"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_fs_concurrent_writers() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(FsArtifactStore::open(tmp.path()).unwrap());

        std::thread::scope(|s| {
            for i in 0..8 {
                let store = Arc::clone(&store);
                s.spawn(move || {
                    let bytes = format!("build {}", i).into_bytes();
                    store.put(&key(), &bytes, &record(&bytes, "v1")).unwrap();
                });
            }
        });

        let bytes = store.get(&key()).unwrap();
        let rec = store.record(&key()).unwrap().unwrap();
        assert_eq!(rec.content_hash, hash_bytes(&bytes));
    }

    #[test]
    fn test_corrupt_record_treated_as_missing() {
        let tmp = TempDir::new().unwrap();
        let store = FsArtifactStore::open(tmp.path()).unwrap();
        store.put(&key(), b"package", &record(b"package", "v1")).unwrap();
        fs::write(store.record_path(&key()), "{not json").unwrap();
        assert_eq!(store.record(&key()).unwrap(), None);
    }

    #[test]
    fn test_missing_get_is_not_found() {
        let store = MemoryArtifactStore::new();
        assert!(matches!(store.get(&key()), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryArtifactStore::new();
        store.put(&key(), b"pkg", &record(b"pkg", "v1")).unwrap();
        assert!(store.exists(&key()).unwrap());
        assert_eq!(store.len(), 1);
        assert_eq!(store.hash(&key()).unwrap(), Some(hash_bytes(b"v1")));
    }
}

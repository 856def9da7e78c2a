use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Key/value blob storage the saved-item store persists through.
///
/// A successful `write_blob` must be durable; failures are reported and the
/// caller decides what to do.
pub trait BlobStore: Send + Sync {
    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>, BlobStoreError>;
    fn write_blob(&self, key: &str, bytes: &[u8]) -> Result<(), BlobStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("blob key '{0}' may only contain ASCII letters, digits, '-' and '_'")]
    InvalidKey(String),
    #[error("blob io failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("blob store unavailable: {0}")]
    Unavailable(String),
}

fn validate_key(key: &str) -> Result<(), BlobStoreError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(BlobStoreError::InvalidKey(key.to_string()))
    }
}

/// One JSON file per key under a data directory.
///
/// Writes go to a sibling temp file that is fsynced and renamed over the
/// target, so readers see either the old or the new blob.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, BlobStoreError> {
        validate_key(key)?;
        Ok(self.root.join(format!("{key}.json")))
    }
}

impl BlobStore for FileBlobStore {
    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>, BlobStoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(BlobStoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn write_blob(&self, key: &str, bytes: &[u8]) -> Result<(), BlobStoreError> {
        let path = self.path_for(key)?;
        let io_err = |source| BlobStoreError::Io {
            key: key.to_string(),
            source,
        };

        fs::create_dir_all(&self.root).map_err(io_err)?;
        let staging = self.root.join(format!(".{key}.json.tmp"));
        {
            let mut file = File::create(&staging).map_err(io_err)?;
            file.write_all(bytes).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        fs::rename(&staging, &path).map_err(io_err)?;
        sync_dir(&self.root).map_err(io_err)?;
        Ok(())
    }
}

/// Flush the directory entry so the rename itself survives a crash.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// In-process blob store. Writes can be switched to fail for exercising the
/// persistence-failure path.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(key: &str, bytes: impl Into<Vec<u8>>) -> Self {
        let store = Self::default();
        store
            .blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), bytes.into());
        store
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    pub fn blob(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

impl BlobStore for MemoryBlobStore {
    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>, BlobStoreError> {
        validate_key(key)?;
        Ok(self.blob(key))
    }

    fn write_blob(&self, key: &str, bytes: &[u8]) -> Result<(), BlobStoreError> {
        validate_key(key)?;
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(BlobStoreError::Unavailable(
                "writes disabled for this store".to_string(),
            ));
        }
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    fn temp_root(label: &str) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "estate-access-blob-{label}-{}-{id}",
            std::process::id()
        ))
    }

    #[test]
    fn file_store_reads_absent_key_as_none() {
        let store = FileBlobStore::new(temp_root("absent"));
        assert!(store.read_blob("savedEstates").expect("read ok").is_none());
    }

    #[test]
    fn file_store_overwrites_whole_blob() {
        let root = temp_root("overwrite");
        let store = FileBlobStore::new(&root);
        store
            .write_blob("savedEstates", br#"{"1":true,"2":true}"#)
            .expect("first write");
        store
            .write_blob("savedEstates", br#"{"1":false}"#)
            .expect("second write");
        let bytes = store
            .read_blob("savedEstates")
            .expect("read ok")
            .expect("blob present");
        assert_eq!(bytes, br#"{"1":false}"#);
        assert!(!root.join(".savedEstates.json.tmp").exists());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn committed_blob_is_visible_to_a_fresh_store() {
        let root = temp_root("durable").join("nested");
        FileBlobStore::new(&root)
            .write_blob("savedEstates", br#"{"3":true}"#)
            .expect("write creates the directory and commits");

        let reopened = FileBlobStore::new(&root);
        assert_eq!(
            reopened.read_blob("savedEstates").expect("read ok"),
            Some(br#"{"3":true}"#.to_vec())
        );
        let _ = fs::remove_dir_all(root.parent().unwrap_or(&root));
    }

    #[cfg(unix)]
    #[test]
    fn directory_sync_requires_an_existing_directory() {
        let root = temp_root("dirsync");
        assert!(sync_dir(&root).is_err());
        fs::create_dir_all(&root).expect("create root");
        sync_dir(&root).expect("directory entry flushed");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn rejects_path_like_keys() {
        let store = FileBlobStore::new(temp_root("keys"));
        assert!(matches!(
            store.read_blob("../etc/passwd"),
            Err(BlobStoreError::InvalidKey(_))
        ));
        assert!(matches!(
            MemoryBlobStore::new().write_blob("", b"x"),
            Err(BlobStoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn memory_store_can_fail_writes() {
        let store = MemoryBlobStore::new();
        store.set_fail_writes(true);
        assert!(matches!(
            store.write_blob("savedEstates", b"{}"),
            Err(BlobStoreError::Unavailable(_))
        ));
        store.set_fail_writes(false);
        store.write_blob("savedEstates", b"{}").expect("write ok");
        assert_eq!(store.blob("savedEstates"), Some(b"{}".to_vec()));
    }
}

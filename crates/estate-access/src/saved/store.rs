use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use super::persistence::{BlobStore, BlobStoreError};

/// Storage key the whole saved set is persisted under.
pub const SAVED_ITEMS_KEY: &str = "savedEstates";

/// Item identifier to saved flag. A missing key means "not saved".
pub type SavedSet = BTreeMap<String, bool>;

/// The persisted blob could not be decoded; the store started empty.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("persisted saved set is unreadable ({detail}); starting from an empty set")]
pub struct CorruptState {
    pub detail: String,
}

/// Outcome of reading the persisted set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedSet {
    pub items: SavedSet,
    pub corrupt: Option<CorruptState>,
}

#[derive(Debug, thiserror::Error)]
pub enum SavedStoreError {
    /// The in-memory flag already reflects the toggle; only the write failed.
    #[error("saved flag for '{id}' is now {saved} but was not persisted: {source}")]
    PersistenceFailure {
        id: String,
        saved: bool,
        #[source]
        source: BlobStoreError,
    },
    #[error("failed to encode saved set: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to read persisted saved set: {0}")]
    Read(#[source] BlobStoreError),
}

/// Persisted set of saved listings with toggle semantics.
///
/// Every toggle runs read-modify-write plus the full-set persistence write
/// under one lock, so concurrent toggles never lose each other's update and
/// blobs land in toggle order.
#[derive(Debug)]
pub struct SavedItemStore<B: ?Sized> {
    blobs: Arc<B>,
    items: Mutex<SavedSet>,
}

impl<B> SavedItemStore<B>
where
    B: BlobStore + ?Sized,
{
    /// Load the persisted set and return a store seeded with it.
    ///
    /// A corrupt blob is not an error: the store starts empty and the
    /// returned [`LoadedSet::corrupt`] carries the warning.
    pub fn open(blobs: Arc<B>) -> Result<(Self, LoadedSet), SavedStoreError> {
        let loaded = Self::load_all(blobs.as_ref())?;
        let store = Self {
            blobs,
            items: Mutex::new(loaded.items.clone()),
        };
        Ok((store, loaded))
    }

    /// Deserialize the persisted blob, treating absence as an empty set.
    pub fn load_all(blobs: &B) -> Result<LoadedSet, SavedStoreError> {
        let Some(bytes) = blobs
            .read_blob(SAVED_ITEMS_KEY)
            .map_err(SavedStoreError::Read)?
        else {
            debug!("no persisted saved set, starting empty");
            return Ok(LoadedSet::default());
        };

        match decode(&bytes) {
            Ok(items) => {
                debug!(count = items.len(), "loaded persisted saved set");
                Ok(LoadedSet {
                    items,
                    corrupt: None,
                })
            }
            Err(corrupt) => {
                warn!(error = %corrupt, "discarding corrupt saved set");
                Ok(LoadedSet {
                    items: SavedSet::new(),
                    corrupt: Some(corrupt),
                })
            }
        }
    }

    /// Flip the flag for `id` and persist the full set.
    ///
    /// Blocks on the persistence write; async callers run it through
    /// `tokio::task::spawn_blocking`.
    ///
    /// On a failed write the in-memory flip is kept and reported through
    /// [`SavedStoreError::PersistenceFailure`].
    pub fn toggle(&self, id: &str) -> Result<bool, SavedStoreError> {
        let mut items = self.lock();
        let saved = !items.get(id).copied().unwrap_or(false);
        items.insert(id.to_string(), saved);

        let bytes = serde_json::to_vec(&*items)?;
        match self.blobs.write_blob(SAVED_ITEMS_KEY, &bytes) {
            Ok(()) => {
                debug!(id, saved, "saved flag toggled");
                Ok(saved)
            }
            Err(source) => {
                warn!(id, saved, error = %source, "saved flag not persisted");
                Err(SavedStoreError::PersistenceFailure {
                    id: id.to_string(),
                    saved,
                    source,
                })
            }
        }
    }

    pub fn is_saved(&self, id: &str) -> bool {
        self.lock().get(id).copied().unwrap_or(false)
    }

    pub fn snapshot(&self) -> SavedSet {
        self.lock().clone()
    }

    /// Identifiers currently flagged as saved, in key order.
    pub fn saved_ids(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(_, saved)| **saved)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, SavedSet> {
        // Mutations are a single insert, so a poisoned set is still consistent.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn decode(bytes: &[u8]) -> Result<SavedSet, CorruptState> {
    serde_json::from_slice(bytes).map_err(|err| CorruptState {
        detail: err.to_string(),
    })
}

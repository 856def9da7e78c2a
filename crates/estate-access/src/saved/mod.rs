//! Saved listings: a persisted id -> flag map with toggle semantics.

pub mod persistence;
pub mod store;

pub use persistence::{BlobStore, BlobStoreError, FileBlobStore, MemoryBlobStore};
pub use store::{
    CorruptState, LoadedSet, SavedItemStore, SavedSet, SavedStoreError, SAVED_ITEMS_KEY,
};

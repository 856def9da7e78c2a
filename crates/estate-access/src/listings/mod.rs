//! Listing domain carried over from the estates feed.

pub mod catalog;
pub mod estate;

pub use catalog::{CatalogError, EstateCatalog};
pub use estate::{Estate, EstateId};

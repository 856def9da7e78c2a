//! Proximity-gated access control and saved listings for the estate app.
//!
//! [`access`] turns a stream of location samples into a debounced
//! locked/unlocked decision for one property; [`saved`] keeps the persisted
//! set of saved listings. [`listings`] holds the listing domain both are
//! keyed on.

pub mod access;
pub mod config;
pub mod error;
pub mod listings;
pub mod saved;
pub mod telemetry;

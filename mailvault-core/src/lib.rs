//! Mailvault core library — domain types, settings, errors.
//!
//! Public API surface:
//! - [`types`] — newtypes and domain structs shared across crates
//! - [`config`] — [`Settings`] (YAML) and the on-disk state layout
//! - [`dates`] — mail `Date:` header parsing
//! - [`error`] — [`ConfigError`]

pub mod config;
pub mod dates;
pub mod error;
pub mod types;

pub use config::{Settings, StateLayout};
pub use error::ConfigError;
pub use types::{CatalogEntry, Fingerprint, NewMessage};

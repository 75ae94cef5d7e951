//! Local item store
//!
//! SQLite-backed storage for items plus the sync bookkeeping that lives
//! alongside them: per-target sync times, deletion records and the persisted
//! per-target settings blob.

mod connection;
mod migrations;
pub mod queries;

pub use connection::ItemStore;
pub use queries::{DeleteOptions, DeletionRecord, SaveOptions, SyncDisabledItem, SyncPage};

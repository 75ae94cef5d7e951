//! Carnet - offline-first note synchronization
//!
//! A local SQLite store of notes, folders, tags and attachment metadata,
//! plus a synchronizer that reconciles it against a dumb byte-store remote
//! with conflict detection and deletion propagation.

pub mod error;
pub mod fileapi;
pub mod store;
pub mod sync;
pub mod types;

pub use error::{CarnetError, Result};
pub use fileapi::FileApi;
pub use store::ItemStore;
pub use sync::Synchronizer;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

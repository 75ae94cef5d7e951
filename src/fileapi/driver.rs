//! Backend driver contract
//!
//! A driver is a pure translation layer over one remote backend. It carries
//! no conflict logic and reports "not found" as `None`, never as an error.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CarnetError, Result};
use crate::fileapi::delta::{DeltaContext, DeltaPage};
use crate::types::ItemId;

/// Metadata for one remote object, as produced by stat/list/delta
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub path: String,
    /// Milliseconds. For delta deletion entries this is 0.
    #[serde(default)]
    pub updated_time: i64,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub is_deleted: bool,
}

impl RemoteObject {
    /// A plain file entry
    pub fn file(path: impl Into<String>, updated_time: i64) -> Self {
        Self {
            path: path.into(),
            updated_time,
            is_dir: false,
            is_deleted: false,
        }
    }

    /// A deletion entry emitted by a delta feed
    pub fn deleted(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            updated_time: 0,
            is_dir: false,
            is_deleted: true,
        }
    }
}

/// Uniform operations a backend must provide.
///
/// `delta` is optional: backends without a native change feed fall back to
/// the basic delta algorithm, built on `list` plus the locally-known id set.
#[async_trait]
pub trait FileApiDriver: Send + Sync {
    /// Metadata for one object, `None` when it does not exist
    async fn stat(&self, path: &str) -> Result<Option<RemoteObject>>;

    /// Object content, `None` when it does not exist
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;

    async fn put(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Entries directly under `path`, with paths relative to it
    async fn list(&self, path: &str) -> Result<Vec<RemoteObject>>;

    async fn mkdir(&self, path: &str) -> Result<()>;

    async fn move_file(&self, old_path: &str, new_path: &str) -> Result<()>;

    /// Overwrite the stored timestamp of an object. Needed because most
    /// backends cannot atomically create-with-timestamp.
    async fn set_timestamp(&self, path: &str, timestamp_ms: i64) -> Result<()>;

    /// Whether the backend has a native change feed
    fn supports_delta(&self) -> bool {
        false
    }

    /// Native change feed. Only called when `supports_delta` is true.
    async fn delta(
        &self,
        _path: &str,
        _context: Option<DeltaContext>,
        _known_item_ids: &HashSet<ItemId>,
    ) -> Result<DeltaPage> {
        Err(CarnetError::Sync(
            "driver does not provide a native delta feed".to_string(),
        ))
    }

    /// Refresh expired credentials. Called at most once per operation when
    /// the backend reports `AuthExpired`.
    async fn refresh_auth(&self) -> Result<()> {
        Err(CarnetError::AuthExpired)
    }
}

//! Core types for carnet

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{CarnetError, Result};

/// Unique identifier for an item (32 lowercase hex chars)
pub type ItemId = String;

/// Identifier for a configured sync target
pub type TargetId = i64;

/// Extension used for remote item objects
pub const ITEM_EXTENSION: &str = "json";

/// Current unix time in milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Generate a new item id
pub fn new_item_id() -> ItemId {
    uuid::Uuid::new_v4().simple().to_string()
}

/// How conflicts on an item kind are handled during push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictHandling {
    /// Duplicate the local edit into a new `is_conflict` item, then accept
    /// the remote version as canonical. Used for notes, where losing an edit
    /// silently is unacceptable.
    PreserveLocal,
    /// Accept the remote version outright. Used for structural items
    /// (folders, tags) that hold little content.
    AcceptRemote,
}

/// Kind of a synchronizable item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Folder,
    Note,
    Tag,
    Resource,
}

impl ItemKind {
    /// Every kind, for code that enumerates them
    pub const ALL: [ItemKind; 4] = [
        ItemKind::Folder,
        ItemKind::Note,
        ItemKind::Tag,
        ItemKind::Resource,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Folder => "folder",
            ItemKind::Note => "note",
            ItemKind::Tag => "tag",
            ItemKind::Resource => "resource",
        }
    }

    /// Conflict-resolution strategy for this kind
    pub fn conflict_handling(&self) -> ConflictHandling {
        match self {
            ItemKind::Note => ConflictHandling::PreserveLocal,
            ItemKind::Folder | ItemKind::Tag | ItemKind::Resource => {
                ConflictHandling::AcceptRemote
            }
        }
    }

    /// Push ordering: folders first so that structure exists before content
    pub fn sync_priority(&self) -> i32 {
        match self {
            ItemKind::Folder => 0,
            ItemKind::Tag => 1,
            ItemKind::Resource => 2,
            ItemKind::Note => 3,
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ItemKind {
    type Err = CarnetError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "folder" => Ok(ItemKind::Folder),
            "note" => Ok(ItemKind::Note),
            "tag" => Ok(ItemKind::Tag),
            "resource" => Ok(ItemKind::Resource),
            other => Err(CarnetError::InvalidItem(format!(
                "unknown item kind: {other}"
            ))),
        }
    }
}

/// A synchronizable item: a note, folder, tag or attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    pub id: ItemId,
    pub kind: ItemKind,
    /// Parent folder id, empty for top-level items
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// Set on the duplicate created when a note conflict is resolved
    #[serde(default)]
    pub is_conflict: bool,
    pub created_time: i64,
    /// Milliseconds; refreshed on every application mutation. Managed by the
    /// clients, so it is trusted over remote file timestamps.
    pub updated_time: i64,
}

impl SyncItem {
    /// Create a new item with a fresh id and current timestamps
    pub fn new(kind: ItemKind, title: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: new_item_id(),
            kind,
            parent_id: String::new(),
            title: title.into(),
            body: String::new(),
            is_conflict: false,
            created_time: now,
            updated_time: now,
        }
    }

    /// Remote object path for this item
    pub fn path(&self) -> String {
        item_path(&self.id)
    }

    /// Serialize to the remote payload
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Deserialize from a remote payload
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Remote object path for an item id
pub fn item_path(id: &str) -> String {
    format!("{id}.{ITEM_EXTENSION}")
}

/// Extract the item id from a remote path, if it is an item path
pub fn path_to_id(path: &str) -> Option<&str> {
    let id = path.strip_suffix(&format!(".{ITEM_EXTENSION}"))?;
    if id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
        Some(id)
    } else {
        None
    }
}

/// Whether a remote path addresses an item object. Delta feeds may also
/// return the sync work directory or other housekeeping files.
pub fn is_item_path(path: &str) -> bool {
    path_to_id(path).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_round_trip() {
        let mut item = SyncItem::new(ItemKind::Note, "groceries");
        item.body = "milk\neggs".to_string();
        let bytes = item.to_bytes().unwrap();
        let back = SyncItem::from_bytes(&bytes).unwrap();
        assert_eq!(item, back);
    }

    #[test]
    fn path_mapping() {
        let item = SyncItem::new(ItemKind::Folder, "work");
        let path = item.path();
        assert_eq!(path_to_id(&path), Some(item.id.as_str()));
        assert!(is_item_path(&path));
    }

    #[test]
    fn non_item_paths_rejected() {
        assert!(!is_item_path(".sync/upload_1234"));
        assert!(!is_item_path("readme.txt"));
        assert!(!is_item_path("short.json"));
        assert!(!is_item_path(
            "ZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZ.json"
        ));
    }

    #[test]
    fn kind_strategies() {
        assert_eq!(
            ItemKind::Note.conflict_handling(),
            ConflictHandling::PreserveLocal
        );
        assert_eq!(
            ItemKind::Folder.conflict_handling(),
            ConflictHandling::AcceptRemote
        );
        assert_eq!("tag".parse::<ItemKind>().unwrap(), ItemKind::Tag);
        assert!("widget".parse::<ItemKind>().is_err());
    }
}

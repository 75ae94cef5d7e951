//! Item and sync-bookkeeping queries

use std::collections::HashSet;
use std::str::FromStr;

use rusqlite::{params, OptionalExtension, Row};

use super::ItemStore;
use crate::error::Result;
use crate::types::{now_ms, path_to_id, ItemId, ItemKind, SyncItem, TargetId};

/// Options for [`ItemStore::save`]
#[derive(Debug, Clone, Copy)]
pub struct SaveOptions {
    /// Refresh `updated_time` on save. The synchronizer always disables
    /// this so that recording sync progress never looks like a user edit.
    pub auto_timestamp: bool,
    /// Insert rather than upsert; saving an existing id is then an error
    pub is_new: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            auto_timestamp: true,
            is_new: false,
        }
    }
}

/// Options for [`ItemStore::delete`]
#[derive(Debug, Clone, Copy)]
pub struct DeleteOptions {
    /// Record the deletion for later propagation to every registered target
    pub track_deleted: bool,
    /// Recursively delete child items (folder contents)
    pub delete_children: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            track_deleted: true,
            delete_children: true,
        }
    }
}

/// A pending deletion awaiting propagation to one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionRecord {
    pub item_kind: ItemKind,
    pub item_id: ItemId,
    pub deleted_time: i64,
    pub target_id: TargetId,
}

/// An item excluded from sync after target rejection
#[derive(Debug, Clone)]
pub struct SyncDisabledItem {
    pub item_id: ItemId,
    pub reason: String,
}

/// One page of locally-changed items
#[derive(Debug, Clone)]
pub struct SyncPage {
    pub items: Vec<SyncItem>,
    pub has_more: bool,
}

/// Parse an item from a database row
pub fn item_from_row(row: &Row) -> rusqlite::Result<SyncItem> {
    let kind_str: String = row.get("kind")?;
    let kind = ItemKind::from_str(&kind_str).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown item kind: {kind_str}").into(),
        )
    })?;
    let is_conflict: i64 = row.get("is_conflict")?;

    Ok(SyncItem {
        id: row.get("id")?,
        kind,
        parent_id: row.get("parent_id")?,
        title: row.get("title")?,
        body: row.get("body")?,
        is_conflict: is_conflict != 0,
        created_time: row.get("created_time")?,
        updated_time: row.get("updated_time")?,
    })
}

const ITEM_COLUMNS: &str =
    "id, kind, parent_id, title, body, is_conflict, created_time, updated_time";

/// SQL expression ranking rows by `ItemKind::sync_priority`
fn sync_priority_case() -> String {
    let mut case = String::from("CASE i.kind");
    for kind in ItemKind::ALL {
        case.push_str(&format!(
            " WHEN '{}' THEN {}",
            kind.as_str(),
            kind.sync_priority()
        ));
    }
    case.push_str(" END");
    case
}

impl ItemStore {
    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    /// Save an item, honoring the auto-timestamp rule
    pub fn save(&self, item: &SyncItem, options: SaveOptions) -> Result<SyncItem> {
        let mut saved = item.clone();
        if options.auto_timestamp {
            saved.updated_time = now_ms();
        }
        if saved.created_time == 0 {
            saved.created_time = saved.updated_time;
        }

        self.with_connection(|conn| {
            let sql = if options.is_new {
                "INSERT INTO items
                    (id, kind, parent_id, title, body, is_conflict, created_time, updated_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            } else {
                "INSERT INTO items
                    (id, kind, parent_id, title, body, is_conflict, created_time, updated_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    kind = excluded.kind,
                    parent_id = excluded.parent_id,
                    title = excluded.title,
                    body = excluded.body,
                    is_conflict = excluded.is_conflict,
                    updated_time = excluded.updated_time"
            };
            conn.execute(
                sql,
                params![
                    saved.id,
                    saved.kind.as_str(),
                    saved.parent_id,
                    saved.title,
                    saved.body,
                    saved.is_conflict as i64,
                    saved.created_time,
                    saved.updated_time,
                ],
            )?;
            Ok(())
        })?;

        Ok(saved)
    }

    /// Load an item by id
    pub fn load(&self, id: &str) -> Result<Option<SyncItem>> {
        self.with_connection(|conn| {
            let item = conn
                .query_row(
                    &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
                    params![id],
                    item_from_row,
                )
                .optional()?;
            Ok(item)
        })
    }

    /// Load an item by its remote object path
    pub fn load_by_path(&self, path: &str) -> Result<Option<SyncItem>> {
        match path_to_id(path) {
            Some(id) => self.load(id),
            None => Ok(None),
        }
    }

    /// Delete an item, optionally recording the deletion for propagation
    pub fn delete(&self, id: &str, options: DeleteOptions) -> Result<()> {
        let item = match self.load(id)? {
            Some(item) => item,
            None => return Ok(()),
        };

        let root_id = item.id.clone();
        let mut doomed = vec![item];
        if options.delete_children {
            self.collect_children(&root_id, &mut doomed)?;
        }

        let now = now_ms();
        self.with_transaction(|conn| {
            let mut targets_stmt = conn.prepare("SELECT id FROM sync_targets")?;
            let targets: Vec<TargetId> = targets_stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;

            for item in &doomed {
                conn.execute("DELETE FROM items WHERE id = ?1", params![item.id])?;
                conn.execute(
                    "DELETE FROM sync_items WHERE item_id = ?1",
                    params![item.id],
                )?;
                if options.track_deleted {
                    for target_id in &targets {
                        conn.execute(
                            "INSERT INTO deleted_items
                                (item_kind, item_id, deleted_time, target_id)
                             VALUES (?1, ?2, ?3, ?4)",
                            params![item.kind.as_str(), item.id, now, target_id],
                        )?;
                    }
                }
            }
            Ok(())
        })
    }

    fn collect_children(&self, parent_id: &str, out: &mut Vec<SyncItem>) -> Result<()> {
        let children = self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM items WHERE parent_id = ?1"
            ))?;
            let items: Vec<SyncItem> = stmt
                .query_map(params![parent_id], item_from_row)?
                .collect::<rusqlite::Result<_>>()?;
            Ok(items)
        })?;

        for child in children {
            let child_id = child.id.clone();
            let is_folder = child.kind == ItemKind::Folder;
            out.push(child);
            if is_folder {
                self.collect_children(&child_id, out)?;
            }
        }
        Ok(())
    }

    /// Ids of every item in the store
    pub fn all_item_ids(&self) -> Result<HashSet<ItemId>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM items")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<_>>()?;
            Ok(ids)
        })
    }

    /// Ids of items that have been synced to the target at least once.
    /// Never-synced local items must not look remotely deleted, so they are
    /// excluded here.
    pub fn synced_item_ids(&self, target_id: TargetId) -> Result<HashSet<ItemId>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.item_id FROM sync_items s
                 JOIN items i ON i.id = s.item_id
                 WHERE s.target_id = ?1 AND s.sync_time > 0 AND i.is_conflict = 0",
            )?;
            let ids = stmt
                .query_map(params![target_id], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<_>>()?;
            Ok(ids)
        })
    }

    /// One page of items whose local changes have not reached the target.
    /// Folders sort first so structure lands before content; conflict copies
    /// and sync-disabled items never sync.
    pub fn items_that_need_sync(&self, target_id: TargetId, limit: usize) -> Result<SyncPage> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ITEM_COLUMNS}, {priority} AS priority
                 FROM items i
                 LEFT JOIN sync_items s
                     ON s.item_id = i.id AND s.target_id = ?1
                 WHERE i.is_conflict = 0
                   AND COALESCE(s.sync_disabled, 0) = 0
                   AND COALESCE(s.sync_time, 0) < i.updated_time
                 ORDER BY priority, i.updated_time
                 LIMIT ?2",
                priority = sync_priority_case(),
            ))?;
            let items: Vec<SyncItem> = stmt
                .query_map(params![target_id, limit as i64], item_from_row)?
                .collect::<rusqlite::Result<_>>()?;
            let has_more = items.len() == limit;
            Ok(SyncPage { items, has_more })
        })
    }

    // ------------------------------------------------------------------
    // Sync bookkeeping
    // ------------------------------------------------------------------

    /// Register a sync target so deletion records fan out to it
    pub fn register_target(&self, target_id: TargetId) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO sync_targets (id) VALUES (?1)",
                params![target_id],
            )?;
            Ok(())
        })
    }

    /// Last confirmed reconciliation time of an item with a target
    pub fn sync_time(&self, target_id: TargetId, item_id: &str) -> Result<i64> {
        self.with_connection(|conn| {
            let time = conn
                .query_row(
                    "SELECT sync_time FROM sync_items
                     WHERE target_id = ?1 AND item_id = ?2",
                    params![target_id, item_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(time.unwrap_or(0))
        })
    }

    /// Record sync progress for an item. Called only by the synchronizer.
    pub fn set_sync_time(&self, target_id: TargetId, item_id: &str, time: i64) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO sync_items (target_id, item_id, sync_time)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(target_id, item_id) DO UPDATE SET sync_time = excluded.sync_time",
                params![target_id, item_id, time],
            )?;
            Ok(())
        })
    }

    /// Flag an item as excluded from sync to a target, with a reason shown
    /// in status reports
    pub fn set_sync_disabled(&self, target_id: TargetId, item_id: &str, reason: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO sync_items (target_id, item_id, sync_disabled, sync_disabled_reason)
                 VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT(target_id, item_id) DO UPDATE SET
                     sync_disabled = 1,
                     sync_disabled_reason = excluded.sync_disabled_reason",
                params![target_id, item_id, reason],
            )?;
            Ok(())
        })
    }

    /// Re-enable sync for an item after the rejection condition is cleared
    pub fn clear_sync_disabled(&self, target_id: TargetId, item_id: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "UPDATE sync_items SET sync_disabled = 0, sync_disabled_reason = ''
                 WHERE target_id = ?1 AND item_id = ?2",
                params![target_id, item_id],
            )?;
            Ok(())
        })
    }

    /// Items currently excluded from sync to a target
    pub fn sync_disabled_items(&self, target_id: TargetId) -> Result<Vec<SyncDisabledItem>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT item_id, sync_disabled_reason FROM sync_items
                 WHERE target_id = ?1 AND sync_disabled = 1",
            )?;
            let items = stmt
                .query_map(params![target_id], |row| {
                    Ok(SyncDisabledItem {
                        item_id: row.get(0)?,
                        reason: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<_>>()?;
            Ok(items)
        })
    }

    /// Pending deletions for a target, oldest first
    pub fn deletion_records(&self, target_id: TargetId) -> Result<Vec<DeletionRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT item_kind, item_id, deleted_time, target_id FROM deleted_items
                 WHERE target_id = ?1 ORDER BY id",
            )?;
            let records = stmt
                .query_map(params![target_id], |row| {
                    let kind_str: String = row.get(0)?;
                    Ok((kind_str, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<rusqlite::Result<Vec<(String, String, i64, i64)>>>()?;

            records
                .into_iter()
                .map(|(kind_str, item_id, deleted_time, target_id)| {
                    Ok(DeletionRecord {
                        item_kind: ItemKind::from_str(&kind_str)?,
                        item_id,
                        deleted_time,
                        target_id,
                    })
                })
                .collect()
        })
    }

    /// Purge a deletion record once the remote delete is confirmed for this
    /// target. Records for other targets are untouched.
    pub fn purge_deletion_record(&self, target_id: TargetId, item_id: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM deleted_items WHERE target_id = ?1 AND item_id = ?2",
                params![target_id, item_id],
            )?;
            Ok(())
        })
    }

    /// Count of deletion records across all targets, used by tests and
    /// status reports
    pub fn deletion_record_count(&self) -> Result<i64> {
        self.with_connection(|conn| {
            let count = conn.query_row("SELECT COUNT(*) FROM deleted_items", [], |row| row.get(0))?;
            Ok(count)
        })
    }

    /// Drop sync bookkeeping rows whose item no longer exists
    pub fn delete_orphan_sync_records(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM sync_items
                 WHERE item_id NOT IN (SELECT id FROM items)",
                [],
            )?;
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Folder helpers for pull-side deletion reconciliation
    // ------------------------------------------------------------------

    /// Ids of the notes directly inside a folder
    pub fn note_ids_in_folder(&self, folder_id: &str) -> Result<Vec<ItemId>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM items WHERE parent_id = ?1 AND kind = 'note'",
            )?;
            let ids = stmt
                .query_map(params![folder_id], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<_>>()?;
            Ok(ids)
        })
    }

    /// Mark every note in a folder as a conflict copy. Used when a folder
    /// was deleted remotely but still has local notes: whatever deleted the
    /// folder should have deleted its content too, so the notes are
    /// preserved rather than dropped.
    pub fn mark_notes_conflicted(&self, folder_id: &str) -> Result<usize> {
        self.with_connection(|conn| {
            let changed = conn.execute(
                "UPDATE items SET is_conflict = 1, parent_id = ''
                 WHERE parent_id = ?1 AND kind = 'note'",
                params![folder_id],
            )?;
            Ok(changed)
        })
    }

    /// Find a free title among siblings of the same kind by appending a
    /// numbered suffix
    pub fn disambiguate_title(
        &self,
        kind: ItemKind,
        parent_id: &str,
        title: &str,
    ) -> Result<String> {
        let taken = self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT title FROM items WHERE kind = ?1 AND parent_id = ?2",
            )?;
            let titles: HashSet<String> = stmt
                .query_map(params![kind.as_str(), parent_id], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            Ok(titles)
        })?;

        if !taken.contains(title) {
            return Ok(title.to_string());
        }
        for n in 1u32.. {
            let candidate = format!("{title} ({n})");
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
        }
        unreachable!()
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    /// Read a settings value
    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
    }

    /// Write a settings value
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
    }

    /// Remove a settings value
    pub fn delete_setting(&self, key: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
            Ok(())
        })
    }

    /// Read a boolean setting with a default
    pub fn setting_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(match self.setting(key)? {
            Some(value) => value == "1" || value.eq_ignore_ascii_case("true"),
            None => default,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ItemKind;
    use pretty_assertions::assert_eq;

    fn store_with_target() -> ItemStore {
        let store = ItemStore::open_in_memory().unwrap();
        store.register_target(1).unwrap();
        store
    }

    #[test]
    fn save_and_load_round_trip() {
        let store = store_with_target();
        let item = SyncItem::new(ItemKind::Note, "a note");
        let saved = store.save(&item, SaveOptions::default()).unwrap();

        let loaded = store.load(&item.id).unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(store.load_by_path(&item.path()).unwrap().unwrap().id, item.id);
    }

    #[test]
    fn auto_timestamp_can_be_disabled() {
        let store = store_with_target();
        let mut item = SyncItem::new(ItemKind::Note, "n");
        item.updated_time = 1000;
        item.created_time = 1000;

        let saved = store
            .save(
                &item,
                SaveOptions {
                    auto_timestamp: false,
                    is_new: true,
                },
            )
            .unwrap();
        assert_eq!(saved.updated_time, 1000);

        let saved = store.save(&item, SaveOptions::default()).unwrap();
        assert!(saved.updated_time > 1000);
    }

    #[test]
    fn items_that_need_sync_orders_folders_first() {
        let store = store_with_target();
        // Saved in reverse priority order to prove the query reorders them
        let note = store
            .save(&SyncItem::new(ItemKind::Note, "n"), SaveOptions::default())
            .unwrap();
        let resource = store
            .save(&SyncItem::new(ItemKind::Resource, "r"), SaveOptions::default())
            .unwrap();
        let tag = store
            .save(&SyncItem::new(ItemKind::Tag, "t"), SaveOptions::default())
            .unwrap();
        let folder = store
            .save(&SyncItem::new(ItemKind::Folder, "f"), SaveOptions::default())
            .unwrap();

        let page = store.items_that_need_sync(1, 10).unwrap();
        assert!(!page.has_more);
        let got: Vec<&str> = page.items.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(got, vec![&folder.id, &tag.id, &resource.id, &note.id]);

        // Recording sync progress removes items from the queue
        for id in [&folder.id, &tag.id, &resource.id, &note.id] {
            store.set_sync_time(1, id, now_ms() + 1).unwrap();
        }
        assert!(store.items_that_need_sync(1, 10).unwrap().items.is_empty());
    }

    #[test]
    fn conflict_copies_never_need_sync() {
        let store = store_with_target();
        let mut item = SyncItem::new(ItemKind::Note, "mine");
        item.is_conflict = true;
        store.save(&item, SaveOptions::default()).unwrap();

        assert!(store.items_that_need_sync(1, 10).unwrap().items.is_empty());
    }

    #[test]
    fn sync_disabled_items_are_skipped_and_reported() {
        let store = store_with_target();
        let item = store
            .save(&SyncItem::new(ItemKind::Note, "big"), SaveOptions::default())
            .unwrap();
        store.set_sync_disabled(1, &item.id, "too large").unwrap();

        assert!(store.items_that_need_sync(1, 10).unwrap().items.is_empty());
        let disabled = store.sync_disabled_items(1).unwrap();
        assert_eq!(disabled.len(), 1);
        assert_eq!(disabled[0].reason, "too large");

        store.clear_sync_disabled(1, &item.id).unwrap();
        assert_eq!(store.items_that_need_sync(1, 10).unwrap().items.len(), 1);
    }

    #[test]
    fn tracked_delete_fans_out_per_target() {
        let store = store_with_target();
        store.register_target(2).unwrap();

        let item = store
            .save(&SyncItem::new(ItemKind::Note, "doomed"), SaveOptions::default())
            .unwrap();
        store.delete(&item.id, DeleteOptions::default()).unwrap();

        let for_one = store.deletion_records(1).unwrap();
        let for_two = store.deletion_records(2).unwrap();
        assert_eq!(for_one.len(), 1);
        assert_eq!(for_two.len(), 1);
        assert_eq!(for_one[0].item_id, item.id);

        // Confirming one target leaves the other's record alone
        store.purge_deletion_record(1, &item.id).unwrap();
        assert!(store.deletion_records(1).unwrap().is_empty());
        assert_eq!(store.deletion_records(2).unwrap().len(), 1);
    }

    #[test]
    fn untracked_delete_leaves_no_record() {
        let store = store_with_target();
        let item = store
            .save(&SyncItem::new(ItemKind::Note, "quiet"), SaveOptions::default())
            .unwrap();
        store
            .delete(
                &item.id,
                DeleteOptions {
                    track_deleted: false,
                    delete_children: true,
                },
            )
            .unwrap();
        assert_eq!(store.deletion_record_count().unwrap(), 0);
    }

    #[test]
    fn delete_children_recurses() {
        let store = store_with_target();
        let folder = store
            .save(&SyncItem::new(ItemKind::Folder, "f"), SaveOptions::default())
            .unwrap();
        let mut note = SyncItem::new(ItemKind::Note, "inside");
        note.parent_id = folder.id.clone();
        let note = store.save(&note, SaveOptions::default()).unwrap();

        store.delete(&folder.id, DeleteOptions::default()).unwrap();
        assert!(store.load(&note.id).unwrap().is_none());
        // folder + note, one record each for the single target
        assert_eq!(store.deletion_record_count().unwrap(), 2);
    }

    #[test]
    fn synced_item_ids_excludes_never_synced() {
        let store = store_with_target();
        let synced = store
            .save(&SyncItem::new(ItemKind::Note, "synced"), SaveOptions::default())
            .unwrap();
        store
            .save(&SyncItem::new(ItemKind::Note, "fresh"), SaveOptions::default())
            .unwrap();
        store.set_sync_time(1, &synced.id, now_ms()).unwrap();

        let ids = store.synced_item_ids(1).unwrap();
        assert_eq!(ids.len(), 1);
        assert!(ids.contains(&synced.id));
    }

    #[test]
    fn mark_notes_conflicted_detaches_them() {
        let store = store_with_target();
        let folder = store
            .save(&SyncItem::new(ItemKind::Folder, "f"), SaveOptions::default())
            .unwrap();
        let mut note = SyncItem::new(ItemKind::Note, "keep me");
        note.parent_id = folder.id.clone();
        let note = store.save(&note, SaveOptions::default()).unwrap();

        assert_eq!(store.mark_notes_conflicted(&folder.id).unwrap(), 1);
        let note = store.load(&note.id).unwrap().unwrap();
        assert!(note.is_conflict);
        assert_eq!(note.parent_id, "");
    }

    #[test]
    fn title_disambiguation() {
        let store = store_with_target();
        store
            .save(&SyncItem::new(ItemKind::Folder, "inbox"), SaveOptions::default())
            .unwrap();

        assert_eq!(
            store.disambiguate_title(ItemKind::Folder, "", "inbox").unwrap(),
            "inbox (1)"
        );
        assert_eq!(
            store.disambiguate_title(ItemKind::Folder, "", "other").unwrap(),
            "other"
        );
        // Different kind does not collide
        assert_eq!(
            store.disambiguate_title(ItemKind::Tag, "", "inbox").unwrap(),
            "inbox"
        );
    }

    #[test]
    fn settings_round_trip() {
        let store = store_with_target();
        assert!(store.setting("sync.1.context").unwrap().is_none());
        store.set_setting("sync.1.context", "{}").unwrap();
        assert_eq!(store.setting("sync.1.context").unwrap().unwrap(), "{}");
        store.delete_setting("sync.1.context").unwrap();
        assert!(store.setting("sync.1.context").unwrap().is_none());

        assert!(store.setting_bool("sync.fail_safe", true).unwrap());
        store.set_setting("sync.fail_safe", "0").unwrap();
        assert!(!store.setting_bool("sync.fail_safe", true).unwrap());
    }

    #[test]
    fn orphan_sync_records_are_purged() {
        let store = store_with_target();
        let item = store
            .save(&SyncItem::new(ItemKind::Note, "n"), SaveOptions::default())
            .unwrap();
        store.set_sync_time(1, &item.id, now_ms()).unwrap();
        store
            .delete(
                &item.id,
                DeleteOptions {
                    track_deleted: false,
                    delete_children: false,
                },
            )
            .unwrap();

        // delete() already removes its own rows; simulate a leftover
        store.set_sync_time(1, "0123456789abcdef0123456789abcdef", 5).unwrap();
        store.delete_orphan_sync_records().unwrap();
        assert_eq!(
            store.sync_time(1, "0123456789abcdef0123456789abcdef").unwrap(),
            0
        );
    }
}

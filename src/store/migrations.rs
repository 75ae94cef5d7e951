//! Database migrations for the item store

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < SCHEMA_VERSION {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Initial schema (v1)
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Items: notes, folders, tags, attachments
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            parent_id TEXT NOT NULL DEFAULT '',
            title TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL DEFAULT '',
            is_conflict INTEGER NOT NULL DEFAULT 0,
            created_time INTEGER NOT NULL,
            updated_time INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_items_updated_time ON items(updated_time);
        CREATE INDEX IF NOT EXISTS idx_items_parent ON items(parent_id);

        -- Per-target sync bookkeeping. sync_time is written only by the
        -- synchronizer, never by application saves.
        CREATE TABLE IF NOT EXISTS sync_items (
            target_id INTEGER NOT NULL,
            item_id TEXT NOT NULL,
            sync_time INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (target_id, item_id)
        );

        CREATE INDEX IF NOT EXISTS idx_sync_items_item ON sync_items(item_id);

        -- Deletion records, one row per configured target, purged once the
        -- remote delete is confirmed for that target.
        CREATE TABLE IF NOT EXISTS deleted_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_kind TEXT NOT NULL,
            item_id TEXT NOT NULL,
            deleted_time INTEGER NOT NULL,
            target_id INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_deleted_items_target ON deleted_items(target_id);

        -- Registered sync targets, so deletion records fan out correctly.
        CREATE TABLE IF NOT EXISTS sync_targets (
            id INTEGER PRIMARY KEY
        );

        -- Small key/value state, including per-target delta contexts.
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (1);
        "#,
    )?;
    Ok(())
}

/// v2: items rejected by a target are flagged sync-disabled with a reason,
/// and skipped on later sessions until cleared
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        ALTER TABLE sync_items ADD COLUMN sync_disabled INTEGER NOT NULL DEFAULT 0;
        ALTER TABLE sync_items ADD COLUMN sync_disabled_reason TEXT NOT NULL DEFAULT '';

        INSERT INTO schema_version (version) VALUES (2);
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}

//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Reusable request templates, unique per protocol kind
        CREATE TABLE IF NOT EXISTS actions (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            protocol TEXT NOT NULL,
            payload TEXT NOT NULL,
            schema_version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            UNIQUE (protocol, name)
        );

        CREATE TABLE IF NOT EXISTS devices (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            endpoint TEXT NOT NULL DEFAULT '',
            protocol TEXT NOT NULL,
            owner TEXT NOT NULL DEFAULT '',
            grp TEXT NOT NULL DEFAULT '',
            hw_info TEXT NOT NULL DEFAULT '',
            firmware TEXT NOT NULL DEFAULT '',
            auth_user TEXT,
            auth_password TEXT,
            auth_token TEXT,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            last_seen TEXT,
            reachability TEXT NOT NULL DEFAULT 'untested'
        );

        PRAGMA user_version = 1;
        ",
    )?;

    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        ALTER TABLE actions ADD COLUMN updated_at TEXT;
        CREATE INDEX IF NOT EXISTS idx_actions_protocol ON actions(protocol);
        CREATE INDEX IF NOT EXISTS idx_devices_group ON devices(grp);

        PRAGMA user_version = 2;
        ",
    )?;

    Ok(())
}

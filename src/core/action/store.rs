//! Action repository backed by SQLite

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use super::{
    clean_name, validate_payload, Action, ActionRecord, MigrationChain, MigrationReport,
    ACTION_SCHEMA_VERSION,
};
use crate::core::transport::ProtocolKind;
use crate::storage::{parse_timestamp, Store};
use crate::{Error, Result};

const SELECT_ACTION: &str = r"
    SELECT id, name, protocol, payload, schema_version, created_at, updated_at
    FROM actions
";

/// Action repository for CRUD, interchange and migration
#[derive(Debug, Clone)]
pub struct ActionStore {
    store: Store,
    chain: MigrationChain,
}

impl ActionStore {
    /// Create a repository with the built-in migration chain
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self::with_chain(store, MigrationChain::builtin())
    }

    /// Create a repository with a custom migration chain
    #[must_use]
    pub fn with_chain(store: Store, chain: MigrationChain) -> Self {
        Self { store, chain }
    }

    /// Save a new action
    ///
    /// # Errors
    ///
    /// `Validation` for an empty name or bad payload, `DuplicateName` when
    /// the name is taken within `kind`
    pub fn save(&self, name: &str, kind: ProtocolKind, payload: &Value) -> Result<String> {
        let name = clean_name(name)?;
        validate_payload(kind, payload)?;

        let mut conn = self.store.conn()?;
        let tx = conn.transaction()?;
        if name_taken(&tx, kind, &name, None)? {
            return Err(Error::DuplicateName { kind, name });
        }
        let id = insert(&tx, &name, kind, payload)?;
        tx.commit()?;

        tracing::info!(action_id = %id, name = %name, %kind, "action saved");
        Ok(id)
    }

    /// Load an action's payload
    ///
    /// # Errors
    ///
    /// `NotFound` when no action has this id
    pub fn load(&self, id: &str) -> Result<Value> {
        Ok(self.get(id)?.payload)
    }

    /// Get a full action
    ///
    /// # Errors
    ///
    /// `NotFound` when no action has this id
    pub fn get(&self, id: &str) -> Result<Action> {
        let conn = self.store.conn()?;
        let sql = format!("{SELECT_ACTION} WHERE id = ?1");
        conn.query_row(&sql, rusqlite::params![id], row_to_action)
            .optional()?
            .ok_or_else(|| Error::not_found("action", id))
    }

    /// Rename an action
    ///
    /// # Errors
    ///
    /// `NotFound`, `Validation` for an empty name, `DuplicateName`
    pub fn rename(&self, id: &str, new_name: &str) -> Result<()> {
        let name = clean_name(new_name)?;

        let mut conn = self.store.conn()?;
        let tx = conn.transaction()?;
        let kind = kind_of(&tx, id)?;
        if name_taken(&tx, kind, &name, Some(id))? {
            return Err(Error::DuplicateName { kind, name });
        }
        tx.execute(
            "UPDATE actions SET name = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![name, Utc::now().to_rfc3339(), id],
        )?;
        tx.commit()?;

        tracing::info!(action_id = %id, name = %name, "action renamed");
        Ok(())
    }

    /// Replace an action's payload; the payload is validated at the current
    /// schema version
    ///
    /// # Errors
    ///
    /// `NotFound`, `Validation`
    pub fn update_payload(&self, id: &str, payload: &Value) -> Result<()> {
        let mut conn = self.store.conn()?;
        let tx = conn.transaction()?;
        let kind = kind_of(&tx, id)?;
        validate_payload(kind, payload)?;
        tx.execute(
            r"
            UPDATE actions
            SET payload = ?1, schema_version = ?2, updated_at = ?3
            WHERE id = ?4
            ",
            rusqlite::params![
                serde_json::to_string(payload)?,
                ACTION_SCHEMA_VERSION,
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        tx.commit()?;

        tracing::info!(action_id = %id, "action payload updated");
        Ok(())
    }

    /// Delete an action
    ///
    /// # Errors
    ///
    /// `NotFound` when no action has this id
    pub fn delete(&self, id: &str) -> Result<()> {
        let conn = self.store.conn()?;
        let rows = conn.execute("DELETE FROM actions WHERE id = ?1", rusqlite::params![id])?;
        if rows == 0 {
            return Err(Error::not_found("action", id));
        }
        tracing::info!(action_id = %id, "action deleted");
        Ok(())
    }

    /// List actions ordered by name, optionally for one kind
    ///
    /// # Errors
    ///
    /// Returns error if the database query fails
    pub fn list(&self, kind: Option<ProtocolKind>) -> Result<Vec<Action>> {
        let conn = self.store.conn()?;
        let sql = format!(
            "{SELECT_ACTION} WHERE (?1 IS NULL OR protocol = ?1) ORDER BY name COLLATE NOCASE, name"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params![kind.map(|k| k.as_str())], row_to_action)?;

        let mut actions = Vec::new();
        for row in rows {
            actions.push(row?);
        }
        Ok(actions)
    }

    /// Write an action to a portable JSON file
    ///
    /// # Errors
    ///
    /// `NotFound`, or an IO error writing the file
    pub fn export(&self, id: &str, path: &Path) -> Result<()> {
        let action = self.get(id)?;
        let record = ActionRecord {
            name: action.name,
            protocol_kind: action.protocol_kind,
            payload: action.payload,
            schema_version: action.schema_version,
        };
        std::fs::write(path, serde_json::to_vec_pretty(&record)?)?;

        tracing::info!(action_id = %id, path = %path.display(), "action exported");
        Ok(())
    }

    /// Import an action file, returning the new id
    ///
    /// The file is either an exported record or a bare payload, in which
    /// case `kind` must name its protocol. Older payloads are migrated before
    /// validation. A taken name gets a ` (2)`, ` (3)`, ... suffix.
    ///
    /// # Errors
    ///
    /// `Validation` when the payload cannot be migrated or validated, IO and
    /// serialization errors reading the file
    pub fn import(&self, path: &Path, kind: Option<ProtocolKind>) -> Result<String> {
        let text = std::fs::read_to_string(path)?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Imported".to_string());

        let record = match serde_json::from_str::<Value>(&text) {
            Ok(value) if is_record(&value) => serde_json::from_value::<ActionRecord>(value)?,
            Ok(value) => bare_record(stem, kind, value)?,
            // Raw text files predate JSON payloads
            Err(_) => bare_record(stem, kind, Value::String(text.trim_end().to_string()))?,
        };

        let payload = self
            .chain
            .upgrade(record.schema_version, record.payload)
            .map_err(Error::Validation)?;
        let kind = record.protocol_kind;
        validate_payload(kind, &payload)?;
        let base = clean_name(&record.name)?;

        let mut conn = self.store.conn()?;
        let tx = conn.transaction()?;
        let name = unique_name(&tx, kind, &base)?;
        let id = insert(&tx, &name, kind, &payload)?;
        tx.commit()?;

        tracing::info!(action_id = %id, name = %name, path = %path.display(), "action imported");
        Ok(id)
    }

    /// Upgrade every action below the current schema version
    ///
    /// Records that fail a step or fail validation afterwards are left
    /// untouched and counted as not migrated.
    ///
    /// # Errors
    ///
    /// Returns error only if storage itself fails
    pub fn migrate(&self) -> Result<MigrationReport> {
        let pending: Vec<(String, String, String, u32)> = {
            let conn = self.store.conn()?;
            let mut stmt = conn.prepare(
                r"
                SELECT id, protocol, payload, schema_version
                FROM actions
                WHERE schema_version < ?1
                ORDER BY created_at
                ",
            )?;
            let rows = stmt.query_map(rusqlite::params![self.chain.target()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;
            let pending = rows.collect::<std::result::Result<Vec<_>, _>>()?;
            pending
        };

        let mut report = MigrationReport::default();
        for (id, protocol, raw, version) in pending {
            match self.upgrade_one(&protocol, &raw, version) {
                Ok(payload) => {
                    let conn = self.store.conn()?;
                    conn.execute(
                        "UPDATE actions SET payload = ?1, schema_version = ?2 WHERE id = ?3",
                        rusqlite::params![serde_json::to_string(&payload)?, self.chain.target(), id],
                    )?;
                    report.migrated += 1;
                }
                Err(reason) => {
                    tracing::warn!(action_id = %id, from = version, %reason, "action not migrated");
                    report.not_migrated += 1;
                    report.failures.push((id, reason));
                }
            }
        }

        tracing::info!(
            migrated = report.migrated,
            not_migrated = report.not_migrated,
            "action migration finished"
        );
        Ok(report)
    }

    fn upgrade_one(
        &self,
        protocol: &str,
        raw: &str,
        version: u32,
    ) -> std::result::Result<Value, String> {
        let kind = protocol.parse::<ProtocolKind>().map_err(|e| e.message)?;
        let payload = self.chain.upgrade(version, parse_stored_payload(raw))?;
        validate_payload(kind, &payload).map_err(|e| e.detail())?;
        Ok(payload)
    }
}

fn is_record(value: &Value) -> bool {
    value.get("protocolKind").is_some() && value.get("payload").is_some()
}

fn bare_record(name: String, kind: Option<ProtocolKind>, payload: Value) -> Result<ActionRecord> {
    let kind = kind.ok_or_else(|| {
        Error::validation("file holds a bare payload; the protocol kind must be given")
    })?;
    let legacy = payload.is_string()
        || payload.get("saved_by").is_some()
        || payload.get("saved_at").is_some();
    Ok(ActionRecord {
        name,
        protocol_kind: kind,
        payload,
        schema_version: if legacy { 1 } else { ACTION_SCHEMA_VERSION },
    })
}

fn insert(conn: &Connection, name: &str, kind: ProtocolKind, payload: &Value) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        r"
        INSERT INTO actions (id, name, protocol, payload, schema_version, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ",
        rusqlite::params![
            id,
            name,
            kind.as_str(),
            serde_json::to_string(payload)?,
            ACTION_SCHEMA_VERSION,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(id)
}

fn kind_of(conn: &Connection, id: &str) -> Result<ProtocolKind> {
    let protocol: Option<String> = conn
        .query_row(
            "SELECT protocol FROM actions WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )
        .optional()?;
    let protocol = protocol.ok_or_else(|| Error::not_found("action", id))?;
    Ok(protocol.parse()?)
}

fn name_taken(
    conn: &Connection,
    kind: ProtocolKind,
    name: &str,
    except: Option<&str>,
) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM actions WHERE protocol = ?1 AND name = ?2 AND id IS NOT ?3",
        rusqlite::params![kind.as_str(), name, except],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn unique_name(conn: &Connection, kind: ProtocolKind, base: &str) -> Result<String> {
    if !name_taken(conn, kind, base, None)? {
        return Ok(base.to_string());
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base} ({n})");
        if !name_taken(conn, kind, &candidate, None)? {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Legacy rows may hold raw text rather than JSON
fn parse_stored_payload(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn row_to_action(row: &rusqlite::Row<'_>) -> rusqlite::Result<Action> {
    let protocol: String = row.get(2)?;
    let protocol_kind = protocol.parse::<ProtocolKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let payload: String = row.get(3)?;
    let created_at: String = row.get(5)?;
    let updated_at: Option<String> = row.get(6)?;

    Ok(Action {
        id: row.get(0)?,
        name: row.get(1)?,
        protocol_kind,
        payload: parse_stored_payload(&payload),
        schema_version: row.get(4)?,
        created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
        updated_at: updated_at.as_deref().and_then(parse_timestamp),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> ActionStore {
        ActionStore::new(Store::open_memory().unwrap())
    }

    fn tcp_payload() -> Value {
        json!({"host": "10.0.0.7", "port": 4000, "body": "PING", "append_newline": true})
    }

    #[test]
    fn test_action_lifecycle() {
        let actions = store();

        let id = actions.save("ping", ProtocolKind::Tcp, &tcp_payload()).unwrap();
        assert_eq!(actions.load(&id).unwrap(), tcp_payload());

        let err = actions
            .save("ping", ProtocolKind::Tcp, &tcp_payload())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName { .. }));

        let udp_id = actions
            .save("ping", ProtocolKind::Udp, &json!({"host": "10.0.0.7", "port": 4000}))
            .unwrap();
        assert_ne!(id, udp_id);

        actions.rename(&id, "ping-2").unwrap();
        let renamed = actions.get(&id).unwrap();
        assert_eq!(renamed.name, "ping-2");
        assert!(renamed.updated_at.is_some());

        actions.delete(&id).unwrap();
        assert!(matches!(actions.load(&id), Err(Error::NotFound { .. })));
        assert!(matches!(actions.delete(&id), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_unknown_fields_are_preserved() {
        let actions = store();
        let payload = json!({
            "method": "POST",
            "url": "https://hooks.local/x",
            "body": "{\"a\":1}",
            "x-custom": {"nested": [1, 2, 3]}
        });
        let id = actions.save("hook", ProtocolKind::Http, &payload).unwrap();
        assert_eq!(actions.load(&id).unwrap(), payload);
    }

    #[test]
    fn test_rename_validation() {
        let actions = store();
        let a = actions.save("a", ProtocolKind::Tcp, &tcp_payload()).unwrap();
        actions.save("b", ProtocolKind::Tcp, &tcp_payload()).unwrap();

        assert!(matches!(actions.rename(&a, "  "), Err(Error::Validation(_))));
        assert!(matches!(actions.rename(&a, "b"), Err(Error::DuplicateName { .. })));
        assert!(matches!(actions.rename("nope", "c"), Err(Error::NotFound { .. })));
        // Renaming to its own name is allowed
        actions.rename(&a, "a").unwrap();
    }

    #[test]
    fn test_invalid_payload_rejected() {
        let actions = store();
        let err = actions
            .save("bad", ProtocolKind::Tcp, &json!({"port": 1}))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(actions.list(None).unwrap().is_empty());
    }

    #[test]
    fn test_update_payload() {
        let actions = store();
        let id = actions.save("p", ProtocolKind::Tcp, &tcp_payload()).unwrap();

        let next = json!({"host": "10.0.0.8", "port": 4001});
        actions.update_payload(&id, &next).unwrap();
        assert_eq!(actions.load(&id).unwrap(), next);
        assert_eq!(actions.get(&id).unwrap().name, "p");

        assert!(actions.update_payload(&id, &json!({"host": ""})).is_err());
        assert_eq!(actions.load(&id).unwrap(), next);
    }

    #[test]
    fn test_list_orders_by_name_and_filters() {
        let actions = store();
        actions.save("zeta", ProtocolKind::Tcp, &tcp_payload()).unwrap();
        actions.save("Alpha", ProtocolKind::Tcp, &tcp_payload()).unwrap();
        actions
            .save("mid", ProtocolKind::Serial, &json!({"port": "COM1", "body": "AT"}))
            .unwrap();

        let names: Vec<_> = actions.list(None).unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["Alpha", "mid", "zeta"]);

        let serial = actions.list(Some(ProtocolKind::Serial)).unwrap();
        assert_eq!(serial.len(), 1);
        assert_eq!(serial[0].protocol_kind, ProtocolKind::Serial);
    }

    #[test]
    fn test_export_import_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ping.json");
        let actions = store();

        let id = actions.save("ping", ProtocolKind::Tcp, &tcp_payload()).unwrap();
        actions.export(&id, &path).unwrap();

        let first = actions.import(&path, None).unwrap();
        let second = actions.import(&path, None).unwrap();

        let imported = actions.get(&first).unwrap();
        assert_eq!(imported.name, "ping (2)");
        assert_eq!(imported.payload, tcp_payload());
        assert_eq!(imported.protocol_kind, ProtocolKind::Tcp);
        assert_eq!(actions.get(&second).unwrap().name, "ping (3)");
    }

    #[test]
    fn test_import_bare_legacy_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reset.txt");
        std::fs::write(&path, "AT+RST\n").unwrap();

        let actions = store();
        assert!(matches!(actions.import(&path, None), Err(Error::Validation(_))));

        let id = actions.import(&path, Some(ProtocolKind::Serial)).unwrap();
        let action = actions.get(&id).unwrap();
        assert_eq!(action.name, "reset");
        assert_eq!(action.payload, json!({"body": "AT+RST"}));
        assert_eq!(action.schema_version, ACTION_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_upgrades_and_reports_failures() {
        let actions = store();
        {
            let conn = actions.store.conn().unwrap();
            let legacy = r"
                INSERT INTO actions (id, name, protocol, payload, schema_version, created_at)
                VALUES (?1, ?2, ?3, ?4, 1, '2020-01-01T00:00:00Z')
            ";
            conn.execute(legacy, ["s1", "reset", "serial", "AT+RST"]).unwrap();
            conn.execute(
                legacy,
                [
                    "t1",
                    "status",
                    "tcp",
                    r#"{"host":"10.0.0.9","port":23,"body":"status","saved_by":"ops","saved_at":"2020-01-01"}"#,
                ],
            )
            .unwrap();
            conn.execute(legacy, ["t2", "broken", "tcp", r#"{"host":"","port":23}"#])
                .unwrap();
        }

        let report = actions.migrate().unwrap();
        assert_eq!(report.migrated, 2);
        assert_eq!(report.not_migrated, 1);
        assert_eq!(report.failures[0].0, "t2");

        assert_eq!(actions.load("s1").unwrap(), json!({"body": "AT+RST"}));
        assert_eq!(
            actions.load("t1").unwrap(),
            json!({"host": "10.0.0.9", "port": 23, "body": "status"})
        );

        let broken = actions.get("t2").unwrap();
        assert_eq!(broken.schema_version, 1);
        assert_eq!(broken.payload, json!({"host": "", "port": 23}));

        // Nothing left to do on a second run except the broken record
        let again = actions.migrate().unwrap();
        assert_eq!(again.migrated, 0);
        assert_eq!(again.not_migrated, 1);
    }

    #[test]
    fn test_unavailable_storage_fails_fast() {
        let actions = ActionStore::new(Store::unavailable("no disk"));
        assert!(matches!(
            actions.save("x", ProtocolKind::Tcp, &tcp_payload()),
            Err(Error::StorageUnavailable(_))
        ));
        assert!(matches!(actions.list(None), Err(Error::StorageUnavailable(_))));
    }
}

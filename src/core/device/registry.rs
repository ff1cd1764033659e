//! Device repository backed by SQLite

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::interchange::{self, InterchangeFormat};
use super::{Device, Reachability};
use crate::core::probe::{TestOutcome, TestResult};
use crate::core::transport::ProtocolKind;
use crate::storage::{parse_timestamp, Store};
use crate::{Error, Result};

pub(crate) const DEVICE_COLUMNS: &str = "id, name, endpoint, protocol, owner, grp, hw_info, firmware, \
     auth_user, auth_password, auth_token, metadata_json, last_seen, reachability";

/// What to do when an imported id already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Keep the existing device and store the record under a new id
    #[default]
    RegenerateId,
    /// Keep the existing device and drop the record
    Skip,
    /// Replace the existing device
    Overwrite,
}

impl std::str::FromStr for ConflictPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "regenerate" | "regenerate-id" | "regenerateid" => Ok(Self::RegenerateId),
            "skip" => Ok(Self::Skip),
            "overwrite" | "upsert" => Ok(Self::Overwrite),
            other => Err(Error::validation(format!("unknown conflict policy '{other}'"))),
        }
    }
}

/// Import options
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Open a best-effort session for every imported device with an endpoint
    pub auto_connect: bool,
    /// Duplicate id handling
    pub on_conflict: ConflictPolicy,
}

/// A record that could not be imported or connected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordError {
    /// 1-based record number in the source
    pub record: usize,
    /// Device id, when known
    pub device_id: Option<String>,
    /// What went wrong
    pub message: String,
}

/// Outcome of a bulk import
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    /// Devices written
    pub imported_count: usize,
    /// Records skipped by the conflict policy
    pub skipped_count: usize,
    /// Ids of the devices written, in source order
    pub imported_ids: Vec<String>,
    /// Records rejected by parsing or validation
    pub per_record_errors: Vec<RecordError>,
    /// Auto-connect failures
    pub connect_errors: Vec<RecordError>,
}

/// Device repository
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    store: Store,
}

impl DeviceRegistry {
    /// Create a new device registry
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Add a device
    ///
    /// # Errors
    ///
    /// `Validation`, `DuplicateId`
    pub fn add(&self, device: &Device) -> Result<()> {
        device.validate()?;

        let mut conn = self.store.conn()?;
        let tx = conn.transaction()?;
        if exists(&tx, &device.id)? {
            return Err(Error::DuplicateId(device.id.clone()));
        }
        insert(&tx, device)?;
        tx.commit()?;

        tracing::info!(device_id = %device.id, name = %device.name, "device added");
        Ok(())
    }

    /// Replace a device's fields
    ///
    /// # Errors
    ///
    /// `NotFound`, `Validation`
    pub fn edit(&self, device: &Device) -> Result<()> {
        device.validate()?;

        let mut conn = self.store.conn()?;
        let tx = conn.transaction()?;
        if !exists(&tx, &device.id)? {
            return Err(Error::not_found("device", &device.id));
        }
        upsert(&tx, device)?;
        tx.commit()?;

        tracing::info!(device_id = %device.id, "device updated");
        Ok(())
    }

    /// Delete a device
    ///
    /// # Errors
    ///
    /// `NotFound`
    pub fn delete(&self, id: &str) -> Result<()> {
        let conn = self.store.conn()?;
        let rows = conn.execute("DELETE FROM devices WHERE id = ?1", rusqlite::params![id])?;
        if rows == 0 {
            return Err(Error::not_found("device", id));
        }
        tracing::info!(device_id = %id, "device deleted");
        Ok(())
    }

    /// Get a device by id
    ///
    /// # Errors
    ///
    /// `NotFound`
    pub fn get(&self, id: &str) -> Result<Device> {
        let conn = self.store.conn()?;
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?1");
        conn.query_row(&sql, rusqlite::params![id], row_to_device)
            .optional()?
            .ok_or_else(|| Error::not_found("device", id))
    }

    /// List devices ordered by id
    ///
    /// # Errors
    ///
    /// Returns error if the database query fails
    pub fn list(&self) -> Result<Vec<Device>> {
        let conn = self.store.conn()?;
        select_all(&conn)
    }

    /// Persist a test outcome as reachability, refreshing last seen on success
    ///
    /// # Errors
    ///
    /// `NotFound`
    pub fn record_test(&self, result: &TestResult) -> Result<()> {
        let reachability = match result.outcome {
            TestOutcome::Success => Reachability::Success,
            TestOutcome::Fail => Reachability::Fail,
        };
        let conn = self.store.conn()?;
        let rows = if reachability == Reachability::Success {
            conn.execute(
                "UPDATE devices SET reachability = ?1, last_seen = ?2 WHERE id = ?3",
                rusqlite::params![
                    reachability.as_str(),
                    result.timestamp.to_rfc3339(),
                    result.device_id
                ],
            )?
        } else {
            conn.execute(
                "UPDATE devices SET reachability = ?1 WHERE id = ?2",
                rusqlite::params![reachability.as_str(), result.device_id],
            )?
        };
        if rows == 0 {
            return Err(Error::not_found("device", &result.device_id));
        }
        tracing::debug!(device_id = %result.device_id, %reachability, "test recorded");
        Ok(())
    }

    /// Import devices from a file
    ///
    /// Per-record failures are collected in the report; the batch continues.
    /// Auto-connect is performed by the caller that owns a monitor, see
    /// [`crate::utils::autoconnect`].
    ///
    /// # Errors
    ///
    /// Returns error only when the source cannot be read or storage fails
    pub fn import(
        &self,
        source: &Path,
        format: InterchangeFormat,
        options: &ImportOptions,
    ) -> Result<ImportReport> {
        let records = interchange::read(source, format)?;
        let mut report = ImportReport::default();

        let mut conn = self.store.conn()?;
        let tx = conn.transaction()?;
        for (index, record) in records.into_iter().enumerate() {
            let number = index + 1;
            let mut device = match record {
                Ok(device) => device,
                Err(message) => {
                    report.per_record_errors.push(RecordError {
                        record: number,
                        device_id: None,
                        message,
                    });
                    continue;
                }
            };
            if device.id.trim().is_empty() {
                device.id = Uuid::new_v4().to_string();
            }
            if let Err(e) = device.validate() {
                report.per_record_errors.push(RecordError {
                    record: number,
                    device_id: Some(device.id.clone()),
                    message: e.detail(),
                });
                continue;
            }

            if exists(&tx, &device.id)? {
                match options.on_conflict {
                    ConflictPolicy::Skip => {
                        report.skipped_count += 1;
                        continue;
                    }
                    ConflictPolicy::RegenerateId => {
                        let old = std::mem::replace(&mut device.id, Uuid::new_v4().to_string());
                        tracing::debug!(old_id = %old, new_id = %device.id, "duplicate id regenerated");
                    }
                    ConflictPolicy::Overwrite => {}
                }
            }

            upsert(&tx, &device)?;
            report.imported_count += 1;
            report.imported_ids.push(device.id);
        }
        tx.commit()?;

        tracing::info!(
            path = %source.display(),
            %format,
            imported = report.imported_count,
            skipped = report.skipped_count,
            errors = report.per_record_errors.len(),
            "devices imported"
        );
        Ok(report)
    }

    /// Export every device, returning the number written
    ///
    /// # Errors
    ///
    /// Returns error if the target cannot be written
    pub fn export(&self, target: &Path, format: InterchangeFormat) -> Result<usize> {
        let devices = self.list()?;
        interchange::write(target, format, &devices)?;
        tracing::info!(path = %target.display(), %format, count = devices.len(), "devices exported");
        Ok(devices.len())
    }
}

fn exists(conn: &Connection, id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM devices WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn device_params(device: &Device) -> [Box<dyn rusqlite::ToSql + '_>; 14] {
    [
        Box::new(&device.id),
        Box::new(&device.name),
        Box::new(&device.endpoint),
        Box::new(device.protocol_kind.as_str()),
        Box::new(&device.owner),
        Box::new(&device.group),
        Box::new(&device.hw_info),
        Box::new(&device.firmware),
        Box::new(&device.auth_user),
        Box::new(&device.auth_password),
        Box::new(&device.auth_token),
        Box::new(&device.metadata_json),
        Box::new(device.last_seen.map(|t| t.to_rfc3339())),
        Box::new(device.reachability.as_str()),
    ]
}

pub(crate) fn insert(conn: &Connection, device: &Device) -> Result<()> {
    let sql = format!(
        "INSERT INTO devices ({DEVICE_COLUMNS}) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
    );
    conn.execute(&sql, rusqlite::params_from_iter(device_params(device)))?;
    Ok(())
}

fn upsert(conn: &Connection, device: &Device) -> Result<()> {
    let sql = format!(
        "INSERT OR REPLACE INTO devices ({DEVICE_COLUMNS}) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
    );
    conn.execute(&sql, rusqlite::params_from_iter(device_params(device)))?;
    Ok(())
}

pub(crate) fn select_all(conn: &Connection) -> Result<Vec<Device>> {
    let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_device)?;

    let mut devices = Vec::new();
    for row in rows {
        devices.push(row?);
    }
    Ok(devices)
}

pub(crate) fn row_to_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<Device> {
    let protocol: String = row.get(3)?;
    let protocol_kind = protocol.parse::<ProtocolKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let last_seen: Option<String> = row.get(12)?;
    let reachability: String = row.get(13)?;

    Ok(Device {
        id: row.get(0)?,
        name: row.get(1)?,
        endpoint: row.get(2)?,
        protocol_kind,
        owner: row.get(4)?,
        group: row.get(5)?,
        hw_info: row.get(6)?,
        firmware: row.get(7)?,
        auth_user: row.get(8)?,
        auth_password: row.get(9)?,
        auth_token: row.get(10)?,
        metadata_json: row.get(11)?,
        last_seen: last_seen.as_deref().and_then(parse_timestamp),
        reachability: reachability.parse().unwrap_or_default(),
    })
}

/// Create the devices table in a standalone interchange database
pub(crate) fn create_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
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
        ",
    )?;
    Ok(())
}

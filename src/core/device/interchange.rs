//! Device file formats: CSV, NDJSON and standalone SQLite
//!
//! CSV carries the columns `id,name,endpoint,protocolKind,owner,group,hwInfo,firmware`.
//! Fields are always quoted on write; on read quotes are optional, `""` is an
//! escaped quote and a leading header line is detected and used to map
//! columns. NDJSON and SQLite carry every device field.

use super::registry::{create_table, insert, select_all};
use super::Device;
use crate::core::transport::ProtocolKind;
use crate::{Error, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// CSV column order
pub const CSV_HEADER: [&str; 8] = [
    "id",
    "name",
    "endpoint",
    "protocolKind",
    "owner",
    "group",
    "hwInfo",
    "firmware",
];

/// A parsed record or the reason it was rejected
pub type Record = std::result::Result<Device, String>;

/// Device interchange format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterchangeFormat {
    /// Comma separated values
    Csv,
    /// One JSON object per line
    Ndjson,
    /// SQLite file with a `devices` table
    Db,
}

impl InterchangeFormat {
    /// Guess the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "csv" => Some(Self::Csv),
            "ndjson" | "jsonl" => Some(Self::Ndjson),
            "db" | "sqlite" | "sqlite3" => Some(Self::Db),
            _ => None,
        }
    }
}

impl fmt::Display for InterchangeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csv => write!(f, "csv"),
            Self::Ndjson => write!(f, "ndjson"),
            Self::Db => write!(f, "db"),
        }
    }
}

impl FromStr for InterchangeFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "ndjson" | "jsonl" => Ok(Self::Ndjson),
            "db" | "sqlite" => Ok(Self::Db),
            other => Err(Error::validation(format!("unknown device file format '{other}'"))),
        }
    }
}

/// Read every record from `path`
///
/// # Errors
///
/// Returns error only when the file itself cannot be read
pub fn read(path: &Path, format: InterchangeFormat) -> Result<Vec<Record>> {
    match format {
        InterchangeFormat::Csv => Ok(parse_csv(&std::fs::read_to_string(path)?)),
        InterchangeFormat::Ndjson => Ok(parse_ndjson(&std::fs::read_to_string(path)?)),
        InterchangeFormat::Db => read_db(path),
    }
}

/// Write `devices` to `path`, replacing any existing file
///
/// # Errors
///
/// Returns error if the file cannot be written
pub fn write(path: &Path, format: InterchangeFormat, devices: &[Device]) -> Result<()> {
    match format {
        InterchangeFormat::Csv => std::fs::write(path, to_csv(devices))?,
        InterchangeFormat::Ndjson => std::fs::write(path, to_ndjson(devices)?)?,
        InterchangeFormat::Db => write_db(path, devices)?,
    }
    Ok(())
}

/// Split CSV text into records of fields
pub fn split_csv(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                if !(record.len() == 1 && record[0].trim().is_empty()) {
                    records.push(std::mem::take(&mut record));
                } else {
                    record.clear();
                }
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        if !(record.len() == 1 && record[0].trim().is_empty()) {
            records.push(record);
        }
    }
    records
}

fn is_header(fields: &[String]) -> bool {
    fields.len() >= 2
        && fields[0].trim().eq_ignore_ascii_case("id")
        && fields[1].trim().eq_ignore_ascii_case("name")
}

/// Parse CSV text into devices
pub fn parse_csv(text: &str) -> Vec<Record> {
    let mut rows = split_csv(text).into_iter();
    let mut columns: Vec<String> = CSV_HEADER.iter().map(|c| c.to_lowercase()).collect();

    let mut pending = None;
    if let Some(first) = rows.next() {
        if is_header(&first) {
            columns = first.iter().map(|c| c.trim().to_lowercase()).collect();
        } else {
            pending = Some(first);
        }
    }

    pending
        .into_iter()
        .chain(rows)
        .map(|fields| csv_record(&columns, &fields))
        .collect()
}

fn csv_record(columns: &[String], fields: &[String]) -> Record {
    let field = |name: &str| -> String {
        columns
            .iter()
            .position(|c| c == &name.to_lowercase())
            .and_then(|i| fields.get(i))
            .map(|f| f.trim().to_string())
            .unwrap_or_default()
    };

    let kind_text = field("protocolKind");
    if kind_text.is_empty() {
        return Err("protocolKind is missing".to_string());
    }
    let kind = kind_text
        .parse::<ProtocolKind>()
        .map_err(|e| e.message)?;

    let mut device = Device::new(field("id"), field("name"), kind).endpoint(field("endpoint"));
    device.owner = field("owner");
    device.group = field("group");
    device.hw_info = field("hwInfo");
    device.firmware = field("firmware");
    Ok(device)
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Render devices as CSV with a header line
pub fn to_csv(devices: &[Device]) -> String {
    let mut out = CSV_HEADER.join(",");
    out.push('\n');
    for d in devices {
        let fields = [
            d.id.as_str(),
            d.name.as_str(),
            d.endpoint.as_str(),
            d.protocol_kind.as_str(),
            d.owner.as_str(),
            d.group.as_str(),
            d.hw_info.as_str(),
            d.firmware.as_str(),
        ];
        let line: Vec<String> = fields.iter().map(|f| quote(f)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

/// Parse NDJSON text, one device per non-blank line
pub fn parse_ndjson(text: &str) -> Vec<Record> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str::<Device>(line).map_err(|e| e.to_string()))
        .collect()
}

/// Render devices as NDJSON
///
/// # Errors
///
/// Returns error if a device fails to serialize
pub fn to_ndjson(devices: &[Device]) -> Result<String> {
    let mut out = String::new();
    for device in devices {
        out.push_str(&serde_json::to_string(device)?);
        out.push('\n');
    }
    Ok(out)
}

fn read_db(path: &Path) -> Result<Vec<Record>> {
    let conn = Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    Ok(select_all(&conn)?.into_iter().map(Ok).collect())
}

fn write_db(path: &Path, devices: &[Device]) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let mut conn = Connection::open(path)?;
    create_table(&conn)?;
    let tx = conn.transaction()?;
    for device in devices {
        insert(&tx, device)?;
    }
    tx.commit()?;
    Ok(())
}

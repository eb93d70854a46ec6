//! CSV table storage and the companion metadata artifact.

use super::{Row, Table, Value};
use crate::error::{Error, Result};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// How a downstream consumer should interpret a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    UniqueId,
    ForeignId,
    StartTime,
    Duration,
    Attribute,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub name: String,
    pub role: FieldRole,
}

/// Per-table metadata written next to each CSV file.
///
/// `partition_offsets` lets a consumer recover partition membership without a
/// per-row label: partition `i` spans `[offsets[i], offsets[i + 1])`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub table: String,
    pub row_count: usize,
    pub fields: Vec<FieldMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_offsets: Option<Vec<usize>>,
}

impl TableMetadata {
    /// Describe `table`, tagging `id_column` as its key and `foreign` as references.
    pub fn describe(table: &Table, id_column: Option<&str>, foreign: &[&str]) -> Self {
        let fields = table
            .columns()
            .iter()
            .map(|c| {
                let role = if Some(c.as_str()) == id_column {
                    FieldRole::UniqueId
                } else if foreign.contains(&c.as_str()) {
                    FieldRole::ForeignId
                } else if c == "start_time" {
                    FieldRole::StartTime
                } else if c == "duration" {
                    FieldRole::Duration
                } else {
                    FieldRole::Attribute
                };
                FieldMetadata {
                    name: c.clone(),
                    role,
                }
            })
            .collect();
        Self {
            table: table.name().to_string(),
            row_count: table.len(),
            fields,
            partition_offsets: None,
        }
    }

    pub fn with_offsets(mut self, offsets: Vec<usize>) -> Self {
        self.partition_offsets = Some(offsets);
        self
    }
}

/// Reads and writes tables as CSV files under one population directory.
#[derive(Debug, Clone)]
pub struct TableStore {
    dir: PathBuf,
}

impl TableStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    pub fn exists(&self, file_name: &str) -> bool {
        self.path_of(file_name).exists()
    }

    /// Read `file_name`, naming the table after the file stem.
    pub fn read(&self, file_name: &str) -> Result<Table> {
        let path = self.path_of(file_name);
        info!(path = %path.display(), "Reading table");
        read_csv(&path)
    }

    pub fn write(&self, table: &Table, file_name: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_of(file_name);
        info!(path = %path.display(), rows = table.len(), "Saving table");
        write_csv(table, &path)?;
        Ok(path)
    }

    /// Write `metadata` as `<stem>.meta.json` next to `file_name`.
    pub fn write_metadata(&self, file_name: &str, metadata: &TableMetadata) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = metadata_path(&self.path_of(file_name));
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, metadata)?;
        debug!(path = %path.display(), "Wrote table metadata");
        Ok(path)
    }

    pub fn read_metadata(&self, file_name: &str) -> Result<Option<TableMetadata>> {
        let path = metadata_path(&self.path_of(file_name));
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(&path)?);
        Ok(Some(serde_json::from_reader(reader)?))
    }
}

fn metadata_path(csv_path: &Path) -> PathBuf {
    csv_path.with_extension("meta.json")
}

pub fn read_csv(path: &Path) -> Result<Table> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("table")
        .to_string();
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(BufReader::new(file));

    let columns: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    if columns.is_empty() {
        return Err(Error::domain(format!("{}: missing header row", path.display())));
    }

    let mut rows: Vec<Row> = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(Value::parse).collect());
    }
    Table::from_rows(name, columns, rows)
}

pub fn write_csv(table: &Table, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = WriterBuilder::new().from_writer(BufWriter::new(file));
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

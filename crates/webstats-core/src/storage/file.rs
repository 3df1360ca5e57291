//! CSV file backend
//!
//! One dataset per file. The header is the row-id column followed by the
//! schema columns; each data row is the row id followed by the value of each
//! header column, empty for an absent cell. Rows whose non-id cells would all
//! be empty are not written.
//!
//! Two write modes:
//! - `store_columns` rewrites the whole file from the caller's column list.
//! - `append` adds rows at the end. When the file already has a header, the
//!   on-disk column order is used and the caller's column list is ignored.

use super::csv;
use super::{BackendKind, BackendStatus, LoadedTable, StorageBackend};
use crate::error::CoreError;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use webstats_types::SparseTable;

/// Computes a cell from the row id instead of reading it from the table
pub type ColumnMapper = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct FileBackend {
    path: PathBuf,
    row_key: String,
    mappers: BTreeMap<String, ColumnMapper>,
}

impl FileBackend {
    /// Create a backend for `path`, creating the parent directory if needed
    pub fn new(path: PathBuf, row_key: impl Into<String>) -> Result<Self, CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CoreError::FileWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        if path.exists() && !path.is_file() {
            return Err(CoreError::NotAFile { path });
        }

        debug!(path = %path.display(), "CSV backend ready");
        Ok(Self {
            path,
            row_key: row_key.into(),
            mappers: BTreeMap::new(),
        })
    }

    /// Fill `column` from `mapper` rather than from the stored table
    pub fn with_mapper(
        mut self,
        column: impl Into<String>,
        mapper: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.mappers.insert(column.into(), Box::new(mapper));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schema columns from the on-disk header, `None` if there is no header yet
    pub fn read_columns(&self) -> Result<Option<Vec<String>>, CoreError> {
        Ok(self
            .read_records()?
            .and_then(|records| records.into_iter().next())
            .map(|mut header| {
                header.remove(0);
                header
            }))
    }

    /// Append rows to the file
    ///
    /// If the file already starts with a header, rows are written in that
    /// header's column order and `columns` is ignored. Otherwise a header is
    /// written from `columns` first.
    pub fn append(&mut self, table: &SparseTable, columns: &[String]) -> Result<(), CoreError> {
        self.ensure_file()?;
        let existing = self.read_columns()?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|source| self.write_error(source))?;
        let mut writer = BufWriter::new(file);

        let written = match existing {
            Some(on_disk) => {
                if on_disk.as_slice() != columns {
                    warn!(
                        path = %self.path.display(),
                        on_disk = ?on_disk,
                        requested = ?columns,
                        "Appending with the column order already in the file header"
                    );
                }
                self.write_rows(&mut writer, table, &on_disk)
            }
            None => {
                self.write_header(&mut writer, columns)
                    .map_err(|source| self.write_error(source))?;
                self.write_rows(&mut writer, table, columns)
            }
        }
        .map_err(|source| self.write_error(source))?;

        writer.flush().map_err(|source| self.write_error(source))?;
        debug!(path = %self.path.display(), rows = written, "Appended rows");
        Ok(())
    }

    fn read_records(&self) -> Result<Option<Vec<Vec<String>>>, CoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CoreError::FileRead {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let records = csv::parse(&content).map_err(|e| CoreError::CsvParse {
            path: self.path.clone(),
            line_number: e.line_number,
            message: e.message,
        })?;

        if records.is_empty() {
            Ok(None)
        } else {
            Ok(Some(records))
        }
    }

    fn ensure_file(&self) -> Result<(), CoreError> {
        if self.path.exists() && !self.path.is_file() {
            error!(path = %self.path.display(), "CSV path is a directory, please remove it");
            return Err(CoreError::NotAFile {
                path: self.path.clone(),
            });
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map(drop)
            .map_err(|source| self.write_error(source))
    }

    fn write_header<W: Write>(&self, writer: &mut W, columns: &[String]) -> std::io::Result<()> {
        let mut header = Vec::with_capacity(columns.len() + 1);
        header.push(self.row_key.as_str());
        header.extend(columns.iter().map(String::as_str));
        csv::write_record(writer, &header)
    }

    /// Write one line per row that has at least one non-empty cell
    fn write_rows<W: Write>(
        &self,
        writer: &mut W,
        table: &SparseTable,
        columns: &[String],
    ) -> std::io::Result<usize> {
        let mut written = 0;
        for (entry, cells) in table.rows() {
            let mut record = Vec::with_capacity(columns.len() + 1);
            record.push(entry.clone());
            let mut has_scores = false;

            for column in columns {
                let value = match self.mappers.get(column) {
                    Some(mapper) => mapper(entry),
                    None => cells.get(column).cloned(),
                };
                match value {
                    Some(value) if !value.is_empty() => {
                        has_scores = true;
                        record.push(value);
                    }
                    // Keep columns aligned
                    _ => record.push(String::new()),
                }
            }

            if has_scores {
                csv::write_record(writer, &record)?;
                written += 1;
            }
        }
        Ok(written)
    }

    fn rewrite(&self, table: &SparseTable, columns: &[String]) -> Result<usize, CoreError> {
        self.ensure_file()?;
        let file = File::create(&self.path).map_err(|source| self.write_error(source))?;
        let mut writer = BufWriter::new(file);

        self.write_header(&mut writer, columns)
            .map_err(|source| self.write_error(source))?;
        let written = self
            .write_rows(&mut writer, table, columns)
            .map_err(|source| self.write_error(source))?;
        writer.flush().map_err(|source| self.write_error(source))?;
        Ok(written)
    }

    fn write_error(&self, source: std::io::Error) -> CoreError {
        CoreError::FileWrite {
            path: self.path.clone(),
            source,
        }
    }
}

impl StorageBackend for FileBackend {
    fn store_columns(&mut self, table: &SparseTable, columns: &[String]) -> Result<(), CoreError> {
        match self.rewrite(table, columns) {
            Ok(written) => {
                info!(path = %self.path.display(), rows = written, "Stored table to CSV");
                Ok(())
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Could not write CSV file");
                Err(e)
            }
        }
    }

    fn delete_rows(&mut self, rows: &[String]) -> Result<(), CoreError> {
        let Some(mut loaded) = self.load()? else {
            return Ok(());
        };
        if loaded.table.retain_rows(|row| !rows.contains(row)) == 0 {
            return Ok(());
        }
        debug!(path = %self.path.display(), rows = ?rows, "Deleting rows from CSV");
        self.store_columns(&loaded.table, &loaded.columns)
    }

    fn load(&mut self) -> Result<Option<LoadedTable>, CoreError> {
        let Some(mut records) = self.read_records()? else {
            debug!(path = %self.path.display(), "No CSV data yet");
            return Ok(None);
        };

        let mut header = records.remove(0);
        let id_column = header.remove(0);
        if id_column != self.row_key {
            debug!(
                path = %self.path.display(),
                expected = %self.row_key,
                found = %id_column,
                "Unexpected row-id column name, using first column as row id"
            );
        }

        let mut table = SparseTable::new();
        for mut record in records {
            if record.is_empty() {
                continue;
            }
            let entry = record.remove(0);
            // A later row for the same id replaces the earlier one
            table.remove_row(entry.as_str());
            for (column, value) in header.iter().zip(record) {
                if !value.is_empty() {
                    table.put(entry.clone(), column.clone(), value);
                }
            }
        }

        info!(
            path = %self.path.display(),
            rows = table.row_count(),
            "Loaded table from CSV"
        );
        Ok(Some(LoadedTable {
            columns: header,
            table,
        }))
    }

    fn close(&mut self) {
        // No handle is held between calls
    }

    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn status(&mut self) -> BackendStatus {
        BackendStatus::File {
            path: self.path.clone(),
            exists: self.path.is_file(),
        }
    }
}

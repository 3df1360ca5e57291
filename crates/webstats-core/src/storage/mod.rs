//! Persistent storage backends
//!
//! Every backend persists a whole row-id × column → value table and reads it
//! back in one go. There is no per-cell access: callers keep the canonical
//! copy in memory and hand the complete table to `store`.
//!
//! Backends do blocking I/O. Call them from `spawn_blocking` (or another
//! thread that is not the host thread).

mod csv;
pub mod database;
pub mod file;

pub use database::{DatabaseBackend, DatabaseConnection};
pub use file::FileBackend;

use crate::error::CoreError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use webstats_types::SparseTable;

/// Result of a full backend read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedTable {
    /// Columns known to the backend, in stored order where the backend has one
    pub columns: Vec<String>,
    pub table: SparseTable,
}

/// Connectivity summary shown in the operator debug dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    File { path: PathBuf, exists: bool },
    Database { path: PathBuf, connected: bool },
    Closed,
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendStatus::File { path, exists } => write!(
                f,
                "csv file {} ({})",
                path.display(),
                if *exists { "present" } else { "not yet written" }
            ),
            BackendStatus::Database { path, connected } => write!(
                f,
                "database {} ({})",
                path.display(),
                if *connected { "connected" } else { "disconnected" }
            ),
            BackendStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Contract shared by all persistence implementations
///
/// What a store replaces differs per backend:
/// - file: the whole file is rewritten, so rows and columns missing from
///   the incoming table are gone afterwards.
/// - database: cells of columns not in the column list are deleted, every
///   incoming cell is upserted, and rows missing from the incoming table
///   keep their stored cells. Use `delete_rows` to forget rows.
pub trait StorageBackend: Send {
    /// Store `table`, with the columns present in it as the column list
    fn store(&mut self, table: &SparseTable) -> Result<(), CoreError> {
        let columns: Vec<String> = table.columns().into_iter().collect();
        self.store_columns(table, &columns)
    }

    /// Store `table` restricted to `columns`
    ///
    /// The file backend writes exactly these columns in this order.
    fn store_columns(&mut self, table: &SparseTable, columns: &[String]) -> Result<(), CoreError>;

    /// Remove every stored cell of `rows`; unknown rows are ignored
    fn delete_rows(&mut self, rows: &[String]) -> Result<(), CoreError>;

    /// Read everything; `Ok(None)` means nothing has been stored yet
    fn load(&mut self) -> Result<Option<LoadedTable>, CoreError>;

    /// Release held handles. The backend must not be used afterwards.
    fn close(&mut self);

    fn kind(&self) -> BackendKind;

    fn status(&mut self) -> BackendStatus;
}

/// Closed set of backend implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    File,
    Database,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::File => "csv",
            BackendKind::Database => "database",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" | "file" => Ok(BackendKind::File),
            "database" | "db" | "sqlite" => Ok(BackendKind::Database),
            _ => Err(CoreError::UnknownBackend { name: s.to_string() }),
        }
    }
}

/// Everything needed to construct either backend for one dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    /// Directory holding CSV files
    pub data_dir: PathBuf,
    /// CSV file name inside `data_dir`
    pub file_name: String,
    /// SQLite database file, `None` when no database is configured
    pub database_path: Option<PathBuf>,
    /// Configuration key that holds `database_path`, reported on failure
    pub database_field: &'static str,
    pub table_name: String,
    /// Name of the row-id column (CSV header, database row key)
    pub row_key: String,
    /// Name of the database column key
    pub column_key: String,
}

/// Construct and validate a backend of the requested kind
pub fn open_backend(
    kind: BackendKind,
    settings: &StorageSettings,
) -> Result<Box<dyn StorageBackend>, CoreError> {
    match kind {
        BackendKind::File => {
            open_file_backend(settings).map(|b| Box::new(b) as Box<dyn StorageBackend>)
        }
        BackendKind::Database => {
            open_database_backend(settings).map(|b| Box::new(b) as Box<dyn StorageBackend>)
        }
    }
}

pub fn open_file_backend(settings: &StorageSettings) -> Result<FileBackend, CoreError> {
    FileBackend::new(
        settings.data_dir.join(&settings.file_name),
        settings.row_key.clone(),
    )
}

pub fn open_database_backend(settings: &StorageSettings) -> Result<DatabaseBackend, CoreError> {
    let path = settings.database_path.clone().ok_or_else(|| {
        CoreError::invalid_config(
            settings.database_field,
            "no database configured to store placeholders in",
        )
    })?;
    let conn = DatabaseConnection::new(path, settings.database_field);
    DatabaseBackend::new(
        conn,
        settings.table_name.clone(),
        settings.row_key.clone(),
        settings.column_key.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &std::path::Path) -> StorageSettings {
        StorageSettings {
            data_dir: dir.to_path_buf(),
            file_name: "placeholders.csv".into(),
            database_path: None,
            database_field: "store-placeholders-database",
            table_name: "WebStats_placeholders".into(),
            row_key: "uuid".into(),
            column_key: "placeholder".into(),
        }
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("CSV".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert_eq!(
            "database".parse::<BackendKind>().unwrap(),
            BackendKind::Database
        );
        assert!(matches!(
            "redis".parse::<BackendKind>(),
            Err(CoreError::UnknownBackend { .. })
        ));
    }

    #[test]
    fn test_open_database_without_path_names_field() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_backend(BackendKind::Database, &settings(dir.path())).err().unwrap();
        assert_eq!(err.config_field(), Some("store-placeholders-database"));
    }

    #[test]
    fn test_open_file_backend_kind() {
        let dir = tempfile::tempdir().unwrap();
        let backend = open_backend(BackendKind::File, &settings(dir.path())).unwrap();
        assert_eq!(backend.kind(), BackendKind::File);
    }

    #[test]
    fn test_default_store_writes_all_columns() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = open_file_backend(&settings(dir.path())).unwrap();

        let mut table = SparseTable::new();
        table.put("a".to_string(), "Y", "2");
        table.put("b".to_string(), "X", "1");
        backend.store(&table).unwrap();

        let loaded = backend.load().unwrap().unwrap();
        assert_eq!(loaded.columns, vec!["X", "Y"]);
        assert_eq!(loaded.table, table);
    }

    #[test]
    fn test_both_backends_delete_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.database_path = Some(dir.path().join("webstats.db"));

        for kind in [BackendKind::File, BackendKind::Database] {
            let mut backend = open_backend(kind, &settings).unwrap();
            let mut table = SparseTable::new();
            table.put("a".to_string(), "X", "1");
            table.put("b".to_string(), "X", "2");
            backend.store(&table).unwrap();

            backend.delete_rows(&["a".to_string(), "zzz".to_string()]).unwrap();

            let loaded = backend.load().unwrap().unwrap();
            assert!(!loaded.table.contains_row("a"), "{} kept a deleted row", kind);
            assert_eq!(loaded.table.get("b", "X"), Some("2"));
        }
    }
}

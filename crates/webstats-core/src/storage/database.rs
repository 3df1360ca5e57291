//! SQLite backend storing one `(row_key, column_key, value)` triple per cell
//!
//! Schema (created on first use):
//! - `<row_key> VARCHAR(36) NOT NULL`
//! - `<column_key> VARCHAR(255) NOT NULL`
//! - `value VARCHAR(255)`
//! - primary key `(<row_key>, <column_key>)`
//!
//! A store first deletes every cell whose column is not in the stored column
//! list, then upserts all incoming cells, inside one transaction. Rows are
//! never removed by a store, only by `delete_rows`.

use super::{BackendKind, BackendStatus, LoadedTable, StorageBackend};
use crate::error::CoreError;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use webstats_types::SparseTable;

/// Lazily (re)connecting handle to one SQLite database file
pub struct DatabaseConnection {
    path: PathBuf,
    /// Configuration key naming `path`, reported when connecting fails
    field: &'static str,
    conn: Option<Connection>,
}

impl DatabaseConnection {
    pub fn new(path: PathBuf, field: &'static str) -> Self {
        Self {
            path,
            field,
            conn: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh connection, dropping any previous one
    pub fn connect(&mut self) -> Result<(), CoreError> {
        self.disconnect_quietly();

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags)
            .and_then(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
                Ok(conn)
            })
            .map_err(|source| {
                warn!(path = %self.path.display(), error = %source, "Could not connect to database");
                CoreError::DatabaseConnect {
                    path: self.path.clone(),
                    field: self.field,
                    source,
                }
            })?;

        self.conn = Some(conn);
        info!(path = %self.path.display(), "Connected to database");
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.conn.is_some() {
            self.disconnect_quietly();
            info!(path = %self.path.display(), "Disconnected from database");
        }
    }

    fn disconnect_quietly(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, e)) = conn.close() {
                warn!(path = %self.path.display(), error = %e, "Could not close database connection");
            }
        }
    }

    /// Whether a connection is open and answers a trivial query
    pub fn is_connected(&self) -> bool {
        self.conn.as_ref().is_some_and(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok()
        })
    }

    /// Current connection, reconnecting first if it is missing or dead
    pub fn connection(&mut self) -> Result<&mut Connection, CoreError> {
        if !self.is_connected() {
            if self.conn.is_some() {
                debug!(path = %self.path.display(), "Database connection lost, reconnecting");
            }
            self.connect()?;
        }
        self.conn.as_mut().ok_or(CoreError::DatabaseConnect {
            path: self.path.clone(),
            field: self.field,
            source: rusqlite::Error::InvalidQuery,
        })
    }
}

pub struct DatabaseBackend {
    conn: DatabaseConnection,
    table: String,
    row_key: String,
    column_key: String,
    table_ready: bool,
}

impl DatabaseBackend {
    /// Connect and make sure the table exists
    pub fn new(
        conn: DatabaseConnection,
        table: String,
        row_key: String,
        column_key: String,
    ) -> Result<Self, CoreError> {
        for (field, name) in [("table", &table), ("row key", &row_key), ("column key", &column_key)]
        {
            if !is_identifier(name) {
                return Err(CoreError::invalid_config(
                    field,
                    format!("'{}' is not a valid SQL identifier", name),
                ));
            }
        }

        let mut backend = Self {
            conn,
            table,
            row_key,
            column_key,
            table_ready: false,
        };
        backend.conn.connect()?;
        backend.ensure_table()?;
        Ok(backend)
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    fn error_mapper(&self) -> impl Fn(rusqlite::Error) -> CoreError {
        let path = self.conn.path().to_path_buf();
        let table = self.table.clone();
        move |source| CoreError::Database {
            path: path.clone(),
            table: table.clone(),
            source,
        }
    }

    fn ensure_table(&mut self) -> Result<(), CoreError> {
        if self.table_ready {
            return Ok(());
        }

        let to_error = self.error_mapper();
        let create_sql = format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                {r} VARCHAR(36) NOT NULL,
                {c} VARCHAR(255) NOT NULL,
                value VARCHAR(255),
                PRIMARY KEY ({r}, {c})
            );",
            t = self.table,
            r = self.row_key,
            c = self.column_key,
        );

        let conn = self.conn.connection()?;
        let exists = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![self.table],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(&to_error)?
            .is_some();

        if !exists {
            conn.execute_batch(&create_sql).map_err(&to_error)?;
            info!(path = %self.conn.path().display(), table = %self.table, "Created new table");
        }

        self.table_ready = true;
        Ok(())
    }

    fn store_inner(&mut self, data: &SparseTable, columns: &[String]) -> Result<usize, CoreError> {
        let delete_sql = format!(
            "DELETE FROM {} WHERE {} NOT IN ({})",
            self.table,
            self.column_key,
            vec!["?"; columns.len()].join(", ")
        );
        let upsert_sql = format!(
            "INSERT OR REPLACE INTO {} ({}, {}, value) VALUES (?1, ?2, ?3)",
            self.table, self.row_key, self.column_key
        );
        let to_error = self.error_mapper();

        let conn = self.conn.connection()?;
        let tx = conn.transaction().map_err(&to_error)?;

        // Don't try to remove 0 columns
        if !columns.is_empty() {
            let removed = tx
                .execute(&delete_sql, params_from_iter(columns.iter()))
                .map_err(&to_error)?;
            if removed > 0 {
                debug!(removed, "Removed cells of retired columns");
            }
        }

        let mut written = 0;
        {
            let mut stmt = tx.prepare(&upsert_sql).map_err(&to_error)?;
            for (row, column, value) in data.cells() {
                stmt.execute(params![row, column, value]).map_err(&to_error)?;
                debug!(row = %row, column, value, "Saving cell");
                written += 1;
            }
        }
        tx.commit().map_err(&to_error)?;
        Ok(written)
    }

    fn load_inner(&mut self) -> Result<(SparseTable, BTreeSet<String>), CoreError> {
        let sql = format!(
            "SELECT {}, {}, value FROM {}",
            self.row_key, self.column_key, self.table
        );
        let to_error = self.error_mapper();

        let conn = self.conn.connection()?;
        let mut stmt = conn.prepare(&sql).map_err(&to_error)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(&to_error)?;

        let mut table = SparseTable::new();
        let mut columns = BTreeSet::new();
        for row in rows {
            let (entry, column, value) = row.map_err(&to_error)?;
            columns.insert(column.clone());
            if let Some(value) = value {
                table.put(entry, column, value);
            }
        }
        Ok((table, columns))
    }

    fn delete_inner(&mut self, rows: &[String]) -> Result<usize, CoreError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            self.table,
            self.row_key,
            vec!["?"; rows.len()].join(", ")
        );
        let to_error = self.error_mapper();

        let conn = self.conn.connection()?;
        conn.execute(&sql, params_from_iter(rows.iter()))
            .map_err(to_error)
    }
}

impl StorageBackend for DatabaseBackend {
    fn store_columns(&mut self, table: &SparseTable, columns: &[String]) -> Result<(), CoreError> {
        let result = self
            .ensure_table()
            .and_then(|()| self.store_inner(table, columns));
        match result {
            Ok(written) => {
                info!(
                    path = %self.conn.path().display(),
                    table = %self.table,
                    cells = written,
                    "Stored table to database"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    path = %self.conn.path().display(),
                    table = %self.table,
                    error = %e,
                    "Could not update database"
                );
                Err(e)
            }
        }
    }

    fn delete_rows(&mut self, rows: &[String]) -> Result<(), CoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        self.ensure_table()?;
        let removed = self.delete_inner(rows)?;
        info!(
            path = %self.conn.path().display(),
            table = %self.table,
            rows = ?rows,
            cells = removed,
            "Deleted rows from database"
        );
        Ok(())
    }

    fn load(&mut self) -> Result<Option<LoadedTable>, CoreError> {
        let result = self.ensure_table().and_then(|()| self.load_inner());
        match result {
            Ok((table, columns)) => {
                info!(
                    path = %self.conn.path().display(),
                    table = %self.table,
                    cells = table.len(),
                    "Loaded table from database"
                );
                Ok(Some(LoadedTable {
                    columns: columns.into_iter().collect(),
                    table,
                }))
            }
            Err(e) => {
                error!(
                    path = %self.conn.path().display(),
                    table = %self.table,
                    error = %e,
                    "Could not query database"
                );
                Err(e)
            }
        }
    }

    fn close(&mut self) {
        self.conn.disconnect();
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Database
    }

    fn status(&mut self) -> BackendStatus {
        BackendStatus::Database {
            path: self.conn.path().to_path_buf(),
            connected: self.conn.is_connected(),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(path: &Path) -> DatabaseBackend {
        DatabaseBackend::new(
            DatabaseConnection::new(path.to_path_buf(), "store-placeholders-database"),
            "WebStats_placeholders".into(),
            "uuid".into(),
            "placeholder".into(),
        )
        .unwrap()
    }

    fn table(cells: &[(&str, &str, &str)]) -> SparseTable {
        cells
            .iter()
            .map(|(r, c, v)| (r.to_string(), c.to_string(), v.to_string()))
            .collect()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_table_created_on_first_use() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("webstats.db");
        let _backend = open(&path);

        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'WebStats_placeholders'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_store_then_load_round_trip() {
        let dir = tempdir().unwrap();
        let mut backend = open(&dir.path().join("webstats.db"));

        let data = table(&[("a", "X", "1"), ("a", "Y", "0"), ("b", "X", "7")]);
        backend.store(&data).unwrap();

        let loaded = backend.load().unwrap().unwrap();
        assert_eq!(loaded.table, data);
        assert_eq!(loaded.columns, cols(&["X", "Y"]));
    }

    #[test]
    fn test_store_upserts_existing_cells() {
        let dir = tempdir().unwrap();
        let mut backend = open(&dir.path().join("webstats.db"));

        backend.store(&table(&[("a", "X", "1"), ("b", "X", "2")])).unwrap();
        backend.store(&table(&[("a", "X", "5")])).unwrap();

        let loaded = backend.load().unwrap().unwrap();
        assert_eq!(loaded.table.get("a", "X"), Some("5"));
        // Rows missing from the incoming table are not deleted
        assert_eq!(loaded.table.get("b", "X"), Some("2"));
    }

    #[test]
    fn test_store_prunes_unlisted_columns() {
        let dir = tempdir().unwrap();
        let mut backend = open(&dir.path().join("webstats.db"));

        backend
            .store(&table(&[("a", "X", "1"), ("a", "Y", "2"), ("b", "Y", "3")]))
            .unwrap();
        backend
            .store_columns(&table(&[("a", "X", "4")]), &cols(&["X"]))
            .unwrap();

        let loaded = backend.load().unwrap().unwrap();
        assert_eq!(loaded.columns, cols(&["X"]));
        assert_eq!(loaded.table, table(&[("a", "X", "4")]));
    }

    #[test]
    fn test_reconnects_after_disconnect() {
        let dir = tempdir().unwrap();
        let mut backend = open(&dir.path().join("webstats.db"));
        backend.store(&table(&[("a", "X", "1")])).unwrap();

        backend.close();
        assert!(matches!(
            backend.status(),
            BackendStatus::Database { connected: false, .. }
        ));

        let loaded = backend.load().unwrap().unwrap();
        assert_eq!(loaded.table.get("a", "X"), Some("1"));
        assert!(matches!(
            backend.status(),
            BackendStatus::Database { connected: true, .. }
        ));
    }

    #[test]
    fn test_unreachable_path_fails_with_field() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("webstats.db");
        let result = DatabaseBackend::new(
            DatabaseConnection::new(path, "store-placeholders-database"),
            "WebStats_placeholders".into(),
            "uuid".into(),
            "placeholder".into(),
        );

        let err = result.err().unwrap();
        assert!(matches!(err, CoreError::DatabaseConnect { .. }));
        assert_eq!(err.config_field(), Some("store-placeholders-database"));
    }

    #[test]
    fn test_delete_rows_removes_every_cell_of_row() {
        let dir = tempdir().unwrap();
        let mut backend = open(&dir.path().join("webstats.db"));
        backend
            .store(&table(&[("a", "X", "1"), ("a", "Y", "2"), ("b", "X", "3")]))
            .unwrap();

        backend.delete_rows(&cols(&["a"])).unwrap();
        // A later store without the row does not bring it back
        backend.store(&table(&[("b", "X", "4")])).unwrap();

        let loaded = backend.load().unwrap().unwrap();
        assert_eq!(loaded.table, table(&[("b", "X", "4")]));
    }

    #[test]
    fn test_lost_database_reports_connect_error() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("db");
        std::fs::create_dir(&sub).unwrap();
        let mut backend = open(&sub.join("webstats.db"));
        backend.store(&table(&[("a", "X", "1")])).unwrap();

        backend.close();
        std::fs::remove_dir_all(&sub).unwrap();

        let err = backend.store(&table(&[("a", "X", "2")])).err().unwrap();
        assert!(matches!(err, CoreError::DatabaseConnect { .. }));
        assert_eq!(err.config_field(), Some("store-placeholders-database"));
        assert!(matches!(backend.load(), Err(CoreError::DatabaseConnect { .. })));
    }

    #[test]
    fn test_rejects_bad_identifiers() {
        let dir = tempdir().unwrap();
        let result = DatabaseBackend::new(
            DatabaseConnection::new(dir.path().join("x.db"), "store-placeholders-database"),
            "drop table; --".into(),
            "uuid".into(),
            "placeholder".into(),
        );
        assert!(matches!(result, Err(CoreError::InvalidConfig { .. })));
    }

    #[test]
    fn test_identifier_check() {
        assert!(is_identifier("WebStats_placeholders"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a-b"));
    }
}

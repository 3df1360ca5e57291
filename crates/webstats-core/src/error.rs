//! Error types for webstats-core
//!
//! One error hierarchy built with thiserror. Storage failures during normal
//! operation are logged and degrade to "empty" or "not saved"; only
//! initialization failures are surfaced to the operator.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for webstats operations
#[derive(Error, Debug)]
pub enum CoreError {
    // ===================
    // IO Errors
    // ===================
    #[error("Failed to read file: {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not a regular file: {path} (remove or rename it)")]
    NotAFile { path: PathBuf },

    // ===================
    // Parse Errors
    // ===================
    #[error("Malformed CSV in {path} at line {line_number}: {message}")]
    CsvParse {
        path: PathBuf,
        line_number: usize,
        message: String,
    },

    #[error("Failed to parse JSON in {path}: {message}")]
    JsonParse {
        path: PathBuf,
        message: String,
        #[source]
        source: serde_json::Error,
    },

    // ===================
    // Database Errors
    // ===================
    #[error("Could not connect to database {path}")]
    DatabaseConnect {
        path: PathBuf,
        /// Configuration key holding the database location
        field: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Database query failed on {table} in {path}")]
    Database {
        path: PathBuf,
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    // ===================
    // Config Errors
    // ===================
    #[error("Invalid configuration for '{field}': {message}")]
    InvalidConfig { field: String, message: String },

    #[error("Unknown storage backend '{name}' (expected 'csv' or 'database')")]
    UnknownBackend { name: String },

    // ===================
    // Host / Task Errors
    // ===================
    #[error("Host thread is not running")]
    HostUnavailable,

    #[error("Background task failed: {message}")]
    Task { message: String },

    #[error("Stats source '{source_name}' failed: {message}")]
    Source {
        source_name: &'static str,
        message: String,
    },
}

impl CoreError {
    /// Configuration key the operator should look at, if this error stems from one
    pub fn config_field(&self) -> Option<&str> {
        match self {
            CoreError::DatabaseConnect { field, .. } => Some(*field),
            CoreError::InvalidConfig { field, .. } => Some(field.as_str()),
            _ => None,
        }
    }

    pub(crate) fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<tokio::task::JoinError> for CoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        CoreError::Task {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_field_for_database_connect() {
        let err = CoreError::DatabaseConnect {
            path: PathBuf::from("/nope/webstats.db"),
            field: "store-placeholders-database",
            source: rusqlite::Error::InvalidQuery,
        };
        assert_eq!(err.config_field(), Some("store-placeholders-database"));
        assert!(err.to_string().contains("/nope/webstats.db"));
    }

    #[test]
    fn test_config_field_absent_for_io() {
        let err = CoreError::NotAFile {
            path: PathBuf::from("placeholders.csv"),
        };
        assert_eq!(err.config_field(), None);
    }
}

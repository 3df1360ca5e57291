//! Configuration loading
//!
//! The configuration lives in `config.json` in the data directory. It is read
//! once at startup and resolved into a [`Config`]; nothing re-reads it later.
//!
//! Placeholder cache backend precedence:
//! 1. `store-placeholders-in-file: true` selects the CSV file
//! 2. otherwise `store-placeholders-database` selects the SQLite database
//! 3. otherwise placeholder values are not cached at all

use crate::error::CoreError;
use crate::storage::{BackendKind, StorageSettings};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const PLACEHOLDER_FILE_NAME: &str = "placeholders.csv";
pub const PLACEHOLDER_TABLE_NAME: &str = "WebStats_placeholders";
pub const DATABASE_FIELD: &str = "store-placeholders-database";

/// Stand-in for `.` in placeholder keys, for config formats that split keys on dots
const DOT_REPLACEMENT: &str = "[dot]";
const DEFAULT_PLUGIN_DISABLE_WINDOW_SECS: u64 = 30;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
struct RawConfig {
    placeholders: Option<Value>,
    server_columns: Vec<String>,
    objectives: Option<Vec<Value>>,
    store_placeholders_in_file: bool,
    store_placeholders_database: Option<String>,
    save_placeholders_on_plugin_disable: bool,
    plugin_disable_window_secs: Option<u64>,
    export_columns: Option<Vec<String>>,
}

/// Resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Placeholder source settings; `None` disables the source
    pub placeholders: Option<PlaceholderSettings>,
    /// Scoreboard objectives filter; `None` disables the scoreboard source
    pub objectives: Option<Vec<String>>,
    /// Columns that hold one server-wide value instead of per-player values
    pub server_columns: BTreeSet<String>,
    /// Column order for a fresh `stats.csv`; defaults to the snapshot's columns
    pub export_columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderSettings {
    /// Raw placeholder token → output column name
    pub placeholders: BTreeMap<String, String>,
    pub server_columns: BTreeSet<String>,
    /// Cache backend at startup; `None` means values are never cached
    pub backend: Option<BackendKind>,
    pub storage: StorageSettings,
    /// Save everything early whenever another plugin is disabled
    pub save_on_plugin_disable: bool,
    /// Shutdown signals closer together than this count as one
    pub plugin_disable_window: Duration,
}

impl PlaceholderSettings {
    pub fn new(placeholders: BTreeMap<String, String>, storage: StorageSettings) -> Self {
        Self {
            placeholders,
            server_columns: BTreeSet::new(),
            backend: None,
            storage,
            save_on_plugin_disable: false,
            plugin_disable_window: Duration::from_secs(DEFAULT_PLUGIN_DISABLE_WINDOW_SECS),
        }
    }

    /// Every configured output column
    pub fn columns(&self) -> BTreeSet<String> {
        self.placeholders.values().cloned().collect()
    }

    pub fn is_server_column(&self, column: &str) -> bool {
        self.server_columns.contains(column)
    }

    /// Configured placeholders evaluated per player
    pub fn player_placeholders(&self) -> impl Iterator<Item = (&str, &str)> {
        self.placeholders
            .iter()
            .filter(|(_, column)| !self.is_server_column(column))
            .map(|(token, column)| (token.as_str(), column.as_str()))
    }

    /// Configured placeholders evaluated once for the whole server
    pub fn server_placeholders(&self) -> impl Iterator<Item = (&str, &str)> {
        self.placeholders
            .iter()
            .filter(|(_, column)| self.is_server_column(column))
            .map(|(token, column)| (token.as_str(), column.as_str()))
    }
}

/// Default storage layout for the placeholder cache in `data_dir`
pub fn placeholder_storage(data_dir: &Path, database_path: Option<PathBuf>) -> StorageSettings {
    StorageSettings {
        data_dir: data_dir.to_path_buf(),
        file_name: PLACEHOLDER_FILE_NAME.to_string(),
        database_path,
        database_field: DATABASE_FIELD,
        table_name: PLACEHOLDER_TABLE_NAME.to_string(),
        row_key: "uuid".to_string(),
        column_key: "placeholder".to_string(),
    }
}

impl Config {
    /// Read `path` and resolve it against `data_dir`
    pub async fn load(path: &Path, data_dir: &Path) -> Result<Self, CoreError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| CoreError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::parse(&content, path, data_dir)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse configuration text; `path` is only used in error messages
    pub fn parse(content: &str, path: &Path, data_dir: &Path) -> Result<Self, CoreError> {
        let raw: RawConfig =
            serde_json::from_str(content).map_err(|source| CoreError::JsonParse {
                path: path.to_path_buf(),
                message: source.to_string(),
                source,
            })?;
        Self::resolve(raw, data_dir)
    }

    fn resolve(raw: RawConfig, data_dir: &Path) -> Result<Self, CoreError> {
        let server_columns: BTreeSet<String> = raw.server_columns.into_iter().collect();

        let placeholders = match raw.placeholders {
            None => None,
            Some(Value::Object(map)) => {
                let database_path = raw
                    .store_placeholders_database
                    .as_deref()
                    .map(|name| resolve_path(data_dir, name));
                let backend = if raw.store_placeholders_in_file {
                    Some(BackendKind::File)
                } else if database_path.is_some() {
                    Some(BackendKind::Database)
                } else {
                    None
                };

                Some(PlaceholderSettings {
                    placeholders: sanitize_placeholders(map),
                    server_columns: server_columns.clone(),
                    backend,
                    storage: placeholder_storage(data_dir, database_path),
                    save_on_plugin_disable: raw.save_placeholders_on_plugin_disable,
                    plugin_disable_window: Duration::from_secs(
                        raw.plugin_disable_window_secs
                            .unwrap_or(DEFAULT_PLUGIN_DISABLE_WINDOW_SECS),
                    ),
                })
            }
            Some(_) => {
                return Err(CoreError::invalid_config(
                    "placeholders",
                    "should be a key-value map",
                ))
            }
        };

        let objectives = raw.objectives.map(|values| {
            values
                .into_iter()
                .filter_map(|value| match value {
                    Value::String(name) => Some(name),
                    other => {
                        warn!(value = %other, "Ignoring objective that is not a name");
                        None
                    }
                })
                .collect()
        });

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            placeholders,
            objectives,
            server_columns,
            export_columns: raw.export_columns,
        })
    }
}

/// Keep string values only and turn `[dot]` in keys back into `.`
fn sanitize_placeholders(map: serde_json::Map<String, Value>) -> BTreeMap<String, String> {
    map.into_iter()
        .filter_map(|(token, column)| match column {
            Value::String(column) => Some((token.replace(DOT_REPLACEMENT, "."), column)),
            _ => {
                warn!(placeholder = %token, "Ignoring placeholder with a non-string column name");
                None
            }
        })
        .collect()
}

fn resolve_path(data_dir: &Path, name: &str) -> PathBuf {
    let path = Path::new(name);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Config, CoreError> {
        Config::parse(json, Path::new("config.json"), Path::new("/srv/webstats"))
    }

    #[test]
    fn test_empty_config_disables_sources() {
        let config = parse("{}").unwrap();
        assert!(config.placeholders.is_none());
        assert!(config.objectives.is_none());
        assert!(config.server_columns.is_empty());
    }

    #[test]
    fn test_placeholders_are_sanitized() {
        let config = parse(
            r#"{
                "placeholders": {
                    "%statistic_player_kills%": "Kills",
                    "%server[dot]tps%": "TPS",
                    "%broken%": 42
                },
                "server-columns": ["TPS"]
            }"#,
        )
        .unwrap();

        let placeholders = config.placeholders.unwrap();
        assert_eq!(placeholders.placeholders.len(), 2);
        assert_eq!(placeholders.placeholders["%server.tps%"], "TPS");
        assert!(placeholders.is_server_column("TPS"));

        let server: Vec<_> = placeholders.server_placeholders().collect();
        assert_eq!(server, vec![("%server.tps%", "TPS")]);
        let player: Vec<_> = placeholders.player_placeholders().collect();
        assert_eq!(player, vec![("%statistic_player_kills%", "Kills")]);
    }

    #[test]
    fn test_backend_precedence() {
        let file = parse(
            r#"{"placeholders": {}, "store-placeholders-in-file": true,
                "store-placeholders-database": "webstats.db"}"#,
        )
        .unwrap();
        assert_eq!(file.placeholders.unwrap().backend, Some(BackendKind::File));

        let db = parse(r#"{"placeholders": {}, "store-placeholders-database": "webstats.db"}"#)
            .unwrap();
        let db = db.placeholders.unwrap();
        assert_eq!(db.backend, Some(BackendKind::Database));
        assert_eq!(
            db.storage.database_path,
            Some(PathBuf::from("/srv/webstats/webstats.db"))
        );

        let none = parse(r#"{"placeholders": {}}"#).unwrap();
        assert_eq!(none.placeholders.unwrap().backend, None);
    }

    #[test]
    fn test_shutdown_signal_window() {
        let default = parse(r#"{"placeholders": {}}"#).unwrap();
        assert_eq!(
            default.placeholders.unwrap().plugin_disable_window,
            Duration::from_secs(30)
        );

        let custom = parse(
            r#"{"placeholders": {}, "save-placeholders-on-plugin-disable": true,
                "plugin-disable-window-secs": 5}"#,
        )
        .unwrap();
        let custom = custom.placeholders.unwrap();
        assert!(custom.save_on_plugin_disable);
        assert_eq!(custom.plugin_disable_window, Duration::from_secs(5));
    }

    #[test]
    fn test_objectives_keep_names_only() {
        let config = parse(r#"{"objectives": ["kills", {"deaths": "Deaths"}, "*"]}"#).unwrap();
        assert_eq!(config.objectives.unwrap(), vec!["kills", "*"]);
    }

    #[test]
    fn test_placeholders_must_be_a_map() {
        let err = parse(r#"{"placeholders": ["%kills%"]}"#).unwrap_err();
        assert_eq!(err.config_field(), Some("placeholders"));
    }

    #[test]
    fn test_malformed_json() {
        let err = parse("{ not json").unwrap_err();
        assert!(matches!(err, CoreError::JsonParse { .. }));
    }

    #[tokio::test]
    async fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(&path, r#"{"placeholders": {"%k%": "Kills"}}"#)
            .await
            .unwrap();

        let config = Config::load(&path, dir.path()).await.unwrap();
        let placeholders = config.placeholders.unwrap();
        assert_eq!(placeholders.columns(), BTreeSet::from(["Kills".to_string()]));
        assert_eq!(placeholders.storage.data_dir, dir.path());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("nope.json"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::FileRead { .. }));
    }
}

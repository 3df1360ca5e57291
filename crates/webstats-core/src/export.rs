//! Periodic export of merged stats to `stats.csv`
//!
//! Every export appends one row per entry that changed since its last
//! exported row. Rows carry two computed columns: `timestamp` (seconds since
//! the Unix epoch, UTC) and `date` (`YYYY-MM-DD`, local time zone).

use crate::error::CoreError;
use crate::storage::FileBackend;
use crate::storage::StorageBackend;
use chrono::{Local, Utc};
use std::path::Path;
use tracing::{info, warn};
use webstats_types::{EntriesScores, SparseTable};

pub const EXPORT_FILE_NAME: &str = "stats.csv";
pub const EXPORT_ROW_KEY: &str = "Player";
pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const DATE_COLUMN: &str = "date";

pub struct StatExporter {
    backend: FileBackend,
    /// Stat columns for a fresh file; the snapshot's columns when `None`
    columns: Option<Vec<String>>,
}

impl StatExporter {
    pub fn new(data_dir: &Path, columns: Option<Vec<String>>) -> Result<Self, CoreError> {
        let backend = FileBackend::new(data_dir.join(EXPORT_FILE_NAME), EXPORT_ROW_KEY)?
            .with_mapper(TIMESTAMP_COLUMN, |_| Some(Utc::now().timestamp().to_string()))
            .with_mapper(DATE_COLUMN, |_| Some(Local::now().format("%Y-%m-%d").to_string()));
        Ok(Self { backend, columns })
    }

    pub fn path(&self) -> &Path {
        self.backend.path()
    }

    /// Append changed entries; returns how many entries were written
    ///
    /// Blocking file I/O.
    pub fn export(&mut self, stats: &EntriesScores) -> Result<usize, CoreError> {
        let changed = self.filter_changed(&stats.scores);

        let mut columns = vec![TIMESTAMP_COLUMN.to_string(), DATE_COLUMN.to_string()];
        match &self.columns {
            Some(configured) => columns.extend(configured.iter().cloned()),
            None => columns.extend(stats.scores.columns()),
        }

        let rows = changed.row_count();
        self.backend.append(&changed, &columns)?;
        info!(path = %self.backend.path().display(), rows, "Export finished");
        Ok(rows)
    }

    /// Drop entries whose stored columns all equal their last exported row
    ///
    /// Computed columns are not compared. Absent and empty cells are equal.
    pub fn filter_changed(&mut self, scores: &SparseTable) -> SparseTable {
        let last = match self.backend.load() {
            Ok(Some(last)) => last,
            Ok(None) => return scores.clone(),
            Err(e) => {
                warn!(error = %e, "Could not read previous export, exporting everything");
                return scores.clone();
            }
        };

        let compared: Vec<String> = scores
            .columns()
            .into_iter()
            .filter(|column| last.columns.contains(column))
            .collect();

        let mut changed = scores.clone();
        changed.retain_rows(|entry| {
            compared.iter().any(|column| {
                scores.get(entry, column).unwrap_or("")
                    != last.table.get(entry, column).unwrap_or("")
            })
        });
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn stats(cells: &[(&str, &str, &str)]) -> EntriesScores {
        let scores: SparseTable = cells
            .iter()
            .map(|(r, c, v)| (r.to_string(), c.to_string(), v.to_string()))
            .collect();
        let entries: BTreeSet<String> = scores.row_keys().cloned().collect();
        EntriesScores::new(entries, scores)
    }

    #[test]
    fn test_first_export_writes_header_and_all_rows() {
        let dir = tempdir().unwrap();
        let mut exporter = StatExporter::new(dir.path(), None).unwrap();

        let written = exporter
            .export(&stats(&[("Alice", "Kills", "3"), ("Bob", "Deaths", "1")]))
            .unwrap();
        assert_eq!(written, 2);

        let content = std::fs::read_to_string(exporter.path()).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("Player,timestamp,date,Deaths,Kills"));
        let alice = lines.next().unwrap();
        assert!(alice.starts_with("Alice,"));
        assert!(alice.ends_with(",,3"));
    }

    #[test]
    fn test_unchanged_entries_are_skipped() {
        let dir = tempdir().unwrap();
        let mut exporter = StatExporter::new(dir.path(), None).unwrap();

        exporter
            .export(&stats(&[("Alice", "Kills", "3"), ("Bob", "Kills", "1")]))
            .unwrap();
        let written = exporter
            .export(&stats(&[("Alice", "Kills", "4"), ("Bob", "Kills", "1")]))
            .unwrap();
        assert_eq!(written, 1);

        let content = std::fs::read_to_string(exporter.path()).unwrap();
        assert_eq!(content.lines().count(), 4);
        assert!(content.lines().last().unwrap().starts_with("Alice,"));
    }

    #[test]
    fn test_configured_columns_order_fresh_file() {
        let dir = tempdir().unwrap();
        let mut exporter =
            StatExporter::new(dir.path(), Some(vec!["Kills".into(), "Deaths".into()])).unwrap();
        exporter.export(&stats(&[("Alice", "Kills", "3")])).unwrap();

        let content = std::fs::read_to_string(exporter.path()).unwrap();
        assert_eq!(content.lines().next(), Some("Player,timestamp,date,Kills,Deaths"));
    }

    #[test]
    fn test_new_columns_not_in_header_are_ignored_for_change_detection() {
        let dir = tempdir().unwrap();
        let mut exporter = StatExporter::new(dir.path(), None).unwrap();
        exporter.export(&stats(&[("Alice", "Kills", "3")])).unwrap();

        let changed = exporter.filter_changed(&stats(&[("Alice", "Kills", "3"), ("Alice", "Motto", "hi")]).scores);
        assert!(changed.is_empty());
    }
}

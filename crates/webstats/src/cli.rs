//! Output formatting for CLI commands

use comfy_table::{Cell, Color, ContentArrangement, Row, Table};
use webstats_core::{BackendStatus, DebugEntry};
use webstats_types::EntriesScores;

fn header(table: &mut Table, names: &[&str], no_color: bool) {
    if no_color {
        table.set_header(names.to_vec());
    } else {
        table.set_header(
            names
                .iter()
                .map(|name| Cell::new(name).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );
    }
}

/// Merged stats as a table (entries × columns) or JSON
pub fn format_stats(stats: &EntriesScores, json: bool, no_color: bool) -> String {
    if json {
        return serde_json::to_string_pretty(stats).unwrap_or_else(|_| "{}".to_string());
    }

    if stats.entries.is_empty() {
        return "No entries found.".to_string();
    }

    let columns: Vec<String> = stats.scores.columns().into_iter().collect();
    let mut names = vec!["Entry"];
    names.extend(columns.iter().map(String::as_str));

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    header(&mut table, &names, no_color);

    for entry in &stats.entries {
        let mut row = vec![entry.clone()];
        row.extend(
            columns
                .iter()
                .map(|column| stats.scores.get(entry, column).unwrap_or("-").to_string()),
        );
        table.add_row(Row::from(row));
    }

    table.to_string()
}

/// Cached cells plus the backend status line
pub fn format_debug_entries(entries: &[DebugEntry], status: Option<&BackendStatus>, no_color: bool) -> String {
    let status_line = match status {
        Some(status) => format!("Placeholder storage: {}", status),
        None => "Placeholder storage: disabled".to_string(),
    };
    if entries.is_empty() {
        return format!("{}\nNo cached placeholders.", status_line);
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    header(&mut table, &["UUID", "Name", "Column", "Value"], no_color);
    for entry in entries {
        table.add_row(Row::from(vec![
            entry.id.to_string(),
            entry.name.clone().unwrap_or_else(|| "unknown".to_string()),
            entry.column.clone(),
            entry.value.clone(),
        ]));
    }

    format!("{}\n{}", status_line, table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use uuid::Uuid;
    use webstats_types::SparseTable;

    #[test]
    fn test_format_stats_table() {
        let mut scores = SparseTable::new();
        scores.put("Alice".to_string(), "Kills", "3");
        let entries = BTreeSet::from(["Alice".to_string(), "Bob".to_string()]);
        let out = format_stats(&EntriesScores::new(entries, scores), false, true);

        assert!(out.contains("Entry"));
        assert!(out.contains("Kills"));
        assert!(out.contains("Alice"));
        assert!(out.contains("Bob"));
    }

    #[test]
    fn test_format_stats_json() {
        let out = format_stats(&EntriesScores::default(), true, true);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert!(value["entries"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_format_debug_entries() {
        let entries = vec![DebugEntry {
            id: Uuid::nil(),
            name: None,
            column: "X".into(),
            value: "1".into(),
        }];
        let out = format_debug_entries(&entries, Some(&BackendStatus::Closed), true);
        assert!(out.starts_with("Placeholder storage: closed"));
        assert!(out.contains("unknown"));

        let empty = format_debug_entries(&[], None, true);
        assert!(empty.contains("disabled"));
    }
}

use super::table::SparseTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Synthetic entry holding server-wide (not per-player) columns
pub const SERVER_ENTRY: &str = "#server";

/// Aggregate snapshot handed from every stats source to the merge step
///
/// `entries` lists every known entry label, including entries that have no
/// populated cell in `scores`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntriesScores {
    pub entries: BTreeSet<String>,
    pub scores: SparseTable,
}

impl EntriesScores {
    pub fn new(entries: BTreeSet<String>, scores: SparseTable) -> Self {
        Self { entries, scores }
    }

    /// Merge `other` into `self`: entries are unioned, scores from `other`
    /// overwrite conflicting cells
    pub fn merge(&mut self, other: EntriesScores) {
        self.entries.extend(other.entries);
        self.scores.overlay(other.scores);
    }

    /// Merge a sequence of snapshots in order; later snapshots win
    pub fn merge_all(parts: impl IntoIterator<Item = EntriesScores>) -> Self {
        parts.into_iter().fold(Self::default(), |mut acc, part| {
            acc.merge(part);
            acc
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.scores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cells: &[(&str, &str, &str)]) -> EntriesScores {
        let scores: SparseTable = cells
            .iter()
            .map(|(e, c, v)| (e.to_string(), c.to_string(), v.to_string()))
            .collect();
        let entries = scores.row_keys().cloned().collect();
        EntriesScores::new(entries, scores)
    }

    #[test]
    fn test_merge_disjoint_keeps_everything() {
        let mut a = snapshot(&[("Alice", "Kills", "1"), ("Alice", "Deaths", "2")]);
        let b = snapshot(&[("Bob", "Kills", "3")]);

        a.merge(b);

        assert_eq!(
            a.entries.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["Alice", "Bob"]
        );
        assert_eq!(a.scores.len(), 3);
        assert_eq!(a.scores.get("Bob", "Kills"), Some("3"));
    }

    #[test]
    fn test_merge_later_wins() {
        let a = snapshot(&[("Alice", "Kills", "1")]);
        let b = snapshot(&[("Alice", "Kills", "2")]);

        let ab = EntriesScores::merge_all([a.clone(), b.clone()]);
        let ba = EntriesScores::merge_all([b, a]);

        assert_eq!(ab.scores.get("Alice", "Kills"), Some("2"));
        assert_eq!(ba.scores.get("Alice", "Kills"), Some("1"));
    }

    #[test]
    fn test_merge_is_associative() {
        let a = snapshot(&[("Alice", "X", "1"), ("Bob", "Y", "1")]);
        let b = snapshot(&[("Alice", "X", "2"), ("Carol", "Z", "2")]);
        let c = snapshot(&[("Bob", "Y", "3")]);

        let mut left = a.clone();
        left.merge(b.clone());
        left.merge(c.clone());

        let mut bc = b;
        bc.merge(c);
        let mut right = a;
        right.merge(bc);

        assert_eq!(left, right);
    }

    #[test]
    fn test_entries_without_scores_survive() {
        let mut a = EntriesScores::default();
        a.entries.insert(SERVER_ENTRY.to_string());

        a.merge(snapshot(&[("Alice", "X", "1")]));

        assert!(a.entries.contains(SERVER_ENTRY));
        assert!(!a.scores.contains_row(SERVER_ENTRY));
    }
}

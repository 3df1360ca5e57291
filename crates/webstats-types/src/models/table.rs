use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};

/// Sparse row × column → value table.
///
/// An absent cell is distinct from a cell holding the empty string: `get`
/// returns `None` for the former and `Some("")` for the latter. Rows never
/// exist without at least one cell; removing the last cell of a row removes
/// the row.
///
/// The row key is generic so the placeholder cache can key rows by player
/// UUID while merged snapshots key them by display label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SparseTable<R: Ord = String> {
    rows: BTreeMap<R, BTreeMap<String, String>>,
}

impl<R: Ord> Default for SparseTable<R> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }
}

impl<R: Ord> SparseTable<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a single cell, `None` when the cell is absent
    pub fn get<Q>(&self, row: &Q, column: &str) -> Option<&str>
    where
        R: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .map(String::as_str)
    }

    pub fn contains<Q>(&self, row: &Q, column: &str) -> bool
    where
        R: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get(row, column).is_some()
    }

    pub fn contains_row<Q>(&self, row: &Q) -> bool
    where
        R: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.rows.contains_key(row)
    }

    /// Set a cell, returning the previous value
    pub fn put(
        &mut self,
        row: R,
        column: impl Into<String>,
        value: impl Into<String>,
    ) -> Option<String> {
        self.rows
            .entry(row)
            .or_default()
            .insert(column.into(), value.into())
    }

    /// Remove a single cell; drops the row once it has no cells left
    pub fn remove<Q>(&mut self, row: &Q, column: &str) -> Option<String>
    where
        R: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let cells = self.rows.get_mut(row)?;
        let removed = cells.remove(column);
        if cells.is_empty() {
            self.rows.remove(row);
        }
        removed
    }

    /// Remove a whole row
    pub fn remove_row<Q>(&mut self, row: &Q) -> Option<BTreeMap<String, String>>
    where
        R: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.rows.remove(row)
    }

    pub fn row<Q>(&self, row: &Q) -> Option<&BTreeMap<String, String>>
    where
        R: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.rows.get(row)
    }

    pub fn row_keys(&self) -> impl Iterator<Item = &R> {
        self.rows.keys()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&R, &BTreeMap<String, String>)> {
        self.rows.iter()
    }

    /// Every `(row, column, value)` triple, ordered by row then column
    pub fn cells(&self) -> impl Iterator<Item = (&R, &str, &str)> {
        self.rows.iter().flat_map(|(row, cells)| {
            cells
                .iter()
                .map(move |(column, value)| (row, column.as_str(), value.as_str()))
        })
    }

    /// Distinct column names present in at least one row
    pub fn columns(&self) -> BTreeSet<String> {
        self.rows
            .values()
            .flat_map(|cells| cells.keys().cloned())
            .collect()
    }

    /// Number of populated cells
    pub fn len(&self) -> usize {
        self.rows.values().map(BTreeMap::len).sum()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Overlay `cells` onto `row`; incoming values win
    pub fn overlay_row(&mut self, row: R, cells: BTreeMap<String, String>) {
        if cells.is_empty() {
            return;
        }
        self.rows.entry(row).or_default().extend(cells);
    }

    /// Overlay another table onto this one; `other` wins on conflicting cells
    pub fn overlay(&mut self, other: SparseTable<R>) {
        for (row, cells) in other.rows {
            self.overlay_row(row, cells);
        }
    }

    /// Keep only the columns accepted by `keep`, returning the removed column names
    pub fn retain_columns(&mut self, mut keep: impl FnMut(&str) -> bool) -> BTreeSet<String> {
        let mut removed = BTreeSet::new();
        for cells in self.rows.values_mut() {
            cells.retain(|column, _| {
                let retained = keep(column);
                if !retained {
                    removed.insert(column.clone());
                }
                retained
            });
        }
        self.rows.retain(|_, cells| !cells.is_empty());
        removed
    }

    /// Keep only the rows accepted by `keep`, returning how many were removed
    pub fn retain_rows(&mut self, mut keep: impl FnMut(&R) -> bool) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row, _| keep(row));
        before - self.rows.len()
    }

    /// Re-key every row; rows mapped to `None` are dropped
    pub fn map_rows<S: Ord>(&self, mut f: impl FnMut(&R) -> Option<S>) -> SparseTable<S> {
        let mut mapped = SparseTable::new();
        for (row, cells) in &self.rows {
            if let Some(key) = f(row) {
                mapped.overlay_row(key, cells.clone());
            }
        }
        mapped
    }
}

impl<R: Ord> FromIterator<(R, String, String)> for SparseTable<R> {
    fn from_iter<I: IntoIterator<Item = (R, String, String)>>(iter: I) -> Self {
        let mut table = SparseTable::new();
        for (row, column, value) in iter {
            table.put(row, column, value);
        }
        table
    }
}

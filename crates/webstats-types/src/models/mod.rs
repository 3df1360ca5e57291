//! Data models shared across webstats crates

pub mod entity;
pub mod entries;
pub mod table;

pub use entity::{eq_ignore_case, CachedEntity};
pub use entries::{EntriesScores, SERVER_ENTRY};
pub use table::SparseTable;

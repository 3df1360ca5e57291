//! webstats-types - Shared data types for webstats
//!
//! This crate contains pure data structures without heavy dependencies.
//! No tokio, no async runtime - just serde-serializable types.
//!
//! Used by:
//! - webstats-core (storage, cache, aggregation)
//! - webstats (operator CLI)

pub mod models;

pub use models::{eq_ignore_case, CachedEntity, EntriesScores, SparseTable, SERVER_ENTRY};

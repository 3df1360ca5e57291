//! webstats-core - Core library for webstats
//!
//! Storage backends, the placeholder value cache, stats sources and the
//! aggregation engine.

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod export;
pub mod host;
pub mod placeholder;
pub mod scoreboard;
pub mod stats;
pub mod storage;

pub use config::{Config, PlaceholderSettings};
pub use context::Webstats;
pub use error::CoreError;
pub use event::{CacheEvent, EventBus};
pub use export::StatExporter;
pub use host::{Host, HostHandle, HostThread, MemoryHost, Objective, Scoreboard};
pub use placeholder::{
    is_placeholder_set, CacheListener, CacheStore, DebugEntry, PlaceholderEvaluator,
    PlaceholderSource,
};
pub use scoreboard::ScoreboardSource;
pub use stats::{SourceKind, StatsEngine, StatsSource};
pub use storage::{BackendKind, BackendStatus, StorageBackend, StorageSettings};

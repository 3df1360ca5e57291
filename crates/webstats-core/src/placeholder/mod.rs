//! Placeholder source with its persistent value cache

pub mod cache;
pub mod evaluator;
pub mod listener;
pub mod source;

pub use cache::{CacheStore, DebugEntry};
pub use evaluator::{is_placeholder_set, PlaceholderEvaluator};
pub use listener::CacheListener;
pub use source::PlaceholderSource;

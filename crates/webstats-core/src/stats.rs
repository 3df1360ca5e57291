//! Multi-source aggregation
//!
//! Every configured source produces an `EntriesScores`. The engine runs all of
//! them concurrently, waits for every one to finish and merges the results in
//! a fixed order: scoreboard, then database, then placeholders. Later sources
//! win on conflicting cells. One failing source fails the whole request.

use crate::error::CoreError;
use crate::host::HostHandle;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use webstats_types::{EntriesScores, SERVER_ENTRY};

/// Kind of stats source; the ordering is the merge precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceKind {
    Scoreboard,
    Database,
    Placeholder,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Scoreboard => "scoreboard",
            SourceKind::Database => "database",
            SourceKind::Placeholder => "placeholder",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A producer of per-entry statistics
///
/// Work that needs the host goes through `host`; everything else runs on the
/// calling task.
#[async_trait]
pub trait StatsSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn collect(&self, host: &HostHandle) -> Result<EntriesScores, CoreError>;
}

pub struct StatsEngine {
    host: HostHandle,
    sources: Vec<Arc<dyn StatsSource>>,
    server_columns: BTreeSet<String>,
}

impl StatsEngine {
    pub fn new(host: HostHandle, server_columns: BTreeSet<String>) -> Self {
        Self {
            host,
            sources: Vec::new(),
            server_columns,
        }
    }

    pub fn add_source(&mut self, source: Arc<dyn StatsSource>) {
        self.sources.push(source);
    }

    pub fn with_source(mut self, source: Arc<dyn StatsSource>) -> Self {
        self.add_source(source);
        self
    }

    pub fn source_kinds(&self) -> Vec<SourceKind> {
        self.sources.iter().map(|s| s.kind()).collect()
    }

    /// Collect from every source and merge
    pub async fn get_stats(&self) -> Result<EntriesScores, CoreError> {
        let tasks: Vec<_> = self
            .sources
            .iter()
            .map(|source| {
                let source = Arc::clone(source);
                let host = self.host.clone();
                let kind = source.kind();
                (kind, tokio::spawn(async move { source.collect(&host).await }))
            })
            .collect();

        // Wait for every task before deciding, nothing is cancelled
        let mut parts = Vec::with_capacity(tasks.len());
        let mut failure = None;
        for (kind, task) in tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(CoreError::from(e)),
            };
            match result {
                Ok(part) => parts.push((kind, part)),
                Err(e) => {
                    warn!(source = %kind, error = %e, "Stats source failed");
                    if failure.is_none() {
                        failure = Some(CoreError::Source {
                            source_name: kind.as_str(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        // Stable, so sources of one kind keep their registration order
        parts.sort_by_key(|(kind, _)| *kind);
        let mut stats = EntriesScores::merge_all(parts.into_iter().map(|(_, part)| part));

        if !self.server_columns.is_empty() {
            stats.entries.insert(SERVER_ENTRY.to_string());
        }

        debug!(
            entries = stats.entries.len(),
            cells = stats.scores.len(),
            "Merged stats"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostThread, MemoryHost};
    use webstats_types::SparseTable;

    struct Fixed {
        kind: SourceKind,
        cells: Vec<(&'static str, &'static str, &'static str)>,
    }

    #[async_trait]
    impl StatsSource for Fixed {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        async fn collect(&self, _host: &HostHandle) -> Result<EntriesScores, CoreError> {
            let scores: SparseTable = self
                .cells
                .iter()
                .map(|(r, c, v)| (r.to_string(), c.to_string(), v.to_string()))
                .collect();
            Ok(EntriesScores::new(scores.row_keys().cloned().collect(), scores))
        }
    }

    struct Failing;

    #[async_trait]
    impl StatsSource for Failing {
        fn kind(&self) -> SourceKind {
            SourceKind::Database
        }

        async fn collect(&self, _host: &HostHandle) -> Result<EntriesScores, CoreError> {
            Err(CoreError::Task {
                message: "connection refused".into(),
            })
        }
    }

    fn fixed(kind: SourceKind, cells: &[(&'static str, &'static str, &'static str)]) -> Arc<dyn StatsSource> {
        Arc::new(Fixed {
            kind,
            cells: cells.to_vec(),
        })
    }

    #[tokio::test]
    async fn test_merge_precedence_ignores_registration_order() {
        let thread = HostThread::spawn(MemoryHost::new()).unwrap();
        let engine = StatsEngine::new(thread.handle(), BTreeSet::new())
            .with_source(fixed(SourceKind::Placeholder, &[("Alice", "X", "placeholder")]))
            .with_source(fixed(
                SourceKind::Scoreboard,
                &[("Alice", "X", "scoreboard"), ("Bob", "Y", "1")],
            ))
            .with_source(fixed(SourceKind::Database, &[("Alice", "X", "database")]));

        let stats = engine.get_stats().await.unwrap();
        assert_eq!(stats.scores.get("Alice", "X"), Some("placeholder"));
        assert_eq!(stats.scores.get("Bob", "Y"), Some("1"));
        assert_eq!(stats.entries.len(), 2);
        assert!(!stats.entries.contains(SERVER_ENTRY));
    }

    #[tokio::test]
    async fn test_server_entry_added_when_configured() {
        let thread = HostThread::spawn(MemoryHost::new()).unwrap();
        let engine = StatsEngine::new(thread.handle(), BTreeSet::from(["TPS".to_string()]));

        let stats = engine.get_stats().await.unwrap();
        assert!(stats.entries.contains(SERVER_ENTRY));
        assert!(stats.scores.is_empty());
    }

    #[tokio::test]
    async fn test_one_failing_source_fails_all() {
        let thread = HostThread::spawn(MemoryHost::new()).unwrap();
        let engine = StatsEngine::new(thread.handle(), BTreeSet::new())
            .with_source(fixed(SourceKind::Scoreboard, &[("Alice", "X", "1")]))
            .with_source(Arc::new(Failing));

        let err = engine.get_stats().await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Source {
                source_name: "database",
                ..
            }
        ));
    }
}

//! Stats from the host's main scoreboard

use crate::error::CoreError;
use crate::host::{Host, HostHandle, Objective};
use crate::stats::{SourceKind, StatsSource};
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::info;
use webstats_types::{EntriesScores, SparseTable};

/// Objective filter entry selecting every objective
pub const ALL_OBJECTIVES: &str = "*";

#[derive(Debug, Clone)]
pub struct ScoreboardSource {
    objectives: BTreeSet<String>,
    all: bool,
}

impl ScoreboardSource {
    pub fn new(objectives: impl IntoIterator<Item = String>) -> Self {
        let objectives: BTreeSet<String> = objectives.into_iter().collect();
        let all = objectives.contains(ALL_OBJECTIVES);
        info!(objectives = ?objectives, "Enabling scoreboard source");
        Self { objectives, all }
    }

    /// Whether `objective` passes the filter by name or display name
    pub fn includes(&self, objective: &Objective) -> bool {
        self.all
            || self.objectives.contains(&objective.name)
            || self.objectives.contains(&objective.display_name)
    }

    /// Read the scoreboard; call on the host thread
    pub fn collect_on(&self, host: &dyn Host) -> EntriesScores {
        let scoreboard = host.scoreboard();
        let mut scores = SparseTable::new();

        for objective in scoreboard.objectives.iter().filter(|o| self.includes(o)) {
            for (entry, score) in &objective.scores {
                scores.put(entry.clone(), objective.display_name.as_str(), score.to_string());
            }
        }

        let mut entries = scoreboard.entries;
        entries.extend(scores.row_keys().cloned());
        EntriesScores::new(entries, scores)
    }
}

#[async_trait]
impl StatsSource for ScoreboardSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Scoreboard
    }

    async fn collect(&self, host: &HostHandle) -> Result<EntriesScores, CoreError> {
        let source = self.clone();
        host.run(move |host| source.collect_on(host)).await
    }
}

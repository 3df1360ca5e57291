//! Live placeholder evaluation and the live-vs-cached policy

use super::cache::CacheStore;
use crate::config::PlaceholderSettings;
use crate::host::{known_entities, Host};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;
use webstats_types::{eq_ignore_case, CachedEntity, EntriesScores, SparseTable, SERVER_ENTRY};

/// Whether `value` is a real placeholder value
///
/// Placeholder engines report "no value" as an empty string or by echoing the
/// token back, so both count as unset. `"0"` is set.
pub fn is_placeholder_set(token: &str, value: Option<&str>) -> bool {
    match value {
        None => false,
        Some(value) => !value.is_empty() && !eq_ignore_case(value, token),
    }
}

#[derive(Debug, Clone)]
pub struct PlaceholderEvaluator {
    settings: Arc<PlaceholderSettings>,
}

impl PlaceholderEvaluator {
    pub fn new(settings: Arc<PlaceholderSettings>) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PlaceholderSettings {
        &self.settings
    }

    /// Live values of every per-player placeholder for one player
    ///
    /// Never consults the cache. Players without a resolvable name get nothing.
    pub fn live_scores(&self, host: &dyn Host, entity: &CachedEntity) -> BTreeMap<String, String> {
        if entity.name().is_none() {
            return BTreeMap::new();
        }

        self.settings
            .player_placeholders()
            .filter_map(|(token, column)| {
                let value = host.evaluate(Some(entity.id), token);
                is_placeholder_set(token, value.as_deref())
                    .then(|| (column.to_string(), value.unwrap_or_default()))
            })
            .collect()
    }

    /// Value of one placeholder for one player
    ///
    /// Online players are always evaluated live. Offline players use the
    /// cached value when it is set, and fall back to live evaluation when it
    /// is not.
    pub fn resolve(
        &self,
        host: &dyn Host,
        entity: &CachedEntity,
        token: &str,
        cached: Option<&str>,
    ) -> Option<String> {
        let value = if entity.online || !is_placeholder_set(token, cached) {
            host.evaluate(Some(entity.id), token)
        } else {
            cached.map(str::to_string)
        };
        value.filter(|value| is_placeholder_set(token, Some(value.as_str())))
    }

    /// Server-wide placeholders, evaluated once for no player
    pub fn server_values(&self, host: &dyn Host) -> BTreeMap<String, String> {
        self.settings
            .server_placeholders()
            .filter_map(|(token, column)| {
                let value = host.evaluate(None, token);
                is_placeholder_set(token, value.as_deref())
                    .then(|| (column.to_string(), value.unwrap_or_default()))
            })
            .collect()
    }

    /// Evaluate everything for the full roster, consulting `cache` when given
    pub fn collect(&self, host: &dyn Host, cache: Option<&CacheStore>) -> EntriesScores {
        let players = known_entities(host);
        let mut entries = BTreeSet::new();
        let mut scores = SparseTable::new();

        for player in &players {
            let Some(name) = player.name() else {
                continue;
            };
            entries.insert(name.to_string());

            for (token, column) in self.settings.player_placeholders() {
                let cached = cache.and_then(|cache| cache.get(player.id, column));
                if let Some(value) = self.resolve(host, player, token, cached.as_deref()) {
                    scores.put(name.to_string(), column, value);
                }
            }
        }

        let server = self.server_values(host);
        if !server.is_empty() {
            scores.overlay_row(SERVER_ENTRY.to_string(), server);
        }

        debug!(
            players = players.len(),
            cells = scores.len(),
            "Collected placeholder values"
        );
        EntriesScores::new(entries, scores)
    }
}

//! Top-level context wiring the configured sources together
//!
//! Built once at startup and passed to whatever serves stats or handles
//! operator actions.

use crate::config::Config;
use crate::error::CoreError;
use crate::event::EventBus;
use crate::export::StatExporter;
use crate::host::HostHandle;
use crate::placeholder::{DebugEntry, PlaceholderSource};
use crate::scoreboard::ScoreboardSource;
use crate::stats::{StatsEngine, StatsSource};
use crate::storage::BackendKind;
use std::sync::Arc;
use tracing::info;
use webstats_types::EntriesScores;

pub struct Webstats {
    config: Config,
    host: HostHandle,
    events: EventBus,
    engine: StatsEngine,
    placeholders: Option<Arc<PlaceholderSource>>,
}

impl Webstats {
    /// Enable every configured source
    ///
    /// Fails when a source cannot be enabled, e.g. because the placeholder
    /// cache backend cannot be opened.
    pub async fn start(config: Config, host: HostHandle) -> Result<Self, CoreError> {
        let events = EventBus::default();
        let mut engine = StatsEngine::new(host.clone(), config.server_columns.clone());

        if let Some(objectives) = &config.objectives {
            engine.add_source(Arc::new(ScoreboardSource::new(objectives.iter().cloned())));
        }

        let placeholders = match &config.placeholders {
            Some(settings) => {
                let source =
                    Arc::new(PlaceholderSource::open(settings.clone(), &host, events.clone()).await?);
                engine.add_source(source.clone());
                Some(source)
            }
            None => None,
        };

        info!(sources = ?engine.source_kinds(), "Webstats started");
        Ok(Self {
            config,
            host,
            events,
            engine,
            placeholders,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn host(&self) -> &HostHandle {
        &self.host
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn placeholders(&self) -> Option<&PlaceholderSource> {
        self.placeholders.as_deref()
    }

    /// Register a source configured outside of `Config`
    pub fn add_source(&mut self, source: Arc<dyn StatsSource>) {
        self.engine.add_source(source);
    }

    pub async fn get_stats(&self) -> Result<EntriesScores, CoreError> {
        self.engine.get_stats().await
    }

    fn require_placeholders(&self) -> Result<&PlaceholderSource, CoreError> {
        self.placeholders()
            .ok_or_else(|| CoreError::invalid_config("placeholders", "placeholder source is not enabled"))
    }

    pub async fn migrate(&self, kind: BackendKind) -> Result<(), CoreError> {
        self.require_placeholders()?.migrate(kind, &self.host).await
    }

    pub async fn delete_player(&self, target: &str) -> Result<bool, CoreError> {
        self.require_placeholders()?
            .delete_player(&self.host, target)
            .await
    }

    pub async fn debug_entries(&self) -> Result<Vec<DebugEntry>, CoreError> {
        match self.placeholders() {
            Some(source) => source.debug_entries(&self.host).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn debug(&self) -> Result<String, CoreError> {
        match self.placeholders() {
            Some(source) => source.debug(&self.host).await,
            None => Ok("Placeholder source: disabled".to_string()),
        }
    }

    /// Refresh and write the placeholder cache now
    pub async fn save(&self) -> Result<(), CoreError> {
        match self.placeholders().and_then(|source| source.cache()) {
            Some(cache) => cache.save_all(&self.host).await,
            None => Ok(()),
        }
    }

    /// Collect stats and append them to `stats.csv`
    pub async fn export(&self) -> Result<usize, CoreError> {
        let stats = self.get_stats().await?;
        let data_dir = self.config.data_dir.clone();
        let columns = self.config.export_columns.clone();
        tokio::task::spawn_blocking(move || {
            let mut exporter = StatExporter::new(&data_dir, columns)?;
            exporter.export(&stats)
        })
        .await?
    }

    /// Final save of the placeholder cache
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        if let Some(source) = self.placeholders() {
            source.shutdown(&self.host).await?;
        }
        info!("Webstats stopped");
        Ok(())
    }
}

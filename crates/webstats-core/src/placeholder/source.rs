use super::cache::{CacheStore, DebugEntry};
use super::evaluator::PlaceholderEvaluator;
use super::listener::CacheListener;
use crate::config::PlaceholderSettings;
use crate::error::CoreError;
use crate::event::EventBus;
use crate::host::HostHandle;
use crate::stats::{SourceKind, StatsSource};
use crate::storage::BackendKind;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::info;
use webstats_types::EntriesScores;

/// Stats from placeholders, with cached values for offline players
pub struct PlaceholderSource {
    evaluator: PlaceholderEvaluator,
    cache: Option<CacheStore>,
}

impl PlaceholderSource {
    /// Enable the source; fails when the configured cache backend cannot be opened
    pub async fn open(
        settings: PlaceholderSettings,
        host: &HostHandle,
        events: EventBus,
    ) -> Result<Self, CoreError> {
        info!(placeholders = settings.placeholders.len(), "Enabling placeholder source");
        let settings = Arc::new(settings);
        let evaluator = PlaceholderEvaluator::new(Arc::clone(&settings));

        let cache = match settings.backend {
            Some(kind) => {
                let cache = CacheStore::open(kind, evaluator.clone(), host, events).await?;
                cache.prune(&settings.columns());
                Some(cache)
            }
            None => None,
        };

        Ok(Self { evaluator, cache })
    }

    pub fn cache(&self) -> Option<&CacheStore> {
        self.cache.as_ref()
    }

    fn require_cache(&self) -> Result<&CacheStore, CoreError> {
        self.cache.as_ref().ok_or_else(|| {
            CoreError::invalid_config(
                "store-placeholders-in-file",
                "placeholder storage is not enabled",
            )
        })
    }

    /// Host event hooks; `None` without a cache
    ///
    /// Backend writes started by the hooks run on `runtime`.
    pub fn listener(&self, runtime: Handle) -> Option<CacheListener> {
        let settings = self.evaluator.settings();
        self.cache.clone().map(|cache| {
            CacheListener::new(
                cache,
                settings.save_on_plugin_disable,
                settings.plugin_disable_window,
                runtime,
            )
        })
    }

    pub async fn migrate(&self, kind: BackendKind, host: &HostHandle) -> Result<(), CoreError> {
        self.require_cache()?.migrate(kind, host).await
    }

    pub async fn delete_player(&self, host: &HostHandle, target: &str) -> Result<bool, CoreError> {
        self.require_cache()?.delete_player(host, target).await
    }

    pub async fn debug_entries(&self, host: &HostHandle) -> Result<Vec<DebugEntry>, CoreError> {
        match &self.cache {
            Some(cache) => cache.debug_entries(host).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn debug(&self, host: &HostHandle) -> Result<String, CoreError> {
        match &self.cache {
            Some(cache) => cache.debug(host).await,
            None => Ok("Placeholder storage: disabled".to_string()),
        }
    }

    pub async fn shutdown(&self, host: &HostHandle) -> Result<(), CoreError> {
        match &self.cache {
            Some(cache) => cache.shutdown(host).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StatsSource for PlaceholderSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Placeholder
    }

    async fn collect(&self, host: &HostHandle) -> Result<EntriesScores, CoreError> {
        let evaluator = self.evaluator.clone();
        let cache = self.cache.clone();
        host.run(move |host| evaluator.collect(host, cache.as_ref()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::placeholder_storage;
    use crate::host::{HostThread, MemoryHost};
    use tempfile::tempdir;
    use uuid::Uuid;

    fn settings(dir: &std::path::Path, backend: Option<BackendKind>) -> PlaceholderSettings {
        let mut settings = PlaceholderSettings::new(
            [("%x%".to_string(), "X".to_string())].into_iter().collect(),
            placeholder_storage(dir, None),
        );
        settings.backend = backend;
        settings
    }

    #[tokio::test]
    async fn test_without_cache_evaluates_live() {
        let dir = tempdir().unwrap();
        let host = MemoryHost::new();
        let id = Uuid::new_v4();
        host.add_player(id, Some("Alice"), false);
        host.set_value(Some(id), "%x%", "7");
        let thread = HostThread::spawn(host).unwrap();

        let source = PlaceholderSource::open(settings(dir.path(), None), &thread.handle(), EventBus::default())
            .await
            .unwrap();
        assert!(source.cache().is_none());
        assert!(source.listener(Handle::current()).is_none());

        let stats = source.collect(&thread.handle()).await.unwrap();
        assert_eq!(stats.scores.get("Alice", "X"), Some("7"));
        assert!(source.migrate(BackendKind::File, &thread.handle()).await.is_err());
    }

    #[tokio::test]
    async fn test_open_prunes_unconfigured_columns() {
        let dir = tempdir().unwrap();
        let id = Uuid::new_v4();
        std::fs::write(
            dir.path().join("placeholders.csv"),
            format!("uuid,X,Y\r\n{},1,2\r\n", id),
        )
        .unwrap();
        let thread = HostThread::spawn(MemoryHost::new()).unwrap();

        let source = PlaceholderSource::open(
            settings(dir.path(), Some(BackendKind::File)),
            &thread.handle(),
            EventBus::default(),
        )
        .await
        .unwrap();

        let cache = source.cache().unwrap();
        assert_eq!(cache.get(id, "X").as_deref(), Some("1"));
        assert_eq!(cache.get(id, "Y"), None);
    }

    #[tokio::test]
    async fn test_open_fails_without_database_path() {
        let dir = tempdir().unwrap();
        let thread = HostThread::spawn(MemoryHost::new()).unwrap();

        let result = PlaceholderSource::open(
            settings(dir.path(), Some(BackendKind::Database)),
            &thread.handle(),
            EventBus::default(),
        )
        .await;
        let err = result.err().unwrap();
        assert_eq!(err.config_field(), Some("store-placeholders-database"));
    }
}

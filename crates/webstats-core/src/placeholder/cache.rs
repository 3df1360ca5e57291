//! Persistent cache of placeholder values
//!
//! The canonical copy lives in memory, keyed by player UUID. The backend is
//! only read once at startup and written as a whole on `save_all`, on
//! migration and at shutdown.
//!
//! Locking: the table sits behind a `RwLock` and the backend behind a
//! `Mutex`. Neither lock is held while calling into the host, and the table
//! lock is never held across backend I/O.
//!
//! Methods ending in `_on` take the host and run on the host thread; they
//! never touch the backend. Backend I/O goes through `spawn_blocking`.

use super::evaluator::PlaceholderEvaluator;
use crate::error::CoreError;
use crate::event::{CacheEvent, EventBus};
use crate::host::{known_entities, resolve_entity, Host, HostHandle};
use crate::storage::{open_backend, BackendKind, BackendStatus, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webstats_types::{CachedEntity, SparseTable};

/// One cached cell with the player's name as currently resolvable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEntry {
    pub id: Uuid,
    pub name: Option<String>,
    pub column: String,
    pub value: String,
}

impl fmt::Display for DebugEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {} = {}",
            self.id,
            self.name.as_deref().unwrap_or("unknown"),
            self.column,
            self.value
        )
    }
}

#[derive(Clone)]
pub struct CacheStore {
    data: Arc<RwLock<SparseTable<Uuid>>>,
    backend: Arc<Mutex<Box<dyn StorageBackend>>>,
    evaluator: PlaceholderEvaluator,
    events: EventBus,
}

impl CacheStore {
    /// Open the backend, load what it holds and refresh every known player
    ///
    /// Backend construction failures are returned; an unreadable or corrupt
    /// backend only means starting with an empty cache.
    pub async fn open(
        kind: BackendKind,
        evaluator: PlaceholderEvaluator,
        host: &HostHandle,
        events: EventBus,
    ) -> Result<Self, CoreError> {
        info!(backend = %kind, "Enabling placeholder storage");
        let settings = evaluator.settings().storage.clone();

        let (backend, data) = tokio::task::spawn_blocking(move || {
            let mut backend = open_backend(kind, &settings)?;
            let data = load_table(backend.as_mut());
            Ok::<_, CoreError>((backend, data))
        })
        .await??;

        events.publish(CacheEvent::Loaded { cells: data.len() });
        let store = Self::from_parts(backend, data, evaluator, events);

        let updating = store.clone();
        host.run(move |host| updating.update_on(host)).await?;
        Ok(store)
    }

    /// Assemble a store around an already opened backend and table
    pub fn from_parts(
        backend: Box<dyn StorageBackend>,
        data: SparseTable<Uuid>,
        evaluator: PlaceholderEvaluator,
        events: EventBus,
    ) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            backend: Arc::new(Mutex::new(backend)),
            evaluator,
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.lock().kind()
    }

    /// Cached value of one cell
    pub fn get(&self, id: Uuid, column: &str) -> Option<String> {
        self.data.read().get(&id, column).map(str::to_string)
    }

    /// Copy of the whole in-memory table
    pub fn snapshot(&self) -> SparseTable<Uuid> {
        self.data.read().clone()
    }

    /// Overlay live values for every known player
    pub fn update_on(&self, host: &dyn Host) {
        for player in known_entities(host) {
            let scores = self.evaluator.live_scores(host, &player);
            for (column, value) in &scores {
                debug!(id = %player.id, name = ?player.name(), column, value, "Updated cached value");
            }
            self.data.write().overlay_row(player.id, scores);
        }
    }

    /// Store one player's live values in memory
    pub fn save(&self, host: &dyn Host, player: &CachedEntity) {
        let scores = self.evaluator.live_scores(host, player);
        if scores.is_empty() {
            return;
        }
        debug!(id = %player.id, cells = scores.len(), "Saving player placeholders");
        self.data.write().overlay_row(player.id, scores);
    }

    pub fn save_player_on(&self, host: &dyn Host, id: Uuid) {
        let player = resolve_entity(host, id);
        self.save(host, &player);
    }

    /// Save every known player on the host thread, then write the table
    /// to the backend off it
    ///
    /// When the host thread is gone the live refresh is skipped and the
    /// table is written as it is.
    pub async fn save_all(&self, host: &HostHandle) -> Result<(), CoreError> {
        let updating = self.clone();
        if let Err(e) = host.run(move |host| updating.update_on(host)).await {
            warn!(error = %e, "Could not refresh placeholders before saving");
        }

        let store = self.clone();
        tokio::task::spawn_blocking(move || store.flush()).await?
    }

    fn backend_table(&self) -> SparseTable {
        self.data.read().map_rows(|id| Some(id.to_string()))
    }

    /// Write the in-memory table to the active backend
    ///
    /// Blocking; never call this on the host thread.
    pub fn flush(&self) -> Result<(), CoreError> {
        let table = self.backend_table();
        let cells = table.len();

        let mut backend = self.backend.lock();
        backend.store(&table)?;
        let kind = backend.kind();
        drop(backend);

        info!(backend = %kind, cells, "Saved placeholders");
        self.events.publish(CacheEvent::Saved { kind, cells });
        Ok(())
    }

    /// Drop every column not in `columns`, returning the dropped names
    pub fn prune(&self, columns: &BTreeSet<String>) -> BTreeSet<String> {
        let removed = self.data.write().retain_columns(|column| columns.contains(column));
        if !removed.is_empty() {
            info!(columns = ?removed, "Removing old placeholders");
            self.events.publish(CacheEvent::Pruned {
                columns: removed.iter().cloned().collect(),
            });
        }
        removed
    }

    /// Remove the in-memory rows of a player given by UUID or by display name
    ///
    /// Names are compared case-insensitively against what the host resolves
    /// now; players it cannot resolve are never matched by name. The backend
    /// is not touched, use `delete_player` to forget the stored rows too.
    pub fn delete_player_on(&self, host: &dyn Host, target: &str) -> bool {
        !self.remove_players_on(host, target).is_empty()
    }

    fn remove_players_on(&self, host: &dyn Host, target: &str) -> Vec<Uuid> {
        let ids: Vec<Uuid> = match Uuid::parse_str(target) {
            Ok(id) => vec![id],
            Err(_) => {
                let cached: Vec<Uuid> = self.data.read().row_keys().copied().collect();
                cached
                    .into_iter()
                    .filter(|id| resolve_entity(host, *id).is_named(target))
                    .collect()
            }
        };

        let mut data = self.data.write();
        let removed: Vec<Uuid> = ids
            .into_iter()
            .filter(|id| data.remove_row(id).is_some())
            .collect();
        drop(data);

        if !removed.is_empty() {
            info!(target, ids = ?removed, "Deleted cached placeholders");
            self.events.publish(CacheEvent::PlayerDeleted {
                ids: removed.clone(),
            });
        }
        removed
    }

    /// Remove a player's rows from memory and from the backend
    pub async fn delete_player(&self, host: &HostHandle, target: &str) -> Result<bool, CoreError> {
        let store = self.clone();
        let target = target.to_string();
        let removed = host
            .run(move |host| store.remove_players_on(host, &target))
            .await?;
        if removed.is_empty() {
            return Ok(false);
        }

        let rows: Vec<String> = removed.iter().map(Uuid::to_string).collect();
        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || {
            let mut active = backend.lock();
            active.delete_rows(&rows)
        })
        .await??;
        Ok(true)
    }

    /// Every cached cell with the player's currently resolvable name
    pub fn debug_entries_on(&self, host: &dyn Host) -> Vec<DebugEntry> {
        let table = self.snapshot();
        table
            .cells()
            .map(|(id, column, value)| DebugEntry {
                id: *id,
                name: host.display_name(*id),
                column: column.to_string(),
                value: value.to_string(),
            })
            .collect()
    }

    pub async fn debug_entries(&self, host: &HostHandle) -> Result<Vec<DebugEntry>, CoreError> {
        let store = self.clone();
        host.run(move |host| store.debug_entries_on(host)).await
    }

    pub async fn status(&self) -> Result<BackendStatus, CoreError> {
        let backend = self.backend.clone();
        let status = tokio::task::spawn_blocking(move || {
            let mut active = backend.lock();
            active.status()
        })
        .await?;
        Ok(status)
    }

    /// Human-readable dump of the cache and the backend status
    pub async fn debug(&self, host: &HostHandle) -> Result<String, CoreError> {
        let entries = self.debug_entries(host).await?;
        let status = self.status().await?;

        let mut out = format!("Placeholder storage: {}\n", status);
        out.push_str("Loaded placeholders:");
        for entry in &entries {
            out.push_str("\n  ");
            out.push_str(&entry.to_string());
        }
        Ok(out)
    }

    /// Switch to a backend of `kind` and write everything to it
    ///
    /// The table is written to the new backend before it replaces the
    /// current one. If opening or writing fails the new backend is closed and
    /// the current one stays active and untouched. The old backend is closed
    /// without a final write.
    pub async fn migrate(&self, kind: BackendKind, host: &HostHandle) -> Result<(), CoreError> {
        let settings = self.evaluator.settings().storage.clone();
        let opened = tokio::task::spawn_blocking(move || open_backend(kind, &settings)).await?;
        let mut new_backend = match opened {
            Ok(backend) => backend,
            Err(e) => return Err(self.migration_failed(kind, e)),
        };

        let updating = self.clone();
        if let Err(e) = host.run(move |host| updating.update_on(host)).await {
            warn!(error = %e, "Could not refresh placeholders before migrating");
        }

        let table = self.backend_table();
        let cells = table.len();
        let backend = self.backend.clone();
        let switched = tokio::task::spawn_blocking(move || {
            let mut active = backend.lock();
            if let Err(e) = new_backend.store(&table) {
                new_backend.close();
                return Err(e);
            }
            let mut old = std::mem::replace(&mut *active, new_backend);
            old.close();
            Ok(old.kind())
        })
        .await?;

        let from = match switched {
            Ok(from) => from,
            Err(e) => return Err(self.migration_failed(kind, e)),
        };
        self.events.publish(CacheEvent::Saved { kind, cells });
        self.events.publish(CacheEvent::Migrated { from, to: kind });
        info!(from = %from, to = %kind, cells, "Migration complete");
        Ok(())
    }

    fn migration_failed(&self, to: BackendKind, e: CoreError) -> CoreError {
        warn!(to = %to, error = %e, "Migration failed, keeping current storage");
        self.events.publish(CacheEvent::MigrationFailed {
            to,
            reason: e.to_string(),
        });
        e
    }

    /// Final save and close
    ///
    /// The final save is skipped when placeholders are already saved early on
    /// shutdown signals.
    pub async fn shutdown(&self, host: &HostHandle) -> Result<(), CoreError> {
        let result = if self.evaluator.settings().save_on_plugin_disable {
            debug!("Placeholders already saved on shutdown signal");
            Ok(())
        } else {
            self.save_all(host).await
        };

        let backend = self.backend.clone();
        tokio::task::spawn_blocking(move || {
            let mut active = backend.lock();
            active.close();
        })
        .await?;
        result
    }
}

/// Read the backend into a UUID-keyed table, treating any failure as empty
fn load_table(backend: &mut dyn StorageBackend) -> SparseTable<Uuid> {
    let loaded = match backend.load() {
        Ok(Some(loaded)) => loaded,
        Ok(None) => return SparseTable::new(),
        Err(e) => {
            warn!(error = %e, "Could not load stored placeholders, starting with an empty cache");
            return SparseTable::new();
        }
    };

    let table = loaded.table.map_rows(|row| match Uuid::parse_str(row) {
        Ok(id) => Some(id),
        Err(_) => {
            warn!(row = %row, "Skipping stored placeholders with an invalid UUID");
            None
        }
    });
    info!(cells = table.len(), players = table.row_count(), "Loaded stored placeholders");
    table
}

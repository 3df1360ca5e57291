//! Host event hooks for the placeholder cache
//!
//! Both hooks are called by the host on its own thread. They only touch
//! memory there; writing the backend is handed to the blocking pool of the
//! runtime the listener was created in.

use super::cache::CacheStore;
use crate::host::Host;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

pub struct CacheListener {
    cache: CacheStore,
    save_on_plugin_disable: bool,
    window: Duration,
    last_signal: Mutex<Option<Instant>>,
    runtime: Handle,
}

impl CacheListener {
    pub fn new(
        cache: CacheStore,
        save_on_plugin_disable: bool,
        window: Duration,
        runtime: Handle,
    ) -> Self {
        Self {
            cache,
            save_on_plugin_disable,
            window,
            last_signal: Mutex::new(None),
            runtime,
        }
    }

    /// A player left: keep their latest live values
    pub fn on_player_quit(&self, host: &dyn Host, id: Uuid) {
        self.cache.save_player_on(host, id);
    }

    /// Another plugin is shutting down
    ///
    /// Returns the pending backend write when a save was started.
    pub fn on_shutdown_signal(&self, host: &dyn Host) -> Option<JoinHandle<()>> {
        self.on_shutdown_signal_at(host, Instant::now())
    }

    /// Signals within `window` of the previous signal count as the same
    /// shutdown and do not save again
    pub fn on_shutdown_signal_at(&self, host: &dyn Host, now: Instant) -> Option<JoinHandle<()>> {
        if !self.save_on_plugin_disable {
            return None;
        }

        let due = {
            let mut last = self.last_signal.lock();
            let due = last.map_or(true, |previous| {
                now.saturating_duration_since(previous) > self.window
            });
            *last = Some(now);
            due
        };
        if !due {
            return None;
        }

        info!("Got shutdown signal, saving placeholders early");
        self.cache.update_on(host);
        let cache = self.cache.clone();
        Some(self.runtime.spawn_blocking(move || {
            if let Err(e) = cache.flush() {
                error!(error = %e, "Could not save placeholders");
            }
        }))
    }
}

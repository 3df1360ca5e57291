//! Bridge to the game host
//!
//! The host's APIs (player roster, online checks, placeholder evaluation,
//! scoreboard) may only be called from one privileged thread. `HostThread`
//! owns the `Host` on a dedicated OS thread; everything else submits closures
//! through a cloneable `HostHandle` and awaits their result.

use crate::error::CoreError;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};
use uuid::Uuid;
use webstats_types::CachedEntity;

/// Host APIs reachable only from the privileged thread
pub trait Host: Send + 'static {
    /// Players currently connected
    fn online_players(&self) -> Vec<Uuid>;

    /// Every player the host has ever seen, online or not
    fn known_players(&self) -> Vec<Uuid>;

    fn is_online(&self, id: Uuid) -> bool;

    /// Last known display name; `None` when the host cannot resolve it
    fn display_name(&self, id: Uuid) -> Option<String>;

    /// Evaluate a raw placeholder token for a player, or server-wide for `None`
    ///
    /// Unresolvable tokens come back unchanged or empty, like most placeholder
    /// engines do.
    fn evaluate(&self, player: Option<Uuid>, token: &str) -> Option<String>;

    /// Snapshot of the main scoreboard
    fn scoreboard(&self) -> Scoreboard;
}

/// One scoreboard objective and its scores per entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Objective {
    pub name: String,
    pub display_name: String,
    pub scores: BTreeMap<String, i64>,
}

impl Objective {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            scores: BTreeMap::new(),
        }
    }

    pub fn with_score(mut self, entry: impl Into<String>, score: i64) -> Self {
        self.scores.insert(entry.into(), score);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scoreboard {
    /// Every entry tracked by the scoreboard, scored or not
    pub entries: BTreeSet<String>,
    pub objectives: Vec<Objective>,
}

/// Resolve one player's name and online state
pub fn resolve_entity(host: &dyn Host, id: Uuid) -> CachedEntity {
    CachedEntity::new(id, host.display_name(id), host.is_online(id))
}

/// Union of online and known players, each resolved once
pub fn known_entities(host: &dyn Host) -> Vec<CachedEntity> {
    let ids: BTreeSet<Uuid> = host
        .online_players()
        .into_iter()
        .chain(host.known_players())
        .collect();
    ids.into_iter().map(|id| resolve_entity(host, id)).collect()
}

type Job = Box<dyn FnOnce(&dyn Host) + Send>;

enum Msg {
    Run(Job),
    Stop,
}

/// Cloneable sender for work that must run on the host thread
#[derive(Clone)]
pub struct HostHandle {
    sender: mpsc::UnboundedSender<Msg>,
}

impl HostHandle {
    /// Run `f` on the host thread and wait for its result
    pub async fn run<T, F>(&self, f: F) -> Result<T, CoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Host) -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |host| {
            // Receiver gone means the caller stopped waiting
            let _ = tx.send(f(host));
        });
        self.sender
            .send(Msg::Run(job))
            .map_err(|_| CoreError::HostUnavailable)?;
        rx.await.map_err(|_| CoreError::Task {
            message: "host job panicked before completing".to_string(),
        })
    }

    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Dedicated OS thread owning the `Host`
pub struct HostThread {
    handle: HostHandle,
    join: Option<thread::JoinHandle<()>>,
}

impl HostThread {
    pub fn spawn<H: Host>(host: H) -> Result<Self, CoreError> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Msg>();

        let join = thread::Builder::new()
            .name("webstats-host".to_string())
            .spawn(move || {
                debug!("Host thread started");
                while let Some(msg) = receiver.blocking_recv() {
                    match msg {
                        Msg::Run(job) => {
                            let result = panic::catch_unwind(AssertUnwindSafe(|| job(&host)));
                            if result.is_err() {
                                error!("Host job panicked");
                            }
                        }
                        Msg::Stop => break,
                    }
                }
                debug!("Host thread stopped");
            })
            .map_err(|e| CoreError::Task {
                message: format!("could not spawn host thread: {}", e),
            })?;

        info!("Host thread running");
        Ok(Self {
            handle: HostHandle { sender },
            join: Some(join),
        })
    }

    pub fn handle(&self) -> HostHandle {
        self.handle.clone()
    }

    /// Stop after already queued jobs have run and wait for the thread
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.handle.sender.send(Msg::Stop);
            if join.join().is_err() {
                error!("Host thread terminated abnormally");
            }
        }
    }
}

impl Drop for HostThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone)]
struct MemoryPlayer {
    name: Option<String>,
    online: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    players: BTreeMap<Uuid, MemoryPlayer>,
    values: HashMap<(Option<Uuid>, String), String>,
    scoreboard: Scoreboard,
}

/// In-memory `Host`
///
/// Clones share state, so a test can keep one clone to mutate players and
/// placeholder values while another is owned by the host thread.
/// Tokens without a configured value evaluate to themselves.
#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_player(&self, id: Uuid, name: Option<&str>, online: bool) {
        self.state.write().players.insert(
            id,
            MemoryPlayer {
                name: name.map(str::to_string),
                online,
            },
        );
    }

    pub fn set_online(&self, id: Uuid, online: bool) {
        if let Some(player) = self.state.write().players.get_mut(&id) {
            player.online = online;
        }
    }

    /// Live value of `token` for `player` (`None` = server-wide)
    pub fn set_value(&self, player: Option<Uuid>, token: &str, value: impl Into<String>) {
        self.state
            .write()
            .values
            .insert((player, token.to_string()), value.into());
    }

    pub fn clear_value(&self, player: Option<Uuid>, token: &str) {
        self.state.write().values.remove(&(player, token.to_string()));
    }

    pub fn set_scoreboard(&self, scoreboard: Scoreboard) {
        self.state.write().scoreboard = scoreboard;
    }
}

impl Host for MemoryHost {
    fn online_players(&self) -> Vec<Uuid> {
        self.state
            .read()
            .players
            .iter()
            .filter(|(_, p)| p.online)
            .map(|(id, _)| *id)
            .collect()
    }

    fn known_players(&self) -> Vec<Uuid> {
        self.state.read().players.keys().copied().collect()
    }

    fn is_online(&self, id: Uuid) -> bool {
        self.state
            .read()
            .players
            .get(&id)
            .is_some_and(|p| p.online)
    }

    fn display_name(&self, id: Uuid) -> Option<String> {
        self.state.read().players.get(&id).and_then(|p| p.name.clone())
    }

    fn evaluate(&self, player: Option<Uuid>, token: &str) -> Option<String> {
        let state = self.state.read();
        Some(
            state
                .values
                .get(&(player, token.to_string()))
                .cloned()
                .unwrap_or_else(|| token.to_string()),
        )
    }

    fn scoreboard(&self) -> Scoreboard {
        self.state.read().scoreboard.clone()
    }
}

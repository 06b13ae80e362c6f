//! Public entry point wiring host session events to the profile store.

use crate::error::{ProfileError, Result};
use crate::path::{IntoProfilePath, ProfilePath};
use crate::session::{PendingProfile, ProfileRef};
use crate::signals::{SignalBus, SubscriptionConfig, SubscriptionHandle};
use crate::store::{BatchReport, ProfileStore, ProfileStoreConfig};
use crate::types::SessionId;
use crate::value::Value;
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Lifecycle notifications from the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// An entity joined; its profile should be loaded.
    Connected(SessionId),
    /// An entity is leaving; its profile should be released.
    Disconnecting(SessionId),
}

/// Player data replication facade.
///
/// Holds the [`ProfileStore`] and exposes the per-player operations keyed by
/// session. Lifecycle can be driven by a channel of [`SessionEvent`]s via
/// [`start`](Self::start) or by calling [`handle_event`](Self::handle_event)
/// directly.
pub struct ProfileReplication {
    store: Arc<ProfileStore>,
    started: AtomicBool,
}

impl ProfileReplication {
    /// Wrap an existing store.
    pub fn new(store: ProfileStore) -> Self {
        Self {
            store: Arc::new(store),
            started: AtomicBool::new(false),
        }
    }

    /// Facade over an in-memory store.
    pub fn in_memory(config: ProfileStoreConfig) -> Self {
        Self::new(ProfileStore::in_memory(config))
    }

    pub fn store(&self) -> &Arc<ProfileStore> {
        &self.store
    }

    /// Initialize the system with a database name and the data template.
    pub fn init(&self, database_name: &str, profile_template: Value) -> Result<()> {
        self.store.initialize(database_name, profile_template)
    }

    /// Start consuming session events on a worker thread.
    ///
    /// `connected` lists sessions that joined before the worker started;
    /// they are loaded first. Loads run on their own threads so one slow
    /// profile does not hold up others. Releases run on the worker in event
    /// order, so a rejoin is only processed after the previous release has
    /// finished. The worker exits when the sender side is dropped.
    pub fn start(
        &self,
        events: Receiver<SessionEvent>,
        connected: Vec<SessionId>,
    ) -> Result<ReplicationWorker> {
        if !self.store.is_initialized() {
            return Err(ProfileError::NotInitialized);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ProfileError::AlreadyStarted);
        }

        let store = Arc::clone(&self.store);
        let spawned = thread::Builder::new()
            .name("profile-replication".into())
            .spawn(move || run_worker(store, events, connected));

        match spawned {
            Ok(handle) => {
                info!("profile replication started");
                Ok(ReplicationWorker { handle })
            }
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                Err(ProfileError::Io(e))
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Apply one lifecycle event synchronously.
    pub fn handle_event(&self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::Connected(session) => self.store.load(session).map(|_| ()),
            SessionEvent::Disconnecting(session) => self.store.release(session),
        }
    }

    // --- Data Operations ---

    /// Set a scalar value on a path. Tables cannot be set directly.
    pub fn set(&self, player: SessionId, path: impl IntoProfilePath, new_value: impl Into<Value>) -> Result<()> {
        self.store.set(player, path, new_value)
    }

    /// Append a table at a path, or insert it under `key`.
    pub fn add_table(
        &self,
        player: SessionId,
        path: impl IntoProfilePath,
        value: impl Into<Value>,
        key: Option<&str>,
    ) -> Result<ProfilePath> {
        self.store.add_table(player, path, value, key)
    }

    /// Increment the number on a path.
    pub fn increment(&self, player: SessionId, path: impl IntoProfilePath, value: impl Into<Value>) -> Result<Value> {
        self.store.increment(player, path, value)
    }

    /// Delete the value on a path.
    pub fn delete(&self, player: SessionId, path: impl IntoProfilePath) -> Result<bool> {
        self.store.delete(player, path)
    }

    /// Snapshot of the player's profile data.
    pub fn get_player_data(&self, player: SessionId) -> Result<Value> {
        self.store.data(player)
    }

    /// The player's profile once it has loaded.
    pub fn get_player_data_async(&self, player: SessionId) -> Result<PendingProfile> {
        self.store.get_profile_async(player)
    }

    /// The player's live profile.
    pub fn get_player_profile(&self, player: SessionId) -> Result<ProfileRef> {
        self.store.get_profile(player)
    }

    // --- Signals ---

    pub fn signals(&self) -> &Arc<SignalBus> {
        self.store.signals()
    }

    /// Subscribe to lifecycle and change events.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.store.signals().subscribe(config)
    }

    /// Release every live session.
    pub fn shutdown(&self) -> BatchReport {
        let report = self.store.release_all();
        info!(
            released = report.succeeded.len(),
            failed = report.failed.len(),
            "profile replication shut down"
        );
        report
    }
}

/// Handle to the event worker started by [`ProfileReplication::start`].
pub struct ReplicationWorker {
    handle: JoinHandle<()>,
}

impl ReplicationWorker {
    /// Wait for the worker to exit (after the event sender is dropped).
    pub fn join(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| ProfileError::InvalidOperation("replication worker panicked".into()))
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

fn run_worker(store: Arc<ProfileStore>, events: Receiver<SessionEvent>, connected: Vec<SessionId>) {
    for session in connected {
        begin_load(&store, session);
    }

    for event in events.iter() {
        debug!(?event, "session event");
        match event {
            SessionEvent::Connected(session) => begin_load(&store, session),
            SessionEvent::Disconnecting(session) => {
                if let Err(e) = store.release(session) {
                    error!(%session, error = %e, "failed to release profile");
                }
            }
        }
    }

    debug!("session event channel closed");
}

fn begin_load(store: &Arc<ProfileStore>, session: SessionId) {
    // Load failures are logged inside the store; the join handle is not
    // needed because completion is observed through signals.
    if let Err(e) = store.load_in_background(session) {
        error!(%session, error = %e, "failed to start profile load");
    }
}

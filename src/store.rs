//! Main ProfileStore struct tying all components together.

use crate::backend::{FileBackend, MemoryBackend, ProfileBackend, StoredProfile};
use crate::error::{ProfileError, Result};
use crate::path::{IntoProfilePath, ProfilePath};
use crate::profile::{Profile, ProfileChange, ProfileOperation};
use crate::session::{PendingProfile, ProfileRef, SessionSlot};
use crate::signals::{ProfileEvent, Signal, SignalBus};
use crate::types::{ProfileMeta, SessionId, SessionState, Timestamp};
use crate::value::Value;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct ProfileStoreConfig {
    /// Identifies this server as the owner of the sessions it loads.
    pub owner_id: String,

    /// Prefix of backend keys; the session id is appended.
    pub key_prefix: String,

    /// Upper bound for blocking waits on a loading profile.
    pub load_timeout: Duration,

    /// Take over profiles whose session lock is held by another owner.
    pub force_load: bool,

    /// How many released sessions to remember, so late calls report
    /// `SessionNotActive` rather than `SessionNotFound`.
    pub released_history: usize,

    /// Read cache size for the file backend (number of profiles).
    pub cache_size: usize,
}

impl Default for ProfileStoreConfig {
    fn default() -> Self {
        Self {
            owner_id: format!("server-{}", std::process::id()),
            key_prefix: "Player_".to_string(),
            load_timeout: Duration::from_secs(30),
            force_load: false,
            released_history: 1024,
            cache_size: 1000,
        }
    }
}

/// The template every profile starts from.
#[derive(Clone, Debug)]
struct Template {
    name: String,
    data: Value,
}

/// Outcome of an operation applied to many sessions at once.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<SessionId>,
    pub failed: Vec<(SessionId, ProfileError)>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owns the profile template and every session's profile.
///
/// Provides a unified interface for:
/// - Loading and releasing session profiles through a backend
/// - Path-addressed mutations, serialized per session
/// - Lifecycle signals and change replication
pub struct ProfileStore {
    /// Store configuration.
    config: ProfileStoreConfig,

    /// Backing persistence.
    backend: Arc<dyn ProfileBackend>,

    /// Set once by `initialize`.
    template: OnceLock<Template>,

    /// Live sessions (loading, active or releasing).
    sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,

    /// Recently released sessions.
    released: Mutex<LruCache<SessionId, ()>>,

    /// Listener and subscriber fan-out.
    signals: Arc<SignalBus>,
}

impl ProfileStore {
    /// Create a store over the given backend.
    pub fn new(config: ProfileStoreConfig, backend: Arc<dyn ProfileBackend>) -> Self {
        let history = NonZeroUsize::new(config.released_history.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            backend,
            template: OnceLock::new(),
            sessions: RwLock::new(HashMap::new()),
            released: Mutex::new(LruCache::new(history)),
            signals: Arc::new(SignalBus::new()),
        }
    }

    /// Create a store that keeps profiles in memory.
    pub fn in_memory(config: ProfileStoreConfig) -> Self {
        Self::new(config, Arc::new(MemoryBackend::new()))
    }

    /// Create a store persisting profiles under `path`.
    pub fn open(config: ProfileStoreConfig, path: impl AsRef<Path>) -> Result<Self> {
        let backend = FileBackend::new(path, config.cache_size)?;
        Ok(Self::new(config, Arc::new(backend)))
    }

    pub fn config(&self) -> &ProfileStoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn ProfileBackend> {
        &self.backend
    }

    pub fn signals(&self) -> &Arc<SignalBus> {
        &self.signals
    }

    // --- Initialization ---

    /// Set the template every profile starts from.
    ///
    /// May be called once; later calls fail with `AlreadyInitialized` and
    /// leave the first template in place. The template must be a map.
    pub fn initialize(&self, template_name: &str, template: Value) -> Result<()> {
        if !matches!(template, Value::Map(_)) {
            return Err(ProfileError::type_mismatch(
                "",
                "map template",
                template.kind().to_string(),
            ));
        }

        self.template
            .set(Template {
                name: template_name.to_string(),
                data: template,
            })
            .map_err(|_| ProfileError::AlreadyInitialized(self.template_name().unwrap_or_default()))?;

        info!(template = template_name, "profile store initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.template.get().is_some()
    }

    pub fn template_name(&self) -> Option<String> {
        self.template.get().map(|t| t.name.clone())
    }

    /// Backend key of a session's profile.
    pub fn profile_key(&self, session: SessionId) -> String {
        format!("{}{}", self.config.key_prefix, session.0)
    }

    fn template(&self) -> Result<&Template> {
        self.template.get().ok_or(ProfileError::NotInitialized)
    }

    // --- Session Lookup ---

    fn slot(&self, session: SessionId) -> Result<Arc<SessionSlot>> {
        if let Some(slot) = self.sessions.read().get(&session) {
            return Ok(Arc::clone(slot));
        }
        if self.released.lock().contains(&session) {
            Err(ProfileError::SessionNotActive(session))
        } else {
            Err(ProfileError::SessionNotFound(session))
        }
    }

    /// Drop a session from the live table and remember it as released.
    fn detach(&self, slot: &Arc<SessionSlot>) {
        let session = slot.session();
        let mut sessions = self.sessions.write();
        if sessions.get(&session).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            sessions.remove(&session);
            self.released.lock().put(session, ());
        }
    }

    /// Current lifecycle state of a session, if it is known.
    pub fn session_state(&self, session: SessionId) -> Option<SessionState> {
        match self.slot(session) {
            Ok(slot) => {
                let state = slot.lock().state;
                Some(state)
            }
            Err(ProfileError::SessionNotActive(_)) => Some(SessionState::Released),
            Err(_) => None,
        }
    }

    /// Sessions whose profile is loaded and accepting operations.
    pub fn active_sessions(&self) -> Vec<SessionId> {
        let slots: Vec<Arc<SessionSlot>> = self.sessions.read().values().cloned().collect();
        let mut active: Vec<SessionId> = slots
            .into_iter()
            .filter(|slot| slot.lock().state.is_live())
            .map(|slot| slot.session())
            .collect();
        active.sort();
        active
    }

    // --- Load ---

    /// Load the profile of a session, or return it if already loaded.
    ///
    /// A session that is still loading on another thread is waited for (up
    /// to `load_timeout`) and the same profile is returned.
    pub fn load(&self, session: SessionId) -> Result<ProfileRef> {
        let (slot, is_new) = self.reserve(session)?;
        if is_new {
            self.complete_load(slot)
        } else {
            slot.wait_loaded(self.config.load_timeout, false)
        }
    }

    /// Register the session as loading and finish the load on a new thread.
    ///
    /// The session is visible as `Loading` before this returns, so a release
    /// issued right after it cancels the load instead of being lost. Returns
    /// None when the session was already loading or loaded.
    pub fn load_in_background(
        self: &Arc<Self>,
        session: SessionId,
    ) -> Result<Option<JoinHandle<Result<ProfileRef>>>> {
        let (slot, is_new) = self.reserve(session)?;
        if !is_new {
            return Ok(None);
        }

        let store = Arc::clone(self);
        let task_slot = Arc::clone(&slot);
        let handle = thread::Builder::new()
            .name(format!("profile-load-{}", session))
            .spawn(move || store.complete_load(task_slot));

        match handle {
            Ok(handle) => Ok(Some(handle)),
            Err(e) => {
                // The slot was reserved; undo it so the session can be retried.
                self.fail_load(&slot, &ProfileError::Io(e));
                Err(ProfileError::LoadFailed {
                    session,
                    reason: "could not spawn load thread".into(),
                })
            }
        }
    }

    /// Get the slot of a session, inserting a fresh `Loading` slot if there
    /// is none. The flag tells whether the caller must complete the load.
    ///
    /// A slot that is released or whose load was cancelled may still be
    /// writing its record back; it is replaced by a new slot that waits for
    /// it before reading the backend.
    fn reserve(&self, session: SessionId) -> Result<(Arc<SessionSlot>, bool)> {
        self.template()?;

        let mut sessions = self.sessions.write();
        let predecessor = match sessions.get(&session) {
            Some(slot) if !slot.is_ending() => return Ok((Arc::clone(slot), false)),
            Some(slot) => {
                debug!(%session, "reload queued behind ending session");
                Some(Arc::clone(slot))
            }
            None => None,
        };

        let slot = Arc::new(SessionSlot::following(session, predecessor));
        sessions.insert(session, Arc::clone(&slot));
        self.released.lock().pop(&session);
        Ok((slot, true))
    }

    /// Mark a reserved load as failed and forget the session.
    fn fail_load(&self, slot: &Arc<SessionSlot>, error: &ProfileError) {
        let session = slot.session();
        warn!(%session, error = %error, "profile load failed");
        {
            let mut inner = slot.lock();
            inner.state = SessionState::Released;
            inner.failure = Some(error.to_string());
            inner.retired = true;
            slot.notify(&mut inner);
        }
        let mut sessions = self.sessions.write();
        if sessions.get(&session).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            sessions.remove(&session);
        }
    }

    /// Read and claim the profile of a reserved slot, then activate it.
    fn complete_load(&self, slot: Arc<SessionSlot>) -> Result<ProfileRef> {
        let session = slot.session();
        let template = match self.template() {
            Ok(template) => template,
            Err(e) => {
                self.fail_load(&slot, &e);
                return Err(e);
            }
        };

        let predecessor = slot.lock().predecessor.take();
        if let Some(predecessor) = predecessor {
            if !predecessor.wait_retired(self.config.load_timeout) {
                let e = ProfileError::LoadTimeout(session);
                self.fail_load(&slot, &e);
                return Err(e);
            }
        }

        if slot.lock().cancelled {
            debug!(%session, "load cancelled before reading the backend");
            self.end_cancelled(&slot, None);
            return Err(ProfileError::LoadCancelled(session));
        }

        let key = self.profile_key(session);
        debug!(%session, key = %key, "loading profile");

        let profile = match self.claim(&key, template) {
            Ok(profile) => profile,
            Err(e) => {
                self.fail_load(&slot, &e);
                return Err(e);
            }
        };

        {
            let mut inner = slot.lock();
            if inner.cancelled {
                drop(inner);
                info!(%session, key = %key, "session released before load completed");
                self.end_cancelled(&slot, Some(&profile));
                return Err(ProfileError::LoadCancelled(session));
            }
            inner.state = SessionState::Active;
            inner.profile = Some(profile);
            self.signals.publish(ProfileEvent::Loaded { session });
            slot.notify(&mut inner);
        }

        info!(%session, key = %key, "profile loaded");
        let report = self.signals.fire(Signal::ProfileLoaded, session);
        if !report.is_clean() {
            warn!(%session, failed = report.failed.len(), "profileLoaded listeners failed");
        }

        Ok(ProfileRef::new(slot))
    }

    /// Finish a cancelled load: hand the session lock back if it was
    /// claimed, then retire and detach the slot.
    fn end_cancelled(&self, slot: &Arc<SessionSlot>, claimed: Option<&Profile>) {
        let session = slot.session();
        let _persist = slot.lock_persist();
        {
            let mut inner = slot.lock();
            inner.state = SessionState::Released;
            slot.notify(&mut inner);
        }

        if let Some(profile) = claimed {
            if let Err(e) = self.persist(profile, true) {
                error!(%session, error = %e, "failed to release cancelled profile");
            }
        }

        slot.retire();
        self.detach(slot);
        self.signals.publish(ProfileEvent::Released { session });
    }

    /// Read the stored record, take the session lock and merge the template.
    fn claim(&self, key: &str, template: &Template) -> Result<Profile> {
        let owner_id = &self.config.owner_id;
        let force = self.config.force_load;

        let stored = self.backend.update(key, &mut |current| match current {
            Some(mut stored) => {
                if let Some(owner) = &stored.owner {
                    if owner != owner_id {
                        if !force {
                            return Err(ProfileError::ProfileLocked {
                                key: key.to_string(),
                                owner: owner.clone(),
                            });
                        }
                        warn!(key, previous_owner = %owner, "taking over profile session lock");
                    }
                }
                stored.owner = Some(owner_id.clone());
                stored.meta.load_count += 1;
                Ok(stored)
            }
            None => Ok(StoredProfile {
                data: template.data.clone(),
                meta: ProfileMeta {
                    created: Timestamp::now(),
                    load_count: 1,
                    last_saved: None,
                },
                owner: Some(owner_id.clone()),
            }),
        })?;

        if !matches!(stored.data, Value::Map(_)) {
            return Err(ProfileError::InvalidFormat(format!(
                "stored profile '{}' is a {}, expected a map",
                key,
                stored.data.kind()
            )));
        }

        let mut profile = Profile::new(key, stored.data, stored.meta);
        let added = profile.reconcile(&template.data);
        if added > 0 {
            debug!(key, added, "filled missing template keys");
        }
        Ok(profile)
    }

    // --- Release ---

    /// Release a session's profile.
    ///
    /// Fires `beforeProfileReleasing` while the profile is still usable,
    /// waits for in-flight operations, persists with the session lock
    /// cleared, and detaches. Releasing a session that is still loading
    /// cancels the load. A load of the same session issued while the record
    /// is being written waits for the write.
    pub fn release(&self, session: SessionId) -> Result<()> {
        let slot = self.slot(session)?;

        {
            let mut inner = slot.lock();
            match inner.state {
                SessionState::Loading => {
                    inner.cancelled = true;
                    slot.notify(&mut inner);
                    debug!(%session, "release requested while loading");
                    return Ok(());
                }
                SessionState::Active => {
                    inner.state = SessionState::Releasing;
                    self.signals.publish(ProfileEvent::Releasing { session });
                }
                SessionState::Releasing | SessionState::Released => {
                    return Err(ProfileError::SessionNotActive(session));
                }
            }
        }

        let report = self.signals.fire(Signal::BeforeProfileReleasing, session);
        if !report.is_clean() {
            warn!(%session, failed = report.failed.len(), "beforeProfileReleasing listeners failed");
        }

        let _persist = slot.lock_persist();
        let profile = {
            let mut inner = slot.lock();
            inner.state = SessionState::Released;
            let profile = inner.profile.take();
            slot.notify(&mut inner);
            profile
        };

        // A reload reserved meanwhile waits for the slot to retire, so the
        // record is written back before anyone reads it again.
        let result = match &profile {
            Some(profile) => self.persist(profile, true).map(|_| ()),
            None => Ok(()),
        };
        slot.retire();
        self.detach(&slot);

        match &result {
            Ok(()) => info!(%session, "profile released"),
            Err(e) => error!(%session, error = %e, "failed to persist released profile"),
        }
        self.signals.publish(ProfileEvent::Released { session });
        result
    }

    /// Release every live session (server shutdown).
    pub fn release_all(&self) -> BatchReport {
        let sessions: Vec<SessionId> = self.sessions.read().keys().copied().collect();
        let mut report = BatchReport::default();
        for session in sessions {
            match self.release(session) {
                Ok(()) => report.succeeded.push(session),
                Err(e) => report.failed.push((session, e)),
            }
        }
        report
    }

    // --- Persistence ---

    /// Write a profile to the backend.
    ///
    /// Refuses to overwrite a record whose session lock was taken by another
    /// owner. With `release` the lock is cleared.
    fn persist(&self, profile: &Profile, release: bool) -> Result<ProfileMeta> {
        let owner_id = &self.config.owner_id;
        let key = profile.key();

        let stored = self.backend.update(key, &mut |current| {
            if let Some(owner) = current.as_ref().and_then(|c| c.owner.as_ref()) {
                if owner != owner_id {
                    return Err(ProfileError::ProfileLocked {
                        key: key.to_string(),
                        owner: owner.clone(),
                    });
                }
            }
            let mut meta = profile.meta().clone();
            meta.last_saved = Some(Timestamp::now());
            Ok(StoredProfile {
                data: profile.data().clone(),
                meta,
                owner: if release { None } else { Some(owner_id.clone()) },
            })
        })?;

        Ok(stored.meta)
    }

    /// Write a live session's profile through to the backend without
    /// releasing it.
    pub fn save(&self, session: SessionId) -> Result<()> {
        let slot = self.slot(session)?;
        let _persist = slot.lock_persist();

        let snapshot = {
            let inner = slot.lock();
            match &inner.profile {
                Some(profile) if inner.state.is_live() => profile.clone(),
                _ => return Err(ProfileError::SessionNotActive(session)),
            }
        };

        let meta = self.persist(&snapshot, false)?;

        let mut inner = slot.lock();
        if let Some(profile) = inner.profile.as_mut() {
            profile.meta_mut().last_saved = meta.last_saved;
        }
        debug!(%session, "profile saved");
        Ok(())
    }

    /// Save every active session.
    pub fn save_all(&self) -> BatchReport {
        let mut report = BatchReport::default();
        for session in self.active_sessions() {
            match self.save(session) {
                Ok(()) => report.succeeded.push(session),
                Err(e) => {
                    error!(%session, error = %e, "failed to save profile");
                    report.failed.push((session, e));
                }
            }
        }
        report
    }

    // --- Access ---

    /// The live profile of a session.
    pub fn get_profile(&self, session: SessionId) -> Result<ProfileRef> {
        let slot = self.slot(session)?;
        let live = slot.lock().state.is_live();
        if live {
            Ok(ProfileRef::new(slot))
        } else {
            Err(ProfileError::SessionNotActive(session))
        }
    }

    /// The profile of a session once it has loaded.
    ///
    /// Fails immediately with `SessionNotFound` when the session never
    /// started loading.
    pub fn get_profile_async(&self, session: SessionId) -> Result<PendingProfile> {
        let slot = self.slot(session)?;
        Ok(PendingProfile::new(slot, self.config.load_timeout))
    }

    /// Snapshot of a session's profile data.
    pub fn data(&self, session: SessionId) -> Result<Value> {
        self.get_profile(session)?.data()
    }

    /// Read the value at a path of a session's profile.
    pub fn get_value(&self, session: SessionId, path: impl IntoProfilePath) -> Result<Option<Value>> {
        let path = path.into_profile_path()?;
        let slot = self.slot(session)?;
        let inner = slot.lock();
        let value = match (&inner.profile, inner.state.is_live()) {
            (Some(profile), true) => profile.get(&path)?.cloned(),
            _ => return Err(ProfileError::SessionNotActive(session)),
        };
        Ok(value)
    }

    // --- Mutations ---

    /// Apply an operation to a session's profile and replicate the change.
    ///
    /// Changes are published while the session lock is held, so subscribers
    /// see a session's changes in the order they were applied.
    pub fn apply(&self, session: SessionId, operation: ProfileOperation) -> Result<Option<ProfileChange>> {
        let slot = self.slot(session)?;
        let mut inner = slot.lock();
        if !inner.state.is_live() {
            return Err(ProfileError::SessionNotActive(session));
        }
        let profile = inner
            .profile
            .as_mut()
            .ok_or(ProfileError::SessionNotActive(session))?;

        let change = profile.apply(&operation)?;
        if let Some(change) = &change {
            debug!(%session, action = ?change.action, path = %change.path, "profile changed");
            self.signals.publish(ProfileEvent::Changed {
                session,
                change: change.clone(),
            });
        }
        Ok(change)
    }

    /// Set a scalar value. Composite values must go through `add_table`.
    pub fn set(&self, session: SessionId, path: impl IntoProfilePath, value: impl Into<Value>) -> Result<()> {
        let path = path.into_profile_path()?;
        self.apply(
            session,
            ProfileOperation::Set {
                path,
                value: value.into(),
            },
        )?;
        Ok(())
    }

    /// Insert a list or map under `key` of the map at `path`, or append it
    /// to the list at `path` when no key is given. Returns the path the
    /// value was written to.
    pub fn add_table(
        &self,
        session: SessionId,
        path: impl IntoProfilePath,
        value: impl Into<Value>,
        key: Option<&str>,
    ) -> Result<ProfilePath> {
        let path = path.into_profile_path()?;
        let change = self.apply(
            session,
            ProfileOperation::AddTable {
                path: path.clone(),
                value: value.into(),
                key: key.map(str::to_string),
            },
        )?;
        Ok(change.map(|c| c.path).unwrap_or(path))
    }

    /// Add `delta` to the number at `path` (absent counts as zero).
    /// Returns the new value.
    pub fn increment(&self, session: SessionId, path: impl IntoProfilePath, delta: impl Into<Value>) -> Result<Value> {
        let path = path.into_profile_path()?;
        let change = self.apply(
            session,
            ProfileOperation::Increment {
                path: path.clone(),
                delta: delta.into(),
            },
        )?;
        change
            .and_then(|c| c.value)
            .ok_or_else(|| ProfileError::InvalidOperation(format!("increment of '{}' had no effect", path)))
    }

    /// Remove the value at `path`. Returns whether anything was removed.
    pub fn delete(&self, session: SessionId, path: impl IntoProfilePath) -> Result<bool> {
        let path = path.into_profile_path()?;
        let change = self.apply(session, ProfileOperation::Delete { path })?;
        Ok(change.is_some())
    }
}

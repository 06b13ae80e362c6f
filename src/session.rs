//! Per-session slots and the handles given out to callers.
//!
//! Each session owns one [`SessionSlot`]: a mutex around its state and
//! profile plus a condvar for blocking waiters and a waker list for async
//! ones. All operations on a session serialize on that mutex; nothing here
//! is shared between sessions.

use crate::error::{ProfileError, Result};
use crate::profile::Profile;
use crate::types::{ProfileMeta, SessionId, SessionState};
use crate::value::Value;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

pub(crate) struct SlotInner {
    pub(crate) state: SessionState,
    pub(crate) profile: Option<Profile>,
    /// Release was requested while the profile was still loading.
    pub(crate) cancelled: bool,
    /// Why loading failed, if it did.
    pub(crate) failure: Option<String>,
    /// The backend record is no longer held by this slot.
    pub(crate) retired: bool,
    /// Slot of the previous session with the same id, still releasing.
    pub(crate) predecessor: Option<Arc<SessionSlot>>,
    wakers: Vec<Waker>,
}

pub(crate) struct SessionSlot {
    session: SessionId,
    inner: Mutex<SlotInner>,
    changed: Condvar,
    /// Serializes backend writes for this session.
    persist: Mutex<()>,
}

impl SessionSlot {
    pub(crate) fn loading(session: SessionId) -> Self {
        Self::following(session, None)
    }

    /// A loading slot that must wait for `predecessor` to retire before it
    /// touches the backend.
    pub(crate) fn following(session: SessionId, predecessor: Option<Arc<SessionSlot>>) -> Self {
        Self {
            session,
            inner: Mutex::new(SlotInner {
                state: SessionState::Loading,
                profile: None,
                cancelled: false,
                failure: None,
                retired: false,
                predecessor,
                wakers: Vec::new(),
            }),
            changed: Condvar::new(),
            persist: Mutex::new(()),
        }
    }

    pub(crate) fn session(&self) -> SessionId {
        self.session
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner.lock()
    }

    pub(crate) fn lock_persist(&self) -> MutexGuard<'_, ()> {
        self.persist.lock()
    }

    /// Wake every blocking and async waiter. Call after changing state,
    /// with the guard already dropped or about to be.
    pub(crate) fn notify(&self, inner: &mut SlotInner) {
        for waker in inner.wakers.drain(..) {
            waker.wake();
        }
        self.changed.notify_all();
    }

    /// Whether a new load must replace this slot rather than join it:
    /// the slot is released or its load was cancelled.
    pub(crate) fn is_ending(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == SessionState::Released || (inner.state == SessionState::Loading && inner.cancelled)
    }

    /// Mark the backend record as handed back and wake waiters.
    pub(crate) fn retire(&self) {
        let mut inner = self.inner.lock();
        inner.retired = true;
        self.notify(&mut inner);
    }

    /// Block until the slot is retired or `timeout` expires. Returns whether
    /// it retired.
    pub(crate) fn wait_retired(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while !inner.retired {
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                return inner.retired;
            }
        }
        true
    }

    /// What a waiter should return given the current state, or None to keep
    /// waiting.
    fn outcome(&self, inner: &SlotInner, accept_releasing: bool) -> Option<Result<()>> {
        if let Some(reason) = &inner.failure {
            return Some(Err(ProfileError::LoadFailed {
                session: self.session,
                reason: reason.clone(),
            }));
        }
        match inner.state {
            SessionState::Loading if inner.cancelled => {
                Some(Err(ProfileError::LoadCancelled(self.session)))
            }
            SessionState::Loading => None,
            SessionState::Active => Some(Ok(())),
            SessionState::Releasing if accept_releasing => Some(Ok(())),
            SessionState::Releasing => Some(Err(ProfileError::SessionNotActive(self.session))),
            SessionState::Released if inner.cancelled => {
                Some(Err(ProfileError::LoadCancelled(self.session)))
            }
            SessionState::Released => Some(Err(ProfileError::SessionNotActive(self.session))),
        }
    }

    /// Block until loading finishes, is cancelled, or `timeout` expires.
    pub(crate) fn wait_loaded(
        self: &Arc<Self>,
        timeout: Duration,
        accept_releasing: bool,
    ) -> Result<ProfileRef> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(outcome) = self.outcome(&inner, accept_releasing) {
                return outcome.map(|()| ProfileRef::new(Arc::clone(self)));
            }
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                return match self.outcome(&inner, accept_releasing) {
                    Some(outcome) => outcome.map(|()| ProfileRef::new(Arc::clone(self))),
                    None => Err(ProfileError::LoadTimeout(self.session)),
                };
            }
        }
    }
}

/// Handle to a session's live profile.
///
/// Handles stay valid after release but every access then fails with
/// `SessionNotActive`. Two handles for the same loaded session compare equal
/// under [`ProfileRef::ptr_eq`].
#[derive(Clone)]
pub struct ProfileRef {
    slot: Arc<SessionSlot>,
}

impl ProfileRef {
    pub(crate) fn new(slot: Arc<SessionSlot>) -> Self {
        Self { slot }
    }

    pub fn session(&self) -> SessionId {
        self.slot.session()
    }

    pub fn state(&self) -> SessionState {
        self.slot.lock().state
    }

    /// True while reads and writes are accepted.
    pub fn is_active(&self) -> bool {
        self.state().is_live()
    }

    /// Whether both handles point at the same profile instance.
    pub fn ptr_eq(a: &ProfileRef, b: &ProfileRef) -> bool {
        Arc::ptr_eq(&a.slot, &b.slot)
    }

    /// Run `f` against the profile while holding the session lock.
    ///
    /// `f` must not call back into the store for the same session.
    pub fn with<R>(&self, f: impl FnOnce(&Profile) -> R) -> Result<R> {
        let inner = self.slot.lock();
        match &inner.profile {
            Some(profile) if inner.state.is_live() => Ok(f(profile)),
            _ => Err(ProfileError::SessionNotActive(self.session())),
        }
    }

    /// Snapshot of the profile data.
    pub fn data(&self) -> Result<Value> {
        self.with(|profile| profile.data().clone())
    }

    pub fn meta(&self) -> Result<ProfileMeta> {
        self.with(|profile| profile.meta().clone())
    }

    /// Key of the profile in the backing store.
    pub fn key(&self) -> Result<String> {
        self.with(|profile| profile.key().to_string())
    }
}

impl std::fmt::Debug for ProfileRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileRef")
            .field("session", &self.session())
            .finish()
    }
}

/// A profile that may still be loading.
///
/// Resolves once the session's load completes. Poll it as a [`Future`] or
/// block on it with [`PendingProfile::wait`]. Releasing the session before
/// loading finishes resolves it with `LoadCancelled`, so an abandoned load
/// never leaves a waiter hanging.
pub struct PendingProfile {
    slot: Arc<SessionSlot>,
    timeout: Duration,
}

impl PendingProfile {
    pub(crate) fn new(slot: Arc<SessionSlot>, timeout: Duration) -> Self {
        Self { slot, timeout }
    }

    pub fn session(&self) -> SessionId {
        self.slot.session()
    }

    /// Block until loaded, using the store's configured load timeout.
    pub fn wait(self) -> Result<ProfileRef> {
        let timeout = self.timeout;
        self.wait_timeout(timeout)
    }

    /// Block until loaded or `timeout` expires.
    pub fn wait_timeout(self, timeout: Duration) -> Result<ProfileRef> {
        self.slot.wait_loaded(timeout, true)
    }
}

impl Future for PendingProfile {
    type Output = Result<ProfileRef>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.slot.lock();
        if let Some(outcome) = self.slot.outcome(&inner, true) {
            return Poll::Ready(outcome.map(|()| ProfileRef::new(Arc::clone(&self.slot))));
        }
        if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            inner.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

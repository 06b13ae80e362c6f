//! Signal and subscription types.

use crate::profile::ProfileChange;
use crate::types::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two lifecycle signals listeners can connect to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Fires once a session's profile is loaded and active.
    ProfileLoaded,
    /// Fires before a session's profile is persisted and released. The
    /// profile is still readable and writable while listeners run.
    BeforeProfileReleasing,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::ProfileLoaded => f.write_str("profileLoaded"),
            Signal::BeforeProfileReleasing => f.write_str("beforeProfileReleasing"),
        }
    }
}

/// Identifies a connected listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

/// Outcome of dispatching a signal to its listeners.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners that returned normally.
    pub delivered: usize,
    /// Listeners that panicked, with the panic message.
    pub failed: Vec<(ListenerId, String)>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Configuration for a replication subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: SubscriptionFilter::all(),
        }
    }
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Only these sessions (None = every session).
    pub sessions: Option<Vec<SessionId>>,

    /// Include loaded/releasing/released events.
    pub include_lifecycle: bool,

    /// Include data change events.
    pub include_changes: bool,
}

impl SubscriptionFilter {
    /// Everything, for every session.
    pub fn all() -> Self {
        Self {
            sessions: None,
            include_lifecycle: true,
            include_changes: true,
        }
    }

    /// Data changes only.
    pub fn changes() -> Self {
        Self {
            include_changes: true,
            ..Default::default()
        }
    }

    /// Lifecycle events only.
    pub fn lifecycle() -> Self {
        Self {
            include_lifecycle: true,
            ..Default::default()
        }
    }

    /// Everything about the given sessions.
    pub fn sessions(sessions: Vec<SessionId>) -> Self {
        Self {
            sessions: Some(sessions),
            ..Self::all()
        }
    }

    pub(crate) fn matches(&self, event: &ProfileEvent) -> bool {
        let wanted = match event {
            ProfileEvent::Changed { .. } => self.include_changes,
            ProfileEvent::Loaded { .. }
            | ProfileEvent::Releasing { .. }
            | ProfileEvent::Released { .. } => self.include_lifecycle,
            ProfileEvent::Dropped { .. } => true,
        };
        if !wanted {
            return false;
        }

        match (&self.sessions, event.session()) {
            (Some(sessions), Some(session)) => sessions.contains(&session),
            _ => true,
        }
    }
}

/// Events delivered to replication subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProfileEvent {
    /// A session's profile finished loading.
    Loaded { session: SessionId },

    /// A session's profile is about to be released.
    Releasing { session: SessionId },

    /// A session's profile was persisted and detached.
    Released { session: SessionId },

    /// A mutation was applied to a session's profile.
    Changed {
        session: SessionId,
        change: ProfileChange,
    },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

impl ProfileEvent {
    pub fn session(&self) -> Option<SessionId> {
        match self {
            ProfileEvent::Loaded { session }
            | ProfileEvent::Releasing { session }
            | ProfileEvent::Released { session }
            | ProfileEvent::Changed { session, .. } => Some(*session),
            ProfileEvent::Dropped { .. } => None,
        }
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to receive replication events.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<ProfileEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<ProfileEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<ProfileEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<ProfileEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain every event currently buffered.
    pub fn drain(&self) -> Vec<ProfileEvent> {
        self.receiver.try_iter().collect()
    }
}

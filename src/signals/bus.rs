//! Signal bus: lifecycle listeners and replication subscriptions.

use crate::types::SessionId;
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

use super::types::{
    DispatchReport, DropReason, ListenerId, ProfileEvent, Signal, SubscriptionConfig,
    SubscriptionHandle, SubscriptionId,
};

type Listener = Arc<dyn Fn(SessionId) + Send + Sync>;

struct ListenerEntry {
    id: ListenerId,
    signal: Signal,
    callback: Listener,
}

/// Internal subscription state.
struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<ProfileEvent>,
}

impl Subscription {
    /// Try to send an event. Returns false if buffer is full (subscriber will be dropped).
    fn try_send(&self, event: ProfileEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(crossbeam_channel::TrySendError::Full(_)) => false,
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Delivers lifecycle signals to listeners and profile events to
/// subscribers.
///
/// Listeners are callbacks run synchronously in registration order; a
/// panicking listener is isolated and reported without stopping the rest.
/// Subscribers receive events over bounded channels and are dropped when
/// they fall behind.
pub struct SignalBus {
    /// Connected listeners, in registration order.
    listeners: RwLock<Vec<ListenerEntry>>,
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for listener and subscription IDs.
    next_id: AtomicU64,
}

impl SignalBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    // --- Listeners ---

    /// Connect a listener to a signal.
    pub fn connect<F>(&self, signal: Signal, callback: F) -> ListenerId
    where
        F: Fn(SessionId) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id());
        self.listeners.write().push(ListenerEntry {
            id,
            signal,
            callback: Arc::new(callback),
        });
        id
    }

    pub fn connect_profile_loaded<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(SessionId) + Send + Sync + 'static,
    {
        self.connect(Signal::ProfileLoaded, callback)
    }

    pub fn connect_before_releasing<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(SessionId) + Send + Sync + 'static,
    {
        self.connect(Signal::BeforeProfileReleasing, callback)
    }

    /// Disconnect a listener. Returns whether it was connected.
    pub fn disconnect(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self, signal: Signal) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|entry| entry.signal == signal)
            .count()
    }

    /// Run every listener of `signal` for `session`.
    ///
    /// Listeners run without any bus lock held, so they may connect or
    /// disconnect listeners themselves; such changes apply from the next
    /// dispatch.
    pub fn fire(&self, signal: Signal, session: SessionId) -> DispatchReport {
        let targets: Vec<(ListenerId, Listener)> = self
            .listeners
            .read()
            .iter()
            .filter(|entry| entry.signal == signal)
            .map(|entry| (entry.id, Arc::clone(&entry.callback)))
            .collect();

        let mut report = DispatchReport::default();
        for (id, callback) in targets {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(session))) {
                Ok(()) => report.delivered += 1,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(%signal, %session, listener = id.0, %message, "listener panicked");
                    report.failed.push((id, message));
                }
            }
        }
        report
    }

    // --- Subscriptions ---

    /// Create a new replication subscription.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id());
        let (sender, receiver) = bounded(config.buffer_size);

        self.subscriptions
            .write()
            .insert(id, Subscription { config, sender });

        SubscriptionHandle { id, receiver }
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            // Send dropped event (best effort)
            let _ = sub.sender.try_send(ProfileEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Broadcast an event to matching subscriptions. Drops subscribers that
    /// fail to receive.
    pub fn publish(&self, event: ProfileEvent) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if sub.config.filter.matches(&event) && !sub.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        // Remove dropped subscriptions
        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    // Try to notify about the drop (might fail, that's ok)
                    let _ = sub.sender.try_send(ProfileEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

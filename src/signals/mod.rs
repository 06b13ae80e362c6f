//! Profile signals and replication subscriptions.
//!
//! Two kinds of consumers are supported:
//! - Listeners connected to the `profileLoaded` and `beforeProfileReleasing`
//!   signals, run synchronously in registration order
//! - Subscriptions receiving [`ProfileEvent`]s (lifecycle plus every applied
//!   change) over bounded channels
//!
//! # Example
//!
//! ```ignore
//! let bus = SignalBus::new();
//!
//! bus.connect_profile_loaded(|session| println!("{session} is ready"));
//!
//! let handle = bus.subscribe(SubscriptionConfig {
//!     filter: SubscriptionFilter::changes(),
//!     ..Default::default()
//! });
//! while let Ok(ProfileEvent::Changed { session, change }) = handle.recv() {
//!     println!("{session}: {} = {:?}", change.path, change.value);
//! }
//! ```

mod bus;
mod types;

pub use bus::SignalBus;
pub use types::{
    DispatchReport, DropReason, ListenerId, ProfileEvent, Signal, SubscriptionConfig,
    SubscriptionFilter, SubscriptionHandle, SubscriptionId,
};

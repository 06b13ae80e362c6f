//! # Profile Replication
//!
//! Session-scoped player profiles: loaded when an entity connects, mutated
//! through dot-separated paths while it is connected, persisted and released
//! when it leaves.
//!
//! ## Core Concepts
//!
//! - **Values**: Tagged tree of scalars, lists and string-keyed maps
//! - **Paths**: `"inventory.weapons.1"` style addresses into a profile
//! - **Sessions**: One profile per connected entity, with a load/release lifecycle
//! - **Signals**: `profileLoaded` / `beforeProfileReleasing` listeners plus a
//!   change stream for replication
//!
//! ## Example
//!
//! ```ignore
//! use profile_replication::{ProfileReplication, ProfileStoreConfig, SessionEvent, SessionId, Value};
//! use serde_json::json;
//!
//! let replication = ProfileReplication::in_memory(ProfileStoreConfig::default());
//! replication.init("PlayerData", Value::from_json(json!({"gold": 0, "items": []}))?)?;
//!
//! let player = SessionId(1);
//! replication.handle_event(SessionEvent::Connected(player))?;
//!
//! replication.increment(player, "gold", 10)?;
//! replication.add_table(player, "items", Value::from_json(json!({"name": "sword"}))?, None)?;
//! replication.set(player, "items.0.name", "axe")?;
//!
//! replication.handle_event(SessionEvent::Disconnecting(player))?;
//! ```

pub mod backend;
pub mod error;
pub mod path;
pub mod profile;
pub mod replication;
pub mod session;
pub mod signals;
pub mod store;
pub mod types;
pub mod value;

// Re-exports
pub use backend::{FileBackend, MemoryBackend, ProfileBackend, StoredProfile};
pub use error::{ProfileError, Result};
pub use path::{IntoProfilePath, ProfilePath, Segment};
pub use profile::{apply_operation, reconcile, ChangeAction, Profile, ProfileChange, ProfileOperation};
pub use replication::{ProfileReplication, ReplicationWorker, SessionEvent};
pub use session::{PendingProfile, ProfileRef};
pub use signals::{
    DispatchReport, DropReason, ListenerId, ProfileEvent, Signal, SignalBus, SubscriptionConfig,
    SubscriptionFilter, SubscriptionHandle, SubscriptionId,
};
pub use store::{BatchReport, ProfileStore, ProfileStoreConfig};
pub use types::*;
pub use value::{Scalar, Value, ValueKind};

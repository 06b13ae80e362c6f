//! Backing stores for profiles.
//!
//! The profile store only crosses this boundary on load, save and release.
//! Every write is a read-modify-write through [`ProfileBackend::update`] so
//! that session ownership can be claimed and checked atomically.

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use crate::error::Result;
use crate::types::ProfileMeta;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A profile as persisted in a backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredProfile {
    pub data: Value,

    pub meta: ProfileMeta,

    /// Server currently holding the session lock, if any.
    #[serde(default)]
    pub owner: Option<String>,
}

/// Transform applied inside [`ProfileBackend::update`].
///
/// Receives the current record (None if the key was never written). An
/// error aborts the update and nothing is written.
pub type UpdateFn<'a> = dyn FnMut(Option<StoredProfile>) -> Result<StoredProfile> + 'a;

/// Key-value persistence for profiles.
pub trait ProfileBackend: Send + Sync {
    /// Read the stored record for a key.
    fn read(&self, key: &str) -> Result<Option<StoredProfile>>;

    /// Atomically read, transform and write the record for a key.
    fn update(&self, key: &str, transform: &mut UpdateFn<'_>) -> Result<StoredProfile>;

    /// Delete the record for a key. Returns whether it existed.
    fn remove(&self, key: &str) -> Result<bool>;
}

//! In-process backend.

use super::{ProfileBackend, StoredProfile, UpdateFn};
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Backend holding profiles in memory. Useful for tests and for hosts that
/// persist elsewhere.
#[derive(Default)]
pub struct MemoryBackend {
    profiles: Mutex<HashMap<String, StoredProfile>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored profiles.
    pub fn len(&self) -> usize {
        self.profiles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.lock().is_empty()
    }

    /// Seed or overwrite a record directly.
    pub fn insert(&self, key: impl Into<String>, profile: StoredProfile) {
        self.profiles.lock().insert(key.into(), profile);
    }
}

impl ProfileBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<StoredProfile>> {
        Ok(self.profiles.lock().get(key).cloned())
    }

    fn update(&self, key: &str, transform: &mut UpdateFn<'_>) -> Result<StoredProfile> {
        let mut profiles = self.profiles.lock();
        let updated = transform(profiles.get(key).cloned())?;
        profiles.insert(key.to_string(), updated.clone());
        Ok(updated)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.profiles.lock().remove(key).is_some())
    }
}

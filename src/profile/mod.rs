//! Per-session profile records.
//!
//! A [`Profile`] is the live copy of one player's data while their session
//! is open. All mutations go through [`ProfileOperation`]s so that every
//! change can be replicated exactly as it was applied.

mod operations;

pub use operations::{apply_operation, reconcile, ChangeAction, ProfileChange, ProfileOperation};

use crate::error::Result;
use crate::path::{self, ProfilePath};
use crate::types::ProfileMeta;
use crate::value::Value;

/// A loaded profile.
#[derive(Clone, Debug, PartialEq)]
pub struct Profile {
    key: String,
    data: Value,
    meta: ProfileMeta,
}

impl Profile {
    pub(crate) fn new(key: impl Into<String>, data: Value, meta: ProfileMeta) -> Self {
        Self {
            key: key.into(),
            data,
            meta,
        }
    }

    /// Key of this profile in the backing store.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn meta(&self) -> &ProfileMeta {
        &self.meta
    }

    pub(crate) fn meta_mut(&mut self) -> &mut ProfileMeta {
        &mut self.meta
    }

    /// Read the value at a path.
    pub fn get(&self, path: &ProfilePath) -> Result<Option<&Value>> {
        path::get(&self.data, path)
    }

    /// Apply a mutation, returning the change to replicate.
    pub fn apply(&mut self, operation: &ProfileOperation) -> Result<Option<ProfileChange>> {
        apply_operation(&mut self.data, operation)
    }

    /// Fill keys missing from the data with template defaults.
    pub fn reconcile(&mut self, template: &Value) -> usize {
        reconcile(&mut self.data, template)
    }
}

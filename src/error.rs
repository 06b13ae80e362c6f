//! Error types for the profile store.

use crate::types::SessionId;
use thiserror::Error;

/// Main error type for profile operations.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Type mismatch at '{path}': expected {expected}, got {got}")]
    TypeMismatch {
        path: String,
        expected: String,
        got: String,
    },

    #[error("Session not active: {0}")]
    SessionNotActive(SessionId),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Profile store already initialized with template '{0}'")]
    AlreadyInitialized(String),

    #[error("Profile store not initialized")]
    NotInitialized,

    #[error("Replication already started")]
    AlreadyStarted,

    #[error("Profile {key} is owned by another session ({owner})")]
    ProfileLocked { key: String, owner: String },

    #[error("Timed out waiting for profile of session {0} to load")]
    LoadTimeout(SessionId),

    #[error("Loading of session {0} was cancelled")]
    LoadCancelled(SessionId),

    #[error("Loading of session {session} failed: {reason}")]
    LoadFailed { session: SessionId, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid profile format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl ProfileError {
    pub(crate) fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        ProfileError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn type_mismatch(
        path: impl Into<String>,
        expected: impl Into<String>,
        got: impl Into<String>,
    ) -> Self {
        ProfileError::TypeMismatch {
            path: path.into(),
            expected: expected.into(),
            got: got.into(),
        }
    }
}

impl From<serde_json::Error> for ProfileError {
    fn from(e: serde_json::Error) -> Self {
        ProfileError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for ProfileError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ProfileError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ProfileError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        ProfileError::Deserialization(e.to_string())
    }
}

/// Result type for profile operations.
pub type Result<T> = std::result::Result<T, ProfileError>;

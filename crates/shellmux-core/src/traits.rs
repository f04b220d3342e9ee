//! Shared identifiers and storage errors.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Session identifier.
pub type SessionId = Uuid;

/// Screen (tab) identifier.
pub type ScreenId = Uuid;

/// Line identifier.
pub type LineId = Uuid;

/// Remote identifier.
pub type RemoteId = Uuid;

/// Reference to a remote as used by a screen.
///
/// `name` distinguishes several independent shells on the same remote
/// (empty for the default one).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemotePtr {
    pub remote_id: RemoteId,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl RemotePtr {
    /// Pointer to the default (unnamed) shell of a remote.
    #[must_use]
    pub const fn new(remote_id: RemoteId) -> Self {
        Self {
            remote_id,
            name: String::new(),
        }
    }

    /// Pointer to a named shell of a remote.
    #[must_use]
    pub fn named(remote_id: RemoteId, name: impl Into<String>) -> Self {
        Self {
            remote_id,
            name: name.into(),
        }
    }
}

impl fmt::Display for RemotePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.remote_id)
        } else {
            write!(f, "{}:{}", self.remote_id, self.name)
        }
    }
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("Storage error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Build a not-found error for a record kind.
    pub fn not_found(kind: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_ptr_display() {
        let id = Uuid::new_v4();
        assert_eq!(RemotePtr::new(id).to_string(), id.to_string());
        assert_eq!(RemotePtr::named(id, "build").to_string(), format!("{id}:build"));
    }

    #[test]
    fn test_remote_ptr_serde_skips_empty_name() {
        let ptr = RemotePtr::new(Uuid::nil());
        let json = serde_json::to_string(&ptr).unwrap();
        assert!(!json.contains("name"));
        let parsed: RemotePtr = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ptr);
    }
}

//! Pointers addressing a stored shell state.

use serde::{Deserialize, Serialize};

use crate::{
    error::StateError,
    hash::{BaseHash, DiffHash},
};

/// A base snapshot plus at most one diff applied on top of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawStatePtr", into = "RawStatePtr")]
pub struct StatePtr {
    pub base_hash: BaseHash,
    pub diff_hash: Option<DiffHash>,
}

impl StatePtr {
    /// Pointer to a base snapshot with no diff.
    #[must_use]
    pub fn base(base_hash: BaseHash) -> Self {
        Self {
            base_hash,
            diff_hash: None,
        }
    }

    /// Pointer to `base_hash` with `diff_hash` applied.
    #[must_use]
    pub fn with_diff(base_hash: BaseHash, diff_hash: DiffHash) -> Self {
        Self {
            base_hash,
            diff_hash: Some(diff_hash),
        }
    }

    /// Whether the pointer addresses a base snapshot exactly.
    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.diff_hash.is_none()
    }
}

/// Persisted pointer shape: a base hash and a list of diff hashes.
///
/// Only lists of zero or one diff convert to a [`StatePtr`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStatePtr {
    pub base_hash: String,
    #[serde(default)]
    pub diff_hash_arr: Vec<String>,
}

impl TryFrom<RawStatePtr> for StatePtr {
    type Error = StateError;

    fn try_from(raw: RawStatePtr) -> Result<Self, Self::Error> {
        let RawStatePtr {
            base_hash,
            mut diff_hash_arr,
        } = raw;
        if diff_hash_arr.len() > 1 {
            return Err(StateError::InvalidStatePtr(diff_hash_arr.len()));
        }
        Ok(Self {
            base_hash: BaseHash::from_string(base_hash),
            diff_hash: diff_hash_arr.pop().map(DiffHash::from_string),
        })
    }
}

impl From<StatePtr> for RawStatePtr {
    fn from(ptr: StatePtr) -> Self {
        Self {
            base_hash: ptr.base_hash.as_str().to_string(),
            diff_hash_arr: ptr
                .diff_hash
                .map(|diff| vec![diff.as_str().to_string()])
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persisted_shape() {
        let ptr = StatePtr::with_diff(BaseHash::from_string("b"), DiffHash::from_string("d"));
        let json = serde_json::to_value(&ptr).unwrap();
        assert_eq!(json, serde_json::json!({"baseHash": "b", "diffHashArr": ["d"]}));

        let back: StatePtr = serde_json::from_value(json).unwrap();
        assert_eq!(back, ptr);
    }

    #[test]
    fn test_missing_diff_list_is_flat() {
        let ptr: StatePtr = serde_json::from_str(r#"{"baseHash": "b"}"#).unwrap();
        assert!(ptr.is_flat());
        assert_eq!(ptr.base_hash.as_str(), "b");
    }

    #[test]
    fn test_two_diffs_rejected() {
        let raw = RawStatePtr {
            base_hash: "b".into(),
            diff_hash_arr: vec!["d1".into(), "d2".into()],
        };
        let err = StatePtr::try_from(raw.clone()).unwrap_err();
        assert!(matches!(err, StateError::InvalidStatePtr(2)));

        let json = serde_json::to_string(&raw).unwrap();
        assert!(serde_json::from_str::<StatePtr>(&json).is_err());
    }
}

//! Content-addressed persistence of shell states and diffs.

use std::sync::Arc;

use async_trait::async_trait;
use shellmux_core::StorageError;

use crate::{
    error::StateError,
    hash::{BaseHash, DiffHash},
    ptr::{RawStatePtr, StatePtr},
    state::{ShellState, StateDiff},
};

/// Blob storage for encoded states and diffs.
///
/// Writes are idempotent: storing the same hash twice keeps one copy.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store an encoded [`ShellState`].
    async fn put_base(&self, hash: &BaseHash, data: Vec<u8>) -> Result<(), StorageError>;

    /// Load an encoded [`ShellState`].
    async fn get_base(&self, hash: &BaseHash) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store an encoded [`StateDiff`] made against `base`.
    async fn put_diff(
        &self,
        hash: &DiffHash,
        base: &BaseHash,
        data: Vec<u8>,
    ) -> Result<(), StorageError>;

    /// Load an encoded [`StateDiff`].
    async fn get_diff(&self, hash: &DiffHash) -> Result<Option<Vec<u8>>, StorageError>;
}

/// Typed access to shell states in a [`BlobStore`].
pub struct StateStore<B: BlobStore> {
    blobs: Arc<B>,
}

impl<B: BlobStore> Clone for StateStore<B> {
    fn clone(&self) -> Self {
        Self {
            blobs: Arc::clone(&self.blobs),
        }
    }
}

impl<B: BlobStore> StateStore<B> {
    /// Wrap a blob store.
    #[must_use]
    pub fn new(blobs: Arc<B>) -> Self {
        Self { blobs }
    }

    /// Underlying blob store.
    #[must_use]
    pub fn blobs(&self) -> &Arc<B> {
        &self.blobs
    }

    /// Persist a full state.
    ///
    /// # Errors
    /// Returns error if the blob store fails.
    pub async fn store_base(&self, state: &ShellState) -> Result<BaseHash, StateError> {
        let (hash, data) = state.encode_and_hash();
        tracing::debug!(%hash, size = data.len(), "storing shell state");
        self.blobs.put_base(&hash, data).await?;
        Ok(hash)
    }

    /// Persist a diff.
    ///
    /// # Errors
    /// Returns [`StateError::BaseNotFound`] if the diff's base is not stored.
    pub async fn store_diff(&self, diff: &StateDiff) -> Result<DiffHash, StateError> {
        if self.blobs.get_base(&diff.base_hash).await?.is_none() {
            return Err(StateError::BaseNotFound(diff.base_hash.clone()));
        }
        let (hash, data) = diff.encode_and_hash();
        tracing::debug!(%hash, base = %diff.base_hash, size = data.len(), "storing shell state diff");
        self.blobs.put_diff(&hash, &diff.base_hash, data).await?;
        Ok(hash)
    }

    /// Load a full state.
    ///
    /// # Errors
    /// Returns [`StateError::BaseNotFound`] for an unknown hash.
    pub async fn get_base(&self, hash: &BaseHash) -> Result<ShellState, StateError> {
        let data = self
            .blobs
            .get_base(hash)
            .await?
            .ok_or_else(|| StateError::BaseNotFound(hash.clone()))?;
        ShellState::decode(&data)
    }

    /// Load a diff.
    ///
    /// # Errors
    /// Returns [`StateError::DiffNotFound`] for an unknown hash.
    pub async fn get_diff(&self, hash: &DiffHash) -> Result<StateDiff, StateError> {
        let data = self
            .blobs
            .get_diff(hash)
            .await?
            .ok_or_else(|| StateError::DiffNotFound(hash.clone()))?;
        StateDiff::decode(&data)
    }

    /// Materialize the state a pointer addresses.
    ///
    /// # Errors
    /// Returns error if either hash is unknown or the diff does not apply.
    pub async fn resolve(&self, ptr: &StatePtr) -> Result<ShellState, StateError> {
        let base = self.get_base(&ptr.base_hash).await?;
        match &ptr.diff_hash {
            None => Ok(base),
            Some(diff_hash) => self.get_diff(diff_hash).await?.apply(&base),
        }
    }

    /// Materialize a persisted pointer.
    ///
    /// # Errors
    /// Returns [`StateError::InvalidStatePtr`] if it carries more than one diff.
    pub async fn resolve_raw(&self, raw: &RawStatePtr) -> Result<ShellState, StateError> {
        let ptr = StatePtr::try_from(raw.clone())?;
        self.resolve(&ptr).await
    }

    /// Encoded size of a stored state.
    ///
    /// # Errors
    /// Returns [`StateError::BaseNotFound`] for an unknown hash.
    pub async fn base_size(&self, hash: &BaseHash) -> Result<usize, StateError> {
        self.blobs
            .get_base(hash)
            .await?
            .map(|data| data.len())
            .ok_or_else(|| StateError::BaseNotFound(hash.clone()))
    }

    /// Encoded size of a stored diff.
    ///
    /// # Errors
    /// Returns [`StateError::DiffNotFound`] for an unknown hash.
    pub async fn diff_size(&self, hash: &DiffHash) -> Result<usize, StateError> {
        self.blobs
            .get_diff(hash)
            .await?
            .map(|data| data.len())
            .ok_or_else(|| StateError::DiffNotFound(hash.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{BTreeMap, HashMap},
        sync::Mutex,
    };

    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[derive(Default)]
    struct Blobs {
        bases: Mutex<HashMap<BaseHash, Vec<u8>>>,
        diffs: Mutex<HashMap<DiffHash, Vec<u8>>>,
    }

    #[async_trait]
    impl BlobStore for Blobs {
        async fn put_base(&self, hash: &BaseHash, data: Vec<u8>) -> Result<(), StorageError> {
            self.bases.lock().unwrap().insert(hash.clone(), data);
            Ok(())
        }

        async fn get_base(&self, hash: &BaseHash) -> Result<Option<Vec<u8>>, StorageError> {
            Ok(self.bases.lock().unwrap().get(hash).cloned())
        }

        async fn put_diff(
            &self,
            hash: &DiffHash,
            _base: &BaseHash,
            data: Vec<u8>,
        ) -> Result<(), StorageError> {
            self.diffs.lock().unwrap().insert(hash.clone(), data);
            Ok(())
        }

        async fn get_diff(&self, hash: &DiffHash) -> Result<Option<Vec<u8>>, StorageError> {
            Ok(self.diffs.lock().unwrap().get(hash).cloned())
        }
    }

    fn store() -> StateStore<Blobs> {
        StateStore::new(Arc::new(Blobs::default()))
    }

    fn state(cwd: &str) -> ShellState {
        ShellState {
            version: "bash v5.1.16".into(),
            cwd: cwd.into(),
            vars: BTreeMap::from([("HOME".to_string(), "/home/user".to_string())]),
            ..ShellState::default()
        }
    }

    #[tokio::test]
    async fn test_resolve_base_and_diff() {
        let store = store();
        let base = state("~");
        let updated = state("/tmp");

        let base_hash = assert_ok!(store.store_base(&base).await);
        assert_eq!(base_hash, base.hash());
        let diff_hash = assert_ok!(store.store_diff(&StateDiff::make(&base, &updated)).await);

        let flat = assert_ok!(store.resolve(&StatePtr::base(base_hash.clone())).await);
        assert_eq!(flat, base);
        let applied = assert_ok!(store.resolve(&StatePtr::with_diff(base_hash, diff_hash)).await);
        assert_eq!(applied, updated);
    }

    #[tokio::test]
    async fn test_identical_states_share_one_blob() {
        let store = store();
        let first = assert_ok!(store.store_base(&state("~")).await);
        let second = assert_ok!(store.store_base(&state("~")).await);
        assert_eq!(first, second);
        assert_eq!(store.blobs().bases.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_hashes() {
        let store = store();
        let base_hash = assert_ok!(store.store_base(&state("~")).await);

        let missing = BaseHash::from_string("nope");
        let err = assert_err!(store.resolve(&StatePtr::base(missing)).await);
        assert!(matches!(err, StateError::BaseNotFound(_)));

        let ptr = StatePtr::with_diff(base_hash, DiffHash::from_string("nope"));
        let err = assert_err!(store.resolve(&ptr).await);
        assert!(matches!(err, StateError::DiffNotFound(_)));
    }

    #[tokio::test]
    async fn test_two_diffs_is_invalid() {
        let store = store();
        let base = state("~");
        let base_hash = assert_ok!(store.store_base(&base).await);
        let d1 = assert_ok!(store.store_diff(&StateDiff::make(&base, &state("/a"))).await);
        let d2 = assert_ok!(store.store_diff(&StateDiff::make(&base, &state("/b"))).await);

        let raw = RawStatePtr {
            base_hash: base_hash.to_string(),
            diff_hash_arr: vec![d1.to_string(), d2.to_string()],
        };
        let err = assert_err!(store.resolve_raw(&raw).await);
        assert!(matches!(err, StateError::InvalidStatePtr(2)));

        let raw = RawStatePtr {
            base_hash: base_hash.to_string(),
            diff_hash_arr: vec![d1.to_string()],
        };
        assert_eq!(assert_ok!(store.resolve_raw(&raw).await).cwd, "/a");
    }

    #[tokio::test]
    async fn test_diff_requires_stored_base() {
        let store = store();
        let diff = StateDiff::make(&state("~"), &state("/tmp"));
        let err = assert_err!(store.store_diff(&diff).await);
        assert!(matches!(err, StateError::BaseNotFound(_)));
    }

    #[tokio::test]
    async fn test_sizes() {
        let store = store();
        let base = state("~");
        let base_hash = assert_ok!(store.store_base(&base).await);
        let diff = StateDiff::make(&base, &state("/tmp"));
        let diff_hash = assert_ok!(store.store_diff(&diff).await);

        assert_eq!(assert_ok!(store.base_size(&base_hash).await), base.encoded_len());
        assert_eq!(assert_ok!(store.diff_size(&diff_hash).await), diff.encoded_len());
        assert_err!(store.diff_size(&DiffHash::from_string("nope")).await);
    }
}

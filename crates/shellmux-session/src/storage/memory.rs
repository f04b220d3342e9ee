//! In-memory session storage.

use std::{
    collections::HashMap,
    sync::RwLock,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use shellmux_core::{LineId, RemoteId, RemotePtr, ScreenId, SessionId, StorageError};
use shellmux_state::{BaseHash, BlobStore, DiffHash};
use uuid::Uuid;

use super::SessionStorage;
use crate::records::{Line, RemoteInstance, Screen, Session};

/// In-memory storage implementation.
///
/// Holds session records and state blobs.
/// Useful for development and single-process deployments.
/// Data is lost on restart.
pub struct MemoryStorage {
    sessions: RwLock<Vec<Session>>,
    screens: RwLock<Vec<Screen>>,
    lines: RwLock<Vec<Line>>,
    instances: RwLock<Vec<RemoteInstance>>,
    bases: RwLock<HashMap<BaseHash, Vec<u8>>>,
    diffs: RwLock<HashMap<DiffHash, (BaseHash, Vec<u8>)>>,
}

impl MemoryStorage {
    /// Create a new in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(Vec::new()),
            screens: RwLock::new(Vec::new()),
            lines: RwLock::new(Vec::new()),
            instances: RwLock::new(Vec::new()),
            bases: RwLock::new(HashMap::new()),
            diffs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored state blobs (bases, diffs).
    ///
    /// # Errors
    /// Returns error if a lock is poisoned.
    pub fn blob_counts(&self) -> Result<(usize, usize), StorageError> {
        let bases = self.bases.read().map_err(|e| StorageError::Internal(e.to_string()))?;
        let diffs = self.diffs.read().map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok((bases.len(), diffs.len()))
    }

    fn check_screen(&self, session_id: SessionId, screen_id: ScreenId) -> Result<(), StorageError> {
        let screens = self
            .screens
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        if screens
            .iter()
            .any(|s| s.session_id == session_id && s.screen_id == screen_id)
        {
            Ok(())
        } else {
            Err(StorageError::not_found("screen", screen_id))
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn create_session(&self, name: &str) -> Result<Session, StorageError> {
        let session = Session {
            session_id: Uuid::new_v4(),
            name: name.to_string(),
            archived: false,
            created_at: now(),
        };

        self.sessions
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .push(session.clone());

        Ok(session)
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StorageError> {
        Ok(self
            .sessions
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .iter()
            .find(|s| s.session_id == id)
            .cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StorageError> {
        Ok(self
            .sessions
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .clone())
    }

    async fn create_screen(
        &self,
        session_id: SessionId,
        name: &str,
    ) -> Result<Screen, StorageError> {
        if self.get_session(session_id).await?.is_none() {
            return Err(StorageError::not_found("session", session_id));
        }

        let screen = Screen {
            session_id,
            screen_id: Uuid::new_v4(),
            name: name.to_string(),
            archived: false,
            cur_remote: None,
            created_at: now(),
        };

        self.screens
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .push(screen.clone());

        Ok(screen)
    }

    async fn list_screens(&self, session_id: SessionId) -> Result<Vec<Screen>, StorageError> {
        Ok(self
            .screens
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .iter()
            .filter(|s| s.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn archive_screen(
        &self,
        session_id: SessionId,
        screen_id: ScreenId,
    ) -> Result<(), StorageError> {
        let mut screens = self
            .screens
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        let screen = screens
            .iter_mut()
            .find(|s| s.session_id == session_id && s.screen_id == screen_id)
            .ok_or_else(|| StorageError::not_found("screen", screen_id))?;

        screen.archived = true;

        Ok(())
    }

    async fn append_line(&self, screen_id: ScreenId) -> Result<Line, StorageError> {
        let known = self
            .screens
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .iter()
            .any(|s| s.screen_id == screen_id);
        if !known {
            return Err(StorageError::not_found("screen", screen_id));
        }

        let mut lines = self
            .lines
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        let line_num = lines
            .iter()
            .filter(|l| l.screen_id == screen_id)
            .map(|l| l.line_num)
            .max()
            .unwrap_or(0)
            + 1;
        let line = Line {
            screen_id,
            line_id: Uuid::new_v4(),
            line_num,
            archived: false,
            created_at: now(),
        };
        lines.push(line.clone());

        Ok(line)
    }

    async fn list_lines(&self, screen_id: ScreenId) -> Result<Vec<Line>, StorageError> {
        Ok(self
            .lines
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .iter()
            .filter(|l| l.screen_id == screen_id)
            .cloned()
            .collect())
    }

    async fn archive_line(&self, screen_id: ScreenId, line_id: LineId) -> Result<(), StorageError> {
        let mut lines = self
            .lines
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        let line = lines
            .iter_mut()
            .find(|l| l.screen_id == screen_id && l.line_id == line_id)
            .ok_or_else(|| StorageError::not_found("line", line_id))?;

        line.archived = true;

        Ok(())
    }

    async fn get_remote_instance(
        &self,
        session_id: SessionId,
        screen_id: ScreenId,
        remote: &RemotePtr,
    ) -> Result<Option<RemoteInstance>, StorageError> {
        Ok(self
            .instances
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .iter()
            .find(|ri| ri.matches(session_id, screen_id, remote))
            .cloned())
    }

    async fn put_remote_instance(&self, ri: RemoteInstance) -> Result<(), StorageError> {
        self.check_screen(ri.session_id, ri.screen_id)?;

        let mut instances = self
            .instances
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        let remote = ri.remote_ptr();
        match instances
            .iter_mut()
            .find(|cur| cur.matches(ri.session_id, ri.screen_id, &remote))
        {
            Some(cur) => *cur = ri,
            None => instances.push(ri),
        }

        Ok(())
    }

    async fn list_remote_instances(
        &self,
        session_id: SessionId,
        screen_id: ScreenId,
    ) -> Result<Vec<RemoteInstance>, StorageError> {
        Ok(self
            .instances
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .iter()
            .filter(|ri| ri.session_id == session_id && ri.screen_id == screen_id)
            .cloned()
            .collect())
    }

    async fn delete_screen_instances(
        &self,
        session_id: SessionId,
        screen_id: ScreenId,
    ) -> Result<Vec<RemoteInstance>, StorageError> {
        let mut instances = self
            .instances
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        let (removed, kept): (Vec<_>, Vec<_>) = instances
            .drain(..)
            .partition(|ri| ri.session_id == session_id && ri.screen_id == screen_id);
        *instances = kept;

        Ok(removed)
    }

    async fn delete_remote_instances(
        &self,
        remote_id: RemoteId,
    ) -> Result<Vec<RemoteInstance>, StorageError> {
        let mut instances = self
            .instances
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        let (removed, kept): (Vec<_>, Vec<_>) = instances.drain(..).partition(|ri| ri.remote_id == remote_id);
        *instances = kept;

        Ok(removed)
    }
}

#[async_trait]
impl BlobStore for MemoryStorage {
    async fn put_base(&self, hash: &BaseHash, data: Vec<u8>) -> Result<(), StorageError> {
        self.bases
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .entry(hash.clone())
            .or_insert(data);

        Ok(())
    }

    async fn get_base(&self, hash: &BaseHash) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .bases
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(hash)
            .cloned())
    }

    async fn put_diff(
        &self,
        hash: &DiffHash,
        base: &BaseHash,
        data: Vec<u8>,
    ) -> Result<(), StorageError> {
        self.diffs
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .entry(hash.clone())
            .or_insert_with(|| (base.clone(), data));

        Ok(())
    }

    async fn get_diff(&self, hash: &DiffHash) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .diffs
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(hash)
            .map(|(_, data)| data.clone()))
    }
}

#[cfg(test)]
mod tests {
    use shellmux_state::{ShellType, StatePtr};
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::records::FeState;

    fn instance(session_id: SessionId, screen_id: ScreenId, remote_id: RemoteId, hash: &str) -> RemoteInstance {
        RemoteInstance {
            session_id,
            screen_id,
            remote_id,
            name: String::new(),
            fe_state: FeState::default(),
            shell_type: ShellType::Bash,
            state_ptr: StatePtr::base(BaseHash::from_string(hash)),
        }
    }

    #[tokio::test]
    async fn test_sessions_and_screens() {
        let storage = MemoryStorage::new();
        let session = assert_ok!(storage.create_session("work").await);
        let a = assert_ok!(storage.create_screen(session.session_id, "a").await);
        let b = assert_ok!(storage.create_screen(session.session_id, "b").await);

        let screens = assert_ok!(storage.list_screens(session.session_id).await);
        assert_eq!(screens, vec![a.clone(), b]);

        assert_ok!(storage.archive_screen(session.session_id, a.screen_id).await);
        let screens = assert_ok!(storage.list_screens(session.session_id).await);
        assert!(screens[0].archived);

        assert_err!(storage.create_screen(Uuid::new_v4(), "orphan").await);
    }

    #[tokio::test]
    async fn test_line_numbers_are_per_screen() {
        let storage = MemoryStorage::new();
        let session = assert_ok!(storage.create_session("s").await);
        let a = assert_ok!(storage.create_screen(session.session_id, "a").await);
        let b = assert_ok!(storage.create_screen(session.session_id, "b").await);

        assert_eq!(assert_ok!(storage.append_line(a.screen_id).await).line_num, 1);
        assert_eq!(assert_ok!(storage.append_line(a.screen_id).await).line_num, 2);
        assert_eq!(assert_ok!(storage.append_line(b.screen_id).await).line_num, 1);
        assert_eq!(assert_ok!(storage.list_lines(a.screen_id).await).len(), 2);
    }

    #[tokio::test]
    async fn test_put_replaces_instance() {
        let storage = MemoryStorage::new();
        let session = assert_ok!(storage.create_session("s").await);
        let screen = assert_ok!(storage.create_screen(session.session_id, "a").await);
        let remote_id = Uuid::new_v4();

        let first = instance(session.session_id, screen.screen_id, remote_id, "h1");
        let second = instance(session.session_id, screen.screen_id, remote_id, "h2");
        assert_ok!(storage.put_remote_instance(first).await);
        assert_ok!(storage.put_remote_instance(second.clone()).await);

        let all = assert_ok!(storage.list_remote_instances(session.session_id, screen.screen_id).await);
        assert_eq!(all, vec![second]);
    }

    #[tokio::test]
    async fn test_put_rejects_unknown_screen() {
        let storage = MemoryStorage::new();
        let session = assert_ok!(storage.create_session("s").await);
        let ri = instance(session.session_id, Uuid::new_v4(), Uuid::new_v4(), "h");
        let err = assert_err!(storage.put_remote_instance(ri).await);
        assert!(matches!(err, StorageError::NotFound { kind: "screen", .. }));
    }

    #[tokio::test]
    async fn test_delete_by_remote() {
        let storage = MemoryStorage::new();
        let session = assert_ok!(storage.create_session("s").await);
        let screen = assert_ok!(storage.create_screen(session.session_id, "a").await);
        let (r1, r2) = (Uuid::new_v4(), Uuid::new_v4());
        assert_ok!(storage.put_remote_instance(instance(session.session_id, screen.screen_id, r1, "h")).await);
        assert_ok!(storage.put_remote_instance(instance(session.session_id, screen.screen_id, r2, "h")).await);

        let removed = assert_ok!(storage.delete_remote_instances(r1).await);
        assert_eq!(removed.len(), 1);
        let left = assert_ok!(storage.list_remote_instances(session.session_id, screen.screen_id).await);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].remote_id, r2);
    }

    #[tokio::test]
    async fn test_blobs_are_write_once() {
        let storage = MemoryStorage::new();
        let hash = BaseHash::from_string("h");
        assert_ok!(storage.put_base(&hash, b"one".to_vec()).await);
        assert_ok!(storage.put_base(&hash, b"two".to_vec()).await);
        assert_eq!(assert_ok!(storage.get_base(&hash).await), Some(b"one".to_vec()));
        assert_eq!(storage.blob_counts().unwrap(), (1, 0));
    }
}

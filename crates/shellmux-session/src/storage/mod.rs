//! Session storage trait and implementations.

use async_trait::async_trait;
use shellmux_core::{LineId, RemoteId, RemotePtr, ScreenId, SessionId, StorageError};

use crate::records::{Line, RemoteInstance, Screen, Session};

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::MemoryStorage;

/// Session storage trait.
///
/// Lists are returned in creation order.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Create a new session.
    async fn create_session(&self, name: &str) -> Result<Session, StorageError>;

    /// Get a session by id.
    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StorageError>;

    /// List all sessions, archived ones included.
    async fn list_sessions(&self) -> Result<Vec<Session>, StorageError>;

    /// Create a screen in a session.
    async fn create_screen(&self, session_id: SessionId, name: &str)
    -> Result<Screen, StorageError>;

    /// List a session's screens, archived ones included.
    async fn list_screens(&self, session_id: SessionId) -> Result<Vec<Screen>, StorageError>;

    /// Mark a screen archived.
    async fn archive_screen(
        &self,
        session_id: SessionId,
        screen_id: ScreenId,
    ) -> Result<(), StorageError>;

    /// Append a line to a screen, assigning the next line number.
    async fn append_line(&self, screen_id: ScreenId) -> Result<Line, StorageError>;

    /// List a screen's lines.
    async fn list_lines(&self, screen_id: ScreenId) -> Result<Vec<Line>, StorageError>;

    /// Mark a line archived.
    async fn archive_line(&self, screen_id: ScreenId, line_id: LineId)
    -> Result<(), StorageError>;

    /// Get the instance for a (session, screen, remote) triple.
    async fn get_remote_instance(
        &self,
        session_id: SessionId,
        screen_id: ScreenId,
        remote: &RemotePtr,
    ) -> Result<Option<RemoteInstance>, StorageError>;

    /// Insert or replace an instance as a single write.
    ///
    /// Fails with `NotFound` if the screen does not belong to the session.
    async fn put_remote_instance(&self, ri: RemoteInstance) -> Result<(), StorageError>;

    /// List the instances of a screen.
    async fn list_remote_instances(
        &self,
        session_id: SessionId,
        screen_id: ScreenId,
    ) -> Result<Vec<RemoteInstance>, StorageError>;

    /// Delete every instance of a screen, returning what was removed.
    async fn delete_screen_instances(
        &self,
        session_id: SessionId,
        screen_id: ScreenId,
    ) -> Result<Vec<RemoteInstance>, StorageError>;

    /// Delete every instance of a remote, returning what was removed.
    async fn delete_remote_instances(
        &self,
        remote_id: RemoteId,
    ) -> Result<Vec<RemoteInstance>, StorageError>;
}

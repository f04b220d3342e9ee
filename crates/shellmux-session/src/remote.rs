//! Live remote connections and remote references.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use shellmux_core::{RemoteId, RemotePtr};
use shellmux_state::{ShellState, ShellType};
use thiserror::Error;
use uuid::Uuid;

/// Error reported by a remote connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("remote is not connected")]
    NotConnected,
    #[error("shell init failed: {0}")]
    Init(String),
}

/// A live connection to a shell execution target.
///
/// The process transport behind it lives elsewhere; this is the surface the
/// session manager needs.
#[async_trait]
pub trait RemoteConn: Send + Sync {
    /// Stable remote id.
    fn remote_id(&self) -> RemoteId;

    /// User-assigned alias, empty if none.
    fn alias(&self) -> &str;

    /// Canonical name, e.g. `user@host`.
    fn canonical_name(&self) -> &str;

    /// Whether the connection is currently up.
    fn is_connected(&self) -> bool;

    /// Try to connect once.
    async fn try_auto_connect(&self) -> Result<(), RemoteError>;

    /// Preferred shell dialect for new screens.
    fn shell_pref(&self) -> ShellType;

    /// State a fresh shell of `shell_type` starts in, if known.
    fn default_state(&self, shell_type: ShellType) -> Option<ShellState>;

    /// Run the full shell handshake and return the fresh state.
    async fn reinit(&self, shell_type: ShellType) -> Result<ShellState, RemoteError>;

    /// Alias, or canonical name when there is no alias.
    fn base_display_name(&self) -> &str {
        if self.alias().is_empty() {
            self.canonical_name()
        } else {
            self.alias()
        }
    }

    /// Display name of the shell `ptr` points at.
    fn display_name(&self, ptr: &RemotePtr) -> String {
        if ptr.name.is_empty() {
            self.base_display_name().to_string()
        } else {
            format!("{}:{}", self.base_display_name(), ptr.name)
        }
    }
}

/// Parsed `[user:]remote[:name]` reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteRef {
    pub user: String,
    pub remote: String,
    pub name: String,
}

/// Parse a remote reference, optionally wrapped in brackets.
///
/// With two fields the first is a user only when it starts with `@`.
///
/// # Errors
/// Returns the reason when there are more than three fields.
pub fn parse_full_remote_ref(full_ref: &str) -> Result<RemoteRef, String> {
    let inner = full_ref
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(full_ref);
    let fields: Vec<&str> = inner.split(':').collect();
    match fields.as_slice() {
        [remote] => Ok(RemoteRef {
            remote: remote.to_string(),
            ..RemoteRef::default()
        }),
        [user, remote] if user.starts_with('@') => Ok(RemoteRef {
            user: user.to_string(),
            remote: remote.to_string(),
            name: String::new(),
        }),
        [remote, name] => Ok(RemoteRef {
            user: String::new(),
            remote: remote.to_string(),
            name: name.to_string(),
        }),
        [user, remote, name] => Ok(RemoteRef {
            user: user.to_string(),
            remote: remote.to_string(),
            name: name.to_string(),
        }),
        _ => Err(format!("invalid remote format '{full_ref}'")),
    }
}

/// Registry of live remote connections.
///
/// Owned by whoever runs the process and handed to the session manager.
#[derive(Default)]
pub struct RemoteTable {
    remotes: RwLock<HashMap<RemoteId, Arc<dyn RemoteConn>>>,
}

impl RemoteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any with the same id.
    pub fn insert(&self, conn: Arc<dyn RemoteConn>) -> Option<Arc<dyn RemoteConn>> {
        self.remotes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conn.remote_id(), conn)
    }

    pub fn remove(&self, remote_id: RemoteId) -> Option<Arc<dyn RemoteConn>> {
        self.remotes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&remote_id)
    }

    #[must_use]
    pub fn get(&self, remote_id: RemoteId) -> Option<Arc<dyn RemoteConn>> {
        self.remotes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&remote_id)
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.remotes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All connections, sorted by display name.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<dyn RemoteConn>> {
        let mut all: Vec<_> = self
            .remotes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.base_display_name().cmp(b.base_display_name()));
        all
    }

    /// Find a connection by full id, 8-hex partial id, alias, or canonical name.
    #[must_use]
    pub fn resolve_ref(&self, remote_ref: &str) -> Option<Arc<dyn RemoteConn>> {
        if let Ok(id) = Uuid::parse_str(remote_ref) {
            return self.get(id);
        }
        let remotes = self.remotes.read().unwrap_or_else(PoisonError::into_inner);
        let is_partial_id =
            remote_ref.len() == 8 && remote_ref.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if is_partial_id {
            if let Some(conn) = remotes
                .values()
                .find(|conn| conn.remote_id().to_string().starts_with(remote_ref))
            {
                return Some(Arc::clone(conn));
            }
        }
        remotes
            .values()
            .find(|conn| conn.alias() == remote_ref || conn.canonical_name() == remote_ref)
            .cloned()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use super::*;

    /// Scriptable in-process remote.
    pub(crate) struct FakeRemote {
        pub id: RemoteId,
        pub alias: String,
        pub canonical: String,
        pub connected: AtomicBool,
        pub connect_ok: bool,
        pub connect_delay: Option<Duration>,
        pub connect_calls: AtomicUsize,
        pub default: Mutex<Option<ShellState>>,
        pub reinit_state: Mutex<ShellState>,
    }

    impl FakeRemote {
        pub(crate) fn new(canonical: &str, default: ShellState) -> Self {
            Self {
                id: Uuid::new_v4(),
                alias: String::new(),
                canonical: canonical.to_string(),
                connected: AtomicBool::new(true),
                connect_ok: true,
                connect_delay: None,
                connect_calls: AtomicUsize::new(0),
                reinit_state: Mutex::new(default.clone()),
                default: Mutex::new(Some(default)),
            }
        }
    }

    #[async_trait]
    impl RemoteConn for FakeRemote {
        fn remote_id(&self) -> RemoteId {
            self.id
        }

        fn alias(&self) -> &str {
            &self.alias
        }

        fn canonical_name(&self) -> &str {
            &self.canonical
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn try_auto_connect(&self) -> Result<(), RemoteError> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.connect_delay {
                tokio::time::sleep(delay).await;
            }
            if self.connect_ok {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            } else {
                Err(RemoteError::Connect("connection refused".into()))
            }
        }

        fn shell_pref(&self) -> ShellType {
            ShellType::Bash
        }

        fn default_state(&self, _shell_type: ShellType) -> Option<ShellState> {
            self.default.lock().unwrap().clone()
        }

        async fn reinit(&self, _shell_type: ShellType) -> Result<ShellState, RemoteError> {
            if !self.is_connected() {
                return Err(RemoteError::NotConnected);
            }
            Ok(self.reinit_state.lock().unwrap().clone())
        }
    }

    #[test]
    fn test_parse_full_remote_ref() {
        let parsed = parse_full_remote_ref("local").unwrap();
        assert_eq!(parsed.remote, "local");
        assert!(parsed.user.is_empty() && parsed.name.is_empty());

        let parsed = parse_full_remote_ref("[local:build]").unwrap();
        assert_eq!((parsed.remote.as_str(), parsed.name.as_str()), ("local", "build"));

        let parsed = parse_full_remote_ref("@mike:prod").unwrap();
        assert_eq!((parsed.user.as_str(), parsed.remote.as_str()), ("@mike", "prod"));

        let parsed = parse_full_remote_ref("@mike:prod:2").unwrap();
        assert_eq!(parsed.name, "2");

        assert!(parse_full_remote_ref("a:b:c:d").is_err());
    }

    #[test]
    fn test_resolve_ref() {
        let table = RemoteTable::new();
        let mut aliased = FakeRemote::new("user@host", ShellState::default());
        aliased.alias = "prod".into();
        let aliased_id = aliased.id;
        table.insert(Arc::new(aliased));
        let local = FakeRemote::new("me@localhost", ShellState::default());
        let local_id = local.id;
        table.insert(Arc::new(local));

        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve_ref("prod").unwrap().remote_id(), aliased_id);
        assert_eq!(table.resolve_ref("user@host").unwrap().remote_id(), aliased_id);
        assert_eq!(table.resolve_ref(&local_id.to_string()).unwrap().remote_id(), local_id);
        let partial = &local_id.to_string()[..8];
        assert_eq!(table.resolve_ref(partial).unwrap().remote_id(), local_id);
        assert!(table.resolve_ref("nowhere").is_none());
        assert!(table.resolve_ref(&Uuid::new_v4().to_string()).is_none());
    }

    #[test]
    fn test_display_name() {
        let mut remote = FakeRemote::new("user@host", ShellState::default());
        assert_eq!(remote.display_name(&RemotePtr::new(remote.id)), "user@host");
        remote.alias = "prod".into();
        assert_eq!(remote.display_name(&RemotePtr::named(remote.id, "2")), "prod:2");
    }

    #[test]
    fn test_list_sorted_and_remove() {
        let table = RemoteTable::new();
        let b = Arc::new(FakeRemote::new("b@host", ShellState::default()));
        let a = Arc::new(FakeRemote::new("a@host", ShellState::default()));
        let b_id = b.id;
        table.insert(b);
        table.insert(a);
        let names: Vec<String> = table.list().iter().map(|c| c.canonical_name().to_string()).collect();
        assert_eq!(names, vec!["a@host", "b@host"]);

        assert!(table.remove(b_id).is_some());
        assert_eq!(table.len(), 1);
        assert!(table.get(b_id).is_none());
    }
}

//! Remote session manager: which shell state applies to a screen right now.

use std::{fmt, sync::Arc, time::Duration};

use serde::Deserialize;
use shellmux_core::{
    LineId, RemoteId, RemotePtr, ResolveError, ScreenId, SessionId, StorageError, UiContext,
    UpdateBus, resolve,
};
use shellmux_state::{
    BlobStore, ShellState, ShellType, StateDiff, StateError, StatePtr, StateStore,
};
use tracing::{debug, info, warn};

use crate::{
    records::{FeState, Line, RemoteInstance, Screen, Session},
    remote::{RemoteConn, RemoteError, RemoteTable, parse_full_remote_ref},
    storage::SessionStorage,
    update::SessionUpdate,
};

/// Default largest diff kept instead of a new base.
pub const DEFAULT_DIFF_SIZE_THRESHOLD: usize = 30 * 1024;

/// Default bound on a single connect or reinit attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("invalid remote '{0}', not found")]
    RemoteNotFound(String),
    #[error("error trying to auto-connect remote [{name}]: {source}")]
    AutoConnectFailed {
        name: String,
        #[source]
        source: RemoteError,
    },
    #[error("remote [{0}] is not connected")]
    NotConnected(String),
    #[error("remote [{0}] state is not available")]
    StateUnavailable(String),
    #[error("cannot reinit remote [{name}]: {source}")]
    Reinit {
        name: String,
        #[source]
        source: RemoteError,
    },
    #[error("no session")]
    NoSession,
    #[error("no screen")]
    NoScreen,
    #[error("no remote")]
    NoRemote,
    #[error("remote [{0}] has no shell state on this screen")]
    NoShellState(String),
    #[error("invalid remote '{arg}': {reason}")]
    InvalidRemoteRef { arg: String, reason: String },
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("State error: {0}")]
    State(#[from] StateError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Session manager configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Diffs whose encoding is larger than this are stored as a new base.
    pub diff_size_threshold: usize,
    /// Bound on one auto-connect or reinit attempt.
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            diff_size_threshold: DEFAULT_DIFF_SIZE_THRESHOLD,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// A remote pointer resolved against a screen.
///
/// State fields are `None` when there is no screen context or the state could
/// not be loaded.
#[derive(Clone)]
pub struct ResolvedRemote {
    pub display_name: String,
    pub remote_ptr: RemotePtr,
    pub conn: Arc<dyn RemoteConn>,
    pub state_ptr: Option<StatePtr>,
    pub fe_state: Option<FeState>,
    pub shell_type: Option<ShellType>,
}

impl fmt::Debug for ResolvedRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedRemote")
            .field("display_name", &self.display_name)
            .field("remote_ptr", &self.remote_ptr)
            .field("state_ptr", &self.state_ptr)
            .field("fe_state", &self.fe_state)
            .field("shell_type", &self.shell_type)
            .finish_non_exhaustive()
    }
}

/// Explicit id arguments of a command; each overrides the UI context.
#[derive(Debug, Clone, Default)]
pub struct IdArgs {
    pub session: Option<String>,
    pub screen: Option<String>,
    pub remote: Option<String>,
}

/// What a command needs resolved before it can run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requirements {
    pub session: bool,
    pub screen: bool,
    pub remote: bool,
    /// Implies `remote`, and auto-connects if needed.
    pub remote_connected: bool,
}

impl Requirements {
    /// Session and screen.
    pub const SCREEN: Self = Self {
        session: true,
        screen: true,
        remote: false,
        remote_connected: false,
    };

    /// Session, screen, and a connected remote with state.
    pub const CONNECTED: Self = Self {
        session: true,
        screen: true,
        remote: true,
        remote_connected: true,
    };
}

/// Ids a command runs against.
#[derive(Debug, Clone, Default)]
pub struct ResolvedIds {
    pub session_id: Option<SessionId>,
    pub screen_id: Option<ScreenId>,
    pub remote: Option<ResolvedRemote>,
}

/// Resolves and reconciles per-screen remote shell state.
pub struct RemoteSessionManager<S>
where
    S: SessionStorage + BlobStore,
{
    storage: Arc<S>,
    states: StateStore<S>,
    remotes: Arc<RemoteTable>,
    updates: Arc<UpdateBus<SessionUpdate>>,
    config: ManagerConfig,
}

impl<S> RemoteSessionManager<S>
where
    S: SessionStorage + BlobStore,
{
    /// Create a new session manager.
    #[must_use]
    pub fn new(storage: Arc<S>, remotes: Arc<RemoteTable>, config: ManagerConfig) -> Self {
        Self {
            states: StateStore::new(Arc::clone(&storage)),
            storage,
            remotes,
            updates: Arc::new(UpdateBus::new()),
            config,
        }
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    #[must_use]
    pub fn states(&self) -> &StateStore<S> {
        &self.states
    }

    #[must_use]
    pub fn remotes(&self) -> &Arc<RemoteTable> {
        &self.remotes
    }

    /// Bus carrying every instance change.
    #[must_use]
    pub fn updates(&self) -> &Arc<UpdateBus<SessionUpdate>> {
        &self.updates
    }

    fn conn(&self, remote: &RemotePtr) -> Result<Arc<dyn RemoteConn>, ManagerError> {
        self.remotes
            .get(remote.remote_id)
            .ok_or_else(|| ManagerError::RemoteNotFound(remote.remote_id.to_string()))
    }

    /// Resolve the shell state `remote` has on a screen.
    ///
    /// With no instance for the screen yet, the remote's default state is
    /// used and nothing is written to the instance table. With
    /// `require_connected`, a disconnected remote gets one bounded
    /// auto-connect attempt and the state must be available.
    ///
    /// # Errors
    /// Returns error if the remote is unknown, cannot be connected, or has no
    /// usable state when one is required.
    pub async fn resolve_session_state(
        &self,
        remote: &RemotePtr,
        session_id: Option<SessionId>,
        screen_id: Option<ScreenId>,
        require_connected: bool,
    ) -> Result<ResolvedRemote, ManagerError> {
        let mut resolved = self.resolve_remote(remote, session_id, screen_id).await?;
        if !require_connected {
            return Ok(resolved);
        }

        if !resolved.conn.is_connected() {
            let name = resolved.display_name.clone();
            info!(remote = %name, "auto-connecting remote");
            let attempt =
                tokio::time::timeout(self.config.connect_timeout, resolved.conn.try_auto_connect())
                    .await
                    .unwrap_or(Err(RemoteError::Timeout(self.config.connect_timeout)));
            if let Err(source) = attempt {
                warn!(remote = %name, error = %source, "auto-connect failed");
                return Err(ManagerError::AutoConnectFailed { name, source });
            }
            // State may differ once connected.
            resolved = self.resolve_remote(remote, session_id, screen_id).await?;
        }

        if !resolved.conn.is_connected() {
            return Err(ManagerError::NotConnected(resolved.display_name));
        }
        if resolved.state_ptr.is_none() || resolved.fe_state.is_none() {
            return Err(ManagerError::StateUnavailable(resolved.display_name));
        }
        Ok(resolved)
    }

    async fn resolve_remote(
        &self,
        remote: &RemotePtr,
        session_id: Option<SessionId>,
        screen_id: Option<ScreenId>,
    ) -> Result<ResolvedRemote, ManagerError> {
        let conn = self.conn(remote)?;
        let mut resolved = ResolvedRemote {
            display_name: conn.display_name(remote),
            remote_ptr: remote.clone(),
            conn,
            state_ptr: None,
            fe_state: None,
            shell_type: None,
        };
        let (Some(session_id), Some(screen_id)) = (session_id, screen_id) else {
            return Ok(resolved);
        };

        match self
            .storage
            .get_remote_instance(session_id, screen_id, remote)
            .await
        {
            Ok(Some(ri)) => {
                resolved.state_ptr = Some(ri.state_ptr);
                resolved.fe_state = Some(ri.fe_state);
                resolved.shell_type = Some(ri.shell_type);
            }
            Ok(None) => {
                let shell_type = resolved.conn.shell_pref();
                resolved.shell_type = Some(shell_type);
                match self.default_state(resolved.conn.as_ref(), shell_type).await {
                    Ok(Some((state_ptr, fe_state))) => {
                        resolved.state_ptr = Some(state_ptr);
                        resolved.fe_state = Some(fe_state);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(remote = %resolved.display_name, error = %e, "cannot store default state");
                    }
                }
            }
            // Continue without state; callers that need it will fail.
            Err(e) => warn!(remote = %resolved.display_name, error = %e, "cannot resolve remote state"),
        }
        Ok(resolved)
    }

    async fn default_state(
        &self,
        conn: &dyn RemoteConn,
        shell_type: ShellType,
    ) -> Result<Option<(StatePtr, FeState)>, StateError> {
        let Some(state) = conn.default_state(shell_type) else {
            return Ok(None);
        };
        let hash = self.states.store_base(&state).await?;
        Ok(Some((StatePtr::base(hash), FeState::from_state(&state))))
    }

    async fn write_instance(&self, ri: RemoteInstance) -> Result<RemoteInstance, ManagerError> {
        self.storage.put_remote_instance(ri.clone()).await?;
        debug!(
            screen_id = %ri.screen_id,
            remote = %ri.remote_ptr(),
            base = %ri.state_ptr.base_hash,
            has_diff = ri.state_ptr.diff_hash.is_some(),
            "remote instance updated"
        );
        self.updates.publish(SessionUpdate::RemoteInstance(ri.clone()));
        Ok(ri)
    }

    /// Record the state a command left the shell in.
    ///
    /// The first state for a screen becomes a base. Later states are stored
    /// as a diff against the instance's base when the diff is small enough,
    /// otherwise as a new base. The instance is replaced in one write, so on
    /// error the previous pointer stays intact.
    ///
    /// # Errors
    /// Returns error if storage fails or the screen is unknown.
    pub async fn record_command_state(
        &self,
        session_id: SessionId,
        screen_id: ScreenId,
        remote: &RemotePtr,
        final_state: &ShellState,
    ) -> Result<RemoteInstance, ManagerError> {
        let existing = self
            .storage
            .get_remote_instance(session_id, screen_id, remote)
            .await?;

        let state_ptr = match existing {
            None => StatePtr::base(self.states.store_base(final_state).await?),
            Some(ri) => {
                let base_hash = ri.state_ptr.base_hash;
                let base = self.states.get_base(&base_hash).await?;
                let diff = StateDiff::make(&base, final_state);
                if diff.is_empty() {
                    StatePtr::base(base_hash)
                } else if diff.encoded_len() <= self.config.diff_size_threshold {
                    StatePtr::with_diff(base_hash, self.states.store_diff(&diff).await?)
                } else {
                    debug!(size = diff.encoded_len(), "diff over threshold, storing new base");
                    StatePtr::base(self.states.store_base(final_state).await?)
                }
            }
        };

        self.write_instance(RemoteInstance {
            session_id,
            screen_id,
            remote_id: remote.remote_id,
            name: remote.name.clone(),
            fe_state: FeState::from_state(final_state),
            shell_type: final_state.shell_type(),
            state_ptr,
        })
        .await
    }

    /// Run the remote's shell handshake and flatten the screen's state to
    /// the fresh result.
    ///
    /// # Errors
    /// Returns error if the remote is unknown, the handshake fails or times
    /// out, or storage fails.
    pub async fn reinit_remote_state(
        &self,
        session_id: SessionId,
        screen_id: ScreenId,
        remote: &RemotePtr,
        shell_type: Option<ShellType>,
    ) -> Result<RemoteInstance, ManagerError> {
        let conn = self.conn(remote)?;
        let name = conn.display_name(remote);
        let shell_type = shell_type.unwrap_or_else(|| conn.shell_pref());
        info!(remote = %name, %shell_type, "reinitializing remote shell");

        let state = tokio::time::timeout(self.config.connect_timeout, conn.reinit(shell_type))
            .await
            .unwrap_or(Err(RemoteError::Timeout(self.config.connect_timeout)))
            .map_err(|source| ManagerError::Reinit {
                name: name.clone(),
                source,
            })?;

        let base_hash = self.states.store_base(&state).await?;
        let ri = self
            .write_instance(RemoteInstance {
                session_id,
                screen_id,
                remote_id: remote.remote_id,
                name: remote.name.clone(),
                fe_state: FeState::from_state(&state),
                shell_type: state.shell_type(),
                state_ptr: StatePtr::base(base_hash),
            })
            .await?;
        self.updates
            .publish(SessionUpdate::info(format!("remote [{name}] reinitialized")));
        Ok(ri)
    }

    /// Set only the working directory of a screen's shell state.
    ///
    /// The new diff is made against the existing base and replaces the
    /// current one.
    ///
    /// # Errors
    /// Returns [`ManagerError::NoShellState`] if the screen has no instance
    /// for the remote.
    pub async fn reset_cwd(
        &self,
        session_id: SessionId,
        screen_id: ScreenId,
        remote: &RemotePtr,
        cwd: &str,
    ) -> Result<RemoteInstance, ManagerError> {
        let Some(mut ri) = self
            .storage
            .get_remote_instance(session_id, screen_id, remote)
            .await?
        else {
            let name = self
                .remotes
                .get(remote.remote_id)
                .map_or_else(|| remote.to_string(), |conn| conn.display_name(remote));
            return Err(ManagerError::NoShellState(name));
        };

        let base_hash = ri.state_ptr.base_hash.clone();
        let base = self.states.get_base(&base_hash).await?;
        let mut diff = match &ri.state_ptr.diff_hash {
            Some(diff_hash) => self.states.get_diff(diff_hash).await?,
            None => StateDiff::empty(base_hash.clone()),
        };
        diff.cwd = (base.cwd != cwd).then(|| cwd.to_string());

        ri.state_ptr = if diff.is_empty() {
            StatePtr::base(base_hash)
        } else {
            StatePtr::with_diff(base_hash, self.states.store_diff(&diff).await?)
        };
        ri.fe_state.set_cwd(cwd);
        self.write_instance(ri).await
    }

    /// Delete every instance of a screen.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub async fn delete_screen_instances(
        &self,
        session_id: SessionId,
        screen_id: ScreenId,
    ) -> Result<usize, ManagerError> {
        let removed = self
            .storage
            .delete_screen_instances(session_id, screen_id)
            .await?;
        for ri in &removed {
            self.updates.publish(SessionUpdate::removed(ri));
        }
        Ok(removed.len())
    }

    /// Delete every instance of a remote, on any screen.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub async fn delete_remote_instances(
        &self,
        remote_id: RemoteId,
    ) -> Result<usize, ManagerError> {
        let removed = self.storage.delete_remote_instances(remote_id).await?;
        for ri in &removed {
            self.updates.publish(SessionUpdate::removed(ri));
        }
        Ok(removed.len())
    }

    /// Resolve a session argument.
    ///
    /// # Errors
    /// Returns error if the argument matches nothing or is ambiguous.
    pub async fn resolve_session(
        &self,
        arg: &str,
        cur_arg: &str,
    ) -> Result<Option<Session>, ManagerError> {
        let sessions = self.storage.list_sessions().await?;
        let items: Vec<_> = sessions.iter().map(Session::resolve_item).collect();
        let found = resolve(arg, cur_arg, &items, false, "session")?;
        Ok(found.and_then(|item| {
            sessions
                .into_iter()
                .find(|s| s.session_id.to_string() == item.id)
        }))
    }

    /// Resolve a screen argument within a session.
    ///
    /// # Errors
    /// Returns error if the argument matches nothing or is ambiguous.
    pub async fn resolve_screen(
        &self,
        session_id: SessionId,
        arg: &str,
        cur_arg: &str,
    ) -> Result<Option<Screen>, ManagerError> {
        let screens = self.storage.list_screens(session_id).await?;
        let items: Vec<_> = screens.iter().map(Screen::resolve_item).collect();
        let found = resolve(arg, cur_arg, &items, false, "screen")?;
        Ok(found.and_then(|item| {
            screens
                .into_iter()
                .find(|s| s.screen_id.to_string() == item.id)
        }))
    }

    /// Resolve a line argument within a screen, by line number.
    ///
    /// # Errors
    /// Returns error if the argument matches nothing.
    pub async fn resolve_line(
        &self,
        screen_id: ScreenId,
        arg: &str,
        cur_line: Option<LineId>,
    ) -> Result<Option<Line>, ManagerError> {
        let lines = self.storage.list_lines(screen_id).await?;
        let items: Vec<_> = lines.iter().map(Line::resolve_item).collect();
        let cur_arg = cur_line.map(|id| id.to_string()).unwrap_or_default();
        let found = resolve(arg, &cur_arg, &items, true, "line")?;
        Ok(found.and_then(|item| lines.into_iter().find(|l| l.line_id.to_string() == item.id)))
    }

    /// Resolve a `[user:]remote[:name]` reference to a remote pointer.
    ///
    /// # Errors
    /// Returns error for malformed references, user references, and unknown
    /// remotes.
    pub fn resolve_remote_arg(&self, arg: &str) -> Result<RemotePtr, ManagerError> {
        let parsed = parse_full_remote_ref(arg).map_err(|reason| ManagerError::InvalidRemoteRef {
            arg: arg.to_string(),
            reason,
        })?;
        if !parsed.user.is_empty() {
            return Err(ManagerError::InvalidRemoteRef {
                arg: arg.to_string(),
                reason: format!("cannot resolve remote userid '{}'", parsed.user),
            });
        }
        let conn = self
            .remotes
            .resolve_ref(&parsed.remote)
            .ok_or_else(|| ManagerError::RemoteNotFound(arg.to_string()))?;
        Ok(RemotePtr::named(conn.remote_id(), parsed.name))
    }

    /// Resolve the ids a command runs against.
    ///
    /// Starts from the UI context, applies explicit arguments, resolves the
    /// remote's state for the screen, then checks `req`.
    ///
    /// # Errors
    /// Returns error if an argument does not resolve or a requirement is not
    /// met.
    pub async fn resolve_ids(
        &self,
        ui: &UiContext,
        args: &IdArgs,
        req: Requirements,
    ) -> Result<ResolvedIds, ManagerError> {
        let mut ids = ResolvedIds {
            session_id: ui.session_id,
            screen_id: ui.screen_id,
            remote: None,
        };

        if let Some(arg) = args.session.as_deref().filter(|a| !a.is_empty()) {
            let cur = ui.session_id.map(|id| id.to_string()).unwrap_or_default();
            if let Some(session) = self.resolve_session(arg, &cur).await? {
                if ids.session_id != Some(session.session_id) {
                    ids.screen_id = None;
                }
                ids.session_id = Some(session.session_id);
            }
        }

        if let Some(arg) = args.screen.as_deref().filter(|a| !a.is_empty()) {
            let session_id = ids.session_id.ok_or(ManagerError::NoSession)?;
            let cur = ids.screen_id.map(|id| id.to_string()).unwrap_or_default();
            if let Some(screen) = self.resolve_screen(session_id, arg, &cur).await? {
                ids.screen_id = Some(screen.screen_id);
            }
        }

        let remote_ptr = match args.remote.as_deref().filter(|a| !a.is_empty()) {
            Some(arg) => Some(self.resolve_remote_arg(arg)?),
            None => ui.remote.clone(),
        };

        if req.session && ids.session_id.is_none() {
            return Err(ManagerError::NoSession);
        }
        if req.screen && ids.screen_id.is_none() {
            return Err(ManagerError::NoScreen);
        }
        match remote_ptr {
            Some(ptr) => {
                let resolved = self
                    .resolve_session_state(&ptr, ids.session_id, ids.screen_id, req.remote_connected)
                    .await?;
                ids.remote = Some(resolved);
            }
            None if req.remote || req.remote_connected => return Err(ManagerError::NoRemote),
            None => {}
        }
        Ok(ids)
    }
}

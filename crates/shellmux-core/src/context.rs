//! UI context attached to an incoming command.

use serde::{Deserialize, Serialize};

use crate::traits::{RemotePtr, ScreenId, SessionId};

/// What the client was looking at when it issued a command.
///
/// Every field is optional; explicit command arguments override it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiContext {
    /// Active session.
    #[serde(default)]
    pub session_id: Option<SessionId>,

    /// Active screen within the session.
    #[serde(default)]
    pub screen_id: Option<ScreenId>,

    /// Current remote of the active screen.
    #[serde(default)]
    pub remote: Option<RemotePtr>,
}

impl UiContext {
    /// Context focused on a screen of a session.
    #[must_use]
    pub const fn new(session_id: SessionId, screen_id: ScreenId) -> Self {
        Self {
            session_id: Some(session_id),
            screen_id: Some(screen_id),
            remote: None,
        }
    }

    /// Set the current remote.
    #[must_use]
    pub fn with_remote(mut self, remote: RemotePtr) -> Self {
        self.remote = Some(remote);
        self
    }
}

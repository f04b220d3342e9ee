//! Updates pushed to connected clients.

use serde::Serialize;
use shellmux_core::{RemotePtr, ScreenId, SessionId};

use crate::records::RemoteInstance;

/// One client-visible change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// An instance was created or its state changed.
    RemoteInstance(RemoteInstance),
    /// An instance was deleted with its screen or remote.
    RemoteInstanceRemoved {
        session_id: SessionId,
        screen_id: ScreenId,
        remote: RemotePtr,
    },
    /// Informational message for the user.
    Info { message: String },
}

impl SessionUpdate {
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::Info {
            message: message.into(),
        }
    }

    pub(crate) fn removed(ri: &RemoteInstance) -> Self {
        Self::RemoteInstanceRemoved {
            session_id: ri.session_id,
            screen_id: ri.screen_id,
            remote: ri.remote_ptr(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_encoding() {
        let json = serde_json::to_value(SessionUpdate::info("reconnected")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "info", "message": "reconnected"})
        );
    }
}

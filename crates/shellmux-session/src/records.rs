//! Persisted session records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shellmux_core::{LineId, RemoteId, RemotePtr, ResolveItem, ScreenId, SessionId};
use shellmux_state::{ShellState, ShellType, StatePtr};

/// A session: a named group of screens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub name: String,
    #[serde(default)]
    pub archived: bool,
    pub created_at: i64,
}

impl Session {
    /// View for the generic resolver; archived sessions are hidden.
    #[must_use]
    pub fn resolve_item(&self) -> ResolveItem {
        ResolveItem::new(self.session_id.to_string(), self.name.clone()).with_hidden(self.archived)
    }
}

/// A screen (tab) within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screen {
    pub session_id: SessionId,
    pub screen_id: ScreenId,
    pub name: String,
    #[serde(default)]
    pub archived: bool,
    /// Remote new commands run on.
    #[serde(default)]
    pub cur_remote: Option<RemotePtr>,
    pub created_at: i64,
}

impl Screen {
    /// View for the generic resolver; archived screens are hidden.
    #[must_use]
    pub fn resolve_item(&self) -> ResolveItem {
        ResolveItem::new(self.screen_id.to_string(), self.name.clone()).with_hidden(self.archived)
    }
}

/// A command line on a screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub screen_id: ScreenId,
    pub line_id: LineId,
    /// 1-based, stable once assigned.
    pub line_num: i64,
    #[serde(default)]
    pub archived: bool,
    pub created_at: i64,
}

impl Line {
    /// View for the generic resolver, addressed by line number.
    #[must_use]
    pub fn resolve_item(&self) -> ResolveItem {
        ResolveItem::new(self.line_id.to_string(), "")
            .with_num(self.line_num)
            .with_hidden(self.archived)
    }
}

/// Flattened display view of a shell state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeState(BTreeMap<String, String>);

impl FeState {
    pub const CWD: &'static str = "cwd";
    pub const INVALID_STATE: &'static str = "invalidstate";

    /// Derive the display view of `state`.
    #[must_use]
    pub fn from_state(state: &ShellState) -> Self {
        let mut map = BTreeMap::new();
        map.insert(Self::CWD.to_string(), state.cwd.clone());
        for (key, val) in &state.vars {
            if key == "VIRTUAL_ENV" || key == "CONDA_DEFAULT_ENV" || key.starts_with("PROMPTVAR_") {
                map.insert(key.clone(), val.clone());
            }
        }
        if !state.has_valid_version() {
            map.insert(Self::INVALID_STATE.to_string(), "1".to_string());
        }
        Self(map)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn cwd(&self) -> Option<&str> {
        self.get(Self::CWD)
    }

    pub fn set_cwd(&mut self, cwd: impl Into<String>) {
        self.0.insert(Self::CWD.to_string(), cwd.into());
    }

    /// Whether the state behind this view had an unparseable version.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.get(Self::INVALID_STATE) == Some("1")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Shell state of one remote as seen from one screen.
///
/// Keyed by `(session_id, screen_id, remote_id, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteInstance {
    pub session_id: SessionId,
    pub screen_id: ScreenId,
    pub remote_id: RemoteId,
    #[serde(default)]
    pub name: String,
    pub fe_state: FeState,
    pub shell_type: ShellType,
    pub state_ptr: StatePtr,
}

impl RemoteInstance {
    /// Remote pointer this instance belongs to.
    #[must_use]
    pub fn remote_ptr(&self) -> RemotePtr {
        RemotePtr::named(self.remote_id, self.name.clone())
    }

    /// Whether this instance is keyed by the given triple.
    #[must_use]
    pub fn matches(&self, session_id: SessionId, screen_id: ScreenId, remote: &RemotePtr) -> bool {
        self.session_id == session_id
            && self.screen_id == screen_id
            && self.remote_id == remote.remote_id
            && self.name == remote.name
    }
}

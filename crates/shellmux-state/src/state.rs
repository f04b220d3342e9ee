//! Shell state snapshots and the deltas between them.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    error::StateError,
    hash::{BaseHash, DiffHash},
    linediff::LineDiff,
    mapdiff::MapDiff,
};

/// Shell dialect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellType {
    #[default]
    Bash,
    Zsh,
}

impl ShellType {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Zsh => "zsh",
        }
    }
}

impl fmt::Display for ShellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShellType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bash" => Ok(Self::Bash),
            "zsh" => Ok(Self::Zsh),
            other => Err(format!("unknown shell type '{other}'")),
        }
    }
}

/// Split a version string like `bash v5.1.16` into shell type and semver.
///
/// Returns `None` for anything unparseable.
#[must_use]
pub fn parse_version(version: &str) -> Option<(ShellType, &str)> {
    let mut fields = version.split_whitespace();
    let (shell, semver) = (fields.next()?, fields.next()?);
    if fields.next().is_some() {
        return None;
    }
    let shell_type = shell.parse().ok()?;
    let numbers = semver.strip_prefix('v')?;
    let valid = !numbers.is_empty()
        && numbers
            .split('.')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()));
    valid.then_some((shell_type, semver))
}

fn encode_canonical<T: Serialize>(value: &T) -> Vec<u8> {
    // Every field is a string, a sorted map/set of strings, or a struct of
    // those, so serialization cannot fail.
    serde_json::to_vec(value).expect("state values always serialize")
}

fn decode_canonical<T: DeserializeOwned>(kind: &'static str, data: &[u8]) -> Result<T, StateError> {
    serde_json::from_slice(data).map_err(|source| StateError::Decode { kind, source })
}

/// Full snapshot of a shell environment.
///
/// `aliases` and `funcs` hold the shell's own newline-separated definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellState {
    /// `"<shell> v<semver>"`, e.g. `bash v5.1.16`.
    pub version: String,
    pub cwd: String,
    pub vars: BTreeMap<String, String>,
    pub aliases: String,
    pub funcs: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl ShellState {
    /// Shell dialect; anything not zsh is treated as bash.
    #[must_use]
    pub fn shell_type(&self) -> ShellType {
        if self.version.starts_with("zsh") {
            ShellType::Zsh
        } else {
            ShellType::Bash
        }
    }

    /// Whether every field is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.version.is_empty()
            && self.cwd.is_empty()
            && self.vars.is_empty()
            && self.aliases.is_empty()
            && self.funcs.is_empty()
            && self.error.is_empty()
    }

    /// Whether `version` parses as `<shell> v<semver>`.
    #[must_use]
    pub fn has_valid_version(&self) -> bool {
        parse_version(&self.version).is_some()
    }

    /// Canonical encoding.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        encode_canonical(self)
    }

    /// Decode a canonical encoding.
    ///
    /// # Errors
    /// Returns [`StateError::Decode`] for malformed input.
    pub fn decode(data: &[u8]) -> Result<Self, StateError> {
        decode_canonical("shell state", data)
    }

    /// Content hash.
    #[must_use]
    pub fn hash(&self) -> BaseHash {
        self.encode_and_hash().0
    }

    /// Hash and canonical encoding in one pass.
    #[must_use]
    pub fn encode_and_hash(&self) -> (BaseHash, Vec<u8>) {
        let data = self.encode();
        (BaseHash::of_encoded(&data), data)
    }

    /// Size of the canonical encoding.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.encode().len()
    }
}

/// Structural delta from a base [`ShellState`] to an updated one.
///
/// `None`/empty fields are unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDiff {
    pub base_hash: BaseHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "MapDiff::is_empty")]
    pub vars: MapDiff,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<LineDiff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funcs: Option<LineDiff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StateDiff {
    /// A diff that changes nothing.
    #[must_use]
    pub fn empty(base_hash: BaseHash) -> Self {
        Self {
            base_hash,
            version: None,
            cwd: None,
            vars: MapDiff::default(),
            aliases: None,
            funcs: None,
            error: None,
        }
    }

    /// Compute the delta from `base` to `updated`.
    #[must_use]
    pub fn make(base: &ShellState, updated: &ShellState) -> Self {
        let changed = |old: &String, new: &String| (old != new).then(|| new.clone());
        Self {
            base_hash: base.hash(),
            version: changed(&base.version, &updated.version),
            cwd: changed(&base.cwd, &updated.cwd),
            vars: MapDiff::make(&base.vars, &updated.vars),
            aliases: LineDiff::make(&base.aliases, &updated.aliases),
            funcs: LineDiff::make(&base.funcs, &updated.funcs),
            error: changed(&base.error, &updated.error),
        }
    }

    /// Whether applying the diff is a no-op.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.version.is_none()
            && self.cwd.is_none()
            && self.vars.is_empty()
            && self.aliases.is_none()
            && self.funcs.is_none()
            && self.error.is_none()
    }

    /// Apply this diff to `base`.
    ///
    /// # Errors
    /// Returns [`StateError::BaseMismatch`] if `base` is not the state this
    /// diff was made against, or [`StateError::Apply`] if a line diff does
    /// not fit.
    pub fn apply(&self, base: &ShellState) -> Result<ShellState, StateError> {
        let actual = base.hash();
        if actual != self.base_hash {
            return Err(StateError::BaseMismatch {
                expected: self.base_hash.clone(),
                actual,
            });
        }
        let pick = |old: &String, new: &Option<String>| new.clone().unwrap_or_else(|| old.clone());
        let lines = |old: &String, diff: &Option<LineDiff>| match diff {
            Some(diff) => diff.apply(old),
            None => Ok(old.clone()),
        };
        Ok(ShellState {
            version: pick(&base.version, &self.version),
            cwd: pick(&base.cwd, &self.cwd),
            vars: self.vars.apply(&base.vars),
            aliases: lines(&base.aliases, &self.aliases)?,
            funcs: lines(&base.funcs, &self.funcs)?,
            error: pick(&base.error, &self.error),
        })
    }

    /// Shell dialect of the resulting state, if the diff changes the version.
    #[must_use]
    pub fn shell_type(&self) -> Option<ShellType> {
        self.version
            .as_deref()
            .map(|v| if v.starts_with("zsh") { ShellType::Zsh } else { ShellType::Bash })
    }

    /// Canonical encoding.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        encode_canonical(self)
    }

    /// Decode a canonical encoding.
    ///
    /// # Errors
    /// Returns [`StateError::Decode`] for malformed input.
    pub fn decode(data: &[u8]) -> Result<Self, StateError> {
        decode_canonical("shell state diff", data)
    }

    /// Content hash.
    #[must_use]
    pub fn hash(&self) -> DiffHash {
        self.encode_and_hash().0
    }

    /// Hash and canonical encoding in one pass.
    #[must_use]
    pub fn encode_and_hash(&self) -> (DiffHash, Vec<u8>) {
        let data = self.encode();
        (DiffHash::of_encoded(&data), data)
    }

    /// Size of the canonical encoding.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.encode().len()
    }
}

#[cfg(test)]
mod tests {
    use proptest::{collection::btree_map, prelude::*};

    use super::*;

    fn sample() -> ShellState {
        ShellState {
            version: "bash v5.1.16".into(),
            cwd: "/home/user".into(),
            vars: BTreeMap::from([
                ("HOME".to_string(), "/home/user".to_string()),
                ("PATH".to_string(), "/usr/bin:/bin".to_string()),
            ]),
            aliases: "alias ll='ls -l'\nalias la='ls -a'".into(),
            funcs: "greet () {\n  echo hi\n}".into(),
            error: String::new(),
        }
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("bash v5.1.16"), Some((ShellType::Bash, "v5.1.16")));
        assert_eq!(parse_version("zsh v5.9"), Some((ShellType::Zsh, "v5.9")));
        assert_eq!(parse_version("bash"), None);
        assert_eq!(parse_version("fish v3.6.0"), None);
        assert_eq!(parse_version("bash 5.1"), None);
        assert_eq!(parse_version("bash v5..1"), None);
    }

    #[test]
    fn test_shell_type() {
        let mut state = sample();
        assert_eq!(state.shell_type(), ShellType::Bash);
        state.version = "zsh v5.9".into();
        assert_eq!(state.shell_type(), ShellType::Zsh);
        assert_eq!("zsh".parse::<ShellType>(), Ok(ShellType::Zsh));
        assert!("fish".parse::<ShellType>().is_err());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let state = sample();
        let decoded = ShellState::decode(&state.encode()).unwrap();
        assert_eq!(decoded, state);
        assert_eq!(decoded.hash(), state.hash());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = ShellState::decode(b"not json").unwrap_err();
        assert!(matches!(err, StateError::Decode { kind: "shell state", .. }));
    }

    #[test]
    fn test_diff_only_records_changes() {
        let base = sample();
        let mut updated = base.clone();
        updated.cwd = "/tmp".into();
        updated.vars.insert("FOO".into(), "bar".into());

        let diff = StateDiff::make(&base, &updated);
        assert_eq!(diff.base_hash, base.hash());
        assert_eq!(diff.cwd.as_deref(), Some("/tmp"));
        assert!(diff.version.is_none());
        assert!(diff.aliases.is_none());
        assert_eq!(diff.apply(&base).unwrap(), updated);
        assert!(diff.encoded_len() < base.encoded_len());
    }

    #[test]
    fn test_identical_states_give_empty_diff() {
        let base = sample();
        assert!(StateDiff::make(&base, &base).is_empty());
    }

    #[test]
    fn test_apply_to_wrong_base_fails() {
        let base = sample();
        let mut other = sample();
        other.cwd = "/elsewhere".into();
        let diff = StateDiff::make(&base, &other);
        let err = diff.apply(&other).unwrap_err();
        assert!(matches!(err, StateError::BaseMismatch { .. }));
    }

    #[test]
    fn test_diff_hash_depends_on_base() {
        let a = sample();
        let mut b = sample();
        b.cwd = "/b".into();
        let mut target = sample();
        target.cwd = "/t".into();
        assert_ne!(StateDiff::make(&a, &target).hash(), StateDiff::make(&b, &target).hash());
    }

    fn arb_state() -> impl Strategy<Value = ShellState> {
        (
            prop_oneof![Just("bash v5.1.16"), Just("zsh v5.9"), Just("")],
            "[a-z/~]{0,12}",
            btree_map("[A-Z_]{1,6}", "[ -~]{0,8}", 0..6),
            proptest::collection::vec("[a-z =']{0,10}", 0..5),
            proptest::collection::vec("[a-z(){} ]{0,10}", 0..5),
            "[a-z ]{0,5}",
        )
            .prop_map(|(version, cwd, vars, aliases, funcs, error)| ShellState {
                version: version.to_string(),
                cwd,
                vars,
                aliases: aliases.join("\n"),
                funcs: funcs.join("\n"),
                error,
            })
    }

    proptest! {
        #[test]
        fn prop_diff_apply_roundtrip(base in arb_state(), updated in arb_state()) {
            let diff = StateDiff::make(&base, &updated);
            prop_assert_eq!(diff.apply(&base).unwrap(), updated);
        }

        #[test]
        fn prop_equal_encoding_iff_equal_hash(a in arb_state(), b in arb_state()) {
            prop_assert_eq!(a.encode() == b.encode(), a.hash() == b.hash());
            prop_assert_eq!(a == b, a.hash() == b.hash());
        }

        #[test]
        fn prop_diff_encoding_roundtrip(base in arb_state(), updated in arb_state()) {
            let diff = StateDiff::make(&base, &updated);
            prop_assert_eq!(StateDiff::decode(&diff.encode()).unwrap(), diff);
        }
    }
}

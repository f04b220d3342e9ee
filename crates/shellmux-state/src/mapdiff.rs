//! Key/value map deltas (exported variables).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Changes turning one variable map into another.
///
/// Sorted containers keep the encoding deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapDiff {
    /// Added or changed entries.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub to_add: BTreeMap<String, String>,
    /// Removed keys.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub to_remove: BTreeSet<String>,
}

impl MapDiff {
    /// Compute the diff from `old` to `new`.
    #[must_use]
    pub fn make(old: &BTreeMap<String, String>, new: &BTreeMap<String, String>) -> Self {
        let to_add = new
            .iter()
            .filter(|(key, val)| old.get(*key) != Some(*val))
            .map(|(key, val)| (key.clone(), val.clone()))
            .collect();
        let to_remove = old
            .keys()
            .filter(|key| !new.contains_key(*key))
            .cloned()
            .collect();
        Self { to_add, to_remove }
    }

    /// Whether applying the diff is a no-op.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Apply the diff to `old`.
    #[must_use]
    pub fn apply(&self, old: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut out = old.clone();
        out.extend(self.to_add.iter().map(|(k, v)| (k.clone(), v.clone())));
        for key in &self.to_remove {
            out.remove(key);
        }
        out
    }
}

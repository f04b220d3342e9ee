//! Content hashes for encoded states and diffs.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Base64 SHA-256 of `data`.
#[must_use]
pub fn content_hash(data: &[u8]) -> String {
    BASE64.encode(Sha256::digest(data))
}

macro_rules! hash_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Hash of already-encoded bytes.
            #[must_use]
            pub fn of_encoded(data: &[u8]) -> Self {
                Self(content_hash(data))
            }

            /// Wrap a hash string read from storage.
            #[must_use]
            pub fn from_string(hash: impl Into<String>) -> Self {
                Self(hash.into())
            }

            /// Hash string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

hash_type!(
    /// Identity of a stored [`crate::ShellState`].
    BaseHash
);

hash_type!(
    /// Identity of a stored [`crate::StateDiff`].
    DiffHash
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
        // 32 bytes -> 44 base64 chars with padding.
        assert_eq!(content_hash(b"").len(), 44);
    }

    #[test]
    fn test_hash_serializes_as_plain_string() {
        let hash = BaseHash::of_encoded(b"x");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{hash}\""));
    }
}

//! HMAC signing of retrieval URLs.

use std::{collections::BTreeMap, sync::Arc};

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Query parameter carrying the signature.
pub const HMAC_PARAM: &str = "hmac";

/// Signs and verifies `path?query` pairs with a process secret.
///
/// The signed message is the path followed by every query pair except
/// [`HMAC_PARAM`], in key order, as `\n<key>=<value>`.
#[derive(Clone)]
pub struct UrlSigner {
    secret: Arc<[u8]>,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner").finish_non_exhaustive()
    }
}

impl UrlSigner {
    /// Create a signer from a shared secret.
    #[must_use]
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
        }
    }

    fn mac(&self, path: &str, query: &BTreeMap<String, String>) -> HmacSha256 {
        // HMAC accepts keys of any length.
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(path.as_bytes());
        for (key, value) in query.iter().filter(|(k, _)| k.as_str() != HMAC_PARAM) {
            mac.update(b"\n");
            mac.update(key.as_bytes());
            mac.update(b"=");
            mac.update(value.as_bytes());
        }
        mac
    }

    /// Hex HMAC for `path` and `query`.
    #[must_use]
    pub fn sign(&self, path: &str, query: &BTreeMap<String, String>) -> String {
        hex::encode(self.mac(path, query).finalize().into_bytes())
    }

    /// Check the `hmac` query value against a freshly computed one.
    ///
    /// Comparison is constant-time.
    #[must_use]
    pub fn verify(&self, path: &str, query: &BTreeMap<String, String>) -> bool {
        let Some(given) = query.get(HMAC_PARAM) else {
            return false;
        };
        let Ok(given) = hex::decode(given) else {
            return false;
        };
        self.mac(path, query).verify_slice(&given).is_ok()
    }

    /// Build a signed URL: `path?k1=v1&k2=v2&hmac=...`.
    ///
    /// Values are expected to be URL-safe (ids, nonces).
    #[must_use]
    pub fn signed_url(&self, path: &str, mut query: BTreeMap<String, String>) -> String {
        let hmac = self.sign(path, &query);
        query.insert(HMAC_PARAM.to_string(), hmac);
        let encoded: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{path}?{}", encoded.join("&"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn parse_url(url: &str) -> (String, BTreeMap<String, String>) {
        let (path, qs) = url.split_once('?').unwrap();
        let q = qs
            .split('&')
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap();
                (k.to_string(), v.to_string())
            })
            .collect();
        (path.to_string(), q)
    }

    #[test]
    fn test_signed_url_verifies() {
        let signer = UrlSigner::new(b"secret");
        let url = signer.signed_url("/api/x", query(&[("key", "k1"), ("nonce", "n1")]));
        let (path, q) = parse_url(&url);
        assert!(signer.verify(&path, &q));
    }

    #[test]
    fn test_tampering_is_rejected() {
        let signer = UrlSigner::new(b"secret");
        let url = signer.signed_url("/api/x", query(&[("key", "k1"), ("nonce", "n1")]));
        let (path, mut q) = parse_url(&url);

        assert!(!signer.verify("/api/y", &q));
        assert!(!UrlSigner::new(b"other").verify(&path, &q));

        q.insert("key".into(), "k2".into());
        assert!(!signer.verify(&path, &q));
    }

    #[test]
    fn test_missing_or_garbled_hmac() {
        let signer = UrlSigner::new(b"secret");
        assert!(!signer.verify("/api/x", &query(&[("key", "k1")])));
        assert!(!signer.verify("/api/x", &query(&[("key", "k1"), ("hmac", "zz")])));
    }
}

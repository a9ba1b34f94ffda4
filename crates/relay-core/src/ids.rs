use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Short, stable, safe-to-log identifier for a key. The first 8 hex characters
/// of `SHA-256(secret)`, or of `SHA-256(secret ‖ org_id)` for an org-cloned key.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of_secret(secret: &str) -> Self {
        Self::hash_to_fingerprint(secret.as_bytes())
    }

    /// Distinct fingerprint for an org-cloned variant of a secret, per the
    /// pool's uniqueness invariant.
    pub fn of_secret_with_org(secret: &str, org_id: &str) -> Self {
        let mut combined = String::with_capacity(secret.len() + org_id.len() + 1);
        combined.push_str(secret);
        combined.push('\u{0}');
        combined.push_str(org_id);
        Self::hash_to_fingerprint(combined.as_bytes())
    }

    fn hash_to_fingerprint(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let hex = format!("{digest:x}");
        Self(hex[..8].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(RequestId, "req");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic_and_eight_hex() {
        let a = Fingerprint::of_secret("sk-ant-abc123");
        let b = Fingerprint::of_secret("sk-ant-abc123");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 8);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_differs_for_different_secrets() {
        let a = Fingerprint::of_secret("sk-one");
        let b = Fingerprint::of_secret("sk-two");
        assert_ne!(a, b);
    }

    #[test]
    fn org_clone_gets_a_distinct_fingerprint() {
        let base = Fingerprint::of_secret("sk-shared");
        let cloned = Fingerprint::of_secret_with_org("sk-shared", "org-42");
        assert_ne!(base, cloned);
    }

    #[test]
    fn request_id_has_prefix_and_is_unique() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert!(a.as_str().starts_with("req_"));
        assert_ne!(a, b);
    }
}

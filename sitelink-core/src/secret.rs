//! Grant secrets.
//!
//! A secret is the only thing a joining site presents when redeeming, so:
//! - generated secrets draw from `OsRng` (24 alphanumerics, ~142 bits)
//! - comparison is constant-time
//! - the value never appears in `Debug` output and is wiped on drop

use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

const SECRET_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of generated secrets.
pub const GENERATED_SECRET_LENGTH: usize = 24;

/// A shared redemption secret.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantSecret(String);

impl GrantSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh high-entropy secret.
    #[must_use]
    pub fn generate() -> Self {
        let value = (0..GENERATED_SECRET_LENGTH)
            .map(|_| SECRET_CHARSET[OsRng.gen_range(0..SECRET_CHARSET.len())] as char)
            .collect();
        Self(value)
    }

    /// Check a presented secret. Constant-time over the stored length.
    #[must_use]
    pub fn matches(&self, presented: &[u8]) -> bool {
        self.0.as_bytes().ct_eq(presented).into()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short digest safe to log.
    pub fn digest(&self) -> String {
        Sha256::digest(self.0.as_bytes())
            .iter()
            .take(6)
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl PartialEq for GrantSecret {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other.as_bytes())
    }
}

impl Eq for GrantSecret {}

impl std::fmt::Debug for GrantSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GrantSecret({})", self.digest())
    }
}

impl Drop for GrantSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_are_long_and_unique() {
        let a = GrantSecret::generate();
        let b = GrantSecret::generate();

        assert_eq!(a.expose().len(), GENERATED_SECRET_LENGTH);
        assert!(a.expose().bytes().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn matches_requires_exact_bytes() {
        let secret = GrantSecret::new("abcdefg");

        assert!(secret.matches(b"abcdefg"));
        assert!(!secret.matches(b"abcdef"));
        assert!(!secret.matches(b"abcdefgh"));
        assert!(!secret.matches(b"ABCDEFG"));
        assert!(!secret.matches(b""));
    }

    #[test]
    fn debug_does_not_leak_value() {
        let secret = GrantSecret::new("super-secret-value");
        let debug = format!("{:?}", secret);

        assert!(!debug.contains("super-secret-value"));
        assert!(debug.starts_with("GrantSecret("));
    }

    #[test]
    fn serializes_as_plain_string() {
        let secret = GrantSecret::new("s3cr3t");
        assert_eq!(serde_json::to_string(&secret).unwrap(), r#""s3cr3t""#);
    }
}

//! Key Digests
//!
//! Every live key is identified by the SHA-256 of its sanitized bytes.
//! The digest doubles as the join key between a shard's data file and its
//! key-index file, and (in lowercase hex) as the `by_digest` map key.

use sha2::{Digest as _, Sha256};
use std::fmt;

/// Length of a key digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// A 256-bit key digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(pub [u8; DIGEST_LEN]);

impl Digest {
    /// Returns the lowercase hex form, used as a stable map key.
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(DIGEST_LEN * 2);
        for byte in self.0 {
            s.push_str(&format!("{:02x}", byte));
        }
        s
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; DIGEST_LEN]> for Digest {
    fn from(bytes: [u8; DIGEST_LEN]) -> Self {
        Digest(bytes)
    }
}

/// Computes the SHA-256 digest of the given bytes.
pub fn digest(bytes: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Digest(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            digest(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_distinct_inputs_distinct_digests() {
        assert_ne!(digest(b"key1"), digest(b"key2"));
        assert_eq!(digest(b"key1"), digest(b"key1"));
    }

    #[test]
    fn test_hex_length() {
        assert_eq!(digest(b"abc").to_hex().len(), DIGEST_LEN * 2);
    }
}

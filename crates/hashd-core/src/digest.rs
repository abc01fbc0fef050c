//! One-way digest used by workers.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha512};

use crate::error::HashResult;

/// Computes the encoded digest of a submitted value.
pub trait Digester: Send + Sync + fmt::Debug {
    /// Returns the printable digest of `clear_value`.
    fn digest(&self, clear_value: &str) -> HashResult<String>;
}

/// SHA-512 over the UTF-8 bytes, encoded as padded standard base64.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha512Base64;

impl Digester for Sha512Base64 {
    fn digest(&self, clear_value: &str) -> HashResult<String> {
        let hash = Sha512::digest(clear_value.as_bytes());
        Ok(STANDARD.encode(hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        let digest = Sha512Base64.digest("angryMonkey").unwrap();
        assert_eq!(
            digest,
            "ZEHhWB65gUlzdVwtDQArEyx+KVLzp/aTaRaPlBzYRIFj6vjFdqEb0Q5B8zVKCZ0vKbZPZklJz0Fd7su2A+gf7Q=="
        );
    }

    #[test]
    fn test_digest_is_fixed_length() {
        let long = "x".repeat(10_000);
        for value in ["a", "angryMonkey", long.as_str()] {
            assert_eq!(Sha512Base64.digest(value).unwrap().len(), 88);
        }
    }
}

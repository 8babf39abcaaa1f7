//! Keyed identity hashing.
//!
//! Insurant and provider identifiers are indexed only under a deterministic
//! HMAC-SHA256 of the plaintext, computed with a process-wide hash key per
//! identifier kind. Equal plaintexts yield equal hashes; the mapping is
//! one-way.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use erx_types::HashedId;

type HmacSha256 = Hmac<Sha256>;

/// Process-wide key for one identifier kind, unwrapped from the HSM.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct IdentityHashKey([u8; 32]);

impl IdentityHashKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for IdentityHashKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IdentityHashKey(..)")
    }
}

/// Hash one identifier under the given key.
pub fn hash_identifier(key: &IdentityHashKey, identifier: &str) -> HashedId {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("hmac accepts 32-byte keys");
    mac.update(identifier.as_bytes());
    let digest = mac.finalize().into_bytes();
    HashedId::from_bytes(digest.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_plaintext_same_hash() {
        let key = IdentityHashKey::from_bytes([1u8; 32]);
        assert_eq!(
            hash_identifier(&key, "X123456789"),
            hash_identifier(&key, "X123456789")
        );
    }

    #[test]
    fn test_different_plaintext_different_hash() {
        let key = IdentityHashKey::from_bytes([1u8; 32]);
        assert_ne!(
            hash_identifier(&key, "X123456789"),
            hash_identifier(&key, "X123456780")
        );
    }

    #[test]
    fn test_key_separates_domains() {
        // the KVNR and TelematikId keys are distinct, so equal plaintexts
        // under different keys do not collide
        let kvnr_key = IdentityHashKey::from_bytes([1u8; 32]);
        let telematik_key = IdentityHashKey::from_bytes([2u8; 32]);
        assert_ne!(
            hash_identifier(&kvnr_key, "A000000000"),
            hash_identifier(&telematik_key, "A000000000")
        );
    }

    #[test]
    fn test_known_vector() {
        let key = IdentityHashKey::from_bytes([0u8; 32]);
        let hashed = hash_identifier(&key, "X123456789");
        assert_eq!(hashed.as_bytes().len(), 32);
        // stable across runs
        assert_eq!(hashed, hash_identifier(&key, "X123456789"));
    }
}

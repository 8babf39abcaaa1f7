//! Software HSM adapter.
//!
//! Derives persistence keys with HKDF-SHA256 over per-(purpose, generation)
//! master keys held in memory. Stands in for the hardware module in tests
//! and development deployments; the derivation contract is identical.

use std::collections::HashMap;

use hkdf::Hkdf;
use parking_lot::RwLock;
use rand::RngCore;
use sha2::Sha256;

use erx_crypto::{IdentityHashKey, SymmetricKey};
use erx_types::{Blob, BlobId, ErxError, ErxResult};

use crate::client::{DeriveKeyOutput, HsmClient, KeyPurpose, OptionalDeriveKeyData};

const SALT_LEN: usize = 32;

/// In-process HSM with random master keys.
pub struct SoftHsm {
    masters: RwLock<HashMap<(KeyPurpose, BlobId), [u8; 32]>>,
    latest: RwLock<HashMap<KeyPurpose, BlobId>>,
    kvnr_hash_key: IdentityHashKey,
    telematik_id_hash_key: IdentityHashKey,
}

impl SoftHsm {
    /// Module with one generation (blob id 1) per purpose.
    pub fn new() -> Self {
        let mut masters = HashMap::new();
        let mut latest = HashMap::new();
        for purpose in KeyPurpose::ALL {
            masters.insert((purpose, 1), random_key());
            latest.insert(purpose, 1);
        }
        Self {
            masters: RwLock::new(masters),
            latest: RwLock::new(latest),
            kvnr_hash_key: IdentityHashKey::from_bytes(random_key()),
            telematik_id_hash_key: IdentityHashKey::from_bytes(random_key()),
        }
    }

    /// Install a new master key generation for a purpose and make it the
    /// preferred one. Generations only ever increase.
    pub fn advance_generation(&self, purpose: KeyPurpose) -> BlobId {
        let mut latest = self.latest.write();
        let next = latest[&purpose] + 1;
        self.masters.write().insert((purpose, next), random_key());
        latest.insert(purpose, next);
        next
    }
}

impl Default for SoftHsm {
    fn default() -> Self {
        Self::new()
    }
}

fn random_key() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

impl HsmClient for SoftHsm {
    fn derive_persistence_key(
        &self,
        purpose: KeyPurpose,
        derivation_data: &[u8],
        second_call: Option<&OptionalDeriveKeyData>,
    ) -> ErxResult<DeriveKeyOutput> {
        let (blob_id, salt, is_initial) = match second_call {
            Some(data) => (data.blob_id, data.salt.clone(), false),
            None => {
                let blob_id = self.latest_blob_id(purpose)?;
                let mut salt = vec![0u8; SALT_LEN];
                rand::thread_rng().fill_bytes(&mut salt);
                (blob_id, Blob::new(salt), true)
            }
        };

        let masters = self.masters.read();
        let master = masters.get(&(purpose, blob_id)).ok_or_else(|| {
            ErxError::internal(format!(
                "blob generation {blob_id} unknown to hsm for {purpose:?}"
            ))
        })?;

        let hkdf = Hkdf::<Sha256>::new(Some(salt.as_bytes()), master);
        let mut okm = [0u8; 32];
        hkdf.expand(derivation_data, &mut okm)
            .map_err(|err| ErxError::internal(format!("hkdf expand: {err}")))?;

        Ok(DeriveKeyOutput {
            derived_key: SymmetricKey::from_bytes(okm),
            optional_data: is_initial.then_some(OptionalDeriveKeyData { salt, blob_id }),
        })
    }

    fn latest_blob_id(&self, purpose: KeyPurpose) -> ErxResult<BlobId> {
        Ok(self.latest.read()[&purpose])
    }

    fn kvnr_hash_key(&self) -> ErxResult<IdentityHashKey> {
        Ok(self.kvnr_hash_key.clone())
    }

    fn telematik_id_hash_key(&self) -> ErxResult<IdentityHashKey> {
        Ok(self.telematik_id_hash_key.clone())
    }

    fn random_bytes(&self, count: usize) -> ErxResult<Vec<u8>> {
        let mut bytes = vec![0u8; count];
        rand::thread_rng().fill_bytes(&mut bytes);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_derivation_returns_salt_and_generation() {
        let hsm = SoftHsm::new();
        let output = hsm
            .derive_persistence_key(KeyPurpose::Task, b"data", None)
            .unwrap();
        let data = output.optional_data.expect("initial derivation data");
        assert_eq!(data.blob_id, 1);
        assert_eq!(data.salt.as_bytes().len(), SALT_LEN);
    }

    #[test]
    fn test_subsequent_derivation_is_deterministic() {
        let hsm = SoftHsm::new();
        let initial = hsm
            .derive_persistence_key(KeyPurpose::Task, b"data", None)
            .unwrap();
        let data = initial.optional_data.unwrap();

        let again = hsm
            .derive_persistence_key(KeyPurpose::Task, b"data", Some(&data))
            .unwrap();
        let third = hsm
            .derive_persistence_key(KeyPurpose::Task, b"data", Some(&data))
            .unwrap();

        assert_eq!(initial.derived_key.as_bytes(), again.derived_key.as_bytes());
        assert_eq!(again.derived_key.as_bytes(), third.derived_key.as_bytes());
        assert!(again.optional_data.is_none());
    }

    #[test]
    fn test_derivation_data_separates_keys() {
        let hsm = SoftHsm::new();
        let data = hsm
            .derive_persistence_key(KeyPurpose::Task, b"one", None)
            .unwrap()
            .optional_data
            .unwrap();
        let key_one = hsm
            .derive_persistence_key(KeyPurpose::Task, b"one", Some(&data))
            .unwrap();
        let key_two = hsm
            .derive_persistence_key(KeyPurpose::Task, b"two", Some(&data))
            .unwrap();
        assert_ne!(key_one.derived_key.as_bytes(), key_two.derived_key.as_bytes());
    }

    #[test]
    fn test_unknown_generation_is_operator_visible() {
        let hsm = SoftHsm::new();
        let stale = OptionalDeriveKeyData {
            salt: Blob::new(vec![0u8; SALT_LEN]),
            blob_id: 99,
        };
        let err = hsm
            .derive_persistence_key(KeyPurpose::Task, b"data", Some(&stale))
            .unwrap_err();
        assert!(err.to_string().contains("generation 99"));
    }

    #[test]
    fn test_generations_advance_monotonically() {
        let hsm = SoftHsm::new();
        assert_eq!(hsm.latest_blob_id(KeyPurpose::Communication).unwrap(), 1);
        let next = hsm.advance_generation(KeyPurpose::Communication);
        assert_eq!(next, 2);
        assert_eq!(hsm.latest_blob_id(KeyPurpose::Communication).unwrap(), 2);
        // old generation still derivable
        let old = OptionalDeriveKeyData {
            salt: Blob::new(vec![1u8; SALT_LEN]),
            blob_id: 1,
        };
        assert!(hsm
            .derive_persistence_key(KeyPurpose::Communication, b"x", Some(&old))
            .is_ok());
    }
}

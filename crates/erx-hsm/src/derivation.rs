//! The key-derivation service.
//!
//! Wraps the HSM primitives in per-purpose routines with fixed derivation
//! data layouts, and owns the lazily loaded identity hash keys.
//!
//! Derivation data per purpose:
//!
//! | Purpose | Bytes fed to the module |
//! |---|---|
//! | Task | big-endian 64-bit serial ‖ 1-byte flow type ‖ big-endian 64-bit seconds of authored-on |
//! | Medication dispense | hashed KVNR |
//! | Audit event | hashed KVNR |
//! | Communication | plaintext identity ‖ hashed identity |
//! | Charge item | UTF-8 prescription id string |

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use erx_crypto::{hash_identifier, IdentityHashKey, SymmetricKey};
use erx_types::{
    Blob, BlobId, ErxError, ErxResult, HashedId, IdentityHasher, Kvnr, PrescriptionId, TelematikId,
};

use crate::client::{KeyPurpose, OptionalDeriveKeyData};
use crate::pool::HsmPool;

/// Per-purpose key derivation over a session pool.
pub struct KeyDerivation {
    pool: HsmPool,
    hash_keys: Mutex<CachedHashKeys>,
}

#[derive(Default)]
struct CachedHashKeys {
    kvnr: Option<IdentityHashKey>,
    telematik_id: Option<IdentityHashKey>,
}

impl KeyDerivation {
    pub fn new(pool: HsmPool) -> Self {
        Self {
            pool,
            hash_keys: Mutex::new(CachedHashKeys::default()),
        }
    }

    pub fn pool(&self) -> &HsmPool {
        &self.pool
    }

    /// The generation the module currently prefers for a purpose.
    pub fn latest_blob_id(&self, purpose: KeyPurpose) -> ErxResult<BlobId> {
        self.pool.acquire().session().latest_blob_id(purpose)
    }

    // ----- task ------------------------------------------------------------

    /// Assemble derivation data for a task key.
    pub fn task_key_derivation_data(
        task_id: &PrescriptionId,
        authored_on: DateTime<Utc>,
    ) -> Vec<u8> {
        let mut data = Vec::with_capacity(8 + 1 + 8);
        data.extend_from_slice(&(task_id.database_id() as u64).to_be_bytes());
        data.push(task_id.flow_type().code());
        data.extend_from_slice(&authored_on.timestamp().to_be_bytes());
        data
    }

    pub fn initial_task_key(
        &self,
        task_id: &PrescriptionId,
        authored_on: DateTime<Utc>,
    ) -> ErxResult<(SymmetricKey, OptionalDeriveKeyData)> {
        tracing::trace!("initial key derivation for task {task_id}");
        let output = self.pool.acquire().session().derive_persistence_key(
            KeyPurpose::Task,
            &Self::task_key_derivation_data(task_id, authored_on),
            None,
        )?;
        let data = output
            .optional_data
            .ok_or_else(|| ErxError::logic("missing salt/blob_id on initial derivation"))?;
        Ok((output.derived_key, data))
    }

    pub fn task_key(
        &self,
        task_id: &PrescriptionId,
        authored_on: DateTime<Utc>,
        blob_id: BlobId,
        salt: &Blob,
    ) -> ErxResult<SymmetricKey> {
        let second_call = OptionalDeriveKeyData {
            salt: salt.clone(),
            blob_id,
        };
        let output = self.pool.acquire().session().derive_persistence_key(
            KeyPurpose::Task,
            &Self::task_key_derivation_data(task_id, authored_on),
            Some(&second_call),
        )?;
        Ok(output.derived_key)
    }

    // ----- medication dispense ---------------------------------------------

    /// Medication dispense keys are derived from the insurant, not from a
    /// task, so any pharmacy task for the same patient encrypts into the
    /// same key space. They share the task master-key family.
    pub fn initial_medication_dispense_key(
        &self,
        hashed_kvnr: &HashedId,
    ) -> ErxResult<(SymmetricKey, OptionalDeriveKeyData)> {
        let output = self.pool.acquire().session().derive_persistence_key(
            KeyPurpose::Task,
            hashed_kvnr.as_bytes(),
            None,
        )?;
        let data = output
            .optional_data
            .ok_or_else(|| ErxError::logic("missing salt/blob_id on initial derivation"))?;
        Ok((output.derived_key, data))
    }

    pub fn medication_dispense_key(
        &self,
        hashed_kvnr: &HashedId,
        blob_id: BlobId,
        salt: &Blob,
    ) -> ErxResult<SymmetricKey> {
        let second_call = OptionalDeriveKeyData {
            salt: salt.clone(),
            blob_id,
        };
        let output = self.pool.acquire().session().derive_persistence_key(
            KeyPurpose::Task,
            hashed_kvnr.as_bytes(),
            Some(&second_call),
        )?;
        Ok(output.derived_key)
    }

    // ----- audit events ----------------------------------------------------

    pub fn initial_audit_event_key(
        &self,
        hashed_kvnr: &HashedId,
    ) -> ErxResult<(SymmetricKey, OptionalDeriveKeyData)> {
        let output = self.pool.acquire().session().derive_persistence_key(
            KeyPurpose::AuditLog,
            hashed_kvnr.as_bytes(),
            None,
        )?;
        let data = output
            .optional_data
            .ok_or_else(|| ErxError::logic("missing salt/blob_id on initial derivation"))?;
        Ok((output.derived_key, data))
    }

    pub fn audit_event_key(
        &self,
        hashed_kvnr: &HashedId,
        blob_id: BlobId,
        salt: &Blob,
    ) -> ErxResult<SymmetricKey> {
        let second_call = OptionalDeriveKeyData {
            salt: salt.clone(),
            blob_id,
        };
        let output = self.pool.acquire().session().derive_persistence_key(
            KeyPurpose::AuditLog,
            hashed_kvnr.as_bytes(),
            Some(&second_call),
        )?;
        Ok(output.derived_key)
    }

    // ----- communications --------------------------------------------------

    pub fn communication_key_derivation_data(identity: &str, hashed: &HashedId) -> Vec<u8> {
        let mut data = Vec::with_capacity(identity.len() + hashed.as_bytes().len());
        data.extend_from_slice(identity.as_bytes());
        data.extend_from_slice(hashed.as_bytes());
        data
    }

    pub fn initial_communication_key(
        &self,
        identity: &str,
        hashed: &HashedId,
    ) -> ErxResult<(SymmetricKey, OptionalDeriveKeyData)> {
        let output = self.pool.acquire().session().derive_persistence_key(
            KeyPurpose::Communication,
            &Self::communication_key_derivation_data(identity, hashed),
            None,
        )?;
        let data = output
            .optional_data
            .ok_or_else(|| ErxError::logic("missing salt/blob_id on initial derivation"))?;
        Ok((output.derived_key, data))
    }

    pub fn communication_key(
        &self,
        identity: &str,
        hashed: &HashedId,
        blob_id: BlobId,
        salt: &Blob,
    ) -> ErxResult<SymmetricKey> {
        let second_call = OptionalDeriveKeyData {
            salt: salt.clone(),
            blob_id,
        };
        let output = self.pool.acquire().session().derive_persistence_key(
            KeyPurpose::Communication,
            &Self::communication_key_derivation_data(identity, hashed),
            Some(&second_call),
        )?;
        Ok(output.derived_key)
    }

    // ----- charge items ----------------------------------------------------

    pub fn initial_charge_item_key(
        &self,
        prescription_id: &PrescriptionId,
    ) -> ErxResult<(SymmetricKey, OptionalDeriveKeyData)> {
        let output = self.pool.acquire().session().derive_persistence_key(
            KeyPurpose::ChargeItem,
            prescription_id.to_string().as_bytes(),
            None,
        )?;
        let data = output
            .optional_data
            .ok_or_else(|| ErxError::logic("missing salt/blob_id on initial derivation"))?;
        Ok((output.derived_key, data))
    }

    pub fn charge_item_key(
        &self,
        prescription_id: &PrescriptionId,
        blob_id: BlobId,
        salt: &Blob,
    ) -> ErxResult<SymmetricKey> {
        let second_call = OptionalDeriveKeyData {
            salt: salt.clone(),
            blob_id,
        };
        let output = self.pool.acquire().session().derive_persistence_key(
            KeyPurpose::ChargeItem,
            prescription_id.to_string().as_bytes(),
            Some(&second_call),
        )?;
        Ok(output.derived_key)
    }

    // ----- identity hashing ------------------------------------------------

    pub fn hash_kvnr(&self, kvnr: &Kvnr) -> ErxResult<HashedId> {
        let key = self.kvnr_hash_key()?;
        Ok(hash_identifier(&key, kvnr.as_str()))
    }

    pub fn hash_telematik_id(&self, telematik_id: &TelematikId) -> ErxResult<HashedId> {
        let key = self.telematik_id_hash_key()?;
        Ok(hash_identifier(&key, telematik_id.as_str()))
    }

    fn kvnr_hash_key(&self) -> ErxResult<IdentityHashKey> {
        let mut cached = self.hash_keys.lock();
        if cached.kvnr.is_none() {
            tracing::debug!("loading kvnr hash key from hsm");
            cached.kvnr = Some(self.pool.acquire().session().kvnr_hash_key()?);
        }
        Ok(cached.kvnr.clone().unwrap())
    }

    fn telematik_id_hash_key(&self) -> ErxResult<IdentityHashKey> {
        let mut cached = self.hash_keys.lock();
        if cached.telematik_id.is_none() {
            cached.telematik_id = Some(self.pool.acquire().session().telematik_id_hash_key()?);
        }
        Ok(cached.telematik_id.clone().unwrap())
    }
}

impl IdentityHasher for KeyDerivation {
    /// Dispatch to the hasher matching the identifier's structure.
    fn hash_identity(&self, identity: &str) -> ErxResult<HashedId> {
        if TelematikId::is_telematik_id(identity) {
            self.hash_telematik_id(&TelematikId::new(identity))
        } else {
            self.hash_kvnr(&Kvnr::new(identity))
        }
    }
}

//! Identifier and binary value types.
//!
//! KVNR and TelematikId are never stored in plaintext in any indexed column;
//! lookups go through their keyed [`HashedId`] form.

use serde::{Deserialize, Serialize};

use crate::errors::{ErxError, ErxResult};

/// Width of a hashed identifier in bytes (HMAC-SHA256 output).
pub const HASHED_ID_LEN: usize = 32;

/// Identifier of a statutorily or privately insured person.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Kvnr(String);

impl Kvnr {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Structural check: one uppercase letter followed by nine digits.
    pub fn is_kvnr(value: &str) -> bool {
        let bytes = value.as_bytes();
        bytes.len() == 10
            && bytes[0].is_ascii_uppercase()
            && bytes[1..].iter().all(|b| b.is_ascii_digit())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifier of a healthcare provider or institution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TelematikId(String);

impl TelematikId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Structural predicate distinguishing TelematikIds from KVNRs:
    /// TelematikId strings contain a dot.
    pub fn is_telematik_id(value: &str) -> bool {
        value.contains('.')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Either side of a communication: an insurant or a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Insurant(Kvnr),
    Provider(TelematikId),
}

impl Identity {
    /// Classify a raw identity string by its structure.
    pub fn parse(value: &str) -> Self {
        if TelematikId::is_telematik_id(value) {
            Identity::Provider(TelematikId::new(value))
        } else {
            Identity::Insurant(Kvnr::new(value))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Identity::Insurant(kvnr) => kvnr.as_str(),
            Identity::Provider(tid) => tid.as_str(),
        }
    }
}

/// Keyed deterministic hash of a KVNR or TelematikId.
///
/// Two entities derived from the same plaintext yield identical values; the
/// mapping is one-way. Compared bytewise in SQL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashedId([u8; HASHED_ID_LEN]);

impl HashedId {
    pub fn from_bytes(bytes: [u8; HASHED_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn try_from_slice(bytes: &[u8]) -> ErxResult<Self> {
        let arr: [u8; HASHED_ID_LEN] = bytes.try_into().map_err(|_| {
            ErxError::internal(format!(
                "hashed id must be {HASHED_ID_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Anything that can map a raw identity string to its indexed hash.
///
/// The query translator needs hashing for identity search values without
/// caring where the hash keys live; the key-derivation service implements
/// this.
pub trait IdentityHasher {
    fn hash_identity(&self, identity: &str) -> ErxResult<HashedId>;
}

/// Unstructured binary value (salts, raw key material in transit).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Blob(Vec<u8>);

impl Blob {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An envelope-encrypted database value (see the codec for the layout).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob(Vec<u8>);

impl EncryptedBlob {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Generation of a master key held by the HSM. Monotonically non-decreasing.
pub type BlobId = u32;

/// Key purpose of an account-salt row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum MasterKeyType {
    MedicationDispense = 1,
    Communication = 2,
    AuditEvent = 3,
    ChargeItem = 4,
}

impl MasterKeyType {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> ErxResult<Self> {
        match value {
            1 => Ok(MasterKeyType::MedicationDispense),
            2 => Ok(MasterKeyType::Communication),
            3 => Ok(MasterKeyType::AuditEvent),
            4 => Ok(MasterKeyType::ChargeItem),
            other => Err(ErxError::internal(format!(
                "master key type {other} outside domain"
            ))),
        }
    }
}

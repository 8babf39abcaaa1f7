//! The HSM client port.
//!
//! The data layer invokes a small set of operations on the module; everything
//! else the hardware offers is out of scope. Input and output structures stay
//! close to the module's wire types.

use erx_crypto::{IdentityHashKey, SymmetricKey};
use erx_types::{Blob, BlobId, ErxResult};

/// Master-key family a persistence key is derived from.
///
/// Medication dispense keys share the task master (they are derived from the
/// insurant, not from a task).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    Task,
    AuditLog,
    Communication,
    ChargeItem,
}

impl KeyPurpose {
    pub const ALL: [KeyPurpose; 4] = [
        KeyPurpose::Task,
        KeyPurpose::AuditLog,
        KeyPurpose::Communication,
        KeyPurpose::ChargeItem,
    ];
}

/// Salt and generation accompanying a derivation.
///
/// Returned by the module on initial derivation; supplied by the caller on
/// subsequent derivations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalDeriveKeyData {
    pub salt: Blob,
    pub blob_id: BlobId,
}

/// Result of a derivation call.
#[derive(Debug)]
pub struct DeriveKeyOutput {
    pub derived_key: SymmetricKey,
    /// Present iff the call was an initial derivation.
    pub optional_data: Option<OptionalDeriveKeyData>,
}

/// Operations the data layer invokes on the HSM.
///
/// With `second_call` absent the module picks its latest generation, draws a
/// fresh salt and returns both ("initial derivation"). With `second_call`
/// present it honours the given generation and salt and returns only the key
/// ("subsequent derivation").
pub trait HsmClient: Send + Sync {
    fn derive_persistence_key(
        &self,
        purpose: KeyPurpose,
        derivation_data: &[u8],
        second_call: Option<&OptionalDeriveKeyData>,
    ) -> ErxResult<DeriveKeyOutput>;

    /// The generation the module currently prefers for a purpose.
    fn latest_blob_id(&self, purpose: KeyPurpose) -> ErxResult<BlobId>;

    /// Unwrapped process-wide hash key for KVNR indexing.
    fn kvnr_hash_key(&self) -> ErxResult<IdentityHashKey>;

    /// Unwrapped process-wide hash key for TelematikId indexing.
    fn telematik_id_hash_key(&self) -> ErxResult<IdentityHashKey>;

    /// Hardware random bytes (CMAC keys, IVs when requested explicitly).
    fn random_bytes(&self, count: usize) -> ErxResult<Vec<u8>>;
}

//! The envelope codec.
//!
//! Every sensitive database value is one opaque blob with the layout
//!
//! ```text
//! | version (1 byte) | iv (12 bytes) | auth tag (16 bytes) | ciphertext |
//! ```
//!
//! where the ciphertext is AES-256-GCM over the zstd-compressed plaintext,
//! with no additional authenticated data. A fresh random IV is drawn per
//! encode. Historical blobs remain decodable as long as their version byte
//! matches; a future layout must claim a new version byte.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::{AeadInPlace, Aes256Gcm, KeyInit};
use rand::RngCore;

use erx_types::EncryptedBlob;

use crate::compression::{self, DictionaryUse};
use crate::errors::CryptoError;
use crate::keys::SymmetricKey;

/// Current format version.
pub const VERSION: u8 = 1;
/// AES-GCM IV width.
pub const IV_LEN: usize = 12;
/// AES-GCM authentication tag width.
pub const TAG_LEN: usize = 16;
/// Shortest well-formed blob: version, IV and tag around an empty ciphertext.
pub const MIN_ENCODED_LEN: usize = 1 + IV_LEN + TAG_LEN;

const IV_OFFSET: usize = 1;
const TAG_OFFSET: usize = IV_OFFSET + IV_LEN;
const CIPHER_OFFSET: usize = TAG_OFFSET + TAG_LEN;

/// Source of random IVs, injectable for deterministic tests.
pub type RandomGenerator = fn(&mut [u8]);

fn os_random(buffer: &mut [u8]) {
    rand::thread_rng().fill_bytes(buffer);
}

/// Encoder/decoder for envelope-encrypted database values.
#[derive(Clone)]
pub struct DbCodec {
    random: RandomGenerator,
}

impl Default for DbCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl DbCodec {
    pub fn new() -> Self {
        Self { random: os_random }
    }

    /// Codec with an injected IV source.
    pub fn with_random(random: RandomGenerator) -> Self {
        Self { random }
    }

    /// Encode one value into one blob.
    pub fn encode(
        &self,
        plaintext: &[u8],
        key: &SymmetricKey,
        dict_use: DictionaryUse,
    ) -> Result<EncryptedBlob, CryptoError> {
        let compressed = compression::compress(plaintext, dict_use)?;

        let mut iv = [0u8; IV_LEN];
        (self.random)(&mut iv);

        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        let mut ciphertext = compressed;
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut ciphertext)
            .map_err(|err| CryptoError::EncryptionFailed(err.to_string()))?;

        let mut blob = Vec::with_capacity(CIPHER_OFFSET + ciphertext.len());
        blob.push(VERSION);
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&tag);
        blob.extend_from_slice(&ciphertext);
        Ok(EncryptedBlob::new(blob))
    }

    /// Decode one blob back into the value.
    ///
    /// The dictionary selector must be the one the column was encoded with;
    /// it is a per-column convention and not recorded in the blob.
    pub fn decode(
        &self,
        blob: &EncryptedBlob,
        key: &SymmetricKey,
        dict_use: DictionaryUse,
    ) -> Result<Vec<u8>, CryptoError> {
        let data = blob.as_bytes();
        if data.len() < MIN_ENCODED_LEN {
            return Err(CryptoError::BlobTooShort(data.len()));
        }
        if data[0] != VERSION {
            return Err(CryptoError::UnknownVersion(data[0]));
        }

        let iv = &data[IV_OFFSET..TAG_OFFSET];
        let tag = &data[TAG_OFFSET..CIPHER_OFFSET];
        let mut ciphertext = data[CIPHER_OFFSET..].to_vec();

        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(iv),
                b"",
                &mut ciphertext,
                GenericArray::from_slice(tag),
            )
            .map_err(|err| CryptoError::DecryptionFailed(err.to_string()))?;

        compression::decompress(&ciphertext, dict_use)
    }
}

//! Crypto error types.

use erx_types::ErxError;
use thiserror::Error;

/// Cryptographic operation errors.
///
/// Codec failures indicate corruption or key mismatch, never user error;
/// they convert into the logic/crypto kinds of the central taxonomy.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// AEAD verification failed
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Not enough data for decoding
    #[error("not enough data for decoding: {0} bytes")]
    BlobTooShort(usize),

    /// Version byte is not the current format version
    #[error("database blob version unknown: {0}")]
    UnknownVersion(u8),

    /// Compression failed
    #[error("compression failed: {0}")]
    CompressFailed(std::io::Error),

    /// Decompression failed
    #[error("decompression failed: {0}")]
    DecompressFailed(std::io::Error),
}

impl From<CryptoError> for ErxError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::BlobTooShort(_) | CryptoError::UnknownVersion(_) => {
                ErxError::Logic(err.to_string())
            }
            CryptoError::EncryptionFailed(_)
            | CryptoError::DecryptionFailed(_)
            | CryptoError::CompressFailed(_)
            | CryptoError::DecompressFailed(_) => ErxError::CryptoFailure(err.to_string()),
        }
    }
}

//! # Data-Layer Cryptography
//!
//! Everything sensitive that reaches a database column passes through this
//! crate:
//!
//! - [`codec::DbCodec`] frames one value into one opaque, authenticated blob
//!   (compress, then AES-256-GCM, then version/iv/tag framing).
//! - [`hashing`] derives the deterministic keyed hashes under which insurant
//!   and provider identifiers are indexed.
//! - [`keys::SymmetricKey`] wraps content-encryption key material and wipes
//!   it on drop.

pub mod codec;
pub mod compression;
pub mod errors;
pub mod hashing;
pub mod keys;

pub use codec::DbCodec;
pub use compression::DictionaryUse;
pub use errors::CryptoError;
pub use hashing::{hash_identifier, IdentityHashKey};
pub use keys::SymmetricKey;

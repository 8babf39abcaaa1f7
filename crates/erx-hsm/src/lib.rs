//! # HSM Client and Key Derivation
//!
//! Thin client layer over the hardware security module, plus the
//! key-derivation service that binds each per-record content key to
//!
//! 1. a hardware-rooted master key generation ([`erx_types::BlobId`]),
//! 2. a per-account salt coordinated with the storage backend, and
//! 3. record-specific derivation data.
//!
//! ## Crate Structure
//!
//! - `client` — the [`HsmClient`] port trait and its data types
//! - `soft` — [`SoftHsm`], an in-process adapter deriving with HKDF-SHA256
//! - `pool` — bounded [`HsmPool`] handing out sessions
//! - `derivation` — [`KeyDerivation`], the per-purpose derivation service
//!
//! The salt race protocol itself lives with the frontend; this crate only
//! provides the initial/subsequent derivation pair it is built from.

pub mod client;
pub mod derivation;
pub mod pool;
pub mod soft;

pub use client::{DeriveKeyOutput, HsmClient, KeyPurpose, OptionalDeriveKeyData};
pub use derivation::KeyDerivation;
pub use pool::{HsmPool, HsmSession};
pub use soft::SoftHsm;

//! # Domain Frontend
//!
//! The single unit that converts encrypted database records into plaintext
//! domain objects and back. For every operation it chooses
//!
//! - the hashed identifier under which the record is indexed,
//! - the key-derivation purpose and derivation data,
//! - the compression dictionary of each column (JSON payloads vs XML
//!   signature containers),
//!
//! and runs the salt race protocol where a key might not exist yet.
//!
//! Nothing below this layer sees plaintext; nothing above it sees
//! ciphertext.

pub mod audit;
pub mod frontend;

pub use frontend::{DatabaseFrontend, TaskAndKey};

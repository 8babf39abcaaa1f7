//! # Data-Layer Test Suite
//!
//! Unified test crate for the cross-crate scenarios: full write/read paths
//! through the frontend, key-derivation convergence across connections,
//! search and paging behavior against real rows.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── support.rs          # shared fixtures
//!     ├── task_lifecycle.rs   # create/activate/dispense/close/cancel
//!     ├── key_race.rs         # salt coordination across connections
//!     ├── communications.rs   # dual-ciphertext messages
//!     ├── search_paging.rs    # URL search against stored rows, links
//!     ├── charge_items.rs     # PKV flows and rejection
//!     └── audit_log.rs        # encrypted audit trail
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p erx-tests
//! ```

#[cfg(test)]
mod integration;

//! # Storage Backend
//!
//! Owns the SQL schema and exposes typed CRUD over *encrypted* records.
//! Nothing in this crate can decrypt anything: ciphertexts, salts and hashed
//! identifiers pass through opaquely. The domain frontend is the only unit
//! that converts between encrypted rows and plaintext entities.
//!
//! ## Transaction discipline
//!
//! One [`ErxBackend`] instance owns one connection and one transaction.
//! Every operation runs inside that transaction; `commit_transaction` and
//! `close_connection` are idempotent against double invocation, but any
//! operation after commit is a logic error. Closing without commit rolls
//! back.
//!
//! ## Task partitioning
//!
//! Tasks live in five physical tables, one per flow type; per-flow retention
//! and query patterns differ enough that shared-table indexes would degrade.
//! A `task_view` union of the five tables serves the cross-flow listings.

pub mod backend;
pub mod charge_item;
pub mod communication;
pub mod models;
pub mod schema;
pub mod task;

pub use backend::{CmacKeyCategory, ErxBackend};
pub use models::{
    AuditRow, ChargeItemRow, CommunicationRow, MedicationDispenseRow, TaskRow,
};
pub use schema::task_table_name;

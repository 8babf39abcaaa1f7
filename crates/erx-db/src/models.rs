//! Typed encrypted-row structures.
//!
//! These are the shapes the backend reads and writes; every sensitive member
//! is an [`EncryptedBlob`] or a [`HashedId`]. Read operations select
//! projections appropriate to the caller's role, so most optional members
//! are `None` for rows produced by narrower queries.

use chrono::{DateTime, NaiveDate, Utc};

use erx_types::{Blob, BlobId, EncryptedBlob, HashedId, PrescriptionId, Suuid, TaskStatus};

/// One row of a task table, as selected by one of the read projections.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub prescription_id: PrescriptionId,
    pub kvnr: Option<EncryptedBlob>,
    pub last_modified: DateTime<Utc>,
    pub authored_on: DateTime<Utc>,
    pub expiry_date: Option<NaiveDate>,
    pub accept_date: Option<NaiveDate>,
    pub status: TaskStatus,
    pub last_status_update: DateTime<Utc>,
    /// Salt of the task key; NULL after personal data was cleared.
    pub salt: Option<Blob>,
    pub blob_id: Option<BlobId>,
    pub access_code: Option<EncryptedBlob>,
    pub secret: Option<EncryptedBlob>,
    pub owner: Option<EncryptedBlob>,
    pub healthcare_provider_prescription: Option<EncryptedBlob>,
    pub receipt: Option<EncryptedBlob>,
    pub last_medication_dispense: Option<DateTime<Utc>>,
}

/// Key-derivation data of one task row.
#[derive(Debug, Clone)]
pub struct TaskKeyData {
    pub blob_id: Option<BlobId>,
    pub salt: Option<Blob>,
    pub authored_on: DateTime<Utc>,
}

/// One communication as retrieved for one side (the ciphertext matching the
/// caller, with the salt joined in from the account table).
#[derive(Debug, Clone)]
pub struct CommunicationRow {
    pub id: Suuid,
    pub received: Option<DateTime<Utc>>,
    pub message: EncryptedBlob,
    pub blob_id: BlobId,
    pub salt: Option<Blob>,
}

/// One audit log row.
#[derive(Debug, Clone)]
pub struct AuditRow {
    pub id: Suuid,
    pub recorded: DateTime<Utc>,
    pub event_id: i16,
    pub action: char,
    pub agent_type: i16,
    pub device_id: i16,
    pub prescription_id: Option<PrescriptionId>,
    pub metadata: Option<EncryptedBlob>,
    pub blob_id: Option<BlobId>,
}

/// One medication dispense projection from the task view.
#[derive(Debug, Clone)]
pub struct MedicationDispenseRow {
    pub prescription_id: PrescriptionId,
    pub bundle: EncryptedBlob,
    pub blob_id: BlobId,
    pub salt: Blob,
}

/// One charge item row (PKV flows only).
#[derive(Debug, Clone)]
pub struct ChargeItemRow {
    pub prescription_id: PrescriptionId,
    pub enterer: EncryptedBlob,
    pub entered_date: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub marking_flags: Option<EncryptedBlob>,
    pub blob_id: BlobId,
    pub salt: Blob,
    pub access_code: EncryptedBlob,
    pub kvnr: EncryptedBlob,
    pub prescription: EncryptedBlob,
    pub prescription_json: EncryptedBlob,
    pub receipt_xml: EncryptedBlob,
    pub receipt_json: EncryptedBlob,
    pub billing_data: EncryptedBlob,
    pub billing_data_json: EncryptedBlob,
}

/// Hashed account id used in the salt table and communication endpoints.
pub type AccountId = HashedId;

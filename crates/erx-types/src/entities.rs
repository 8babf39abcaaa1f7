//! Plaintext domain entities.
//!
//! The data layer treats every domain payload as an opaque, serialisable
//! value: prescriptions, receipts, communication messages and audit metadata
//! travel as JSON strings. Deep resource typing is the caller's concern.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ErxError, ErxResult};
use crate::identifiers::{Kvnr, TelematikId};
use crate::prescription_id::{FlowType, PrescriptionId};
use crate::status::TaskStatus;
use crate::suuid::Suuid;

/// A prescription task in plaintext form.
///
/// `prescription_id` and `authored_on` are assigned by the storage layer at
/// creation; `authored_on` is set once and never changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub prescription_id: Option<PrescriptionId>,
    pub flow_type: FlowType,
    pub status: TaskStatus,
    pub authored_on: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub last_status_change: DateTime<Utc>,
    pub kvnr: Option<Kvnr>,
    pub expiry_date: Option<NaiveDate>,
    pub accept_date: Option<NaiveDate>,
    pub access_code: Option<String>,
    pub secret: Option<String>,
    pub owner: Option<TelematikId>,
    pub last_medication_dispense: Option<DateTime<Utc>>,
}

/// Snapshot of an access-token identity (doctor or pharmacy), persisted
/// encrypted next to the signed payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenIdentity {
    pub id: String,
    pub name: String,
    pub profession_oid: String,
}

impl AccessTokenIdentity {
    pub fn to_json_string(&self) -> ErxResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_str(json: &str) -> ErxResult<Self> {
        serde_json::from_str(json)
            .map_err(|err| ErxError::internal(format!("access token identity: {err}")))
    }
}

/// Message category of a communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum MessageType {
    InfoReq = 0,
    Reply = 1,
    DispReq = 2,
    Representative = 3,
    ChargChangeReq = 4,
    ChargChangeReply = 5,
}

impl MessageType {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> ErxResult<Self> {
        match value {
            0 => Ok(MessageType::InfoReq),
            1 => Ok(MessageType::Reply),
            2 => Ok(MessageType::DispReq),
            3 => Ok(MessageType::Representative),
            4 => Ok(MessageType::ChargChangeReq),
            5 => Ok(MessageType::ChargChangeReply),
            other => Err(ErxError::internal(format!(
                "message type {other} outside domain"
            ))),
        }
    }

    /// The two categories that reference a charge item instead of a task.
    pub fn is_charge_item_related(self) -> bool {
        matches!(self, MessageType::ChargChangeReq | MessageType::ChargChangeReply)
    }
}

/// A message between two endpoints of one prescription.
///
/// Stored as two ciphertexts of the same payload, one per endpoint. The id
/// and the received timestamp are assigned by the storage layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Communication {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<Suuid>,
    pub message_type: MessageType,
    pub sender: String,
    pub recipient: String,
    pub prescription_id: PrescriptionId,
    pub sent: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub received: Option<DateTime<Utc>>,
    /// Opaque message payload (JSON).
    pub payload: String,
}

impl Communication {
    pub fn to_json_string(&self) -> ErxResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_str(json: &str) -> ErxResult<Self> {
        serde_json::from_str(json)
            .map_err(|err| ErxError::internal(format!("communication payload: {err}")))
    }
}

/// Plaintext view of a stored medication dispense bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MedicationDispense {
    pub prescription_id: PrescriptionId,
    /// Opaque dispense bundle (JSON).
    pub bundle: String,
}

/// Audit event kinds that the data layer records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum AuditEventId {
    GetTask = 1,
    GetTasks = 2,
    PostTaskActivate = 3,
    PostTaskAccept = 4,
    PostTaskClose = 5,
    PostTaskAbort = 6,
    PostTaskReject = 7,
    GetMedicationDispense = 8,
    DeleteCommunication = 9,
    PostConsent = 10,
    DeleteConsent = 11,
    PostChargeItem = 12,
    PutChargeItem = 13,
    DeleteChargeItem = 14,
    GetChargeItem = 15,
    DeleteTaskMedicationDispense = 16,
}

impl AuditEventId {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> ErxResult<Self> {
        use AuditEventId::*;
        let id = match value {
            1 => GetTask,
            2 => GetTasks,
            3 => PostTaskActivate,
            4 => PostTaskAccept,
            5 => PostTaskClose,
            6 => PostTaskAbort,
            7 => PostTaskReject,
            8 => GetMedicationDispense,
            9 => DeleteCommunication,
            10 => PostConsent,
            11 => DeleteConsent,
            12 => PostChargeItem,
            13 => PutChargeItem,
            14 => DeleteChargeItem,
            15 => GetChargeItem,
            16 => DeleteTaskMedicationDispense,
            other => {
                return Err(ErxError::internal(format!(
                    "audit event id {other} outside domain"
                )))
            }
        };
        Ok(id)
    }
}

/// CRUD action of an audit event, stored as a single character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_char(self) -> char {
        match self {
            AuditAction::Create => 'C',
            AuditAction::Read => 'R',
            AuditAction::Update => 'U',
            AuditAction::Delete => 'D',
        }
    }

    pub fn from_char(value: char) -> ErxResult<Self> {
        match value {
            'C' => Ok(AuditAction::Create),
            'R' => Ok(AuditAction::Read),
            'U' => Ok(AuditAction::Update),
            'D' => Ok(AuditAction::Delete),
            other => Err(ErxError::internal(format!(
                "audit action '{other}' outside domain"
            ))),
        }
    }
}

/// Who performed an audited access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum AuditAgentType {
    Insurant = 0,
    Representative = 1,
    HealthcareProvider = 2,
}

impl AuditAgentType {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(value: i16) -> ErxResult<Self> {
        match value {
            0 => Ok(AuditAgentType::Insurant),
            1 => Ok(AuditAgentType::Representative),
            2 => Ok(AuditAgentType::HealthcareProvider),
            other => Err(ErxError::internal(format!(
                "audit agent type {other} outside domain"
            ))),
        }
    }
}

/// Agent name and id shown in rendered audit events; persisted encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditMetaData {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub agent_who: Option<String>,
}

impl AuditMetaData {
    /// Metadata is persisted only when it carries content.
    pub fn is_empty(&self) -> bool {
        self.agent_name.is_none() && self.agent_who.is_none()
    }

    pub fn to_json_string(&self) -> ErxResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_str(json: &str) -> ErxResult<Self> {
        serde_json::from_str(json)
            .map_err(|err| ErxError::internal(format!("audit metadata: {err}")))
    }
}

/// One entry of the append-only audit log, plaintext form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditData {
    pub id: Option<Suuid>,
    pub event_id: AuditEventId,
    pub action: AuditAction,
    pub agent_type: AuditAgentType,
    pub insurant: Kvnr,
    pub device_id: i16,
    pub prescription_id: Option<PrescriptionId>,
    pub metadata: AuditMetaData,
    pub recorded: Option<DateTime<Utc>>,
}

/// The charge item proper (PKV flows only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeItem {
    pub prescription_id: PrescriptionId,
    pub enterer: TelematikId,
    pub kvnr: Kvnr,
    pub entered_date: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub access_code: String,
    /// Insurant marking flags (JSON), if any were set.
    pub marking_flags: Option<String>,
}

/// A charge item with its signed and unsigned payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeInformation {
    pub charge_item: ChargeItem,
    /// Signed prescription (CAdES container, XML).
    pub prescription: String,
    /// Unsigned prescription bundle (JSON).
    pub unsigned_prescription: String,
    /// Signed dispense/billing data (XML).
    pub dispense_item: String,
    /// Unsigned dispense/billing bundle (JSON).
    pub unsigned_dispense_item: String,
    /// Signed receipt (XML).
    pub receipt: String,
    /// Unsigned receipt bundle (JSON).
    pub unsigned_receipt: String,
}

/// Consent of an insurant to charge-item storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consent {
    pub kvnr: Kvnr,
    pub date_time: DateTime<Utc>,
}

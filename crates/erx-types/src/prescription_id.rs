//! Prescription identifiers and flow types.
//!
//! A prescription id is the pair of a flow type and a 64-bit serial assigned
//! by the task table of that flow. The textual form groups the serial into
//! four three-digit blocks and appends an ISO 7064 mod 97-10 check number:
//! `160.000.000.004.711.86`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{ErxError, ErxResult};

/// Two-digit classifier of a prescription.
///
/// Determines insurance type (public/private) and assignment semantics
/// (self-pickup vs direct assignment). Each flow type has its own physical
/// task table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FlowType {
    /// 160: pharmacy-only medicines, statutory insurance.
    PharmacyOnly = 160,
    /// 162: digital health applications.
    DigitalHealthApp = 162,
    /// 169: direct assignment to a pharmacy, statutory insurance.
    DirectAssignment = 169,
    /// 200: pharmacy-only medicines, private insurance.
    PharmacyOnlyPkv = 200,
    /// 209: direct assignment, private insurance.
    DirectAssignmentPkv = 209,
}

impl FlowType {
    pub const ALL: [FlowType; 5] = [
        FlowType::PharmacyOnly,
        FlowType::DigitalHealthApp,
        FlowType::DirectAssignment,
        FlowType::PharmacyOnlyPkv,
        FlowType::DirectAssignmentPkv,
    ];

    pub fn from_code(code: u8) -> ErxResult<Self> {
        match code {
            160 => Ok(FlowType::PharmacyOnly),
            162 => Ok(FlowType::DigitalHealthApp),
            169 => Ok(FlowType::DirectAssignment),
            200 => Ok(FlowType::PharmacyOnlyPkv),
            209 => Ok(FlowType::DirectAssignmentPkv),
            other => Err(ErxError::bad_request(format!("unknown flow type {other}"))),
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Private-insurance flows; the only ones for which charge items exist.
    pub fn is_pkv(self) -> bool {
        matches!(self, FlowType::PharmacyOnlyPkv | FlowType::DirectAssignmentPkv)
    }

    /// Direct-assignment flows never expose an access code to the insurant.
    pub fn is_direct_assignment(self) -> bool {
        matches!(self, FlowType::DirectAssignment | FlowType::DirectAssignmentPkv)
    }
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Naming system URI prefixing prescription ids in FHIR search values.
pub const PRESCRIPTION_ID_NAMING_SYSTEM: &str = "https://gematik.de/fhir/erp/NamingSystem/GEM_ERP_NS_PrescriptionId";

/// Identifier of a prescription: flow type plus table-assigned serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrescriptionId {
    flow_type: FlowType,
    serial: u64,
}

const MAX_SERIAL: u64 = 999_999_999_999;

impl PrescriptionId {
    pub fn new(flow_type: FlowType, serial: u64) -> ErxResult<Self> {
        if serial > MAX_SERIAL {
            return Err(ErxError::internal(format!(
                "prescription serial {serial} exceeds twelve digits"
            )));
        }
        Ok(Self { flow_type, serial })
    }

    /// Reconstruct from the database serial column.
    pub fn from_database_id(flow_type: FlowType, database_id: i64) -> ErxResult<Self> {
        if database_id < 0 {
            return Err(ErxError::internal(format!(
                "negative prescription serial {database_id}"
            )));
        }
        Self::new(flow_type, database_id as u64)
    }

    pub fn flow_type(&self) -> FlowType {
        self.flow_type
    }

    pub fn database_id(&self) -> i64 {
        self.serial as i64
    }

    /// ISO 7064 mod 97-10 check number over flow type and serial.
    fn checksum(&self) -> u8 {
        let value = u128::from(self.flow_type.code()) * 1_000_000_000_000u128
            + u128::from(self.serial);
        (98 - (value * 100 % 97)) as u8
    }

    /// Parse the dotted textual form, validating the check number.
    pub fn parse(text: &str) -> ErxResult<Self> {
        let parts: Vec<&str> = text.split('.').collect();
        if parts.len() != 6 {
            return Err(ErxError::bad_request(format!(
                "malformed prescription id: {text}"
            )));
        }
        let flow_code: u8 = parts[0]
            .parse()
            .map_err(|_| ErxError::bad_request(format!("malformed prescription id: {text}")))?;
        let flow_type = FlowType::from_code(flow_code)?;
        let mut serial: u64 = 0;
        for group in &parts[1..5] {
            if group.len() != 3 || !group.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ErxError::bad_request(format!(
                    "malformed prescription id: {text}"
                )));
            }
            let value: u64 = group.parse().map_err(|_| {
                ErxError::bad_request(format!("malformed prescription id: {text}"))
            })?;
            serial = serial * 1000 + value;
        }
        let check: u8 = parts[5]
            .parse()
            .map_err(|_| ErxError::bad_request(format!("malformed prescription id: {text}")))?;
        let id = Self::new(flow_type, serial)?;
        if id.checksum() != check {
            return Err(ErxError::bad_request(format!(
                "prescription id checksum mismatch: {text}"
            )));
        }
        Ok(id)
    }
}

impl fmt::Display for PrescriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.serial;
        write!(
            f,
            "{}.{:03}.{:03}.{:03}.{:03}.{:02}",
            self.flow_type.code(),
            s / 1_000_000_000 % 1000,
            s / 1_000_000 % 1000,
            s / 1000 % 1000,
            s % 1000,
            self.checksum()
        )
    }
}

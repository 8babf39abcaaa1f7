//! Charge item CRUD (PKV flows only).
//!
//! Every operation rejects prescription ids outside the private-insurance
//! flow types before any SQL executes.

use rusqlite::{params, OptionalExtension};

use erx_query::UrlArguments;
use erx_types::{
    timestamp, Blob, EncryptedBlob, ErxError, ErxResult, FlowType, HashedId, PrescriptionId,
};

use crate::backend::{db_error, ErxBackend};
use crate::models::ChargeItemRow;

fn check_pkv(prescription_id: &PrescriptionId) -> ErxResult<()> {
    if !prescription_id.flow_type().is_pkv() {
        return Err(ErxError::bad_request(format!(
            "charge items require a PKV flow type, got {}",
            prescription_id.flow_type()
        )));
    }
    Ok(())
}

const CHARGE_ITEM_COLUMNS: &str = "prescription_type, prescription_id, enterer, entered_date, \
     last_modified, marking_flag, blob_id, salt, access_code, kvnr, prescription, \
     prescription_json, receipt_xml, receipt_json, billing_data, billing_data_json";

type RawChargeItemRow = (
    i16,
    i64,
    Vec<u8>,
    String,
    String,
    Option<Vec<u8>>,
    u32,
    Vec<u8>,
    Vec<u8>,
    Vec<u8>,
    Vec<u8>,
    Vec<u8>,
    Vec<u8>,
    Vec<u8>,
    Vec<u8>,
    Vec<u8>,
);

fn read_raw_charge_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawChargeItemRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
        row.get(14)?,
        row.get(15)?,
    ))
}

fn finish_charge_item_row(raw: RawChargeItemRow) -> ErxResult<ChargeItemRow> {
    let (
        flow_code,
        database_id,
        enterer,
        entered_date,
        last_modified,
        marking_flag,
        blob_id,
        salt,
        access_code,
        kvnr,
        prescription,
        prescription_json,
        receipt_xml,
        receipt_json,
        billing_data,
        billing_data_json,
    ) = raw;
    Ok(ChargeItemRow {
        prescription_id: PrescriptionId::from_database_id(
            FlowType::from_code(flow_code as u8)?,
            database_id,
        )?,
        enterer: EncryptedBlob::new(enterer),
        entered_date: timestamp::parse_db_timestamp(&entered_date)?,
        last_modified: timestamp::parse_db_timestamp(&last_modified)?,
        marking_flags: marking_flag.map(EncryptedBlob::new),
        blob_id,
        salt: Blob::new(salt),
        access_code: EncryptedBlob::new(access_code),
        kvnr: EncryptedBlob::new(kvnr),
        prescription: EncryptedBlob::new(prescription),
        prescription_json: EncryptedBlob::new(prescription_json),
        receipt_xml: EncryptedBlob::new(receipt_xml),
        receipt_json: EncryptedBlob::new(receipt_json),
        billing_data: EncryptedBlob::new(billing_data),
        billing_data_json: EncryptedBlob::new(billing_data_json),
    })
}

impl ErxBackend {
    pub fn store_charge_information(
        &self,
        charge_item: &ChargeItemRow,
        kvnr_hashed: &HashedId,
    ) -> ErxResult<()> {
        self.check_preconditions()?;
        check_pkv(&charge_item.prescription_id)?;
        self.connection
            .execute(
                "INSERT INTO charge_item (prescription_type, prescription_id, enterer,
                        entered_date, last_modified, marking_flag, blob_id, salt, access_code,
                        kvnr, kvnr_hashed, prescription, prescription_json, receipt_xml,
                        receipt_json, billing_data, billing_data_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    charge_item.prescription_id.flow_type().code(),
                    charge_item.prescription_id.database_id(),
                    charge_item.enterer.as_bytes(),
                    timestamp::to_db_timestamp(charge_item.entered_date),
                    timestamp::to_db_timestamp(charge_item.last_modified),
                    charge_item.marking_flags.as_ref().map(EncryptedBlob::as_bytes),
                    charge_item.blob_id,
                    charge_item.salt.as_bytes(),
                    charge_item.access_code.as_bytes(),
                    charge_item.kvnr.as_bytes(),
                    kvnr_hashed.as_bytes(),
                    charge_item.prescription.as_bytes(),
                    charge_item.prescription_json.as_bytes(),
                    charge_item.receipt_xml.as_bytes(),
                    charge_item.receipt_json.as_bytes(),
                    charge_item.billing_data.as_bytes(),
                    charge_item.billing_data_json.as_bytes()
                ],
            )
            .map_err(db_error)?;
        Ok(())
    }

    /// Replace the insurant-changeable parts: marking flags and billing
    /// data. Everything else is immutable after store.
    pub fn update_charge_information(
        &self,
        prescription_id: &PrescriptionId,
        marking_flags: Option<&EncryptedBlob>,
        billing_data: &EncryptedBlob,
        billing_data_json: &EncryptedBlob,
        last_modified: chrono::DateTime<chrono::Utc>,
    ) -> ErxResult<()> {
        self.check_preconditions()?;
        check_pkv(prescription_id)?;
        let updated = self
            .connection
            .execute(
                "UPDATE charge_item
                 SET marking_flag = ?3, last_modified = ?4, billing_data = ?5,
                     billing_data_json = ?6
                 WHERE prescription_type = ?1 AND prescription_id = ?2",
                params![
                    prescription_id.flow_type().code(),
                    prescription_id.database_id(),
                    marking_flags.map(EncryptedBlob::as_bytes),
                    timestamp::to_db_timestamp(last_modified),
                    billing_data.as_bytes(),
                    billing_data_json.as_bytes()
                ],
            )
            .map_err(db_error)?;
        if updated == 0 {
            return Err(ErxError::not_found(format!(
                "no charge item {prescription_id}"
            )));
        }
        Ok(())
    }

    pub fn retrieve_charge_information(
        &self,
        prescription_id: &PrescriptionId,
    ) -> ErxResult<ChargeItemRow> {
        self.check_preconditions()?;
        check_pkv(prescription_id)?;
        let sql = format!(
            "SELECT {CHARGE_ITEM_COLUMNS} FROM charge_item
             WHERE prescription_type = ?1 AND prescription_id = ?2"
        );
        let raw = self
            .connection
            .query_row(
                &sql,
                params![
                    prescription_id.flow_type().code(),
                    prescription_id.database_id()
                ],
                read_raw_charge_item,
            )
            .optional()
            .map_err(db_error)?;
        raw.map(finish_charge_item_row)
            .transpose()?
            .ok_or_else(|| ErxError::not_found(format!("no charge item {prescription_id}")))
    }

    pub fn retrieve_all_charge_items_for_insurant(
        &self,
        kvnr_hashed: &HashedId,
        search: Option<&UrlArguments>,
    ) -> ErxResult<Vec<ChargeItemRow>> {
        self.check_preconditions()?;
        let mut sql =
            format!("SELECT {CHARGE_ITEM_COLUMNS} FROM charge_item WHERE kvnr_hashed = ?1");
        if let Some(search) = search {
            sql.push_str(&search.sql_expression("", false)?);
        }
        tracing::trace!("{sql}");
        let mut statement = self.connection.prepare(&sql).map_err(db_error)?;
        let rows = statement
            .query_map(params![kvnr_hashed.as_bytes()], read_raw_charge_item)
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;
        rows.into_iter().map(finish_charge_item_row).collect()
    }

    pub fn count_charge_information_for_insurant(
        &self,
        kvnr_hashed: &HashedId,
        search: Option<&UrlArguments>,
    ) -> ErxResult<u64> {
        self.count_with_search(
            "SELECT COUNT(*) FROM charge_item WHERE kvnr_hashed = ?1",
            kvnr_hashed,
            search,
        )
    }

    pub fn delete_charge_information(&self, prescription_id: &PrescriptionId) -> ErxResult<()> {
        self.check_preconditions()?;
        check_pkv(prescription_id)?;
        let deleted = self
            .connection
            .execute(
                "DELETE FROM charge_item WHERE prescription_type = ?1 AND prescription_id = ?2",
                params![
                    prescription_id.flow_type().code(),
                    prescription_id.database_id()
                ],
            )
            .map_err(db_error)?;
        if deleted == 0 {
            return Err(ErxError::not_found(format!(
                "no charge item {prescription_id}"
            )));
        }
        Ok(())
    }

    /// Consent withdrawal: every charge item of the insurant goes.
    pub fn clear_all_charge_information(&self, kvnr_hashed: &HashedId) -> ErxResult<()> {
        self.check_preconditions()?;
        self.connection
            .execute(
                "DELETE FROM charge_item WHERE kvnr_hashed = ?1",
                params![kvnr_hashed.as_bytes()],
            )
            .map_err(db_error)?;
        Ok(())
    }
}

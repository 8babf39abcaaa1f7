//! Task CRUD, partitioned across the five flow-type tables.
//!
//! Mutations address a single table chosen by the prescription id's flow
//! type. Reads come in a family of projections so that every caller sees
//! only the encrypted columns its role needs; the cross-flow listings go
//! through the `task_view` union.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};

use erx_query::UrlArguments;
use erx_types::{
    timestamp, Blob, BlobId, EncryptedBlob, ErxError, ErxResult, FlowType, HashedId,
    PrescriptionId, TaskStatus,
};

use crate::backend::{db_error, ErxBackend};
use crate::models::{MedicationDispenseRow, TaskKeyData, TaskRow};
use crate::schema::task_table_name;

/// Which encrypted columns a read operation hands back.
#[derive(Clone, Copy)]
struct Projection {
    access_code: bool,
    secret: bool,
    owner: bool,
    prescription: bool,
    receipt: bool,
}

const TASK_COLUMNS: &str = "prescription_id, kvnr, last_modified, authored_on, expiry_date, \
     accept_date, status, last_status_update, salt, task_key_blob_id, access_code, secret, \
     owner, healthcare_provider_prescription, receipt, last_medication_dispense";

type RawTaskRow = (
    i64,
    Option<Vec<u8>>,
    String,
    String,
    Option<String>,
    Option<String>,
    i16,
    String,
    Option<Vec<u8>>,
    Option<u32>,
    Option<Vec<u8>>,
    Option<Vec<u8>>,
    Option<Vec<u8>>,
    Option<Vec<u8>>,
    Option<Vec<u8>>,
    Option<String>,
);

fn read_raw_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTaskRow> {
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

fn finish_task_row(
    raw: RawTaskRow,
    flow_type: FlowType,
    projection: Projection,
) -> ErxResult<TaskRow> {
    let (
        database_id,
        kvnr,
        last_modified,
        authored_on,
        expiry_date,
        accept_date,
        status,
        last_status_update,
        salt,
        blob_id,
        access_code,
        secret,
        owner,
        prescription,
        receipt,
        last_medication_dispense,
    ) = raw;
    Ok(TaskRow {
        prescription_id: PrescriptionId::from_database_id(flow_type, database_id)?,
        kvnr: kvnr.map(EncryptedBlob::new),
        last_modified: timestamp::parse_db_timestamp(&last_modified)?,
        authored_on: timestamp::parse_db_timestamp(&authored_on)?,
        expiry_date: expiry_date
            .map(|text| timestamp::parse_db_date(&text))
            .transpose()?,
        accept_date: accept_date
            .map(|text| timestamp::parse_db_date(&text))
            .transpose()?,
        status: TaskStatus::from_i16(status)?,
        last_status_update: timestamp::parse_db_timestamp(&last_status_update)?,
        salt: salt.map(Blob::new),
        blob_id,
        access_code: projection
            .access_code
            .then_some(access_code.map(EncryptedBlob::new))
            .flatten(),
        secret: projection
            .secret
            .then_some(secret.map(EncryptedBlob::new))
            .flatten(),
        owner: projection.owner.then_some(owner.map(EncryptedBlob::new)).flatten(),
        healthcare_provider_prescription: projection
            .prescription
            .then_some(prescription.map(EncryptedBlob::new))
            .flatten(),
        receipt: projection
            .receipt
            .then_some(receipt.map(EncryptedBlob::new))
            .flatten(),
        last_medication_dispense: last_medication_dispense
            .map(|text| timestamp::parse_db_timestamp(&text))
            .transpose()?,
    })
}

impl ErxBackend {
    /// Create a task row; the table assigns the serial and the stored
    /// authored-on is rounded to whole seconds. The returned authored-on is
    /// the stored value, which initial key derivation must use.
    pub fn create_task(
        &self,
        flow_type: FlowType,
        status: TaskStatus,
        last_modified: DateTime<Utc>,
        authored_on: DateTime<Utc>,
        last_status_update: DateTime<Utc>,
    ) -> ErxResult<(PrescriptionId, DateTime<Utc>)> {
        self.check_preconditions()?;
        let table = task_table_name(flow_type);
        let sql = format!(
            "INSERT INTO {table} (last_modified, authored_on, status, last_status_update)
             VALUES (?1, ?2, ?3, ?4)
             RETURNING prescription_id, authored_on"
        );
        tracing::trace!("{sql}");
        let (database_id, stored_authored_on): (i64, String) = self
            .connection
            .query_row(
                &sql,
                params![
                    timestamp::to_db_timestamp(last_modified),
                    timestamp::to_db_timestamp(authored_on),
                    status.as_i16(),
                    timestamp::to_db_timestamp(last_status_update)
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(db_error)?;
        Ok((
            PrescriptionId::from_database_id(flow_type, database_id)?,
            timestamp::parse_db_timestamp(&stored_authored_on)?,
        ))
    }

    /// Store the derivation data and encrypted access code of a fresh task.
    pub fn update_task(
        &self,
        task_id: &PrescriptionId,
        access_code: &EncryptedBlob,
        blob_id: BlobId,
        salt: &Blob,
    ) -> ErxResult<()> {
        self.check_preconditions()?;
        let table = task_table_name(task_id.flow_type());
        let updated = self
            .connection
            .execute(
                &format!(
                    "UPDATE {table} SET task_key_blob_id = ?2, salt = ?3, access_code = ?4
                     WHERE prescription_id = ?1"
                ),
                params![
                    task_id.database_id(),
                    blob_id,
                    salt.as_bytes(),
                    access_code.as_bytes()
                ],
            )
            .map_err(db_error)?;
        expect_one_row(updated, task_id)
    }

    pub fn update_task_status_and_secret(
        &self,
        task_id: &PrescriptionId,
        status: TaskStatus,
        last_modified: DateTime<Utc>,
        secret: Option<&EncryptedBlob>,
        owner: Option<&EncryptedBlob>,
        last_status_update: DateTime<Utc>,
    ) -> ErxResult<()> {
        self.check_preconditions()?;
        let table = task_table_name(task_id.flow_type());
        let updated = self
            .connection
            .execute(
                &format!(
                    "UPDATE {table} SET status = ?2, last_modified = ?3, secret = ?4, owner = ?5,
                            last_status_update = ?6
                     WHERE prescription_id = ?1"
                ),
                params![
                    task_id.database_id(),
                    status.as_i16(),
                    timestamp::to_db_timestamp(last_modified),
                    secret.map(EncryptedBlob::as_bytes),
                    owner.map(EncryptedBlob::as_bytes),
                    timestamp::to_db_timestamp(last_status_update)
                ],
            )
            .map_err(db_error)?;
        expect_one_row(updated, task_id)
    }

    /// The draft→ready transition: store the encrypted KVNR, the hashed
    /// KVNR, the signed prescription and the prescriber identity snapshot,
    /// and set the Berlin-calendar expiry and accept dates.
    #[allow(clippy::too_many_arguments)]
    pub fn activate_task(
        &self,
        task_id: &PrescriptionId,
        kvnr: &EncryptedBlob,
        kvnr_hashed: &HashedId,
        status: TaskStatus,
        last_modified: DateTime<Utc>,
        expiry_date: NaiveDate,
        accept_date: NaiveDate,
        healthcare_provider_prescription: &EncryptedBlob,
        doctor_identity: &EncryptedBlob,
        last_status_update: DateTime<Utc>,
    ) -> ErxResult<()> {
        self.check_preconditions()?;
        let table = task_table_name(task_id.flow_type());
        let updated = self
            .connection
            .execute(
                &format!(
                    "UPDATE {table}
                     SET kvnr = ?2, kvnr_hashed = ?3, last_modified = ?4, expiry_date = ?5,
                         accept_date = ?6, status = ?7, healthcare_provider_prescription = ?8,
                         doctor_identity = ?9, last_status_update = ?10
                     WHERE prescription_id = ?1"
                ),
                params![
                    task_id.database_id(),
                    kvnr.as_bytes(),
                    kvnr_hashed.as_bytes(),
                    timestamp::to_db_timestamp(last_modified),
                    timestamp::to_db_date(expiry_date),
                    timestamp::to_db_date(accept_date),
                    status.as_i16(),
                    healthcare_provider_prescription.as_bytes(),
                    doctor_identity.as_bytes(),
                    timestamp::to_db_timestamp(last_status_update)
                ],
            )
            .map_err(db_error)?;
        expect_one_row(updated, task_id)
    }

    pub fn update_task_receipt(
        &self,
        task_id: &PrescriptionId,
        status: TaskStatus,
        last_modified: DateTime<Utc>,
        receipt: &EncryptedBlob,
        pharmacy_identity: &EncryptedBlob,
        last_status_update: DateTime<Utc>,
    ) -> ErxResult<()> {
        self.check_preconditions()?;
        let table = task_table_name(task_id.flow_type());
        let updated = self
            .connection
            .execute(
                &format!(
                    "UPDATE {table} SET status = ?2, last_modified = ?3, receipt = ?4,
                            pharmacy_identity = ?5, last_status_update = ?6
                     WHERE prescription_id = ?1"
                ),
                params![
                    task_id.database_id(),
                    status.as_i16(),
                    timestamp::to_db_timestamp(last_modified),
                    receipt.as_bytes(),
                    pharmacy_identity.as_bytes(),
                    timestamp::to_db_timestamp(last_status_update)
                ],
            )
            .map_err(db_error)?;
        expect_one_row(updated, task_id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_task_medication_dispense(
        &self,
        task_id: &PrescriptionId,
        last_modified: DateTime<Utc>,
        last_medication_dispense: DateTime<Utc>,
        medication_dispense_bundle: &EncryptedBlob,
        blob_id: BlobId,
        performer: &HashedId,
        when_handed_over: DateTime<Utc>,
        when_prepared: Option<DateTime<Utc>>,
        salt: &Blob,
    ) -> ErxResult<()> {
        self.check_preconditions()?;
        let table = task_table_name(task_id.flow_type());
        let updated = self
            .connection
            .execute(
                &format!(
                    "UPDATE {table}
                     SET last_modified = ?2, medication_dispense_bundle = ?3,
                         medication_dispense_blob_id = ?4, when_handed_over = ?5,
                         when_prepared = ?6, performer = ?7, last_medication_dispense = ?8,
                         medication_dispense_salt = ?9
                     WHERE prescription_id = ?1"
                ),
                params![
                    task_id.database_id(),
                    timestamp::to_db_timestamp(last_modified),
                    medication_dispense_bundle.as_bytes(),
                    blob_id,
                    timestamp::to_db_timestamp(when_handed_over),
                    when_prepared.map(timestamp::to_db_timestamp),
                    performer.as_bytes(),
                    timestamp::to_db_timestamp(last_medication_dispense),
                    salt.as_bytes()
                ],
            )
            .map_err(db_error)?;
        expect_one_row(updated, task_id)
    }

    /// The dispense-and-close transition: medication dispense, receipt and
    /// pharmacy identity in one statement.
    #[allow(clippy::too_many_arguments)]
    pub fn update_task_medication_dispense_receipt(
        &self,
        task_id: &PrescriptionId,
        status: TaskStatus,
        last_modified: DateTime<Utc>,
        medication_dispense_bundle: &EncryptedBlob,
        medication_dispense_blob_id: BlobId,
        performer: &HashedId,
        when_handed_over: DateTime<Utc>,
        when_prepared: Option<DateTime<Utc>>,
        receipt: &EncryptedBlob,
        last_medication_dispense: DateTime<Utc>,
        medication_dispense_salt: &Blob,
        pharmacy_identity: &EncryptedBlob,
        last_status_update: DateTime<Utc>,
    ) -> ErxResult<()> {
        self.check_preconditions()?;
        let table = task_table_name(task_id.flow_type());
        let updated = self
            .connection
            .execute(
                &format!(
                    "UPDATE {table}
                     SET status = ?2, last_modified = ?3, medication_dispense_bundle = ?4,
                         medication_dispense_blob_id = ?5, receipt = ?6, when_handed_over = ?7,
                         when_prepared = ?8, performer = ?9, last_medication_dispense = ?10,
                         medication_dispense_salt = ?11, pharmacy_identity = ?12,
                         last_status_update = ?13
                     WHERE prescription_id = ?1"
                ),
                params![
                    task_id.database_id(),
                    status.as_i16(),
                    timestamp::to_db_timestamp(last_modified),
                    medication_dispense_bundle.as_bytes(),
                    medication_dispense_blob_id,
                    receipt.as_bytes(),
                    timestamp::to_db_timestamp(when_handed_over),
                    when_prepared.map(timestamp::to_db_timestamp),
                    performer.as_bytes(),
                    timestamp::to_db_timestamp(last_medication_dispense),
                    medication_dispense_salt.as_bytes(),
                    pharmacy_identity.as_bytes(),
                    timestamp::to_db_timestamp(last_status_update)
                ],
            )
            .map_err(db_error)?;
        expect_one_row(updated, task_id)
    }

    pub fn update_task_delete_medication_dispense(
        &self,
        task_id: &PrescriptionId,
        last_modified: DateTime<Utc>,
    ) -> ErxResult<()> {
        self.check_preconditions()?;
        let table = task_table_name(task_id.flow_type());
        let updated = self
            .connection
            .execute(
                &format!(
                    "UPDATE {table}
                     SET last_modified = ?2, when_handed_over = NULL, when_prepared = NULL,
                         last_medication_dispense = NULL, performer = NULL,
                         medication_dispense_blob_id = NULL, medication_dispense_bundle = NULL
                     WHERE prescription_id = ?1"
                ),
                params![task_id.database_id(), timestamp::to_db_timestamp(last_modified)],
            )
            .map_err(db_error)?;
        expect_one_row(updated, task_id)
    }

    /// The cancel transition: every encrypted personal column and the task
    /// salt become NULL; only the skeleton of the row survives.
    pub fn update_task_clear_personal_data(
        &self,
        task_id: &PrescriptionId,
        status: TaskStatus,
        last_modified: DateTime<Utc>,
        last_status_update: DateTime<Utc>,
    ) -> ErxResult<()> {
        self.check_preconditions()?;
        let table = task_table_name(task_id.flow_type());
        let updated = self
            .connection
            .execute(
                &format!(
                    "UPDATE {table}
                     SET status = ?2, last_modified = ?3, kvnr = NULL, salt = NULL,
                         access_code = NULL, secret = NULL, owner = NULL,
                         healthcare_provider_prescription = NULL, receipt = NULL,
                         when_handed_over = NULL, when_prepared = NULL, performer = NULL,
                         medication_dispense_blob_id = NULL, medication_dispense_bundle = NULL,
                         last_medication_dispense = NULL, doctor_identity = NULL,
                         pharmacy_identity = NULL, last_status_update = ?4
                     WHERE prescription_id = ?1"
                ),
                params![
                    task_id.database_id(),
                    status.as_i16(),
                    timestamp::to_db_timestamp(last_modified),
                    timestamp::to_db_timestamp(last_status_update)
                ],
            )
            .map_err(db_error)?;
        expect_one_row(updated, task_id)
    }

    /// Salt, generation and stored authored-on of one task, read on mutation
    /// paths before deriving the task key.
    pub fn get_task_key_data(&self, task_id: &PrescriptionId) -> ErxResult<TaskKeyData> {
        self.check_preconditions()?;
        let table = task_table_name(task_id.flow_type());
        let row: Option<(Option<u32>, Option<Vec<u8>>, String)> = self
            .connection
            .query_row(
                &format!(
                    "SELECT task_key_blob_id, salt, authored_on FROM {table}
                     WHERE prescription_id = ?1"
                ),
                params![task_id.database_id()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(db_error)?;
        let (blob_id, salt, authored_on) =
            row.ok_or_else(|| ErxError::not_found(format!("no task {task_id}")))?;
        Ok(TaskKeyData {
            blob_id,
            salt: salt.map(Blob::new),
            authored_on: timestamp::parse_db_timestamp(&authored_on)?,
        })
    }

    // ----- single-task read projections ------------------------------------

    pub fn retrieve_task(&self, task_id: &PrescriptionId) -> ErxResult<Option<TaskRow>> {
        self.fetch_task(
            task_id,
            Projection {
                access_code: true,
                secret: true,
                owner: true,
                prescription: false,
                receipt: false,
            },
        )
    }

    pub fn retrieve_task_and_receipt(&self, task_id: &PrescriptionId) -> ErxResult<Option<TaskRow>> {
        self.fetch_task(
            task_id,
            Projection {
                access_code: false,
                secret: true,
                owner: true,
                prescription: false,
                receipt: true,
            },
        )
    }

    /// Row-locking read used on mutation paths.
    pub fn retrieve_task_for_update(&self, task_id: &PrescriptionId) -> ErxResult<Option<TaskRow>> {
        self.retrieve_task(task_id)
    }

    pub fn retrieve_task_for_update_and_prescription(
        &self,
        task_id: &PrescriptionId,
    ) -> ErxResult<Option<TaskRow>> {
        self.fetch_task(
            task_id,
            Projection {
                access_code: true,
                secret: true,
                owner: true,
                prescription: true,
                receipt: false,
            },
        )
    }

    pub fn retrieve_task_and_prescription(
        &self,
        task_id: &PrescriptionId,
    ) -> ErxResult<Option<TaskRow>> {
        self.fetch_task(
            task_id,
            Projection {
                access_code: true,
                secret: false,
                owner: true,
                prescription: true,
                receipt: false,
            },
        )
    }

    pub fn retrieve_task_with_secret_and_prescription(
        &self,
        task_id: &PrescriptionId,
    ) -> ErxResult<Option<TaskRow>> {
        self.fetch_task(
            task_id,
            Projection {
                access_code: true,
                secret: true,
                owner: true,
                prescription: true,
                receipt: false,
            },
        )
    }

    pub fn retrieve_task_and_prescription_and_receipt(
        &self,
        task_id: &PrescriptionId,
    ) -> ErxResult<Option<TaskRow>> {
        self.fetch_task(
            task_id,
            Projection {
                access_code: true,
                secret: true,
                owner: true,
                prescription: true,
                receipt: true,
            },
        )
    }

    fn fetch_task(
        &self,
        task_id: &PrescriptionId,
        projection: Projection,
    ) -> ErxResult<Option<TaskRow>> {
        self.check_preconditions()?;
        let table = task_table_name(task_id.flow_type());
        let sql = format!("SELECT {TASK_COLUMNS} FROM {table} WHERE prescription_id = ?1");
        tracing::trace!("{sql}");
        let raw = self
            .connection
            .query_row(&sql, params![task_id.database_id()], read_raw_task)
            .optional()
            .map_err(db_error)?;
        raw.map(|raw| finish_task_row(raw, task_id.flow_type(), projection))
            .transpose()
    }

    // ----- listings over the task view --------------------------------------

    /// All tasks of one insurant across every flow type.
    pub fn retrieve_all_tasks_for_patient(
        &self,
        kvnr_hashed: &HashedId,
        search: Option<&UrlArguments>,
        with_access_code: bool,
    ) -> ErxResult<Vec<TaskRow>> {
        self.check_preconditions()?;
        let mut sql = String::from(
            "SELECT prescription_id, kvnr, last_modified, authored_on, expiry_date, accept_date,
                    status, last_status_update, salt, task_key_blob_id, access_code,
                    prescription_type
             FROM task_view WHERE kvnr_hashed = ?1",
        );
        if let Some(search) = search {
            sql.push_str(&search.sql_expression("", false)?);
        }
        tracing::trace!("{sql}");
        let mut statement = self.connection.prepare(&sql).map_err(db_error)?;
        let rows = statement
            .query_map(params![kvnr_hashed.as_bytes()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<Vec<u8>>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, i16>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<Vec<u8>>>(8)?,
                    row.get::<_, Option<u32>>(9)?,
                    row.get::<_, Option<Vec<u8>>>(10)?,
                    row.get::<_, i16>(11)?,
                ))
            })
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;

        let mut tasks = Vec::with_capacity(rows.len());
        for (
            database_id,
            kvnr,
            last_modified,
            authored_on,
            expiry_date,
            accept_date,
            status,
            last_status_update,
            salt,
            blob_id,
            access_code,
            flow_code,
        ) in rows
        {
            let flow_type = FlowType::from_code(flow_code as u8)?;
            tasks.push(TaskRow {
                prescription_id: PrescriptionId::from_database_id(flow_type, database_id)?,
                kvnr: kvnr.map(EncryptedBlob::new),
                last_modified: timestamp::parse_db_timestamp(&last_modified)?,
                authored_on: timestamp::parse_db_timestamp(&authored_on)?,
                expiry_date: expiry_date
                    .map(|text| timestamp::parse_db_date(&text))
                    .transpose()?,
                accept_date: accept_date
                    .map(|text| timestamp::parse_db_date(&text))
                    .transpose()?,
                status: TaskStatus::from_i16(status)?,
                last_status_update: timestamp::parse_db_timestamp(&last_status_update)?,
                salt: salt.map(Blob::new),
                blob_id,
                access_code: if with_access_code {
                    access_code.map(EncryptedBlob::new)
                } else {
                    None
                },
                secret: None,
                owner: None,
                healthcare_provider_prescription: None,
                receipt: None,
                last_medication_dispense: None,
            });
        }
        Ok(tasks)
    }

    pub fn count_all_tasks_for_patient(
        &self,
        kvnr_hashed: &HashedId,
        search: Option<&UrlArguments>,
    ) -> ErxResult<u64> {
        self.count_with_search(
            "SELECT COUNT(*) FROM task_view WHERE kvnr_hashed = ?1",
            kvnr_hashed,
            search,
        )
    }

    /// Flow-160 listing for the access-code bearing task bundle.
    pub fn count_all_160_tasks(
        &self,
        kvnr_hashed: &HashedId,
        search: Option<&UrlArguments>,
    ) -> ErxResult<u64> {
        self.count_with_search(
            "SELECT COUNT(*) FROM task_160 WHERE kvnr_hashed = ?1",
            kvnr_hashed,
            search,
        )
    }

    pub(crate) fn count_with_search(
        &self,
        base_sql: &str,
        kvnr_hashed: &HashedId,
        search: Option<&UrlArguments>,
    ) -> ErxResult<u64> {
        self.check_preconditions()?;
        let mut sql = base_sql.to_string();
        if let Some(search) = search {
            let where_expression = search.sql_where_expression("")?;
            if !where_expression.is_empty() {
                sql.push_str(" AND ");
                sql.push_str(&where_expression);
            }
        }
        tracing::trace!("{sql}");
        let count: i64 = self
            .connection
            .query_row(&sql, params![kvnr_hashed.as_bytes()], |row| row.get(0))
            .map_err(db_error)?;
        Ok(count as u64)
    }

    /// Stored dispense bundles of one insurant, optionally narrowed to one
    /// prescription.
    pub fn retrieve_all_medication_dispenses(
        &self,
        kvnr_hashed: &HashedId,
        prescription_id: Option<&PrescriptionId>,
        search: Option<&UrlArguments>,
    ) -> ErxResult<Vec<MedicationDispenseRow>> {
        self.check_preconditions()?;
        let mut sql = String::from(
            "SELECT prescription_id, medication_dispense_bundle, medication_dispense_blob_id,
                    medication_dispense_salt, prescription_type
             FROM task_view
             WHERE kvnr_hashed = ?1
               AND (?2 IS NULL OR (prescription_id = ?2 AND prescription_type = ?3))
               AND medication_dispense_bundle IS NOT NULL",
        );
        if let Some(search) = search {
            sql.push_str(&search.sql_expression("", false)?);
        }
        tracing::trace!("{sql}");
        let mut statement = self.connection.prepare(&sql).map_err(db_error)?;
        let rows = statement
            .query_map(
                params![
                    kvnr_hashed.as_bytes(),
                    prescription_id.map(PrescriptionId::database_id),
                    prescription_id.map(|id| id.flow_type().code())
                ],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, i16>(4)?,
                    ))
                },
            )
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;

        let mut dispenses = Vec::with_capacity(rows.len());
        for (database_id, bundle, blob_id, salt, flow_code) in rows {
            dispenses.push(MedicationDispenseRow {
                prescription_id: PrescriptionId::from_database_id(
                    FlowType::from_code(flow_code as u8)?,
                    database_id,
                )?,
                bundle: EncryptedBlob::new(bundle),
                blob_id,
                salt: Blob::new(salt),
            });
        }
        Ok(dispenses)
    }
}

fn expect_one_row(updated: usize, task_id: &PrescriptionId) -> ErxResult<()> {
    if updated == 0 {
        return Err(ErxError::not_found(format!("no task {task_id}")));
    }
    if updated > 1 {
        return Err(ErxError::logic(format!(
            "task update touched {updated} rows for {task_id}"
        )));
    }
    Ok(())
}

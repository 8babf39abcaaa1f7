//! The backend instance: one connection, one transaction, and the
//! cross-entity operations (salts, cmacs, consent, audit log, blob registry,
//! schema version, healthcheck).

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use erx_query::UrlArguments;
use erx_types::{
    timestamp, Blob, BlobId, EncryptedBlob, ErxError, ErxResult, HashedId, MasterKeyType,
    PrescriptionId, Suuid,
};

use crate::models::AuditRow;
use crate::schema;

/// Category of a day-keyed CMAC key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmacKeyCategory {
    User,
    Telematic,
}

impl CmacKeyCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            CmacKeyCategory::User => "user",
            CmacKeyCategory::Telematic => "telematic",
        }
    }
}

/// Map driver failures onto the error taxonomy: connection-level problems
/// are retriable, structural problems are internal.
pub(crate) fn db_error(err: rusqlite::Error) -> ErxError {
    use rusqlite::ErrorCode::*;
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            DatabaseBusy | DatabaseLocked | CannotOpen | DiskFull | SystemIoFailure => {
                ErxError::TransientIo(err.to_string())
            }
            _ => ErxError::Internal(format!("database: {err}")),
        },
        _ => ErxError::Internal(format!("database: {err}")),
    }
}

/// One backend instance owning one connection and one open transaction.
pub struct ErxBackend {
    pub(crate) connection: Connection,
    committed: bool,
    closed: bool,
}

impl ErxBackend {
    /// Wrap a connection and begin the instance's transaction.
    pub fn new(connection: Connection) -> ErxResult<Self> {
        connection.execute_batch("BEGIN").map_err(db_error)?;
        Ok(Self {
            connection,
            committed: false,
            closed: false,
        })
    }

    /// Open a database file and begin a transaction on it.
    pub fn open(path: &str) -> ErxResult<Self> {
        Self::new(schema::open_connection(path)?)
    }

    /// Every operation must run inside the instance's transaction.
    pub(crate) fn check_preconditions(&self) -> ErxResult<()> {
        if self.committed || self.closed {
            return Err(ErxError::logic("transaction already committed"));
        }
        Ok(())
    }

    /// Commit the transaction. Idempotent against double invocation.
    pub fn commit_transaction(&mut self) -> ErxResult<()> {
        if self.committed {
            return Ok(());
        }
        if self.closed {
            return Err(ErxError::logic("commit on closed connection"));
        }
        tracing::debug!("committing transaction");
        self.connection.execute_batch("COMMIT").map_err(|err| {
            tracing::warn!("error committing database transaction: {err}");
            db_error(err)
        })?;
        self.committed = true;
        Ok(())
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Close the connection; an uncommitted transaction rolls back.
    /// Idempotent against double invocation.
    pub fn close_connection(&mut self) {
        if self.closed {
            return;
        }
        tracing::debug!("closing connection to database");
        if !self.committed {
            if let Err(err) = self.connection.execute_batch("ROLLBACK") {
                tracing::warn!("rollback on close failed: {err}");
            }
        }
        self.closed = true;
    }

    // ----- config / health --------------------------------------------------

    pub fn retrieve_schema_version(&self) -> ErxResult<String> {
        self.check_preconditions()?;
        let version: Option<String> = self
            .connection
            .query_row(
                "SELECT value FROM config WHERE parameter = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;
        version.ok_or_else(|| ErxError::internal("database schema version entry missing"))
    }

    pub fn health_check(&self) -> ErxResult<()> {
        self.check_preconditions()?;
        self.connection
            .query_row("SELECT 1 FROM task_160 LIMIT 1", [], |_| Ok(()))
            .optional()
            .map_err(db_error)?;
        Ok(())
    }

    // ----- account salts ----------------------------------------------------

    /// Idempotent first-writer-wins insert. Returns `None` when this call
    /// created the row; returns the pre-existing salt when a concurrent
    /// transaction inserted first (the expected conflict branch of the key
    /// race protocol, not an error).
    pub fn insert_or_return_account_salt(
        &self,
        account_id: &HashedId,
        master_key_type: MasterKeyType,
        blob_id: BlobId,
        salt: &Blob,
    ) -> ErxResult<Option<Blob>> {
        self.check_preconditions()?;
        let inserted = self
            .connection
            .execute(
                "INSERT INTO account (account_id, master_key_type, blob_id, salt)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (account_id, master_key_type, blob_id) DO NOTHING",
                params![
                    account_id.as_bytes(),
                    master_key_type.as_i16(),
                    blob_id,
                    salt.as_bytes()
                ],
            )
            .map_err(db_error)?;
        if inserted > 0 {
            return Ok(None);
        }
        let existing = self
            .retrieve_salt_for_account(account_id, master_key_type, blob_id)?
            .ok_or_else(|| ErxError::internal("conflicting account salt row disappeared"))?;
        Ok(Some(existing))
    }

    pub fn retrieve_salt_for_account(
        &self,
        account_id: &HashedId,
        master_key_type: MasterKeyType,
        blob_id: BlobId,
    ) -> ErxResult<Option<Blob>> {
        self.check_preconditions()?;
        let salt: Option<Vec<u8>> = self
            .connection
            .query_row(
                "SELECT salt FROM account
                 WHERE account_id = ?1 AND master_key_type = ?2 AND blob_id = ?3",
                params![account_id.as_bytes(), master_key_type.as_i16(), blob_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;
        Ok(salt.map(Blob::new))
    }

    // ----- cmac keys --------------------------------------------------------

    /// Insert the candidate key for (date, category), or return the key a
    /// concurrent first writer installed. Same idempotent pattern as the
    /// account salts.
    pub fn acquire_cmac(
        &self,
        valid_date: NaiveDate,
        category: CmacKeyCategory,
        candidate: &[u8],
    ) -> ErxResult<Vec<u8>> {
        self.check_preconditions()?;
        // ON CONFLICT DO UPDATE needs at least one assignment; cmac keeps
        // its current value so RETURNING yields the winning key either way
        self.connection
            .query_row(
                "INSERT INTO vau_cmac (valid_date, cmac_type, cmac) VALUES (?1, ?2, ?3)
                 ON CONFLICT (valid_date, cmac_type) DO UPDATE SET cmac = vau_cmac.cmac
                 RETURNING cmac",
                params![
                    timestamp::to_db_date(valid_date),
                    category.as_str(),
                    candidate
                ],
                |row| row.get(0),
            )
            .map_err(db_error)
    }

    // ----- consent ----------------------------------------------------------

    /// At most one consent row per insurant; a second store is a caller
    /// error.
    pub fn store_consent(
        &self,
        kvnr_hashed: &HashedId,
        date_time: DateTime<Utc>,
    ) -> ErxResult<()> {
        self.check_preconditions()?;
        let result = self.connection.execute(
            "INSERT INTO consent (kvnr_hashed, date_time) VALUES (?1, ?2)",
            params![
                kvnr_hashed.as_bytes(),
                timestamp::to_db_timestamp(date_time)
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(ErxError::bad_request("consent already exists"))
            }
            Err(err) => Err(db_error(err)),
        }
    }

    pub fn retrieve_consent_date_time(
        &self,
        kvnr_hashed: &HashedId,
    ) -> ErxResult<Option<DateTime<Utc>>> {
        self.check_preconditions()?;
        let stored: Option<String> = self
            .connection
            .query_row(
                "SELECT date_time FROM consent WHERE kvnr_hashed = ?1",
                params![kvnr_hashed.as_bytes()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;
        stored.map(|text| timestamp::parse_db_timestamp(&text)).transpose()
    }

    /// Returns whether a row existed.
    pub fn clear_consent(&self, kvnr_hashed: &HashedId) -> ErxResult<bool> {
        self.check_preconditions()?;
        let deleted = self
            .connection
            .execute(
                "DELETE FROM consent WHERE kvnr_hashed = ?1",
                params![kvnr_hashed.as_bytes()],
            )
            .map_err(db_error)?;
        Ok(deleted > 0)
    }

    // ----- audit log --------------------------------------------------------

    /// Append one audit row; the id embeds the recorded time.
    #[allow(clippy::too_many_arguments)]
    pub fn store_audit_event_data(
        &self,
        kvnr_hashed: &HashedId,
        event_id: i16,
        action: char,
        agent_type: i16,
        device_id: i16,
        prescription_id: Option<&PrescriptionId>,
        metadata: Option<&EncryptedBlob>,
        blob_id: Option<BlobId>,
    ) -> ErxResult<(Suuid, DateTime<Utc>)> {
        self.check_preconditions()?;
        let recorded = Utc::now();
        let id = Suuid::generate(recorded)?;
        self.connection
            .execute(
                "INSERT INTO auditevent (id, kvnr_hashed, event_id, action, agent_type, observer,
                                         prescription_id, prescription_type, metadata, blob_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id.to_string(),
                    kvnr_hashed.as_bytes(),
                    event_id,
                    action.to_string(),
                    agent_type,
                    device_id,
                    prescription_id.map(PrescriptionId::database_id),
                    prescription_id.map(|id| id.flow_type().code()),
                    metadata.map(EncryptedBlob::as_bytes),
                    blob_id
                ],
            )
            .map_err(db_error)?;
        Ok((id, recorded))
    }

    /// List audit rows of one insurant, optionally narrowed to one id or one
    /// prescription, with an optional search tail.
    pub fn retrieve_audit_event_data(
        &self,
        kvnr_hashed: &HashedId,
        id: Option<&Suuid>,
        prescription_id: Option<&PrescriptionId>,
        search: Option<&UrlArguments>,
    ) -> ErxResult<Vec<AuditRow>> {
        self.check_preconditions()?;
        let mut sql = String::from(
            "SELECT id, event_id, action, agent_type, observer, prescription_id,
                    prescription_type, metadata, blob_id
             FROM auditevent
             WHERE kvnr_hashed = ?1
               AND (?2 IS NULL OR id = ?2)
               AND (?3 IS NULL OR (prescription_id = ?3 AND prescription_type = ?4))",
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
                    id.map(Suuid::to_string),
                    prescription_id.map(PrescriptionId::database_id),
                    prescription_id.map(|p| p.flow_type().code())
                ],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i16>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i16>(3)?,
                        row.get::<_, i16>(4)?,
                        row.get::<_, Option<i64>>(5)?,
                        row.get::<_, Option<i16>>(6)?,
                        row.get::<_, Option<Vec<u8>>>(7)?,
                        row.get::<_, Option<u32>>(8)?,
                    ))
                },
            )
            .map_err(db_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)?;

        let mut audit_rows = Vec::with_capacity(rows.len());
        for (id, event_id, action, agent_type, observer, db_id, flow_code, metadata, blob_id) in
            rows
        {
            let id = Suuid::parse(&id)?;
            let action = action
                .chars()
                .next()
                .ok_or_else(|| ErxError::internal("empty audit action column"))?;
            let prescription_id = match (db_id, flow_code) {
                (Some(db_id), Some(code)) => Some(PrescriptionId::from_database_id(
                    erx_types::FlowType::from_code(code as u8)?,
                    db_id,
                )?),
                (None, None) => None,
                _ => {
                    return Err(ErxError::internal(
                        "audit row has prescription id without flow type",
                    ))
                }
            };
            audit_rows.push(AuditRow {
                recorded: id.timestamp(),
                id,
                event_id,
                action,
                agent_type,
                device_id: observer,
                prescription_id,
                metadata: metadata.map(EncryptedBlob::new),
                blob_id,
            });
        }
        Ok(audit_rows)
    }

    // ----- blob registry ----------------------------------------------------

    pub fn store_blob(&self, blob_id: BlobId, blob_type: i16, data: &[u8]) -> ErxResult<()> {
        self.check_preconditions()?;
        self.connection
            .execute(
                "INSERT INTO blob (blob_id, blob_type, data) VALUES (?1, ?2, ?3)",
                params![blob_id, blob_type, data],
            )
            .map_err(db_error)?;
        Ok(())
    }

    /// A blob generation is referenced as long as any row derives from it.
    pub fn is_blob_used(&self, blob_id: BlobId) -> ErxResult<bool> {
        self.check_preconditions()?;
        let mut predicates: Vec<String> = Vec::new();
        for flow_type in erx_types::FlowType::ALL {
            let table = schema::task_table_name(flow_type);
            predicates.push(format!(
                "EXISTS (SELECT 1 FROM {table}
                 WHERE task_key_blob_id = ?1 OR medication_dispense_blob_id = ?1)"
            ));
        }
        predicates.push(
            "EXISTS (SELECT 1 FROM communication
             WHERE sender_blob_id = ?1 OR recipient_blob_id = ?1)"
                .to_string(),
        );
        predicates.push("EXISTS (SELECT 1 FROM auditevent WHERE blob_id = ?1)".to_string());
        predicates.push("EXISTS (SELECT 1 FROM charge_item WHERE blob_id = ?1)".to_string());
        predicates.push("EXISTS (SELECT 1 FROM account WHERE blob_id = ?1)".to_string());
        let sql = format!("SELECT {}", predicates.join(" OR "));
        self.connection
            .query_row(&sql, params![blob_id], |row| row.get(0))
            .map_err(db_error)
    }

    /// Delete an unreferenced blob generation; referenced ones stay.
    pub fn delete_blob(&self, blob_id: BlobId) -> ErxResult<()> {
        self.check_preconditions()?;
        if self.is_blob_used(blob_id)? {
            return Err(ErxError::bad_request(format!(
                "blob {blob_id} is still referenced"
            )));
        }
        self.connection
            .execute("DELETE FROM blob WHERE blob_id = ?1", params![blob_id])
            .map_err(db_error)?;
        Ok(())
    }
}

impl Drop for ErxBackend {
    fn drop(&mut self) {
        self.close_connection();
    }
}

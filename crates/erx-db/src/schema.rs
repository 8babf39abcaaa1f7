//! Schema DDL and flow-type table routing.
//!
//! Instants are stored as fixed-width UTC text (`YYYY-MM-DDTHH:MM:SSZ`) so
//! that text comparison equals chronological comparison; calendar dates
//! (expiry, accept) as `YYYY-MM-DD` in Berlin civil time. Time-ordered
//! primary keys (communication, auditevent) are suuids whose 100-ns sent
//! time prefix makes lexicographic order chronological.
//!
//! Migrations are applied externally; the `config` table carries the schema
//! version this module creates.

use rusqlite::Connection;

use erx_types::{ErxError, ErxResult, FlowType};

/// Version written to the config table by [`create_schema`].
pub const SCHEMA_VERSION: &str = "1";

/// Physical table of one flow type.
pub fn task_table_name(flow_type: FlowType) -> &'static str {
    match flow_type {
        FlowType::PharmacyOnly => "task_160",
        FlowType::DigitalHealthApp => "task_162",
        FlowType::DirectAssignment => "task_169",
        FlowType::PharmacyOnlyPkv => "task_200",
        FlowType::DirectAssignmentPkv => "task_209",
    }
}

const TASK_COLUMNS: &str = "
    prescription_id INTEGER PRIMARY KEY AUTOINCREMENT,
    kvnr BLOB,
    kvnr_hashed BLOB,
    last_modified TEXT NOT NULL,
    authored_on TEXT NOT NULL,
    expiry_date TEXT,
    accept_date TEXT,
    status INTEGER NOT NULL,
    last_status_update TEXT NOT NULL,
    task_key_blob_id INTEGER,
    salt BLOB,
    access_code BLOB,
    secret BLOB,
    owner BLOB,
    healthcare_provider_prescription BLOB,
    doctor_identity BLOB,
    receipt BLOB,
    pharmacy_identity BLOB,
    when_handed_over TEXT,
    when_prepared TEXT,
    performer BLOB,
    medication_dispense_bundle BLOB,
    medication_dispense_blob_id INTEGER,
    medication_dispense_salt BLOB,
    last_medication_dispense TEXT";

/// Create all tables, views and indexes of the data layer.
pub fn create_schema(connection: &Connection) -> ErxResult<()> {
    let mut ddl = String::new();
    for flow_type in FlowType::ALL {
        let table = task_table_name(flow_type);
        ddl.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {table} ({TASK_COLUMNS});\n\
             CREATE INDEX IF NOT EXISTS idx_{table}_kvnr_hashed ON {table} (kvnr_hashed);\n"
        ));
    }

    // union view for cross-flow listings; medication_dispense_salt is
    // surfaced under the name the dispense projection selects
    ddl.push_str("CREATE VIEW IF NOT EXISTS task_view AS\n");
    let mut first = true;
    for flow_type in FlowType::ALL {
        let table = task_table_name(flow_type);
        if !first {
            ddl.push_str("UNION ALL\n");
        }
        first = false;
        ddl.push_str(&format!(
            "SELECT prescription_id, kvnr, kvnr_hashed, last_modified, authored_on, expiry_date, \
             accept_date, status, last_status_update, task_key_blob_id, salt, access_code, \
             performer, when_handed_over, when_prepared, \
             medication_dispense_bundle, medication_dispense_blob_id, medication_dispense_salt, \
             last_medication_dispense, {} AS prescription_type FROM {table}\n",
            flow_type.code()
        ));
    }
    ddl.push_str(";\n");

    ddl.push_str(
        "CREATE TABLE IF NOT EXISTS communication (
            id TEXT PRIMARY KEY,
            message_type INTEGER NOT NULL,
            sender BLOB NOT NULL,
            recipient BLOB NOT NULL,
            received TEXT,
            prescription_id INTEGER NOT NULL,
            prescription_type INTEGER NOT NULL,
            sender_blob_id INTEGER NOT NULL,
            message_for_sender BLOB NOT NULL,
            recipient_blob_id INTEGER NOT NULL,
            message_for_recipient BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_communication_sender ON communication (sender);
        CREATE INDEX IF NOT EXISTS idx_communication_recipient ON communication (recipient);

        CREATE TABLE IF NOT EXISTS auditevent (
            id TEXT PRIMARY KEY,
            kvnr_hashed BLOB NOT NULL,
            event_id INTEGER NOT NULL,
            action TEXT NOT NULL,
            agent_type INTEGER NOT NULL,
            observer INTEGER NOT NULL,
            prescription_id INTEGER,
            prescription_type INTEGER,
            metadata BLOB,
            blob_id INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_auditevent_kvnr_hashed ON auditevent (kvnr_hashed);

        CREATE TABLE IF NOT EXISTS account (
            account_id BLOB NOT NULL,
            master_key_type INTEGER NOT NULL,
            blob_id INTEGER NOT NULL,
            salt BLOB NOT NULL,
            PRIMARY KEY (account_id, master_key_type, blob_id)
        );

        CREATE TABLE IF NOT EXISTS vau_cmac (
            valid_date TEXT NOT NULL,
            cmac_type TEXT NOT NULL,
            cmac BLOB NOT NULL,
            PRIMARY KEY (valid_date, cmac_type)
        );

        CREATE TABLE IF NOT EXISTS charge_item (
            prescription_id INTEGER NOT NULL,
            prescription_type INTEGER NOT NULL,
            enterer BLOB NOT NULL,
            entered_date TEXT NOT NULL,
            last_modified TEXT NOT NULL,
            marking_flag BLOB,
            blob_id INTEGER NOT NULL,
            salt BLOB NOT NULL,
            access_code BLOB NOT NULL,
            kvnr BLOB NOT NULL,
            kvnr_hashed BLOB NOT NULL,
            prescription BLOB NOT NULL,
            prescription_json BLOB NOT NULL,
            receipt_xml BLOB NOT NULL,
            receipt_json BLOB NOT NULL,
            billing_data BLOB NOT NULL,
            billing_data_json BLOB NOT NULL,
            PRIMARY KEY (prescription_type, prescription_id)
        );
        CREATE INDEX IF NOT EXISTS idx_charge_item_kvnr_hashed ON charge_item (kvnr_hashed);

        CREATE TABLE IF NOT EXISTS consent (
            kvnr_hashed BLOB PRIMARY KEY,
            date_time TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS blob (
            blob_id INTEGER PRIMARY KEY,
            blob_type INTEGER NOT NULL,
            data BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS config (
            parameter TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    );

    connection
        .execute_batch(&ddl)
        .map_err(|err| ErxError::internal(format!("schema creation: {err}")))?;

    connection
        .execute(
            "INSERT OR IGNORE INTO config (parameter, value) VALUES ('schema_version', ?1)",
            [SCHEMA_VERSION],
        )
        .map_err(|err| ErxError::internal(format!("schema version: {err}")))?;
    Ok(())
}

/// Open a connection with the pragmas the backend expects.
pub fn open_connection(path: &str) -> ErxResult<Connection> {
    let connection = Connection::open(path)
        .map_err(|err| ErxError::TransientIo(format!("cannot open database: {err}")))?;
    apply_pragmas(&connection)?;
    Ok(connection)
}

pub fn apply_pragmas(connection: &Connection) -> ErxResult<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .and_then(|_| connection.pragma_update(None, "foreign_keys", true))
        .and_then(|_| connection.pragma_update(None, "busy_timeout", 10_000))
        .map_err(|err| ErxError::TransientIo(format!("pragma setup: {err}")))
}

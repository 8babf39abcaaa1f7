//! Shared fixtures for the integration scenarios.

use std::sync::{Arc, Once};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;

use erx_db::{schema, ErxBackend};
use erx_frontend::DatabaseFrontend;
use erx_hsm::{HsmPool, KeyDerivation, SoftHsm};
use erx_types::{FlowType, Kvnr, Task, TaskStatus};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// One software HSM shared by all connections of a scenario, exactly like
/// one module shared by all request threads.
pub fn soft_derivation() -> (Arc<SoftHsm>, Arc<KeyDerivation>) {
    let hsm = Arc::new(SoftHsm::new());
    let derivation = Arc::new(KeyDerivation::new(HsmPool::new(hsm.clone())));
    (hsm, derivation)
}

/// Frontend over a private in-memory database.
pub fn frontend_in_memory(derivation: &Arc<KeyDerivation>) -> DatabaseFrontend {
    init_tracing();
    let connection = Connection::open_in_memory().expect("open in-memory database");
    schema::create_schema(&connection).expect("create schema");
    let backend = ErxBackend::new(connection).expect("begin transaction");
    DatabaseFrontend::new(backend, derivation.clone())
}

/// Frontend over a shared database file; each call is one connection and
/// one transaction, as one request would be.
pub fn frontend_on_file(path: &str, derivation: &Arc<KeyDerivation>) -> DatabaseFrontend {
    init_tracing();
    let connection = schema::open_connection(path).expect("open database file");
    schema::create_schema(&connection).expect("create schema");
    let backend = ErxBackend::new(connection).expect("begin transaction");
    DatabaseFrontend::new(backend, derivation.clone())
}

pub fn test_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 2, 9, 30, 0).unwrap()
}

pub fn insurant() -> Kvnr {
    Kvnr::new("X123456789")
}

pub const ACCESS_CODE: &str = "777bea0e13cc9c42ceec14aec3ddee2263325dc2c6c699db115f58fe423607ea";

pub const PRESCRIPTION_BUNDLE: &str =
    r#"{"resourceType":"Bundle","type":"document","entry":[{"resource":{"resourceType":"MedicationRequest"}}]}"#;

pub fn draft_task(flow_type: FlowType) -> Task {
    draft_task_at(flow_type, test_time())
}

pub fn draft_task_at(flow_type: FlowType, authored_on: DateTime<Utc>) -> Task {
    Task {
        prescription_id: None,
        flow_type,
        status: TaskStatus::Draft,
        authored_on,
        last_modified: authored_on,
        last_status_change: authored_on,
        kvnr: None,
        expiry_date: None,
        accept_date: None,
        access_code: Some(ACCESS_CODE.to_string()),
        secret: None,
        owner: None,
        last_medication_dispense: None,
    }
}

/// Run the activation step on a stored task: ready status, KVNR, Berlin
/// expiry/accept dates, encrypted prescription.
pub fn activate(
    frontend: &DatabaseFrontend,
    task: &mut Task,
    kvnr: &Kvnr,
) -> erx_types::ErxResult<()> {
    task.kvnr = Some(kvnr.clone());
    task.status = TaskStatus::Ready;
    task.expiry_date = Some(erx_types::timestamp::berlin_date_plus_days(
        task.authored_on,
        91,
    ));
    task.accept_date = Some(erx_types::timestamp::berlin_date_plus_days(
        task.authored_on,
        28,
    ));
    frontend.activate_task(
        task,
        PRESCRIPTION_BUNDLE,
        &erx_types::AccessTokenIdentity {
            id: "1-2.58.00000040".to_string(),
            name: "Praxis Dr. Schraßer".to_string(),
            profession_oid: "1.2.276.0.76.4.30".to_string(),
        },
    )
}

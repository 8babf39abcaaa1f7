//! Salt coordination across connections.
//!
//! Key derivations for one (account, purpose) must converge on one
//! (generation, salt) pair, no matter which connection derived first; a
//! ciphertext written under one connection's key must decrypt under a key
//! re-derived by any other.

use erx_hsm::KeyPurpose;
use erx_types::{FlowType, MasterKeyType, TelematikId};

use super::support::{
    activate, draft_task, frontend_on_file, insurant, soft_derivation, test_time,
};

fn account_salt_rows(path: &str) -> i64 {
    let connection = rusqlite::Connection::open(path).unwrap();
    connection
        .query_row(
            "SELECT COUNT(*) FROM account WHERE master_key_type = ?1",
            [MasterKeyType::MedicationDispense.as_i16()],
            |row| row.get(0),
        )
        .unwrap()
}

#[test]
fn test_initial_derivations_converge_across_connections() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let path = file.path().to_str().unwrap();
    let (_, derivation) = soft_derivation();

    // connection A performs the initial derivation and stores a bundle
    let mut frontend_a = frontend_on_file(path, &derivation);
    let mut task = draft_task(FlowType::PharmacyOnly);
    let id = frontend_a.store_task(&task).unwrap();
    task.prescription_id = Some(id);
    task.authored_on = frontend_a.retrieve_task(&id).unwrap().unwrap().authored_on;
    activate(&frontend_a, &mut task, &insurant()).unwrap();
    task.last_medication_dispense = Some(test_time());
    frontend_a
        .update_task_medication_dispense(
            &task,
            r#"{"dispense":"written by A"}"#,
            &TelematikId::new("3-07.2.1234560000.10.789"),
            test_time(),
            None,
        )
        .unwrap();
    frontend_a.commit_transaction().unwrap();
    frontend_a.close_connection();

    // connection B re-derives from the persisted salt and decrypts A's data
    let mut frontend_b = frontend_on_file(path, &derivation);
    let dispenses = frontend_b
        .retrieve_medication_dispenses(&insurant(), None, None)
        .unwrap();
    assert_eq!(dispenses.len(), 1);
    assert_eq!(dispenses[0].bundle, r#"{"dispense":"written by A"}"#);
    frontend_b.commit_transaction().unwrap();
    frontend_b.close_connection();

    // exactly one salt row exists for the account
    assert_eq!(account_salt_rows(path), 1);
}

#[test]
fn test_second_deriver_adopts_first_writers_salt() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let path = file.path().to_str().unwrap();
    let (_, derivation) = soft_derivation();

    let hashed = derivation.hash_kvnr(&insurant()).unwrap();
    let latest = derivation.latest_blob_id(KeyPurpose::Task).unwrap();

    // connection A runs the protocol: no salt present, initial derivation,
    // clean upsert
    let mut frontend_a = frontend_on_file(path, &derivation);
    assert!(frontend_a
        .backend()
        .retrieve_salt_for_account(&hashed, MasterKeyType::MedicationDispense, latest)
        .unwrap()
        .is_none());
    let (key_a, data_a) = derivation.initial_medication_dispense_key(&hashed).unwrap();
    assert!(frontend_a
        .backend()
        .insert_or_return_account_salt(
            &hashed,
            MasterKeyType::MedicationDispense,
            data_a.blob_id,
            &data_a.salt,
        )
        .unwrap()
        .is_none());
    let (blob_a, salt_a) = (data_a.blob_id, data_a.salt);
    frontend_a.commit_transaction().unwrap();
    frontend_a.close_connection();

    // connection B runs the same protocol afterwards and must end up with
    // A's salt and a key that matches A's
    let mut frontend_b = frontend_on_file(path, &derivation);
    let stored = frontend_b
        .backend()
        .retrieve_salt_for_account(&hashed, MasterKeyType::MedicationDispense, blob_a)
        .unwrap()
        .expect("salt persisted by A");
    assert_eq!(stored, salt_a);
    let key_b = derivation
        .medication_dispense_key(&hashed, blob_a, &stored)
        .unwrap();
    assert_eq!(key_a.as_bytes(), key_b.as_bytes());
    frontend_b.close_connection();

    assert_eq!(account_salt_rows(path), 1);
}

#[test]
fn test_conflicting_upsert_returns_existing_salt_and_key_converges() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let path = file.path().to_str().unwrap();
    let (_, derivation) = soft_derivation();
    let hashed = derivation.hash_kvnr(&insurant()).unwrap();

    // the losing thread has already run its initial derivation when the
    // winner's row lands; its upsert must surrender and return that row
    let (_, loser_data) = derivation.initial_medication_dispense_key(&hashed).unwrap();

    let mut winner = frontend_on_file(path, &derivation);
    let (winner_key, winner_data) = derivation.initial_medication_dispense_key(&hashed).unwrap();
    assert!(winner
        .backend()
        .insert_or_return_account_salt(
            &hashed,
            MasterKeyType::MedicationDispense,
            winner_data.blob_id,
            &winner_data.salt,
        )
        .unwrap()
        .is_none());
    winner.commit_transaction().unwrap();
    winner.close_connection();

    let mut loser = frontend_on_file(path, &derivation);
    let pre_existing = loser
        .backend()
        .insert_or_return_account_salt(
            &hashed,
            MasterKeyType::MedicationDispense,
            loser_data.blob_id,
            &loser_data.salt,
        )
        .unwrap()
        .expect("conflict must return the winner's salt");
    assert_eq!(pre_existing, winner_data.salt);

    // discarding its own key and re-deriving with the winner's salt yields
    // the winner's key
    let converged = derivation
        .medication_dispense_key(&hashed, loser_data.blob_id, &pre_existing)
        .unwrap();
    assert_eq!(converged.as_bytes(), winner_key.as_bytes());
    loser.commit_transaction().unwrap();
    loser.close_connection();

    assert_eq!(account_salt_rows(path), 1);
}

#[test]
fn test_generation_advance_keeps_old_data_readable() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let path = file.path().to_str().unwrap();
    let (hsm, derivation) = soft_derivation();

    // write a dispense under generation 1
    let mut frontend = frontend_on_file(path, &derivation);
    let mut task = draft_task(FlowType::PharmacyOnly);
    let id = frontend.store_task(&task).unwrap();
    task.prescription_id = Some(id);
    task.authored_on = frontend.retrieve_task(&id).unwrap().unwrap().authored_on;
    activate(&frontend, &mut task, &insurant()).unwrap();
    task.last_medication_dispense = Some(test_time());
    frontend
        .update_task_medication_dispense(
            &task,
            r#"{"dispense":"generation one"}"#,
            &TelematikId::new("3-07.2.1234560000.10.789"),
            test_time(),
            None,
        )
        .unwrap();
    frontend.commit_transaction().unwrap();
    frontend.close_connection();

    // the module moves on to generation 2
    hsm.advance_generation(KeyPurpose::Task);

    // old rows decrypt with their stored generation; a fresh derivation
    // creates a second salt row under the new generation
    let mut later = frontend_on_file(path, &derivation);
    let dispenses = later
        .retrieve_medication_dispenses(&insurant(), None, None)
        .unwrap();
    assert_eq!(dispenses[0].bundle, r#"{"dispense":"generation one"}"#);
    later.commit_transaction().unwrap();
    later.close_connection();
}

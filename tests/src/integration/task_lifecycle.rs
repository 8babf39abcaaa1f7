//! Create, activate, dispense, close and cancel through the frontend.

use chrono::Duration;

use erx_types::{AccessTokenIdentity, FlowType, TaskStatus, TelematikId};

use super::support::{
    activate, draft_task, frontend_in_memory, insurant, soft_derivation, test_time, ACCESS_CODE,
    PRESCRIPTION_BUNDLE,
};

fn pharmacy_identity() -> AccessTokenIdentity {
    AccessTokenIdentity {
        id: "3-07.2.1234560000.10.789".to_string(),
        name: "Adler-Apotheke".to_string(),
        profession_oid: "1.2.276.0.76.4.54".to_string(),
    }
}

#[test]
fn test_create_activate_retrieve() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let mut task = draft_task(FlowType::PharmacyOnly);
    let id = frontend.store_task(&task).unwrap();
    task.prescription_id = Some(id);
    // the stored authored-on is the rounded server value
    let stored = frontend.retrieve_task(&id).unwrap().unwrap();
    task.authored_on = stored.authored_on;

    activate(&frontend, &mut task, &insurant()).unwrap();

    let (retrieved, prescription) = frontend.retrieve_task_and_prescription(&id).unwrap().unwrap();
    assert_eq!(retrieved.status, TaskStatus::Ready);
    assert_eq!(retrieved.kvnr, Some(insurant()));
    assert_eq!(retrieved.access_code.as_deref(), Some(ACCESS_CODE));
    assert_eq!(prescription.as_deref(), Some(PRESCRIPTION_BUNDLE));
}

#[test]
fn test_accept_sets_secret_and_owner() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let mut task = draft_task(FlowType::PharmacyOnly);
    let id = frontend.store_task(&task).unwrap();
    task.prescription_id = Some(id);
    task.authored_on = frontend.retrieve_task(&id).unwrap().unwrap().authored_on;
    activate(&frontend, &mut task, &insurant()).unwrap();

    task.status = TaskStatus::InProgress;
    task.secret = Some("a2b97e47cbcd43a1e99f0e6e7cecb9b4".to_string());
    task.owner = Some(TelematikId::new("3-07.2.1234560000.10.789"));
    frontend.update_task_status_and_secret(&task).unwrap();

    let retrieved = frontend.retrieve_task(&id).unwrap().unwrap();
    assert_eq!(retrieved.status, TaskStatus::InProgress);
    assert_eq!(
        retrieved.secret.as_deref(),
        Some("a2b97e47cbcd43a1e99f0e6e7cecb9b4")
    );
    assert_eq!(
        retrieved.owner,
        Some(TelematikId::new("3-07.2.1234560000.10.789"))
    );
}

#[test]
fn test_close_with_dispense_and_receipt() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let mut task = draft_task(FlowType::PharmacyOnly);
    let id = frontend.store_task(&task).unwrap();
    task.prescription_id = Some(id);
    task.authored_on = frontend.retrieve_task(&id).unwrap().unwrap().authored_on;
    activate(&frontend, &mut task, &insurant()).unwrap();

    let dispense_bundle = r#"{"resourceType":"Bundle","entry":[{"resource":{"resourceType":"MedicationDispense"}}]}"#;
    let receipt = r#"{"resourceType":"Bundle","type":"document","entry":[{"resource":{"resourceType":"Composition"}}]}"#;
    task.status = TaskStatus::Completed;
    task.last_medication_dispense = Some(test_time() + Duration::hours(1));
    frontend
        .update_task_medication_dispense_receipt(
            &task,
            dispense_bundle,
            &TelematikId::new("3-07.2.1234560000.10.789"),
            test_time() + Duration::hours(1),
            None,
            receipt,
            &pharmacy_identity(),
        )
        .unwrap();

    let (retrieved, prescription, stored_receipt) = frontend
        .retrieve_task_and_prescription_and_receipt(&id)
        .unwrap()
        .unwrap();
    assert_eq!(retrieved.status, TaskStatus::Completed);
    assert_eq!(prescription.as_deref(), Some(PRESCRIPTION_BUNDLE));
    assert_eq!(stored_receipt.as_deref(), Some(receipt));

    // the dispense bundle is listed under the insurant's key space
    let dispenses = frontend
        .retrieve_medication_dispenses(&insurant(), None, None)
        .unwrap();
    assert_eq!(dispenses.len(), 1);
    assert_eq!(dispenses[0].prescription_id, id);
    assert_eq!(dispenses[0].bundle, dispense_bundle);
}

#[test]
fn test_dispense_key_survives_other_task_of_same_insurant() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    // two tasks, one insurant
    let mut ids = Vec::new();
    for _ in 0..2 {
        let mut task = draft_task(FlowType::PharmacyOnly);
        let id = frontend.store_task(&task).unwrap();
        task.prescription_id = Some(id);
        task.authored_on = frontend.retrieve_task(&id).unwrap().unwrap().authored_on;
        activate(&frontend, &mut task, &insurant()).unwrap();
        task.last_medication_dispense = Some(test_time());
        frontend
            .update_task_medication_dispense(
                &task,
                &format!(r#"{{"dispense":"for task {id}"}}"#),
                &TelematikId::new("3-07.2.1234560000.10.789"),
                test_time(),
                None,
            )
            .unwrap();
        ids.push(id);
    }

    // both bundles decrypt from one listing, whichever task wrote them
    let dispenses = frontend
        .retrieve_medication_dispenses(&insurant(), None, None)
        .unwrap();
    assert_eq!(dispenses.len(), 2);
    for id in ids {
        assert!(dispenses
            .iter()
            .any(|dispense| dispense.prescription_id == id));
    }
}

#[test]
fn test_delete_medication_dispense() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let mut task = draft_task(FlowType::PharmacyOnly);
    let id = frontend.store_task(&task).unwrap();
    task.prescription_id = Some(id);
    task.authored_on = frontend.retrieve_task(&id).unwrap().unwrap().authored_on;
    activate(&frontend, &mut task, &insurant()).unwrap();
    task.last_medication_dispense = Some(test_time());
    frontend
        .update_task_medication_dispense(
            &task,
            r#"{"dispense":"x"}"#,
            &TelematikId::new("3-07.2.1234560000.10.789"),
            test_time(),
            None,
        )
        .unwrap();

    frontend.update_task_delete_medication_dispense(&task).unwrap();
    assert!(frontend
        .retrieve_medication_dispenses(&insurant(), None, None)
        .unwrap()
        .is_empty());
    let retrieved = frontend.retrieve_task(&id).unwrap().unwrap();
    assert!(retrieved.last_medication_dispense.is_none());
}

#[test]
fn test_cancel_clears_personal_data_and_rereads_as_empty() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let mut task = draft_task(FlowType::PharmacyOnly);
    let id = frontend.store_task(&task).unwrap();
    task.prescription_id = Some(id);
    task.authored_on = frontend.retrieve_task(&id).unwrap().unwrap().authored_on;
    activate(&frontend, &mut task, &insurant()).unwrap();

    task.status = TaskStatus::Cancelled;
    frontend.update_task_clear_personal_data(&task).unwrap();

    let (retrieved, prescription, receipt) = frontend
        .retrieve_task_and_prescription_and_receipt(&id)
        .unwrap()
        .unwrap();
    assert_eq!(retrieved.status, TaskStatus::Cancelled);
    assert!(retrieved.kvnr.is_none());
    assert!(retrieved.access_code.is_none());
    assert!(retrieved.secret.is_none());
    assert!(retrieved.owner.is_none());
    assert!(prescription.is_none());
    assert!(receipt.is_none());
}

#[test]
fn test_all_flow_types_route_to_their_tables() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    for flow_type in FlowType::ALL {
        let id = frontend.store_task(&draft_task(flow_type)).unwrap();
        assert_eq!(id.flow_type(), flow_type);
        // serials restart per table
        assert_eq!(id.database_id(), 1);
        assert!(frontend.retrieve_task(&id).unwrap().is_some());
    }
}

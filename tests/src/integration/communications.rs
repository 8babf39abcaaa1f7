//! Dual-ciphertext communications.

use chrono::{Duration, TimeZone, Utc};

use erx_types::{Communication, FlowType, MessageType, PrescriptionId};

use super::support::{frontend_in_memory, soft_derivation, test_time};

const INSURANT: &str = "X123456789";
const PHARMACY: &str = "3-07.2.1234560000.10.789";

fn message(minute: u32) -> Communication {
    Communication {
        id: None,
        message_type: MessageType::DispReq,
        sender: INSURANT.to_string(),
        recipient: PHARMACY.to_string(),
        prescription_id: PrescriptionId::new(FlowType::PharmacyOnly, 7).unwrap(),
        sent: Utc.with_ymd_and_hms(2024, 4, 2, 9, minute, 0).unwrap(),
        received: None,
        payload: r#"{"contentString":"bitte an die Hintertür"}"#.to_string(),
    }
}

#[test]
fn test_sender_and_recipient_read_the_same_plaintext() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let mut communication = message(1);
    let id = frontend.insert_communication(&mut communication).unwrap();
    assert_eq!(communication.id, Some(id));

    let for_sender = frontend
        .retrieve_communications(INSURANT, None, None)
        .unwrap();
    let for_recipient = frontend
        .retrieve_communications(PHARMACY, None, None)
        .unwrap();
    assert_eq!(for_sender.len(), 1);
    assert_eq!(for_recipient.len(), 1);
    assert_eq!(for_sender[0].payload, communication.payload);
    assert_eq!(for_recipient[0].payload, communication.payload);
    assert_eq!(for_sender[0].id, Some(id));

    // a third party addressed by neither side sees nothing
    assert!(frontend
        .retrieve_communications("X999999999", None, None)
        .unwrap()
        .is_empty());
}

#[test]
fn test_received_timestamp_is_frozen_after_first_retrieval() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let mut communication = message(1);
    let id = frontend.insert_communication(&mut communication).unwrap();

    let first = test_time() + Duration::minutes(30);
    frontend
        .mark_communications_retrieved(&[id], first, PHARMACY)
        .unwrap();
    frontend
        .mark_communications_retrieved(&[id], first + Duration::hours(2), PHARMACY)
        .unwrap();

    let rows = frontend.retrieve_communications(PHARMACY, None, None).unwrap();
    assert_eq!(rows[0].received, Some(first));
}

#[test]
fn test_lexicographic_id_order_is_send_order() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let mut ids = Vec::new();
    for minute in [1, 2, 30, 59] {
        let mut communication = message(minute);
        ids.push(frontend.insert_communication(&mut communication).unwrap());
    }
    let mut sorted = ids.clone();
    sorted.sort_by_key(|id| id.to_string());
    assert_eq!(ids, sorted);
}

#[test]
fn test_delete_by_sender_only_and_existence() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let mut communication = message(1);
    let id = frontend.insert_communication(&mut communication).unwrap();
    assert!(frontend.exist_communication(&id).unwrap());

    // the recipient cannot delete
    assert!(frontend.delete_communication(&id, PHARMACY).unwrap().is_none());
    assert!(frontend.exist_communication(&id).unwrap());

    let deleted = frontend.delete_communication(&id, INSURANT).unwrap().unwrap();
    assert_eq!(deleted.0, id);
    assert!(!frontend.exist_communication(&id).unwrap());
}

#[test]
fn test_retrieval_narrowed_to_one_id() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let mut first = message(1);
    let first_id = frontend.insert_communication(&mut first).unwrap();
    let mut second = message(2);
    frontend.insert_communication(&mut second).unwrap();

    let narrowed = frontend
        .retrieve_communications(INSURANT, Some(&first_id), None)
        .unwrap();
    assert_eq!(narrowed.len(), 1);
    assert_eq!(narrowed[0].id, Some(first_id));

    assert_eq!(frontend.count_communications(INSURANT, None).unwrap(), 2);
    assert_eq!(
        frontend.retrieve_communication_ids(PHARMACY).unwrap().len(),
        2
    );
}

#[test]
fn test_representative_count() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let mut communication = message(1);
    communication.message_type = MessageType::Representative;
    communication.recipient = "X999999999".to_string();
    frontend.insert_communication(&mut communication).unwrap();

    let count = frontend
        .count_representative_communications(
            &erx_types::Kvnr::new(INSURANT),
            &erx_types::Kvnr::new("X999999999"),
            &PrescriptionId::new(FlowType::PharmacyOnly, 7).unwrap(),
        )
        .unwrap();
    assert_eq!(count, 1);
}

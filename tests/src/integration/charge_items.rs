//! Charge items: PKV-only storage with signed and unsigned payloads.

use erx_types::{
    ChargeInformation, ChargeItem, Communication, ErxError, FlowType, MessageType, PrescriptionId,
    TelematikId,
};

use super::support::{frontend_in_memory, insurant, soft_derivation, test_time};

const SIGNED_PRESCRIPTION: &str =
    r#"<?xml version="1.0"?><SignedDocument>prescription</SignedDocument>"#;
const SIGNED_RECEIPT: &str = r#"<?xml version="1.0"?><SignedDocument>receipt</SignedDocument>"#;
const SIGNED_DISPENSE: &str = r#"<?xml version="1.0"?><SignedDocument>dispense</SignedDocument>"#;

fn charge_information(prescription_id: PrescriptionId) -> ChargeInformation {
    ChargeInformation {
        charge_item: ChargeItem {
            prescription_id,
            enterer: TelematikId::new("3-07.2.1234560000.10.789"),
            kvnr: insurant(),
            entered_date: test_time(),
            last_modified: test_time(),
            access_code: "c0dec0dec0de".to_string(),
            marking_flags: None,
        },
        prescription: SIGNED_PRESCRIPTION.to_string(),
        unsigned_prescription: r#"{"resourceType":"Bundle","type":"document"}"#.to_string(),
        dispense_item: SIGNED_DISPENSE.to_string(),
        unsigned_dispense_item: r#"{"resourceType":"Bundle","entry":[]}"#.to_string(),
        receipt: SIGNED_RECEIPT.to_string(),
        unsigned_receipt: r#"{"resourceType":"Bundle","type":"collection"}"#.to_string(),
    }
}

#[test]
fn test_non_pkv_flow_type_is_rejected_without_side_effects() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let gkv_id = PrescriptionId::new(FlowType::PharmacyOnly, 4711).unwrap();
    let err = frontend
        .store_charge_information(&charge_information(gkv_id))
        .unwrap_err();
    assert!(matches!(err, ErxError::BadRequest(_)));

    // nothing was stored anywhere
    assert_eq!(
        frontend
            .count_charge_information_for_insurant(&insurant(), None)
            .unwrap(),
        0
    );
    assert_eq!(
        frontend.count_all_tasks_for_patient(&insurant(), None).unwrap(),
        0
    );
}

#[test]
fn test_store_and_retrieve_all_payloads() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let id = PrescriptionId::new(FlowType::PharmacyOnlyPkv, 6522).unwrap();
    frontend
        .store_charge_information(&charge_information(id))
        .unwrap();

    let retrieved = frontend.retrieve_charge_information(&id).unwrap();
    assert_eq!(retrieved.charge_item.kvnr, insurant());
    assert_eq!(retrieved.charge_item.access_code, "c0dec0dec0de");
    assert_eq!(retrieved.prescription, SIGNED_PRESCRIPTION);
    assert_eq!(retrieved.receipt, SIGNED_RECEIPT);
    assert_eq!(retrieved.dispense_item, SIGNED_DISPENSE);
    assert_eq!(
        retrieved.unsigned_prescription,
        r#"{"resourceType":"Bundle","type":"document"}"#
    );
}

#[test]
fn test_update_changes_billing_and_marking_only() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let id = PrescriptionId::new(FlowType::DirectAssignmentPkv, 77).unwrap();
    frontend
        .store_charge_information(&charge_information(id))
        .unwrap();

    let mut updated = charge_information(id);
    updated.charge_item.marking_flags =
        Some(r#"{"insuranceProvider":true,"taxOffice":false}"#.to_string());
    updated.dispense_item = r#"<?xml version="1.0"?><SignedDocument>corrected</SignedDocument>"#.to_string();
    updated.unsigned_dispense_item = r#"{"resourceType":"Bundle","entry":["corrected"]}"#.to_string();
    frontend.update_charge_information(&updated).unwrap();

    let retrieved = frontend.retrieve_charge_information(&id).unwrap();
    assert_eq!(
        retrieved.charge_item.marking_flags.as_deref(),
        Some(r#"{"insuranceProvider":true,"taxOffice":false}"#)
    );
    assert!(retrieved.dispense_item.contains("corrected"));
    // immutable payloads survive the update
    assert_eq!(retrieved.prescription, SIGNED_PRESCRIPTION);
}

#[test]
fn test_listing_and_deletion() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    for serial in 1..=3 {
        let id = PrescriptionId::new(FlowType::PharmacyOnlyPkv, serial).unwrap();
        frontend
            .store_charge_information(&charge_information(id))
            .unwrap();
    }

    let items = frontend.retrieve_all_charge_items(&insurant(), None).unwrap();
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|item| item.kvnr == insurant()));

    let first = PrescriptionId::new(FlowType::PharmacyOnlyPkv, 1).unwrap();
    frontend.delete_charge_information(&first).unwrap();
    assert_eq!(
        frontend
            .count_charge_information_for_insurant(&insurant(), None)
            .unwrap(),
        2
    );
}

#[test]
fn test_consent_withdrawal_clears_items_and_their_communications() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let id = PrescriptionId::new(FlowType::PharmacyOnlyPkv, 1).unwrap();
    frontend
        .store_charge_information(&charge_information(id))
        .unwrap();

    // one charge-change message and one ordinary message
    let mut charge_message = Communication {
        id: None,
        message_type: MessageType::ChargChangeReq,
        sender: insurant().as_str().to_string(),
        recipient: "3-07.2.1234560000.10.789".to_string(),
        prescription_id: id,
        sent: test_time(),
        received: None,
        payload: r#"{"contentString":"bitte korrigieren"}"#.to_string(),
    };
    frontend.insert_communication(&mut charge_message).unwrap();
    let mut ordinary = charge_message.clone();
    ordinary.id = None;
    ordinary.message_type = MessageType::DispReq;
    frontend.insert_communication(&mut ordinary).unwrap();

    frontend.clear_all_charge_information(&insurant()).unwrap();
    frontend
        .clear_all_charge_item_communications(&insurant())
        .unwrap();

    assert_eq!(
        frontend
            .count_charge_information_for_insurant(&insurant(), None)
            .unwrap(),
        0
    );
    // only the charge-change message is gone
    let remaining = frontend
        .retrieve_communications(insurant().as_str(), None, None)
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].message_type, MessageType::DispReq);
}

#[test]
fn test_delete_communications_for_charge_item() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let id = PrescriptionId::new(FlowType::PharmacyOnlyPkv, 9).unwrap();
    let mut charge_message = Communication {
        id: None,
        message_type: MessageType::ChargChangeReply,
        sender: "3-07.2.1234560000.10.789".to_string(),
        recipient: insurant().as_str().to_string(),
        prescription_id: id,
        sent: test_time(),
        received: None,
        payload: r#"{"contentString":"korrigiert"}"#.to_string(),
    };
    frontend.insert_communication(&mut charge_message).unwrap();

    frontend.delete_communications_for_charge_item(&id).unwrap();
    assert!(frontend
        .retrieve_communications(insurant().as_str(), None, None)
        .unwrap()
        .is_empty());
}

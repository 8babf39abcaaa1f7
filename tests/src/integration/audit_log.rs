//! The encrypted audit trail.

use erx_query::{ParameterType, SearchParameter, UrlArguments};
use erx_types::{
    AuditAction, AuditAgentType, AuditData, AuditEventId, AuditMetaData, FlowType, PrescriptionId,
};

use super::support::{frontend_in_memory, insurant, soft_derivation};

fn audit_entry(event_id: AuditEventId, metadata: AuditMetaData) -> AuditData {
    AuditData {
        id: None,
        event_id,
        action: AuditAction::Read,
        agent_type: AuditAgentType::Insurant,
        insurant: insurant(),
        device_id: 17,
        prescription_id: Some(PrescriptionId::new(FlowType::PharmacyOnly, 4711).unwrap()),
        metadata,
        recorded: None,
    }
}

fn named_metadata(name: &str) -> AuditMetaData {
    AuditMetaData {
        agent_name: Some(name.to_string()),
        agent_who: Some("X123456789".to_string()),
    }
}

#[test]
fn test_metadata_roundtrip_and_memoized_keys() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    // several entries for one insurant share one audit key generation, so
    // retrieval derives that key only once
    for index in 0..3 {
        let mut entry = audit_entry(
            AuditEventId::GetTask,
            named_metadata(&format!("Zugriff {index}")),
        );
        frontend.store_audit_event(&mut entry).unwrap();
        assert!(entry.id.is_some());
        assert!(entry.recorded.is_some());
    }

    let events = frontend
        .retrieve_audit_events(&insurant(), None, None, None)
        .unwrap();
    assert_eq!(events.len(), 3);
    for event in &events {
        assert_eq!(event.metadata.agent_who.as_deref(), Some("X123456789"));
        assert!(event
            .metadata
            .agent_name
            .as_deref()
            .unwrap()
            .starts_with("Zugriff"));
    }
}

#[test]
fn test_metadata_is_null_iff_event_carries_none() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let mut bare = audit_entry(
        AuditEventId::DeleteConsent,
        AuditMetaData {
            agent_name: None,
            agent_who: None,
        },
    );
    frontend.store_audit_event(&mut bare).unwrap();

    let events = frontend
        .retrieve_audit_events(&insurant(), None, None, None)
        .unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].metadata.is_empty());

    // no key material was coordinated for a metadata-free entry
    let hashed = derivation.hash_kvnr(&insurant()).unwrap();
    let latest = derivation
        .latest_blob_id(erx_hsm::KeyPurpose::AuditLog)
        .unwrap();
    assert!(frontend
        .backend()
        .retrieve_salt_for_account(&hashed, erx_types::MasterKeyType::AuditEvent, latest)
        .unwrap()
        .is_none());
}

#[test]
fn test_narrowing_by_id_and_prescription() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let mut first = audit_entry(AuditEventId::GetTask, named_metadata("erster"));
    let first_id = frontend.store_audit_event(&mut first).unwrap();
    let mut second = audit_entry(AuditEventId::PostTaskAccept, named_metadata("zweiter"));
    second.prescription_id = Some(PrescriptionId::new(FlowType::PharmacyOnlyPkv, 1).unwrap());
    frontend.store_audit_event(&mut second).unwrap();

    let by_id = frontend
        .retrieve_audit_events(&insurant(), Some(&first_id), None, None)
        .unwrap();
    assert_eq!(by_id.len(), 1);
    assert_eq!(by_id[0].event_id, AuditEventId::GetTask);

    let by_prescription = frontend
        .retrieve_audit_events(
            &insurant(),
            None,
            Some(&PrescriptionId::new(FlowType::PharmacyOnlyPkv, 1).unwrap()),
            None,
        )
        .unwrap();
    assert_eq!(by_prescription.len(), 1);
    assert_eq!(by_prescription[0].event_id, AuditEventId::PostTaskAccept);
}

#[test]
fn test_date_search_rewrites_to_id_comparison() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let mut entry = audit_entry(AuditEventId::GetTasks, named_metadata("heute"));
    frontend.store_audit_event(&mut entry).unwrap();

    // the date parameter targets the time-prefixed id column
    let parameters = vec![SearchParameter::with_db_name(
        "date",
        "id",
        ParameterType::DateAsUuid,
    )];

    let mut in_the_past = UrlArguments::new(parameters.clone());
    in_the_past
        .parse(
            &[("date".to_string(), "lt2000-01-01".to_string())],
            derivation.as_ref(),
        )
        .unwrap();
    assert!(frontend
        .retrieve_audit_events(&insurant(), None, None, Some(&in_the_past))
        .unwrap()
        .is_empty());

    let mut since_then = UrlArguments::new(parameters);
    since_then
        .parse(
            &[("date".to_string(), "ge2000-01-01".to_string())],
            derivation.as_ref(),
        )
        .unwrap();
    assert_eq!(
        frontend
            .retrieve_audit_events(&insurant(), None, None, Some(&since_then))
            .unwrap()
            .len(),
        1
    );
}

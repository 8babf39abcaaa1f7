//! URL search against stored rows, and paging link generation.

use chrono::{TimeZone, Utc};

use erx_query::{LinkType, ParameterType, SearchParameter, UrlArguments};
use erx_types::{FlowType, IdentityHasher, TaskStatus};

use super::support::{activate, draft_task_at, frontend_in_memory, insurant, soft_derivation};

fn task_parameters() -> Vec<SearchParameter> {
    vec![
        SearchParameter::with_db_name("authored-on", "authored_on", ParameterType::Date),
        SearchParameter::with_db_name("modified", "last_modified", ParameterType::Date),
        SearchParameter::new("status", ParameterType::TaskStatus),
    ]
}

fn query(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[test]
fn test_search_by_date_interval_returns_only_matching_task() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    // three tasks authored at the month boundaries
    let authored = [
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
    ];
    let mut ids = Vec::new();
    for instant in authored {
        let mut task = draft_task_at(FlowType::PharmacyOnly, instant);
        let id = frontend.store_task(&task).unwrap();
        task.prescription_id = Some(id);
        task.authored_on = frontend.retrieve_task(&id).unwrap().unwrap().authored_on;
        activate(&frontend, &mut task, &insurant()).unwrap();
        ids.push(id);
    }

    let mut arguments = UrlArguments::new(task_parameters());
    arguments
        .parse(
            &query(&[
                ("authored-on", "ge2024-02-01"),
                ("authored-on", "lt2024-03-01"),
            ]),
            derivation.as_ref(),
        )
        .unwrap();

    let tasks = frontend
        .retrieve_all_tasks_for_patient(&insurant(), Some(&arguments))
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].prescription_id, Some(ids[1]));
}

#[test]
fn test_search_by_status() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let mut ready = draft_task_at(FlowType::PharmacyOnly, Utc::now());
    let ready_id = frontend.store_task(&ready).unwrap();
    ready.prescription_id = Some(ready_id);
    ready.authored_on = frontend.retrieve_task(&ready_id).unwrap().unwrap().authored_on;
    activate(&frontend, &mut ready, &insurant()).unwrap();

    let mut arguments = UrlArguments::new(task_parameters());
    arguments
        .parse(&query(&[("status", "ready")]), derivation.as_ref())
        .unwrap();
    let tasks = frontend
        .retrieve_all_tasks_for_patient(&insurant(), Some(&arguments))
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Ready);

    let mut cancelled_search = UrlArguments::new(task_parameters());
    cancelled_search
        .parse(&query(&[("status", "cancelled")]), derivation.as_ref())
        .unwrap();
    assert!(frontend
        .retrieve_all_tasks_for_patient(&insurant(), Some(&cancelled_search))
        .unwrap()
        .is_empty());
}

#[test]
fn test_sort_and_offset_paging_against_rows() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    for day in 1..=25 {
        let mut task = draft_task_at(
            FlowType::PharmacyOnly,
            Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
        );
        let id = frontend.store_task(&task).unwrap();
        task.prescription_id = Some(id);
        task.authored_on = frontend.retrieve_task(&id).unwrap().unwrap().authored_on;
        activate(&frontend, &mut task, &insurant()).unwrap();
    }

    let mut arguments = UrlArguments::with_default_sort(task_parameters(), "authored-on");
    arguments
        .parse(
            &query(&[("_count", "10"), ("__offset", "10")]),
            derivation.as_ref(),
        )
        .unwrap();

    let page = frontend
        .retrieve_all_tasks_for_patient(&insurant(), Some(&arguments))
        .unwrap();
    assert_eq!(page.len(), 10);
    // second page of an ascending sort starts at day 11
    assert_eq!(
        page[0].authored_on,
        Utc.with_ymd_and_hms(2024, 3, 11, 12, 0, 0).unwrap()
    );

    let total = frontend
        .count_all_tasks_for_patient(&insurant(), None)
        .unwrap();
    assert_eq!(total, 25);

    let links = arguments
        .create_bundle_links(total as usize, "https://erp.example", "/Task")
        .unwrap();
    assert!(links[&LinkType::SelfLink].contains("__offset=10"));
    assert!(links[&LinkType::Prev].ends_with("__offset=0"));
    assert!(links[&LinkType::Next].ends_with("__offset=20"));
    assert!(links[&LinkType::First].ends_with("__offset=0"));
    assert!(links[&LinkType::Last].ends_with("__offset=20"));
}

#[test]
fn test_identity_search_hashes_through_the_derivation() {
    let (_, derivation) = soft_derivation();
    let frontend = frontend_in_memory(&derivation);

    let mut task = draft_task_at(FlowType::PharmacyOnly, Utc::now());
    let id = frontend.store_task(&task).unwrap();
    task.prescription_id = Some(id);
    task.authored_on = frontend.retrieve_task(&id).unwrap().unwrap().authored_on;
    activate(&frontend, &mut task, &insurant()).unwrap();

    // the rendered fragment carries the keyed hash, never the plaintext
    let mut arguments = UrlArguments::new(vec![SearchParameter::with_db_name(
        "patient",
        "kvnr_hashed",
        ParameterType::HashedIdentity,
    )]);
    arguments
        .parse(&query(&[("patient", "X123456789")]), derivation.as_ref())
        .unwrap();
    let fragment = arguments.sql_where_expression("").unwrap();
    assert!(!fragment.contains("X123456789"));
    let expected_hash = derivation.hash_identity("X123456789").unwrap().to_hex();
    assert!(fragment.contains(&expected_hash));
}

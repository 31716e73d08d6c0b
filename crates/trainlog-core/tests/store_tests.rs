//! Integration tests for the cache on top of the SQLite store.
//!
//! These run the full write path (recorder -> cache -> SQLite) against
//! on-disk databases in temp directories.

use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use trainlog_core::{
    into_fields, Bucket, EventRecorder, LogRecordCache, MemoryBackend, PersistenceBackend,
    RecordKey, SessionRef, SqliteBackend, TrainingEvent, UserProfile,
};

fn create_test_store() -> (TempDir, Arc<SqliteBackend>) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = SqliteBackend::open(temp_dir.path().join("trainlog.sqlite")).unwrap();
    (temp_dir, Arc::new(store))
}

fn course_viewed(userid: i64, region: &str) -> TrainingEvent {
    serde_json::from_value(json!({
        "eventname": "\\core\\event\\course_viewed",
        "component": "core",
        "action": "viewed",
        "target": "course",
        "crud": "r",
        "contextinstanceid": 12,
        "userid": userid,
        "timecreated": "2026-02-10T08:00:00Z",
        "entity": "New Entity 1",
        "session": { "id": 5, "name": "Session 1", "shortname": "S1" },
        "collection": "Collection 1",
        "user": { "region": region }
    }))
    .unwrap()
}

#[test]
fn test_repeated_event_in_one_request() {
    let (_temp, store) = create_test_store();
    let mut recorder = EventRecorder::new(LogRecordCache::new(store.clone()));

    let first = recorder.record(&course_viewed(2, "Region 1")).unwrap();
    let second = recorder.record(&course_viewed(2, "Region 2")).unwrap();
    recorder.finish();

    assert_eq!(first.log, second.log);
    assert_eq!(first.entity, second.entity);
    assert_eq!(first.session, second.session);
    assert_ne!(first.region, second.region);

    let log = store.fetch_by_id(Bucket::Log, first.log).unwrap().unwrap();
    assert_eq!(log.fields["numberview"], json!(2));

    let stats = store.stats().unwrap();
    assert_eq!(stats.rows[&Bucket::Log], 1);
    assert_eq!(stats.rows[&Bucket::Entity], 1);
    assert_eq!(stats.rows[&Bucket::Session], 1);
    assert_eq!(stats.rows[&Bucket::Collection], 1);
    assert_eq!(stats.rows[&Bucket::Region], 2);
}

#[test]
fn test_requests_share_rows_through_the_store() {
    let (_temp, store) = create_test_store();

    let mut first_request = EventRecorder::new(LogRecordCache::new(store.clone()));
    let first = first_request.record(&course_viewed(2, "Region 1")).unwrap();
    first_request.finish();

    let mut second_request = EventRecorder::new(LogRecordCache::new(store.clone()));
    let second = second_request.record(&course_viewed(2, "Region 1")).unwrap();
    second_request.finish();

    assert_eq!(first, second);
    let history = store
        .fetch_by_id(Bucket::LogHistory, first.log_history)
        .unwrap()
        .unwrap();
    assert_eq!(history.fields["numberview"], json!(2));
    assert_eq!(store.stats().unwrap().total_rows, 7);
}

#[test]
fn test_two_caches_on_one_database_do_not_duplicate_rows() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("shared.sqlite");

    let mut a = LogRecordCache::new(Arc::new(SqliteBackend::open(&db_path).unwrap()));
    let mut b = LogRecordCache::new(Arc::new(SqliteBackend::open(&db_path).unwrap()));
    let fields = into_fields(json!({ "name": "Acme" })).unwrap();

    let from_a = a
        .get_or_create_record(Bucket::Entity, "Acme", fields.clone())
        .unwrap();
    let from_b = b.get_or_create_record(Bucket::Entity, "Acme", fields).unwrap();

    assert_eq!(from_a, from_b);
    assert_eq!(a.backend().row_count(Bucket::Entity).unwrap(), 1);
}

#[test]
fn test_cache_view_matches_store_after_writes() {
    let (_temp, store) = create_test_store();
    let mut cache = LogRecordCache::new(store.clone());

    let fields = into_fields(json!({ "eventname": "viewed", "userid": 4, "numberview": 1 })).unwrap();
    let id = cache
        .get_or_create_record(Bucket::Log, RecordKey::Fields, fields.clone())
        .unwrap();
    cache
        .get_or_create_record(Bucket::Log, RecordKey::Fields, fields)
        .unwrap();

    let stored = store.fetch_by_id(Bucket::Log, id).unwrap().unwrap();
    let cached = cache.get_log().to_map();
    assert_eq!(
        serde_json::to_value(&cached[&Bucket::Log][&id]).unwrap(),
        serde_json::to_value(&stored.fields).unwrap()
    );
}

#[test]
fn test_event_without_entity_writes_nothing() {
    let (_temp, store) = create_test_store();
    let mut recorder = EventRecorder::new(LogRecordCache::new(store.clone()));

    let event = TrainingEvent {
        entity: None,
        session: Some(SessionRef {
            id: 1,
            name: "Orphan".into(),
            shortname: String::new(),
        }),
        user: UserProfile::default(),
        ..course_viewed(3, "Region 1")
    };

    let err = recorder.record(&event).unwrap_err();
    assert!(err.is_contract_violation());
    assert_eq!(store.stats().unwrap().total_rows, 0);
}

#[test]
fn test_filters_compare_json_types_on_both_backends() {
    let (_temp, sqlite) = create_test_store();
    let backends: [Arc<dyn PersistenceBackend>; 2] = [sqlite, Arc::new(MemoryBackend::new())];

    let rows = [
        ("k0", json!({"active": true, "n": 2})),
        ("k1", json!({"active": 1, "n": 2.0})),
        ("k2", json!({"active": "true", "n": "2"})),
        ("k3", json!({"tags": ["a"]})),
        ("k4", json!({"tags": "[\"a\"]"})),
    ];
    let cases = [
        (json!({"active": true}), vec!["k0"]),
        (json!({"active": 1}), vec!["k1"]),
        (json!({"n": 2}), vec!["k0"]),
        (json!({"n": 2.0}), vec!["k1"]),
        (json!({"n": "2"}), vec!["k2"]),
        (json!({"tags": ["a"]}), vec!["k3"]),
        (json!({"tags": "[\"a\"]"}), vec!["k4"]),
        (json!({"missing": null}), vec![]),
    ];

    for backend in backends {
        for (key, row) in &rows {
            backend
                .insert(Bucket::Entity, key, &into_fields(row.clone()).unwrap())
                .unwrap();
        }

        for (filter, expected) in &cases {
            let found: Vec<String> = backend
                .fetch_by_filter(Bucket::Entity, &into_fields(filter.clone()).unwrap())
                .unwrap()
                .into_iter()
                .map(|record| record.key)
                .collect();
            assert_eq!(&found, expected, "filter {}", filter);
        }
    }
}

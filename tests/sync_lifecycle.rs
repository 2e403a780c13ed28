//! Integration tests for the sync lifecycle: initial sync, incremental
//! updates, throttling, failures, persistence and reset.
//!
//! The remote API is a wiremock server speaking the real JSON envelopes, so
//! these tests cover the HTTP client, decoding, merging and analytics
//! together.

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kanjisync::analytics::Analytics;
use kanjisync::error::ErrorKind;
use kanjisync::model::ResourceCategory;
use kanjisync::storage::{AccessMode, Store, StoreError};
use kanjisync::sync::{ChangeEvent, SyncConfig, SyncEngine, SyncOutcome};
use kanjisync::HttpFetcher;

const FIRST_SYNC_AT: &str = "2024-03-01T10:00:00.000000Z";
const SECOND_SYNC_AT: &str = "2024-03-02T10:00:00.000000Z";

// ============================================================================
// Fixtures
// ============================================================================

fn collection(
    server: &MockServer,
    endpoint: &str,
    updated_at: Option<&str>,
    data: Vec<Value>,
) -> String {
    json!({
        "object": "collection",
        "url": format!("{}/v2/{endpoint}", server.uri()),
        "pages": {"per_page": 500, "next_url": null, "previous_url": null},
        "total_count": data.len(),
        "data_updated_at": updated_at,
        "data": data
    })
    .to_string()
}

fn radical(id: i64) -> Value {
    json!({
        "id": id,
        "object": "radical",
        "url": format!("https://api.example.com/v2/subjects/{id}"),
        "data_updated_at": FIRST_SYNC_AT,
        "data": {
            "created_at": "2012-02-27T18:08:16.000000Z",
            "level": 1,
            "slug": "ground",
            "document_url": "https://www.example.com/radicals/ground",
            "characters": "一",
            "meanings": [{"meaning": "Ground", "primary": true, "accepted_answer": true}],
            "amalgamation_subject_ids": [440]
        }
    })
}

fn kanji(id: i64, components: &[i64]) -> Value {
    json!({
        "id": id,
        "object": "kanji",
        "url": format!("https://api.example.com/v2/subjects/{id}"),
        "data_updated_at": FIRST_SYNC_AT,
        "data": {
            "created_at": "2012-02-27T19:55:19.000000Z",
            "level": 1,
            "slug": "一",
            "document_url": "https://www.example.com/kanji/一",
            "characters": "一",
            "meanings": [{"meaning": "One", "primary": true, "accepted_answer": true}],
            "readings": [{"type": "onyomi", "primary": true, "accepted_answer": true, "reading": "いち"}],
            "component_subject_ids": components
        }
    })
}

fn assignment(id: i64, subject_id: i64, subject_type: &str, stage: u8, updated_at: &str) -> Value {
    let started_at = (stage > 0).then_some("2024-02-01T01:00:00.000000Z");
    let passed_at = (stage >= 5).then_some("2024-02-05T00:00:00.000000Z");
    let available_at = (stage > 0).then_some("2099-01-01T00:00:00.000000Z");
    json!({
        "id": id,
        "object": "assignment",
        "url": format!("https://api.example.com/v2/assignments/{id}"),
        "data_updated_at": updated_at,
        "data": {
            "subject_id": subject_id,
            "subject_type": subject_type,
            "srs_stage": stage,
            "unlocked_at": "2024-02-01T00:00:00.000000Z",
            "started_at": started_at,
            "passed_at": passed_at,
            "burned_at": null,
            "available_at": available_at,
            "resurrected_at": null
        }
    })
}

fn user_body(level: u32) -> String {
    json!({
        "object": "user",
        "url": "https://api.example.com/v2/user",
        "data_updated_at": FIRST_SYNC_AT,
        "data": {
            "id": "5a6a5234-a392-4a87-8f3f-33342afe8a42",
            "username": "example_user",
            "level": level,
            "profile_url": "https://www.example.com/users/example_user",
            "started_at": "2024-02-01T00:00:00.000000Z",
            "current_vacation_started_at": null,
            "subscription": {
                "active": true,
                "type": "recurring",
                "max_level_granted": 60,
                "period_ends_at": null
            }
        }
    })
    .to_string()
}

/// Mount the first-sync responses for every category.
async fn mount_initial(server: &MockServer) {
    let pages = [
        (
            "subjects",
            collection(server, "subjects", Some(FIRST_SYNC_AT), vec![radical(1), kanji(440, &[1])]),
        ),
        (
            "assignments",
            collection(
                server,
                "assignments",
                Some(FIRST_SYNC_AT),
                vec![
                    assignment(9001, 1, "radical", 5, FIRST_SYNC_AT),
                    assignment(9002, 440, "kanji", 0, FIRST_SYNC_AT),
                ],
            ),
        ),
        ("study_materials", collection(server, "study_materials", None, vec![])),
        ("review_statistics", collection(server, "review_statistics", None, vec![])),
    ];
    for (endpoint, body) in pages {
        Mock::given(method("GET"))
            .and(path(format!("/v2/{endpoint}")))
            .and(query_param_is_missing("updated_after"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/v2/user"))
        .respond_with(ResponseTemplate::new(200).set_body_string(user_body(1)))
        .mount(server)
        .await;
}

fn engine(server: &MockServer, store: Store) -> SyncEngine {
    let base = Url::parse(&format!("{}/v2/", server.uri())).unwrap();
    let fetcher = HttpFetcher::new(base, SecretString::from("test-key".to_string()))
        .unwrap()
        .with_retry_delay(Duration::from_millis(1));
    SyncEngine::new(store, Arc::new(fetcher), SyncConfig::default())
}

// ============================================================================
// Initial Sync
// ============================================================================

#[tokio::test]
async fn test_initial_sync_populates_every_category() {
    let server = MockServer::start().await;
    mount_initial(&server).await;
    let store = Store::open_in_memory().await.unwrap();
    let engine = engine(&server, store.clone());
    let mut events = engine.subscribe();

    let results = engine.update_all(Duration::ZERO).await;
    let outcomes: Vec<_> = results
        .into_iter()
        .map(|(category, result)| (category, result.unwrap()))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            (ResourceCategory::Assignments, SyncOutcome::Updated { items: 2 }),
            (ResourceCategory::Subjects, SyncOutcome::Updated { items: 2 }),
            (ResourceCategory::StudyMaterials, SyncOutcome::Updated { items: 0 }),
            (ResourceCategory::ReviewStatistics, SyncOutcome::Updated { items: 0 }),
            (ResourceCategory::User, SyncOutcome::Updated { items: 1 }),
        ]
    );

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event.category());
    }
    seen.sort();
    assert_eq!(seen, ResourceCategory::ALL.to_vec());

    let analytics = Analytics::new(store.clone());
    assert_eq!(analytics.user().await.unwrap().unwrap().level, 1);
    assert_eq!(
        analytics.subject(440).await.unwrap().unwrap().primary_reading(),
        Some("いち")
    );

    // Assignment levels come from the subjects, whichever category merged first.
    let kanji_assignment = analytics.assignment_for_subject(440).await.unwrap().unwrap();
    assert_eq!(kanji_assignment.level, 1);
    assert!(kanji_assignment.is_lesson());

    let queue = analytics.study_queue(Utc::now()).await.unwrap();
    assert_eq!(queue.lessons_available, 1);
    assert_eq!(queue.reviews_available, 0);
    assert_eq!(
        queue.next_review_date,
        Some(Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap())
    );

    let progression = analytics.level_progression(1).await.unwrap();
    assert_eq!((progression.radicals.progress, progression.radicals.total), (1, 1));
    assert_eq!((progression.kanji.progress, progression.kanji.total), (0, 1));

    let ledger = store
        .ledger_entry(ResourceCategory::Subjects)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        ledger.last_update_at,
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    );
}

// ============================================================================
// Incremental Sync
// ============================================================================

#[tokio::test]
async fn test_second_sync_sends_cursor_and_merges_delta() {
    let server = MockServer::start().await;
    mount_initial(&server).await;
    let store = Store::open_in_memory().await.unwrap();
    let engine = engine(&server, store.clone());
    for (_, result) in engine.update_all(Duration::ZERO).await {
        result.unwrap();
    }

    Mock::given(method("GET"))
        .and(path("/v2/assignments"))
        .and(query_param("updated_after", FIRST_SYNC_AT))
        .respond_with(ResponseTemplate::new(200).set_body_string(collection(
            &server,
            "assignments",
            Some(SECOND_SYNC_AT),
            vec![assignment(9002, 440, "kanji", 5, SECOND_SYNC_AT)],
        )))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = engine
        .update(ResourceCategory::Assignments, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Updated { items: 1 });

    let analytics = Analytics::new(store.clone());
    let progression = analytics.level_progression(1).await.unwrap();
    assert_eq!(progression.kanji.passed_subject_ids, vec![440]);
    assert_eq!(analytics.study_queue(Utc::now()).await.unwrap().lessons_available, 0);

    let ledger = store
        .ledger_entry(ResourceCategory::Assignments)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        ledger.last_update_at,
        Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn test_recent_fetch_is_throttled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/subjects"))
        .respond_with(ResponseTemplate::new(200).set_body_string(collection(
            &server,
            "subjects",
            Some(FIRST_SYNC_AT),
            vec![radical(1), kanji(440, &[1])],
        )))
        .expect(1)
        .mount(&server)
        .await;
    let store = Store::open_in_memory().await.unwrap();
    let engine = engine(&server, store);

    let first = engine
        .update(ResourceCategory::Subjects, Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(first, SyncOutcome::Updated { items: 2 });

    // A second request would fail the mock's expectation when the server drops.
    let second = engine
        .update(ResourceCategory::Subjects, Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(second, SyncOutcome::NoData);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_rejected_key_leaves_store_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let store = Store::open_in_memory().await.unwrap();
    let engine = engine(&server, store.clone());
    let mut events = engine.subscribe();

    let err = engine
        .update(ResourceCategory::Assignments, Duration::ZERO)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCredential);

    assert!(store
        .ledger_entry(ResourceCategory::Assignments)
        .await
        .unwrap()
        .is_none());
    assert!(!Analytics::new(store)
        .has_category(ResourceCategory::Assignments)
        .await
        .unwrap());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_one_failing_category_does_not_stop_the_others() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/review_statistics"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    mount_initial(&server).await;
    let store = Store::open_in_memory().await.unwrap();
    let engine = engine(&server, store);

    for (category, result) in engine.update_all(Duration::ZERO).await {
        match category {
            ResourceCategory::ReviewStatistics => {
                assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound)
            }
            _ => assert!(result.is_ok(), "{category} failed: {result:?}"),
        }
    }
}

#[tokio::test]
async fn test_malformed_page_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/subjects"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;
    let store = Store::open_in_memory().await.unwrap();
    let engine = engine(&server, store.clone());

    let err = engine
        .update(ResourceCategory::Subjects, Duration::ZERO)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decode);
    assert!(store
        .ledger_entry(ResourceCategory::Subjects)
        .await
        .unwrap()
        .is_none());
}

// ============================================================================
// Persistence and Reset
// ============================================================================

#[tokio::test]
async fn test_synced_data_survives_reopen() {
    let server = MockServer::start().await;
    mount_initial(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("kanjisync.db");

    let store = Store::open(&db_path, AccessMode::ReadWrite).await.unwrap();
    engine(&server, store.clone())
        .update(ResourceCategory::Subjects, Duration::ZERO)
        .await
        .unwrap();
    store.close().await;

    let reopened = Store::open(&db_path, AccessMode::ReadOnly).await.unwrap();
    let analytics = Analytics::new(reopened.clone());
    assert!(analytics.has_category(ResourceCategory::Subjects).await.unwrap());
    assert_eq!(analytics.subjects_at_level(1).await.unwrap().len(), 2);
    assert_eq!(
        analytics.search_subjects("one", 10).await.unwrap()[0].subject_id,
        440
    );

    // Syncing through a read-only handle fails in the store, not the network.
    let err = engine(&server, reopened)
        .update(ResourceCategory::User, Duration::ZERO)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
}

#[tokio::test]
async fn test_read_only_open_requires_existing_store() {
    let dir = tempfile::tempdir().unwrap();
    let result = Store::open(dir.path().join("absent.db"), AccessMode::ReadOnly).await;
    assert!(matches!(result, Err(StoreError::Missing(_))));
}

#[tokio::test]
async fn test_reset_clears_data_and_ledger() {
    let server = MockServer::start().await;
    mount_initial(&server).await;
    let store = Store::open_in_memory().await.unwrap();
    let engine = engine(&server, store.clone());
    for (_, result) in engine.update_all(Duration::ZERO).await {
        result.unwrap();
    }

    store.reset().await.unwrap();

    let analytics = Analytics::new(store.clone());
    for category in ResourceCategory::ALL {
        assert!(!analytics.has_category(category).await.unwrap());
    }
    assert!(analytics.user().await.unwrap().is_none());
    assert!(analytics.search_subjects("one", 10).await.unwrap().is_empty());
    assert!(store.check_search_consistency().await.unwrap().is_consistent);
}

#[tokio::test]
async fn test_spawned_update_reports_through_completion() {
    let server = MockServer::start().await;
    mount_initial(&server).await;
    let store = Store::open_in_memory().await.unwrap();
    let engine = engine(&server, store);
    let mut events = engine.subscribe();

    let (tx, rx) = tokio::sync::oneshot::channel();
    let handle = engine.update_user(Duration::ZERO, move |result| {
        let _ = tx.send(result);
    });
    assert_eq!(handle.category(), ResourceCategory::User);
    handle.wait().await;

    assert_eq!(rx.await.unwrap().unwrap(), SyncOutcome::Updated { items: 1 });
    assert_eq!(events.recv().await.unwrap(), ChangeEvent::UserChanged);
}

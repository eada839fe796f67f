//! Integration tests for fail-soft behavior: stale connections, backend
//! failures and missing tiers.

use std::sync::Arc;

use serde_json::json;
use strata_storage::{
    GLOBAL_CONTAINER, HostCapabilities, MemorySyncStorage, SizeBudget, Strata, StorageEvent,
    SyncStorage,
};
use strata_test::{
    FailingSyncStorage, FlakyDocumentBackend, RecordingSink, init_test_logging, sized_value,
    test_budget, test_strata,
};

fn flaky_strata(backend: &FlakyDocumentBackend, sink: &RecordingSink) -> Strata {
    init_test_logging();
    test_strata(test_budget(), Arc::new(backend.clone()), sink.shared())
}

#[tokio::test]
async fn test_one_stale_connection_is_recovered() {
    let backend = FlakyDocumentBackend::new();
    let sink = RecordingSink::new();
    let strata = flaky_strata(&backend, &sink);

    assert!(strata.open_db().await);
    backend.inject_stale(1);
    strata.set_db_data(GLOBAL_CONTAINER, "k", json!("v")).await;

    assert_eq!(strata.get_db_data(GLOBAL_CONTAINER, "k").await, Some(json!("v")));
    assert_eq!(sink.count("stale_connection"), 1);
    assert_eq!(sink.count("backend_failure"), 0);
    assert_eq!(backend.open_count(), 2);
}

#[tokio::test]
async fn test_repeated_stale_connection_degrades_to_noop() {
    let backend = FlakyDocumentBackend::new().with_stale_failures(2);
    let sink = RecordingSink::new();
    let strata = flaky_strata(&backend, &sink);

    strata.set_db_data(GLOBAL_CONTAINER, "k", json!("v")).await;

    assert_eq!(sink.count("stale_connection"), 1);
    assert_eq!(sink.count("backend_failure"), 1);
    assert_eq!(strata.get_db_data(GLOBAL_CONTAINER, "k").await, None);
}

#[tokio::test]
async fn test_backend_failure_reads_as_absent() {
    let backend = FlakyDocumentBackend::new();
    let sink = RecordingSink::new();
    let strata = flaky_strata(&backend, &sink);

    strata.set_db_data(GLOBAL_CONTAINER, "k", json!("v")).await;
    backend.inject_failures(1);

    assert_eq!(strata.get_db_data(GLOBAL_CONTAINER, "k").await, None);
    assert!(sink.events().iter().any(|event| matches!(
        event,
        StorageEvent::BackendFailure { operation: "read", .. }
    )));
    assert_eq!(strata.get_db_data(GLOBAL_CONTAINER, "k").await, Some(json!("v")));
}

#[tokio::test]
async fn test_refused_open_keeps_cache_working() {
    let backend = FlakyDocumentBackend::new();
    backend.refuse_opens(true);
    let sink = RecordingSink::new();
    let strata = flaky_strata(&backend, &sink);

    assert!(!strata.open_db().await);
    assert!(!strata.create_object_store("settings").await);

    strata.set_cache_data("small", json!(1)).await;
    assert_eq!(strata.get_cache_data("small").await, json!(1));

    // The upgrade fails, so nothing is stored and nothing is raised.
    strata.set_cache_data("large", sized_value(60)).await;
    assert_eq!(strata.get_cache_data("large").await, json!({}));
    assert!(sink.count("backend_failure") >= 1);
}

#[tokio::test]
async fn test_failed_upgrade_keeps_previous_value() {
    let backend = FlakyDocumentBackend::new();
    let sink = RecordingSink::new();
    let strata = flaky_strata(&backend, &sink);

    strata.set_cache_data("k", json!("old")).await;
    backend.inject_failures(1);
    strata.set_cache_data("k", sized_value(60)).await;

    assert_eq!(strata.get_cache_data("k").await, json!("old"));
    assert_eq!(sink.count("entry_upgraded"), 0);
    assert_eq!(sink.count("backend_failure"), 1);

    strata.set_cache_data("k", sized_value(60)).await;
    assert_eq!(strata.get_cache_data("k").await, sized_value(60));
    assert_eq!(sink.count("entry_upgraded"), 1);
}

#[tokio::test]
async fn test_failing_primary_store_never_panics() {
    init_test_logging();
    let sink = RecordingSink::new();
    let strata = Strata::builder()
        .budget(test_budget())
        .capabilities(HostCapabilities::default().with_async_store(false))
        .sync_storage(Arc::new(FailingSyncStorage::new("quota exceeded")))
        .sink(sink.shared())
        .build();

    strata.set_cache_data("k", json!("v")).await;
    assert_eq!(strata.get_cache_data("k").await, json!({}));
    strata.remove_cache_data("k").await;
    strata.clear_cache_data();
    assert!(strata.get_cache_data_info().await.is_empty());
    assert!(sink.count("backend_failure") >= 1);
}

#[tokio::test]
async fn test_minimal_host_redirects_db_calls_to_fallback() {
    init_test_logging();
    let fallback = Arc::new(MemorySyncStorage::new());
    let strata = Strata::builder()
        .budget(SizeBudget::default())
        .capabilities(HostCapabilities::minimal())
        .fallback_storage(fallback.clone())
        .build();

    assert!(!strata.has_document_store());
    assert!(!strata.open_db().await);

    strata.set_db_data("settings", "theme", json!("dark")).await;
    assert_eq!(fallback.get_item("theme").unwrap().as_deref(), Some("\"dark\""));
    assert_eq!(strata.get_db_data("settings", "theme").await, Some(json!("dark")));
    assert_eq!(strata.get_db_data("settings", "missing").await, None);

    strata.remove_db_data("settings", "theme").await;
    assert_eq!(fallback.get_item("theme").unwrap(), None);
    assert!(strata.get_db_data_info("settings").await.is_empty());
}

#[tokio::test]
async fn test_object_store_lifecycle_through_facade() {
    let backend = FlakyDocumentBackend::new();
    let sink = RecordingSink::new();
    let strata = flaky_strata(&backend, &sink);

    assert!(strata.create_object_store("settings").await);
    assert!(!strata.create_object_store("settings").await);

    strata.set_db_data("settings", "a", json!(1)).await;
    strata.set_db_data("settings", "b", json!(2)).await;
    assert_eq!(
        strata.get_db_data_info("settings").await,
        vec![json!(1), json!(2)]
    );

    strata.clear_db_data("settings").await;
    assert!(strata.get_db_data_info("settings").await.is_empty());

    assert!(strata.delete_object_store("settings").await);
    assert_eq!(strata.get_db_data("settings", "a").await, None);
    assert_eq!(sink.count("schema_changed"), 2);
}

#[tokio::test]
async fn test_clear_db_leaves_cache_tier_alone() {
    let backend = FlakyDocumentBackend::new();
    let sink = RecordingSink::new();
    let strata = flaky_strata(&backend, &sink);

    strata.set_cache_data("small", json!("kept")).await;
    strata.set_cache_data("large", sized_value(60)).await;
    strata.clear_db().await;

    assert_eq!(strata.get_cache_data("small").await, json!("kept"));
    assert_eq!(strata.get_cache_data("large").await, json!({}));

    strata.close_db().await;
    strata.set_db_data(GLOBAL_CONTAINER, "after", json!(true)).await;
    assert_eq!(
        strata.get_db_data(GLOBAL_CONTAINER, "after").await,
        Some(json!(true))
    );
}

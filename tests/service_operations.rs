//! Service layer integration tests
//!
//! Services over the relational and in-memory adapters, wired together
//! through a local action caller for relation population.

mod common;

use std::sync::Arc;

use serde_json::{json, Value};

use polystore::adapter::relational::PoolManager;
use polystore::adapter::{MemoryAdapter, MemoryConfig};
use polystore::{DbError, Records, RelationSpec, Service, ServiceSettings};

use common::{people, relational_adapter, LocalBroker};

async fn people_service(dir: &std::path::Path) -> Service {
    let adapter = Arc::new(relational_adapter(dir, Arc::new(PoolManager::new())));
    let service = Service::new("users", adapter, ServiceSettings::default()).unwrap();
    service.connect().await.unwrap();
    for person in people() {
        service.create(&Value::Object(person)).await.unwrap();
    }
    service
}

fn memory_service(name: &str, settings: ServiceSettings) -> Service {
    let adapter = Arc::new(MemoryAdapter::new(MemoryConfig::default()));
    Service::new(name, adapter, settings).unwrap()
}

// =============================================================================
// READS
// =============================================================================

#[tokio::test]
async fn test_search_through_service() {
    let dir = tempfile::tempdir().unwrap();
    let service = people_service(dir.path()).await;

    let rows = service
        .find(&json!({"search": "John", "searchFields": "name email"}))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_list_first_page() {
    let dir = tempfile::tempdir().unwrap();
    let service = people_service(dir.path()).await;

    let page = service
        .dispatch("list", json!({"page": 1, "pageSize": 2, "sort": "name"}))
        .await
        .unwrap();
    assert_eq!(page["rows"].as_array().unwrap().len(), 2);
    assert_eq!(page["total"], json!(6));
    assert_eq!(page["page"], json!(1));
    assert_eq!(page["pageSize"], json!(2));
    assert_eq!(page["totalPages"], json!(3));
}

#[tokio::test]
async fn test_list_window_is_cumulative() {
    let dir = tempfile::tempdir().unwrap();
    let service = people_service(dir.path()).await;

    let page = service
        .list(&json!({"page": 2, "pageSize": 2, "sort": "age name"}))
        .await
        .unwrap();
    let ages: Vec<Value> = page.rows.iter().map(|r| r["age"].clone()).collect();
    assert_eq!(ages, vec![json!(25), json!(46), json!(65), json!(75)]);
    assert_eq!(page.total, 6);
}

#[tokio::test]
async fn test_list_rejects_page_zero() {
    let dir = tempfile::tempdir().unwrap();
    let service = people_service(dir.path()).await;

    let err = service.list(&json!({"page": 0})).await.unwrap_err();
    assert!(matches!(err, DbError::Validation(_)));
}

#[tokio::test]
async fn test_count_with_filter() {
    let dir = tempfile::tempdir().unwrap();
    let service = people_service(dir.path()).await;

    let total = service
        .dispatch("count", json!({"query": {"age": {"<": 30}}, "limit": 1}))
        .await
        .unwrap();
    assert_eq!(total, json!(3));
}

#[tokio::test]
async fn test_get_ids_keeps_request_order() {
    let dir = tempfile::tempdir().unwrap();
    let service = people_service(dir.path()).await;

    let found = service.get(&json!({"ids": [4, 1, 99]})).await.unwrap();
    let names: Vec<Value> = found.iter().map(|r| r["name"].clone()).collect();
    assert_eq!(names, vec![json!("Julian"), json!("John")]);
}

#[tokio::test]
async fn test_get_malformed_id() {
    let dir = tempfile::tempdir().unwrap();
    let service = people_service(dir.path()).await;

    let err = service.get(&json!({"id": "first"})).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_IDENTIFIER");
}

// =============================================================================
// WRITES
// =============================================================================

#[tokio::test]
async fn test_update_merges_fields() {
    let dir = tempfile::tempdir().unwrap();
    let service = people_service(dir.path()).await;

    let updated = service
        .dispatch("update", json!({"id": 2, "email": "marie@example.org"}))
        .await
        .unwrap();
    assert_eq!(updated["email"], json!("marie@example.org"));
    assert_eq!(updated["age"], json!(75));
}

#[tokio::test]
async fn test_update_missing_id_message() {
    let dir = tempfile::tempdir().unwrap();
    let service = people_service(dir.path()).await;

    let err = service.update(&json!({"age": 1})).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Validation error: Invalid parameter. Action update requires the parameter id!"
    );
}

#[tokio::test]
async fn test_remove_by_bare_id() {
    let dir = tempfile::tempdir().unwrap();
    let service = people_service(dir.path()).await;

    let summary = service.dispatch("remove", json!(3)).await.unwrap();
    assert_eq!(summary["deletedCount"], json!(1));
    assert_eq!(service.count(&json!({})).await.unwrap(), 5);
}

#[tokio::test]
async fn test_find_and_update_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let service = people_service(dir.path()).await;

    let updated = service
        .dispatch(
            "findAndUpdate",
            json!({"query": {"email": "is null"}, "update": {"email": "none@example.org"}}),
        )
        .await
        .unwrap();
    assert_eq!(updated.as_array().unwrap().len(), 2);
    assert_eq!(
        service.count(&json!({"query": {"email": "is null"}})).await.unwrap(),
        0
    );
}

// =============================================================================
// POPULATE
// =============================================================================

#[tokio::test]
async fn test_list_relation_resolves_in_order() {
    let broker = Arc::new(LocalBroker::new());
    let settings = ServiceSettings::default().with_relation("friends", RelationSpec::new("peer.get"));
    let peers = Arc::new(memory_service("peer", settings).with_caller(broker.clone()));
    peers.connect().await.unwrap();
    broker.register(peers.clone());

    let a = peers.create(&json!({"name": "A"})).await.unwrap();
    let b = peers.create(&json!({"name": "B"})).await.unwrap();
    let c = peers.create(&json!({"name": "C"})).await.unwrap();
    peers
        .update(&json!({"id": a["id"], "friends": [c["id"], b["id"]]}))
        .await
        .unwrap();

    let populated = peers
        .get(&json!({"id": a["id"], "populate": ["friends"]}))
        .await
        .unwrap();
    let Records::One(record) = populated else {
        panic!("expected one record");
    };
    let friends: Vec<Value> = record["friends"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].clone())
        .collect();
    assert_eq!(friends, vec![json!("C"), json!("B")]);
    assert_eq!(broker.call_count(), 1);
    assert_eq!(broker.calls.lock().unwrap()[0].1, json!({"ids": [c["id"], b["id"]]}));
}

#[tokio::test]
async fn test_scalar_relation_becomes_object() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(LocalBroker::new());
    let users = Arc::new(people_service(dir.path()).await);
    broker.register(users.clone());

    let settings = ServiceSettings::default().with_relation("author", RelationSpec::new("users.get"));
    let posts = memory_service("posts", settings).with_caller(broker.clone());
    posts.connect().await.unwrap();
    posts.create(&json!({"author": 2, "title": "First"})).await.unwrap();
    posts.create(&json!({"author": 4, "title": "Second"})).await.unwrap();
    posts.create(&json!({"title": "Draft"})).await.unwrap();

    let rows = posts
        .find(&json!({"populate": "author", "sort": "title"}))
        .await
        .unwrap();
    assert_eq!(rows[0]["title"], json!("Draft"));
    assert!(!rows[0].contains_key("author"));
    assert_eq!(rows[1]["author"]["name"], json!("Marie"));
    assert_eq!(rows[2]["author"]["name"], json!("Julian"));

    // one batch: one call per record holding a value
    assert_eq!(broker.call_count(), 2);
}

#[tokio::test]
async fn test_undeclared_relation_is_ignored() {
    let broker = Arc::new(LocalBroker::new());
    let posts = memory_service("posts", ServiceSettings::default()).with_caller(broker.clone());
    posts.connect().await.unwrap();
    posts.create(&json!({"author": 2})).await.unwrap();

    let rows = posts.find(&json!({"populate": ["author"]})).await.unwrap();
    assert_eq!(rows[0]["author"], json!(2));
    assert_eq!(broker.call_count(), 0);
}

#[tokio::test]
async fn test_failed_relation_call_fails_read() {
    let broker = Arc::new(LocalBroker::new());
    let settings = ServiceSettings::default().with_relation("author", RelationSpec::new("ghosts.get"));
    let posts = memory_service("posts", settings).with_caller(broker.clone());
    posts.connect().await.unwrap();
    posts.create(&json!({"author": 2})).await.unwrap();

    let err = posts.find(&json!({"populate": "author"})).await.unwrap_err();
    assert!(matches!(err, DbError::Validation(_)));
}

#[tokio::test]
async fn test_relation_params_are_forwarded() {
    let dir = tempfile::tempdir().unwrap();
    let broker = Arc::new(LocalBroker::new());
    let users = Arc::new(people_service(dir.path()).await);
    broker.register(users.clone());

    let spec = RelationSpec::new("users.get").with_param("fields", json!(["name"]));
    let settings = ServiceSettings::default().with_relation("author", spec);
    let posts = memory_service("posts", settings).with_caller(broker.clone());
    posts.connect().await.unwrap();
    posts.create(&json!({"author": 1})).await.unwrap();

    let rows = posts.find(&json!({"populate": "author"})).await.unwrap();
    let author = rows[0]["author"].as_object().unwrap();
    let mut keys: Vec<&String> = author.keys().collect();
    keys.sort();
    assert_eq!(keys, vec!["name"]);
}

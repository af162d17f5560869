use mnemon::error::MemoryError;
use mnemon::store::{fingerprint, Category, Store};
use mnemon::Scope;

fn test_store() -> Store {
    Store::open(":memory:", Scope::Global).expect("in-memory store")
}

#[test]
fn rule_crud_and_ordering() {
    let store = test_store();
    let a = store.insert_rule("first rule", None).unwrap();
    let b = store.insert_rule("second rule", None).unwrap();
    assert_eq!(a.hit_count, 0);
    assert_eq!(a.scope, Scope::Global);

    store.update_rule_hit_count(&b.id, 3).unwrap();
    let rules = store.list_rules(None).unwrap();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].id, b.id, "hit_count desc");

    let got = store.get_rule(&a.id).unwrap().unwrap();
    assert_eq!(got.content, "first rule");
    assert!(store.get_rule("nope").unwrap().is_none());
    assert!(!store.update_rule_hit_count("nope", 1).unwrap());
}

#[test]
fn rule_listing_respects_limit() {
    let store = test_store();
    for i in 0..5 {
        store.insert_rule(&format!("rule {i}"), None).unwrap();
    }
    assert_eq!(store.list_rules(Some(2)).unwrap().len(), 2);
    assert_eq!(store.list_rules(None).unwrap().len(), 5);
}

#[test]
fn learning_insert_dedupes_on_hash() {
    let store = test_store();
    let first = store
        .insert_learning("observed a failure", Category::Failure, "hash-x", None)
        .unwrap();
    assert!(first.is_some());
    let dup = store
        .insert_learning("observed a failure", Category::Failure, "hash-x", None)
        .unwrap();
    assert!(dup.is_none());
    assert_eq!(store.stats().learnings, 1);

    // a different hash is a different observation
    let other = store
        .insert_learning("observed a failure", Category::Failure, "hash-y", None)
        .unwrap();
    assert!(other.is_some());
    assert_eq!(store.stats().learnings, 2);
}

#[test]
fn learning_utility_updates_additively() {
    let store = test_store();
    let l = store
        .insert_learning("an outcome", Category::Success, "h", None)
        .unwrap()
        .unwrap();
    assert!((l.utility_score - 1.0).abs() < f64::EPSILON);

    store.update_learning_utility(&l.id, 0.1).unwrap();
    store.update_learning_utility(&l.id, 0.1).unwrap();
    store.update_learning_utility(&l.id, -0.1).unwrap();
    let got = store.get_learning(&l.id).unwrap().unwrap();
    assert!((got.utility_score - 1.1).abs() < 0.001);

    assert!(!store.update_learning_utility("missing", 0.1).unwrap());
}

#[test]
fn embedding_dimension_is_enforced_per_store() {
    let store = test_store();
    store
        .insert_learning("first", Category::Success, "h1", Some(&[0.1, 0.2, 0.3, 0.4]))
        .unwrap()
        .unwrap();
    assert_eq!(store.embed_dim(), Some(4));

    let err = store
        .insert_learning("second", Category::Success, "h2", Some(&[0.1, 0.2]))
        .unwrap_err();
    assert!(matches!(err, MemoryError::DimensionMismatch { expected: 4, got: 2 }));

    let err = store.insert_rule("rule", Some(&[0.1; 8])).unwrap_err();
    assert!(matches!(err, MemoryError::DimensionMismatch { expected: 4, got: 8 }));
}

#[test]
fn dimension_survives_reopen_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scope.db");
    {
        let store = Store::open(&path.to_string_lossy(), Scope::Project).unwrap();
        store
            .insert_learning("persisted", Category::Success, "h", Some(&[1.0, 0.0]))
            .unwrap()
            .unwrap();
    }
    let store = Store::open(&path.to_string_lossy(), Scope::Project).unwrap();
    assert_eq!(store.embed_dim(), Some(2));
    let rows = store.list_learnings_with_embeddings().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].embedding.as_deref(), Some(&[1.0f32, 0.0][..]));
    assert_eq!(rows[0].scope, Scope::Project);
}

#[test]
fn empty_content_rejected() {
    let store = test_store();
    assert!(matches!(
        store.insert_rule("   ", None),
        Err(MemoryError::EmptyContent)
    ));
    assert!(matches!(
        store.insert_learning("", Category::Success, "h", None),
        Err(MemoryError::EmptyContent)
    ));
    assert!(store.insert_heuristic("", "suggestion").is_err());
}

#[test]
fn fingerprint_is_stable_and_distinct() {
    let a = fingerprint("{\"exit\":1}");
    let b = fingerprint("{\"exit\":1}");
    let c = fingerprint("{\"exit\":0}");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.len(), 64, "sha-256 hex");
}

#[test]
fn heuristic_rows_are_scope_stamped() {
    let store = Store::open(":memory:", Scope::Project).unwrap();
    let h = store.insert_heuristic("docker", "check the daemon").unwrap();
    assert_eq!(h.scope, Scope::Project);
    let listed = store.list_heuristics().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].scope, Scope::Project);
}

#[test]
fn keyword_search_returns_snippets() {
    let store = test_store();
    store
        .insert_learning(
            "the integration suite timed out waiting for the database container",
            Category::Failure,
            "h",
            None,
        )
        .unwrap()
        .unwrap();
    let hits = store.keyword_search("database container", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].snippet.contains("container"));
}

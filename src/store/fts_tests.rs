use super::*;
use crate::scope::Scope;

fn test_store() -> Store {
    Store::open(":memory:", Scope::Global).expect("in-memory store")
}

#[test]
fn sanitize_strips_reserved_syntax() {
    let q = build_fts_query("\"build* failed\" OR (linker: NEAR)").unwrap();
    assert!(!q.contains('"'));
    assert!(!q.contains('*'));
    assert!(!q.contains('('));
    assert!(!q.contains(':'));
    assert!(q.contains("build"));
    assert!(q.contains("failed"));
}

#[test]
fn sanitize_lowercases_operators_away() {
    // Uppercase OR/AND/NOT would be FTS operators; terms come out lowercase
    // and stopword-filtered instead.
    let q = build_fts_query("cargo AND clippy").unwrap();
    assert_eq!(q, "cargo OR clippy");
}

#[test]
fn all_stopwords_yields_none() {
    assert_eq!(build_fts_query("the and of"), None);
    assert_eq!(build_fts_query("!!! ???"), None);
    assert_eq!(build_fts_query(""), None);
}

#[test]
fn keyword_search_matches_content() {
    let store = test_store();
    store
        .insert_learning(
            "cargo build failed with a linker error",
            Category::Failure,
            "hash-1",
            None,
        )
        .unwrap()
        .unwrap();
    store
        .insert_learning(
            "formatted the codebase with rustfmt",
            Category::Success,
            "hash-2",
            None,
        )
        .unwrap()
        .unwrap();

    let hits = store.keyword_search("linker error", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].snippet.contains("linker"));
}

#[test]
fn keyword_search_caps_results() {
    let store = test_store();
    for i in 0..8 {
        store
            .insert_learning(
                &format!("deploy step {i} succeeded"),
                Category::Success,
                &format!("hash-{i}"),
                None,
            )
            .unwrap()
            .unwrap();
    }
    let hits = store.keyword_search("deploy succeeded", 3).unwrap();
    assert_eq!(hits.len(), 3);
}

#[test]
fn unsanitizable_query_returns_empty_not_error() {
    let store = test_store();
    store
        .insert_learning("something stored", Category::Success, "h", None)
        .unwrap()
        .unwrap();
    let hits = store.keyword_search("\"\"(((", 10).unwrap();
    assert!(hits.is_empty());
}

#[test]
fn deleted_learning_leaves_no_fts_row() {
    let store = test_store();
    let l = store
        .insert_learning("ephemeral note about caching", Category::Success, "h", None)
        .unwrap()
        .unwrap();
    store.set_learning_created_at(&l.id, 1).unwrap();
    let deleted = store.delete_expired_learnings(1000).unwrap();
    assert_eq!(deleted, 1);

    let report = store.integrity();
    assert!(report.ok, "orphans: {report:?}");
    assert!(store.keyword_search("caching", 10).unwrap().is_empty());
}

#[test]
fn repair_reindexes_missing_rows() {
    let store = test_store();
    let l = store
        .insert_learning("indexed content about sqlite", Category::Success, "h", None)
        .unwrap()
        .unwrap();
    // simulate a desynced index
    store
        .conn()
        .unwrap()
        .execute("DELETE FROM learnings_fts", [])
        .unwrap();
    assert!(!store.integrity().ok);

    let (orphans, rebuilt) = store.repair_fts().unwrap();
    assert_eq!(orphans, 0);
    assert_eq!(rebuilt, 1);
    assert!(store.integrity().ok);

    let hits = store.keyword_search("sqlite", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, l.id);
}

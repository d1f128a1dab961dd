//! SurrealStore against an in-memory SurrealDB instance.

use coursework_state::storage_traits::*;
use coursework_state::*;

fn principal() -> Principal {
    Principal::from("cas:mis2")
}

#[tokio::test]
async fn surreal_assignment_round_trip() {
    let store = SurrealStore::in_memory().await.unwrap();
    let mut parent = AssignmentRecord::new("a1", "Assignment 1");
    let mut child = AssignmentRecord::new("a1.1", "Part 1");
    parent.adopt(&mut child);

    store.put_assignment(&parent).await.unwrap();
    store.put_assignment(&child).await.unwrap();

    let loaded = store.get_assignment(&parent.assignment_id).await.unwrap();
    assert_eq!(loaded.children, vec![child.assignment_id.clone()]);

    let children = store.children_of(&loaded).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].key, "a1.1");
}

#[tokio::test]
async fn surreal_put_assignment_replaces() {
    let store = SurrealStore::in_memory().await.unwrap();
    let mut record = AssignmentRecord::new("a1", "Draft");
    store.put_assignment(&record).await.unwrap();

    record.title = "Final".to_string();
    store.put_assignment(&record).await.unwrap();

    let loaded = store.get_assignment(&record.assignment_id).await.unwrap();
    assert_eq!(loaded.title, "Final");
}

#[tokio::test]
async fn surreal_missing_assignment_is_not_found() {
    let store = SurrealStore::in_memory().await.unwrap();
    let err = store
        .get_assignment(&AssignmentId::from("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
}

#[tokio::test]
async fn surreal_submission_link_unique_index() {
    let store = SurrealStore::in_memory().await.unwrap();
    let assignment = AssignmentId::from("a1");
    let first = SubmissionRepositoryLink::new(assignment.clone(), principal(), RepositoryId::new());
    let second =
        SubmissionRepositoryLink::new(assignment.clone(), principal(), RepositoryId::new());

    store.create_submission_link(&first).await.unwrap();
    let err = store.create_submission_link(&second).await.unwrap_err();
    assert!(err.is_conflict(), "expected conflict, got {err:?}");

    let found = store
        .find_submission_link(&assignment, &principal())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.repository_id, first.repository_id);
}

#[tokio::test]
async fn surreal_access_key_get_after_create() {
    let store = SurrealStore::in_memory().await.unwrap();
    assert!(store.find_access_key(&principal(), "git").await.unwrap().is_none());

    let key = AccessKeyRecord::generate(principal(), "git");
    store.create_access_key(&key).await.unwrap();

    let found = store.find_access_key(&principal(), "git").await.unwrap().unwrap();
    assert_eq!(found.fingerprint, key.fingerprint);
}

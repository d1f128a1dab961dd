//! Inheritable assignment properties.
//!
//! A property whose value is `"inherit"` takes the value of the same
//! property on the parent, walking up until a concrete value is found.
//! `"none"`, a missing value or running out of parents resolve to absent.

use std::collections::BTreeMap;

use coursework_state::{AssignmentRecord, AssignmentStore};

use crate::error::CoreResult;

pub const INHERIT: &str = "inherit";
pub const NONE: &str = "none";

pub async fn resolve_inherited(
    store: &dyn AssignmentStore,
    node: &AssignmentRecord,
    property: &str,
) -> CoreResult<Option<String>> {
    let mut current = node.clone();
    loop {
        match current.properties.get(property).map(String::as_str) {
            Some(INHERIT) => {
                let Some(parent) = current.parent.as_ref() else {
                    return Ok(None);
                };
                current = store.get_assignment(parent).await?;
            }
            Some(NONE) | None => return Ok(None),
            Some(value) => return Ok(Some(value.to_string())),
        }
    }
}

/// Every property declared on `node`, with inherited values resolved and
/// absent ones dropped.
pub async fn resolve_all(
    store: &dyn AssignmentStore,
    node: &AssignmentRecord,
) -> CoreResult<BTreeMap<String, String>> {
    let mut resolved = BTreeMap::new();
    for name in node.properties.keys() {
        if let Some(value) = resolve_inherited(store, node, name).await? {
            resolved.insert(name.clone(), value);
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursework_state::MemoryStore;

    async fn tree(store: &MemoryStore) -> (AssignmentRecord, AssignmentRecord, AssignmentRecord) {
        let mut course = AssignmentRecord::new("course", "Course")
            .with_property("language", "rust")
            .with_property("grader", "none");
        let mut unit = AssignmentRecord::new("unit", "Unit").with_property("language", "inherit");
        let mut task = AssignmentRecord::new("task", "Task")
            .with_property("language", "inherit")
            .with_property("grader", "inherit")
            .with_property("deadline", "friday");
        course.adopt(&mut unit);
        unit.adopt(&mut task);
        for record in [&course, &unit, &task] {
            store.put_assignment(record).await.unwrap();
        }
        (course, unit, task)
    }

    #[tokio::test]
    async fn inherit_walks_up_the_parent_chain() {
        let store = MemoryStore::new();
        let (_, _, task) = tree(&store).await;

        let language = resolve_inherited(&store, &task, "language").await.unwrap();
        assert_eq!(language.as_deref(), Some("rust"));
    }

    #[tokio::test]
    async fn none_and_missing_resolve_to_absent() {
        let store = MemoryStore::new();
        let (course, _, task) = tree(&store).await;

        assert!(resolve_inherited(&store, &task, "grader").await.unwrap().is_none());
        assert!(resolve_inherited(&store, &course, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inherit_at_root_is_absent() {
        let store = MemoryStore::new();
        let root = AssignmentRecord::new("root", "Root").with_property("language", "inherit");
        store.put_assignment(&root).await.unwrap();

        assert!(resolve_inherited(&store, &root, "language").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolve_all_drops_absent_values() {
        let store = MemoryStore::new();
        let (_, _, task) = tree(&store).await;

        let all = resolve_all(&store, &task).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["language"], "rust");
        assert_eq!(all["deadline"], "friday");
    }
}

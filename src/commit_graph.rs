//! Commits and the walks over their parent links.

use std::{
    collections::{HashSet, VecDeque},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    error::Result,
    object::{Commit, Object, ObjectKind},
    object_id::ObjectId,
    object_store::ObjectStore,
};

/// Stores a commit after checking that its tree and parents are present.
pub fn write_commit<S: ObjectStore>(store: &mut S, commit: &Commit) -> Result<ObjectId> {
    store.get_kind(commit.tree, ObjectKind::Tree)?;
    for parent in &commit.parents {
        store.get_kind(*parent, ObjectKind::Commit)?;
    }
    let id = store.put_object(&Object::Commit(commit.clone()))?;
    log::info!(
        "wrote commit {} (tree {}, {} parents)",
        id,
        commit.tree,
        commit.parents.len()
    );
    Ok(id)
}

/// Seconds since the unix epoch, as recorded in new commits.
pub fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Visits every commit reachable from a set of starting commits exactly once.
///
/// First parents are explored before the others, so a linear history comes
/// out newest first.
pub struct CommitWalk<'a, S> {
    store: &'a S,
    pending: VecDeque<ObjectId>,
    visited: HashSet<ObjectId>,
}

pub fn iter_commits_and_parents<S, I>(store: &S, starts: I) -> CommitWalk<'_, S>
where
    S: ObjectStore,
    I: IntoIterator<Item = ObjectId>,
{
    CommitWalk {
        store,
        pending: starts.into_iter().collect(),
        visited: HashSet::new(),
    }
}

impl<'a, S: ObjectStore> Iterator for CommitWalk<'a, S> {
    type Item = Result<ObjectId>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.pending.pop_front() {
            if !self.visited.insert(id) {
                continue;
            }
            let commit = match self.store.get_commit(id) {
                Ok(commit) => commit,
                Err(err) => return Some(Err(err)),
            };
            let mut parents = commit.parents.into_iter();
            if let Some(first) = parents.next() {
                self.pending.push_front(first);
            }
            self.pending.extend(parents);
            return Some(Ok(id));
        }
        None
    }
}

/// Whether `candidate` is reachable from `descendant`. Every commit is its
/// own ancestor.
pub fn is_ancestor<S: ObjectStore>(
    store: &S,
    candidate: ObjectId,
    descendant: ObjectId,
) -> Result<bool> {
    for id in iter_commits_and_parents(store, [descendant]) {
        if id? == candidate {
            return Ok(true);
        }
    }
    Ok(false)
}

/// A common ancestor of `a` and `b`: the first commit in the walk from `b`
/// that is also reachable from `a`. In criss-cross histories this is not
/// necessarily the lowest one. `None` when the histories are unrelated.
pub fn merge_base<S: ObjectStore>(
    store: &S,
    a: ObjectId,
    b: ObjectId,
) -> Result<Option<ObjectId>> {
    let ancestors_of_a = iter_commits_and_parents(store, [a]).collect::<Result<HashSet<_>>>()?;
    for id in iter_commits_and_parents(store, [b]) {
        let id = id?;
        if ancestors_of_a.contains(&id) {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

#[cfg(test)]
use crate::error::Error;
#[cfg(test)]
use crate::object::Tree;
#[cfg(test)]
use crate::object_store::in_memory::InMemoryObjectStore;

#[cfg(test)]
fn commit(store: &mut InMemoryObjectStore, message: &str, parents: &[ObjectId]) -> ObjectId {
    let tree = store.put_object(&Object::Tree(Tree::default())).unwrap();
    write_commit(
        store,
        &Commit {
            tree,
            parents: parents.to_vec(),
            author: String::from("test"),
            timestamp: 0,
            message: message.to_owned(),
        },
    )
    .unwrap()
}

/// ```text
/// root - a1 - a2 ------ merge
///          \           /
///           b1 ------ b2
/// ```
#[cfg(test)]
fn diamond(store: &mut InMemoryObjectStore) -> [ObjectId; 6] {
    let root = commit(store, "root", &[]);
    let a1 = commit(store, "a1", &[root]);
    let a2 = commit(store, "a2", &[a1]);
    let b1 = commit(store, "b1", &[a1]);
    let b2 = commit(store, "b2", &[b1]);
    let merge = commit(store, "merge", &[a2, b2]);
    [root, a1, a2, b1, b2, merge]
}

#[test]
fn test_walk_visits_each_commit_once() {
    let mut store = InMemoryObjectStore::new();
    let [root, a1, a2, b1, b2, merge] = diamond(&mut store);
    let walked = iter_commits_and_parents(&store, [merge, a2])
        .collect::<Result<Vec<_>>>()
        .unwrap();
    assert_eq!(walked, vec![merge, a2, a1, root, b2, b1]);
}

#[test]
fn test_ancestry() {
    let mut store = InMemoryObjectStore::new();
    let [root, a1, a2, b1, b2, merge] = diamond(&mut store);
    for id in [root, a1, a2, b1, b2, merge] {
        assert!(is_ancestor(&store, id, id).unwrap());
        assert!(is_ancestor(&store, root, id).unwrap());
        assert!(is_ancestor(&store, id, merge).unwrap());
    }
    assert!(!is_ancestor(&store, a2, b2).unwrap());
    assert!(!is_ancestor(&store, merge, root).unwrap());
}

#[test]
fn test_merge_base() {
    let mut store = InMemoryObjectStore::new();
    let [root, a1, a2, b1, b2, merge] = diamond(&mut store);
    assert_eq!(merge_base(&store, a2, a2).unwrap(), Some(a2));
    assert_eq!(merge_base(&store, a2, b2).unwrap(), Some(a1));
    assert_eq!(merge_base(&store, b2, a2).unwrap(), Some(a1));
    assert_eq!(merge_base(&store, merge, b1).unwrap(), Some(b1));
    assert_eq!(merge_base(&store, root, merge).unwrap(), Some(root));

    let base = merge_base(&store, a2, b2).unwrap().unwrap();
    assert!(is_ancestor(&store, base, a2).unwrap());
    assert!(is_ancestor(&store, base, b2).unwrap());

    let unrelated = commit(&mut store, "unrelated", &[]);
    assert_eq!(merge_base(&store, unrelated, merge).unwrap(), None);
}

#[test]
fn test_write_commit_requires_parents() {
    let mut store = InMemoryObjectStore::new();
    let tree = store.put_object(&Object::Tree(Tree::default())).unwrap();
    let missing = ObjectId::for_object(ObjectKind::Commit, b"missing");
    let result = write_commit(
        &mut store,
        &Commit {
            tree,
            parents: vec![missing],
            author: String::from("test"),
            timestamp: 0,
            message: String::from("orphan"),
        },
    );
    assert!(matches!(result, Err(Error::ObjectNotFound(id)) if id == missing));
    assert_eq!(store.len(), 1);
}

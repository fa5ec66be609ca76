//! Synchronizing two repositories that share the on-disk layout.
//!
//! Objects are copied children first, so an interrupted transfer never leaves
//! an object in the target whose references are missing there, and running
//! it again picks up where it stopped.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{
    error::{Error, Result},
    object::Object,
    object_id::ObjectId,
    object_store::ObjectStore,
    refs::{self, RefValue, HEADS},
    repository::Repository,
};

/// Objects reachable from `start` that `target` lacks, in an order where
/// every object comes after everything it refers to.
///
/// Recursion stops at objects `target` already has: anything present there
/// arrived with its own closure.
pub fn object_closure<S, T>(source: &S, target: &T, start: ObjectId) -> Result<Vec<ObjectId>>
where
    S: ObjectStore,
    T: ObjectStore,
{
    let mut closure = Vec::new();
    let mut visited = HashSet::new();
    // (id, children already pushed)
    let mut stack = vec![(start, false)];
    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            closure.push(id);
            continue;
        }
        if !visited.insert(id) || target.exists(id)? {
            continue;
        }
        stack.push((id, true));
        match source.get_object(id)? {
            Object::Blob(_) => {}
            Object::Tree(tree) => {
                stack.extend(tree.entries().iter().rev().map(|entry| (entry.id, false)));
            }
            Object::Commit(commit) => {
                stack.extend(commit.parents.iter().rev().map(|parent| (*parent, false)));
                stack.push((commit.tree, false));
            }
        }
    }
    Ok(closure)
}

/// Copies the closure of `start` from `source` into `target`, returning how
/// many objects were written.
pub fn transfer<S, T>(source: &S, target: &mut T, start: ObjectId) -> Result<usize>
where
    S: ObjectStore,
    T: ObjectStore,
{
    let missing = object_closure(source, &*target, start)?;
    for id in &missing {
        let (kind, content) = source.get(*id)?;
        let written = target.put(kind, &content)?;
        if written != *id {
            return Err(Error::corrupt(format!(
                "object {} was stored as {}",
                id, written
            )));
        }
    }
    log::debug!("transferred {} objects for {}", missing.len(), start);
    Ok(missing.len())
}

#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    /// Objects copied into the local store.
    pub objects: usize,
    /// Tracking refs that moved, with their new targets.
    pub updated: Vec<(String, ObjectId)>,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize)]
pub struct PushReport {
    pub branch: String,
    /// What the remote branch pointed at before, if it existed.
    pub old: Option<ObjectId>,
    pub new: ObjectId,
    /// Objects copied into the remote store.
    pub objects: usize,
}

/// Another repository, reached directly through the filesystem.
#[derive(Debug, Clone)]
pub struct Remote {
    name: String,
    repository: Repository,
}

impl Remote {
    pub fn new(name: String, repository: Repository) -> Self {
        Remote { name, repository }
    }

    /// Opens a remote named in `local`'s configuration or, failing that,
    /// the repository at the given path, named after its last component.
    /// Relative paths are taken from `local`'s working tree root.
    pub fn open(local: &Repository, name_or_path: &str) -> Result<Self> {
        let (name, path) = match local.config().remotes.get(name_or_path) {
            Some(path) => (name_or_path.to_owned(), path.clone()),
            None => {
                let path = PathBuf::from(name_or_path);
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .ok_or_else(|| Error::UnknownName(name_or_path.to_owned()))?;
                (name, path)
            }
        };
        let path = resolve_path(local.worktree().root(), &path);
        log::debug!("opening remote {} at {:?}", name, path);
        Ok(Remote::new(name, Repository::open(path)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// Copies the remote's branches starting with `selector` (all of them
    /// for `""`) into `local` as `refs/remote/<name>/heads/<branch>`.
    /// Local branches are never touched.
    pub fn fetch(&self, local: &mut Repository, selector: &str) -> Result<FetchReport> {
        let prefix = format!("{}{}", HEADS, selector);
        let mut report = FetchReport::default();
        for item in self.repository.refs().iterate_refs(&prefix)? {
            let (name, id) = item?;
            let branch = &name[HEADS.len()..];
            report.objects += transfer(self.repository.store(), local.store_mut(), id)?;

            let tracking = refs::remote_branch(&self.name, branch);
            if local.refs().try_resolve(&tracking)? != Some(id) {
                local
                    .refs()
                    .update_ref(&tracking, &RefValue::Direct(id), false)?;
                log::info!("{} -> {}", tracking, id);
                report.updated.push((tracking, id));
            }
        }
        Ok(report)
    }

    /// Sends `local`'s `branch` to the remote. Only fast-forwards are
    /// accepted; on success the local tracking ref follows.
    pub fn push(&mut self, local: &Repository, branch: &str) -> Result<PushReport> {
        let name = refs::branch(branch);
        let new = local.refs().resolve(&name)?;
        let old = self.repository.refs().try_resolve(&name)?;
        if let Some(old) = old {
            // The remote tip must already be in our history, hence in our store.
            if old != new && !local.is_ancestor(old, new)? {
                return Err(Error::FastForwardRejected {
                    branch: branch.to_owned(),
                    remote: old,
                    local: new,
                });
            }
        }

        let objects = transfer(local.store(), self.repository.store_mut(), new)?;
        self.repository
            .refs()
            .update_ref(&name, &RefValue::Direct(new), false)?;
        local.refs().update_ref(
            &refs::remote_branch(&self.name, branch),
            &RefValue::Direct(new),
            false,
        )?;
        log::info!("pushed {} to {} ({} objects)", branch, self.name, objects);
        Ok(PushReport {
            branch: branch.to_owned(),
            old,
            new,
            objects,
        })
    }
}

fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
use crate::object::{Commit, ObjectKind, Tree, TreeEntry};
#[cfg(test)]
use crate::object_store::in_memory::InMemoryObjectStore;

#[cfg(test)]
fn commit_with_file(
    store: &mut InMemoryObjectStore,
    content: &str,
    parents: &[ObjectId],
) -> ObjectId {
    let blob = store.put(ObjectKind::Blob, content.as_bytes()).unwrap();
    let inner = store
        .put_object(&Object::Tree(Tree::from_entries([TreeEntry {
            name: String::from("f.txt"),
            kind: ObjectKind::Blob,
            id: blob,
        }])))
        .unwrap();
    let root = store
        .put_object(&Object::Tree(Tree::from_entries([TreeEntry {
            name: String::from("dir"),
            kind: ObjectKind::Tree,
            id: inner,
        }])))
        .unwrap();
    store
        .put_object(&Object::Commit(Commit {
            tree: root,
            parents: parents.to_vec(),
            author: String::from("test"),
            timestamp: 0,
            message: content.to_owned(),
        }))
        .unwrap()
}

#[test]
fn test_closure_is_children_first() {
    let mut source = InMemoryObjectStore::new();
    let first = commit_with_file(&mut source, "one", &[]);
    let second = commit_with_file(&mut source, "two", &[first]);
    let closure = object_closure(&source, &InMemoryObjectStore::new(), second).unwrap();
    assert_eq!(closure.len(), source.len());
    assert_eq!(closure.last(), Some(&second));

    let position = |id: &ObjectId| closure.iter().position(|c| c == id).unwrap();
    for id in &closure {
        let children: Vec<ObjectId> = match source.get_object(*id).unwrap() {
            Object::Blob(_) => vec![],
            Object::Tree(tree) => tree.entries().iter().map(|e| e.id).collect(),
            Object::Commit(commit) => {
                let mut children = commit.parents.clone();
                children.push(commit.tree);
                children
            }
        };
        for child in children {
            assert!(position(&child) < position(id));
        }
    }
}

#[test]
fn test_closure_prunes_at_target() {
    let mut source = InMemoryObjectStore::new();
    let first = commit_with_file(&mut source, "one", &[]);
    let mut target = InMemoryObjectStore::new();
    assert_eq!(transfer(&source, &mut target, first).unwrap(), 4);

    let second = commit_with_file(&mut source, "two", &[first]);
    let missing = object_closure(&source, &target, second).unwrap();
    // New commit, two trees and the blob; nothing of `first`.
    assert_eq!(missing.len(), 4);
    assert!(!missing.contains(&first));

    assert_eq!(transfer(&source, &mut target, second).unwrap(), 4);
    assert_eq!(transfer(&source, &mut target, second).unwrap(), 0);
    assert_eq!(target.len(), source.len());
}

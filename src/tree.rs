//! Conversion between the flat path → blob mapping of an [`Index`] and
//! nested [`Tree`] objects.

use std::collections::BTreeMap;

use crate::{
    error::{Error, Result},
    index::Index,
    object::{Object, ObjectKind, Tree, TreeEntry},
    object_id::ObjectId,
    object_store::ObjectStore,
    worktree::WorkTree,
};

/// Writes the snapshot described by `index` as tree objects and returns the
/// id of the root tree.
///
/// Paths are grouped by their first segment; every subdirectory's tree is
/// written before the tree that refers to it. Since [`Tree`] keeps its
/// entries sorted, the same set of `(path, blob)` pairs always produces the
/// same root id.
pub fn write_tree<S: ObjectStore>(store: &mut S, index: &Index) -> Result<ObjectId> {
    let entries: Vec<(&str, ObjectId)> = index
        .entries
        .iter()
        .map(|(path, id)| (path.as_str(), *id))
        .collect();
    write_level(store, &entries)
}

fn write_level<S: ObjectStore>(store: &mut S, entries: &[(&str, ObjectId)]) -> Result<ObjectId> {
    let mut files: BTreeMap<&str, ObjectId> = BTreeMap::new();
    let mut dirs: BTreeMap<&str, Vec<(&str, ObjectId)>> = BTreeMap::new();
    for &(path, id) in entries {
        match path.split_once('/') {
            None => {
                files.insert(path, id);
            }
            Some((dir, rest)) => dirs.entry(dir).or_default().push((rest, id)),
        }
    }

    let mut tree_entries = Vec::with_capacity(files.len() + dirs.len());
    for (name, children) in dirs {
        if files.contains_key(name) {
            return Err(Error::InvalidPath(format!(
                "{} is staged both as a file and as a directory",
                name
            )));
        }
        let id = write_level(store, &children)?;
        tree_entries.push(TreeEntry {
            name: name.to_owned(),
            kind: ObjectKind::Tree,
            id,
        });
    }
    tree_entries.extend(files.into_iter().map(|(name, id)| TreeEntry {
        name: name.to_owned(),
        kind: ObjectKind::Blob,
        id,
    }));

    let id = store.put_object(&Object::Tree(Tree::from_entries(tree_entries)))?;
    log::debug!("wrote tree {} with {} entries", id, entries.len());
    Ok(id)
}

/// Every blob reachable from the tree `id`, keyed by its `/`-separated path.
pub fn flatten_tree<S: ObjectStore>(store: &S, id: ObjectId) -> Result<BTreeMap<String, ObjectId>> {
    let mut flat = BTreeMap::new();
    flatten_into(store, id, "", &mut flat)?;
    Ok(flat)
}

fn flatten_into<S: ObjectStore>(
    store: &S,
    id: ObjectId,
    base: &str,
    flat: &mut BTreeMap<String, ObjectId>,
) -> Result<()> {
    for entry in store.get_tree(id)?.entries() {
        let path = format!("{}{}", base, entry.name);
        match entry.kind {
            ObjectKind::Blob => {
                flat.insert(path, entry.id);
            }
            ObjectKind::Tree => flatten_into(store, entry.id, &format!("{}/", path), flat)?,
            ObjectKind::Commit => {
                return Err(Error::corrupt(format!("tree {} contains a commit", id)))
            }
        }
    }
    Ok(())
}

/// Replaces `index` with the contents of the tree `id` and, when a working
/// tree is given, makes its files match.
pub fn read_tree<S: ObjectStore>(
    store: &S,
    id: ObjectId,
    index: &mut Index,
    worktree: Option<&WorkTree>,
) -> Result<()> {
    let next: Index = flatten_tree(store, id)?.into_iter().collect();
    if let Some(worktree) = worktree {
        checkout_index(store, index, &next, worktree)?;
    }
    *index = next;
    Ok(())
}

/// Brings the working tree from `previous` to `next`: paths tracked before
/// but absent now are removed, every path in `next` is (re)written. Files
/// that were never tracked are left alone.
pub fn checkout_index<S: ObjectStore>(
    store: &S,
    previous: &Index,
    next: &Index,
    worktree: &WorkTree,
) -> Result<()> {
    // Read everything first so a missing object aborts before any file changes.
    let mut contents = Vec::with_capacity(next.len());
    for (path, id) in &next.entries {
        contents.push((path, store.get_blob(*id)?));
    }
    for path in previous.entries.keys() {
        if !next.entries.contains_key(path) {
            worktree.remove(path)?;
        }
    }
    for (path, content) in contents {
        worktree.write(path, &content)?;
    }
    Ok(())
}

#[cfg(test)]
use crate::object_store::in_memory::InMemoryObjectStore;
#[cfg(test)]
use crate::worktree::Ignores;

#[cfg(test)]
fn stage(store: &mut InMemoryObjectStore, files: &[(&str, &str)]) -> Index {
    files
        .iter()
        .map(|(path, content)| {
            let id = store.put(ObjectKind::Blob, content.as_bytes()).unwrap();
            (path.to_string(), id)
        })
        .collect()
}

#[test]
fn test_write_tree_is_order_independent() {
    let mut store = InMemoryObjectStore::new();
    let files = [
        ("b.txt", "b"),
        ("src/main.rs", "main"),
        ("src/util/mod.rs", "util"),
        ("a.txt", "a"),
    ];
    let mut reversed = files;
    reversed.reverse();

    let forwards = stage(&mut store, &files);
    let backwards = stage(&mut store, &reversed);
    let id = write_tree(&mut store, &forwards).unwrap();
    assert_eq!(id, write_tree(&mut store, &backwards).unwrap());

    let root = store.get_tree(id).unwrap();
    let names: Vec<&str> = root.entries().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "b.txt", "src"]);
    assert_eq!(root.entries()[2].kind, ObjectKind::Tree);
}

#[test]
fn test_flatten_inverts_write() {
    let mut store = InMemoryObjectStore::new();
    let index = stage(
        &mut store,
        &[("x", "1"), ("d/y", "2"), ("d/e/z", "3"), ("d/e/f/w", "4")],
    );
    let id = write_tree(&mut store, &index).unwrap();
    assert_eq!(flatten_tree(&store, id).unwrap(), index.entries);
}

#[test]
fn test_empty_index_writes_empty_tree() {
    let mut store = InMemoryObjectStore::new();
    let id = write_tree(&mut store, &Index::default()).unwrap();
    assert!(store.get_tree(id).unwrap().is_empty());
    assert!(flatten_tree(&store, id).unwrap().is_empty());
}

#[test]
fn test_file_directory_clash() {
    let mut store = InMemoryObjectStore::new();
    let index = stage(&mut store, &[("a", "file"), ("a/b", "nested")]);
    assert!(matches!(
        write_tree(&mut store, &index),
        Err(Error::InvalidPath(_))
    ));
}

#[test]
fn test_read_tree_round_trip() {
    let tempdir = tempfile::tempdir().unwrap();
    let worktree = WorkTree::new(tempdir.path().into(), Ignores::default());
    let mut store = InMemoryObjectStore::new();

    let first = stage(&mut store, &[("keep.txt", "keep"), ("old/gone.txt", "gone")]);
    let second = stage(&mut store, &[("keep.txt", "changed"), ("new/here.txt", "here")]);
    let first_tree = write_tree(&mut store, &first).unwrap();
    let second_tree = write_tree(&mut store, &second).unwrap();
    worktree.write("untracked.txt", b"mine").unwrap();

    let mut index = Index::default();
    read_tree(&store, first_tree, &mut index, Some(&worktree)).unwrap();
    assert_eq!(index, first);
    assert_eq!(worktree.read("old/gone.txt").unwrap(), b"gone");

    read_tree(&store, second_tree, &mut index, Some(&worktree)).unwrap();
    assert_eq!(index, second);
    assert_eq!(worktree.read("keep.txt").unwrap(), b"changed");
    assert_eq!(worktree.read("new/here.txt").unwrap(), b"here");
    assert!(!tempdir.path().join("old").exists());
    assert_eq!(worktree.read("untracked.txt").unwrap(), b"mine");
}

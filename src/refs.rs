use std::{
    collections::{BTreeSet, VecDeque},
    fmt::Display,
    fs::{read_dir, read_to_string, remove_file},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use crate::{
    dot_rev::atomic_write,
    error::{Error, Result},
    object_id::ObjectId,
};

pub const HEAD: &str = "HEAD";
pub const MERGE_HEAD: &str = "MERGE_HEAD";
pub const HEADS: &str = "refs/heads/";
pub const TAGS: &str = "refs/tags/";
pub const REMOTES: &str = "refs/remote/";

const SYMBOLIC_PREFIX: &str = "ref: ";

/// What a reference file holds.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum RefValue {
    Direct(ObjectId),
    /// The full name of another reference, e.g. `refs/heads/dev`.
    Symbolic(String),
}

impl Display for RefValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefValue::Direct(id) => write!(f, "{}", id),
            RefValue::Symbolic(name) => write!(f, "{}{}", SYMBOLIC_PREFIX, name),
        }
    }
}

/// Full name of the branch `name`.
pub fn branch(name: &str) -> String {
    format!("{}{}", HEADS, name)
}

pub fn tag(name: &str) -> String {
    format!("{}{}", TAGS, name)
}

/// Where a branch of the remote `remote` is tracked locally.
pub fn remote_branch(remote: &str, name: &str) -> String {
    format!("{}{}/heads/{}", REMOTES, remote, name)
}

/// Named pointers kept as files under a `.rev` directory.
///
/// Updates are plain file replacements: there is no locking and no
/// compare-and-swap, so the last writer to a name wins.
#[derive(Debug, Clone)]
pub struct RefStore {
    root: PathBuf,
}

impl RefStore {
    pub fn new(root: PathBuf) -> Self {
        RefStore { root }
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        let valid = name == HEAD
            || name == MERGE_HEAD
            || (name.starts_with("refs/")
                && name
                    .split('/')
                    .all(|part| !part.is_empty() && !part.starts_with('.')));
        if !valid {
            return Err(Error::InvalidPath(name.to_owned()));
        }
        Ok(self.root.join(name))
    }

    fn read_raw(&self, name: &str) -> Result<Option<RefValue>> {
        let path = self.path(name)?;
        // `refs/heads` and friends are namespaces, not references.
        if path.is_dir() {
            return Ok(None);
        }
        let contents = match read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let contents = contents.trim();
        if contents.is_empty() {
            return Ok(None);
        }
        match contents.strip_prefix(SYMBOLIC_PREFIX) {
            Some(target) => Ok(Some(RefValue::Symbolic(target.trim().to_owned()))),
            None => Ok(Some(RefValue::Direct(contents.parse()?))),
        }
    }

    /// Finds the reference `name` stands for and its value. With `deref`,
    /// symbolic links are followed to the last name in the chain, which may
    /// not exist yet (an unborn branch).
    fn locate(&self, name: &str, deref: bool) -> Result<(String, Option<RefValue>)> {
        let mut current = name.to_owned();
        let mut seen = BTreeSet::new();
        loop {
            if !seen.insert(current.clone()) {
                return Err(Error::RefCycle(current));
            }
            match self.read_raw(&current)? {
                Some(RefValue::Symbolic(target)) if deref => current = target,
                value => return Ok((current, value)),
            }
        }
    }

    pub fn get_ref(&self, name: &str, deref: bool) -> Result<Option<RefValue>> {
        Ok(self.locate(name, deref)?.1)
    }

    /// Follows symbolic references until a direct object id is found.
    pub fn resolve(&self, name: &str) -> Result<ObjectId> {
        match self.locate(name, true)? {
            (_, Some(RefValue::Direct(id))) => Ok(id),
            (last, _) => Err(Error::RefNotFound(last)),
        }
    }

    /// Like [`RefStore::resolve`], but an absent reference is `None`.
    pub fn try_resolve(&self, name: &str) -> Result<Option<ObjectId>> {
        match self.locate(name, true)? {
            (_, Some(RefValue::Direct(id))) => Ok(Some(id)),
            _ => Ok(None),
        }
    }

    /// Writes `value` to `name`, or with `deref` to whatever `name`
    /// symbolically points at.
    pub fn update_ref(&self, name: &str, value: &RefValue, deref: bool) -> Result<()> {
        let (target, _) = self.locate(name, deref)?;
        if let RefValue::Symbolic(pointee) = value {
            self.path(pointee)?;
        }
        log::info!("updating {} to {}", target, value);
        atomic_write(&self.path(&target)?, format!("{}\n", value).as_bytes())
    }

    pub fn delete_ref(&self, name: &str, deref: bool) -> Result<()> {
        let (target, _) = self.locate(name, deref)?;
        log::info!("deleting {}", target);
        match remove_file(self.path(&target)?) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    /// Every reference starting with `prefix`, sorted by name. Values are
    /// read lazily as the iterator advances; clone it to walk again.
    pub fn iter_refs(&self, prefix: &str, deref: bool) -> Result<RefIter> {
        let mut names = BTreeSet::new();
        for special in [HEAD, MERGE_HEAD] {
            if self.root.join(special).is_file() {
                names.insert(special.to_owned());
            }
        }
        collect_names(&self.root.join("refs"), "refs", &mut names)?;
        Ok(RefIter {
            store: self.clone(),
            names: names
                .into_iter()
                .filter(|name| name.starts_with(prefix))
                .collect(),
            deref,
        })
    }

    /// `(name, id)` of every reference under `prefix` that resolves to an object.
    pub fn iterate_refs(
        &self,
        prefix: &str,
    ) -> Result<impl Iterator<Item = Result<(String, ObjectId)>> + Clone> {
        Ok(self.iter_refs(prefix, true)?.filter_map(|item| match item {
            Ok((name, RefValue::Direct(id))) => Some(Ok((name, id))),
            Ok((_, RefValue::Symbolic(_))) => None,
            Err(err) => Some(Err(err)),
        }))
    }
}

fn collect_names(dir: &Path, prefix: &str, names: &mut BTreeSet<String>) -> Result<()> {
    let entries = match read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let entry = entry?;
        let name = format!("{}/{}", prefix, entry.file_name().to_string_lossy());
        if entry.file_type()?.is_dir() {
            collect_names(&entry.path(), &name, names)?;
        } else if !entry.file_name().to_string_lossy().starts_with('.') {
            names.insert(name);
        }
    }
    Ok(())
}

/// Lazy walk over a sorted snapshot of reference names.
#[derive(Debug, Clone)]
pub struct RefIter {
    store: RefStore,
    names: VecDeque<String>,
    deref: bool,
}

impl Iterator for RefIter {
    type Item = Result<(String, RefValue)>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(name) = self.names.pop_front() {
            match self.store.get_ref(&name, self.deref) {
                Ok(Some(value)) => return Some(Ok((name, value))),
                // Removed since the listing, or an unborn symbolic target.
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
        None
    }
}

#[cfg(test)]
fn blob_id(content: &[u8]) -> ObjectId {
    ObjectId::for_object(crate::object::ObjectKind::Blob, content)
}

#[test]
fn test_symbolic_update_and_resolve() {
    let tempdir = tempfile::tempdir().unwrap();
    let refs = RefStore::new(tempdir.path().into());
    let id = blob_id(b"one");

    refs.update_ref(HEAD, &RefValue::Symbolic(branch("dev")), false)
        .unwrap();
    assert!(matches!(refs.resolve(HEAD), Err(Error::RefNotFound(name)) if name == "refs/heads/dev"));

    // Writing through HEAD lands on the branch.
    refs.update_ref(HEAD, &RefValue::Direct(id), true).unwrap();
    assert_eq!(refs.resolve(&branch("dev")).unwrap(), id);
    assert_eq!(refs.resolve(HEAD).unwrap(), id);
    assert_eq!(
        refs.get_ref(HEAD, false).unwrap(),
        Some(RefValue::Symbolic(branch("dev")))
    );
}

#[test]
fn test_cycle_detected() {
    let tempdir = tempfile::tempdir().unwrap();
    let refs = RefStore::new(tempdir.path().into());
    refs.update_ref(&branch("a"), &RefValue::Symbolic(branch("b")), false)
        .unwrap();
    refs.update_ref(&branch("b"), &RefValue::Symbolic(branch("a")), false)
        .unwrap();
    assert!(matches!(refs.resolve(&branch("a")), Err(Error::RefCycle(_))));
}

#[test]
fn test_iterate_sorted_and_restartable() {
    let tempdir = tempfile::tempdir().unwrap();
    let refs = RefStore::new(tempdir.path().into());
    let one = blob_id(b"one");
    let two = blob_id(b"two");
    refs.update_ref(&branch("zeta"), &RefValue::Direct(one), true)
        .unwrap();
    refs.update_ref(&branch("alpha"), &RefValue::Direct(two), true)
        .unwrap();
    refs.update_ref(&tag("v1"), &RefValue::Direct(one), true).unwrap();
    refs.update_ref(HEAD, &RefValue::Symbolic(branch("alpha")), false)
        .unwrap();

    let heads = refs.iterate_refs(HEADS).unwrap();
    let first: Vec<_> = heads.clone().map(Result::unwrap).collect();
    assert_eq!(
        first,
        vec![
            (branch("alpha"), two),
            (branch("zeta"), one),
        ]
    );
    let second: Vec<_> = heads.map(Result::unwrap).collect();
    assert_eq!(first, second);

    let all: Vec<String> = refs
        .iterate_refs("")
        .unwrap()
        .map(|item| item.unwrap().0)
        .collect();
    assert_eq!(all, vec!["HEAD", "refs/heads/alpha", "refs/heads/zeta", "refs/tags/v1"]);
}

#[test]
fn test_delete_and_invalid_names() {
    let tempdir = tempfile::tempdir().unwrap();
    let refs = RefStore::new(tempdir.path().into());
    refs.update_ref(MERGE_HEAD, &RefValue::Direct(blob_id(b"x")), false)
        .unwrap();
    refs.delete_ref(MERGE_HEAD, false).unwrap();
    assert_eq!(refs.try_resolve(MERGE_HEAD).unwrap(), None);
    assert!(matches!(
        refs.update_ref("refs/../escape", &RefValue::Direct(blob_id(b"x")), false),
        Err(Error::InvalidPath(_))
    ));
}

#[test]
fn test_namespace_directories_are_not_refs() {
    let tempdir = tempfile::tempdir().unwrap();
    let refs = RefStore::new(tempdir.path().into());
    let id = blob_id(b"tip");
    refs.update_ref(&branch("dev"), &RefValue::Direct(id), false)
        .unwrap();
    assert_eq!(refs.get_ref("refs/heads", true).unwrap(), None);
    assert_eq!(refs.try_resolve("refs/heads").unwrap(), None);
    assert!(matches!(
        refs.resolve("refs/heads"),
        Err(Error::RefNotFound(name)) if name == "refs/heads"
    ));
}

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{create_dir_all, read_dir, remove_dir, remove_file},
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use crate::{
    dot_rev::DOT_REV,
    error::{Error, Result},
    index::validate_path,
    object::ObjectKind,
    object_id::ObjectId,
};

/// File names skipped at every level of a working tree scan.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Ignores {
    set: BTreeSet<String>,
}

impl Ignores {
    pub fn new<I: IntoIterator<Item = String>>(names: I) -> Self {
        let mut set: BTreeSet<String> = names.into_iter().collect();
        set.insert(String::from(DOT_REV));
        Ignores { set }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.set.contains(name)
    }
}

impl Default for Ignores {
    fn default() -> Self {
        Ignores::new(Vec::<String>::new())
    }
}

/// The checked out files of a repository, addressed by `/`-separated
/// paths relative to `root`.
#[derive(Debug, Clone)]
pub struct WorkTree {
    root: PathBuf,
    ignores: Ignores,
}

impl WorkTree {
    pub fn new(root: PathBuf, ignores: Ignores) -> Self {
        WorkTree { root, ignores }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        validate_path(path)?;
        if path.split('/').any(|part| self.ignores.contains(part)) {
            return Err(Error::InvalidPath(path.to_owned()));
        }
        Ok(self.root.join(path))
    }

    /// Turns a path given relative to the working tree root (or absolute
    /// inside it) into the form used by the index.
    pub fn relative(&self, path: &Path) -> Result<String> {
        let stripped = if path.is_absolute() {
            path.strip_prefix(&self.root)
                .map_err(|_| Error::InvalidPath(path.display().to_string()))?
        } else {
            path
        };
        let mut parts = Vec::new();
        for component in stripped.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return Err(Error::InvalidPath(path.display().to_string())),
            }
        }
        Ok(parts.join("/"))
    }

    /// Every file below `prefix` (the whole tree for `""`), skipping ignored names.
    pub fn files_under(&self, prefix: &str) -> Result<BTreeSet<String>> {
        let mut files = BTreeSet::new();
        let dir = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.full_path(prefix)?
        };
        if dir.is_file() {
            files.insert(prefix.to_owned());
        } else if dir.is_dir() {
            self.walk(&dir, prefix, &mut files)?;
        }
        Ok(files)
    }

    fn walk(&self, dir: &Path, prefix: &str, files: &mut BTreeSet<String>) -> Result<()> {
        for f in read_dir(dir)? {
            let dir_entry = f?;
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            if self.ignores.contains(&name) {
                continue;
            }
            let path = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };
            let file_type = dir_entry.file_type()?;
            if file_type.is_dir() {
                self.walk(&dir_entry.path(), &path, files)?;
            } else if file_type.is_file() {
                files.insert(path);
            } else {
                log::warn!("skipping {:?}, which is neither a file nor a directory", path);
            }
        }
        Ok(())
    }

    /// The blob id every file in the working tree would be stored under.
    pub fn snapshot(&self) -> Result<BTreeMap<String, ObjectId>> {
        let mut snapshot = BTreeMap::new();
        for path in self.files_under("")? {
            let content = self.read(&path)?;
            snapshot.insert(path, ObjectId::for_object(ObjectKind::Blob, &content));
        }
        Ok(snapshot)
    }

    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.full_path(path)?)?)
    }

    pub fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let full = self.full_path(path)?;
        if let Some(parent) = full.parent() {
            create_dir_all(parent)?;
        }
        log::debug!("writing {} to the working tree", path);
        Ok(std::fs::write(full, content)?)
    }

    /// Removes a file and any directories that become empty because of it.
    pub fn remove(&self, path: &str) -> Result<()> {
        let full = self.full_path(path)?;
        match remove_file(&full) {
            Err(err) if err.kind() != ErrorKind::NotFound => return Err(err.into()),
            _ => {}
        }
        log::debug!("removed {} from the working tree", path);
        let mut dir = full.parent();
        while let Some(d) = dir {
            if d == self.root || remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
        Ok(())
    }
}

#[test]
fn test_worktree_scan_skips_ignored() {
    let tempdir = tempfile::tempdir().unwrap();
    let worktree = WorkTree::new(tempdir.path().into(), Ignores::new(vec![String::from("target")]));
    worktree.write("README.md", b"readme").unwrap();
    worktree.write("src/lib.rs", b"lib").unwrap();
    std::fs::create_dir_all(tempdir.path().join("target/debug")).unwrap();
    std::fs::write(tempdir.path().join("target/debug/out"), b"x").unwrap();
    std::fs::create_dir_all(tempdir.path().join(DOT_REV)).unwrap();
    std::fs::write(tempdir.path().join(DOT_REV).join("HEAD"), b"x").unwrap();

    let snapshot = worktree.snapshot().unwrap();
    assert_eq!(
        snapshot.keys().cloned().collect::<Vec<_>>(),
        vec!["README.md", "src/lib.rs"]
    );
    assert_eq!(
        snapshot["src/lib.rs"],
        ObjectId::for_object(ObjectKind::Blob, b"lib")
    );
    assert!(worktree.write(".rev/HEAD", b"nope").is_err());
}

#[test]
fn test_remove_prunes_empty_directories() {
    let tempdir = tempfile::tempdir().unwrap();
    let worktree = WorkTree::new(tempdir.path().into(), Ignores::default());
    worktree.write("a/b/c.txt", b"c").unwrap();
    worktree.write("a/keep.txt", b"k").unwrap();
    worktree.remove("a/b/c.txt").unwrap();
    assert!(!tempdir.path().join("a/b").exists());
    assert!(tempdir.path().join("a/keep.txt").exists());
    assert_eq!(worktree.relative(Path::new("./a/keep.txt")).unwrap(), "a/keep.txt");
    assert!(worktree.relative(Path::new("../outside")).is_err());
}

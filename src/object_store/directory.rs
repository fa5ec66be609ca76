use std::{
    collections::BTreeSet,
    fs::{create_dir_all, read_dir},
    io::ErrorKind,
    path::PathBuf,
};

use crate::{dot_rev::atomic_write, error::Result, object, object_id::ObjectId};

use super::ObjectStore;

/// A persistent [`ObjectStore`] stored in a directory,
/// using the first two hexadecimal characters of the [`ObjectId`]
/// to determine which directory to place the binary object in
/// and creating a file with the rest of the hexadecimal characters
/// as the file name.
#[derive(Debug, Clone)]
pub struct DirectoryObjectStore {
    root: PathBuf,
}

impl DirectoryObjectStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        if !root.try_exists()? {
            log::info!("creating directory store root: {:?}", root);
            create_dir_all(&root)?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn path(&self, id: ObjectId) -> PathBuf {
        let s: String = format!("{}", id);
        self.root.join(&s[0..2]).join(&s[2..])
    }

    /// Every object id present in the store.
    pub fn ids(&self) -> Result<BTreeSet<ObjectId>> {
        let mut ids = BTreeSet::new();
        for subdir in read_dir(&self.root)? {
            let subdir = subdir?;
            if !subdir.file_type()?.is_dir() {
                continue;
            }
            for f in read_dir(subdir.path())? {
                let name = format!(
                    "{}{}",
                    subdir.file_name().to_string_lossy(),
                    f?.file_name().to_string_lossy()
                );
                match name.parse() {
                    Ok(id) => {
                        ids.insert(id);
                    }
                    Err(_) => log::warn!("skipping stray file {} in {:?}", name, self.root),
                }
            }
        }
        Ok(ids)
    }
}

impl ObjectStore for DirectoryObjectStore {
    fn has(&self, id: ObjectId) -> Result<bool> {
        log::debug!("checking whether {} is contained in {:?}", id, self.root);
        Ok(self.path(id).try_exists()?)
    }

    fn read(&self, id: ObjectId) -> Result<Option<Vec<u8>>> {
        log::debug!("reading {} from {:?}", id, self.root);
        match std::fs::read(self.path(id)) {
            Ok(v) => Ok(Some(v)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn insert(&mut self, bytes: &[u8]) -> Result<ObjectId> {
        object::decode(bytes)?;
        let id: ObjectId = bytes.into();
        let path = self.path(id);
        if path.try_exists()? {
            log::debug!("{:?} already exists", path);
            return Ok(id);
        }
        log::info!("inserting {} into {:?}", id, self.root);
        // Objects only become visible under their id once fully written.
        match atomic_write(&path, bytes) {
            // Another writer got the same object in first.
            Err(err) if path.is_file() => {
                log::debug!("{:?} appeared while writing it: {}", path, err);
                Ok(id)
            }
            result => result.map(|()| id),
        }
    }
}

#[test]
fn test_directory_object_store() {
    use crate::object::ObjectKind;

    let tempdir = tempfile::tempdir().unwrap();
    let mut store = DirectoryObjectStore::new(tempdir.path().join("objects")).unwrap();
    let id = store.put(ObjectKind::Blob, b"hello, world").unwrap();
    assert!(store.has(id).unwrap());
    assert_eq!(
        store.get(id).unwrap(),
        (ObjectKind::Blob, Vec::from(&b"hello, world"[..]))
    );

    let again = store.put(ObjectKind::Blob, b"hello, world").unwrap();
    assert_eq!(id, again);
    assert_eq!(store.ids().unwrap().len(), 1);
}

#[test]
fn test_directory_object_store_detects_tampering() {
    use crate::{error::Error, object::ObjectKind};

    let tempdir = tempfile::tempdir().unwrap();
    let mut store = DirectoryObjectStore::new(tempdir.path().into()).unwrap();
    let id = store.put(ObjectKind::Blob, b"original").unwrap();
    std::fs::write(store.path(id), b"blob\0tampered").unwrap();
    assert!(matches!(store.get(id), Err(Error::Corrupt { .. })));

    let missing = ObjectId::for_object(ObjectKind::Blob, b"never stored");
    assert!(matches!(store.get(missing), Err(Error::ObjectNotFound(m)) if m == missing));
}

#[test]
fn test_concurrent_inserts_of_one_object() {
    use crate::object::ObjectKind;

    let tempdir = tempfile::tempdir().unwrap();
    let store = DirectoryObjectStore::new(tempdir.path().join("objects")).unwrap();
    let content = vec![b'x'; 64 * 1024];
    for round in 0..20u8 {
        let mut content = content.clone();
        content[0] = round;
        let ids: Vec<ObjectId> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let mut store = store.clone();
                    let content = &content;
                    scope.spawn(move || store.put(ObjectKind::Blob, content).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(store.get_blob(ids[0]).unwrap(), content);
    }
    assert_eq!(store.ids().unwrap().len(), 20);
}

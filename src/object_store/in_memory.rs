use std::collections::BTreeMap;

use crate::{error::Result, object, object_id::ObjectId};

use super::ObjectStore;

/// An [`ObjectStore`] that lives and dies with the process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    objects: BTreeMap<ObjectId, Vec<u8>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.objects.keys().copied()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn has(&self, id: ObjectId) -> Result<bool> {
        Ok(self.objects.contains_key(&id))
    }

    fn read(&self, id: ObjectId) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.get(&id).cloned())
    }

    fn insert(&mut self, bytes: &[u8]) -> Result<ObjectId> {
        object::decode(bytes)?;
        let id: ObjectId = bytes.into();
        self.objects.entry(id).or_insert_with(|| Vec::from(bytes));
        Ok(id)
    }
}

#[test]
fn test_in_memory_object_store() {
    use crate::object::ObjectKind;

    let mut store = InMemoryObjectStore::new();
    let hello = store.put(ObjectKind::Blob, b"hello").unwrap();
    let world = store.put(ObjectKind::Blob, b"world").unwrap();
    assert_ne!(hello, world);
    assert_eq!(store.put(ObjectKind::Blob, b"hello").unwrap(), hello);
    assert_eq!(store.len(), 2);
    assert!(store.exists(hello).unwrap());
    assert_eq!(store.get_blob(hello).unwrap(), b"hello");
}

#[test]
fn test_get_kind_mismatch() {
    use crate::{error::Error, object::ObjectKind};

    let mut store = InMemoryObjectStore::new();
    let id = store.put(ObjectKind::Blob, b"[]").unwrap();
    assert!(matches!(
        store.get_tree(id),
        Err(Error::UnexpectedKind {
            expected: ObjectKind::Tree,
            found: ObjectKind::Blob,
            ..
        })
    ));
}

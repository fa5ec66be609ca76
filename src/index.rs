use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    dot_rev::{read_json, write_json},
    error::{Error, Result},
    object::validate_entry_name,
    object_id::ObjectId,
};

/// The staged snapshot: `/`-separated paths relative to the working tree,
/// each mapped to the blob holding its content.
#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct Index {
    pub entries: BTreeMap<String, ObjectId>,
}

impl Index {
    /// Loads the index, treating a missing file as an empty index.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.try_exists()? {
            return Ok(Self::default());
        }
        let index: Index = read_json(path)?;
        for path in index.entries.keys() {
            validate_path(path)?;
        }
        Ok(index)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(self, path)
    }

    pub fn insert(&mut self, path: &str, id: ObjectId) -> Result<Option<ObjectId>> {
        validate_path(path)?;
        Ok(self.entries.insert(path.to_owned(), id))
    }

    pub fn remove(&mut self, path: &str) -> Option<ObjectId> {
        self.entries.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<ObjectId> {
        self.entries.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, ObjectId)> for Index {
    fn from_iter<I: IntoIterator<Item = (String, ObjectId)>>(iter: I) -> Self {
        Index {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Checks that `path` is relative, `/`-separated and free of `.`/`..`.
pub fn validate_path(path: &str) -> Result<()> {
    if path.split('/').all(|part| validate_entry_name(part).is_ok()) {
        Ok(())
    } else {
        Err(Error::InvalidPath(path.to_owned()))
    }
}

#[test]
fn test_save_and_load() {
    use crate::object::ObjectKind;

    let tempdir = tempfile::tempdir().unwrap();
    let path = tempdir.path().join("index.json");
    assert!(Index::load(&path).unwrap().is_empty());

    let mut index = Index::default();
    let id = ObjectId::for_object(ObjectKind::Blob, b"content");
    index.insert("src/main.rs", id).unwrap();
    index.save(&path).unwrap();

    let loaded = Index::load(&path).unwrap();
    assert_eq!(loaded, index);
    assert_eq!(loaded.get("src/main.rs"), Some(id));
}

#[test]
fn test_rejects_escaping_paths() {
    use crate::object::ObjectKind;

    let id = ObjectId::for_object(ObjectKind::Blob, b"content");
    let mut index = Index::default();
    for bad in ["", "/abs", "a//b", "../up", "a/./b", "trailing/"] {
        assert!(
            matches!(index.insert(bad, id), Err(Error::InvalidPath(_))),
            "{:?} accepted",
            bad
        );
    }
}

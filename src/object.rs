use std::{collections::BTreeMap, fmt::Display};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    object_id::ObjectId,
};

/// The type tag every stored object carries.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

impl ObjectKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Tree => "tree",
            ObjectKind::Commit => "commit",
        }
    }

    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"blob" => Some(ObjectKind::Blob),
            b"tree" => Some(ObjectKind::Tree),
            b"commit" => Some(ObjectKind::Commit),
            _ => None,
        }
    }
}

impl Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Frames `content` the way it is hashed and persisted: `tag ‖ 0x00 ‖ content`.
pub fn encode(kind: ObjectKind, content: &[u8]) -> Vec<u8> {
    let tag = kind.tag().as_bytes();
    let mut out = Vec::with_capacity(tag.len() + 1 + content.len());
    out.extend_from_slice(tag);
    out.push(0);
    out.extend_from_slice(content);
    out
}

/// Splits a framed object back into its type and content.
pub fn decode(bytes: &[u8]) -> Result<(ObjectKind, &[u8])> {
    let nul = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::corrupt("missing type tag separator"))?;
    let kind = ObjectKind::from_tag(&bytes[..nul]).ok_or_else(|| {
        Error::corrupt(format!(
            "unknown type tag {:?}",
            String::from_utf8_lossy(&bytes[..nul])
        ))
    })?;
    Ok((kind, &bytes[nul + 1..]))
}

/// One named child of a [`Tree`].
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub kind: ObjectKind,
    pub id: ObjectId,
}

/// A directory snapshot. Entries are kept sorted by name, so two trees with
/// the same children always encode to the same bytes.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// Builds a tree from entries in any order. A later entry with a name
    /// already seen replaces the earlier one.
    pub fn from_entries<I: IntoIterator<Item = TreeEntry>>(entries: I) -> Self {
        let by_name: BTreeMap<String, TreeEntry> = entries
            .into_iter()
            .map(|entry| (entry.name.clone(), entry))
            .collect();
        Tree {
            entries: by_name.into_values().collect(),
        }
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.entries)?)
    }

    pub fn decode(content: &[u8]) -> Result<Self> {
        let entries: Vec<TreeEntry> = serde_json::from_slice(content)?;
        for entry in &entries {
            validate_entry_name(&entry.name)?;
            if entry.kind == ObjectKind::Commit {
                return Err(Error::corrupt(format!(
                    "tree entry {:?} refers to a commit",
                    entry.name
                )));
            }
        }
        if entries.windows(2).any(|pair| pair[0].name >= pair[1].name) {
            return Err(Error::corrupt("tree entries are not strictly sorted"));
        }
        Ok(Tree { entries })
    }
}

/// Rejects names that could escape or alias a directory when the tree is
/// expanded onto disk.
pub fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0')
    {
        return Err(Error::corrupt(format!("invalid tree entry name {:?}", name)));
    }
    Ok(())
}

/// A particular snapshot of a version.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    /// The [`ObjectId`] of the root tree.
    pub tree: ObjectId,
    /// The parent commits, first parent first. Empty for an initial commit.
    pub parents: Vec<ObjectId>,
    pub author: String,
    /// Seconds since the unix epoch.
    pub timestamp: u64,
    /// The message added with the commit.
    pub message: String,
}

impl Commit {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn decode(content: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(content)?)
    }
}

/// A decoded object, validated against its type tag.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Object {
    Blob(Vec<u8>),
    Tree(Tree),
    Commit(Commit),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Blob(_) => ObjectKind::Blob,
            Object::Tree(_) => ObjectKind::Tree,
            Object::Commit(_) => ObjectKind::Commit,
        }
    }

    pub fn content(&self) -> Result<Vec<u8>> {
        match self {
            Object::Blob(data) => Ok(data.clone()),
            Object::Tree(tree) => tree.encode(),
            Object::Commit(commit) => commit.encode(),
        }
    }

    pub fn decode(kind: ObjectKind, content: &[u8]) -> Result<Self> {
        Ok(match kind {
            ObjectKind::Blob => Object::Blob(content.to_vec()),
            ObjectKind::Tree => Object::Tree(Tree::decode(content)?),
            ObjectKind::Commit => Object::Commit(Commit::decode(content)?),
        })
    }
}

#[test]
fn test_frame_round_trip() {
    let framed = encode(ObjectKind::Commit, b"payload");
    assert_eq!(framed, b"commit\0payload");
    let (kind, content) = decode(&framed).unwrap();
    assert_eq!(kind, ObjectKind::Commit);
    assert_eq!(content, b"payload");
}

#[test]
fn test_decode_rejects_bad_tags() {
    assert!(matches!(decode(b"no separator"), Err(Error::Corrupt { .. })));
    assert!(matches!(decode(b"tag\0content"), Err(Error::Corrupt { .. })));
}

#[test]
fn test_tree_entries_are_sorted() {
    let id = ObjectId::for_object(ObjectKind::Blob, b"x");
    let entry = |name: &str| TreeEntry {
        name: name.to_owned(),
        kind: ObjectKind::Blob,
        id,
    };
    let forwards = Tree::from_entries(vec![entry("a"), entry("b"), entry("c")]);
    let backwards = Tree::from_entries(vec![entry("c"), entry("b"), entry("a")]);
    assert_eq!(forwards.encode().unwrap(), backwards.encode().unwrap());
    assert_eq!(
        Tree::decode(&forwards.encode().unwrap()).unwrap(),
        forwards
    );
}

#[test]
fn test_tree_decode_validates() {
    let id = ObjectId::for_object(ObjectKind::Blob, b"x");
    let unsorted = serde_json::to_vec(&vec![
        TreeEntry {
            name: "b".into(),
            kind: ObjectKind::Blob,
            id,
        },
        TreeEntry {
            name: "a".into(),
            kind: ObjectKind::Blob,
            id,
        },
    ])
    .unwrap();
    assert!(matches!(Tree::decode(&unsorted), Err(Error::Corrupt { .. })));

    let escaping = serde_json::to_vec(&vec![TreeEntry {
        name: "..".into(),
        kind: ObjectKind::Tree,
        id,
    }])
    .unwrap();
    assert!(matches!(Tree::decode(&escaping), Err(Error::Corrupt { .. })));
}

use crate::{
    error::{Error, Result},
    hex::Hex,
    object::ObjectKind,
};
use blake3::Hash;
use serde::{Deserialize, Serialize};

use std::{fmt::Display, str::FromStr};

/// An identifier for a particular stored object.
/// Under the hood, this is a [`blake3`] hash of the object's type tag,
/// a NUL byte and its content, which is exactly the byte layout the object
/// store persists.
///
/// It is displayed in hexadecimal format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectId(Hash);

impl ObjectId {
    /// Number of hexadecimal characters in a displayed id.
    pub const HEX_LEN: usize = 64;

    /// The id an object of `kind` with `content` is stored under.
    pub fn for_object(kind: ObjectKind, content: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(kind.tag().as_bytes());
        hasher.update(&[0]);
        hasher.update(content);
        ObjectId(hasher.finalize())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl Ord for ObjectId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

impl PartialOrd for ObjectId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::hash::Hash for ObjectId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.as_bytes().hash(state)
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b: &[u8] = self.0.as_bytes();
        write!(f, "{}", Hex::from(b))
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != Self::HEX_LEN {
            return Err(Error::InvalidObjectId(s.to_owned()));
        }
        let bytes: Vec<u8> = Vec::try_from(&Hex(s.to_owned()))
            .map_err(|_| Error::InvalidObjectId(s.to_owned()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidObjectId(s.to_owned()))?;
        Ok(ObjectId(Hash::from(bytes)))
    }
}

/// Hashes an already encoded object, i.e. `tag ‖ 0x00 ‖ content`.
impl From<&[u8]> for ObjectId {
    fn from(bytes: &[u8]) -> Self {
        ObjectId(blake3::hash(bytes))
    }
}

impl Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[test]
fn test_for_object_matches_encoded_bytes() {
    let id = ObjectId::for_object(ObjectKind::Blob, b"hello");
    let encoded: &[u8] = b"blob\0hello";
    assert_eq!(id, ObjectId::from(encoded));
    assert_ne!(id, ObjectId::for_object(ObjectKind::Tree, b"hello"));
}

#[test]
fn test_parse_display_serde() {
    let id = ObjectId::for_object(ObjectKind::Blob, b"hello");
    let text = id.to_string();
    assert_eq!(text.len(), ObjectId::HEX_LEN);
    assert_eq!(text.parse::<ObjectId>().unwrap(), id);

    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{}\"", text));
    let id_: ObjectId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, id_);

    assert!("abc".parse::<ObjectId>().is_err());
    assert!("g".repeat(64).parse::<ObjectId>().is_err());
}

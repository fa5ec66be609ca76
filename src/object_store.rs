use crate::{
    error::{Error, Result},
    object::{self, Commit, Object, ObjectKind, Tree},
    object_id::ObjectId,
};

pub mod directory;
pub mod in_memory;

/// A content addressed store of framed objects (`tag ‖ 0x00 ‖ content`).
///
/// Implementors only move bytes around; the typed accessors are provided on
/// top and verify the type tag and the hash of everything they hand out.
pub trait ObjectStore {
    fn has(&self, id: ObjectId) -> Result<bool>;

    fn read(&self, id: ObjectId) -> Result<Option<Vec<u8>>>;

    /// Stores a framed object under the hash of its bytes. Storing bytes
    /// that are already present is a no-op.
    fn insert(&mut self, object: &[u8]) -> Result<ObjectId>;

    fn put(&mut self, kind: ObjectKind, content: &[u8]) -> Result<ObjectId> {
        self.insert(&object::encode(kind, content))
    }

    fn exists(&self, id: ObjectId) -> Result<bool> {
        self.has(id)
    }

    fn get(&self, id: ObjectId) -> Result<(ObjectKind, Vec<u8>)> {
        let bytes = self.read(id)?.ok_or(Error::ObjectNotFound(id))?;
        if ObjectId::from(bytes.as_slice()) != id {
            return Err(Error::corrupt(format!("object {} does not match its hash", id)));
        }
        let (kind, content) = object::decode(&bytes)?;
        Ok((kind, content.to_vec()))
    }

    /// Reads an object's content, insisting that it is of the `expected` kind.
    fn get_kind(&self, id: ObjectId, expected: ObjectKind) -> Result<Vec<u8>> {
        let (found, content) = self.get(id)?;
        if found != expected {
            return Err(Error::UnexpectedKind {
                id,
                expected,
                found,
            });
        }
        Ok(content)
    }

    fn get_object(&self, id: ObjectId) -> Result<Object> {
        let (kind, content) = self.get(id)?;
        Object::decode(kind, &content)
    }

    fn put_object(&mut self, object: &Object) -> Result<ObjectId> {
        self.put(object.kind(), &object.content()?)
    }

    fn get_blob(&self, id: ObjectId) -> Result<Vec<u8>> {
        self.get_kind(id, ObjectKind::Blob)
    }

    fn get_tree(&self, id: ObjectId) -> Result<Tree> {
        Tree::decode(&self.get_kind(id, ObjectKind::Tree)?)
    }

    fn get_commit(&self, id: ObjectId) -> Result<Commit> {
        Commit::decode(&self.get_kind(id, ObjectKind::Commit)?)
    }
}

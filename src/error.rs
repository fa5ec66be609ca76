use std::path::PathBuf;

use derive_more::{Display, From};

use crate::object::ObjectKind;
use crate::object_id::ObjectId;

/// Everything that can go wrong inside a repository operation.
#[derive(Debug, Display, From)]
pub enum Error {
    #[from]
    #[display(fmt = "I/O error: {}", _0)]
    IO(std::io::Error),
    #[from]
    #[display(fmt = "serialization error: {}", _0)]
    Serde(serde_json::Error),
    #[display(fmt = "object {} not found", _0)]
    ObjectNotFound(ObjectId),
    #[display(fmt = "object {} is a {}, expected a {}", id, found, expected)]
    UnexpectedKind {
        id: ObjectId,
        expected: ObjectKind,
        found: ObjectKind,
    },
    #[display(fmt = "corrupt object: {}", reason)]
    Corrupt { reason: String },
    #[display(fmt = "not a valid object id: {:?}", _0)]
    InvalidObjectId(String),
    #[display(fmt = "reference {} not found", _0)]
    RefNotFound(String),
    #[display(fmt = "symbolic reference cycle through {}", _0)]
    RefCycle(String),
    #[display(fmt = "unknown revision name: {}", _0)]
    UnknownName(String),
    #[display(fmt = "nothing to commit, tree unchanged since HEAD")]
    EmptyCommit,
    #[display(fmt = "unresolved merge conflicts in {:?}", _0)]
    UnresolvedConflicts(Vec<String>),
    #[display(fmt = "a merge of {} is in progress, commit it first", _0)]
    MergeInProgress(ObjectId),
    #[display(
        fmt = "push of {} rejected: remote {} is not an ancestor of local {}",
        branch,
        remote,
        local
    )]
    FastForwardRejected {
        branch: String,
        remote: ObjectId,
        local: ObjectId,
    },
    #[display(fmt = "merge delegate failed: {}", _0)]
    MergeDelegate(String),
    #[display(fmt = "not a repository: {:?}", _0)]
    NotARepository(PathBuf),
    #[display(fmt = "invalid path: {:?}", _0)]
    InvalidPath(String),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IO(err) => Some(err),
            Error::Serde(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Error::Corrupt {
            reason: reason.into(),
        }
    }
}

//! # Revision Control
//!
//! A small content-addressed version control engine: an object store, named
//! references, an index that becomes nested trees, a commit graph, three-way
//! merging and filesystem-to-filesystem synchronization.

mod hex;

/// Walks, ancestry and merge bases over commit parent links.
pub mod commit_graph;
/// Line diffs between blobs and path-level diffs between snapshots.
pub mod diff;
/// Layout and configuration of the `.rev` directory.
pub mod dot_rev;
pub mod error;
/// The staged path → blob mapping for the next commit.
pub mod index;
/// Three-way content merges and whole-tree merges.
pub mod merge;
/// Blobs, trees and commits, and their stored encoding.
pub mod object;
/// Hash-based binary object identifier.
pub mod object_id;
/// Content addressable store API using the [`object_id::ObjectId`].
pub mod object_store;
/// Named, possibly symbolic, pointers to objects.
pub mod refs;
/// Fetching from and pushing to another repository.
pub mod remote;
pub mod repository;
/// Conversion between an index and nested tree objects.
pub mod tree;
/// The user's files, as seen from the repository.
pub mod worktree;

pub use error::{Error, Result};
pub use repository::Repository;

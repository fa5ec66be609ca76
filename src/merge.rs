//! Three-way merging of file contents and of whole trees.

use std::{
    collections::{BTreeMap, BTreeSet},
    io::Write,
    process::Command,
};

use serde::{Deserialize, Serialize};

use crate::{
    diff::{edit_script, split_lines, Edit},
    error::{Error, Result},
    index::Index,
    object::ObjectKind,
    object_id::ObjectId,
    object_store::ObjectStore,
    tree::{flatten_tree, write_tree},
};

pub const HEAD_MARKER: &[u8] = b"<<<<<<< HEAD\n";
pub const BASE_MARKER: &[u8] = b"||||||| BASE\n";
pub const SEPARATOR_MARKER: &[u8] = b"=======\n";
pub const OTHER_MARKER: &[u8] = b">>>>>>> MERGE_HEAD\n";

/// Whether conflict hunks show the common ancestor's lines too.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStyle {
    /// `<<<<<<< HEAD`, `=======`, `>>>>>>> MERGE_HEAD`.
    #[default]
    Merge,
    /// As `Merge`, with a `||||||| BASE` section before `=======`.
    Diff3,
}

/// Which [`MergeDriver`] a repository merges file contents with.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeDriverKind {
    #[default]
    Builtin,
    /// The host's `diff3` executable.
    Diff3,
}

impl MergeDriverKind {
    pub fn driver(&self, style: ConflictStyle) -> Box<dyn MergeDriver> {
        match self {
            MergeDriverKind::Builtin => Box::new(LineMerge { style }),
            MergeDriverKind::Diff3 => Box::new(ExternalDiff3 {
                program: String::from("diff3"),
                style,
            }),
        }
    }
}

/// Result of merging one file.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct MergeOutput {
    pub content: Vec<u8>,
    /// Set when `content` carries conflict markers.
    pub conflicted: bool,
}

/// Merges three versions of a file's content.
pub trait MergeDriver {
    fn merge(&self, base: &[u8], head: &[u8], other: &[u8]) -> Result<MergeOutput>;
}

/// Line based three-way merge in the style of `diff3 -m`.
///
/// Lines of the base that both sides kept in place anchor stable regions.
/// Between anchors, a region changed by one side takes that side's lines,
/// a region changed identically by both takes either, and anything else
/// becomes a conflict hunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineMerge {
    pub style: ConflictStyle,
}

/// For every base line, the index of the line it is matched to in `side`.
fn matched_lines(base: &[&[u8]], side: &[&[u8]]) -> Vec<Option<usize>> {
    let mut matched = vec![None; base.len()];
    for op in edit_script(base, side) {
        if let Edit::Equal(i, j) = op {
            matched[i] = Some(j);
        }
    }
    matched
}

fn push_lines(out: &mut Vec<u8>, lines: &[&[u8]]) {
    for line in lines {
        out.extend_from_slice(line);
    }
}

/// Conflict sections must start on a line of their own.
fn push_section(out: &mut Vec<u8>, lines: &[&[u8]]) {
    push_lines(out, lines);
    if !out.is_empty() && !out.ends_with(b"\n") {
        out.push(b'\n');
    }
}

impl LineMerge {
    fn conflict(&self, out: &mut Vec<u8>, base: &[&[u8]], head: &[&[u8]], other: &[&[u8]]) {
        if !out.is_empty() && !out.ends_with(b"\n") {
            out.push(b'\n');
        }
        out.extend_from_slice(HEAD_MARKER);
        push_section(out, head);
        if self.style == ConflictStyle::Diff3 {
            out.extend_from_slice(BASE_MARKER);
            push_section(out, base);
        }
        out.extend_from_slice(SEPARATOR_MARKER);
        push_section(out, other);
        out.extend_from_slice(OTHER_MARKER);
    }

    /// Emits one unstable region, returning whether it conflicted.
    fn resolve(
        &self,
        out: &mut Vec<u8>,
        base: &[&[u8]],
        head: &[&[u8]],
        other: &[&[u8]],
    ) -> bool {
        if head == base || head == other {
            push_lines(out, other);
        } else if other == base {
            push_lines(out, head);
        } else {
            self.conflict(out, base, head, other);
            return true;
        }
        false
    }
}

impl MergeDriver for LineMerge {
    fn merge(&self, base: &[u8], head: &[u8], other: &[u8]) -> Result<MergeOutput> {
        let base = split_lines(base);
        let head = split_lines(head);
        let other = split_lines(other);
        let in_head = matched_lines(&base, &head);
        let in_other = matched_lines(&base, &other);

        let mut out = Vec::new();
        let mut conflicted = false;
        let (mut b, mut h, mut o) = (0, 0, 0);
        loop {
            // Stable run: the next base lines sit at the current position on both sides.
            let mut run = 0;
            while b + run < base.len()
                && in_head[b + run] == Some(h + run)
                && in_other[b + run] == Some(o + run)
            {
                run += 1;
            }
            if run > 0 {
                push_lines(&mut out, &base[b..b + run]);
                b += run;
                h += run;
                o += run;
                continue;
            }

            // Unstable region up to the next base line both sides still have.
            let anchor = (b..base.len())
                .find_map(|i| Some((i, in_head[i]?, in_other[i]?)))
                .unwrap_or((base.len(), head.len(), other.len()));
            if anchor == (b, h, o) {
                break;
            }
            let (next_b, next_h, next_o) = anchor;
            conflicted |= self.resolve(
                &mut out,
                &base[b..next_b],
                &head[h..next_h],
                &other[o..next_o],
            );
            b = next_b;
            h = next_h;
            o = next_o;
        }

        Ok(MergeOutput {
            content: out,
            conflicted,
        })
    }
}

/// Delegates to an external `diff3 -m`, run to completion before anything
/// is written. Exit status 0 means clean, 1 means conflicts, anything else
/// is a failure of the delegate.
#[derive(Debug, Clone)]
pub struct ExternalDiff3 {
    pub program: String,
    pub style: ConflictStyle,
}

impl MergeDriver for ExternalDiff3 {
    fn merge(&self, base: &[u8], head: &[u8], other: &[u8]) -> Result<MergeOutput> {
        let mut files = Vec::with_capacity(3);
        for content in [head, base, other] {
            let mut file = tempfile::NamedTempFile::new()?;
            file.write_all(content)?;
            file.flush()?;
            files.push(file);
        }

        let output = Command::new(&self.program)
            .arg("-m")
            .arg(match self.style {
                ConflictStyle::Merge => "-E",
                ConflictStyle::Diff3 => "-A",
            })
            .args(["-L", "HEAD", "-L", "BASE", "-L", "MERGE_HEAD"])
            .args(files.iter().map(|file| file.path()))
            .output()
            .map_err(|err| Error::MergeDelegate(format!("could not run {}: {}", self.program, err)))?;

        match output.status.code() {
            Some(0) => Ok(MergeOutput {
                content: output.stdout,
                conflicted: false,
            }),
            Some(1) => Ok(MergeOutput {
                content: output.stdout,
                conflicted: true,
            }),
            _ => Err(Error::MergeDelegate(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}

/// Outcome of merging three trees.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct TreeMerge {
    pub tree: ObjectId,
    pub index: Index,
    pub conflicts: BTreeSet<String>,
}

enum Resolution {
    Keep(ObjectId),
    Delete,
    Write(MergeOutput),
}

fn resolve_path<S: ObjectStore>(
    store: &S,
    driver: &dyn MergeDriver,
    base: Option<ObjectId>,
    head: Option<ObjectId>,
    other: Option<ObjectId>,
) -> Result<Resolution> {
    let taken = if head == other || base == other {
        head
    } else if base == head {
        other
    } else {
        let load = |id: Option<ObjectId>| match id {
            Some(id) => store.get_blob(id),
            None => Ok(Vec::new()),
        };
        let (head_content, other_content) = (load(head)?, load(other)?);
        let mut output = driver.merge(&load(base)?, &head_content, &other_content)?;
        // Deleted on one side, modified on the other: always a conflict, and
        // one that shows up as markers in the file.
        if (head.is_none() || other.is_none()) && !output.conflicted {
            output = MergeOutput {
                content: whole_file_conflict(&head_content, &other_content),
                conflicted: true,
            };
        }
        return Ok(Resolution::Write(output));
    };
    Ok(match taken {
        Some(id) => Resolution::Keep(id),
        None => Resolution::Delete,
    })
}

/// A single conflict hunk holding all of `head` against all of `other`.
fn whole_file_conflict(head: &[u8], other: &[u8]) -> Vec<u8> {
    let mut out = HEAD_MARKER.to_vec();
    push_section(&mut out, &split_lines(head));
    out.extend_from_slice(SEPARATOR_MARKER);
    push_section(&mut out, &split_lines(other));
    out.extend_from_slice(OTHER_MARKER);
    out
}

/// Merges `head` and `other` relative to their common ancestor `base`
/// (`None` for unrelated histories), path by path.
///
/// Every content merge runs before the first object is written, so a
/// failing driver leaves the store untouched.
pub fn merge_trees<S: ObjectStore>(
    store: &mut S,
    base: Option<ObjectId>,
    head: ObjectId,
    other: ObjectId,
    driver: &dyn MergeDriver,
) -> Result<TreeMerge> {
    let base = match base {
        Some(id) => flatten_tree(store, id)?,
        None => BTreeMap::new(),
    };
    let head = flatten_tree(store, head)?;
    let other = flatten_tree(store, other)?;
    let paths: BTreeSet<&String> = base.keys().chain(head.keys()).chain(other.keys()).collect();

    let mut resolutions = Vec::with_capacity(paths.len());
    for path in paths {
        let resolution = resolve_path(
            &*store,
            driver,
            base.get(path).copied(),
            head.get(path).copied(),
            other.get(path).copied(),
        )?;
        resolutions.push((path.clone(), resolution));
    }

    let mut index = Index::default();
    let mut conflicts = BTreeSet::new();
    for (path, resolution) in resolutions {
        let id = match resolution {
            Resolution::Keep(id) => id,
            Resolution::Delete => continue,
            Resolution::Write(output) => {
                if output.conflicted {
                    log::warn!("conflict in {}", path);
                    conflicts.insert(path.clone());
                }
                store.put(ObjectKind::Blob, &output.content)?
            }
        };
        index.insert(&path, id)?;
    }
    let tree = write_tree(store, &index)?;
    Ok(TreeMerge {
        tree,
        index,
        conflicts,
    })
}

/// Whether `content` still contains an unresolved conflict hunk.
pub fn has_conflict_markers(content: &[u8]) -> bool {
    let lines = split_lines(content);
    let starts = |marker: &[u8]| {
        let prefix = &marker[..7];
        lines.iter().any(|line| line.starts_with(prefix))
    };
    starts(HEAD_MARKER) && starts(SEPARATOR_MARKER) && starts(OTHER_MARKER)
}

#[cfg(test)]
use crate::object_store::in_memory::InMemoryObjectStore;

#[cfg(test)]
fn merge(base: &str, head: &str, other: &str) -> (String, bool) {
    let output = LineMerge::default()
        .merge(base.as_bytes(), head.as_bytes(), other.as_bytes())
        .unwrap();
    (String::from_utf8(output.content).unwrap(), output.conflicted)
}

#[test]
fn test_disjoint_edits_merge_cleanly() {
    let base = "1\n2\n3\n4\n5\n6\n7\n";
    let head = "one\n2\n3\n4\n5\n6\n7\n";
    let other = "1\n2\n3\n4\n5\n6\nseven\n";
    assert_eq!(
        merge(base, head, other),
        (String::from("one\n2\n3\n4\n5\n6\nseven\n"), false)
    );
}

#[test]
fn test_one_sided_and_identical_edits() {
    assert_eq!(merge("a\n", "a\n", "b\n"), (String::from("b\n"), false));
    assert_eq!(merge("a\n", "b\n", "a\n"), (String::from("b\n"), false));
    assert_eq!(merge("a\nx\n", "b\nx\n", "b\nx\n"), (String::from("b\nx\n"), false));
    assert_eq!(
        merge("a\nb\nc\n", "a\nc\n", "a\nb\nc\nd\n"),
        (String::from("a\nc\nd\n"), false)
    );
}

#[test]
fn test_overlapping_edit_markers() {
    let (merged, conflicted) = merge("a\nb\nc\n", "a\nhead\nc\n", "a\nother\nc\n");
    assert!(conflicted);
    assert_eq!(
        merged,
        "a\n<<<<<<< HEAD\nhead\n=======\nother\n>>>>>>> MERGE_HEAD\nc\n"
    );
    assert!(has_conflict_markers(merged.as_bytes()));
}

#[test]
fn test_diff3_style_includes_base() {
    let driver = LineMerge {
        style: ConflictStyle::Diff3,
    };
    let output = driver.merge(b"x\nb\n", b"x\nh", b"x\no\n").unwrap();
    assert!(output.conflicted);
    assert_eq!(
        output.content,
        b"x\n<<<<<<< HEAD\nh\n||||||| BASE\nb\n=======\no\n>>>>>>> MERGE_HEAD\n"
    );
}

#[test]
fn test_merge_trees() {
    let mut store = InMemoryObjectStore::new();
    let mut tree = |files: &[(&str, &str)]| {
        let index: Index = files
            .iter()
            .map(|(path, content)| {
                let id = store.put(ObjectKind::Blob, content.as_bytes()).unwrap();
                (path.to_string(), id)
            })
            .collect();
        write_tree(&mut store, &index).unwrap()
    };
    let base = tree(&[
        ("both.txt", "a\nb\nc\n"),
        ("head_only.txt", "h\n"),
        ("dropped.txt", "d\n"),
        ("edited_vs_dropped.txt", "e\n"),
    ]);
    let head = tree(&[
        ("both.txt", "a\nhead\nc\n"),
        ("head_only.txt", "h2\n"),
        ("edited_vs_dropped.txt", "e2\n"),
        ("new_in_head.txt", "n\n"),
    ]);
    let other = tree(&[
        ("both.txt", "a\nother\nc\n"),
        ("head_only.txt", "h\n"),
        ("dropped.txt", "d\n"),
    ]);

    let merged = merge_trees(&mut store, Some(base), head, other, &LineMerge::default()).unwrap();
    assert_eq!(
        merged.conflicts.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["both.txt", "edited_vs_dropped.txt"]
    );
    let flat = flatten_tree(&store, merged.tree).unwrap();
    assert_eq!(flat, merged.index.entries);
    assert!(!flat.contains_key("dropped.txt"));
    assert_eq!(store.get_blob(flat["head_only.txt"]).unwrap(), b"h2\n");
    assert_eq!(store.get_blob(flat["new_in_head.txt"]).unwrap(), b"n\n");
    assert_eq!(
        store.get_blob(flat["edited_vs_dropped.txt"]).unwrap(),
        b"<<<<<<< HEAD\ne2\n=======\n>>>>>>> MERGE_HEAD\n"
    );
}

#[cfg(test)]
struct FailingDriver;

#[cfg(test)]
impl MergeDriver for FailingDriver {
    fn merge(&self, _: &[u8], _: &[u8], _: &[u8]) -> Result<MergeOutput> {
        Err(Error::MergeDelegate(String::from("unavailable")))
    }
}

#[test]
fn test_failing_driver_writes_nothing() {
    let mut store = InMemoryObjectStore::new();
    let mut tree = |content: &str| {
        let id = store.put(ObjectKind::Blob, content.as_bytes()).unwrap();
        let index: Index = vec![(String::from("f"), id)].into_iter().collect();
        write_tree(&mut store, &index).unwrap()
    };
    let (base, head, other) = (tree("b\n"), tree("h\n"), tree("o\n"));
    let before = store.len();
    assert!(matches!(
        merge_trees(&mut store, Some(base), head, other, &FailingDriver),
        Err(Error::MergeDelegate(_))
    ));
    assert_eq!(store.len(), before);
}

#[test]
fn test_delete_against_modify_of_empty_file_has_markers() {
    let mut store = InMemoryObjectStore::new();
    let mut tree = |files: &[(&str, &str)]| {
        let index: Index = files
            .iter()
            .map(|(path, content)| {
                let id = store.put(ObjectKind::Blob, content.as_bytes()).unwrap();
                (path.to_string(), id)
            })
            .collect();
        write_tree(&mut store, &index).unwrap()
    };
    let base = tree(&[("kept.txt", "k\n"), ("p", ""), ("q", "")]);
    let head = tree(&[("kept.txt", "k\n"), ("p", "h\n")]);
    let other = tree(&[("kept.txt", "k\n"), ("q", "o\n")]);

    let merged = merge_trees(&mut store, Some(base), head, other, &LineMerge::default()).unwrap();
    assert_eq!(
        merged.conflicts.iter().map(String::as_str).collect::<Vec<_>>(),
        vec!["p", "q"]
    );
    let flat = flatten_tree(&store, merged.tree).unwrap();
    let p = store.get_blob(flat["p"]).unwrap();
    assert_eq!(p, b"<<<<<<< HEAD\nh\n=======\n>>>>>>> MERGE_HEAD\n");
    assert!(has_conflict_markers(&p));
    let q = store.get_blob(flat["q"]).unwrap();
    assert_eq!(q, b"<<<<<<< HEAD\n=======\no\n>>>>>>> MERGE_HEAD\n");
    assert!(has_conflict_markers(&q));
}

#[test]
fn test_missing_diff3_program_is_a_delegate_error() {
    let driver = ExternalDiff3 {
        program: String::from("rev-no-such-diff3-program"),
        style: ConflictStyle::Merge,
    };
    assert!(matches!(
        driver.merge(b"a\n", b"b\n", b"c\n"),
        Err(Error::MergeDelegate(_))
    ));
}

#[test]
fn test_host_diff3() {
    if Command::new("diff3").arg("--version").output().is_err() {
        log::warn!("diff3 is not installed, skipping");
        return;
    }
    let driver = ExternalDiff3 {
        program: String::from("diff3"),
        style: ConflictStyle::Merge,
    };

    let clean = driver
        .merge(
            b"1\n2\n3\n4\n5\n6\n7\n",
            b"one\n2\n3\n4\n5\n6\n7\n",
            b"1\n2\n3\n4\n5\n6\nseven\n",
        )
        .unwrap();
    assert!(!clean.conflicted);
    assert_eq!(clean.content, b"one\n2\n3\n4\n5\n6\nseven\n");

    let conflict = driver
        .merge(b"a\nb\nc\n", b"a\nhead\nc\n", b"a\nother\nc\n")
        .unwrap();
    assert!(conflict.conflicted);
    assert_eq!(
        conflict.content,
        b"a\n<<<<<<< HEAD\nhead\n=======\nother\n>>>>>>> MERGE_HEAD\nc\n"
    );
}

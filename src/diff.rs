//! Line level diffs and path by path comparison of snapshots.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
};

use serde::Serialize;

use crate::{error::Result, object_id::ObjectId, object_store::ObjectStore, tree::flatten_tree};

/// Lines of context shown around each change.
pub const CONTEXT_LINES: usize = 3;

/// Splits `data` into lines, each keeping its terminating `\n` (the last
/// one may lack it), so joining them gives back `data` byte for byte.
pub fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    data.split_inclusive(|&b| b == b'\n').collect()
}

/// Heuristic used by git and friends: a NUL in the first 8KiB.
pub fn is_binary(data: &[u8]) -> bool {
    data[..data.len().min(8192)].contains(&0)
}

/// One step of an edit script turning `old` into `new`.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Edit {
    /// `old[i] == new[j]`.
    Equal(usize, usize),
    Delete(usize),
    Insert(usize),
}

/// A shortest edit script between two sequences, derived from a longest
/// common subsequence. Common prefixes and suffixes are matched up front so
/// the quadratic table only covers the changed middle.
pub fn edit_script<T: PartialEq>(old: &[T], new: &[T]) -> Vec<Edit> {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let (m, n) = (old_mid.len(), new_mid.len());
    // table[i][j] = LCS length of old_mid[i..] and new_mid[j..]
    let mut table = vec![vec![0usize; n + 1]; m + 1];
    for i in (0..m).rev() {
        for j in (0..n).rev() {
            table[i][j] = if old_mid[i] == new_mid[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut ops: Vec<Edit> = (0..prefix).map(|k| Edit::Equal(k, k)).collect();
    let (mut i, mut j) = (0, 0);
    while i < m || j < n {
        if i < m && j < n && old_mid[i] == new_mid[j] {
            ops.push(Edit::Equal(prefix + i, prefix + j));
            i += 1;
            j += 1;
        } else if i < m && (j == n || table[i + 1][j] >= table[i][j + 1]) {
            ops.push(Edit::Delete(prefix + i));
            i += 1;
        } else {
            ops.push(Edit::Insert(prefix + j));
            j += 1;
        }
    }
    ops.extend((0..suffix).map(|k| Edit::Equal(prefix + m + k, prefix + n + k)));
    ops
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize)]
#[serde(tag = "op", content = "text", rename_all = "lowercase")]
pub enum DiffLine {
    Context(String),
    Removed(String),
    Added(String),
}

/// A run of changes with surrounding context. Starts are 1-based, as in
/// unified diff headers.
#[derive(PartialEq, Eq, Debug, Clone, Serialize)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<DiffLine>,
}

impl Display for Hunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_len, self.new_start, self.new_len
        )?;
        for line in &self.lines {
            match line {
                DiffLine::Context(text) => writeln!(f, " {}", text)?,
                DiffLine::Removed(text) => writeln!(f, "-{}", text)?,
                DiffLine::Added(text) => writeln!(f, "+{}", text)?,
            }
        }
        Ok(())
    }
}

fn display_line(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Unified diff hunks between two texts.
pub fn diff_lines(old: &[u8], new: &[u8], context: usize) -> Vec<Hunk> {
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);
    let ops = edit_script(&old_lines, &new_lines);

    // Lines of each side consumed before op k.
    let mut positions = Vec::with_capacity(ops.len() + 1);
    let (mut o, mut n) = (0, 0);
    for op in &ops {
        positions.push((o, n));
        match op {
            Edit::Equal(..) => {
                o += 1;
                n += 1;
            }
            Edit::Delete(_) => o += 1,
            Edit::Insert(_) => n += 1,
        }
    }
    positions.push((o, n));

    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| !matches!(op, Edit::Equal(..)))
        .map(|(k, _)| k)
        .collect();

    let mut groups: Vec<(usize, usize)> = Vec::new();
    for &k in &changes {
        match groups.last_mut() {
            Some((_, last)) if k - *last <= 2 * context + 1 => *last = k,
            _ => groups.push((k, k)),
        }
    }

    groups
        .into_iter()
        .map(|(first, last)| {
            let lo = first.saturating_sub(context);
            let hi = (last + context + 1).min(ops.len());
            let lines = ops[lo..hi]
                .iter()
                .map(|op| match *op {
                    Edit::Equal(i, _) => DiffLine::Context(display_line(old_lines[i])),
                    Edit::Delete(i) => DiffLine::Removed(display_line(old_lines[i])),
                    Edit::Insert(j) => DiffLine::Added(display_line(new_lines[j])),
                })
                .collect();
            let (old_before, new_before) = positions[lo];
            let (old_after, new_after) = positions[hi];
            let (old_len, new_len) = (old_after - old_before, new_after - new_before);
            Hunk {
                old_start: if old_len == 0 { old_before } else { old_before + 1 },
                old_len,
                new_start: if new_len == 0 { new_before } else { new_before + 1 },
                new_len,
                lines,
            }
        })
        .collect()
}

#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Deleted,
    Modified,
}

/// How one path differs between two snapshots.
#[derive(PartialEq, Eq, Debug, Clone, Serialize)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
    pub old: Option<ObjectId>,
    pub new: Option<ObjectId>,
    /// Set when either side looks binary; `hunks` is then empty.
    pub binary: bool,
    pub hunks: Vec<Hunk>,
}

impl Display for FileChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let old = match self.kind {
            ChangeKind::Added => String::from("/dev/null"),
            _ => format!("a/{}", self.path),
        };
        let new = match self.kind {
            ChangeKind::Deleted => String::from("/dev/null"),
            _ => format!("b/{}", self.path),
        };
        writeln!(f, "--- {}", old)?;
        writeln!(f, "+++ {}", new)?;
        if self.binary {
            return writeln!(f, "Binary files differ");
        }
        for hunk in &self.hunks {
            write!(f, "{}", hunk)?;
        }
        Ok(())
    }
}

/// Paths whose blob differs between `from` and `to`, in path order, without
/// content diffs.
pub fn changed_paths(
    from: &BTreeMap<String, ObjectId>,
    to: &BTreeMap<String, ObjectId>,
) -> Vec<(String, ChangeKind, Option<ObjectId>, Option<ObjectId>)> {
    let paths: BTreeSet<&String> = from.keys().chain(to.keys()).collect();
    paths
        .into_iter()
        .filter_map(|path| {
            let (old, new) = (from.get(path).copied(), to.get(path).copied());
            let kind = match (old, new) {
                (None, Some(_)) => ChangeKind::Added,
                (Some(_), None) => ChangeKind::Deleted,
                (Some(a), Some(b)) if a != b => ChangeKind::Modified,
                _ => return None,
            };
            Some((path.clone(), kind, old, new))
        })
        .collect()
}

/// Compares two flat snapshots, loading blob contents through `load_old`
/// and `load_new` to produce line diffs.
pub fn diff_maps<F, G>(
    from: &BTreeMap<String, ObjectId>,
    to: &BTreeMap<String, ObjectId>,
    mut load_old: F,
    mut load_new: G,
) -> Result<Vec<FileChange>>
where
    F: FnMut(&str, ObjectId) -> Result<Vec<u8>>,
    G: FnMut(&str, ObjectId) -> Result<Vec<u8>>,
{
    let mut changes = Vec::new();
    for (path, kind, old, new) in changed_paths(from, to) {
        let old_content = match old {
            Some(id) => load_old(&path, id)?,
            None => Vec::new(),
        };
        let new_content = match new {
            Some(id) => load_new(&path, id)?,
            None => Vec::new(),
        };
        let binary = is_binary(&old_content) || is_binary(&new_content);
        let hunks = if binary {
            Vec::new()
        } else {
            diff_lines(&old_content, &new_content, CONTEXT_LINES)
        };
        changes.push(FileChange {
            path,
            kind,
            old,
            new,
            binary,
            hunks,
        });
    }
    Ok(changes)
}

/// Every path that differs between two trees, with line diffs of the blobs.
pub fn diff_trees<S: ObjectStore>(
    store: &S,
    tree_a: ObjectId,
    tree_b: ObjectId,
) -> Result<Vec<FileChange>> {
    let from = flatten_tree(store, tree_a)?;
    let to = flatten_tree(store, tree_b)?;
    diff_maps(
        &from,
        &to,
        |_, id| store.get_blob(id),
        |_, id| store.get_blob(id),
    )
}

#[test]
fn test_edit_script_matches_lcs() {
    let old = ["a", "b", "c", "d"];
    let new = ["a", "c", "x", "d"];
    assert_eq!(
        edit_script(&old, &new),
        vec![
            Edit::Equal(0, 0),
            Edit::Delete(1),
            Edit::Equal(2, 1),
            Edit::Insert(2),
            Edit::Equal(3, 3),
        ]
    );
    assert_eq!(edit_script::<&str>(&[], &["a"]), vec![Edit::Insert(0)]);
}

#[test]
fn test_diff_lines_hunk_headers() {
    let old = b"1\n2\n3\n4\n5\n6\n7\n8\n9\n10\n";
    let new = b"1\n2\n3\n4\nfive\n6\n7\n8\n9\n10\n";
    let hunks = diff_lines(old, new, CONTEXT_LINES);
    assert_eq!(hunks.len(), 1);
    assert_eq!(
        hunks[0].to_string(),
        "@@ -2,7 +2,7 @@\n 2\n 3\n 4\n-5\n+five\n 6\n 7\n 8\n"
    );

    let added = diff_lines(b"", b"only\n", CONTEXT_LINES);
    assert_eq!(added[0].to_string(), "@@ -0,0 +1,1 @@\n+only\n");
    assert!(diff_lines(old, old, CONTEXT_LINES).is_empty());
}

#[test]
fn test_distant_changes_split_hunks() {
    let old: Vec<u8> = (1..=20).flat_map(|n| format!("{}\n", n).into_bytes()).collect();
    let new = String::from_utf8(old.clone())
        .unwrap()
        .replace("2\n3\n", "2\nthree\n")
        .replace("\n18\n", "\neighteen\n");
    let hunks = diff_lines(&old, new.as_bytes(), CONTEXT_LINES);
    assert_eq!(hunks.len(), 2);
    assert_eq!((hunks[0].old_start, hunks[0].old_len), (1, 6));
    assert_eq!((hunks[1].old_start, hunks[1].old_len), (15, 6));
}

#[test]
fn test_diff_trees_reports_kinds() {
    use crate::{
        index::Index, object::ObjectKind, object_store::in_memory::InMemoryObjectStore,
        tree::write_tree,
    };

    let mut store = InMemoryObjectStore::new();
    let mut stage = |files: &[(&str, &str)]| -> Index {
        files
            .iter()
            .map(|(path, content)| {
                let id = store.put(ObjectKind::Blob, content.as_bytes()).unwrap();
                (path.to_string(), id)
            })
            .collect()
    };
    let before = stage(&[("same", "s\n"), ("changed", "old\n"), ("gone", "g\n"), ("bin", "\0a")]);
    let after = stage(&[("same", "s\n"), ("changed", "new\n"), ("fresh", "f\n"), ("bin", "\0b")]);
    let tree_a = write_tree(&mut store, &before).unwrap();
    let tree_b = write_tree(&mut store, &after).unwrap();

    let changes = diff_trees(&store, tree_a, tree_b).unwrap();
    let summary: Vec<(&str, ChangeKind)> = changes
        .iter()
        .map(|change| (change.path.as_str(), change.kind))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("bin", ChangeKind::Modified),
            ("changed", ChangeKind::Modified),
            ("fresh", ChangeKind::Added),
            ("gone", ChangeKind::Deleted),
        ]
    );
    assert!(changes[0].binary);
    assert_eq!(
        changes[1].to_string(),
        "--- a/changed\n+++ b/changed\n@@ -1,1 +1,1 @@\n-old\n+new\n"
    );
    assert!(diff_trees(&store, tree_a, tree_a).unwrap().is_empty());
}

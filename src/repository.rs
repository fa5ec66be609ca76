//! A handle on one repository: its object store, references, index and
//! working tree. Every operation goes through an explicit [`Repository`]
//! value, so several repositories can be used side by side.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use crate::{
    commit_graph::{self, iter_commits_and_parents, timestamp, write_commit},
    diff::{changed_paths, diff_maps, ChangeKind, FileChange},
    dot_rev::{read_json, write_json, Config, DotRev, DEFAULT_BRANCH, DOT_REV},
    error::{Error, Result},
    index::Index,
    merge::{has_conflict_markers, merge_trees, MergeDriver},
    object::{Commit, ObjectKind},
    object_id::ObjectId,
    object_store::{directory::DirectoryObjectStore, ObjectStore},
    refs::{self, RefStore, RefValue, HEAD, HEADS, MERGE_HEAD},
    tree::{checkout_index, flatten_tree, read_tree, write_tree},
    worktree::{Ignores, WorkTree},
};

/// Shortest abbreviated object id accepted by [`Repository::resolve_name`].
const MIN_ABBREV: usize = 4;

#[derive(Debug, Clone)]
pub struct Repository {
    dot_rev: DotRev,
    store: DirectoryObjectStore,
    refs: RefStore,
    worktree: WorkTree,
    config: Config,
}

/// What [`Repository::merge`] did.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum MergeOutcome {
    /// The other commit was already part of HEAD's history.
    UpToDate,
    /// HEAD was an ancestor of the other commit and now points at it.
    FastForward(ObjectId),
    /// The merged tree is in the index and working tree, waiting to be
    /// committed with two parents.
    Merged {
        base: Option<ObjectId>,
        tree: ObjectId,
        conflicts: BTreeSet<String>,
    },
}

/// Differences between HEAD, the index and the working tree.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct Status {
    pub branch: Option<String>,
    pub head: Option<ObjectId>,
    /// The other side of a merge that has not been committed yet.
    pub merging: Option<ObjectId>,
    /// HEAD → index.
    pub staged: Vec<(String, ChangeKind)>,
    /// Index → working tree, for tracked paths.
    pub unstaged: Vec<(String, ChangeKind)>,
    pub untracked: Vec<String>,
}

impl Repository {
    /// Creates the `.rev` directory inside `work_tree`, starting out on the
    /// default branch. An existing repository is opened as is.
    pub fn init(work_tree: PathBuf) -> Result<Self> {
        DotRev::init(work_tree.join(DOT_REV))?;
        let repository = Self::open(work_tree)?;
        if repository.refs.get_ref(HEAD, false)?.is_none() {
            repository.refs.update_ref(
                HEAD,
                &RefValue::Symbolic(refs::branch(DEFAULT_BRANCH)),
                false,
            )?;
        }
        Ok(repository)
    }

    pub fn open(work_tree: PathBuf) -> Result<Self> {
        let dot_rev = DotRev::existing(work_tree.join(DOT_REV))?;
        let config = dot_rev.config()?;
        let store = DirectoryObjectStore::new(dot_rev.objects())?;
        let refs = RefStore::new(dot_rev.root().clone());
        let worktree = WorkTree::new(work_tree, Ignores::new(config.ignores.iter().cloned()));
        Ok(Repository {
            dot_rev,
            store,
            refs,
            worktree,
            config,
        })
    }

    /// Opens the repository whose working tree contains `start`.
    pub fn discover(start: &Path) -> Result<Self> {
        let mut dir = Some(start);
        while let Some(d) = dir {
            if d.join(DOT_REV).is_dir() {
                return Self::open(d.to_path_buf());
            }
            dir = d.parent();
        }
        Err(Error::NotARepository(start.to_path_buf()))
    }

    pub fn store(&self) -> &DirectoryObjectStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut DirectoryObjectStore {
        &mut self.store
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    pub fn worktree(&self) -> &WorkTree {
        &self.worktree
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn set_config(&mut self, config: Config) -> Result<()> {
        self.dot_rev.write_config(&config)?;
        self.worktree = WorkTree::new(
            self.worktree.root().clone(),
            Ignores::new(config.ignores.iter().cloned()),
        );
        self.config = config;
        Ok(())
    }

    pub fn index(&self) -> Result<Index> {
        Index::load(&self.dot_rev.index())
    }

    pub fn save_index(&self, index: &Index) -> Result<()> {
        index.save(&self.dot_rev.index())
    }

    /// Stores the given files, or every file under the given directories,
    /// and stages them. Tracked files under those paths that no longer
    /// exist are unstaged. Returns the paths whose entry was touched.
    pub fn add<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<Vec<String>> {
        let mut index = self.index()?;
        let mut staged = Vec::new();
        for path in paths {
            let relative = self.worktree.relative(path.as_ref())?;
            let files = self.worktree.files_under(&relative)?;
            let vanished: Vec<String> = index
                .entries
                .keys()
                .filter(|tracked| is_under(tracked, &relative) && !files.contains(*tracked))
                .cloned()
                .collect();
            if files.is_empty() && vanished.is_empty() {
                log::warn!("nothing to add under {:?}", path.as_ref());
            }
            for gone in vanished {
                index.remove(&gone);
                staged.push(gone);
            }
            for file in files {
                let content = self.worktree.read(&file)?;
                let id = self.store.put(ObjectKind::Blob, &content)?;
                index.insert(&file, id)?;
                staged.push(file);
            }
        }
        self.save_index(&index)?;
        Ok(staged)
    }

    /// Unstages `path`; the file itself stays in the working tree.
    pub fn remove_from_index(&mut self, path: &str) -> Result<bool> {
        let mut index = self.index()?;
        let removed = index.remove(path).is_some();
        self.save_index(&index)?;
        Ok(removed)
    }

    pub fn write_tree(&mut self) -> Result<ObjectId> {
        let index = self.index()?;
        write_tree(&mut self.store, &index)
    }

    /// Loads the tree `id` into the index and, with `update_working`, into
    /// the working tree as well.
    pub fn read_tree(&mut self, id: ObjectId, update_working: bool) -> Result<()> {
        let mut index = self.index()?;
        let worktree = update_working.then_some(&self.worktree);
        read_tree(&self.store, id, &mut index, worktree)?;
        self.save_index(&index)
    }

    pub fn head(&self) -> Result<Option<ObjectId>> {
        self.refs.try_resolve(HEAD)
    }

    pub fn pending_merge(&self) -> Result<Option<ObjectId>> {
        self.refs.try_resolve(MERGE_HEAD)
    }

    fn commit_tree(&self, id: Option<ObjectId>) -> Result<BTreeMap<String, ObjectId>> {
        match id {
            Some(id) => flatten_tree(&self.store, self.store.get_commit(id)?.tree),
            None => Ok(BTreeMap::new()),
        }
    }

    /// Recorded conflicts whose staged content still carries markers.
    fn unresolved_conflicts(&self, index: &Index) -> Result<Vec<String>> {
        let path = self.dot_rev.merge_conflicts();
        if !path.try_exists()? {
            return Ok(Vec::new());
        }
        let recorded: Vec<String> = read_json(&path)?;
        let mut unresolved = Vec::new();
        for conflicted in recorded {
            if let Some(id) = index.get(&conflicted) {
                if has_conflict_markers(&self.store.get_blob(id)?) {
                    unresolved.push(conflicted);
                }
            }
        }
        Ok(unresolved)
    }

    /// Snapshots the index as a new commit on top of HEAD (and of the
    /// pending merge, if there is one) and moves HEAD to it.
    pub fn commit(&mut self, message: &str) -> Result<ObjectId> {
        let index = self.index()?;
        let head = self.head()?;
        let pending = self.pending_merge()?;

        if pending.is_some() {
            let unresolved = self.unresolved_conflicts(&index)?;
            if !unresolved.is_empty() {
                return Err(Error::UnresolvedConflicts(unresolved));
            }
        }

        let tree = write_tree(&mut self.store, &index)?;
        if let (Some(head), None) = (head, pending) {
            if self.store.get_commit(head)?.tree == tree {
                return Err(Error::EmptyCommit);
            }
        }

        let commit = Commit {
            tree,
            parents: head.into_iter().chain(pending).collect(),
            author: self.config.author.clone(),
            timestamp: timestamp(),
            message: message.to_owned(),
        };
        let id = write_commit(&mut self.store, &commit)?;
        self.refs.update_ref(HEAD, &RefValue::Direct(id), true)?;
        if pending.is_some() {
            self.clear_pending_merge()?;
        }
        Ok(id)
    }

    fn clear_pending_merge(&self) -> Result<()> {
        self.refs.delete_ref(MERGE_HEAD, false)?;
        let conflicts = self.dot_rev.merge_conflicts();
        if conflicts.try_exists()? {
            std::fs::remove_file(conflicts)?;
        }
        Ok(())
    }

    pub fn is_branch(&self, name: &str) -> Result<bool> {
        match self.refs.get_ref(&refs::branch(name), false) {
            Ok(value) => Ok(value.is_some()),
            Err(Error::InvalidPath(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Switches to `name`: a branch makes HEAD follow it, anything else
    /// detaches HEAD at the commit.
    pub fn checkout(&mut self, name: &str) -> Result<ObjectId> {
        let id = self.resolve_name(name)?;
        let commit = self.store.get_commit(id)?;
        self.read_tree(commit.tree, true)?;
        let head = if self.is_branch(name)? {
            RefValue::Symbolic(refs::branch(name))
        } else {
            RefValue::Direct(id)
        };
        self.refs.update_ref(HEAD, &head, false)?;
        Ok(id)
    }

    pub fn create_branch(&self, name: &str, id: ObjectId) -> Result<()> {
        self.store.get_kind(id, ObjectKind::Commit)?;
        self.refs
            .update_ref(&refs::branch(name), &RefValue::Direct(id), false)
    }

    pub fn create_tag(&self, name: &str, id: ObjectId) -> Result<()> {
        self.store.get_kind(id, ObjectKind::Commit)?;
        self.refs
            .update_ref(&refs::tag(name), &RefValue::Direct(id), false)
    }

    pub fn branch_names(&self) -> Result<Vec<String>> {
        self.refs
            .iterate_refs(HEADS)?
            .map(|item| Ok(item?.0[HEADS.len()..].to_owned()))
            .collect()
    }

    /// The branch HEAD follows, `None` when detached.
    pub fn current_branch(&self) -> Result<Option<String>> {
        match self.refs.get_ref(HEAD, false)? {
            Some(RefValue::Symbolic(name)) => Ok(name.strip_prefix(HEADS).map(str::to_owned)),
            _ => Ok(None),
        }
    }

    /// Points whatever HEAD follows at `id`, leaving index and files alone.
    pub fn reset(&mut self, id: ObjectId) -> Result<()> {
        self.store.get_kind(id, ObjectKind::Commit)?;
        self.refs.update_ref(HEAD, &RefValue::Direct(id), true)
    }

    /// Resolves a revision name: `@` for HEAD, a reference name with or
    /// without its `refs/`, `refs/tags/` or `refs/heads/` prefix, a full
    /// object id, or an unambiguous prefix of one.
    pub fn resolve_name(&self, name: &str) -> Result<ObjectId> {
        let name = if name == "@" { HEAD } else { name };
        let candidates = [
            name.to_owned(),
            format!("refs/{}", name),
            refs::tag(name),
            refs::branch(name),
        ];
        for candidate in &candidates {
            match self.refs.get_ref(candidate, false) {
                Ok(Some(_)) => return self.refs.resolve(candidate),
                Ok(None) | Err(Error::InvalidPath(_)) => continue,
                Err(err) => return Err(err),
            }
        }

        if let Ok(id) = name.parse::<ObjectId>() {
            return Ok(id);
        }
        if name.len() >= MIN_ABBREV && name.chars().all(|c| c.is_ascii_hexdigit()) {
            let prefix = name.to_ascii_lowercase();
            let found: Vec<ObjectId> = self
                .store
                .ids()?
                .into_iter()
                .filter(|id| id.to_string().starts_with(&prefix))
                .collect();
            if let [id] = found.as_slice() {
                return Ok(*id);
            }
        }
        Err(Error::UnknownName(name.to_owned()))
    }

    /// Commits reachable from `start`, first parents first.
    pub fn log(
        &self,
        start: ObjectId,
    ) -> impl Iterator<Item = Result<(ObjectId, Commit)>> + '_ {
        iter_commits_and_parents(&self.store, [start])
            .map(move |id| id.and_then(|id| Ok((id, self.store.get_commit(id)?))))
    }

    pub fn is_ancestor(&self, candidate: ObjectId, descendant: ObjectId) -> Result<bool> {
        commit_graph::is_ancestor(&self.store, candidate, descendant)
    }

    pub fn merge_base(&self, a: ObjectId, b: ObjectId) -> Result<Option<ObjectId>> {
        commit_graph::merge_base(&self.store, a, b)
    }

    /// Merges the commit `other` names into HEAD.
    ///
    /// A true merge leaves its result in the index and working tree and
    /// records `MERGE_HEAD`; nothing is committed until [`Repository::commit`].
    /// Fails with [`Error::MergeInProgress`] while an earlier merge is pending.
    pub fn merge(&mut self, other: &str) -> Result<MergeOutcome> {
        let driver = self.config.merge_driver.driver(self.config.conflict_style);
        self.merge_with(other, driver.as_ref())
    }

    /// [`Repository::merge`] with an explicit content merge driver.
    pub fn merge_with(&mut self, other: &str, driver: &dyn MergeDriver) -> Result<MergeOutcome> {
        if let Some(pending) = self.pending_merge()? {
            return Err(Error::MergeInProgress(pending));
        }
        let head = self.refs.resolve(HEAD)?;
        let other = self.resolve_name(other)?;
        let other_commit = self.store.get_commit(other)?;
        let base = self.merge_base(head, other)?;

        if base == Some(other) {
            return Ok(MergeOutcome::UpToDate);
        }
        if base == Some(head) {
            log::info!("fast-forwarding {} to {}", head, other);
            self.read_tree(other_commit.tree, true)?;
            self.refs.update_ref(HEAD, &RefValue::Direct(other), true)?;
            return Ok(MergeOutcome::FastForward(other));
        }

        let head_tree = self.store.get_commit(head)?.tree;
        let base_tree = match base {
            Some(base) => Some(self.store.get_commit(base)?.tree),
            None => None,
        };
        let merged = merge_trees(&mut self.store, base_tree, head_tree, other_commit.tree, driver)?;

        let previous = self.index()?;
        checkout_index(&self.store, &previous, &merged.index, &self.worktree)?;
        self.save_index(&merged.index)?;
        self.refs
            .update_ref(MERGE_HEAD, &RefValue::Direct(other), false)?;
        let conflicts = self.dot_rev.merge_conflicts();
        if merged.conflicts.is_empty() {
            if conflicts.try_exists()? {
                std::fs::remove_file(conflicts)?;
            }
        } else {
            write_json(&merged.conflicts, &conflicts)?;
        }
        log::info!(
            "merged {} into {} with {} conflicts",
            other,
            head,
            merged.conflicts.len()
        );
        Ok(MergeOutcome::Merged {
            base,
            tree: merged.tree,
            conflicts: merged.conflicts,
        })
    }

    pub fn diff_trees(&self, tree_a: ObjectId, tree_b: ObjectId) -> Result<Vec<FileChange>> {
        crate::diff::diff_trees(&self.store, tree_a, tree_b)
    }

    /// Changes in the working tree to tracked files, relative to the index.
    pub fn diff_working(&self) -> Result<Vec<FileChange>> {
        let index = self.index()?;
        let mut working = self.worktree.snapshot()?;
        working.retain(|path, _| index.entries.contains_key(path));
        diff_maps(
            &index.entries,
            &working,
            |_, id| self.store.get_blob(id),
            |path, _| self.worktree.read(path),
        )
    }

    pub fn status(&self) -> Result<Status> {
        let head = self.head()?;
        let index = self.index()?;
        let working = self.worktree.snapshot()?;
        let head_files = self.commit_tree(head)?;

        let summarize = |changes: Vec<(String, ChangeKind, _, _)>| {
            changes
                .into_iter()
                .map(|(path, kind, _, _)| (path, kind))
                .collect::<Vec<_>>()
        };
        let tracked: BTreeMap<String, ObjectId> = working
            .iter()
            .filter(|(path, _)| index.entries.contains_key(*path))
            .map(|(path, id)| (path.clone(), *id))
            .collect();
        Ok(Status {
            branch: self.current_branch()?,
            head,
            merging: self.pending_merge()?,
            staged: summarize(changed_paths(&head_files, &index.entries)),
            unstaged: summarize(changed_paths(&index.entries, &tracked)),
            untracked: working
                .keys()
                .filter(|path| !index.entries.contains_key(*path))
                .cloned()
                .collect(),
        })
    }
}

fn is_under(path: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || path == prefix
        || path
            .strip_prefix(prefix)
            .map_or(false, |rest| rest.starts_with('/'))
}

#[cfg(test)]
fn repository() -> (tempfile::TempDir, Repository) {
    let tempdir = tempfile::tempdir().unwrap();
    let repository = Repository::init(tempdir.path().to_path_buf()).unwrap();
    (tempdir, repository)
}

#[cfg(test)]
fn commit_files(repository: &mut Repository, files: &[(&str, &str)], message: &str) -> ObjectId {
    for (path, content) in files {
        repository.worktree().write(path, content.as_bytes()).unwrap();
    }
    let paths: Vec<&str> = files.iter().map(|(path, _)| *path).collect();
    repository.add(&paths).unwrap();
    repository.commit(message).unwrap()
}

#[test]
fn test_commit_parents_and_empty_commit() {
    let (_tempdir, mut repository) = repository();
    assert_eq!(repository.current_branch().unwrap().as_deref(), Some(DEFAULT_BRANCH));
    let first = commit_files(&mut repository, &[("a.txt", "hello")], "first");
    let second = commit_files(&mut repository, &[("a.txt", "world")], "second");

    assert_eq!(repository.store().get_commit(first).unwrap().parents, vec![]);
    assert_eq!(repository.store().get_commit(second).unwrap().parents, vec![first]);
    assert_eq!(repository.refs().resolve(&refs::branch(DEFAULT_BRANCH)).unwrap(), second);
    assert!(matches!(repository.commit("again"), Err(Error::EmptyCommit)));

    let log: Vec<ObjectId> = repository.log(second).map(|entry| entry.unwrap().0).collect();
    assert_eq!(log, vec![second, first]);
}

#[test]
fn test_checkout_branch_and_detached() {
    let (_tempdir, mut repository) = repository();
    let first = commit_files(&mut repository, &[("a.txt", "one"), ("old.txt", "old")], "first");
    repository.create_branch("feature", first).unwrap();
    repository.remove_from_index("old.txt").unwrap();
    let second = commit_files(&mut repository, &[("a.txt", "two")], "second");

    repository.checkout("feature").unwrap();
    assert_eq!(repository.current_branch().unwrap().as_deref(), Some("feature"));
    assert_eq!(repository.worktree().read("a.txt").unwrap(), b"one");
    assert_eq!(repository.worktree().read("old.txt").unwrap(), b"old");

    repository.checkout(&second.to_string()).unwrap();
    assert_eq!(repository.current_branch().unwrap(), None);
    assert_eq!(repository.head().unwrap(), Some(second));
    assert!(repository.worktree().read("old.txt").is_err());
    assert_eq!(repository.branch_names().unwrap(), vec!["dev", "feature"]);
}

#[test]
fn test_resolve_name() {
    let (_tempdir, mut repository) = repository();
    let first = commit_files(&mut repository, &[("a.txt", "one")], "first");
    repository.create_tag("v1", first).unwrap();
    assert_eq!(repository.resolve_name("@").unwrap(), first);
    assert_eq!(repository.resolve_name("v1").unwrap(), first);
    assert_eq!(repository.resolve_name("tags/v1").unwrap(), first);
    assert_eq!(repository.resolve_name("dev").unwrap(), first);
    assert_eq!(repository.resolve_name(&first.to_string()[..12]).unwrap(), first);
    assert!(matches!(
        repository.resolve_name("nope"),
        Err(Error::UnknownName(_))
    ));
}

#[test]
fn test_conflicting_merge_then_resolve() {
    let (_tempdir, mut repository) = repository();
    let base = commit_files(&mut repository, &[("f.txt", "a\nb\nc\n")], "base");
    repository.create_branch("other", base).unwrap();
    let ours = commit_files(&mut repository, &[("f.txt", "a\nours\nc\n")], "ours");
    repository.checkout("other").unwrap();
    let theirs = commit_files(&mut repository, &[("f.txt", "a\ntheirs\nc\n")], "theirs");
    repository.checkout("dev").unwrap();

    let outcome = repository.merge("other").unwrap();
    match outcome {
        MergeOutcome::Merged { base: merge_base, conflicts, .. } => {
            assert_eq!(merge_base, Some(base));
            assert_eq!(conflicts.into_iter().collect::<Vec<_>>(), vec!["f.txt"]);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(
        repository.worktree().read("f.txt").unwrap(),
        b"a\n<<<<<<< HEAD\nours\n=======\ntheirs\n>>>>>>> MERGE_HEAD\nc\n"
    );
    assert_eq!(repository.pending_merge().unwrap(), Some(theirs));
    assert!(matches!(
        repository.commit("too early"),
        Err(Error::UnresolvedConflicts(paths)) if paths == vec!["f.txt"]
    ));
    assert_eq!(repository.pending_merge().unwrap(), Some(theirs));

    let merge = commit_files(&mut repository, &[("f.txt", "a\nboth\nc\n")], "merge");
    assert_eq!(
        repository.store().get_commit(merge).unwrap().parents,
        vec![ours, theirs]
    );
    assert_eq!(repository.pending_merge().unwrap(), None);
    assert_eq!(repository.merge("other").unwrap(), MergeOutcome::UpToDate);
}

#[test]
fn test_fast_forward_merge() {
    let (_tempdir, mut repository) = repository();
    let base = commit_files(&mut repository, &[("f.txt", "1")], "base");
    repository.create_branch("ahead", base).unwrap();
    repository.checkout("ahead").unwrap();
    let ahead = commit_files(&mut repository, &[("g.txt", "2")], "ahead");
    repository.checkout("dev").unwrap();
    assert!(repository.worktree().read("g.txt").is_err());

    assert_eq!(
        repository.merge("ahead").unwrap(),
        MergeOutcome::FastForward(ahead)
    );
    assert_eq!(repository.refs().resolve(&refs::branch("dev")).unwrap(), ahead);
    assert_eq!(repository.worktree().read("g.txt").unwrap(), b"2");
    assert_eq!(repository.pending_merge().unwrap(), None);
}

#[test]
fn test_status_and_working_diff() {
    let (_tempdir, mut repository) = repository();
    commit_files(&mut repository, &[("tracked.txt", "one\n"), ("gone.txt", "g\n")], "first");
    repository.worktree().write("tracked.txt", b"two\n").unwrap();
    repository.worktree().write("new.txt", b"new\n").unwrap();
    repository.worktree().remove("gone.txt").unwrap();
    repository.worktree().write("staged.txt", b"s\n").unwrap();
    repository.add(&["staged.txt"]).unwrap();

    let status = repository.status().unwrap();
    assert_eq!(status.staged, vec![(String::from("staged.txt"), ChangeKind::Added)]);
    assert_eq!(
        status.unstaged,
        vec![
            (String::from("gone.txt"), ChangeKind::Deleted),
            (String::from("tracked.txt"), ChangeKind::Modified),
        ]
    );
    assert_eq!(status.untracked, vec![String::from("new.txt")]);

    let diff = repository.diff_working().unwrap();
    let rendered: Vec<String> = diff.iter().map(ToString::to_string).collect();
    assert_eq!(
        rendered,
        vec![
            String::from("--- a/gone.txt\n+++ /dev/null\n@@ -1,1 +0,0 @@\n-g\n"),
            String::from("--- a/tracked.txt\n+++ b/tracked.txt\n@@ -1,1 +1,1 @@\n-one\n+two\n"),
        ]
    );
}

#[test]
fn test_add_directory_stages_deletions() {
    let (_tempdir, mut repository) = repository();
    commit_files(&mut repository, &[("d/a.txt", "a"), ("d/b.txt", "b"), ("top.txt", "t")], "first");
    repository.worktree().remove("d/a.txt").unwrap();
    repository.worktree().write("d/c.txt", b"c").unwrap();

    let touched = repository.add(&["d"]).unwrap();
    assert_eq!(touched, vec!["d/a.txt", "d/b.txt", "d/c.txt"]);
    let index = repository.index().unwrap();
    let paths: Vec<&str> = index.entries.keys().map(String::as_str).collect();
    assert_eq!(paths, vec!["d/b.txt", "d/c.txt", "top.txt"]);
}

#[test]
fn test_merge_refused_while_another_is_pending() {
    let (_tempdir, mut repository) = repository();
    let base = commit_files(&mut repository, &[("f.txt", "a\nb\nc\n")], "base");
    repository.create_branch("other", base).unwrap();
    repository.create_branch("third", base).unwrap();
    commit_files(&mut repository, &[("f.txt", "a\nours\nc\n")], "ours");
    repository.checkout("other").unwrap();
    let theirs = commit_files(&mut repository, &[("f.txt", "a\ntheirs\nc\n")], "theirs");
    repository.checkout("third").unwrap();
    commit_files(&mut repository, &[("g.txt", "g\n")], "third");
    repository.checkout("dev").unwrap();

    repository.merge("other").unwrap();
    let conflicted = repository.worktree().read("f.txt").unwrap();
    assert!(matches!(
        repository.merge("third"),
        Err(Error::MergeInProgress(pending)) if pending == theirs
    ));
    assert_eq!(repository.pending_merge().unwrap(), Some(theirs));
    assert_eq!(repository.worktree().read("f.txt").unwrap(), conflicted);
    assert!(repository.worktree().read("g.txt").is_err());
    assert!(matches!(
        repository.commit("too early"),
        Err(Error::UnresolvedConflicts(paths)) if paths == vec!["f.txt"]
    ));
}

#[test]
fn test_clean_merge_of_disjoint_paths() {
    let (_tempdir, mut repository) = repository();
    let base = commit_files(&mut repository, &[("f.txt", "f\n"), ("g.txt", "g\n")], "base");
    repository.create_branch("other", base).unwrap();
    let ours = commit_files(&mut repository, &[("f.txt", "ours\n")], "ours");
    repository.checkout("other").unwrap();
    let theirs = commit_files(&mut repository, &[("g.txt", "theirs\n")], "theirs");
    repository.checkout("dev").unwrap();

    let tree = match repository.merge("other").unwrap() {
        MergeOutcome::Merged { base: merge_base, tree, conflicts } => {
            assert_eq!(merge_base, Some(base));
            assert!(conflicts.is_empty());
            tree
        }
        other => panic!("unexpected outcome {:?}", other),
    };
    let expected: BTreeMap<String, ObjectId> = [
        (String::from("f.txt"), ObjectId::for_object(ObjectKind::Blob, b"ours\n")),
        (String::from("g.txt"), ObjectId::for_object(ObjectKind::Blob, b"theirs\n")),
    ]
    .into_iter()
    .collect();
    assert_eq!(flatten_tree(repository.store(), tree).unwrap(), expected);
    assert_eq!(repository.worktree().read("g.txt").unwrap(), b"theirs\n");
    assert_eq!(repository.pending_merge().unwrap(), Some(theirs));

    let merge = repository.commit("merge").unwrap();
    let commit = repository.store().get_commit(merge).unwrap();
    assert_eq!(commit.parents, vec![ours, theirs]);
    assert_eq!(commit.tree, tree);
    assert_eq!(repository.pending_merge().unwrap(), None);
}

#[test]
fn test_namespaces_are_not_names() {
    let (_tempdir, mut repository) = repository();
    let first = commit_files(&mut repository, &[("a.txt", "one")], "first");
    repository.create_tag("v1", first).unwrap();
    for name in ["heads", "tags", "refs/heads"] {
        assert!(matches!(
            repository.resolve_name(name),
            Err(Error::UnknownName(_))
        ));
    }
}

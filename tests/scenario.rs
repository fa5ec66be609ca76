use std::path::Path;

use rev::{
    diff::ChangeKind,
    error::Error,
    object::ObjectKind,
    object_id::ObjectId,
    object_store::ObjectStore,
    refs,
    remote::{FetchReport, Remote},
    repository::Repository,
};

fn commit_file(repository: &mut Repository, path: &str, content: &str, message: &str) -> ObjectId {
    repository.worktree().write(path, content.as_bytes()).unwrap();
    repository.add(&[path]).unwrap();
    repository.commit(message).unwrap()
}

fn object_count(repository: &Repository) -> usize {
    repository.store().ids().unwrap().len()
}

#[test]
fn test_first_commits() {
    let tempdir = tempfile::tempdir().unwrap();
    let mut repository = Repository::init(tempdir.path().to_path_buf()).unwrap();

    let h1 = repository.store_mut().put(ObjectKind::Blob, b"hello").unwrap();
    assert_eq!(
        repository.store().get(h1).unwrap(),
        (ObjectKind::Blob, b"hello".to_vec())
    );

    let mut index = repository.index().unwrap();
    index.insert("a.txt", h1).unwrap();
    repository.save_index(&index).unwrap();
    let t1 = repository.write_tree().unwrap();
    let c1 = repository.commit("first").unwrap();
    let first = repository.store().get_commit(c1).unwrap();
    assert_eq!(first.tree, t1);
    assert!(first.parents.is_empty());

    repository.create_branch("feature", c1).unwrap();

    let h2 = repository.store_mut().put(ObjectKind::Blob, b"world").unwrap();
    assert_ne!(h1, h2);
    let mut index = repository.index().unwrap();
    index.insert("a.txt", h2).unwrap();
    repository.save_index(&index).unwrap();
    let c2 = repository.commit("second").unwrap();
    let second = repository.store().get_commit(c2).unwrap();
    assert_eq!(second.parents, vec![c1]);

    assert_eq!(repository.merge_base(c1, c2).unwrap(), Some(c1));
    let changes = repository.diff_trees(t1, second.tree).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].path, "a.txt");
    assert_eq!(changes[0].kind, ChangeKind::Modified);

    assert_eq!(repository.resolve_name("feature").unwrap(), c1);
    assert_eq!(repository.head().unwrap(), Some(c2));
}

#[test]
fn test_reopen_sees_the_same_state() {
    let tempdir = tempfile::tempdir().unwrap();
    let mut repository = Repository::init(tempdir.path().to_path_buf()).unwrap();
    let id = commit_file(&mut repository, "src/lib.rs", "fn main() {}\n", "init");

    let nested = tempdir.path().join("src");
    let reopened = Repository::discover(&nested).unwrap();
    assert_eq!(reopened.head().unwrap(), Some(id));
    assert_eq!(reopened.index().unwrap(), repository.index().unwrap());
    assert!(matches!(
        Repository::open(tempdir.path().join("src")),
        Err(Error::NotARepository(_))
    ));
}

fn clone_of(source: &Path, dir: &Path) -> Repository {
    let mut local = Repository::init(dir.to_path_buf()).unwrap();
    let remote = Remote::open(&local, source.to_str().unwrap()).unwrap();
    remote.fetch(&mut local, "").unwrap();
    local
}

#[test]
fn test_fetch_is_idempotent() {
    let upstream_dir = tempfile::tempdir().unwrap();
    let local_dir = tempfile::tempdir().unwrap();
    let mut upstream = Repository::init(upstream_dir.path().to_path_buf()).unwrap();
    let first = commit_file(&mut upstream, "a.txt", "one\n", "first");
    upstream.create_branch("topic", first).unwrap();
    let second = commit_file(&mut upstream, "a.txt", "two\n", "second");

    let mut local = Repository::init(local_dir.path().to_path_buf()).unwrap();
    let remote = Remote::new(String::from("origin"), upstream.clone());
    let report = remote.fetch(&mut local, "").unwrap();
    assert_eq!(report.objects, object_count(&upstream));
    assert_eq!(
        report.updated,
        vec![
            (refs::remote_branch("origin", "dev"), second),
            (refs::remote_branch("origin", "topic"), first),
        ]
    );
    assert_eq!(local.head().unwrap(), None);
    assert!(local.branch_names().unwrap().is_empty());

    let objects = local.store().ids().unwrap();
    let again = remote.fetch(&mut local, "").unwrap();
    assert_eq!(again.objects, 0);
    assert!(again.updated.is_empty());
    assert_eq!(local.store().ids().unwrap(), objects);
    assert_eq!(
        local.resolve_name("remote/origin/heads/dev").unwrap(),
        second
    );

    let third = commit_file(&mut upstream, "b.txt", "three\n", "third");
    let only_topic = remote.fetch(&mut local, "top").unwrap();
    assert_eq!(only_topic, FetchReport::default());
    let dev = remote.fetch(&mut local, "dev").unwrap();
    assert_eq!(dev.objects, 3);
    assert_eq!(dev.updated, vec![(refs::remote_branch("origin", "dev"), third)]);
}

#[test]
fn test_push_fast_forward_and_rejection() {
    let upstream_dir = tempfile::tempdir().unwrap();
    let local_dir = tempfile::tempdir().unwrap();
    let other_dir = tempfile::tempdir().unwrap();
    let mut upstream = Repository::init(upstream_dir.path().to_path_buf()).unwrap();
    let base = commit_file(&mut upstream, "a.txt", "base\n", "base");

    let mut local = clone_of(upstream_dir.path(), local_dir.path());
    let name = upstream_dir
        .path()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();
    local.reset(base).unwrap();
    local.read_tree(local.store().get_commit(base).unwrap().tree, true).unwrap();
    let ahead = commit_file(&mut local, "b.txt", "local\n", "ahead");

    let mut remote = Remote::open(&local, upstream_dir.path().to_str().unwrap()).unwrap();
    let report = remote.push(&local, "dev").unwrap();
    assert_eq!(report.old, Some(base));
    assert_eq!(report.new, ahead);
    assert_eq!(report.objects, 3);
    assert_eq!(upstream.refs().resolve(&refs::branch("dev")).unwrap(), ahead);
    assert_eq!(
        local.refs().resolve(&refs::remote_branch(&name, "dev")).unwrap(),
        ahead
    );
    assert_eq!(remote.push(&local, "dev").unwrap().objects, 0);

    // A second clone moves the remote on; the first clone is now behind it.
    let mut other = clone_of(upstream_dir.path(), other_dir.path());
    other.reset(ahead).unwrap();
    other.read_tree(other.store().get_commit(ahead).unwrap().tree, true).unwrap();
    let diverged = commit_file(&mut other, "c.txt", "other\n", "diverged");
    Remote::open(&other, upstream_dir.path().to_str().unwrap())
        .unwrap()
        .push(&other, "dev")
        .unwrap();

    commit_file(&mut local, "b.txt", "changed\n", "local change");
    let objects = object_count(remote.repository());
    match remote.push(&local, "dev") {
        Err(Error::FastForwardRejected { branch, remote: at, .. }) => {
            assert_eq!(branch, "dev");
            assert_eq!(at, diverged);
        }
        result => panic!("expected a rejection, got {:?}", result),
    }
    assert_eq!(upstream.refs().resolve(&refs::branch("dev")).unwrap(), diverged);
    assert_eq!(object_count(&upstream), objects);
}

#[test]
fn test_push_new_branch() {
    let upstream_dir = tempfile::tempdir().unwrap();
    let local_dir = tempfile::tempdir().unwrap();
    Repository::init(upstream_dir.path().to_path_buf()).unwrap();
    let mut local = Repository::init(local_dir.path().to_path_buf()).unwrap();
    let id = commit_file(&mut local, "a.txt", "a\n", "first");

    let mut config = local.config().clone();
    config
        .remotes
        .insert(String::from("origin"), upstream_dir.path().to_path_buf());
    local.set_config(config).unwrap();

    let mut remote = Remote::open(&local, "origin").unwrap();
    assert_eq!(remote.name(), "origin");
    let report = remote.push(&local, "dev").unwrap();
    assert_eq!(report.old, None);
    assert_eq!(report.objects, object_count(&local));
    assert_eq!(remote.repository().head().unwrap(), Some(id));
}

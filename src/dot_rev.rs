use std::{
    collections::BTreeMap,
    fs::{create_dir_all, read_dir, File},
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    merge::{ConflictStyle, MergeDriverKind},
};

/// Name of the marker directory at the top of every working tree.
pub const DOT_REV: &str = ".rev";

/// The branch a fresh repository starts out on.
pub const DEFAULT_BRANCH: &str = "dev";

/// A wrapper for the path of the .rev directory which has a number of utilities defined on it.
#[derive(Debug, Clone)]
pub struct DotRev {
    root: PathBuf,
}

/// Per repository settings, stored as `.rev/config.json`.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Recorded as the author of new commits.
    pub author: String,
    /// Path components skipped when scanning the working tree.
    pub ignores: Vec<String>,
    pub conflict_style: ConflictStyle,
    pub merge_driver: MergeDriverKind,
    /// Named remotes and the working tree paths they live at.
    pub remotes: BTreeMap<String, PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            author: String::from("rev <rev@localhost>"),
            ignores: vec![String::from(".git"), String::from("target")],
            conflict_style: ConflictStyle::default(),
            merge_driver: MergeDriverKind::default(),
            remotes: BTreeMap::new(),
        }
    }
}

impl DotRev {
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Lays out an empty `.rev` directory. Calling this on an existing
    /// repository leaves it untouched.
    pub fn init(root: PathBuf) -> Result<Self> {
        if root.join("config.json").try_exists()? {
            return Ok(Self { root });
        }
        log::info!("initializing repository layout at {:?}", root);
        create_dir_all(root.join("objects"))?;
        create_dir_all(root.join("refs").join("heads"))?;
        create_dir_all(root.join("refs").join("tags"))?;
        let dot_rev = DotRev { root };
        dot_rev.write_config(&Config::default())?;
        Ok(dot_rev)
    }

    pub fn existing(root: PathBuf) -> Result<Self> {
        if read_dir(&root).is_err() || !root.join("objects").is_dir() {
            return Err(Error::NotARepository(root));
        }
        Ok(DotRev { root })
    }

    pub fn objects(&self) -> PathBuf {
        self.root.join("objects")
    }

    pub fn index(&self) -> PathBuf {
        self.root.join("index.json")
    }

    /// Paths that still had conflicts when the pending merge was applied.
    pub fn merge_conflicts(&self) -> PathBuf {
        self.root.join("MERGE_CONFLICTS")
    }

    pub fn config(&self) -> Result<Config> {
        let path = self.root.join("config.json");
        if !path.try_exists()? {
            return Ok(Config::default());
        }
        read_json(&path)
    }

    pub fn write_config(&self, config: &Config) -> Result<()> {
        write_json(config, &self.root.join("config.json"))
    }
}

pub(crate) fn read_json<A: for<'de> Deserialize<'de>>(path: &Path) -> Result<A> {
    Ok(serde_json::from_reader(
        File::options().read(true).open(path)?,
    )?)
}

pub(crate) fn write_json<A: Serialize>(thing: &A, path: &Path) -> Result<()> {
    atomic_write(path, &serde_json::to_vec_pretty(thing)?)
}

/// Writes `data` to a fresh temporary file next to `path` and renames it
/// into place, so readers see either the old file or the new one. Every call
/// gets its own temporary file, so concurrent writers never share one.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::InvalidPath(path.display().to_string()))?;
    create_dir_all(parent)?;
    let mut file = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    file.write_all(data)?;
    file.as_file().sync_data()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

#[test]
fn test_init_is_idempotent() {
    let tempdir = tempfile::tempdir().unwrap();
    let root = tempdir.path().join(DOT_REV);
    let dot_rev = DotRev::init(root.clone()).unwrap();
    let mut config = dot_rev.config().unwrap();
    assert_eq!(config, Config::default());

    config.author = String::from("someone else");
    dot_rev.write_config(&config).unwrap();
    let dot_rev = DotRev::init(root.clone()).unwrap();
    assert_eq!(dot_rev.config().unwrap().author, "someone else");
    assert!(DotRev::existing(root).is_ok());
}

#[test]
fn test_existing_requires_layout() {
    let tempdir = tempfile::tempdir().unwrap();
    assert!(matches!(
        DotRev::existing(tempdir.path().join(DOT_REV)),
        Err(Error::NotARepository(_))
    ));
}

#[test]
fn test_config_fields_default() {
    let config: Config = serde_json::from_str(r#"{"author": "a"}"#).unwrap();
    assert_eq!(config.author, "a");
    assert_eq!(config.ignores, Config::default().ignores);
}

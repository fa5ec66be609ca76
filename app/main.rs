use std::{
    env::current_dir,
    io::{stdout, Write},
    path::PathBuf,
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use rev::{
    error::{Error, Result},
    merge::{ConflictStyle, MergeDriverKind},
    object::ObjectKind,
    object_id::ObjectId,
    object_store::ObjectStore,
    repository::{MergeOutcome, Repository},
};

#[derive(Parser, Debug)]
struct Arguments {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[clap(about = "initialize a brand new repository in the working directory")]
    Init,
    #[clap(about = "print the id a file would be stored under")]
    HashObject {
        path: PathBuf,
        #[arg(short, long, help = "also store the file as a blob")]
        write: bool,
    },
    #[clap(about = "print the raw content of an object")]
    CatFile { name: String },
    #[clap(about = "stage files, or everything under directories")]
    Add { paths: Vec<PathBuf> },
    #[clap(about = "unstage a file, leaving it in the working tree")]
    Rm { path: PathBuf },
    #[clap(about = "write the index as a tree and print its id")]
    WriteTree,
    #[clap(about = "load a tree or a commit's tree into the index")]
    ReadTree {
        name: String,
        #[arg(long, help = "leave the working tree alone")]
        index_only: bool,
    },
    #[clap(about = "record the index as a new commit")]
    Commit {
        #[arg(short, long, help = "message to leave with this commit")]
        message: String,
    },
    #[clap(about = "show the history reachable from a commit")]
    Log {
        #[arg(default_value = "@")]
        name: String,
    },
    #[clap(about = "list branches, or create one")]
    Branch {
        name: Option<String>,
        #[arg(default_value = "@")]
        start: String,
    },
    #[clap(about = "create a tag")]
    Tag {
        name: String,
        #[arg(default_value = "@")]
        start: String,
    },
    #[clap(about = "switch to a branch or detach at a commit")]
    Checkout { name: String },
    #[clap(about = "point the current branch at another commit")]
    Reset { name: String },
    #[clap(about = "merge another commit into HEAD")]
    Merge {
        name: String,
        #[arg(long, help = "include the merge base in conflict hunks")]
        diff3: bool,
        #[arg(long, help = "merge contents with the host's diff3 program")]
        external: bool,
    },
    #[clap(about = "print a common ancestor of two commits")]
    MergeBase { a: String, b: String },
    #[clap(about = "working tree against the index, or between commits")]
    Diff {
        #[arg(num_args = 0..=2)]
        names: Vec<String>,
    },
    #[clap(about = "shows the changed files")]
    Status,
    #[clap(about = "remember another repository under a name")]
    Remote { name: String, path: PathBuf },
    #[clap(about = "copy a remote's branches into refs/remote")]
    Fetch {
        remote: String,
        #[arg(default_value = "", help = "only branches starting with this")]
        selector: String,
    },
    #[clap(about = "send a branch to a remote, fast-forward only")]
    Push {
        remote: String,
        #[arg(help = "defaults to the current branch")]
        branch: Option<String>,
    },
}

/// The tree `name` refers to, directly or through a commit.
fn tree_of(repository: &Repository, name: &str) -> Result<ObjectId> {
    let id = repository.resolve_name(name)?;
    match repository.store().get(id)?.0 {
        ObjectKind::Commit => Ok(repository.store().get_commit(id)?.tree),
        ObjectKind::Tree => Ok(id),
        found => Err(Error::UnexpectedKind {
            id,
            expected: ObjectKind::Tree,
            found,
        }),
    }
}

fn run(args: Arguments) -> Result<()> {
    let dir = current_dir()?;
    if let Command::Init = args.cmd {
        Repository::init(dir.clone())?;
        println!("initialized an empty repository in {}", dir.display());
        return Ok(());
    }
    let mut repository = Repository::discover(&dir)?;

    use Command::*;
    match args.cmd {
        Init => {}
        HashObject { path, write } => {
            let content = std::fs::read(dir.join(path))?;
            let id = if write {
                repository.store_mut().put(ObjectKind::Blob, &content)?
            } else {
                ObjectId::for_object(ObjectKind::Blob, &content)
            };
            println!("{}", id);
        }
        CatFile { name } => {
            let id = repository.resolve_name(&name)?;
            let (_, content) = repository.store().get(id)?;
            stdout().write_all(&content)?;
        }
        Add { paths } => {
            let paths: Vec<PathBuf> = paths.into_iter().map(|p| dir.join(p)).collect();
            for path in repository.add(&paths)? {
                log::info!("staged {}", path);
            }
        }
        Rm { path } => {
            let path = repository.worktree().relative(&dir.join(path))?;
            if !repository.remove_from_index(&path)? {
                eprintln!("{} was not staged", path);
            }
        }
        WriteTree => println!("{}", repository.write_tree()?),
        ReadTree { name, index_only } => {
            let tree = tree_of(&repository, &name)?;
            repository.read_tree(tree, !index_only)?;
        }
        Commit { message } => {
            let id = repository.commit(&message)?;
            let branch = repository.current_branch()?;
            println!("[{}] {}", branch.as_deref().unwrap_or("detached"), id);
        }
        Log { name } => {
            let start = repository.resolve_name(&name)?;
            for entry in repository.log(start) {
                let (id, commit) = entry?;
                println!("commit {}", id);
                if commit.parents.len() > 1 {
                    let parents: Vec<String> =
                        commit.parents.iter().map(ToString::to_string).collect();
                    println!("Merge: {}", parents.join(" "));
                }
                println!("Author: {}", commit.author);
                println!("Date: {}", commit.timestamp);
                println!();
                for line in commit.message.lines() {
                    println!("    {}", line);
                }
                println!();
            }
        }
        Branch { name: None, .. } => {
            let current = repository.current_branch()?;
            for branch in repository.branch_names()? {
                let marker = if current.as_ref() == Some(&branch) { '*' } else { ' ' };
                println!("{} {}", marker, branch);
            }
        }
        Branch {
            name: Some(name),
            start,
        } => {
            let id = repository.resolve_name(&start)?;
            repository.create_branch(&name, id)?;
        }
        Tag { name, start } => {
            let id = repository.resolve_name(&start)?;
            repository.create_tag(&name, id)?;
        }
        Checkout { name } => {
            let id = repository.checkout(&name)?;
            match repository.current_branch()? {
                Some(branch) => println!("switched to {}", branch),
                None => println!("HEAD is now at {}", id),
            }
        }
        Reset { name } => {
            let id = repository.resolve_name(&name)?;
            repository.reset(id)?;
        }
        Merge {
            name,
            diff3,
            external,
        } => {
            let config = repository.config();
            let style = if diff3 {
                ConflictStyle::Diff3
            } else {
                config.conflict_style
            };
            let kind = if external {
                MergeDriverKind::Diff3
            } else {
                config.merge_driver
            };
            let driver = kind.driver(style);
            match repository.merge_with(&name, driver.as_ref())? {
                MergeOutcome::UpToDate => println!("already up to date"),
                MergeOutcome::FastForward(id) => println!("fast-forward to {}", id),
                MergeOutcome::Merged { conflicts, .. } if conflicts.is_empty() => {
                    println!("merged cleanly; commit to conclude the merge")
                }
                MergeOutcome::Merged { conflicts, .. } => {
                    for path in conflicts {
                        println!("CONFLICT {}", path);
                    }
                    println!("resolve the conflicts, add the files and commit");
                }
            }
        }
        MergeBase { a, b } => {
            let a = repository.resolve_name(&a)?;
            let b = repository.resolve_name(&b)?;
            match repository.merge_base(a, b)? {
                Some(base) => println!("{}", base),
                None => eprintln!("no common ancestor"),
            }
        }
        Diff { names } => {
            let changes = match names.as_slice() {
                [] => repository.diff_working()?,
                [name] => {
                    repository.diff_trees(tree_of(&repository, name)?, tree_of(&repository, "@")?)?
                }
                [a, b, ..] => {
                    repository.diff_trees(tree_of(&repository, a)?, tree_of(&repository, b)?)?
                }
            };
            for change in changes {
                print!("{}", change);
            }
        }
        Status => {
            let status = repository.status()?;
            match (&status.branch, status.head) {
                (Some(branch), _) => println!("on branch {}", branch),
                (None, Some(head)) => println!("HEAD detached at {}", head),
                (None, None) => println!("HEAD points nowhere"),
            }
            if let Some(other) = status.merging {
                println!("merging {}", other);
            }
            for (path, kind) in &status.staged {
                println!("staged    {:?} {}", kind, path);
            }
            for (path, kind) in &status.unstaged {
                println!("unstaged  {:?} {}", kind, path);
            }
            for path in &status.untracked {
                println!("untracked {}", path);
            }
        }
        Remote { name, path } => {
            let mut config = repository.config().clone();
            config.remotes.insert(name, path);
            repository.set_config(config)?;
        }
        Fetch { remote, selector } => {
            let remote = rev::remote::Remote::open(&repository, &remote)?;
            let report = remote.fetch(&mut repository, &selector)?;
            for (name, id) in &report.updated {
                println!("{} -> {}", name, id);
            }
            println!("fetched {} objects", report.objects);
        }
        Push { remote, branch } => {
            let branch = match branch.map_or_else(|| repository.current_branch(), |b| Ok(Some(b)))? {
                Some(branch) => branch,
                None => return Err(Error::UnknownName(String::from("HEAD is detached"))),
            };
            let mut remote = rev::remote::Remote::open(&repository, &remote)?;
            let report = remote.push(&repository, &branch)?;
            println!(
                "{}: {} -> {} ({} objects)",
                report.branch,
                report
                    .old
                    .map_or_else(|| String::from("(new)"), |id| id.to_string()),
                report.new,
                report.objects
            );
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run(Arguments::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

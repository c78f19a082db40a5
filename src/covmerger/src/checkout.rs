// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! File versions read from git working trees.
//!
//! Layout under the working directory:
//!
//! ```text
//! clones/<repo slug>/     one clone per repository, never checked out
//! repos/<commit>/         working tree of one commit
//! ```

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::OnceCell;

use crate::provider::{FileContent, FileVersionProvider, FileVersions};
use crate::repo::RepoCommit;

const CLONES_DIR: &str = "clones";
const TREES_DIR: &str = "repos";

pub struct CheckoutProvider {
    workdir: PathBuf,

    /// Read pre-staged trees under `repos/<commit>` and never run git.
    skip_checkout: bool,

    clones: Mutex<HashMap<String, Arc<RepoClone>>>,
    trees: Mutex<HashMap<String, Arc<OnceCell<PathBuf>>>>,
}

struct RepoClone {
    url: String,
    path: PathBuf,
    cloned: OnceCell<()>,

    /// Serializes fetches and worktree updates of the clone.
    lock: tokio::sync::Mutex<()>,
}

impl CheckoutProvider {
    /// A relative `workdir` is resolved against the current directory.
    pub fn new(workdir: impl Into<PathBuf>, skip_checkout: bool) -> Result<Self> {
        let workdir = workdir.into();

        // git runs inside the clone, so every path handed to it must be absolute.
        let workdir = if workdir.is_absolute() {
            workdir
        } else {
            std::env::current_dir()
                .context("unable to resolve relative workdir")?
                .join(workdir)
        };

        Ok(Self {
            workdir,
            skip_checkout,
            clones: Mutex::new(HashMap::new()),
            trees: Mutex::new(HashMap::new()),
        })
    }

    /// Directory holding the working tree of `commit`.
    pub fn tree_dir(&self, commit: &str) -> Result<PathBuf> {
        validate_commit(commit)?;
        Ok(self.workdir.join(TREES_DIR).join(commit))
    }

    async fn tree(&self, repo_commit: &RepoCommit) -> Result<PathBuf> {
        let dir = self.tree_dir(&repo_commit.commit)?;

        if self.skip_checkout {
            return Ok(dir);
        }

        let cell = {
            let mut trees = self.trees.lock().unwrap_or_else(|e| e.into_inner());
            trees.entry(repo_commit.commit.clone()).or_default().clone()
        };

        let dir = cell
            .get_or_try_init(|| self.materialize(repo_commit, dir))
            .await?;

        Ok(dir.clone())
    }

    async fn materialize(&self, repo_commit: &RepoCommit, dir: PathBuf) -> Result<PathBuf> {
        if exists(dir.join(".git")).await? {
            debug!("reusing working tree {}", dir.display());
            return Ok(dir);
        }

        let clone = self.clone_of(&repo_commit.repo).await?;
        let _guard = clone.lock.lock().await;

        let commit = &repo_commit.commit;
        let object = format!("{}^{{commit}}", commit);

        if git(&clone.path, ["cat-file", "-e", object.as_str()]).await.is_err() {
            info!("fetching {} into {}", repo_commit, clone.path.display());
            git(&clone.path, ["fetch", "--quiet", "origin", commit.as_str()])
                .await
                .with_context(|| format!("unable to fetch {}", repo_commit))?;
        }

        info!("checking out {} to {}", repo_commit, dir.display());
        git(
            &clone.path,
            [
                OsStr::new("worktree"),
                OsStr::new("add"),
                OsStr::new("--detach"),
                OsStr::new("--force"),
                dir.as_os_str(),
                OsStr::new(commit),
            ],
        )
        .await
        .with_context(|| format!("unable to check out {}", repo_commit))?;

        Ok(dir)
    }

    async fn clone_of(&self, url: &str) -> Result<Arc<RepoClone>> {
        let clone = {
            let mut clones = self.clones.lock().unwrap_or_else(|e| e.into_inner());
            clones
                .entry(url.to_owned())
                .or_insert_with(|| {
                    Arc::new(RepoClone {
                        url: url.to_owned(),
                        path: self.workdir.join(CLONES_DIR).join(slug(url)),
                        cloned: OnceCell::new(),
                        lock: tokio::sync::Mutex::new(()),
                    })
                })
                .clone()
        };

        clone
            .cloned
            .get_or_try_init(|| async {
                if exists(clone.path.join(".git")).await? {
                    return Ok(());
                }

                let parent = self.workdir.join(CLONES_DIR);
                fs::create_dir_all(&parent)
                    .await
                    .with_context(|| format!("unable to create {}", parent.display()))?;

                info!("cloning {} to {}", clone.url, clone.path.display());
                git(
                    &parent,
                    [
                        OsStr::new("clone"),
                        OsStr::new("--quiet"),
                        OsStr::new("--no-checkout"),
                        OsStr::new("--"),
                        OsStr::new(&clone.url),
                        clone.path.as_os_str(),
                    ],
                )
                .await
                .with_context(|| format!("unable to clone {}", clone.url))
            })
            .await?;

        Ok(clone)
    }

    async fn read(
        &self,
        repo_commit: &RepoCommit,
        file_path: &Path,
    ) -> Result<Option<FileContent>> {
        let tree = self.tree(repo_commit).await?;
        let path = tree.join(file_path);

        match fs::read(&path).await {
            Ok(data) => Ok(Some(FileContent::new(data))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                if is_shadowed(&tree, file_path).await {
                    return Ok(None);
                }

                Err(err).with_context(|| format!("unable to read {}", path.display()))
            }
        }
    }
}

#[async_trait]
impl FileVersionProvider for CheckoutProvider {
    async fn file_versions(
        &self,
        file_path: &str,
        repo_commits: &[RepoCommit],
    ) -> Result<FileVersions> {
        let relative = relative_path(file_path)?;

        let reads = repo_commits.iter().map(|repo_commit| async move {
            let content = self.read(repo_commit, relative).await?;
            Ok::<_, anyhow::Error>((repo_commit.clone(), content))
        });

        Ok(try_join_all(reads).await?.into_iter().collect())
    }
}

async fn git<I, S>(dir: &Path, args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
    let description = args.iter().fold("git".to_owned(), |mut line, arg| {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
        line
    });

    debug!("running `{}` in {}", description, dir.display());

    let output = Command::new("git")
        .args(&args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("command failed to start: {}", description))?
        .wait_with_output()
        .await
        .with_context(|| format!("command failed to run: {}", description))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("'{}' failed: {}: {}", description, output.status, stderr.trim());
    }

    Ok(())
}

async fn exists(path: impl AsRef<Path>) -> Result<bool> {
    match fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Whether `file_path` cannot exist in `tree` as a file: a directory sits at its place,
/// or a file sits where one of its parent directories should be.
async fn is_shadowed(tree: &Path, file_path: &Path) -> bool {
    let components: Vec<_> = file_path.components().collect();
    let mut prefix = tree.to_owned();

    for (index, component) in components.iter().enumerate() {
        prefix.push(component);
        let is_last = index + 1 == components.len();

        if let Ok(metadata) = fs::metadata(&prefix).await {
            if metadata.is_dir() == is_last {
                return true;
            }
        }
    }

    false
}

fn validate_commit(commit: &str) -> Result<()> {
    let valid = !commit.is_empty()
        && !commit.starts_with(['-', '.'])
        && commit
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if !valid {
        bail!("invalid commit identifier: {:?}", commit);
    }

    Ok(())
}

fn relative_path(file_path: &str) -> Result<&Path> {
    let path = Path::new(file_path);

    let valid = path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir));

    if !valid {
        bail!("source file path must be relative to the tree root: {:?}", file_path);
    }

    Ok(path)
}

/// Directory name for a repository URL.
fn slug(url: &str) -> String {
    url.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::repo::RepoCommit;

/// Immutable content of one file at one commit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileContent(Arc<[u8]>);

impl FileContent {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        let data: Vec<u8> = data.into();
        Self(data.into())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// The content as text, or `None` if it looks binary.
    pub fn text(&self) -> Option<&str> {
        if self.0.contains(&0) {
            return None;
        }

        std::str::from_utf8(&self.0).ok()
    }

    /// Lines of text content, first line at index 0.
    pub fn lines(&self) -> Option<Vec<&str>> {
        self.text().map(|text| text.lines().collect())
    }
}

impl From<&str> for FileContent {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for FileContent {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// Content of a single file across commits.
///
/// `None` means the file does not exist at that commit. A commit without an entry has not
/// been resolved.
pub type FileVersions = HashMap<RepoCommit, Option<FileContent>>;

#[async_trait]
pub trait FileVersionProvider: Send + Sync {
    /// Resolve `file_path` at every commit of `repo_commits`.
    ///
    /// The result must hold an entry for each requested commit.
    async fn file_versions(
        &self,
        file_path: &str,
        repo_commits: &[RepoCommit],
    ) -> Result<FileVersions>;
}

/// Serves repeated `(commit, path)` requests from memory.
///
/// Intended to live for a single merge run.
pub struct CachedProvider {
    inner: Arc<dyn FileVersionProvider>,
    cached: Mutex<HashMap<(RepoCommit, String), Option<FileContent>>>,
}

impl CachedProvider {
    pub fn new(inner: Arc<dyn FileVersionProvider>) -> Self {
        let cached = Mutex::new(HashMap::new());

        Self { inner, cached }
    }

    fn lookup(
        &self,
        file_path: &str,
        repo_commits: &[RepoCommit],
    ) -> (FileVersions, Vec<RepoCommit>) {
        let mut hits = FileVersions::new();
        let mut misses = vec![];
        let mut seen = HashSet::new();

        let cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());

        for repo_commit in repo_commits {
            if !seen.insert(repo_commit) {
                continue;
            }

            match cached.get(&(repo_commit.clone(), file_path.to_owned())) {
                Some(version) => {
                    hits.insert(repo_commit.clone(), version.clone());
                }
                None => misses.push(repo_commit.clone()),
            }
        }

        (hits, misses)
    }
}

#[async_trait]
impl FileVersionProvider for CachedProvider {
    async fn file_versions(
        &self,
        file_path: &str,
        repo_commits: &[RepoCommit],
    ) -> Result<FileVersions> {
        let (mut versions, misses) = self.lookup(file_path, repo_commits);

        if misses.is_empty() {
            return Ok(versions);
        }

        let mut fetched = self.inner.file_versions(file_path, &misses).await?;

        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());

        for repo_commit in misses {
            let version = fetched.remove(&repo_commit).ok_or_else(|| {
                format_err!("provider did not resolve `{}` at {}", file_path, repo_commit)
            })?;

            cached.insert((repo_commit.clone(), file_path.to_owned()), version.clone());
            versions.insert(repo_commit, version);
        }

        Ok(versions)
    }
}

/// Canned file versions held in memory.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    files: HashMap<(RepoCommit, String), FileContent>,
    requests: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        repo_commit: &RepoCommit,
        file_path: impl Into<String>,
        content: impl Into<FileContent>,
    ) {
        self.files
            .insert((repo_commit.clone(), file_path.into()), content.into());
    }

    pub fn with_file(
        mut self,
        repo_commit: &RepoCommit,
        file_path: impl Into<String>,
        content: impl Into<FileContent>,
    ) -> Self {
        self.insert(repo_commit, file_path, content);
        self
    }

    /// Number of `(commit, path)` pairs requested so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileVersionProvider for MemoryProvider {
    async fn file_versions(
        &self,
        file_path: &str,
        repo_commits: &[RepoCommit],
    ) -> Result<FileVersions> {
        self.requests.fetch_add(repo_commits.len(), Ordering::SeqCst);

        let versions = repo_commits
            .iter()
            .map(|rc| {
                let content = self.files.get(&(rc.clone(), file_path.to_owned())).cloned();
                (rc.clone(), content)
            })
            .collect();

        Ok(versions)
    }
}

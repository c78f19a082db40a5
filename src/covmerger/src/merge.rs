// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::task::{spawn_blocking, JoinSet};

use crate::aggregate::aggregate;
use crate::checkout::CheckoutProvider;
use crate::provider::{CachedProvider, FileVersionProvider};
use crate::record::{records, RecordError, SampleRecord};
use crate::repo::RepoCommit;
use crate::source::{MergeResult, MergeSummary};

/// Samples of every input file, keyed by file path.
pub type FileGroups = BTreeMap<String, Vec<SampleRecord>>;

/// Merged coverage of every input file, keyed by file path.
pub type MergeResults = BTreeMap<String, MergeResult>;

fn default_jobs() -> usize {
    num_cpus::get()
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Scratch space for clones and working trees.
    pub workdir: PathBuf,

    /// Commit whose line numbers the merged coverage is expressed in.
    pub base: RepoCommit,

    /// Maximum number of files merged concurrently.
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Read pre-staged working trees from `<workdir>/repos/<commit>` instead of running git.
    #[serde(default)]
    pub skip_checkout: bool,
}

impl Config {
    pub fn new(workdir: impl Into<PathBuf>, base: RepoCommit) -> Self {
        Self {
            workdir: workdir.into(),
            base,
            jobs: default_jobs(),
            skip_checkout: false,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let file = File::open(path)
            .with_context(|| format!("unable to open config file: {}", path.display()))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("unable to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            bail!("`jobs` must be at least 1");
        }

        if self.base.repo.is_empty() || self.base.commit.is_empty() {
            bail!("base repository and commit must be set");
        }

        Ok(())
    }
}

pub struct Merger {
    config: Config,
    provider: Arc<dyn FileVersionProvider>,
}

impl Merger {
    /// Merger reading file versions from git working trees under the configured workdir.
    pub fn new(config: Config) -> Result<Self> {
        let provider = Arc::new(CheckoutProvider::new(
            &config.workdir,
            config.skip_checkout,
        )?);

        Self::with_provider(config, provider)
    }

    pub fn with_provider(config: Config, provider: Arc<dyn FileVersionProvider>) -> Result<Self> {
        config.validate()?;

        Ok(Self { config, provider })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Merge a CSV coverage table. Any malformed row fails the whole merge.
    pub async fn merge_csv<R>(&self, reader: R) -> Result<MergeResults>
    where
        R: Read + Send + 'static,
    {
        let groups = spawn_blocking(move || group_csv(reader)).await??;

        self.merge_groups(groups).await
    }

    pub async fn merge_records(
        &self,
        records: impl IntoIterator<Item = SampleRecord>,
    ) -> Result<MergeResults> {
        self.merge_groups(group_records(records)).await
    }

    pub async fn merge_groups(&self, groups: FileGroups) -> Result<MergeResults> {
        let base = &self.config.base;

        info!(
            "merging coverage of {} files onto {} with {} jobs",
            groups.len(),
            base,
            self.config.jobs
        );

        // Scoped to this run, so repeated lookups never outlive it.
        let provider = Arc::new(CachedProvider::new(self.provider.clone()));

        // Dropping the set aborts every file still in flight when one fails.
        let mut tasks = JoinSet::new();
        let mut pending = groups.into_iter();
        let mut results = MergeResults::new();

        loop {
            while tasks.len() < self.config.jobs {
                let Some((file_path, samples)) = pending.next() else {
                    break;
                };

                tasks.spawn(merge_file(base.clone(), provider.clone(), file_path, samples));
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            let (file_path, result) = joined??;
            results.insert(file_path, result);
        }

        info!("merged coverage: {}", MergeSummary::from_results(results.values()));

        Ok(results)
    }
}

/// Merge a CSV coverage table with an explicit file version provider.
pub async fn merge_csv_data<R>(
    config: Config,
    provider: Arc<dyn FileVersionProvider>,
    reader: R,
) -> Result<MergeResults>
where
    R: Read + Send + 'static,
{
    Merger::with_provider(config, provider)?
        .merge_csv(reader)
        .await
}

pub fn group_records(records: impl IntoIterator<Item = SampleRecord>) -> FileGroups {
    let mut groups = FileGroups::new();

    for record in records {
        groups
            .entry(record.file_path.clone())
            .or_default()
            .push(record);
    }

    groups
}

fn group_csv(reader: impl Read) -> Result<FileGroups, RecordError> {
    let mut groups = FileGroups::new();
    let mut count = 0usize;

    for record in records(reader) {
        let record = record?;
        count += 1;

        groups
            .entry(record.file_path.clone())
            .or_default()
            .push(record);
    }

    info!("read {} coverage records for {} files", count, groups.len());

    Ok(groups)
}

async fn merge_file(
    base: RepoCommit,
    provider: Arc<CachedProvider>,
    file_path: String,
    samples: Vec<SampleRecord>,
) -> Result<(String, MergeResult)> {
    let mut repo_commits: BTreeSet<RepoCommit> =
        samples.iter().map(SampleRecord::repo_commit).collect();
    repo_commits.insert(base.clone());
    let repo_commits: Vec<RepoCommit> = repo_commits.into_iter().collect();

    debug!(
        "merging {} samples of `{}` from {} commits",
        samples.len(),
        file_path,
        repo_commits.len()
    );

    let result = async {
        let versions = provider.file_versions(&file_path, &repo_commits).await?;

        spawn_blocking(move || aggregate(&base, &samples, &versions)).await?
    }
    .await;

    match result {
        Ok(result) => Ok((file_path, result)),
        Err(err) => {
            error!("failed to merge coverage of `{}`: {:?}", file_path, err);
            Err(err.context(format!("failed to merge coverage of `{}`", file_path)))
        }
    }
}

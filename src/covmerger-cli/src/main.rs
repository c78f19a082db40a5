// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate anyhow;

#[macro_use]
extern crate log;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{stdin, stdout, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use covmerger::source::FileStats;
use covmerger::{Config, Merger, RepoCommit};
use covmerger_file_format::merge::MergeReportJson;

/// Merge line coverage sampled at many commits onto a single base commit.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// JSON configuration file. Flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Scratch directory for clones and working trees.
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Repository of the base commit.
    #[arg(long)]
    repo: Option<String>,

    /// Base commit that merged line numbers refer to.
    #[arg(long)]
    commit: Option<String>,

    /// Number of files merged concurrently. Defaults to the number of CPUs.
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Read pre-staged trees from `<workdir>/repos/<commit>` instead of running git.
    #[arg(long)]
    skip_checkout: bool,

    /// CSV coverage table, `-` for stdin.
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Merged JSON report, `-` for stdout.
    #[arg(short, long, default_value = "-")]
    output: String,

    /// Also print per-file line statistics to stderr.
    #[arg(long)]
    stats: bool,
}

impl Args {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => {
                let workdir = self
                    .workdir
                    .clone()
                    .ok_or_else(|| format_err!("either --config or --workdir is required"))?;
                let (repo, commit) = match (&self.repo, &self.commit) {
                    (Some(repo), Some(commit)) => (repo, commit),
                    _ => bail!("--repo and --commit are required without --config"),
                };

                Config::new(workdir, RepoCommit::new(repo, commit))
            }
        };

        if let Some(workdir) = &self.workdir {
            config.workdir = workdir.clone();
        }

        if let Some(repo) = &self.repo {
            config.base.repo = repo.clone();
        }

        if let Some(commit) = &self.commit {
            config.base.commit = commit.clone();
        }

        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }

        config.skip_checkout |= self.skip_checkout;

        Ok(config)
    }

    fn open_input(&self) -> Result<Box<dyn Read + Send>> {
        if self.input == "-" {
            return Ok(Box::new(stdin()));
        }

        let file = File::open(&self.input)
            .with_context(|| format!("unable to open input: {}", self.input))?;

        Ok(Box::new(BufReader::new(file)))
    }

    fn open_output(&self) -> Result<Box<dyn Write>> {
        if self.output == "-" {
            return Ok(Box::new(stdout()));
        }

        let file = File::create(&self.output)
            .with_context(|| format!("unable to create output: {}", self.output))?;

        Ok(Box::new(BufWriter::new(file)))
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = args.load_config()?;
    let input = args.open_input()?;

    let runtime = tokio::runtime::Runtime::new()?;
    let results = runtime.block_on(async {
        let merger = Merger::new(config)?;
        merger.merge_csv(input).await
    })?;

    let report = MergeReportJson::from(&results);

    let mut output = args.open_output()?;
    serde_json::to_writer_pretty(&mut output, &report)?;
    writeln!(output)?;
    output.flush()?;

    if args.stats {
        let stats: BTreeMap<&String, Option<FileStats>> = results
            .iter()
            .map(|(file, result)| (file, result.stats()))
            .collect();

        eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    }

    info!("wrote coverage of {} files to {}", results.len(), args.output);

    Ok(())
}

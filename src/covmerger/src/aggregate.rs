// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;

use crate::correlate::{correlate_lines, LineMapping};
use crate::provider::FileVersions;
use crate::record::SampleRecord;
use crate::repo::RepoCommit;
use crate::source::{Count, Line, MergeResult};

/// How lines of one commit's version of a file land on the base version.
#[derive(Debug)]
enum CommitMapping {
    /// Same text as base. Lines past the end of the base file have no counterpart.
    Identity { base_lines: usize },

    Lines {
        mapping: LineMapping,
        source_lines: usize,
    },

    /// The file is absent or not text at this commit.
    Unmatched,
}

impl CommitMapping {
    fn to_base(&self, line: Line) -> Option<Line> {
        match self {
            Self::Identity { base_lines } => (line.index() < *base_lines).then_some(line),
            Self::Lines { mapping, .. } => mapping.get(line),
            Self::Unmatched => None,
        }
    }

    /// Number of lines in this commit's version that can have a counterpart.
    fn line_count(&self) -> usize {
        match self {
            Self::Identity { base_lines } => *base_lines,
            Self::Lines { source_lines, .. } => *source_lines,
            Self::Unmatched => 0,
        }
    }
}

/// Fold every sample of one file into base-relative hit counts.
///
/// `versions` must hold the file's content at `base` and at every commit referenced by
/// `samples`.
pub fn aggregate(
    base: &RepoCommit,
    samples: &[SampleRecord],
    versions: &FileVersions,
) -> Result<MergeResult> {
    let base_version = versions
        .get(base)
        .ok_or_else(|| format_err!("content at base commit {} was not resolved", base))?;

    let base_lines = match base_version.as_ref().and_then(|content| content.lines()) {
        Some(lines) => lines,
        None => return Ok(MergeResult::missing()),
    };

    let mut mappings: HashMap<RepoCommit, CommitMapping> = HashMap::new();
    let mut hit_counts: BTreeMap<Line, Count> = BTreeMap::new();

    for sample in samples {
        let repo_commit = sample.repo_commit();

        if !mappings.contains_key(&repo_commit) {
            let mapping = if sample.is_from(base) {
                CommitMapping::Identity {
                    base_lines: base_lines.len(),
                }
            } else {
                let version = versions.get(&repo_commit).ok_or_else(|| {
                    format_err!("content at commit {} was not resolved", repo_commit)
                })?;

                match version.as_ref().and_then(|content| content.lines()) {
                    Some(lines) if lines == base_lines => CommitMapping::Identity {
                        base_lines: base_lines.len(),
                    },
                    Some(lines) => CommitMapping::Lines {
                        mapping: correlate_lines(&lines, &base_lines),
                        source_lines: lines.len(),
                    },
                    None => CommitMapping::Unmatched,
                }
            };

            trace!("mapped {} lines of commit {}", describe(&mapping), repo_commit);
            mappings.insert(repo_commit.clone(), mapping);
        }

        let mapping = &mappings[&repo_commit];

        for line in sample.lines_within(mapping.line_count()) {
            if let Some(base_line) = mapping.to_base(line) {
                hit_counts.entry(base_line).or_default().add(sample.hit_count);
            }
        }
    }

    Ok(MergeResult::existing(hit_counts))
}

fn describe(mapping: &CommitMapping) -> String {
    match mapping {
        CommitMapping::Identity { base_lines } => format!("all {}", base_lines),
        CommitMapping::Lines { mapping, .. } => mapping.len().to_string(),
        CommitMapping::Unmatched => "none".to_owned(),
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::Read;

use serde::Deserialize;
use thiserror::Error;

use crate::repo::RepoCommit;
use crate::source::Line;

/// End line value meaning "the record covers its start line only".
pub const END_LINE_SAME_AS_START: i64 = -1;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("unable to decode coverage row {row}")]
    Decode { row: u64, source: csv::Error },

    #[error("row {row}: empty `{field}` field")]
    EmptyField { row: u64, field: &'static str },

    #[error("row {row}: invalid start line {value}")]
    StartLine { row: u64, value: i64 },

    #[error("row {row}: end line {end} precedes start line {start}")]
    EndLine { row: u64, start: u32, end: i64 },

    #[error("row {row}: negative hit count {value}")]
    HitCount { row: u64, value: i64 },
}

/// Column layout of the exported coverage table.
#[derive(Debug, Deserialize)]
struct CoverageRow {
    timestamp: String,
    version: String,
    fuzzing_minutes: i64,
    arch: String,
    build_id: String,
    manager: String,
    kernel_repo: String,
    kernel_branch: String,
    kernel_commit: String,
    file_path: String,
    func_name: String,
    sl: i64,
    sc: i64,
    el: i64,
    ec: i64,
    hit_count: i64,
    inline: bool,
    pc: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EndLine {
    SameAsStart,
    Line(u32),
}

/// A single coverage observation, attributed to a source range at one commit.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SampleRecord {
    pub timestamp: String,
    pub version: String,
    pub fuzzing_minutes: i64,
    pub arch: String,
    pub build_id: String,
    pub manager: String,

    pub repo: String,
    pub branch: String,
    pub commit: String,

    /// Path relative to the root of the source tree.
    pub file_path: String,
    pub func_name: String,

    /// Raw start line. Line 0 is accepted but never attributed.
    pub start_line: u32,
    pub start_col: i64,
    pub end_line: EndLine,
    pub end_col: i64,

    pub hit_count: u64,
    pub inline: bool,
    pub pc: u64,
}

impl SampleRecord {
    /// Minimal record for the fields that drive merging. Metadata is left empty.
    pub fn new(
        repo_commit: &RepoCommit,
        file_path: impl Into<String>,
        start_line: u32,
        end_line: EndLine,
        hit_count: u64,
    ) -> Self {
        Self {
            timestamp: String::new(),
            version: String::new(),
            fuzzing_minutes: 0,
            arch: String::new(),
            build_id: String::new(),
            manager: String::new(),
            repo: repo_commit.repo.clone(),
            branch: String::new(),
            commit: repo_commit.commit.clone(),
            file_path: file_path.into(),
            func_name: String::new(),
            start_line,
            start_col: 0,
            end_line,
            end_col: -1,
            hit_count,
            inline: false,
            pc: 0,
        }
    }

    pub fn repo_commit(&self) -> RepoCommit {
        RepoCommit::new(&self.repo, &self.commit)
    }

    pub fn is_from(&self, repo_commit: &RepoCommit) -> bool {
        self.repo == repo_commit.repo && self.commit == repo_commit.commit
    }

    /// Every line credited by this record.
    ///
    /// A multi-line range credits each line of the inclusive range.
    pub fn lines(&self) -> impl Iterator<Item = Line> {
        self.lines_within(u32::MAX as usize)
    }

    /// Lines credited by this record in a file of `line_count` lines.
    pub fn lines_within(&self, line_count: usize) -> impl Iterator<Item = Line> {
        let end = match self.end_line {
            EndLine::SameAsStart => self.start_line,
            EndLine::Line(end) => end,
        };
        let last = end.min(u32::try_from(line_count).unwrap_or(u32::MAX));

        (self.start_line.max(1)..=last).filter_map(|n| Line::new(n).ok())
    }

    fn from_row(row: u64, raw: CoverageRow) -> Result<Self, RecordError> {
        for (field, value) in [
            ("file_path", &raw.file_path),
            ("kernel_repo", &raw.kernel_repo),
            ("kernel_commit", &raw.kernel_commit),
        ] {
            if value.is_empty() {
                return Err(RecordError::EmptyField { row, field });
            }
        }

        let start_line = u32::try_from(raw.sl)
            .map_err(|_| RecordError::StartLine { row, value: raw.sl })?;

        let end_line = if raw.el == END_LINE_SAME_AS_START {
            EndLine::SameAsStart
        } else {
            match u32::try_from(raw.el) {
                Ok(end) if end >= start_line => EndLine::Line(end),
                _ => {
                    return Err(RecordError::EndLine {
                        row,
                        start: start_line,
                        end: raw.el,
                    })
                }
            }
        };

        let hit_count = u64::try_from(raw.hit_count).map_err(|_| RecordError::HitCount {
            row,
            value: raw.hit_count,
        })?;

        Ok(Self {
            timestamp: raw.timestamp,
            version: raw.version,
            fuzzing_minutes: raw.fuzzing_minutes,
            arch: raw.arch,
            build_id: raw.build_id,
            manager: raw.manager,
            repo: raw.kernel_repo,
            branch: raw.kernel_branch,
            commit: raw.kernel_commit,
            file_path: raw.file_path,
            func_name: raw.func_name,
            start_line,
            start_col: raw.sc,
            end_line,
            end_col: raw.ec,
            hit_count,
            inline: raw.inline,
            pc: raw.pc,
        })
    }
}

/// Streams CSV rows (with header) as validated records.
///
/// Rows are numbered from 1, not counting the header.
pub fn records<R: Read>(reader: R) -> impl Iterator<Item = Result<SampleRecord, RecordError>> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    reader
        .into_deserialize::<CoverageRow>()
        .zip(1u64..)
        .map(|(raw, row)| {
            let raw = raw.map_err(|source| RecordError::Decode { row, source })?;
            SampleRecord::from_row(row, raw)
        })
}

/// Decodes every row, failing on the first malformed one.
pub fn read_records<R: Read>(reader: R) -> Result<Vec<SampleRecord>, RecordError> {
    records(reader).collect()
}

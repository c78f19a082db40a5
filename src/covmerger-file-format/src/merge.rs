// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;

use anyhow::Result;
use covmerger::{Count, Line, MergeResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type SourceFile = String;
pub type LineNumber = u32;
pub type HitCount = u64;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("`{file}` does not exist at base but has hit counts")]
    HitCountsOnMissingFile { file: SourceFile },

    #[error("`{file}` has hit counts for line 0")]
    ZeroLine { file: SourceFile },
}

/// Merged coverage report, keyed by source file path.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MergeReportJson {
    pub files: BTreeMap<SourceFile, MergeResultJson>,
}

/// `{"FileExists": false}` or `{"HitCounts": {"<line>": <count>, ..}, "FileExists": true}`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct MergeResultJson {
    #[serde(
        rename = "HitCounts",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub hit_counts: Option<BTreeMap<LineNumber, HitCount>>,

    #[serde(rename = "FileExists")]
    pub file_exists: bool,
}

impl MergeReportJson {
    pub fn deserialize(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_string_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl From<&MergeResult> for MergeResultJson {
    fn from(result: &MergeResult) -> Self {
        let hit_counts = result.hit_counts.as_ref().map(|counts| {
            counts
                .iter()
                .map(|(line, count)| (line.number(), count.0))
                .collect()
        });

        Self {
            file_exists: hit_counts.is_some(),
            hit_counts,
        }
    }
}

impl From<&BTreeMap<String, MergeResult>> for MergeReportJson {
    fn from(results: &BTreeMap<String, MergeResult>) -> Self {
        let files = results
            .iter()
            .map(|(file, result)| (file.clone(), MergeResultJson::from(result)))
            .collect();

        Self { files }
    }
}

impl MergeResultJson {
    fn into_result(self, file: &str) -> Result<MergeResult, FormatError> {
        if !self.file_exists {
            if self.hit_counts.is_some() {
                return Err(FormatError::HitCountsOnMissingFile { file: file.into() });
            }

            return Ok(MergeResult::missing());
        }

        // Written by tools that omit an empty table.
        let json_counts = self.hit_counts.unwrap_or_default();

        let mut hit_counts = BTreeMap::new();

        for (line_number, count) in json_counts {
            let line = Line::new(line_number)
                .map_err(|_| FormatError::ZeroLine { file: file.into() })?;
            hit_counts.insert(line, Count(count));
        }

        Ok(MergeResult::existing(hit_counts))
    }
}

impl MergeReportJson {
    /// Validate and convert into per-file merge results.
    pub fn into_results(self) -> Result<BTreeMap<String, MergeResult>, FormatError> {
        let mut results = BTreeMap::new();

        for (file, result_json) in self.files {
            let result = result_json.into_result(&file)?;
            results.insert(file, result);
        }

        Ok(results)
    }
}

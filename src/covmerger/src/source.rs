// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// 1-indexed source line number.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Line(u32);

impl Line {
    pub fn new(number: u32) -> Result<Self> {
        if number == 0 {
            bail!("source lines must be 1-indexed");
        }

        Ok(Self(number))
    }

    pub fn number(&self) -> u32 {
        self.0
    }

    /// Zero-based position of the line in a split file.
    pub fn index(&self) -> usize {
        (self.0 - 1) as usize
    }

    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32 + 1)
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Accumulated execution count. Zero means instrumented but never reached.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Count(pub u64);

impl Count {
    pub fn add(&mut self, hits: u64) {
        self.0 = self.0.saturating_add(hits);
    }

    pub fn reached(&self) -> bool {
        self.0 > 0
    }
}

/// Coverage of one file, expressed in base commit line numbers.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MergeResult {
    /// `None` iff the file does not exist at the base commit.
    pub hit_counts: Option<BTreeMap<Line, Count>>,
}

impl MergeResult {
    pub fn missing() -> Self {
        Self { hit_counts: None }
    }

    pub fn existing(hit_counts: BTreeMap<Line, Count>) -> Self {
        let hit_counts = Some(hit_counts);

        Self { hit_counts }
    }

    pub fn file_exists(&self) -> bool {
        self.hit_counts.is_some()
    }

    pub fn stats(&self) -> Option<FileStats> {
        self.hit_counts.as_ref().map(FileStats::from_hit_counts)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FileStats {
    /// Lines with any sample attributed to them, including zero-hit samples.
    pub instrumented: u64,

    /// Lines with a non-zero count.
    pub covered: u64,
}

impl FileStats {
    pub fn from_hit_counts(hit_counts: &BTreeMap<Line, Count>) -> Self {
        let instrumented = hit_counts.len() as u64;
        let covered = hit_counts.values().filter(|c| c.reached()).count() as u64;

        Self {
            instrumented,
            covered,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct MergeSummary {
    pub files: u64,
    pub files_missing: u64,
    pub instrumented: u64,
    pub covered: u64,
}

impl MergeSummary {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a MergeResult>) -> Self {
        let mut summary = Self::default();

        for result in results {
            summary.files += 1;

            match result.stats() {
                Some(stats) => {
                    summary.instrumented += stats.instrumented;
                    summary.covered += stats.covered;
                }
                None => summary.files_missing += 1,
            }
        }

        summary
    }
}

impl fmt::Display for MergeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "files = {} (missing at base = {}), instrumented lines = {}, covered lines = {}",
            self.files, self.files_missing, self.instrumented, self.covered
        )
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    use super::*;

    fn counts(entries: &[(u32, u64)]) -> Result<BTreeMap<Line, Count>> {
        let mut map = BTreeMap::new();

        for &(line, count) in entries {
            map.insert(Line::new(line)?, Count(count));
        }

        Ok(map)
    }

    #[test]
    fn test_line_is_one_indexed() -> Result<()> {
        let line = Line::new(5)?;
        assert_eq!(line.number(), 5);
        assert_eq!(line.index(), 4);
        assert_eq!(Line::from_index(4), line);

        assert!(Line::new(0).is_err());

        Ok(())
    }

    #[test]
    fn test_count_saturates() {
        let mut count = Count(u64::MAX - 1);
        count.add(5);
        assert_eq!(count, Count(u64::MAX));
    }

    #[test]
    fn test_missing_file_has_no_stats() {
        let result = MergeResult::missing();

        assert!(!result.file_exists());
        assert_eq!(result.stats(), None);
    }

    #[test]
    fn test_zero_hit_lines_are_instrumented() -> Result<()> {
        let result = MergeResult::existing(counts(&[(3, 0), (4, 2), (9, 0)])?);

        assert_eq!(
            result.stats(),
            Some(FileStats {
                instrumented: 3,
                covered: 1,
            })
        );

        Ok(())
    }

    #[test]
    fn test_merge_summary() -> Result<()> {
        let results = vec![
            MergeResult::existing(counts(&[(1, 1), (2, 0)])?),
            MergeResult::missing(),
            MergeResult::existing(BTreeMap::new()),
            MergeResult::existing(counts(&[(7, 3)])?),
        ];

        let summary = MergeSummary::from_results(&results);

        assert_eq!(
            summary,
            MergeSummary {
                files: 4,
                files_missing: 1,
                instrumented: 3,
                covered: 2,
            }
        );

        Ok(())
    }
}

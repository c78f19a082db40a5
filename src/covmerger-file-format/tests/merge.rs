// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;

use anyhow::Result;
use covmerger::{Count, Line, MergeResult};
use covmerger_file_format::merge::{FormatError, MergeReportJson};
use pretty_assertions::assert_eq;

fn existing(counts: &[(u32, u64)]) -> Result<MergeResult> {
    let mut hit_counts = BTreeMap::new();

    for &(line, count) in counts {
        hit_counts.insert(Line::new(line)?, Count(count));
    }

    Ok(MergeResult::existing(hit_counts))
}

fn expected_results() -> Result<BTreeMap<String, MergeResult>> {
    let mut results = BTreeMap::new();

    results.insert("add_line.c".to_owned(), existing(&[(2, 1)])?);
    results.insert("delete_code.c".to_owned(), existing(&[])?);
    results.insert("delete_file.c".to_owned(), MergeResult::missing());
    results.insert("not_changed.c".to_owned(), existing(&[(3, 0), (4, 0)])?);

    Ok(results)
}

#[test]
fn test_merge_report_decodes() -> Result<()> {
    let text = include_str!("files/merge-report.json");

    let results = MergeReportJson::deserialize(text)?.into_results()?;

    assert_eq!(results, expected_results()?);

    Ok(())
}

#[test]
fn test_merge_report_encodes() -> Result<()> {
    let results = expected_results()?;

    let text = MergeReportJson::from(&results).to_string_pretty()?;

    assert_eq!(text, include_str!("files/merge-report.json"));

    Ok(())
}

#[test]
fn test_missing_file_has_no_hit_counts() -> Result<()> {
    let mut results = BTreeMap::new();
    results.insert("gone.c".to_owned(), MergeResult::missing());

    let text = serde_json::to_string(&MergeReportJson::from(&results))?;

    assert_eq!(text, r#"{"gone.c":{"FileExists":false}}"#);

    Ok(())
}

#[test]
fn test_hit_counts_on_missing_file_are_rejected() -> Result<()> {
    let text = include_str!("files/hit-counts-on-missing-file.json");

    let err = MergeReportJson::deserialize(text)?.into_results().unwrap_err();

    assert!(matches!(err, FormatError::HitCountsOnMissingFile { file } if file == "delete_file.c"));

    Ok(())
}

#[test]
fn test_line_zero_is_rejected() -> Result<()> {
    let text = r#"{"a.c": {"HitCounts": {"0": 1}, "FileExists": true}}"#;

    let err = MergeReportJson::deserialize(text)?.into_results().unwrap_err();

    assert!(matches!(err, FormatError::ZeroLine { .. }));

    Ok(())
}

#[test]
fn test_existing_file_without_table_is_empty() -> Result<()> {
    let text = r#"{"a.c": {"FileExists": true}}"#;

    let results = MergeReportJson::deserialize(text)?.into_results()?;

    assert_eq!(results["a.c"], existing(&[])?);

    Ok(())
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Line correlation between two versions of a file.
//!
//! Lines are paired along a longest common subsequence of the two line sequences. Lines
//! that are inserted, deleted or edited stay unpaired.
//!
//! When several longest alignments exist, the one whose paired lines in the second
//! version are lexicographically smallest is chosen, then the one whose paired lines in
//! the first version are smallest. In other words, unchanged text is attached to its
//! earliest possible position in the second version.

use std::collections::{BTreeMap, HashMap};

use crate::source::Line;

/// Order-preserving partial map from lines of one file version to another.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LineMapping {
    lines: BTreeMap<Line, Line>,
}

impl LineMapping {
    pub fn get(&self, line: Line) -> Option<Line> {
        self.lines.get(&line).copied()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Line, Line)> + '_ {
        self.lines.iter().map(|(a, b)| (*a, *b))
    }

    fn from_pairs(pairs: impl IntoIterator<Item = (usize, usize)>) -> Self {
        let lines = pairs
            .into_iter()
            .map(|(a, b)| (Line::from_index(a), Line::from_index(b)))
            .collect();

        Self { lines }
    }
}

/// Correlate two texts line by line.
pub fn correlate(a: &str, b: &str) -> LineMapping {
    let a: Vec<&str> = a.lines().collect();
    let b: Vec<&str> = b.lines().collect();

    correlate_lines(&a, &b)
}

pub fn correlate_lines(a: &[&str], b: &[&str]) -> LineMapping {
    let (a, b, ids) = intern(a, b);

    // A line missing from the other version can never be paired, so it plays no part in
    // the alignment. Dropping it keeps the relative order of everything else.
    let mut in_a = vec![false; ids];
    let mut in_b = vec![false; ids];
    a.iter().for_each(|&id| in_a[id] = true);
    b.iter().for_each(|&id| in_b[id] = true);

    let a: Vec<Entry> = keep_shared(&a, &in_b);
    let b: Vec<Entry> = keep_shared(&b, &in_a);

    let mut pairs = vec![];

    let prefix = a
        .iter()
        .zip(&b)
        .take_while(|(x, y)| x.id == y.id)
        .count();
    pairs.extend(a[..prefix].iter().zip(&b[..prefix]).map(|(x, y)| (x.pos, y.pos)));

    let (mut a_end, mut b_end) = (a.len(), b.len());

    // A shared last line is part of every longest alignment only if it is unique on both
    // sides of the remaining window.
    let mut a_counts = vec![0usize; ids];
    let mut b_counts = vec![0usize; ids];
    a[prefix..].iter().for_each(|e| a_counts[e.id] += 1);
    b[prefix..].iter().for_each(|e| b_counts[e.id] += 1);

    let mut suffix = vec![];
    while a_end > prefix && b_end > prefix {
        let (x, y) = (&a[a_end - 1], &b[b_end - 1]);

        if x.id != y.id || a_counts[x.id] != 1 || b_counts[y.id] != 1 {
            break;
        }

        suffix.push((x.pos, y.pos));
        a_end -= 1;
        b_end -= 1;
    }

    pairs.extend(align(&a[prefix..a_end], &b[prefix..b_end]));
    pairs.extend(suffix.into_iter().rev());

    LineMapping::from_pairs(pairs)
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    /// Zero-based line index in the original text.
    pos: usize,
    id: usize,
}

fn intern<'t>(a: &[&'t str], b: &[&'t str]) -> (Vec<usize>, Vec<usize>, usize) {
    let mut ids: HashMap<&'t str, usize> = HashMap::new();

    let mut to_ids = |lines: &[&'t str]| -> Vec<usize> {
        lines
            .iter()
            .map(|line| {
                let next = ids.len();
                *ids.entry(*line).or_insert(next)
            })
            .collect()
    };

    let a = to_ids(a);
    let b = to_ids(b);

    (a, b, ids.len())
}

fn keep_shared(lines: &[usize], shared: &[bool]) -> Vec<Entry> {
    lines
        .iter()
        .enumerate()
        .filter(|(_, id)| shared[**id])
        .map(|(pos, &id)| Entry { pos, id })
        .collect()
}

/// Longest common subsequence alignment with the earliest-in-`b` traceback.
///
/// `lcs(i, j)` is the alignment length of the suffixes `a[i..]` and `b[j..]`. Only two
/// rows of it are live at once. The traceback needs one bit per unequal cell: whether to
/// step past `a[i]` (keeping `b[j]` in play) or past `b[j]`.
///
/// Stepping past `a[i]` is chosen when it is the only lossless move, or when both are
/// lossless and `b[j]` can still be paired further down without losing length. Otherwise
/// `b[j]` is skipped, which leaves the earliest rows of `a` available.
fn align(a: &[Entry], b: &[Entry]) -> Vec<(usize, usize)> {
    let (n, m) = (a.len(), b.len());

    if n == 0 || m == 0 {
        return vec![];
    }

    let mut skip_a = BitTable::new(n, m);

    let mut below = vec![0u32; m + 1];
    let mut row = vec![0u32; m + 1];

    // Whether `b[j]` is paired on some longest alignment of `a[i..]` and `b[j..]`.
    let mut pairable_below = vec![false; m];
    let mut pairable = vec![false; m];

    for i in (0..n).rev() {
        row[m] = 0;

        for j in (0..m).rev() {
            if a[i].id == b[j].id {
                row[j] = below[j + 1] + 1;
                pairable[j] = true;
                continue;
            }

            row[j] = below[j].max(row[j + 1]);

            let down = below[j] == row[j];
            pairable[j] = down && pairable_below[j];

            if down && (pairable_below[j] || row[j + 1] < row[j]) {
                skip_a.set(i, j);
            }
        }

        std::mem::swap(&mut below, &mut row);
        std::mem::swap(&mut pairable_below, &mut pairable);
    }

    let mut pairs = vec![];
    let (mut i, mut j) = (0, 0);

    while i < n && j < m {
        if a[i].id == b[j].id {
            pairs.push((a[i].pos, b[j].pos));
            i += 1;
            j += 1;
        } else if skip_a.get(i, j) {
            i += 1;
        } else {
            j += 1;
        }
    }

    pairs
}

struct BitTable {
    columns: usize,
    bits: Vec<u64>,
}

impl BitTable {
    fn new(rows: usize, columns: usize) -> Self {
        let len = (rows * columns + 63) / 64;
        let bits = vec![0; len];

        Self { columns, bits }
    }

    fn set(&mut self, row: usize, column: usize) {
        let index = row * self.columns + column;
        self.bits[index / 64] |= 1 << (index % 64);
    }

    fn get(&self, row: usize, column: usize) -> bool {
        let index = row * self.columns + column;
        self.bits[index / 64] & (1 << (index % 64)) != 0
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    fn pairs(mapping: &LineMapping) -> Vec<(u32, u32)> {
        mapping
            .iter()
            .map(|(a, b)| (a.number(), b.number()))
            .collect()
    }

    fn lcs_len(a: &[&str], b: &[&str]) -> usize {
        let mut table = vec![vec![0usize; b.len() + 1]; a.len() + 1];

        for i in 0..a.len() {
            for j in 0..b.len() {
                table[i + 1][j + 1] = if a[i] == b[j] {
                    table[i][j] + 1
                } else {
                    table[i][j + 1].max(table[i + 1][j])
                };
            }
        }

        table[a.len()][b.len()]
    }

    #[test]
    fn test_identical_files_map_to_themselves() {
        let text = "a\nb\nc\n";
        let mapping = correlate(text, text);

        assert_eq!(pairs(&mapping), vec![(1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn test_changed_line_is_unmapped() {
        let a = "int f(void) {\n\treturn 1;\n}\n";
        let b = "int f(void) {\n\treturn 2;\n}\n";

        let mapping = correlate(a, b);

        assert_eq!(pairs(&mapping), vec![(1, 1), (3, 3)]);
    }

    #[test]
    fn test_added_line_shifts_the_tail() {
        let a = "a\nb\nc\nd\n";
        let b = "a\nb\nnew\nc\nd\n";

        let mapping = correlate(a, b);

        assert_eq!(pairs(&mapping), vec![(1, 1), (2, 2), (3, 4), (4, 5)]);
    }

    #[test]
    fn test_deleted_line_is_unmapped() -> Result<()> {
        let a = "a\nb\nc\n";
        let b = "a\nc\n";

        let mapping = correlate(a, b);

        assert_eq!(pairs(&mapping), vec![(1, 1), (3, 2)]);
        assert_eq!(mapping.get(Line::new(2)?), None);

        Ok(())
    }

    #[test]
    fn test_empty_sides() {
        assert!(correlate("", "a\nb\n").is_empty());
        assert!(correlate("a\nb\n", "").is_empty());
        assert!(correlate("", "").is_empty());
    }

    #[test]
    fn test_tie_prefers_earliest_line_in_target() {
        // One `x` in the source, two in the target.
        assert_eq!(pairs(&correlate("x\n", "x\nx\n")), vec![(1, 1)]);
        assert_eq!(pairs(&correlate("x\n", "p\nx\nx\n")), vec![(1, 2)]);

        // Two `x` in the source, one in the target: the earliest source line wins.
        assert_eq!(pairs(&correlate("x\nx\n", "x\n")), vec![(1, 1)]);

        // Swapped lines: either can survive, the one landing first in the target wins.
        assert_eq!(pairs(&correlate("a\nb\n", "b\na\n")), vec![(2, 1)]);
    }

    #[test]
    fn test_repeated_closing_braces() {
        let a = "void f(void)\n{\n}\nvoid g(void)\n{\n}\n";
        let b = "void g(void)\n{\n}\n";

        let mapping = correlate(a, b);

        assert_eq!(pairs(&mapping), vec![(4, 1), (5, 2), (6, 3)]);
    }

    #[test]
    fn test_crlf_line_endings_match_lf() {
        let mapping = correlate("a\r\nb\r\n", "a\nb\n");

        assert_eq!(pairs(&mapping), vec![(1, 1), (2, 2)]);
    }

    /// Every longest alignment of `a[i..]` and `b[j..]`, by exhaustive search.
    fn longest_alignments(a: &[&str], b: &[&str], i: usize, j: usize) -> Vec<Vec<(usize, usize)>> {
        if i == a.len() || j == b.len() {
            return vec![vec![]];
        }

        let mut candidates = vec![];

        if a[i] == b[j] {
            for mut rest in longest_alignments(a, b, i + 1, j + 1) {
                rest.insert(0, (i, j));
                candidates.push(rest);
            }
        }
        candidates.extend(longest_alignments(a, b, i + 1, j));
        candidates.extend(longest_alignments(a, b, i, j + 1));

        let best = candidates.iter().map(Vec::len).max().unwrap_or(0);
        candidates.retain(|c| c.len() == best);
        candidates.sort();
        candidates.dedup();
        candidates
    }

    fn earliest_in_target(a: &[&str], b: &[&str]) -> Vec<(u32, u32)> {
        let key = |alignment: &Vec<(usize, usize)>| {
            let in_b: Vec<usize> = alignment.iter().map(|p| p.1).collect();
            let in_a: Vec<usize> = alignment.iter().map(|p| p.0).collect();
            (in_b, in_a)
        };

        longest_alignments(a, b, 0, 0)
            .into_iter()
            .min_by_key(key)
            .unwrap_or_default()
            .into_iter()
            .map(|(x, y)| (x as u32 + 1, y as u32 + 1))
            .collect()
    }

    fn lines_strategy() -> impl Strategy<Value = Vec<&'static str>> {
        prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "d", "{", "}", ""]), 0..40)
    }

    proptest! {
        #[test]
        fn test_mapping_is_an_alignment(a in lines_strategy(), b in lines_strategy()) {
            let mapping = correlate_lines(&a, &b);

            let mut last: Option<(Line, Line)> = None;
            for (x, y) in mapping.iter() {
                prop_assert_eq!(a[x.index()], b[y.index()]);

                if let Some((px, py)) = last {
                    prop_assert!(x > px);
                    prop_assert!(y > py);
                }
                last = Some((x, y));
            }

            prop_assert_eq!(mapping.len(), lcs_len(&a, &b));
        }

        #[test]
        fn test_tie_break_matches_exhaustive_search(
            a in prop::collection::vec(prop::sample::select(vec!["x", "y", "}"]), 0..7),
            b in prop::collection::vec(prop::sample::select(vec!["x", "y", "}"]), 0..7),
        ) {
            let mapping = correlate_lines(&a, &b);

            prop_assert_eq!(pairs(&mapping), earliest_in_target(&a, &b));
        }

        #[test]
        fn test_self_correlation_is_identity(a in lines_strategy()) {
            let mapping = correlate_lines(&a, &a);

            prop_assert_eq!(mapping.len(), a.len());
            for (x, y) in mapping.iter() {
                prop_assert_eq!(x, y);
            }
        }

        #[test]
        fn test_correlation_is_deterministic(a in lines_strategy(), b in lines_strategy()) {
            prop_assert_eq!(correlate_lines(&a, &b), correlate_lines(&a, &b));
        }
    }
}

//! diff-match-patch textual patches.
//!
//! Coordinates are in characters. Hunks are located with the Bitap algorithm
//! around their expected position; when the context found differs from the
//! one recorded, edits are mapped through a character diff of the two.
//!
//! This approximates diff-match-patch's `patch_apply` rather than
//! reproducing it. There is no null padding around the text and no
//! `patch_splitMax` pass, so hunks whose context exceeds the Bitap width are
//! matched by their two ends instead of being split. The expected position
//! of each hunk carries the running offset `start - start2` of the last hunk
//! placed, and a failed hunk shifts it back by `length2 - length1`. The two
//! agree on single-hunk payloads and on hunks placed at their recorded
//! offset; results may differ for multi-hunk payloads against drifted text.

use std::collections::HashMap;
use std::fmt;

use dissimilar::Chunk;
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use tracing::debug;

use super::{HunkReport, HunkStatus, PatchApplication};
use crate::error::{PatchError, PatchResult};

/// Worst acceptable match score (0.0 exact, 1.0 anything).
const MATCH_THRESHOLD: f64 = 0.5;
/// Characters of displacement that cost as much as a fully wrong match.
const MATCH_DISTANCE: usize = 1000;
/// Longest pattern Bitap handles in one pass.
const MATCH_MAX_BITS: usize = 32;
/// Largest tolerated edit ratio between recorded and found long contexts.
const DELETE_THRESHOLD: f64 = 0.5;

static HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@@ -(\d+),?(\d*) \+(\d+),?(\d*) @@$")
        .unwrap_or_else(|err| panic!("invalid diff-match-patch header regex: {err}"))
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmpDiff {
    Equal(String),
    Delete(String),
    Insert(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmpHunk {
    pub start1: usize,
    pub start2: usize,
    pub length1: usize,
    pub length2: usize,
    pub diffs: Vec<DmpDiff>,
}

impl DmpHunk {
    /// Text the hunk expects to find: context plus deletions.
    pub fn source_text(&self) -> String {
        self.diffs
            .iter()
            .filter_map(|diff| match diff {
                DmpDiff::Equal(text) | DmpDiff::Delete(text) => Some(text.as_str()),
                DmpDiff::Insert(_) => None,
            })
            .collect()
    }

    /// Text the hunk leaves behind: context plus insertions.
    pub fn target_text(&self) -> String {
        self.diffs
            .iter()
            .filter_map(|diff| match diff {
                DmpDiff::Equal(text) | DmpDiff::Insert(text) => Some(text.as_str()),
                DmpDiff::Delete(_) => None,
            })
            .collect()
    }
}

fn format_coords(start: usize, length: usize) -> String {
    match length {
        0 => format!("{start},0"),
        1 => format!("{}", start + 1),
        _ => format!("{},{length}", start + 1),
    }
}

impl fmt::Display for DmpHunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@@ -{} +{} @@",
            format_coords(self.start1, self.length1),
            format_coords(self.start2, self.length2)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmpPatch {
    pub hunks: Vec<DmpHunk>,
}

impl DmpPatch {
    pub fn parse(text: &str) -> PatchResult<Self> {
        let mut hunks = Vec::new();
        let mut current: Option<DmpHunk> = None;

        for (idx, raw) in text.split('\n').enumerate() {
            let line_no = idx + 1;
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            if line.is_empty() {
                continue;
            }

            if let Some(caps) = HEADER.captures(line) {
                if let Some(done) = current.take() {
                    hunks.push(done);
                }
                let group = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or_default();
                let (start1, length1) = parse_coords(group(1), group(2), line_no)?;
                let (start2, length2) = parse_coords(group(3), group(4), line_no)?;
                current = Some(DmpHunk {
                    start1,
                    start2,
                    length1,
                    length2,
                    diffs: Vec::new(),
                });
                continue;
            }

            let Some(hunk) = current.as_mut() else {
                return Err(PatchError::parse(
                    line_no,
                    "expected a '@@ -a,b +c,d @@' header",
                ));
            };

            let mut chars = line.chars();
            let sign = chars.next();
            let body = percent_decode_str(chars.as_str())
                .decode_utf8()
                .map_err(|err| PatchError::parse(line_no, format!("bad percent-encoding: {err}")))?
                .into_owned();

            let diff = match sign {
                Some(' ') => DmpDiff::Equal(body),
                Some('-') => DmpDiff::Delete(body),
                Some('+') => DmpDiff::Insert(body),
                _ => {
                    return Err(PatchError::parse(
                        line_no,
                        format!("invalid patch mode in {line:?}"),
                    ));
                }
            };
            hunk.diffs.push(diff);
        }

        if let Some(done) = current {
            hunks.push(done);
        }
        if hunks.is_empty() {
            return Err(PatchError::parse(0, "no hunks found"));
        }

        Ok(Self { hunks })
    }

    pub(crate) fn apply(&self, original: &str) -> PatchApplication {
        let mut text: Vec<char> = original.chars().collect();
        let mut delta = 0isize;
        let mut reports = Vec::with_capacity(self.hunks.len());

        for (index, hunk) in self.hunks.iter().enumerate() {
            let status = apply_hunk(&mut text, hunk, &mut delta);
            debug!(hunk = index + 1, ?status, "Applied diff-match-patch hunk");
            reports.push(HunkReport {
                index,
                header: hunk.to_string(),
                status,
            });
        }

        PatchApplication {
            text: text.into_iter().collect(),
            hunks: reports,
        }
    }
}

fn parse_coords(start: &str, length: &str, line: usize) -> PatchResult<(usize, usize)> {
    let start: usize = start
        .parse()
        .map_err(|err| PatchError::parse(line, format!("bad hunk start: {err}")))?;
    match length {
        "" => Ok((start.saturating_sub(1), 1)),
        "0" => Ok((start, 0)),
        other => {
            let length = other
                .parse()
                .map_err(|err| PatchError::parse(line, format!("bad hunk length: {err}")))?;
            Ok((start.saturating_sub(1), length))
        }
    }
}

fn apply_hunk(text: &mut Vec<char>, hunk: &DmpHunk, delta: &mut isize) -> HunkStatus {
    let expected = (hunk.start2 as isize + *delta).max(0) as usize;
    let source: Vec<char> = hunk.source_text().chars().collect();
    let target: Vec<char> = hunk.target_text().chars().collect();

    if find_near(text, &source, expected).is_none()
        && !target.is_empty()
        && target != source
        && find_near(text, &target, expected).is_some()
    {
        return HunkStatus::AlreadyApplied;
    }

    let Some((start, end)) = locate(text, &source, expected) else {
        // Later hunks were recorded against text that includes this one.
        *delta -= hunk.length2 as isize - hunk.length1 as isize;
        return HunkStatus::Failed {
            reason: format!("context not found near character {expected}"),
        };
    };

    let offset = start as isize - hunk.start2 as isize;
    *delta = offset;

    if text[start..end] == source[..] {
        text.splice(start..end, target);
        return HunkStatus::Applied { offset, fuzz: 0 };
    }

    let recorded: String = source.iter().collect();
    let found: String = text[start..end].iter().collect();
    let edits: Vec<Edit> = dissimilar::diff(&recorded, &found)
        .iter()
        .map(Edit::from)
        .collect();
    let distance = levenshtein(&edits);

    if source.len() > MATCH_MAX_BITS
        && distance as f64 / source.len() as f64 > DELETE_THRESHOLD
    {
        return HunkStatus::Failed {
            reason: format!("context at character {start} differs by {distance} characters"),
        };
    }

    let mut index1 = 0usize;
    for diff in &hunk.diffs {
        match diff {
            DmpDiff::Equal(data) => index1 += data.chars().count(),
            DmpDiff::Insert(data) => {
                let at = (start + x_index(&edits, index1)).min(text.len());
                text.splice(at..at, data.chars());
                index1 += data.chars().count();
            }
            DmpDiff::Delete(data) => {
                let from = (start + x_index(&edits, index1)).min(text.len());
                let to = (start + x_index(&edits, index1 + data.chars().count()))
                    .clamp(from, text.len());
                text.drain(from..to);
            }
        }
    }

    HunkStatus::Applied {
        offset,
        fuzz: distance,
    }
}

/// Span of `source` in `text`. Long contexts are matched by their first and
/// last [`MATCH_MAX_BITS`] characters separately.
fn locate(text: &[char], source: &[char], expected: usize) -> Option<(usize, usize)> {
    if source.len() > MATCH_MAX_BITS {
        let start = match_main(text, &source[..MATCH_MAX_BITS], expected)?;
        let tail = &source[source.len() - MATCH_MAX_BITS..];
        let end = match_main(text, tail, expected + source.len() - MATCH_MAX_BITS)?;
        if start >= end {
            return None;
        }
        Some((start, (end + MATCH_MAX_BITS).min(text.len())))
    } else {
        let start = match_main(text, source, expected)?;
        Some((start, (start + source.len()).min(text.len())))
    }
}

/// Exact occurrence within [`MATCH_DISTANCE`] of `expected`.
fn find_near(text: &[char], pattern: &[char], expected: usize) -> Option<usize> {
    find_from(text, pattern, expected.saturating_sub(MATCH_DISTANCE))
        .filter(|at| at.abs_diff(expected) <= MATCH_DISTANCE)
}

fn match_main(text: &[char], pattern: &[char], loc: usize) -> Option<usize> {
    let loc = loc.min(text.len());
    if text == pattern {
        return Some(0);
    }
    if text.is_empty() {
        return None;
    }
    if loc + pattern.len() <= text.len() && text[loc..loc + pattern.len()] == *pattern {
        return Some(loc);
    }
    match_bitap(text, pattern, loc)
}

fn match_bitap(text: &[char], pattern: &[char], loc: usize) -> Option<usize> {
    let plen = pattern.len();
    if plen == 0 || plen > MATCH_MAX_BITS {
        return None;
    }

    let alphabet = alphabet(pattern);
    let score = |errors: usize, at: usize| -> f64 {
        errors as f64 / plen as f64 + loc.abs_diff(at) as f64 / MATCH_DISTANCE as f64
    };

    let mut threshold = MATCH_THRESHOLD;
    if let Some(found) = find_from(text, pattern, loc) {
        threshold = threshold.min(score(0, found));
        if let Some(found) = rfind_at_or_before(text, pattern, loc + plen) {
            threshold = threshold.min(score(0, found));
        }
    }

    let match_mask = 1u64 << (plen - 1);
    let mut best = None;
    let mut bin_max = plen + text.len();
    let mut last_rd: Vec<u64> = Vec::new();

    for errors in 0..plen {
        // How far from `loc` can a match with this many errors still score?
        let mut bin_min = 0;
        let mut bin_mid = bin_max;
        while bin_min < bin_mid {
            if score(errors, loc + bin_mid) <= threshold {
                bin_min = bin_mid;
            } else {
                bin_max = bin_mid;
            }
            bin_mid = (bin_max - bin_min) / 2 + bin_min;
        }
        bin_max = bin_mid;

        let mut start = (loc + 1).saturating_sub(bin_mid).max(1);
        let finish = (loc + bin_mid).min(text.len()) + plen;

        let mut rd = vec![0u64; finish + 2];
        rd[finish + 1] = (1u64 << errors) - 1;
        let prev = |i: usize| last_rd.get(i).copied().unwrap_or(0);

        let mut j = finish;
        while j >= start {
            let char_match = text
                .get(j - 1)
                .and_then(|c| alphabet.get(c))
                .copied()
                .unwrap_or(0);
            let exact = ((rd[j + 1] << 1) | 1) & char_match;
            rd[j] = if errors == 0 {
                exact
            } else {
                exact | (((prev(j + 1) | prev(j)) << 1) | 1) | prev(j + 1)
            };

            if rd[j] & match_mask != 0 {
                let candidate = score(errors, j - 1);
                if candidate <= threshold {
                    threshold = candidate;
                    best = Some(j - 1);
                    if j - 1 > loc {
                        start = (2 * loc).saturating_sub(j - 1).max(1);
                    } else {
                        break;
                    }
                }
            }
            j -= 1;
        }

        if score(errors + 1, loc) > threshold {
            break;
        }
        last_rd = rd;
    }

    best
}

fn alphabet(pattern: &[char]) -> HashMap<char, u64> {
    let mut masks = HashMap::new();
    for (i, c) in pattern.iter().enumerate() {
        *masks.entry(*c).or_insert(0u64) |= 1u64 << (pattern.len() - i - 1);
    }
    masks
}

fn find_from(text: &[char], pattern: &[char], from: usize) -> Option<usize> {
    let max_start = text.len().checked_sub(pattern.len())?;
    (from..=max_start).find(|&at| text[at..at + pattern.len()] == *pattern)
}

fn rfind_at_or_before(text: &[char], pattern: &[char], at: usize) -> Option<usize> {
    let max_start = text.len().checked_sub(pattern.len())?.min(at);
    (0..=max_start)
        .rev()
        .find(|&idx| text[idx..idx + pattern.len()] == *pattern)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

#[derive(Debug, Clone, Copy)]
struct Edit {
    op: Op,
    len: usize,
}

impl From<&Chunk<'_>> for Edit {
    fn from(chunk: &Chunk<'_>) -> Self {
        let (op, text) = match chunk {
            Chunk::Equal(text) => (Op::Equal, text),
            Chunk::Delete(text) => (Op::Delete, text),
            Chunk::Insert(text) => (Op::Insert, text),
        };
        Edit {
            op,
            len: text.chars().count(),
        }
    }
}

fn levenshtein(edits: &[Edit]) -> usize {
    let mut total = 0;
    let mut inserted = 0;
    let mut deleted = 0;
    for edit in edits {
        match edit.op {
            Op::Insert => inserted += edit.len,
            Op::Delete => deleted += edit.len,
            Op::Equal => {
                total += inserted.max(deleted);
                inserted = 0;
                deleted = 0;
            }
        }
    }
    total + inserted.max(deleted)
}

/// Translate a position in the recorded text to the found text.
fn x_index(edits: &[Edit], loc: usize) -> usize {
    let mut chars1 = 0;
    let mut chars2 = 0;
    let mut last_chars1 = 0;
    let mut last_chars2 = 0;
    let mut stopped_at = None;

    for (i, edit) in edits.iter().enumerate() {
        if edit.op != Op::Insert {
            chars1 += edit.len;
        }
        if edit.op != Op::Delete {
            chars2 += edit.len;
        }
        if chars1 > loc {
            stopped_at = Some(i);
            break;
        }
        last_chars1 = chars1;
        last_chars2 = chars2;
    }

    // Inside a deletion: the position collapses onto its start.
    if stopped_at.is_some_and(|i| edits[i].op == Op::Delete) {
        return last_chars2;
    }
    last_chars2 + (loc - last_chars1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const B_MODIFIED: &str = "@@ -1,6 +1,15 @@\n A%0AB\n+-modified\n %0AC%0A\n";

    fn chars(text: &str) -> Vec<char> {
        text.chars().collect()
    }

    #[test]
    fn parses_patch_to_text_output() -> PatchResult<()> {
        let patch = DmpPatch::parse(B_MODIFIED)?;
        let hunk = &patch.hunks[0];

        assert_eq!((hunk.start1, hunk.length1), (0, 6));
        assert_eq!((hunk.start2, hunk.length2), (0, 15));
        assert_eq!(
            hunk.diffs,
            vec![
                DmpDiff::Equal("A\nB".to_string()),
                DmpDiff::Insert("-modified".to_string()),
                DmpDiff::Equal("\nC\n".to_string()),
            ]
        );
        assert_eq!(hunk.to_string(), "@@ -1,6 +1,15 @@");
        Ok(())
    }

    #[test]
    fn coordinate_shorthands_follow_patch_to_text() -> PatchResult<()> {
        assert_eq!(parse_coords("5", "", 1)?, (4, 1));
        assert_eq!(parse_coords("5", "0", 1)?, (5, 0));
        assert_eq!(parse_coords("5", "3", 1)?, (4, 3));
        assert_eq!(format_coords(4, 1), "5");
        assert_eq!(format_coords(5, 0), "5,0");
        Ok(())
    }

    #[test]
    fn decodes_percent_escapes_but_keeps_plus_literal() -> PatchResult<()> {
        let patch = DmpPatch::parse("@@ -1,3 +1,5 @@\n a+b\n+%25%0A\n")?;
        assert_eq!(patch.hunks[0].source_text(), "a+b");
        assert_eq!(patch.hunks[0].target_text(), "a+b%\n");
        Ok(())
    }

    #[test]
    fn rejects_body_before_header_and_unknown_modes() {
        assert!(matches!(
            DmpPatch::parse(" context\n"),
            Err(PatchError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            DmpPatch::parse("@@ -1 +1 @@\n*x\n"),
            Err(PatchError::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn applies_at_recorded_position() -> PatchResult<()> {
        let result = DmpPatch::parse(B_MODIFIED)?.apply("A\nB\nC\n");
        assert_eq!(result.text, "A\nB-modified\nC\n");
        assert_eq!(
            result.hunks[0].status,
            HunkStatus::Applied { offset: 0, fuzz: 0 }
        );
        Ok(())
    }

    #[test]
    fn follows_context_that_moved() -> PatchResult<()> {
        let result = DmpPatch::parse(B_MODIFIED)?.apply("X\nA\nB\nC\n");
        assert_eq!(result.text, "X\nA\nB-modified\nC\n");
        assert_eq!(
            result.hunks[0].status,
            HunkStatus::Applied { offset: 2, fuzz: 0 }
        );
        Ok(())
    }

    #[test]
    fn maps_edits_through_slightly_different_context() -> PatchResult<()> {
        let result = DmpPatch::parse(B_MODIFIED)?.apply("A\nb\nC\n");
        assert_eq!(result.text, "A\nb-modified\nC\n");
        assert_eq!(
            result.hunks[0].status,
            HunkStatus::Applied { offset: 0, fuzz: 1 }
        );
        Ok(())
    }

    #[test]
    fn long_contexts_match_by_both_ends() -> PatchResult<()> {
        let patch = "@@ -1,47 +1,47 @@\n 0123456789abcdefghij\n-klm\n+KLM\n nopqrstuvwxyzABCDEFGHIJ%0A\n";
        let result = DmpPatch::parse(patch)?
            .apply("PREFIX 0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJ\n");
        assert_eq!(
            result.text,
            "PREFIX 0123456789abcdefghijKLMnopqrstuvwxyzABCDEFGHIJ\n"
        );
        assert_eq!(
            result.hunks[0].status,
            HunkStatus::Applied { offset: 7, fuzz: 0 }
        );
        Ok(())
    }

    #[test]
    fn unrelated_text_fails_without_changes() -> PatchResult<()> {
        let original = "hello world, nothing here\n";
        let result = DmpPatch::parse(B_MODIFIED)?.apply(original);
        assert_eq!(result.text, original);
        assert!(result.hunks[0].is_failed());
        Ok(())
    }

    #[test]
    fn recognises_already_patched_text() -> PatchResult<()> {
        let result = DmpPatch::parse(B_MODIFIED)?.apply("A\nB-modified\nC\n");
        assert_eq!(result.text, "A\nB-modified\nC\n");
        assert_eq!(result.hunks[0].status, HunkStatus::AlreadyApplied);
        Ok(())
    }

    #[test]
    fn bitap_prefers_nearby_fuzzy_match() {
        let text = chars("abcdef ... abXdef");
        assert_eq!(match_bitap(&text, &chars("abxdef"), 11), Some(11));
        assert_eq!(match_bitap(&text, &chars("abxdef"), 0), Some(0));
    }

    #[test]
    fn x_index_maps_positions_across_edits() {
        let edits = [
            Edit { op: Op::Equal, len: 2 },
            Edit { op: Op::Delete, len: 1 },
            Edit { op: Op::Insert, len: 3 },
            Edit { op: Op::Equal, len: 2 },
        ];
        assert_eq!(x_index(&edits, 1), 1);
        assert_eq!(x_index(&edits, 2), 2);
        assert_eq!(x_index(&edits, 4), 6);
        assert_eq!(levenshtein(&edits), 3);
    }
}

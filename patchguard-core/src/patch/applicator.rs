use tracing::debug;

use super::matcher::ContextMatcher;
use super::unified::{UnifiedHunk, UnifiedPatch};
use super::{ApplyOptions, HunkReport, HunkStatus, PatchApplication};

/// `(start, removed_len, inserted_lines)` in original-line coordinates.
type Replacement = (usize, usize, Vec<String>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    fn detect(text: &str) -> Self {
        let newlines = text.matches('\n').count();
        let crlf = text.matches("\r\n").count();
        if newlines > 0 && crlf * 2 > newlines {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

pub(crate) fn apply_unified(
    existing: &str,
    patch: &UnifiedPatch,
    options: &ApplyOptions,
) -> PatchApplication {
    let ending = LineEnding::detect(existing);
    let mut original_lines: Vec<String> = existing
        .split('\n')
        .map(|line| match ending {
            LineEnding::CrLf => line.strip_suffix('\r').unwrap_or(line).to_string(),
            LineEnding::Lf => line.to_string(),
        })
        .collect();
    let had_trailing_newline = existing.ends_with('\n');

    if had_trailing_newline && original_lines.last().is_some_and(|line| line.is_empty()) {
        original_lines.pop();
    }
    // An empty file has no lines, not one empty line.
    if existing.is_empty() {
        original_lines.clear();
    }

    let (replacements, hunks, trailing_newline) =
        compute_replacements(&original_lines, patch, options, had_trailing_newline);
    let mut new_lines = apply_replacements(original_lines, &replacements);

    if trailing_newline && !new_lines.is_empty() {
        new_lines.push(String::new());
    }

    PatchApplication {
        text: new_lines.join(ending.as_str()),
        hunks,
    }
}

fn compute_replacements(
    original_lines: &[String],
    patch: &UnifiedPatch,
    options: &ApplyOptions,
    had_trailing_newline: bool,
) -> (Vec<Replacement>, Vec<HunkReport>, bool) {
    let matcher = ContextMatcher::new(original_lines);
    let mut replacements = Vec::new();
    let mut reports = Vec::with_capacity(patch.hunks.len());
    let mut trailing_newline = had_trailing_newline;
    let mut line_index = 0usize;
    let mut drift = 0isize;

    for (index, hunk) in patch.hunks.iter().enumerate() {
        let header = hunk.to_string();
        let status = match locate(&matcher, hunk, options, line_index, drift) {
            Some(found) => {
                // Relative to the header's own position, not the drifted guess.
                let offset = found.start as isize - found.expected as isize + drift;
                drift = offset;
                line_index = found.start + found.old_len;

                if line_index == original_lines.len() {
                    if hunk.new_missing_newline {
                        trailing_newline = false;
                    } else if hunk.old_missing_newline || original_lines.is_empty() {
                        trailing_newline = true;
                    }
                }

                debug!(
                    hunk = index + 1,
                    start = found.start,
                    offset,
                    fuzz = found.fuzz,
                    "Located hunk"
                );
                replacements.push((found.start, found.old_len, found.new_segment));
                HunkStatus::Applied {
                    offset,
                    fuzz: found.fuzz,
                }
            }
            None if is_already_applied(&matcher, hunk, line_index, drift) => {
                HunkStatus::AlreadyApplied
            }
            None => {
                let snippet = hunk
                    .old_lines()
                    .into_iter()
                    .find(|line| !line.trim().is_empty())
                    .unwrap_or_else(|| "<empty>".to_string());
                HunkStatus::Failed {
                    reason: format!("context not found near line {}: {snippet}", hunk.old_start),
                }
            }
        };

        reports.push(HunkReport {
            index,
            header,
            status,
        });
    }

    replacements.sort_by_key(|(idx, _, _)| *idx);
    (replacements, reports, trailing_newline)
}

struct Located {
    start: usize,
    expected: usize,
    old_len: usize,
    fuzz: usize,
    new_segment: Vec<String>,
}

fn expected_line(hunk: &UnifiedHunk, drift: isize) -> usize {
    // Pure insertions name the line *after which* to insert.
    let base = if hunk.old_len == 0 {
        hunk.old_start
    } else {
        hunk.old_start.saturating_sub(1)
    };
    (base as isize + drift).max(0) as usize
}

fn locate(
    matcher: &ContextMatcher<'_>,
    hunk: &UnifiedHunk,
    options: &ApplyOptions,
    line_index: usize,
    drift: isize,
) -> Option<Located> {
    let old_segment = hunk.old_lines();
    let new_segment = hunk.new_lines();
    let expected = expected_line(hunk, drift);

    if old_segment.is_empty() {
        let start = matcher.seek_near(&old_segment, expected, line_index)?;
        return Some(Located {
            start,
            expected,
            old_len: 0,
            fuzz: 0,
            new_segment,
        });
    }

    if let Some(start) = matcher.seek_near(&old_segment, expected, line_index) {
        return Some(Located {
            start,
            expected,
            old_len: old_segment.len(),
            fuzz: 0,
            new_segment,
        });
    }

    if old_segment.last().is_some_and(|line| line.is_empty()) {
        let mut old_trimmed = old_segment.clone();
        let mut new_trimmed = new_segment.clone();
        old_trimmed.pop();
        if new_trimmed.last().is_some_and(|line| line.is_empty()) {
            new_trimmed.pop();
        }
        if let Some(start) = matcher.seek_near(&old_trimmed, expected, line_index) {
            return Some(Located {
                start,
                expected,
                old_len: old_trimmed.len(),
                fuzz: 0,
                new_segment: new_trimmed,
            });
        }
    }

    let leading = hunk.leading_context();
    let trailing = hunk.trailing_context();

    for fuzz in 1..=options.max_fuzz {
        let drop_front = fuzz.min(leading);
        let drop_back = fuzz.min(trailing);
        if drop_front + drop_back == 0 || fuzz > leading.max(trailing) {
            break;
        }
        if drop_front + drop_back >= old_segment.len() {
            break;
        }

        let old_trimmed = &old_segment[drop_front..old_segment.len() - drop_back];
        let new_trimmed = &new_segment[drop_front..new_segment.len() - drop_back];
        if let Some(start) = matcher.seek_near(old_trimmed, expected + drop_front, line_index) {
            return Some(Located {
                start,
                expected: expected + drop_front,
                old_len: old_trimmed.len(),
                fuzz,
                new_segment: new_trimmed.to_vec(),
            });
        }
    }

    None
}

fn is_already_applied(
    matcher: &ContextMatcher<'_>,
    hunk: &UnifiedHunk,
    line_index: usize,
    drift: isize,
) -> bool {
    let old_segment = hunk.old_lines();
    let new_segment = hunk.new_lines();
    if new_segment.is_empty() || new_segment == old_segment {
        return false;
    }
    matcher
        .seek_near(&new_segment, expected_line(hunk, drift), line_index)
        .is_some()
}

fn apply_replacements(mut lines: Vec<String>, replacements: &[Replacement]) -> Vec<String> {
    for (start_idx, old_len, new_segment) in replacements.iter().rev() {
        let start = (*start_idx).min(lines.len());
        let end = (start + old_len).min(lines.len());
        lines.splice(start..end, new_segment.iter().cloned());
    }

    lines
}

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{PatchError, PatchResult};

static HUNK_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@(.*)$")
        .unwrap_or_else(|err| panic!("invalid hunk header regex: {err}"))
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedHunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
    /// The old side ends without a trailing newline.
    pub old_missing_newline: bool,
    /// The new side ends without a trailing newline.
    pub new_missing_newline: bool,
}

impl UnifiedHunk {
    /// Lines the hunk expects to find (context and removals).
    pub fn old_lines(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                HunkLine::Context(text) | HunkLine::Remove(text) => Some(text.clone()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }

    /// Lines the hunk leaves behind (context and additions).
    pub fn new_lines(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                HunkLine::Context(text) | HunkLine::Add(text) => Some(text.clone()),
                HunkLine::Remove(_) => None,
            })
            .collect()
    }

    pub(crate) fn leading_context(&self) -> usize {
        self.lines
            .iter()
            .take_while(|line| matches!(line, HunkLine::Context(_)))
            .count()
    }

    pub(crate) fn trailing_context(&self) -> usize {
        self.lines
            .iter()
            .rev()
            .take_while(|line| matches!(line, HunkLine::Context(_)))
            .count()
    }
}

impl fmt::Display for UnifiedHunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_len, self.new_start, self.new_len
        )
    }
}

/// A unified diff addressing a single file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnifiedPatch {
    /// File named by the `+++` header, with any `b/` prefix removed.
    pub file: Option<String>,
    pub hunks: Vec<UnifiedHunk>,
}

impl UnifiedPatch {
    pub fn parse(text: &str) -> PatchResult<Self> {
        let lines: Vec<&str> = split_payload(text);
        let mut patch = UnifiedPatch::default();
        let mut idx = 0usize;

        while idx < lines.len() {
            let line = lines[idx];

            if let Some(name) = line.strip_prefix("+++ ") {
                let name = header_file_name(name);
                if let Some(first) = patch.file.take() {
                    return Err(PatchError::MultipleFiles {
                        first,
                        second: name,
                    });
                }
                patch.file = Some(name);
                idx += 1;
                continue;
            }

            if line.starts_with("@@ ") {
                let (hunk, consumed) = parse_hunk(&lines, idx)?;
                patch.hunks.push(hunk);
                idx += consumed;
                continue;
            }

            // `diff --git`, `index`, `---` and commit prose are not needed.
            idx += 1;
        }

        if patch.hunks.is_empty() {
            return Err(PatchError::parse(lines.len(), "no hunks found"));
        }

        Ok(patch)
    }
}

/// Split on `\n`, dropping a `\r` left by CRLF payloads and the empty
/// element after the final newline.
fn split_payload(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();
    if text.ends_with('\n') {
        lines.pop();
    }
    lines
}

fn header_file_name(raw: &str) -> String {
    let name = raw.split('\t').next().unwrap_or(raw).trim();
    name.strip_prefix("b/").unwrap_or(name).to_string()
}

fn parse_count(value: Option<regex::Match<'_>>, line: usize) -> PatchResult<usize> {
    match value {
        None => Ok(1),
        Some(m) => m
            .as_str()
            .parse()
            .map_err(|err| PatchError::parse(line, format!("bad hunk length: {err}"))),
    }
}

fn parse_start(value: Option<regex::Match<'_>>, line: usize) -> PatchResult<usize> {
    value
        .map(|m| m.as_str())
        .unwrap_or_default()
        .parse()
        .map_err(|err| PatchError::parse(line, format!("bad hunk start: {err}")))
}

/// Parse the hunk whose header is at `start`. Returns the hunk and the number
/// of payload lines it occupied.
fn parse_hunk(lines: &[&str], start: usize) -> PatchResult<(UnifiedHunk, usize)> {
    let line_no = start + 1;
    let caps = HUNK_HEADER
        .captures(lines[start])
        .ok_or_else(|| PatchError::parse(line_no, "malformed hunk header"))?;

    let mut hunk = UnifiedHunk {
        old_start: parse_start(caps.get(1), line_no)?,
        old_len: parse_count(caps.get(2), line_no)?,
        new_start: parse_start(caps.get(3), line_no)?,
        new_len: parse_count(caps.get(4), line_no)?,
        lines: Vec::new(),
        old_missing_newline: false,
        new_missing_newline: false,
    };

    let mut old_seen = 0usize;
    let mut new_seen = 0usize;
    let mut idx = start + 1;

    while old_seen < hunk.old_len || new_seen < hunk.new_len {
        let Some(line) = lines.get(idx) else {
            return Err(PatchError::parse(
                idx,
                format!(
                    "hunk {hunk} ends early ({old_seen} old and {new_seen} new lines found)"
                ),
            ));
        };

        match line.chars().next() {
            // Editors often strip the single space from blank context lines.
            None => {
                hunk.lines.push(HunkLine::Context(String::new()));
                old_seen += 1;
                new_seen += 1;
            }
            Some(' ') => {
                hunk.lines.push(HunkLine::Context(line[1..].to_string()));
                old_seen += 1;
                new_seen += 1;
            }
            Some('-') => {
                hunk.lines.push(HunkLine::Remove(line[1..].to_string()));
                old_seen += 1;
            }
            Some('+') => {
                hunk.lines.push(HunkLine::Add(line[1..].to_string()));
                new_seen += 1;
            }
            Some('\\') => mark_missing_newline(&mut hunk),
            Some(_) => {
                return Err(PatchError::parse(
                    idx + 1,
                    format!("unexpected line in hunk body: {line:?}"),
                ));
            }
        }
        idx += 1;

        if old_seen > hunk.old_len || new_seen > hunk.new_len {
            return Err(PatchError::parse(
                idx,
                format!("hunk {hunk} has more lines than its header declares"),
            ));
        }
    }

    if lines.get(idx).is_some_and(|line| line.starts_with('\\')) {
        mark_missing_newline(&mut hunk);
        idx += 1;
    }

    Ok((hunk, idx - start))
}

fn mark_missing_newline(hunk: &mut UnifiedHunk) {
    match hunk.lines.last() {
        Some(HunkLine::Remove(_)) => hunk.old_missing_newline = true,
        Some(HunkLine::Add(_)) => hunk.new_missing_newline = true,
        Some(HunkLine::Context(_)) => {
            hunk.old_missing_newline = true;
            hunk.new_missing_newline = true;
        }
        None => {}
    }
}

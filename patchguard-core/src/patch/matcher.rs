type LineEq = fn(&str, &str) -> bool;

/// Comparison tiers, strictest first. A hunk is only matched loosely when no
/// stricter tier finds it anywhere in the search window.
const TIERS: [LineEq; 4] = [
    |a, b| a == b,
    |a, b| a.trim_end() == b.trim_end(),
    |a, b| a.trim() == b.trim(),
    |a, b| normalise(a) == normalise(b),
];

pub(crate) struct ContextMatcher<'a> {
    lines: &'a [String],
}

impl<'a> ContextMatcher<'a> {
    pub(crate) fn new(lines: &'a [String]) -> Self {
        Self { lines }
    }

    /// Locate `pattern` at or after `floor`, preferring the position closest
    /// to `hint`. Ties resolve towards the earlier line.
    pub(crate) fn seek_near(&self, pattern: &[String], hint: usize, floor: usize) -> Option<usize> {
        if pattern.is_empty() {
            return Some(hint.max(floor).min(self.lines.len()));
        }

        if pattern.len() > self.lines.len() {
            return None;
        }

        let max_start = self.lines.len() - pattern.len();
        if floor > max_start {
            return None;
        }
        let hint = hint.clamp(floor, max_start);

        for eq in TIERS {
            for idx in outward(hint, floor, max_start) {
                if self.matches_at(idx, pattern, eq) {
                    return Some(idx);
                }
            }
        }

        None
    }

    fn matches_at(&self, idx: usize, pattern: &[String], eq: LineEq) -> bool {
        self.lines[idx..idx + pattern.len()]
            .iter()
            .zip(pattern)
            .all(|(line, pat)| eq(line, pat))
    }
}

/// Yields `hint`, `hint - 1`, `hint + 1`, `hint - 2`, ... within `[lo, hi]`.
fn outward(hint: usize, lo: usize, hi: usize) -> impl Iterator<Item = usize> {
    let span = (hint - lo).max(hi - hint);
    std::iter::once(hint).chain((1..=span).flat_map(move |step| {
        let below = hint.checked_sub(step).filter(|idx| *idx >= lo);
        let above = Some(hint + step).filter(|idx| *idx <= hi);
        below.into_iter().chain(above)
    }))
}

fn normalise(input: &str) -> String {
    input
        .trim()
        .chars()
        .map(|c| match c {
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}'
            | '\u{2212}' => '-',
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' => '"',
            '\u{00A0}' | '\u{2002}' | '\u{2003}' | '\u{2004}' | '\u{2005}' | '\u{2006}'
            | '\u{2007}' | '\u{2008}' | '\u{2009}' | '\u{200A}' | '\u{202F}' | '\u{205F}'
            | '\u{3000}' => ' ',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(input: &[&str]) -> Vec<String> {
        input.iter().map(|line| line.to_string()).collect()
    }

    #[test]
    fn prefers_match_closest_to_hint() {
        let file = lines(&["x", "}", "a", "}", "b", "}"]);
        let matcher = ContextMatcher::new(&file);
        let pattern = lines(&["}"]);

        assert_eq!(matcher.seek_near(&pattern, 3, 0), Some(3));
        assert_eq!(matcher.seek_near(&pattern, 4, 0), Some(3));
        assert_eq!(matcher.seek_near(&pattern, 0, 0), Some(1));
    }

    #[test]
    fn never_matches_before_floor() {
        let file = lines(&["a", "b", "a", "b"]);
        let matcher = ContextMatcher::new(&file);

        assert_eq!(matcher.seek_near(&lines(&["a", "b"]), 0, 1), Some(2));
        assert_eq!(matcher.seek_near(&lines(&["a", "b"]), 0, 3), None);
    }

    #[test]
    fn exact_tier_wins_over_closer_loose_match() {
        let file = lines(&["  foo", "bar", "foo"]);
        let matcher = ContextMatcher::new(&file);

        assert_eq!(matcher.seek_near(&lines(&["foo"]), 0, 0), Some(2));
    }

    #[test]
    fn falls_back_to_whitespace_and_punctuation_insensitive_match() {
        let file = lines(&["int x = 1;   ", "\u{201C}quoted\u{201D}"]);
        let matcher = ContextMatcher::new(&file);

        assert_eq!(matcher.seek_near(&lines(&["int x = 1;"]), 0, 0), Some(0));
        assert_eq!(matcher.seek_near(&lines(&["\"quoted\""]), 0, 0), Some(1));
    }

    #[test]
    fn outward_visits_every_index_once() {
        let mut visited: Vec<usize> = outward(2, 0, 5).collect();
        assert_eq!(visited[..3], [2, 1, 3]);
        visited.sort_unstable();
        assert_eq!(visited, vec![0, 1, 2, 3, 4, 5]);
    }
}

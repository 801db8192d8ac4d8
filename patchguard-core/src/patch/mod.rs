//! Patch payload formats and their application to in-memory text.
//!
//! Two payload formats are understood:
//!
//! - **unified**: the GNU unified diff format, applied line by line with
//!   context-anchored hunk search (see [`UnifiedPatch`]).
//! - **diff-match-patch**: the textual format produced by diff-match-patch's
//!   `patch_toText`, applied character by character with Bitap fuzzy matching
//!   (see [`DmpPatch`]).
//!
//! Neither format trusts line or character offsets; offsets only seed the
//! search for each hunk's context.

mod applicator;
mod dmp;
mod matcher;
mod unified;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PatchResult;

pub use dmp::{DmpDiff, DmpHunk, DmpPatch};
pub use unified::{HunkLine, UnifiedHunk, UnifiedPatch};

/// Default number of context lines a unified hunk may shed from each end.
pub const DEFAULT_MAX_FUZZ: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatchFormat {
    #[default]
    Auto,
    Unified,
    DiffMatchPatch,
}

impl PatchFormat {
    /// Guess the format of a payload. Never returns [`PatchFormat::Auto`].
    ///
    /// File headers (`---`/`+++`) mean unified. Otherwise an encoded newline
    /// in a hunk body means diff-match-patch, which always escapes line breaks.
    pub fn detect(text: &str) -> PatchFormat {
        let mut in_body = false;
        for line in text.lines() {
            if line.starts_with("--- ") || line.starts_with("+++ ") {
                return PatchFormat::Unified;
            }
            if line.starts_with("@@ ") {
                in_body = true;
                continue;
            }
            if in_body && line.contains("%0A") {
                return PatchFormat::DiffMatchPatch;
            }
        }
        PatchFormat::Unified
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PatchFormat::Auto => "auto",
            PatchFormat::Unified => "unified",
            PatchFormat::DiffMatchPatch => "diff-match-patch",
        }
    }
}

impl fmt::Display for PatchFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatchFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(PatchFormat::Auto),
            "unified" | "diff" => Ok(PatchFormat::Unified),
            "diff-match-patch" | "dmp" => Ok(PatchFormat::DiffMatchPatch),
            other => Err(format!(
                "unknown patch format '{other}' (expected auto, unified or diff-match-patch)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Unified hunks only: context lines that may be dropped from each end.
    pub max_fuzz: usize,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            max_fuzz: DEFAULT_MAX_FUZZ,
        }
    }
}

/// A parsed patch payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    Unified(UnifiedPatch),
    DiffMatchPatch(DmpPatch),
}

impl Patch {
    pub fn parse(text: &str, format: PatchFormat) -> PatchResult<Self> {
        let format = match format {
            PatchFormat::Auto => PatchFormat::detect(text),
            explicit => explicit,
        };

        match format {
            PatchFormat::DiffMatchPatch => DmpPatch::parse(text).map(Patch::DiffMatchPatch),
            _ => UnifiedPatch::parse(text).map(Patch::Unified),
        }
    }

    pub fn format(&self) -> PatchFormat {
        match self {
            Patch::Unified(_) => PatchFormat::Unified,
            Patch::DiffMatchPatch(_) => PatchFormat::DiffMatchPatch,
        }
    }

    pub fn hunk_count(&self) -> usize {
        match self {
            Patch::Unified(patch) => patch.hunks.len(),
            Patch::DiffMatchPatch(patch) => patch.hunks.len(),
        }
    }

    /// Apply every hunk that can be located. Hunks that cannot are reported
    /// as [`HunkStatus::Failed`] and leave the text untouched.
    pub fn apply(&self, original: &str, options: &ApplyOptions) -> PatchApplication {
        match self {
            Patch::Unified(patch) => applicator::apply_unified(original, patch, options),
            Patch::DiffMatchPatch(patch) => patch.apply(original),
        }
    }
}

/// Outcome of applying one hunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkStatus {
    /// `offset` is the distance from the position the hunk header named.
    /// `fuzz` counts context lines dropped (unified) or mismatched context
    /// characters (diff-match-patch).
    Applied { offset: isize, fuzz: usize },
    AlreadyApplied,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HunkReport {
    pub index: usize,
    pub header: String,
    pub status: HunkStatus,
}

impl HunkReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, HunkStatus::Failed { .. })
    }
}

impl fmt::Display for HunkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hunk #{} {}: ", self.index + 1, self.header)?;
        match &self.status {
            HunkStatus::Applied { offset: 0, fuzz: 0 } => f.write_str("applied"),
            HunkStatus::Applied { offset, fuzz } => {
                write!(f, "applied (offset {offset}, fuzz {fuzz})")
            }
            HunkStatus::AlreadyApplied => f.write_str("already applied"),
            HunkStatus::Failed { reason } => write!(f, "FAILED ({reason})"),
        }
    }
}

/// Patched text plus per-hunk results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchApplication {
    pub text: String,
    pub hunks: Vec<HunkReport>,
}

impl PatchApplication {
    pub fn failed_count(&self) -> usize {
        self.hunks.iter().filter(|hunk| hunk.is_failed()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.failed_count() == 0
    }
}

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for patching operations
pub type PatchResult<T> = std::result::Result<T, PatchError>;

/// Which input of a patch job a precondition refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRole {
    Target,
    Patch,
}

impl fmt::Display for InputRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputRole::Target => f.write_str("target"),
            InputRole::Patch => f.write_str("patch"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PatchError {
    /// A vendored file or its patch payload is absent. Treated as a broken
    /// build environment, never skipped.
    #[error("{role} file not found: {}", .path.display())]
    MissingInput { role: InputRole, path: PathBuf },

    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid patch at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("patch addresses more than one file ({first} and {second})")]
    MultipleFiles { first: String, second: String },

    #[error("patch engine '{program}' is unavailable: {reason}")]
    EngineUnavailable { program: String, reason: String },

    #[error("patch engine '{program}' failed: {detail}")]
    Engine { program: String, detail: String },

    #[error("{failed} of {total} hunks could not be applied to {}", .path.display())]
    PartialApply {
        path: PathBuf,
        failed: usize,
        total: usize,
    },

    #[error("failed to lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PatchError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PatchError::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(line: usize, reason: impl Into<String>) -> Self {
        PatchError::Parse {
            line,
            reason: reason.into(),
        }
    }
}

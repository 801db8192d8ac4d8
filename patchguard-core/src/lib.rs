//! Idempotent single-file patching for vendored dependencies
//!
//! This crate provides:
//! - Unified diff and diff-match-patch parsing with fuzzy hunk placement
//! - Sentinel files that make a patch job a no-op once it has run
//! - Pluggable patch engines, builtin or an external `patch` program
//! - A process lock so concurrent builds patch a target only once

pub mod engine;
pub mod error;
mod files;
pub mod lock;
pub mod patch;
pub mod patcher;
pub mod sentinel;

pub use engine::{
    BuiltinEngine, DefaultEngineProvider, EngineProvider, EngineSpec, ExternalToolEngine,
    PatchEngine,
};
pub use error::{InputRole, PatchError, PatchResult};
pub use patch::{
    ApplyOptions, HunkReport, HunkStatus, Patch, PatchApplication, PatchFormat,
};
pub use patcher::{
    JobOptions, JobStatus, PartialPolicy, PatchJob, PatchOutcome, Patcher, ensure_patched,
};
pub use sentinel::{Sentinel, SentinelMode, SentinelState};

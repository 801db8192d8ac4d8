//! Loader for `patchguard.toml`
//!
//! Turns the declarative job list into [`patchguard_core::PatchJob`]s:
//! placeholders are expanded, relative paths are anchored at the config
//! file, and gates are evaluated against the build flags of the current
//! build.

pub mod flags;
pub mod loader;
pub mod vars;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

pub use flags::{BUILD_FLAGS_ENV, BuildFlags, GateConfig, normalize_flag};
pub use loader::{
    CONFIG_FILE_NAME, ConfigFile, DEFAULT_SENTINEL_NAME, Defaults, PatchguardConfig, RawJob,
    ResolvedJob,
};
pub use vars::{VAR_ENV_PREFIX, VarSet};

/// Load `.env` from `dir` into the process environment if it exists.
///
/// Variables already set in the environment are left alone.
pub fn load_dotenv(dir: &Path) -> Result<Option<PathBuf>> {
    let path = dir.join(".env");
    if !path.is_file() {
        return Ok(None);
    }
    dotenvy::from_path(&path).with_context(|| format!("Failed to load {}", path.display()))?;
    debug!(path = %path.display(), "Loaded environment file");
    Ok(Some(path))
}

//! Patch-application capability.
//!
//! The patcher never reaches for a global patch implementation. It asks an
//! [`EngineProvider`] for a [`PatchEngine`] matching the job's [`EngineSpec`],
//! so hosts decide what is available and how missing tools get installed.

mod external;
mod provider;

use serde::{Deserialize, Serialize};

use crate::error::PatchResult;
use crate::patch::{ApplyOptions, Patch, PatchApplication, PatchFormat};

pub use external::ExternalToolEngine;
pub use provider::{DefaultEngineProvider, EngineProvider};

/// Turns original text plus a patch payload into patched text.
pub trait PatchEngine {
    fn name(&self) -> &str;

    fn apply(
        &self,
        original: &str,
        patch_text: &str,
        options: &ApplyOptions,
    ) -> PatchResult<PatchApplication>;
}

/// Which engine a job asks for.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EngineSpec {
    /// In-process parser and context matcher.
    #[default]
    Builtin,
    /// A GNU-compatible `patch` executable.
    External {
        program: String,
        /// Command run once when `program` cannot be found on `PATH`.
        #[serde(default)]
        install: Option<String>,
    },
}

impl EngineSpec {
    pub fn label(&self) -> &str {
        match self {
            EngineSpec::Builtin => "builtin",
            EngineSpec::External { program, .. } => program,
        }
    }
}

/// Applies patches in-process.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinEngine {
    format: PatchFormat,
}

impl BuiltinEngine {
    pub fn new(format: PatchFormat) -> Self {
        Self { format }
    }
}

impl PatchEngine for BuiltinEngine {
    fn name(&self) -> &str {
        "builtin"
    }

    fn apply(
        &self,
        original: &str,
        patch_text: &str,
        options: &ApplyOptions,
    ) -> PatchResult<PatchApplication> {
        let patch = Patch::parse(patch_text, self.format)?;
        Ok(patch.apply(original, options))
    }
}

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::PatchEngine;
use crate::error::{PatchError, PatchResult};
use crate::patch::{ApplyOptions, HunkReport, HunkStatus, PatchApplication};

static FAILED_SUMMARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+) out of (\d+) hunks? FAILED")
        .unwrap_or_else(|err| panic!("invalid patch summary regex: {err}"))
});

/// Runs a GNU-compatible `patch` binary against a scratch copy of the target.
#[derive(Debug, Clone)]
pub struct ExternalToolEngine {
    program: PathBuf,
    label: String,
}

impl ExternalToolEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let label = program.display().to_string();
        Self { program, label }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl PatchEngine for ExternalToolEngine {
    fn name(&self) -> &str {
        &self.label
    }

    fn apply(
        &self,
        original: &str,
        patch_text: &str,
        options: &ApplyOptions,
    ) -> PatchResult<PatchApplication> {
        let scratch = tempfile::tempdir()
            .map_err(|err| PatchError::io("create scratch directory in", std::env::temp_dir(), err))?;
        let input = scratch.path().join("original");
        let payload = scratch.path().join("payload.patch");
        let output = scratch.path().join("patched");

        fs::write(&input, original).map_err(|err| PatchError::io("write", &input, err))?;
        fs::write(&payload, patch_text).map_err(|err| PatchError::io("write", &payload, err))?;

        let result = Command::new(&self.program)
            .arg("--force")
            .arg("--silent")
            .arg(format!("--fuzz={}", options.max_fuzz))
            .arg("--output")
            .arg(&output)
            .arg("--input")
            .arg(&payload)
            .arg(&input)
            .output();

        let result = match result {
            Ok(result) => result,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(PatchError::EngineUnavailable {
                    program: self.label.clone(),
                    reason: "executable not found".to_string(),
                });
            }
            Err(err) => return Err(PatchError::io("run", &self.program, err)),
        };

        let stdout = String::from_utf8_lossy(&result.stdout);
        let stderr = String::from_utf8_lossy(&result.stderr);
        debug!(program = %self.label, status = ?result.status.code(), "External patch finished");

        let status = match result.status.code() {
            Some(0) => HunkStatus::Applied { offset: 0, fuzz: 0 },
            Some(1) => {
                let summary = FAILED_SUMMARY
                    .find(&stdout)
                    .or_else(|| FAILED_SUMMARY.find(&stderr))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| "some hunks failed".to_string());
                HunkStatus::Failed { reason: summary }
            }
            code => {
                return Err(PatchError::Engine {
                    program: self.label.clone(),
                    detail: format!(
                        "exit status {}: {}",
                        code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                        stderr.trim()
                    ),
                });
            }
        };

        let text = fs::read_to_string(&output).map_err(|err| PatchError::io("read", &output, err))?;

        Ok(PatchApplication {
            text,
            hunks: vec![HunkReport {
                index: 0,
                header: "all hunks".to_string(),
                status,
            }],
        })
    }
}

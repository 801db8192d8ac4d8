//! Marker files recording that a patch has been applied.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PatchError, PatchResult};

const DIGEST_PREFIX: &str = "sha256:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SentinelMode {
    /// Zero-byte file; presence is the whole record.
    #[default]
    Marker,
    /// Holds the digest of the patched content so drift can be reported.
    Digest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentinelState {
    Absent,
    /// Present and not checked against the target.
    Present,
    /// Present, and the target still hashes to the recorded digest.
    Verified,
    /// Present, but the target no longer matches what was written.
    Drifted { recorded: String, actual: String },
}

impl SentinelState {
    pub fn is_present(&self) -> bool {
        !matches!(self, SentinelState::Absent)
    }
}

#[derive(Debug, Clone)]
pub struct Sentinel {
    path: PathBuf,
    mode: SentinelMode,
}

impl Sentinel {
    pub fn new(path: impl Into<PathBuf>, mode: SentinelMode) -> Self {
        Self {
            path: path.into(),
            mode,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Inspect the sentinel. Marker sentinels are only tested for existence;
    /// digest sentinels are compared against `target`.
    pub fn state(&self, target: &Path) -> PatchResult<SentinelState> {
        if !self.exists() {
            return Ok(SentinelState::Absent);
        }
        if self.mode == SentinelMode::Marker {
            return Ok(SentinelState::Present);
        }

        let recorded = fs::read_to_string(&self.path)
            .map_err(|err| PatchError::io("read", &self.path, err))?;
        let recorded = recorded.trim();
        if !recorded.starts_with(DIGEST_PREFIX) {
            // Written in marker mode, or by an older run.
            return Ok(SentinelState::Present);
        }

        let actual = match fs::read_to_string(target) {
            Ok(content) => content_digest(&content),
            Err(err) if err.kind() == ErrorKind::NotFound => "<missing>".to_string(),
            Err(err) => return Err(PatchError::io("read", target, err)),
        };

        if actual == recorded {
            Ok(SentinelState::Verified)
        } else {
            Ok(SentinelState::Drifted {
                recorded: recorded.to_string(),
                actual,
            })
        }
    }

    /// Create or truncate the sentinel.
    pub fn write(&self, patched: &str) -> PatchResult<()> {
        let contents = match self.mode {
            SentinelMode::Marker => String::new(),
            SentinelMode::Digest => format!("{}\n", content_digest(patched)),
        };
        fs::write(&self.path, contents).map_err(|err| PatchError::io("write", &self.path, err))
    }
}

pub fn content_digest(text: &str) -> String {
    format!("{DIGEST_PREFIX}{:x}", Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    #[test]
    fn marker_sentinel_is_empty_and_never_read() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let marker = dir.child(".patched");
        let sentinel = Sentinel::new(marker.path(), SentinelMode::Marker);

        assert_eq!(sentinel.state(dir.child("SD.h").path())?, SentinelState::Absent);
        sentinel.write("patched text")?;

        assert_eq!(fs::metadata(marker.path())?.len(), 0);
        assert_eq!(sentinel.state(dir.child("SD.h").path())?, SentinelState::Present);
        Ok(())
    }

    #[test]
    fn digest_sentinel_detects_drift() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let target = dir.child("MTP_Teensy.h");
        target.write_str("patched\n")?;
        let sentinel = Sentinel::new(dir.child(".patched").path(), SentinelMode::Digest);

        sentinel.write("patched\n")?;
        assert_eq!(sentinel.state(target.path())?, SentinelState::Verified);

        target.write_str("edited by hand\n")?;
        let state = sentinel.state(target.path())?;
        assert!(matches!(state, SentinelState::Drifted { .. }));
        assert!(state.is_present());
        Ok(())
    }

    #[test]
    fn digest_mode_accepts_legacy_empty_marker() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let marker = dir.child(".patched");
        marker.touch()?;
        let sentinel = Sentinel::new(marker.path(), SentinelMode::Digest);

        assert_eq!(sentinel.state(dir.child("x").path())?, SentinelState::Present);
        Ok(())
    }

    #[test]
    fn digest_is_stable_sha256() {
        assert_eq!(
            content_digest(""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}

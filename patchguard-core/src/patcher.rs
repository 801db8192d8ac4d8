//! The idempotent single-file patch protocol.
//!
//! ```text
//! gate closed ──────────────► GatedOff
//! sentinel present ─────────► AlreadyPatched
//! required dir missing ─────► DirectoryMissing
//! lock, re-check sentinel ──► AlreadyPatched
//! target/patch missing ─────► Err(MissingInput)
//! apply, write target, write sentinel ─► Patched
//! ```
//!
//! The transition is one-way: nothing here restores the original file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::engine::{DefaultEngineProvider, EngineProvider, EngineSpec};
use crate::error::{InputRole, PatchError, PatchResult};
use crate::files::{read_text, write_atomic};
use crate::lock::JobLock;
use crate::patch::{ApplyOptions, DEFAULT_MAX_FUZZ, PatchApplication, PatchFormat};
use crate::sentinel::{Sentinel, SentinelMode, SentinelState};

/// What to do when some hunks cannot be located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartialPolicy {
    /// Log the failed hunks, write what applied, and record the sentinel.
    #[default]
    Tolerate,
    /// Abort without touching the target or the sentinel.
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    pub format: PatchFormat,
    pub engine: EngineSpec,
    pub on_partial: PartialPolicy,
    pub sentinel_mode: SentinelMode,
    pub max_fuzz: usize,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            format: PatchFormat::Auto,
            engine: EngineSpec::Builtin,
            on_partial: PartialPolicy::Tolerate,
            sentinel_mode: SentinelMode::Marker,
            max_fuzz: DEFAULT_MAX_FUZZ,
        }
    }
}

/// One target file, its patch payload, and the sentinel guarding them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchJob {
    pub name: String,
    pub target: PathBuf,
    pub patch: PathBuf,
    pub sentinel: PathBuf,
    /// Externally decided; a closed gate makes the job a no-op.
    pub gate: bool,
    /// When set and absent, the package is not installed for this build.
    pub require_dir: Option<PathBuf>,
    pub options: JobOptions,
}

impl PatchJob {
    pub fn new(
        name: impl Into<String>,
        target: impl Into<PathBuf>,
        patch: impl Into<PathBuf>,
        sentinel: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            patch: patch.into(),
            sentinel: sentinel.into(),
            gate: true,
            require_dir: None,
            options: JobOptions::default(),
        }
    }

    pub fn with_gate(mut self, gate: bool) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_require_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.require_dir = Some(dir.into());
        self
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    fn sentinel(&self) -> Sentinel {
        Sentinel::new(&self.sentinel, self.options.sentinel_mode)
    }

    fn missing_required_dir(&self) -> Option<&Path> {
        self.require_dir.as_deref().filter(|dir| !dir.is_dir())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    GatedOff,
    DirectoryMissing(PathBuf),
    AlreadyPatched(SentinelState),
    Patched(PatchApplication),
}

/// Read-only snapshot of a job, for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub gate: bool,
    pub sentinel: SentinelState,
    pub target_present: bool,
    pub patch_present: bool,
    pub require_dir_present: Option<bool>,
}

pub struct Patcher<P = DefaultEngineProvider> {
    provider: P,
}

impl Patcher<DefaultEngineProvider> {
    pub fn with_default_engines() -> Self {
        Self::new(DefaultEngineProvider::new())
    }
}

impl<P: EngineProvider> Patcher<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Ensure `job.target` carries the patch and `job.sentinel` exists,
    /// applying the patch at most once per sentinel lifetime.
    pub fn ensure_patched(&self, job: &PatchJob) -> PatchResult<PatchOutcome> {
        let _span = info_span!("patch_job", job = %job.name).entered();

        if !job.gate {
            debug!("Gate closed; skipping");
            return Ok(PatchOutcome::GatedOff);
        }

        let sentinel = job.sentinel();
        if sentinel.exists() {
            return self.already_patched(job, &sentinel);
        }

        if let Some(dir) = job.missing_required_dir() {
            debug!(dir = %dir.display(), "Package directory not present; skipping");
            return Ok(PatchOutcome::DirectoryMissing(dir.to_path_buf()));
        }

        // Before locking, so an uninstalled package reports the missing
        // target rather than an unopenable lock file.
        check_inputs(job)?;

        let lock = JobLock::acquire(sentinel.path())?;
        if sentinel.exists() {
            debug!("Another process finished while we waited for the lock");
            drop(lock);
            return self.already_patched(job, &sentinel);
        }

        let application = self.compute(job)?;
        let failed = application.failed_count();
        if failed > 0 {
            for hunk in application.hunks.iter().filter(|hunk| hunk.is_failed()) {
                warn!(target_file = %job.target.display(), "{hunk}");
            }
            if job.options.on_partial == PartialPolicy::Fail {
                return Err(PatchError::PartialApply {
                    path: job.target.clone(),
                    failed,
                    total: application.hunks.len(),
                });
            }
        }

        info!("Applying patch to {}", job.target.display());
        write_atomic(&job.target, application.text.as_bytes())?;
        sentinel.write(&application.text)?;
        drop(lock);

        Ok(PatchOutcome::Patched(application))
    }

    /// Apply in memory only. Ignores the gate and the sentinel.
    pub fn dry_run(&self, job: &PatchJob) -> PatchResult<PatchApplication> {
        let _span = info_span!("dry_run", job = %job.name).entered();
        self.compute(job)
    }

    pub fn status(&self, job: &PatchJob) -> PatchResult<JobStatus> {
        Ok(JobStatus {
            gate: job.gate,
            sentinel: job.sentinel().state(&job.target)?,
            target_present: job.target.is_file(),
            patch_present: job.patch.is_file(),
            require_dir_present: job.require_dir.as_deref().map(Path::is_dir),
        })
    }

    fn compute(&self, job: &PatchJob) -> PatchResult<PatchApplication> {
        check_inputs(job)?;

        let engine = self
            .provider
            .acquire(&job.options.engine, job.options.format)?;
        let original = read_text(&job.target)?;
        let patch_text = read_text(&job.patch)?;
        debug!(
            engine = engine.name(),
            patch = %job.patch.display(),
            "Applying patch in memory"
        );

        engine.apply(
            &original,
            &patch_text,
            &ApplyOptions {
                max_fuzz: job.options.max_fuzz,
            },
        )
    }

    fn already_patched(&self, job: &PatchJob, sentinel: &Sentinel) -> PatchResult<PatchOutcome> {
        let state = sentinel.state(&job.target)?;
        if let SentinelState::Drifted { recorded, actual } = &state {
            warn!(
                target_file = %job.target.display(),
                recorded = %recorded,
                actual = %actual,
                "Target changed since it was patched; delete the sentinel to re-apply"
            );
        } else {
            debug!(sentinel = %sentinel.path().display(), "Already patched");
        }
        Ok(PatchOutcome::AlreadyPatched(state))
    }
}

fn check_inputs(job: &PatchJob) -> PatchResult<()> {
    if !job.target.is_file() {
        return Err(PatchError::MissingInput {
            role: InputRole::Target,
            path: job.target.clone(),
        });
    }
    if !job.patch.is_file() {
        return Err(PatchError::MissingInput {
            role: InputRole::Patch,
            path: job.patch.clone(),
        });
    }
    Ok(())
}

/// One-shot form of [`Patcher::ensure_patched`] with the builtin engine.
pub fn ensure_patched(
    target: impl Into<PathBuf>,
    patch: impl Into<PathBuf>,
    sentinel: impl Into<PathBuf>,
    gate: bool,
) -> PatchResult<PatchOutcome> {
    let target = target.into();
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "patch".to_string());
    let job = PatchJob::new(name, target, patch, sentinel).with_gate(gate);
    Patcher::with_default_engines().ensure_patched(&job)
}

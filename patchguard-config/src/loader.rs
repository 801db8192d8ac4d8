use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use patchguard_core::{
    EngineSpec, JobOptions, PartialPolicy, PatchFormat, PatchJob, SentinelMode,
    patch::DEFAULT_MAX_FUZZ,
};
use serde::Deserialize;
use tracing::debug;

use crate::flags::{BuildFlags, GateConfig};
use crate::vars::VarSet;

pub const CONFIG_FILE_NAME: &str = "patchguard.toml";

/// Sentinel file name used when a job does not name one.
pub const DEFAULT_SENTINEL_NAME: &str = ".patched";

/// On-disk shape of `patchguard.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub vars: IndexMap<String, String>,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default, rename = "job")]
    pub jobs: Vec<RawJob>,
}

/// Options every job inherits unless it overrides them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Defaults {
    pub format: PatchFormat,
    pub engine: EngineSpec,
    pub on_partial: PartialPolicy,
    pub sentinel_mode: SentinelMode,
    pub max_fuzz: usize,
}

impl Default for Defaults {
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

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawJob {
    pub name: String,
    pub target: String,
    pub patch: String,
    #[serde(default)]
    pub sentinel: Option<String>,
    #[serde(default)]
    pub require_dir: Option<String>,
    #[serde(default)]
    pub gate: Option<GateConfig>,
    #[serde(default)]
    pub engine: Option<EngineSpec>,
    #[serde(default)]
    pub format: Option<PatchFormat>,
    #[serde(default)]
    pub on_partial: Option<PartialPolicy>,
    #[serde(default)]
    pub sentinel_mode: Option<SentinelMode>,
    #[serde(default)]
    pub max_fuzz: Option<usize>,
}

/// A job with placeholders expanded, paths absolute, and defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedJob {
    pub name: String,
    pub target: PathBuf,
    pub patch: PathBuf,
    pub sentinel: PathBuf,
    pub require_dir: Option<PathBuf>,
    pub gate: Option<GateConfig>,
    pub options: JobOptions,
}

impl ResolvedJob {
    pub fn gate_open(&self, flags: &BuildFlags) -> bool {
        self.gate.as_ref().is_none_or(|gate| gate.evaluate(flags))
    }

    pub fn to_patch_job(&self, flags: &BuildFlags) -> PatchJob {
        let job = PatchJob::new(&self.name, &self.target, &self.patch, &self.sentinel)
            .with_gate(self.gate_open(flags))
            .with_options(self.options.clone());
        match &self.require_dir {
            Some(dir) => job.with_require_dir(dir),
            None => job,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchguardConfig {
    /// Directory relative paths were resolved against.
    pub base_dir: PathBuf,
    pub jobs: Vec<ResolvedJob>,
}

impl PatchguardConfig {
    pub fn load(path: &Path, vars: &VarSet) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let base_dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let config = Self::parse(&text, base_dir, vars)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        debug!(path = %path.display(), jobs = config.jobs.len(), "Loaded patchguard config");
        Ok(config)
    }

    pub fn parse(text: &str, base_dir: &Path, vars: &VarSet) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text).context("Failed to parse TOML")?;

        let mut seen = HashSet::new();
        let mut jobs = Vec::with_capacity(file.jobs.len());
        for raw in &file.jobs {
            if raw.name.trim().is_empty() {
                bail!("Job names must not be empty");
            }
            if !seen.insert(raw.name.as_str()) {
                bail!("Duplicate job name '{}'", raw.name);
            }
            let job = resolve_job(raw, &file, base_dir, vars)
                .with_context(|| format!("Invalid job '{}'", raw.name))?;
            jobs.push(job);
        }

        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            jobs,
        })
    }

    /// Look `patchguard.toml` up in `dir`.
    pub fn locate(dir: &Path) -> Option<PathBuf> {
        let candidate = dir.join(CONFIG_FILE_NAME);
        candidate.is_file().then_some(candidate)
    }

    /// Jobs named in `names`, in config order, or all of them when empty.
    pub fn select(&self, names: &[String]) -> Result<Vec<&ResolvedJob>> {
        if let Some(unknown) = names
            .iter()
            .find(|name| !self.jobs.iter().any(|job| &job.name == *name))
        {
            bail!("No job named '{unknown}' in config");
        }
        Ok(self
            .jobs
            .iter()
            .filter(|job| names.is_empty() || names.contains(&job.name))
            .collect())
    }
}

fn resolve_job(raw: &RawJob, file: &ConfigFile, base_dir: &Path, vars: &VarSet) -> Result<ResolvedJob> {
    let path = |field: &str, value: &str| -> Result<PathBuf> {
        let expanded = vars
            .expand(value, &file.vars)
            .with_context(|| format!("in field '{field}'"))?;
        Ok(join_base(base_dir, Path::new(&expanded)))
    };

    let target = path("target", &raw.target)?;
    let patch = path("patch", &raw.patch)?;
    let sentinel = match &raw.sentinel {
        Some(sentinel) => path("sentinel", sentinel)?,
        None => default_sentinel(&target),
    };
    let require_dir = raw
        .require_dir
        .as_deref()
        .map(|dir| path("require_dir", dir))
        .transpose()?;

    let defaults = &file.defaults;
    let options = JobOptions {
        format: raw.format.unwrap_or(defaults.format),
        engine: raw.engine.clone().unwrap_or_else(|| defaults.engine.clone()),
        on_partial: raw.on_partial.unwrap_or(defaults.on_partial),
        sentinel_mode: raw.sentinel_mode.unwrap_or(defaults.sentinel_mode),
        max_fuzz: raw.max_fuzz.unwrap_or(defaults.max_fuzz),
    };

    Ok(ResolvedJob {
        name: raw.name.clone(),
        target,
        patch,
        sentinel,
        require_dir,
        gate: raw.gate.clone(),
        options,
    })
}

fn default_sentinel(target: &Path) -> PathBuf {
    target
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(DEFAULT_SENTINEL_NAME)
}

fn join_base(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

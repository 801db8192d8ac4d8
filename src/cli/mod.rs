use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Args, Parser, Subcommand};
use patchguard_config::{
    BuildFlags, CONFIG_FILE_NAME, PatchguardConfig, ResolvedJob, VarSet, load_dotenv,
};
use patchguard_core::PatchFormat;

pub mod apply;
pub mod check;
pub mod run;
pub mod status;

/// patchguard - apply patches to vendored dependencies exactly once
#[derive(Parser, Debug)]
#[command(name = "patchguard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the job file (defaults to ./patchguard.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ensure every selected job is patched
    Run(RunArgs),

    /// Show gate, sentinel and input state per job
    Status(JobArgs),

    /// Apply in memory and report per-hunk results without writing
    Check(JobArgs),

    /// Patch a single file without a config file
    Apply(ApplyArgs),
}

#[derive(Args, Debug, Default)]
pub struct JobArgs {
    /// Only handle the named job (repeatable)
    #[arg(long = "job", value_name = "NAME")]
    pub jobs: Vec<String>,

    /// Build flag for gate evaluation, e.g. "-D USB_MTPDISK" (repeatable)
    #[arg(long = "build-flag", value_name = "FLAG", allow_hyphen_values = true)]
    pub build_flags: Vec<String>,

    /// Placeholder value as NAME=VALUE (repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub vars: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub jobs: JobArgs,

    /// Fail instead of writing a partially applied patch
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// File to patch
    #[arg(long)]
    pub target: PathBuf,

    /// Patch payload
    #[arg(long)]
    pub patch: PathBuf,

    /// Sentinel file (defaults to .patched next to the target)
    #[arg(long)]
    pub sentinel: Option<PathBuf>,

    /// Payload format: auto, unified or diff-match-patch
    #[arg(long, default_value_t = PatchFormat::Auto)]
    pub format: PatchFormat,

    /// Fail instead of writing a partially applied patch
    #[arg(long)]
    pub strict: bool,
}

/// Config, build flags and selected jobs shared by the config-driven commands.
pub(crate) struct Session {
    pub config: PatchguardConfig,
    pub flags: BuildFlags,
}

impl Session {
    pub fn open(cli: &Cli, args: &JobArgs) -> Result<Self> {
        let path = match &cli.config {
            Some(path) => path.clone(),
            None => {
                let cwd = std::env::current_dir().context("Failed to read working directory")?;
                PatchguardConfig::locate(&cwd)
                    .ok_or_else(|| anyhow!("No {CONFIG_FILE_NAME} in {}", cwd.display()))?
            }
        };
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            load_dotenv(dir)?;
        }

        let vars = VarSet::from_assignments(&args.vars)?;
        let config = PatchguardConfig::load(&path, &vars)?;

        let mut flags = BuildFlags::from_env()?;
        for flag in &args.build_flags {
            flags.extend_from_str(flag)?;
        }

        Ok(Self { config, flags })
    }

    pub fn jobs(&self, args: &JobArgs) -> Result<Vec<&ResolvedJob>> {
        self.config.select(&args.jobs)
    }
}

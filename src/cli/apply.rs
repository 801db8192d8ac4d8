use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use patchguard_config::DEFAULT_SENTINEL_NAME;
use patchguard_core::{JobOptions, PartialPolicy, PatchJob, Patcher};

use super::ApplyArgs;
use super::run::describe;

pub fn handle(args: &ApplyArgs) -> Result<ExitCode> {
    let sentinel = args.sentinel.clone().unwrap_or_else(|| {
        args.target
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(DEFAULT_SENTINEL_NAME)
    });
    let name = args
        .target
        .file_name()
        .map_or_else(|| "apply".to_string(), |name| name.to_string_lossy().into_owned());

    let job = PatchJob::new(&name, &args.target, &args.patch, sentinel).with_options(JobOptions {
        format: args.format,
        on_partial: if args.strict {
            PartialPolicy::Fail
        } else {
            PartialPolicy::Tolerate
        },
        ..JobOptions::default()
    });

    let outcome = Patcher::with_default_engines()
        .ensure_patched(&job)
        .with_context(|| format!("Failed to patch {}", args.target.display()))?;
    println!("{name}: {}", describe(&outcome));
    Ok(ExitCode::SUCCESS)
}

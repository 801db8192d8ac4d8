use std::process::ExitCode;

use anyhow::{Context, Result};
use patchguard_core::{PartialPolicy, PatchOutcome, Patcher, SentinelState};
use tracing::info;

use super::{Cli, RunArgs, Session};

pub fn handle(cli: &Cli, args: &RunArgs) -> Result<ExitCode> {
    let session = Session::open(cli, &args.jobs)?;
    let patcher = Patcher::with_default_engines();

    for job in session.jobs(&args.jobs)? {
        let mut patch_job = job.to_patch_job(&session.flags);
        if args.strict {
            patch_job.options.on_partial = PartialPolicy::Fail;
        }

        let outcome = patcher
            .ensure_patched(&patch_job)
            .with_context(|| format!("Job '{}' failed", job.name))?;
        println!("{}: {}", job.name, describe(&outcome));
    }

    let (hits, misses) = patcher.provider().cache_stats();
    info!(cache_hits = hits, cache_misses = misses, "All jobs done");
    Ok(ExitCode::SUCCESS)
}

pub(crate) fn describe(outcome: &PatchOutcome) -> String {
    match outcome {
        PatchOutcome::GatedOff => "skipped (gate closed)".to_string(),
        PatchOutcome::DirectoryMissing(dir) => {
            format!("skipped ({} not present)", dir.display())
        }
        PatchOutcome::AlreadyPatched(SentinelState::Drifted { .. }) => {
            "already patched (target changed since)".to_string()
        }
        PatchOutcome::AlreadyPatched(_) => "already patched".to_string(),
        PatchOutcome::Patched(application) => {
            let total = application.hunks.len();
            match application.failed_count() {
                0 => format!("patched ({total} hunks)"),
                failed => format!("patched with {failed} of {total} hunks failed"),
            }
        }
    }
}

use std::process::ExitCode;

use anyhow::{Context, Result};
use patchguard_core::Patcher;

use super::{Cli, JobArgs, Session};

/// Dry run. Jobs skipped by `run` are skipped here too; everything else is
/// applied in memory, already-patched targets included.
pub fn handle(cli: &Cli, args: &JobArgs) -> Result<ExitCode> {
    let session = Session::open(cli, args)?;
    let patcher = Patcher::with_default_engines();
    let mut failed_jobs = 0usize;

    for job in session.jobs(args)? {
        let patch_job = job.to_patch_job(&session.flags);
        if !patch_job.gate {
            println!("{}: skipped (gate closed)", job.name);
            continue;
        }
        if let Some(dir) = patch_job.require_dir.as_deref().filter(|dir| !dir.is_dir()) {
            println!("{}: skipped ({} not present)", job.name, dir.display());
            continue;
        }

        let application = patcher
            .dry_run(&patch_job)
            .with_context(|| format!("Job '{}' failed", job.name))?;
        println!("{}:", job.name);
        for hunk in &application.hunks {
            println!("  {hunk}");
        }
        if !application.is_complete() {
            failed_jobs += 1;
        }
    }

    if failed_jobs > 0 {
        println!("{failed_jobs} job(s) would not apply cleanly");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

use std::process::ExitCode;

use anyhow::Result;
use patchguard_core::{Patcher, SentinelState};

use super::{Cli, JobArgs, Session};

pub fn handle(cli: &Cli, args: &JobArgs) -> Result<ExitCode> {
    let session = Session::open(cli, args)?;
    let patcher = Patcher::with_default_engines();

    for job in session.jobs(args)? {
        let status = patcher.status(&job.to_patch_job(&session.flags))?;
        let sentinel = match &status.sentinel {
            SentinelState::Absent => "not patched".to_string(),
            SentinelState::Present => "patched".to_string(),
            SentinelState::Verified => "patched (digest verified)".to_string(),
            SentinelState::Drifted { recorded, actual } => {
                format!("patched, target drifted (recorded {recorded}, now {actual})")
            }
        };

        println!("{}", job.name);
        println!("  gate:     {}", if status.gate { "open" } else { "closed" });
        println!("  sentinel: {sentinel} [{}]", job.sentinel.display());
        println!("  target:   {} [{}]", presence(status.target_present), job.target.display());
        println!("  patch:    {} [{}]", presence(status.patch_present), job.patch.display());
        if let (Some(present), Some(dir)) = (status.require_dir_present, &job.require_dir) {
            println!("  package:  {} [{}]", presence(present), dir.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn presence(present: bool) -> &'static str {
    if present { "present" } else { "missing" }
}

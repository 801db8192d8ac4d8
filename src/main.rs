//! patchguard - apply patches to vendored dependencies exactly once
//!
//! Reads `patchguard.toml`, evaluates each job's gate against the current
//! build flags, and patches targets whose sentinel is not yet present.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

mod cli;
mod logging;

use cli::{Cli, Commands};

fn main() -> ExitCode {
    // A missing .env is the common case.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = match &cli.command {
        Commands::Run(args) => cli::run::handle(&cli, args),
        Commands::Status(args) => cli::status::handle(&cli, args),
        Commands::Check(args) => cli::check::handle(&cli, args),
        Commands::Apply(args) => cli::apply::handle(args),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

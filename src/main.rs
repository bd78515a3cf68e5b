mod cli;
mod collector;
mod commands;
mod config;
mod failures;
mod interrupt;
mod junit;
mod model;
mod orchestrator;
mod process;
mod summary;
mod util;
mod watchdog;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::interrupt::{Interrupt, Interrupted};
use crate::watchdog::INTERRUPTED_EXIT_CODE;

fn main() {
    init_tracing();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) if err.is::<Interrupted>() => {
            error!(error = %err, "run aborted");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
        Err(err) => {
            error!(error = %err, "command failed");
            for cause in err.chain().skip(1) {
                error!(cause = %cause, "caused by");
            }
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let interrupt = Interrupt::install()?;

    match cli.command {
        Commands::Run(args) => commands::run::run(args, interrupt),
        Commands::Repro(args) => commands::repro::run(args, interrupt),
        Commands::Watch(args) => commands::watch::run(args, interrupt),
        Commands::Collect(args) => commands::collect::run(args).map(|()| 0),
        Commands::Summarize(args) => commands::summarize::run(args).map(|()| 0),
        Commands::Cleanup(args) => commands::cleanup::run(args, interrupt).map(|()| 0),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

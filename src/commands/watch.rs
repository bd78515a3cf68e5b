use std::process::Command;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::WatchArgs;
use crate::interrupt::Interrupt;
use crate::watchdog::{WatchdogConfig, run_with_idle_timeout};

pub fn run(args: WatchArgs, interrupt: Interrupt) -> Result<i32> {
    let config = WatchdogConfig::from_seconds(args.timeout, args.heartbeat);
    let (program, rest) = args
        .command
        .split_first()
        .context("no command given; pass it after `--`")?;

    info!(
        command = %args.command.join(" "),
        log = %args.log_file.display(),
        idle_timeout_secs = config.idle_timeout.as_secs(),
        heartbeat_secs = config.heartbeat_interval.as_secs(),
        "watching command"
    );
    let mut command = Command::new(program);
    command.args(rest);
    let outcome = run_with_idle_timeout(&mut command, &args.log_file, &config, &interrupt)?;

    if outcome.interrupted {
        warn!("command interrupted");
    } else if outcome.exit_code != 0 && !outcome.timed_out {
        warn!(exit_code = outcome.exit_code, "command failed");
    }
    Ok(outcome.exit_code)
}

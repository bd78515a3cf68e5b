use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use tracing::{error, info, warn};

use crate::cli::{ReproArgs, RunnerMode};
use crate::config::{LabEnvironment, ReproOptions};
use crate::failures::{
    build_gradle_command, collect_failures, find_latest_run_root, listing_lines, resolve_target,
};
use crate::interrupt::{Interrupt, Interrupted};
use crate::orchestrator::DOCKER;
use crate::process::{CommandOutput, CommandRunner, CommandSpec, SystemRunner, describe_exit};
use crate::util::{ensure_directory, run_timestamp, shell_join, shell_quote};

const CONTAINER_GRADLEW: &str = "/workspace/gradlew";
const LAUNCH_FAILURE_EXIT_CODE: i32 = 1;

#[derive(Debug)]
pub enum ReproOutcome {
    Listed(Vec<String>),
    Planned(CommandSpec),
    Finished {
        exit_code: i32,
        gradle_log: PathBuf,
        general_log: Option<PathBuf>,
    },
}

impl ReproOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Finished { exit_code, .. } => *exit_code,
            Self::Listed(_) | Self::Planned(_) => 0,
        }
    }
}

pub fn run(args: ReproArgs, interrupt: Interrupt) -> Result<i32> {
    let env = LabEnvironment::from_args(&args.lab)?;
    let options = ReproOptions::from_args(&args)?;
    let runner = SystemRunner::new(interrupt);

    let outcome = execute(&env, &options, &runner)?;
    let mut output = io::BufWriter::new(io::stdout().lock());
    match &outcome {
        ReproOutcome::Listed(lines) if lines.is_empty() => {
            writeln!(output, "No failing tests were found.")?;
        }
        ReproOutcome::Listed(lines) => {
            writeln!(output, "Failing tests:")?;
            for line in lines {
                writeln!(output, "{line}")?;
            }
        }
        ReproOutcome::Planned(command) => {
            writeln!(output, "{}", command.render())?;
        }
        ReproOutcome::Finished {
            gradle_log,
            general_log,
            ..
        } => {
            writeln!(output, "Gradle log: {}", gradle_log.display())?;
            if let Some(general_log) = general_log {
                writeln!(output, "TiDB log:   {}", general_log.display())?;
            }
        }
    }
    output.flush()?;
    Ok(outcome.exit_code())
}

pub fn execute(
    env: &LabEnvironment,
    options: &ReproOptions,
    runner: &dyn CommandRunner,
) -> Result<ReproOutcome> {
    let run_root = resolve_run_root(env, options)?;
    let failures = collect_failures(&run_root)?;
    info!(
        count = failures.len(),
        run_root = %run_root.display(),
        "discovered failing tests"
    );
    if options.list_only {
        return Ok(ReproOutcome::Listed(listing_lines(&failures)));
    }

    let Some(selection) = &options.selection else {
        bail!("provide either --select N or --test package.ClassName#method");
    };
    let target = resolve_target(&failures, selection, &options.overrides)?;
    let gradle = build_gradle_command(
        &env.workspace,
        &target,
        &options.gradle_profile,
        &options.gradle_args,
    )?;
    info!(
        module = %target.module,
        test = %target.test_pattern(),
        command = %shell_join(&gradle),
        "prepared Gradle command"
    );
    let command = runner_command(env, options, &gradle)?;
    if options.dry_run {
        info!("dry run enabled; skipping execution");
        return Ok(ReproOutcome::Planned(command));
    }

    ensure_directory(&env.results_repro_dir)?;
    let stem = format!(
        "{}-{}",
        run_timestamp(),
        safe_test_name(&target.test_pattern())?
    );
    let gradle_log = env.results_repro_dir.join(format!("{stem}.gradle.log"));
    let general_log_path = env.results_repro_dir.join(format!("{stem}.tidb.log"));
    let general_log = options.capture_general_log.then(|| GeneralLog {
        env,
        options,
        runner,
    });

    let started_at = Utc::now();
    if let Some(general_log) = &general_log {
        general_log.toggle(true);
    }
    info!(
        workspace = %env.workspace.display(),
        runner = ?options.runner,
        log = %gradle_log.display(),
        "running reproduction"
    );
    let outcome = runner.stream_to_file(&command, &gradle_log, &options.watchdog);
    let captured = general_log.as_ref().map(|general_log| {
        general_log.capture(started_at, &general_log_path);
        general_log.toggle(false);
        general_log_path.clone()
    });

    let exit_code = match outcome {
        Ok(outcome) => {
            describe_exit(&outcome);
            outcome.exit_code
        }
        Err(err) if err.is::<Interrupted>() => return Err(err),
        Err(err) => {
            error!(
                command = %command.render(),
                error = %format!("{err:#}"),
                "reproduction could not be launched"
            );
            LAUNCH_FAILURE_EXIT_CODE
        }
    };
    Ok(ReproOutcome::Finished {
        exit_code,
        gradle_log,
        general_log: captured,
    })
}

/// Explicit `--run-root`, else the newest matching collection under the results
/// runs directory, then the temp directory.
pub fn resolve_run_root(env: &LabEnvironment, options: &ReproOptions) -> Result<PathBuf> {
    if let Some(run_root) = &options.run_root {
        if !run_root.exists() {
            bail!("run root does not exist: {}", run_root.display());
        }
        return Ok(run_root.clone());
    }

    let prefix = options.results_type.collection_prefix();
    let mut search_dirs = vec![&env.results_runs_dir];
    if env.temp_dir != env.results_runs_dir {
        search_dirs.push(&env.temp_dir);
    }

    let mut failure = anyhow!("unable to locate any run directories");
    for dir in search_dirs {
        match find_latest_run_root(dir, prefix) {
            Ok(run_root) => {
                info!(run_root = %run_root.display(), "auto-selected results directory");
                return Ok(run_root);
            }
            Err(err) => failure = err,
        }
    }
    Err(failure)
}

pub fn runner_command(
    env: &LabEnvironment,
    options: &ReproOptions,
    gradle: &[String],
) -> Result<CommandSpec> {
    let Some((program, args)) = gradle.split_first() else {
        bail!("empty Gradle command");
    };

    match options.runner {
        RunnerMode::Host => {
            let mut command = CommandSpec::new(program.as_str())
                .args(args.iter().cloned())
                .cwd(&env.workspace);
            if !options.rdbms_env.is_empty() {
                command = command.env("RDBMS", options.rdbms_env.as_str());
            }
            Ok(command)
        }
        RunnerMode::Docker => {
            let mut parts = Vec::with_capacity(gradle.len());
            if program.ends_with("gradlew") {
                parts.push(CONTAINER_GRADLEW.to_string());
            } else {
                parts.push(program.clone());
            }
            parts.extend(args.iter().cloned());

            let mut script = shell_join(&parts);
            if !options.rdbms_env.is_empty() {
                script = format!("env RDBMS={} {script}", shell_quote(&options.rdbms_env));
            }
            Ok(CommandSpec::new(DOCKER).args([
                "run".to_string(),
                "--rm".to_string(),
                "--network".to_string(),
                format!("container:{}", env.tidb_container),
                "-v".to_string(),
                format!("{}:/workspace", env.workspace.display()),
                "-w".to_string(),
                "/workspace".to_string(),
                options.docker_image.clone(),
                "bash".to_string(),
                "-lc".to_string(),
                script,
            ]))
        }
    }
}

pub fn safe_test_name(pattern: &str) -> Result<String> {
    let unsafe_chars =
        Regex::new(r"[^A-Za-z0-9_.-]+").context("failed to compile file name regex")?;
    Ok(unsafe_chars.replace_all(pattern, "-").into_owned())
}

/// TiDB general query log around a reproduction. Every step is best-effort.
struct GeneralLog<'a> {
    env: &'a LabEnvironment,
    options: &'a ReproOptions,
    runner: &'a dyn CommandRunner,
}

impl GeneralLog<'_> {
    fn sql_command(&self, sql: &str) -> CommandSpec {
        let connection = &self.options.connection;
        let mut command = CommandSpec::new(DOCKER)
            .args(["run", "--rm", "--network"])
            .arg(format!("container:{}", self.env.tidb_container))
            .arg(connection.client_image.as_str())
            .args(["mysql", "-h", connection.host.as_str(), "-P"])
            .arg(connection.port.to_string())
            .args(["-u", connection.user.as_str()]);
        if let Some(password) = &connection.password {
            command = command.arg(format!("-p{password}"));
        }
        command.arg("-e").arg(sql)
    }

    fn toggle(&self, enabled: bool) {
        info!(enabled, "toggling TiDB general log");
        let sql = format!("SET GLOBAL tidb_general_log = {}", u8::from(enabled));
        if let Err(err) = self.runner.run_checked(&self.sql_command(&sql)) {
            warn!(error = %format!("{err:#}"), "failed to toggle TiDB general log");
        }
    }

    fn capture(&self, since: DateTime<Utc>, path: &Path) {
        let since = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        info!(since = %since, path = %path.display(), "collecting TiDB container logs");
        let logs = CommandSpec::new(DOCKER).args([
            "logs",
            self.env.tidb_container.as_str(),
            "--since",
            since.as_str(),
        ]);

        let CommandOutput {
            status,
            mut stdout,
            stderr,
        } = match self.runner.run(&logs) {
            Ok(output) => output,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed to collect TiDB container logs");
                return;
            }
        };
        stdout.push_str(&stderr);
        if let Err(err) = fs::write(path, stdout) {
            warn!(path = %path.display(), error = %err, "failed to write TiDB log");
        }
        if status != 0 {
            warn!(
                status,
                path = %path.display(),
                "docker logs exited with an error; output may be partial"
            );
        }
    }
}

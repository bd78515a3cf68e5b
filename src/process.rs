use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::interrupt::Interrupt;
use crate::model::ExecutionOutcome;
use crate::util::shell_join;
use crate::watchdog::{WatchdogConfig, exit_code_of, run_with_idle_timeout};

/// A fully resolved external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Discard stdout/stderr instead of inheriting or capturing them.
    pub quiet: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            quiet: false,
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    pub fn render(&self) -> String {
        shell_join(&self.argv())
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self {
            status: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == 0
    }

    pub fn ensure_success(&self, command: &CommandSpec) -> Result<()> {
        if self.succeeded() {
            return Ok(());
        }
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            bail!("`{}` exited with status {}", command.render(), self.status);
        }
        bail!(
            "`{}` exited with status {}: {}",
            command.render(),
            self.status,
            stderr
        );
    }
}

/// Seam for every external process the pipeline launches.
pub trait CommandRunner {
    /// Runs a command to completion. Errors only when it cannot be launched.
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput>;

    /// Runs a command under the idle-output watchdog, mirroring output to `log_file`.
    fn stream_to_file(
        &self,
        command: &CommandSpec,
        log_file: &Path,
        watchdog: &WatchdogConfig,
    ) -> Result<ExecutionOutcome>;

    fn run_checked(&self, command: &CommandSpec) -> Result<CommandOutput> {
        let output = self.run(command)?;
        output.ensure_success(command)?;
        Ok(output)
    }
}

/// Launches real processes.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    interrupt: Interrupt,
}

impl SystemRunner {
    pub fn new(interrupt: Interrupt) -> Self {
        Self { interrupt }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %command.render(), "executing");
        let mut process = command.to_command();
        process.stdin(Stdio::null());

        if command.quiet {
            let status = process
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .with_context(|| format!("failed to execute `{}`", command.render()))?;
            return Ok(CommandOutput {
                status: exit_code_of(status),
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        let output = process
            .output()
            .with_context(|| format!("failed to execute `{}`", command.render()))?;
        Ok(CommandOutput {
            status: exit_code_of(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn stream_to_file(
        &self,
        command: &CommandSpec,
        log_file: &Path,
        watchdog: &WatchdogConfig,
    ) -> Result<ExecutionOutcome> {
        let started_at = Utc::now();
        let started = Instant::now();
        let outcome =
            run_with_idle_timeout(&mut command.to_command(), log_file, watchdog, &self.interrupt)?;

        Ok(ExecutionOutcome {
            exit_code: outcome.exit_code,
            duration: started.elapsed(),
            log_path: log_file.to_path_buf(),
            started_at,
            timed_out: outcome.timed_out,
        })
    }
}

/// Logs every command and reports success without launching anything.
#[derive(Debug, Clone, Default)]
pub struct DryRunRunner;

impl CommandRunner for DryRunRunner {
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        info!(command = %command.render(), "[dry-run] would execute");
        Ok(CommandOutput::success())
    }

    fn stream_to_file(
        &self,
        command: &CommandSpec,
        log_file: &Path,
        watchdog: &WatchdogConfig,
    ) -> Result<ExecutionOutcome> {
        info!(
            command = %command.render(),
            log = %log_file.display(),
            idle_timeout_secs = watchdog.idle_timeout.as_secs(),
            "[dry-run] would stream"
        );
        Ok(ExecutionOutcome {
            exit_code: 0,
            duration: std::time::Duration::ZERO,
            log_path: log_file.to_path_buf(),
            started_at: Utc::now(),
            timed_out: false,
        })
    }
}

pub fn describe_exit(outcome: &ExecutionOutcome) {
    if outcome.succeeded() {
        info!(
            duration_secs = outcome.duration.as_secs(),
            "command completed successfully"
        );
    } else if outcome.timed_out {
        warn!(
            exit_code = outcome.exit_code,
            log = %outcome.log_path.display(),
            "command killed after idle timeout"
        );
    } else {
        warn!(
            exit_code = outcome.exit_code,
            started_at = %outcome.started_at.to_rfc3339(),
            duration_secs = outcome.duration.as_secs(),
            log = %outcome.log_path.display(),
            "command failed"
        );
    }
}


#[cfg(test)]
mod tests {
    use super::{CommandOutput, CommandRunner, CommandSpec, DryRunRunner, SystemRunner};
    use crate::interrupt::Interrupt;

    #[test]
    fn render_quotes_arguments_with_spaces() {
        let command = CommandSpec::new("bash")
            .arg("-lc")
            .arg("RDBMS=tidb ./ci/build.sh --continue");
        assert_eq!(
            command.render(),
            "bash -lc 'RDBMS=tidb ./ci/build.sh --continue'"
        );
    }

    #[test]
    fn ensure_success_reports_status_and_stderr() {
        let command = CommandSpec::new("docker").arg("info");
        let output = CommandOutput {
            status: 1,
            stdout: String::new(),
            stderr: "Cannot connect to the Docker daemon\n".to_string(),
        };
        let err = output.ensure_success(&command).expect_err("should fail");
        let text = err.to_string();
        assert!(text.contains("docker info"));
        assert!(text.contains("status 1"));
        assert!(text.contains("Cannot connect"));
    }

    #[test]
    fn dry_run_runner_never_creates_the_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("never.log");
        let outcome = DryRunRunner
            .stream_to_file(
                &CommandSpec::new("false"),
                &log,
                &crate::watchdog::WatchdogConfig::from_seconds(10, None),
            )
            .expect("dry run");
        assert_eq!(outcome.exit_code, 0);
        assert!(!log.exists());
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_captures_output_and_status() {
        let runner = SystemRunner::new(Interrupt::default());
        let output = runner
            .run(&CommandSpec::new("sh").arg("-c").arg("echo hello; exit 4"))
            .expect("run");
        assert_eq!(output.status, 4);
        assert_eq!(output.stdout.trim(), "hello");

        let quiet = runner
            .run(&CommandSpec::new("sh").arg("-c").arg("echo hidden").quiet())
            .expect("run");
        assert!(quiet.succeeded());
        assert!(quiet.stdout.is_empty());
    }

    #[test]
    fn system_runner_errors_when_program_is_missing() {
        let runner = SystemRunner::new(Interrupt::default());
        assert!(runner.run(&CommandSpec::new("/no/such/binary")).is_err());
    }
}

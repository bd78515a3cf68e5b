//! End-to-end comparison pipeline across the MySQL baseline and TiDB variants.
//!
//! `VERIFY -> baseline -> variants -> COMPARE`. Every target runs the same stage
//! sequence; a failing stage abandons that target and the matrix moves on.

pub mod compare;
pub mod dialect;
pub mod plan;

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::collector::{CollectRequest, collect, collection_dir_for};
use crate::config::{ComparisonOptions, LabEnvironment};
use crate::interrupt::{Interrupt, Interrupted};
use crate::junit::{REPORTS_DIR, RESULT_MARKER, TEST_RESULTS_DIR};
use crate::model::{ComparisonReport, ExecutionOutcome};
use crate::process::{CommandRunner, CommandSpec, describe_exit};
use crate::summary::{SummaryRequest, summarize, summary_json_path, write_report};
use crate::util::{
    ensure_directory, path_segments, remove_dir_if_exists, run_timestamp, walk_dirs,
};
use crate::watchdog::{IDLE_TIMEOUT_EXIT_CODE, INTERRUPTED_EXIT_CODE};

use plan::RunTarget;

pub const DOCKER: &str = "docker";
const DB_COUNT: &str = "4";
const TRANSIENT_BUILD_DIRS: [&str; 3] = [TEST_RESULTS_DIR, REPORTS_DIR, "classes"];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stage {
    CleanCaches,
    PatchWorkspace,
    ApplyPreset,
    VerifyDialect,
    StartBackend,
    RunTests,
    Collect,
    Summarize,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CleanCaches => "clean-caches",
            Self::PatchWorkspace => "patch-workspace",
            Self::ApplyPreset => "apply-preset",
            Self::VerifyDialect => "verify-dialect",
            Self::StartBackend => "start-backend",
            Self::RunTests => "run-tests",
            Self::Collect => "collect",
            Self::Summarize => "summarize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one stage: carry on, abandon the target, or stop the whole run.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Ok(T),
    Failed(String),
    Fatal(anyhow::Error),
}

impl<T> From<Result<T>> for StageOutcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(err) if err.is::<Interrupted>() => Self::Fatal(err),
            Err(err) => Self::Failed(format!("{err:#}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetStatus {
    Completed {
        collection_dir: PathBuf,
        summary_path: PathBuf,
        test_exit_code: i32,
    },
    Abandoned {
        stage: Stage,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub identifier: &'static str,
    pub status: TargetStatus,
}

impl TargetReport {
    pub fn is_abandoned(&self) -> bool {
        matches!(self.status, TargetStatus::Abandoned { .. })
    }
}

#[derive(Debug, Default)]
pub struct MatrixReport {
    pub targets: Vec<TargetReport>,
    pub comparisons: Vec<ComparisonReport>,
}

impl MatrixReport {
    /// 2 when any target was abandoned, else 0.
    pub fn exit_code(&self) -> i32 {
        if self.targets.iter().any(TargetReport::is_abandoned) {
            2
        } else {
            0
        }
    }
}

struct TestExecution {
    timestamp: String,
    outcome: ExecutionOutcome,
}

pub struct Orchestrator<'a> {
    env: &'a LabEnvironment,
    options: &'a ComparisonOptions,
    runner: &'a dyn CommandRunner,
    interrupt: Interrupt,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        env: &'a LabEnvironment,
        options: &'a ComparisonOptions,
        runner: &'a dyn CommandRunner,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            env,
            options,
            runner,
            interrupt,
        }
    }

    pub fn execute(&self) -> Result<MatrixReport> {
        info!(
            mysql = if self.options.skip_mysql { "skipped" } else { "enabled" },
            tidb = if self.options.skip_tidb { "skipped" } else { "enabled" },
            tidb_dialect = self.options.tidb_dialect.as_str(),
            clean_cache = !self.options.skip_clean,
            dry_run = self.options.dry_run,
            "starting database comparison"
        );
        self.verify_environment()?;

        let mut report = MatrixReport::default();
        if !self.options.compare_only {
            if !self.options.skip_mysql {
                let baseline = RunTarget::baseline(self.env);
                let another_follows = !self.options.skip_tidb;
                report
                    .targets
                    .push(self.run_target(&baseline, another_follows)?);
            }
            if !self.options.skip_tidb {
                report.targets.extend(self.run_variants()?);
            }
        }

        if self.options.compare_only || (!self.options.skip_mysql && !self.options.skip_tidb) {
            report.comparisons = compare::compare_latest(&self.env.results_runs_dir);
        }

        for target in &report.targets {
            if let TargetStatus::Abandoned { stage, reason } = &target.status {
                warn!(
                    identifier = target.identifier,
                    stage = %stage,
                    reason = %reason,
                    "target abandoned"
                );
            }
        }
        info!(
            temp = %self.env.temp_dir.display(),
            results = %self.env.results_runs_dir.display(),
            "run finished"
        );
        Ok(report)
    }

    fn verify_environment(&self) -> Result<()> {
        let env = self.env;
        info!(
            lab_home = %env.lab_home.display(),
            workspace_root = %env.workspace_root.display(),
            workspace = %env.workspace.display(),
            temp = %env.temp_dir.display(),
            log = %env.log_dir.display(),
            results = %env.results_dir.display(),
            results_runs = %env.results_runs_dir.display(),
            "resolved lab environment"
        );
        info!(
            mysql_container = %env.mysql_container,
            tidb_container = %env.tidb_container,
            runner_image = %env.runner_image,
            skip_tidb_patch = self.options.skip_tidb_patch,
            "container settings"
        );

        for dir in env.working_dirs() {
            self.ensure_dir(dir)?;
        }

        let docker_info = CommandSpec::new(DOCKER).arg("info").quiet();
        let output = self
            .runner
            .run(&docker_info)
            .context("docker not found; install Docker Desktop or the docker CLI")?;
        if !output.succeeded() {
            bail!(
                "docker daemon is unavailable (`docker info` exited with {})",
                output.status
            );
        }
        info!("environment verified");
        Ok(())
    }

    fn run_variants(&self) -> Result<Vec<TargetReport>> {
        let plan = plan::variant_plan(self.options.tidb_dialect, self.env);
        match StageOutcome::from(self.patch_workspace()) {
            StageOutcome::Ok(()) => {}
            StageOutcome::Failed(reason) => {
                warn!(reason = %reason, "TiDB workspace patch failed; abandoning all variants");
                return Ok(plan
                    .iter()
                    .map(|target| TargetReport {
                        identifier: target.identifier,
                        status: TargetStatus::Abandoned {
                            stage: Stage::PatchWorkspace,
                            reason: reason.clone(),
                        },
                    })
                    .collect());
            }
            StageOutcome::Fatal(err) => return Err(err),
        }

        let mut reports = Vec::with_capacity(plan.len());
        for (index, target) in plan.iter().enumerate() {
            let another_follows = index + 1 < plan.len();
            reports.push(self.run_target(target, another_follows)?);
        }
        Ok(reports)
    }

    /// Runs every stage for one target. Errors only on interruption.
    fn run_target(&self, target: &RunTarget, another_follows: bool) -> Result<TargetReport> {
        self.check_interrupt()?;
        info!(identifier = target.identifier, label = target.label, "starting target");

        let mut backend_attempted = false;
        let status = self.drive_target(target, &mut backend_attempted);
        if backend_attempted {
            self.remove_container(target);
        }
        let status = status?;

        if another_follows {
            self.clean_test_results();
        }
        Ok(TargetReport {
            identifier: target.identifier,
            status,
        })
    }

    fn drive_target(
        &self,
        target: &RunTarget,
        backend_attempted: &mut bool,
    ) -> Result<TargetStatus> {
        macro_rules! stage {
            ($stage:expr, $result:expr) => {
                match StageOutcome::from($result) {
                    StageOutcome::Ok(value) => value,
                    StageOutcome::Failed(reason) => {
                        return Ok(TargetStatus::Abandoned {
                            stage: $stage,
                            reason,
                        });
                    }
                    StageOutcome::Fatal(err) => return Err(err),
                }
            };
        }

        stage!(Stage::CleanCaches, self.clean_gradle_caches());
        if let Some(preset) = target.preset {
            stage!(Stage::ApplyPreset, self.apply_preset(preset));
        }
        stage!(Stage::VerifyDialect, dialect::verify(&self.env.workspace, target.backend));

        *backend_attempted = true;
        stage!(Stage::StartBackend, self.start_backend(target));
        let execution = stage!(Stage::RunTests, self.run_tests(target));
        let collection_dir = stage!(Stage::Collect, self.collect_results(target, &execution));
        let summary_path = stage!(
            Stage::Summarize,
            self.generate_summary(target, &collection_dir, &execution.timestamp)
        );

        Ok(TargetStatus::Completed {
            collection_dir,
            summary_path,
            test_exit_code: execution.outcome.exit_code,
        })
    }

    fn check_interrupt(&self) -> Result<()> {
        if self.interrupt.is_triggered() {
            return Err(Interrupted.into());
        }
        Ok(())
    }

    fn ensure_dir(&self, dir: &Path) -> Result<()> {
        if self.options.dry_run {
            info!(path = %dir.display(), "[dry-run] would create directory");
            return Ok(());
        }
        ensure_directory(dir)
    }

    fn remove_tree(&self, dir: &Path) -> Result<bool> {
        if self.options.dry_run {
            info!(path = %dir.display(), "[dry-run] would remove directory");
            return Ok(false);
        }
        remove_dir_if_exists(dir)
    }

    fn lab_script(&self, script: &str) -> CommandSpec {
        CommandSpec::new("python3")
            .arg(format!("scripts/{script}"))
            .arg(self.env.workspace.display().to_string())
            .cwd(&self.env.lab_home)
    }

    fn clean_gradle_caches(&self) -> Result<()> {
        if self.options.skip_clean {
            warn!("skipping Gradle cache cleaning (--skip-clean)");
            return Ok(());
        }
        info!("cleaning Gradle caches");
        let clean = CommandSpec::new(DOCKER).args([
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:/workspace", self.env.workspace.display()),
            "-w".to_string(),
            "/workspace".to_string(),
            self.env.runner_image.clone(),
            "./gradlew".to_string(),
            "clean".to_string(),
        ]);
        self.runner.run_checked(&clean)?;
        self.remove_tree(&self.env.gradle_cache_dir)?;
        info!("Gradle caches cleaned");
        Ok(())
    }

    fn patch_workspace(&self) -> Result<()> {
        if self.options.skip_tidb_patch {
            warn!("skipping patch_docker_db_tidb.py (SKIP_TIDB_PATCH)");
            return Ok(());
        }
        info!("applying TiDB workspace patch");
        self.runner
            .run_checked(&self.lab_script("patch_docker_db_tidb.py"))?;
        Ok(())
    }

    fn apply_preset(&self, preset: &str) -> Result<()> {
        info!(preset, "patching local.databases.gradle");
        let patch = self
            .lab_script("patch_local_databases_gradle.py")
            .arg("--dialect")
            .arg(preset);
        self.runner.run_checked(&patch)?;
        Ok(())
    }

    fn start_backend(&self, target: &RunTarget) -> Result<()> {
        info!(backend = %target.backend, container = %target.container, "starting database");
        let remove = CommandSpec::new(DOCKER)
            .args(["rm", "-f", target.container.as_str()])
            .quiet();
        self.runner.run(&remove)?;

        let start = CommandSpec::new("./docker_db.sh")
            .arg(target.backend.rdbms())
            .cwd(&self.env.workspace)
            .env("DB_COUNT", DB_COUNT);
        self.runner
            .run_checked(&start)
            .with_context(|| format!("{} database script failed", target.backend))?;

        let inspect = CommandSpec::new(DOCKER)
            .args(["container", "inspect", target.container.as_str()])
            .quiet();
        if !self.runner.run(&inspect)?.succeeded() {
            bail!(
                "{} container is not running after docker_db.sh completed",
                target.container
            );
        }
        info!(container = %target.container, "database started");
        Ok(())
    }

    fn run_tests(&self, target: &RunTarget) -> Result<TestExecution> {
        let timestamp = run_timestamp();
        let build = target.build_command(
            self.options.gradle_continue,
            self.options.extra_args.as_deref(),
        );
        let log_path = target.log_path(&self.env.log_dir, &timestamp);
        info!(
            label = target.label,
            container = %target.runner_container(),
            command = %build,
            dialect_override = target.dialect_override.unwrap_or("-"),
            log = %log_path.display(),
            "running tests"
        );

        let command = CommandSpec::new(DOCKER)
            .args(target.runner_args(self.env, &build))
            .cwd(&self.env.workspace);
        let outcome = self
            .runner
            .stream_to_file(&command, &log_path, &self.options.watchdog);
        let runner_stranded = match &outcome {
            Ok(outcome) => {
                outcome.timed_out
                    || matches!(
                        outcome.exit_code,
                        IDLE_TIMEOUT_EXIT_CODE | INTERRUPTED_EXIT_CODE
                    )
            }
            Err(_) => true,
        };
        if runner_stranded {
            self.remove_named_container(&target.runner_container(), "runner");
        }
        let outcome = outcome?;
        self.check_interrupt()?;
        describe_exit(&outcome);

        Ok(TestExecution { timestamp, outcome })
    }

    fn collect_results(&self, target: &RunTarget, execution: &TestExecution) -> Result<PathBuf> {
        let request = CollectRequest {
            root: self.env.workspace.clone(),
            dest_prefix: target.collection_prefix(&self.env.results_runs_dir),
            timestamp: execution.timestamp.clone(),
            log_path: Some(execution.outcome.log_path.clone()),
            log_dir: Some(self.env.log_dir.clone()),
            remove_source: false,
            backend_hint: Some(target.backend.rdbms().to_string()),
        };
        if self.options.dry_run {
            let planned = collection_dir_for(&request.dest_prefix, &request.timestamp);
            info!(destination = %planned.display(), "[dry-run] would collect results");
            return Ok(planned);
        }
        collect(&request)
    }

    fn generate_summary(
        &self,
        target: &RunTarget,
        collection_dir: &Path,
        timestamp: &str,
    ) -> Result<PathBuf> {
        let json_out = target.summary_prefix(&self.env.results_runs_dir);
        let planned = summary_json_path(&json_out, timestamp);
        if self.options.dry_run {
            info!(
                label = target.summary_label,
                path = %planned.display(),
                "[dry-run] would generate summary"
            );
            return Ok(planned);
        }

        info!(label = target.summary_label, "generating summary");
        let result = summarize(&SummaryRequest {
            root: collection_dir.to_path_buf(),
            json_out: Some(json_out),
            timestamp: Some(timestamp.to_string()),
            log_dir: Some(self.env.log_dir.clone()),
            ..SummaryRequest::default()
        })?;
        write_report(&result)?;
        Ok(result.json_path.unwrap_or(planned))
    }

    fn remove_container(&self, target: &RunTarget) {
        self.remove_named_container(&target.container, "database");
    }

    /// Best-effort; a leftover container is reported, never fatal.
    fn remove_named_container(&self, name: &str, role: &str) {
        let remove = CommandSpec::new(DOCKER).args(["rm", "-f", name]).quiet();
        match self.runner.run(&remove) {
            Ok(output) if output.succeeded() => {
                info!(container = name, role, "removed container");
            }
            Ok(output) => warn!(
                container = name,
                role,
                status = output.status,
                "failed to remove container"
            ),
            Err(err) => warn!(
                container = name,
                role,
                error = %err,
                "failed to remove container"
            ),
        }
    }

    fn clean_test_results(&self) {
        let doomed = match transient_build_dirs(&self.env.workspace) {
            Ok(doomed) => doomed,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed to scan workspace for test results");
                return;
            }
        };
        if self.options.dry_run {
            info!(
                directories = doomed.len(),
                "[dry-run] would clean test results in workspace"
            );
            return;
        }

        let mut removed = 0usize;
        for dir in &doomed {
            match remove_dir_if_exists(dir) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => warn!(path = %dir.display(), error = %err, "failed to remove"),
            }
        }
        info!(removed, "cleaned test artifact directories");
    }
}

/// `test-results`, `reports` and `classes` directories under a `target` segment,
/// outermost only.
pub fn transient_build_dirs(workspace: &Path) -> Result<Vec<PathBuf>> {
    let mut selected: Vec<PathBuf> = Vec::new();
    for dir in walk_dirs(workspace)? {
        if selected.iter().any(|parent| dir.starts_with(parent)) {
            continue;
        }
        let Some(name) = dir.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !TRANSIENT_BUILD_DIRS.contains(&name) {
            continue;
        }
        let Ok(relative) = dir.strip_prefix(workspace) else {
            continue;
        };
        let segments = path_segments(relative);
        if segments[..segments.len() - 1]
            .iter()
            .any(|segment| segment == RESULT_MARKER)
        {
            selected.push(dir);
        }
    }
    Ok(selected)
}

#[cfg(test)]
mod tests;

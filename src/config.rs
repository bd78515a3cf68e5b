//! Validated, immutable views of the CLI arguments and lab environment.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use crate::cli::{
    CleanupArgs, DialectPreset, LabArgs, ReproArgs, ResultsType, RunArgs, RunnerMode,
};
use crate::failures::{Selection, SelectionOverrides};
use crate::watchdog::WatchdogConfig;

pub const NESTED_WORKSPACE: &str = "hibernate-orm";
pub const FALLBACK_JDK_MAJOR: u32 = 25;

#[derive(Debug, Clone)]
pub struct LabEnvironment {
    pub lab_home: PathBuf,
    pub workspace_root: PathBuf,
    /// The checkout holding `gradlew`; may be `workspace_root/hibernate-orm`.
    pub workspace: PathBuf,
    pub temp_dir: PathBuf,
    pub log_dir: PathBuf,
    pub results_dir: PathBuf,
    pub results_runs_dir: PathBuf,
    pub results_repro_dir: PathBuf,
    pub mysql_container: String,
    pub tidb_container: String,
    pub runner_image: String,
    pub gradle_cache_dir: PathBuf,
}

impl LabEnvironment {
    pub fn from_args(args: &LabArgs) -> Result<Self> {
        let lab_home = require(&args.lab_home, "LAB_HOME_DIR", "--lab-home")?;
        let workspace_root = require(&args.workspace, "WORKSPACE_DIR", "--workspace")?;
        let workspace = resolve_workspace_dir(&workspace_root)?;
        let temp_dir = require(&args.temp_dir, "TEMP_DIR", "--temp-dir")?;
        let log_dir = args
            .log_dir
            .clone()
            .unwrap_or_else(|| temp_dir.join("log"));
        let results_dir = args
            .results_dir
            .clone()
            .unwrap_or_else(|| lab_home.join("results"));
        let results_runs_dir = args
            .results_runs_dir
            .clone()
            .unwrap_or_else(|| results_dir.join("runs"));
        let results_repro_dir = args
            .results_repro_dir
            .clone()
            .unwrap_or_else(|| results_runs_dir.join("repro"));
        let runner_image = args
            .runner_image
            .clone()
            .filter(|image| !image.trim().is_empty())
            .unwrap_or_else(|| suggest_runner_image(&workspace));
        let gradle_cache_dir = gradle_user_home(args.gradle_user_home.as_deref()).join("caches");

        Ok(Self {
            lab_home,
            workspace_root,
            workspace,
            temp_dir,
            log_dir,
            results_dir,
            results_runs_dir,
            results_repro_dir,
            mysql_container: args.mysql_container.clone(),
            tidb_container: args.tidb_container.clone(),
            runner_image,
            gradle_cache_dir,
        })
    }

    /// Directories the pipeline writes into, in creation order.
    pub fn working_dirs(&self) -> [&Path; 4] {
        [
            &self.temp_dir,
            &self.log_dir,
            &self.results_dir,
            &self.results_runs_dir,
        ]
    }
}

fn require(value: &Option<PathBuf>, env_name: &str, flag: &str) -> Result<PathBuf> {
    match value {
        Some(path) if !path.as_os_str().is_empty() => Ok(path.clone()),
        _ => bail!("{env_name} is not set; export it or pass {flag}"),
    }
}

fn gradle_user_home(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".gradle")
}

/// Accepts either the checkout itself or a parent holding `hibernate-orm/`.
pub fn resolve_workspace_dir(workspace_root: &Path) -> Result<PathBuf> {
    let candidates = [
        workspace_root.to_path_buf(),
        workspace_root.join(NESTED_WORKSPACE),
    ];
    for candidate in &candidates {
        if candidate.join("gradlew").exists() {
            return Ok(candidate.clone());
        }
    }
    bail!(
        "unable to locate the hibernate-orm workspace (checked {} and {}); point WORKSPACE_DIR at the checkout or its parent",
        candidates[0].display(),
        candidates[1].display()
    );
}

/// `eclipse-temurin:<orm.jdk.min>-jdk`, read from the workspace `gradle.properties`.
pub fn suggest_runner_image(workspace: &Path) -> String {
    let major = fs::read_to_string(workspace.join("gradle.properties"))
        .ok()
        .and_then(|content| {
            content.lines().find_map(|line| {
                let (key, value) = line.trim().split_once('=')?;
                (key.trim() == "orm.jdk.min")
                    .then(|| value.trim().parse::<u32>().ok())
                    .flatten()
            })
        })
        .unwrap_or(FALLBACK_JDK_MAJOR);
    format!("eclipse-temurin:{major}-jdk")
}

#[derive(Debug, Clone)]
pub struct ComparisonOptions {
    pub skip_clean: bool,
    pub skip_mysql: bool,
    pub skip_tidb: bool,
    pub tidb_dialect: DialectPreset,
    pub gradle_continue: bool,
    pub dry_run: bool,
    pub compare_only: bool,
    pub skip_tidb_patch: bool,
    pub extra_args: Option<String>,
    pub watchdog: WatchdogConfig,
}

impl ComparisonOptions {
    pub fn from_args(args: &RunArgs) -> Result<Self> {
        if args.mysql_only && args.tidb_only {
            bail!("cannot combine --mysql-only and --tidb-only");
        }
        Ok(Self {
            skip_clean: args.skip_clean,
            skip_mysql: args.skip_mysql || args.tidb_only,
            skip_tidb: args.skip_tidb || args.mysql_only,
            tidb_dialect: args.tidb_dialect,
            gradle_continue: !args.stop_on_failure,
            dry_run: args.dry_run,
            compare_only: args.compare_only,
            skip_tidb_patch: args.skip_tidb_patch,
            extra_args: args
                .extra_args
                .clone()
                .filter(|extra| !extra.trim().is_empty()),
            watchdog: WatchdogConfig::from_seconds(args.idle_timeout, args.heartbeat),
        })
    }
}

/// Connection used to toggle the TiDB general log through a throwaway mysql client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConnection {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub client_image: String,
}

#[derive(Debug, Clone)]
pub struct ReproOptions {
    pub run_root: Option<PathBuf>,
    pub results_type: ResultsType,
    pub list_only: bool,
    /// `None` only when listing.
    pub selection: Option<Selection>,
    pub overrides: SelectionOverrides,
    pub gradle_profile: String,
    pub gradle_args: Vec<String>,
    pub rdbms_env: String,
    pub capture_general_log: bool,
    pub connection: BackendConnection,
    pub runner: RunnerMode,
    pub docker_image: String,
    pub dry_run: bool,
    pub watchdog: WatchdogConfig,
}

impl ReproOptions {
    pub fn from_args(args: &ReproArgs) -> Result<Self> {
        let selection = match (args.select, &args.test) {
            (Some(_), Some(_)) => bail!("--select and --test cannot be combined"),
            (Some(index), None) => Some(Selection::Index(index)),
            (None, Some(identifier)) => Some(Selection::Identifier {
                identifier: identifier.clone(),
                module: args.module.clone(),
            }),
            (None, None) if args.list => None,
            (None, None) => {
                bail!("provide either --select N or --test package.ClassName#method")
            }
        };

        Ok(Self {
            run_root: args.run_root.clone(),
            results_type: args.results_type,
            list_only: args.list,
            selection,
            overrides: SelectionOverrides {
                method: args.method.clone(),
                gradle_task: args.gradle_task.clone(),
            },
            gradle_profile: args.gradle_profile.clone(),
            gradle_args: args.gradle_args.clone(),
            rdbms_env: args.rdbms_env.clone(),
            capture_general_log: args.capture_general_log,
            connection: BackendConnection {
                host: args.tidb_host.clone(),
                port: args.tidb_port,
                user: args.tidb_user.clone(),
                password: args.tidb_password.clone(),
                client_image: args.docker_mysql_image.clone(),
            },
            runner: args.runner,
            docker_image: args.docker_image.clone(),
            dry_run: args.dry_run,
            watchdog: WatchdogConfig::from_seconds(args.idle_timeout, args.heartbeat),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CleanupOptions {
    pub containers: Vec<String>,
    pub gradle_image: String,
    pub gradle_clean: bool,
    pub purge_gradle_cache: bool,
    pub clean_temp: bool,
    pub clean_reports: bool,
    pub prune_collections: bool,
    pub dry_run: bool,
}

impl CleanupOptions {
    pub fn from_args(args: &CleanupArgs, env: &LabEnvironment) -> Self {
        let containers = if args.skip_containers {
            Vec::new()
        } else {
            args.containers
                .clone()
                .unwrap_or_else(|| vec![env.tidb_container.clone(), env.mysql_container.clone()])
                .into_iter()
                .filter(|name| !name.trim().is_empty())
                .collect()
        };
        Self {
            containers,
            gradle_image: args.gradle_image.clone(),
            gradle_clean: !args.skip_gradle_clean,
            purge_gradle_cache: args.purge_gradle_cache,
            clean_temp: !args.skip_temp_clean,
            clean_reports: !args.skip_report_clean,
            prune_collections: args.prune_collections,
            dry_run: args.dry_run,
        }
    }
}

#[cfg(test)]
pub(crate) fn fixture_env(root: &Path) -> LabEnvironment {
    LabEnvironment {
        lab_home: root.join("lab"),
        workspace_root: root.join("ws"),
        workspace: root.join("ws"),
        temp_dir: root.join("tmp"),
        log_dir: root.join("log"),
        results_dir: root.join("results"),
        results_runs_dir: root.join("results/runs"),
        results_repro_dir: root.join("results/runs/repro"),
        mysql_container: "mysql".to_string(),
        tidb_container: "tidb".to_string(),
        runner_image: "eclipse-temurin:21-jdk".to_string(),
        gradle_cache_dir: root.join("gradle/caches"),
    }
}

use std::path::PathBuf;

use clap::builder::FalseyValueParser;
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "dialect-matrix",
    version,
    about = "Run Hibernate ORM tests against MySQL and TiDB dialects and compare the results"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the MySQL baseline and TiDB dialect matrix, then compare summaries.
    Run(RunArgs),
    /// Re-run a single failing test from a previous collection.
    Repro(ReproArgs),
    /// Run any command under the idle-output watchdog.
    Watch(WatchArgs),
    Collect(CollectArgs),
    Summarize(SummarizeArgs),
    /// Remove containers and build leftovers after comparison runs.
    Cleanup(CleanupArgs),
}

/// Lab layout shared by the commands that touch the workspace.
#[derive(Args, Debug, Clone, Default)]
pub struct LabArgs {
    #[arg(long, env = "LAB_HOME_DIR")]
    pub lab_home: Option<PathBuf>,

    #[arg(long, env = "WORKSPACE_DIR")]
    pub workspace: Option<PathBuf>,

    #[arg(long, env = "TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "RESULTS_DIR")]
    pub results_dir: Option<PathBuf>,

    #[arg(long, env = "RESULTS_RUNS_DIR")]
    pub results_runs_dir: Option<PathBuf>,

    #[arg(long, env = "RESULTS_RUNS_REPRO_DIR")]
    pub results_repro_dir: Option<PathBuf>,

    #[arg(long, env = "MYSQL_CONTAINER_NAME", default_value = "mysql")]
    pub mysql_container: String,

    #[arg(long, env = "TIDB_CONTAINER_NAME", default_value = "tidb")]
    pub tidb_container: String,

    #[arg(long, env = "RUN_COMPARISON_RUNNER_IMAGE")]
    pub runner_image: Option<String>,

    #[arg(long, env = "GRADLE_USER_HOME")]
    pub gradle_user_home: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum DialectPreset {
    TidbCommunity,
    Mysql,
    TidbCore,
    #[default]
    Both,
}

impl DialectPreset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TidbCommunity => "tidb-community",
            Self::Mysql => "mysql",
            Self::TidbCore => "tidb-core",
            Self::Both => "both",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub lab: LabArgs,

    #[arg(long, default_value_t = false)]
    pub mysql_only: bool,

    #[arg(long, default_value_t = false)]
    pub tidb_only: bool,

    #[arg(long, value_enum, default_value_t = DialectPreset::Both)]
    pub tidb_dialect: DialectPreset,

    #[arg(long, default_value_t = false)]
    pub skip_clean: bool,

    #[arg(long, default_value_t = false)]
    pub skip_mysql: bool,

    #[arg(long, default_value_t = false)]
    pub skip_tidb: bool,

    /// Drop Gradle `--continue` so the build stops at the first failing task.
    #[arg(long, default_value_t = false)]
    pub stop_on_failure: bool,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    #[arg(long, default_value_t = false)]
    pub compare_only: bool,

    #[arg(long, env = "SKIP_TIDB_PATCH", value_parser = FalseyValueParser::new())]
    pub skip_tidb_patch: bool,

    /// Appended verbatim to the in-container build command.
    #[arg(long, env = "RUN_COMPARISON_EXTRA_ARGS")]
    pub extra_args: Option<String>,

    #[arg(long, default_value_t = 1800)]
    pub idle_timeout: i64,

    #[arg(long, env = "IDLE_WATCHDOG_HEARTBEAT")]
    pub heartbeat: Option<i64>,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum ResultsType {
    #[default]
    TidbTidbdialect,
    TidbMysqldialect,
    Mysql,
}

impl ResultsType {
    pub fn collection_prefix(self) -> &'static str {
        match self {
            Self::TidbTidbdialect => "tidb-tidbdialect-results",
            Self::TidbMysqldialect => "tidb-mysqldialect-results",
            Self::Mysql => "mysql-results",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum RunnerMode {
    #[default]
    Docker,
    Host,
}

#[derive(Args, Debug, Clone)]
pub struct ReproArgs {
    #[command(flatten)]
    pub lab: LabArgs,

    /// Previous results directory (`tidb-*-results-YYYYMMDD-HHMMSS`).
    #[arg(long)]
    pub run_root: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ResultsType::TidbTidbdialect)]
    pub results_type: ResultsType,

    #[arg(long, default_value_t = false)]
    pub list: bool,

    /// 1-based index into the `--list` output.
    #[arg(long)]
    pub select: Option<usize>,

    /// `package.ClassName#method` or `package.ClassName`.
    #[arg(long)]
    pub test: Option<String>,

    #[arg(long)]
    pub method: Option<String>,

    #[arg(long)]
    pub module: Option<String>,

    #[arg(long)]
    pub gradle_task: Option<String>,

    #[arg(long, default_value = "tidb")]
    pub gradle_profile: String,

    #[arg(long = "gradle-arg", allow_hyphen_values = true)]
    pub gradle_args: Vec<String>,

    #[arg(long, default_value = "tidb")]
    pub rdbms_env: String,

    #[arg(long, default_value_t = false)]
    pub capture_general_log: bool,

    #[arg(long, default_value = "127.0.0.1")]
    pub tidb_host: String,

    #[arg(long, default_value_t = 4000)]
    pub tidb_port: u16,

    #[arg(long, default_value = "root")]
    pub tidb_user: String,

    #[arg(long)]
    pub tidb_password: Option<String>,

    #[arg(long, default_value = "mysql:8.0")]
    pub docker_mysql_image: String,

    #[arg(long, value_enum, env = "REPRO_TEST_RUNNER", default_value_t = RunnerMode::Docker)]
    pub runner: RunnerMode,

    #[arg(long, env = "REPRO_TEST_RUNNER_IMAGE", default_value = "eclipse-temurin:21-jdk")]
    pub docker_image: String,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    #[arg(long, default_value_t = 1800)]
    pub idle_timeout: i64,

    #[arg(long, env = "IDLE_WATCHDOG_HEARTBEAT")]
    pub heartbeat: Option<i64>,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Maximum idle seconds allowed between output lines.
    #[arg(long)]
    pub timeout: i64,

    #[arg(long, env = "IDLE_WATCHDOG_HEARTBEAT")]
    pub heartbeat: Option<i64>,

    #[arg(long)]
    pub log_file: PathBuf,

    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CollectArgs {
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Destination prefix; the timestamp is appended as `{dest}-{timestamp}`.
    #[arg(long)]
    pub dest: PathBuf,

    #[arg(long)]
    pub log: Option<PathBuf>,

    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[arg(long)]
    pub timestamp: Option<String>,

    #[arg(long, default_value_t = false)]
    pub remove_source: bool,

    /// Backend label stored in the manifest (e.g. `mysql_8_0`, `tidb`).
    #[arg(long)]
    pub backend: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SummarizeArgs {
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    #[arg(long)]
    pub json_out: Option<PathBuf>,

    #[arg(long)]
    pub log: Option<PathBuf>,

    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[arg(long)]
    pub manifest: Option<PathBuf>,

    #[arg(long)]
    pub timestamp: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CleanupArgs {
    #[command(flatten)]
    pub lab: LabArgs,

    #[arg(long, default_value = "eclipse-temurin:21-jdk")]
    pub gradle_image: String,

    /// Container names to remove; defaults to the configured MySQL and TiDB containers.
    #[arg(long, num_args = 0..)]
    pub containers: Option<Vec<String>>,

    #[arg(long, default_value_t = false)]
    pub skip_containers: bool,

    #[arg(long, default_value_t = false)]
    pub skip_gradle_clean: bool,

    #[arg(long, default_value_t = false)]
    pub purge_gradle_cache: bool,

    #[arg(long, default_value_t = false)]
    pub skip_temp_clean: bool,

    #[arg(long, default_value_t = false)]
    pub skip_report_clean: bool,

    /// Delete complete collections under the results runs directory.
    #[arg(long, default_value_t = false)]
    pub prune_collections: bool,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

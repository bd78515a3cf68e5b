use std::fmt;
use std::path::{Path, PathBuf};

use crate::cli::DialectPreset;
use crate::config::LabEnvironment;

pub const MYSQL_DIALECT: &str = "org.hibernate.dialect.MySQLDialect";
const GRADLE_OPTS: &str = "GRADLE_OPTS=-Xmx6g -XX:MaxMetaspaceSize=1g";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Backend {
    Mysql,
    Tidb,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Tidb => "tidb",
        }
    }

    /// Value of `RDBMS` for the build, and the `docker_db.sh` function name.
    pub fn rdbms(self) -> &'static str {
        match self {
            Self::Mysql => "mysql_8_0",
            Self::Tidb => "tidb",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configuration of the matrix; drives exactly one pipeline pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTarget {
    pub identifier: &'static str,
    pub backend: Backend,
    pub label: &'static str,
    pub summary_label: &'static str,
    /// `patch_local_databases_gradle.py --dialect` argument.
    pub preset: Option<&'static str>,
    pub dialect_override: Option<&'static str>,
    pub container: String,
}

impl RunTarget {
    pub fn baseline(env: &LabEnvironment) -> Self {
        Self {
            identifier: "mysql",
            backend: Backend::Mysql,
            label: "MySQL 8.0 Baseline",
            summary_label: "MySQL 8.0",
            preset: None,
            dialect_override: None,
            container: env.mysql_container.clone(),
        }
    }

    pub fn runner_container(&self) -> String {
        let base = format!("hibernate-{}-ci-runner", self.backend);
        match self.dialect_override {
            Some(dialect) => {
                let suffix = dialect.rsplit('.').next().unwrap_or(dialect);
                format!("{base}-{}", suffix.to_ascii_lowercase())
            }
            None => base,
        }
    }

    /// Shell command run inside the runner container.
    pub fn build_command(&self, gradle_continue: bool, extra_args: Option<&str>) -> String {
        let mut parts = vec![
            format!("RDBMS={}", self.backend.rdbms()),
            "./ci/build.sh".to_string(),
        ];
        if let Some(dialect) = self.dialect_override {
            parts.push(format!("-Pdb.dialect={dialect}"));
        }
        if gradle_continue {
            parts.push("--continue".to_string());
        }
        if let Some(extra) = extra_args {
            parts.push(extra.to_string());
        }
        parts.join(" ")
    }

    pub fn runner_args(&self, env: &LabEnvironment, build_command: &str) -> Vec<String> {
        vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            self.runner_container(),
            "--memory=16g".to_string(),
            "--cpus=6".to_string(),
            "--network".to_string(),
            format!("container:{}", self.container),
            "-e".to_string(),
            format!("RDBMS={}", self.backend.rdbms()),
            "-e".to_string(),
            GRADLE_OPTS.to_string(),
            "-v".to_string(),
            format!("{}:/workspace", env.workspace.display()),
            "-v".to_string(),
            format!("{}:/workspace/tmp", env.temp_dir.display()),
            "-w".to_string(),
            "/workspace".to_string(),
            env.runner_image.clone(),
            "bash".to_string(),
            "-lc".to_string(),
            build_command.to_string(),
        ]
    }

    pub fn log_path(&self, log_dir: &Path, timestamp: &str) -> PathBuf {
        log_dir.join(format!("{}-ci-run-{}.log", self.backend, timestamp))
    }

    pub fn collection_prefix(&self, results_runs_dir: &Path) -> PathBuf {
        results_runs_dir.join(format!("{}-results", self.identifier))
    }

    pub fn summary_prefix(&self, results_runs_dir: &Path) -> PathBuf {
        results_runs_dir.join(format!("{}-summary", self.identifier))
    }
}

fn tidb_target(
    env: &LabEnvironment,
    identifier: &'static str,
    preset: &'static str,
    label: &'static str,
    summary_label: &'static str,
    dialect_override: Option<&'static str>,
) -> RunTarget {
    RunTarget {
        identifier,
        backend: Backend::Tidb,
        label,
        summary_label,
        preset: Some(preset),
        dialect_override,
        container: env.tidb_container.clone(),
    }
}

/// TiDB variants for a preset, in execution order.
pub fn variant_plan(preset: DialectPreset, env: &LabEnvironment) -> Vec<RunTarget> {
    let community = || {
        tidb_target(
            env,
            "tidb-tidbdialect",
            "tidb-community",
            "TiDB v8.5.3 (TiDBDialect)",
            "TiDB with TiDBDialect",
            None,
        )
    };
    let mysql = || {
        tidb_target(
            env,
            "tidb-mysqldialect",
            "mysql",
            "TiDB v8.5.3 (MySQLDialect)",
            "TiDB with MySQLDialect",
            Some(MYSQL_DIALECT),
        )
    };
    let core = || {
        tidb_target(
            env,
            "tidb-coredialect",
            "tidb-core",
            "TiDB v8.5.3 (TiDBDialect-core)",
            "TiDB with core TiDBDialect",
            None,
        )
    };

    match preset {
        DialectPreset::TidbCommunity => vec![community()],
        DialectPreset::Mysql => vec![mysql()],
        DialectPreset::TidbCore => vec![core()],
        DialectPreset::Both => vec![community(), mysql()],
    }
}

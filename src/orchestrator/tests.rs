use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::*;
use crate::cli::DialectPreset;
use crate::config::fixture_env;
use crate::process::DryRunRunner;
use crate::process::testing::RecordingRunner;
use crate::util::walk_files;
use crate::watchdog::WatchdogConfig;

const DATABASES_GRADLE: &str = r#"ext {
    dbBundle = [
        mysql_8_0 : [ 'db.dialect' : 'org.hibernate.dialect.MySQLDialect' ],
        mysql : [
            'db.dialect' : 'org.hibernate.dialect.MySQLDialect',
            'jdbc.driver': 'com.mysql.cj.jdbc.Driver'
        ],
        tidb : [
            'db.dialect' : 'org.hibernate.community.dialect.TiDBDialect',
            'jdbc.driver': 'com.mysql.cj.jdbc.Driver'
        ]
    ]
}
"#;

const SUITE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuite name="org.hibernate.ATest" tests="3" failures="1" errors="0" skipped="0" time="1.5">
  <testcase classname="org.hibernate.ATest" name="ok" time="0.5"/>
  <testcase classname="org.hibernate.ATest" name="other" time="0.5"/>
  <testcase classname="org.hibernate.ATest" name="broken" time="0.5">
    <failure message="boom">stack</failure>
  </testcase>
</testsuite>
"#;

fn options() -> ComparisonOptions {
    ComparisonOptions {
        skip_clean: false,
        skip_mysql: false,
        skip_tidb: false,
        tidb_dialect: DialectPreset::Both,
        gradle_continue: true,
        dry_run: false,
        compare_only: false,
        skip_tidb_patch: false,
        extra_args: None,
        watchdog: WatchdogConfig::from_seconds(60, None),
    }
}

fn lab(root: &Path) -> LabEnvironment {
    let env = fixture_env(root);
    let gradle = super::dialect::databases_gradle_path(&env.workspace);
    fs::create_dir_all(gradle.parent().expect("parent")).expect("mkdir");
    fs::write(&gradle, DATABASES_GRADLE).expect("write gradle");
    fs::write(env.workspace.join("gradlew"), "#!/bin/sh\n").expect("write gradlew");
    env
}

fn suite_path(workspace: &Path) -> PathBuf {
    workspace.join("hibernate-core/target/test-results/test/TEST-org.hibernate.ATest.xml")
}

fn write_results(workspace: &Path) {
    let path = suite_path(workspace);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(&path, SUITE).expect("write suite");
}

/// Queues one stream side effect per target that drops a result tree in the workspace.
fn produce_results(runner: &RecordingRunner, workspace: &Path, targets: usize) {
    for _ in 0..targets {
        let workspace = workspace.to_path_buf();
        runner.on_stream(move |_| {
            write_results(&workspace);
            1
        });
    }
}

fn fingerprint(root: &Path) -> String {
    let mut hasher = Sha256::new();
    for path in walk_files(root).expect("walk") {
        hasher.update(path.strip_prefix(root).expect("relative").to_string_lossy().as_bytes());
        hasher.update(fs::read(&path).expect("read"));
    }
    format!("{:x}", hasher.finalize())
}

fn abandoned_stage(report: &TargetReport) -> Option<Stage> {
    match &report.status {
        TargetStatus::Abandoned { stage, .. } => Some(*stage),
        TargetStatus::Completed { .. } => None,
    }
}

#[test]
fn stage_outcome_separates_interruption_from_failure() {
    let failed = StageOutcome::from(Err::<(), _>(anyhow::anyhow!("docker_db.sh exited 1")));
    assert!(matches!(failed, StageOutcome::Failed(reason) if reason.contains("docker_db.sh")));

    let fatal = StageOutcome::from(Err::<(), _>(anyhow::Error::from(Interrupted)));
    assert!(matches!(fatal, StageOutcome::Fatal(_)));

    let ok = StageOutcome::from(Ok::<u8, anyhow::Error>(7));
    assert!(matches!(ok, StageOutcome::Ok(7)));
}

#[test]
fn baseline_runs_stages_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = lab(dir.path());
    let mut opts = options();
    opts.skip_tidb = true;
    let runner = RecordingRunner::new();
    produce_results(&runner, &env.workspace, 1);

    let report = Orchestrator::new(&env, &opts, &runner, Interrupt::default())
        .execute()
        .expect("execute");

    let commands = runner.rendered();
    assert_eq!(commands[0], "docker info");
    assert!(commands[1].starts_with("docker run --rm -v"));
    assert!(commands[1].ends_with("./gradlew clean"));
    assert_eq!(commands[2], "docker rm -f mysql");
    assert_eq!(commands[3], "./docker_db.sh mysql_8_0");
    assert_eq!(commands[4], "docker container inspect mysql");
    assert!(commands[5].starts_with("stream: docker run --rm --name hibernate-mysql-ci-runner"));
    assert!(commands[5].ends_with("RDBMS=mysql_8_0 ./ci/build.sh --continue"));
    assert_eq!(commands[6], "docker rm -f mysql");
    assert_eq!(commands.len(), 7);

    assert_eq!(report.targets.len(), 1);
    assert_eq!(report.exit_code(), 0);
    assert!(report.comparisons.is_empty());
    let TargetStatus::Completed {
        collection_dir,
        summary_path,
        test_exit_code,
    } = &report.targets[0].status
    else {
        panic!("baseline should complete");
    };
    assert_eq!(*test_exit_code, 1);
    assert!(collection_dir.join("collection.json").is_file());
    assert!(summary_path.is_file());
    assert!(
        summary_path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("mysql-summary-"))
    );
    assert!(suite_path(&env.workspace).is_file());
}

#[test]
fn full_matrix_patches_once_and_cleans_between_targets() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = lab(dir.path());
    let opts = options();
    let runner = RecordingRunner::new();
    produce_results(&runner, &env.workspace, 3);

    let report = Orchestrator::new(&env, &opts, &runner, Interrupt::default())
        .execute()
        .expect("execute");

    let identifiers = report
        .targets
        .iter()
        .map(|target| target.identifier)
        .collect::<Vec<&str>>();
    assert_eq!(
        identifiers,
        vec!["mysql", "tidb-tidbdialect", "tidb-mysqldialect"]
    );
    assert_eq!(report.exit_code(), 0);

    let commands = runner.rendered();
    let patches = commands
        .iter()
        .filter(|command| command.contains("patch_docker_db_tidb.py"))
        .count();
    assert_eq!(patches, 1);
    assert!(
        commands
            .iter()
            .any(|command| command.ends_with("--dialect tidb-community"))
    );
    assert!(commands.iter().any(|command| command.ends_with("--dialect mysql")));
    assert!(commands.iter().any(|command| {
        command.contains("hibernate-tidb-ci-runner-mysqldialect")
            && command.contains("-Pdb.dialect=org.hibernate.dialect.MySQLDialect")
    }));

    assert_eq!(report.comparisons.len(), 3);
    assert!(report.comparisons.iter().all(|cmp| cmp.tests.diff == 0));
    assert!(suite_path(&env.workspace).is_file());
}

#[test]
fn failing_stage_abandons_target_and_matrix_continues() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = lab(dir.path());
    let opts = options();
    let runner = RecordingRunner::new();
    runner.fail_when("./docker_db.sh mysql_8_0", 1);
    produce_results(&runner, &env.workspace, 2);

    let report = Orchestrator::new(&env, &opts, &runner, Interrupt::default())
        .execute()
        .expect("execute");

    assert_eq!(report.targets.len(), 3);
    assert_eq!(abandoned_stage(&report.targets[0]), Some(Stage::StartBackend));
    assert_eq!(abandoned_stage(&report.targets[1]), None);
    assert_eq!(abandoned_stage(&report.targets[2]), None);
    assert_eq!(report.exit_code(), 2);

    let commands = runner.rendered();
    let baseline_start = commands
        .iter()
        .position(|command| command == "./docker_db.sh mysql_8_0")
        .expect("baseline start");
    assert_eq!(commands[baseline_start + 1], "docker rm -f mysql");
    assert!(
        !commands
            .iter()
            .any(|command| command.contains("hibernate-mysql-ci-runner"))
    );
}

#[test]
fn dialect_mismatch_abandons_before_the_backend_starts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = lab(dir.path());
    fs::write(
        super::dialect::databases_gradle_path(&env.workspace),
        "tidb : [ 'db.dialect' : 'org.hibernate.dialect.H2Dialect' ]\n",
    )
    .expect("write");
    let mut opts = options();
    opts.skip_mysql = true;
    opts.tidb_dialect = DialectPreset::TidbCommunity;
    let runner = RecordingRunner::new();

    let report = Orchestrator::new(&env, &opts, &runner, Interrupt::default())
        .execute()
        .expect("execute");

    assert_eq!(abandoned_stage(&report.targets[0]), Some(Stage::VerifyDialect));
    assert!(
        !runner
            .rendered()
            .iter()
            .any(|command| command.starts_with("docker rm -f"))
    );
}

#[test]
fn workspace_patch_failure_abandons_every_variant() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = lab(dir.path());
    let mut opts = options();
    opts.skip_mysql = true;
    let runner = RecordingRunner::new();
    runner.fail_when("patch_docker_db_tidb.py", 2);

    let report = Orchestrator::new(&env, &opts, &runner, Interrupt::default())
        .execute()
        .expect("execute");

    assert_eq!(report.targets.len(), 2);
    assert!(
        report
            .targets
            .iter()
            .all(|target| abandoned_stage(target) == Some(Stage::PatchWorkspace))
    );
    assert_eq!(report.exit_code(), 2);
    assert!(
        !runner
            .rendered()
            .iter()
            .any(|command| command.contains("docker_db.sh"))
    );
}

#[test]
fn unavailable_docker_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = lab(dir.path());
    let opts = options();
    let runner = RecordingRunner::new();
    runner.fail_when("docker info", 1);

    let err = Orchestrator::new(&env, &opts, &runner, Interrupt::default())
        .execute()
        .expect_err("docker down");
    assert!(err.to_string().contains("docker daemon is unavailable"));
    assert_eq!(runner.rendered().len(), 1);
}

#[test]
fn interrupt_during_tests_still_removes_the_container() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = lab(dir.path());
    let mut opts = options();
    opts.skip_tidb = true;
    let runner = RecordingRunner::new();
    let interrupt = Interrupt::default();
    let trigger = interrupt.clone();
    runner.on_stream(move |_| {
        trigger.trigger();
        130
    });

    let err = Orchestrator::new(&env, &opts, &runner, interrupt)
        .execute()
        .expect_err("interrupted");
    assert!(err.is::<Interrupted>());
    let commands = runner.rendered();
    assert_eq!(
        &commands[commands.len() - 2..],
        ["docker rm -f hibernate-mysql-ci-runner", "docker rm -f mysql"]
    );
}

#[test]
fn idle_timeout_removes_the_runner_before_the_backend() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = lab(dir.path());
    let mut opts = options();
    opts.skip_tidb = true;
    let runner = RecordingRunner::new();
    let workspace = env.workspace.clone();
    runner.on_stream(move |_| {
        write_results(&workspace);
        124
    });

    let report = Orchestrator::new(&env, &opts, &runner, Interrupt::default())
        .execute()
        .expect("execute");

    let commands = runner.rendered();
    assert_eq!(commands.len(), 8);
    assert!(commands[5].starts_with("stream: docker run --rm --name hibernate-mysql-ci-runner"));
    assert_eq!(commands[6], "docker rm -f hibernate-mysql-ci-runner");
    assert_eq!(commands[7], "docker rm -f mysql");
    assert!(matches!(
        report.targets[0].status,
        TargetStatus::Completed {
            test_exit_code: 124,
            ..
        }
    ));
}

#[test]
fn dry_run_leaves_the_workspace_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = lab(dir.path());
    write_results(&env.workspace);
    let before = fingerprint(dir.path());

    let mut opts = options();
    opts.dry_run = true;
    let report = Orchestrator::new(&env, &opts, &DryRunRunner, Interrupt::default())
        .execute()
        .expect("execute");

    assert_eq!(report.targets.len(), 3);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(fingerprint(dir.path()), before);
    assert!(!env.log_dir.exists());
    assert!(!env.results_runs_dir.exists());
}

#[test]
fn compare_only_skips_every_target() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = lab(dir.path());
    let mut opts = options();
    opts.compare_only = true;
    let runner = RecordingRunner::new();

    let report = Orchestrator::new(&env, &opts, &runner, Interrupt::default())
        .execute()
        .expect("execute");
    assert!(report.targets.is_empty());
    assert_eq!(runner.rendered(), vec!["docker info".to_string()]);
}

#[test]
fn transient_dirs_are_outermost_build_outputs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();
    for relative in [
        "core/target/test-results/test",
        "core/target/reports/tests/classes",
        "core/target/classes/java",
        "core/src/test/resources/reports",
        "docs/classes",
    ] {
        fs::create_dir_all(root.join(relative)).expect("mkdir");
    }

    let found = transient_build_dirs(root)
        .expect("scan")
        .into_iter()
        .map(|path| path.strip_prefix(root).expect("relative").to_path_buf())
        .collect::<Vec<PathBuf>>();
    assert_eq!(
        found,
        vec![
            PathBuf::from("core/target/classes"),
            PathBuf::from("core/target/reports"),
            PathBuf::from("core/target/test-results"),
        ]
    );
}

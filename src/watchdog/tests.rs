use std::fs;
use std::process::Command;
use std::time::{Duration, Instant};

use super::*;

fn fast_config(idle_timeout: Duration) -> WatchdogConfig {
    WatchdogConfig {
        idle_timeout,
        heartbeat_interval: resolve_heartbeat(idle_timeout, Some(idle_timeout / 4)),
        poll_interval: Duration::from_millis(50),
        join_grace: Duration::from_millis(500),
        echo_stdout: false,
    }
}

fn shell(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

#[test]
fn heartbeat_for_hundred_second_timeout_stays_in_bounds() {
    let heartbeat = resolve_heartbeat(Duration::from_secs(100), None);
    assert!(heartbeat >= Duration::from_secs(10));
    assert!(heartbeat <= Duration::from_secs(60));
    assert!(heartbeat < Duration::from_secs(100));
    assert_eq!(heartbeat, Duration::from_secs(50));
}

#[test]
fn heartbeat_is_clamped_and_strictly_below_timeout() {
    assert_eq!(
        resolve_heartbeat(Duration::from_secs(15), None),
        Duration::from_secs(10)
    );
    assert_eq!(
        resolve_heartbeat(Duration::from_secs(1800), None),
        Duration::from_secs(60)
    );
    assert_eq!(
        resolve_heartbeat(Duration::from_secs(10), None),
        Duration::from_secs(5)
    );
    assert_eq!(
        resolve_heartbeat(Duration::from_secs(1), None),
        Duration::from_millis(500)
    );
}

#[test]
fn requested_heartbeat_is_ignored_when_not_shorter_than_timeout() {
    let timeout = Duration::from_secs(100);
    assert_eq!(
        resolve_heartbeat(timeout, Some(Duration::from_secs(30))),
        Duration::from_secs(30)
    );
    assert_eq!(
        resolve_heartbeat(timeout, Some(Duration::from_secs(100))),
        Duration::from_secs(50)
    );
    assert_eq!(
        resolve_heartbeat(timeout, Some(Duration::ZERO)),
        Duration::from_secs(50)
    );
}

#[test]
fn non_positive_timeouts_are_normalized() {
    assert_eq!(normalize_idle_timeout(0), Duration::from_secs(1));
    assert_eq!(normalize_idle_timeout(-30), Duration::from_secs(1));
    assert_eq!(normalize_idle_timeout(45), Duration::from_secs(45));

    let config = WatchdogConfig::from_seconds(-1, Some(-5));
    assert_eq!(config.idle_timeout, Duration::from_secs(1));
    assert!(config.heartbeat_interval < config.idle_timeout);
}

#[test]
fn returns_child_exit_code_and_captures_both_streams() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log_path = dir.path().join("logs/run.log");

    let outcome = run_with_idle_timeout(
        &mut shell("echo from-stdout; echo from-stderr >&2; exit 3"),
        &log_path,
        &fast_config(Duration::from_secs(5)),
        &Interrupt::default(),
    )
    .expect("watchdog run");

    assert_eq!(outcome.exit_code, 3);
    assert!(!outcome.timed_out);
    let log = fs::read_to_string(&log_path).expect("log");
    assert!(log.contains("from-stdout"));
    assert!(log.contains("from-stderr"));
}

#[test]
fn log_file_is_appended_not_truncated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log_path = dir.path().join("run.log");
    fs::write(&log_path, "previous line\n").expect("seed log");

    run_with_idle_timeout(
        &mut shell("echo next line"),
        &log_path,
        &fast_config(Duration::from_secs(5)),
        &Interrupt::default(),
    )
    .expect("watchdog run");

    let log = fs::read_to_string(&log_path).expect("log");
    assert!(log.starts_with("previous line\n"));
    assert!(log.contains("next line"));
}

#[test]
fn silent_child_is_killed_with_timeout_status() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log_path = dir.path().join("run.log");
    let idle_timeout = Duration::from_millis(600);

    let started = Instant::now();
    let outcome = run_with_idle_timeout(
        &mut shell("echo started; exec sleep 10"),
        &log_path,
        &fast_config(idle_timeout),
        &Interrupt::default(),
    )
    .expect("watchdog run");

    assert_eq!(outcome.exit_code, IDLE_TIMEOUT_EXIT_CODE);
    assert!(outcome.timed_out);
    assert!(started.elapsed() >= idle_timeout);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn reader_held_open_by_grandchild_does_not_block_return() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log_path = dir.path().join("run.log");

    let started = Instant::now();
    let outcome = run_with_idle_timeout(
        &mut shell("echo started; sleep 10; echo never"),
        &log_path,
        &fast_config(Duration::from_millis(600)),
        &Interrupt::default(),
    )
    .expect("watchdog run");

    assert_eq!(outcome.exit_code, IDLE_TIMEOUT_EXIT_CODE);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn heartbeat_notices_land_in_log_without_killing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log_path = dir.path().join("run.log");
    let config = WatchdogConfig {
        idle_timeout: Duration::from_secs(3),
        heartbeat_interval: Duration::from_millis(200),
        poll_interval: Duration::from_millis(50),
        join_grace: Duration::from_millis(500),
        echo_stdout: false,
    };

    let outcome = run_with_idle_timeout(
        &mut shell("echo begin; sleep 1; echo end"),
        &log_path,
        &config,
        &Interrupt::default(),
    )
    .expect("watchdog run");

    assert_eq!(outcome.exit_code, 0);
    let log = fs::read_to_string(&log_path).expect("log");
    assert!(log.contains("[idle-watchdog] Waiting"));
    assert!(log.contains("end"));
}

#[test]
fn interrupt_kills_child_with_interrupted_status() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log_path = dir.path().join("run.log");
    let interrupt = Interrupt::default();
    interrupt.trigger();

    let started = Instant::now();
    let outcome = run_with_idle_timeout(
        &mut shell("exec sleep 10"),
        &log_path,
        &fast_config(Duration::from_secs(30)),
        &interrupt,
    )
    .expect("watchdog run");

    assert_eq!(outcome.exit_code, INTERRUPTED_EXIT_CODE);
    assert!(outcome.interrupted);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn spawn_failure_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = run_with_idle_timeout(
        &mut Command::new("/definitely/not/a/program"),
        &dir.path().join("run.log"),
        &fast_config(Duration::from_secs(1)),
        &Interrupt::default(),
    );
    assert!(result.is_err());
}

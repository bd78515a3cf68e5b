//! Idle-output watchdog.
//!
//! Runs a child with its stdout and stderr drained by reader threads that mirror
//! every line to our stdout and append it to a log file. The calling thread acts as
//! supervisor: it polls the shared "last output" clock and kills the child once the
//! stream has been silent for longer than the idle timeout.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error, warn};

use crate::interrupt::Interrupt;
use crate::util::ensure_directory;

/// Same status GNU `timeout` reports.
pub const IDLE_TIMEOUT_EXIT_CODE: i32 = 124;
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

const MIN_IDLE_TIMEOUT: Duration = Duration::from_secs(1);
const MIN_HEARTBEAT: Duration = Duration::from_secs(10);
const MAX_HEARTBEAT: Duration = Duration::from_secs(60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_JOIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub idle_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
    pub join_grace: Duration,
    pub echo_stdout: bool,
}

impl WatchdogConfig {
    pub fn new(idle_timeout: Duration, heartbeat: Option<Duration>) -> Self {
        let idle_timeout = idle_timeout.max(MIN_IDLE_TIMEOUT);
        Self {
            idle_timeout,
            heartbeat_interval: resolve_heartbeat(idle_timeout, heartbeat),
            poll_interval: DEFAULT_POLL_INTERVAL,
            join_grace: DEFAULT_JOIN_GRACE,
            echo_stdout: true,
        }
    }

    /// Builds a config from raw CLI seconds, clamping nonsensical values.
    pub fn from_seconds(idle_timeout_secs: i64, heartbeat_secs: Option<i64>) -> Self {
        let idle_timeout = normalize_idle_timeout(idle_timeout_secs);
        let heartbeat = heartbeat_secs
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::from_secs(secs as u64));
        Self::new(idle_timeout, heartbeat)
    }
}

pub fn normalize_idle_timeout(secs: i64) -> Duration {
    if secs <= 0 {
        warn!(
            requested = secs,
            "idle timeout must be positive; using {}s",
            MIN_IDLE_TIMEOUT.as_secs()
        );
        return MIN_IDLE_TIMEOUT;
    }
    Duration::from_secs(secs as u64)
}

/// Heartbeat cadence: the requested value when it is positive and shorter than the
/// idle timeout, otherwise half the timeout clamped to [10s, 60s]. The result is
/// always strictly below `idle_timeout`.
pub fn resolve_heartbeat(idle_timeout: Duration, requested: Option<Duration>) -> Duration {
    if let Some(requested) = requested {
        if !requested.is_zero() && requested < idle_timeout {
            return requested;
        }
    }

    let clamped = (idle_timeout / 2).clamp(MIN_HEARTBEAT, MAX_HEARTBEAT);
    if clamped < idle_timeout {
        clamped
    } else {
        idle_timeout / 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOutcome {
    pub exit_code: i32,
    pub timed_out: bool,
    pub interrupted: bool,
}

struct OutputSink {
    started: Instant,
    last_output_ms: AtomicU64,
    log: Mutex<File>,
    echo_stdout: bool,
}

impl OutputSink {
    fn touch(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_output_ms.fetch_max(now, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_output_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }

    fn write_line(&self, line: &[u8]) {
        if self.echo_stdout {
            let mut stdout = io::stdout().lock();
            let _ = stdout.write_all(line);
            let _ = stdout.flush();
        }
        self.append_log(line);
    }

    fn append_log(&self, bytes: &[u8]) {
        if let Ok(mut log) = self.log.lock() {
            if let Err(err) = log.write_all(bytes).and_then(|_| log.flush()) {
                debug!(error = %err, "failed to append to watchdog log");
            }
        }
    }
}

/// Runs `command` under the idle-output policy, appending merged output to `log_path`.
pub fn run_with_idle_timeout(
    command: &mut Command,
    log_path: &Path,
    config: &WatchdogConfig,
    interrupt: &Interrupt,
) -> Result<WatchOutcome> {
    if let Some(parent) = log_path.parent() {
        ensure_directory(parent)?;
    }
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("failed to open log file: {}", log_path.display()))?;

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {:?}", command.get_program()))?;

    let sink = Arc::new(OutputSink {
        started: Instant::now(),
        last_output_ms: AtomicU64::new(0),
        log: Mutex::new(log),
        echo_stdout: config.echo_stdout,
    });

    let (done_tx, done_rx) = mpsc::channel();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, Arc::clone(&sink), done_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, Arc::clone(&sink), done_tx.clone()));
    }
    drop(done_tx);

    let outcome = supervise(&mut child, &sink, config, interrupt);

    let deadline = Instant::now() + config.join_grace;
    let mut finished = 0;
    while finished < readers.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match done_rx.recv_timeout(remaining) {
            Ok(()) => finished += 1,
            Err(_) => break,
        }
    }
    if finished == readers.len() {
        for reader in readers {
            let _ = reader.join();
        }
    } else {
        warn!(
            grace_secs = config.join_grace.as_secs_f64(),
            "output stream still open after grace period; detaching reader"
        );
    }

    if let Ok(mut log) = sink.log.lock() {
        log.flush()
            .with_context(|| format!("failed to flush log file: {}", log_path.display()))?;
    }

    outcome
}

fn supervise(
    child: &mut Child,
    sink: &OutputSink,
    config: &WatchdogConfig,
    interrupt: &Interrupt,
) -> Result<WatchOutcome> {
    let mut last_heartbeat = Instant::now();

    loop {
        if let Some(status) = child.try_wait().context("failed to poll child process")? {
            return Ok(WatchOutcome {
                exit_code: exit_code_of(status),
                timed_out: false,
                interrupted: false,
            });
        }

        if interrupt.is_triggered() {
            terminate(child);
            return Ok(WatchOutcome {
                exit_code: INTERRUPTED_EXIT_CODE,
                timed_out: false,
                interrupted: true,
            });
        }

        let idle_for = sink.idle_for();
        if idle_for > config.idle_timeout {
            terminate(child);
            error!(
                idle_timeout_secs = config.idle_timeout.as_secs_f64(),
                "command idle for more than the timeout; terminated"
            );
            return Ok(WatchOutcome {
                exit_code: IDLE_TIMEOUT_EXIT_CODE,
                timed_out: true,
                interrupted: false,
            });
        }

        if idle_for >= config.heartbeat_interval
            && last_heartbeat.elapsed() >= config.heartbeat_interval
        {
            let message = format!(
                "[idle-watchdog] Waiting {}s without output (timeout {}s).\n",
                idle_for.as_secs(),
                config.idle_timeout.as_secs()
            );
            warn!(
                idle_secs = idle_for.as_secs(),
                timeout_secs = config.idle_timeout.as_secs(),
                "still waiting for output"
            );
            sink.append_log(message.as_bytes());
            last_heartbeat = Instant::now();
        }

        thread::sleep(config.poll_interval);
    }
}

fn spawn_reader<R>(stream: R, sink: Arc<OutputSink>, done: Sender<()>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    sink.touch();
                    sink.write_line(&line);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(error = %err, "output reader stopped");
                    break;
                }
            }
        }
        let _ = done.send(());
    })
}

fn terminate(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!(error = %err, "kill failed; child likely already exited");
    }
    if let Err(err) = child.wait() {
        warn!(error = %err, "failed to reap child process");
    }
}

pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(all(test, unix))]
mod tests;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::CleanupArgs;
use crate::collector::MANIFEST_FILE;
use crate::config::{CleanupOptions, LabEnvironment};
use crate::interrupt::Interrupt;
use crate::junit::{REPORTS_DIR, RESULT_MARKER};
use crate::orchestrator::DOCKER;
use crate::process::{CommandRunner, CommandSpec, DryRunRunner, SystemRunner};
use crate::util::remove_dir_if_exists;

const TEMP_EXTENSIONS: [&str; 2] = ["log", "json"];

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub containers_removed: Vec<String>,
    pub temp_files_removed: usize,
    pub report_dirs_removed: usize,
    pub collections_pruned: usize,
}

pub fn run(args: CleanupArgs, interrupt: Interrupt) -> Result<()> {
    let env = LabEnvironment::from_args(&args.lab)?;
    let options = CleanupOptions::from_args(&args, &env);
    let runner: Box<dyn CommandRunner> = if options.dry_run {
        Box::new(DryRunRunner)
    } else {
        Box::new(SystemRunner::new(interrupt))
    };

    let report = execute(&env, &options, runner.as_ref())?;
    info!(
        containers = report.containers_removed.len(),
        temp_files = report.temp_files_removed,
        report_dirs = report.report_dirs_removed,
        collections = report.collections_pruned,
        "cleanup complete"
    );
    Ok(())
}

pub fn execute(
    env: &LabEnvironment,
    options: &CleanupOptions,
    runner: &dyn CommandRunner,
) -> Result<CleanupReport> {
    info!(
        lab_home = %env.lab_home.display(),
        workspace = %env.workspace.display(),
        temp = %env.temp_dir.display(),
        dry_run = options.dry_run,
        "cleanup configuration"
    );
    let mut report = CleanupReport::default();

    if options.containers.is_empty() {
        info!("no containers requested; skipping docker cleanup");
    }
    for name in &options.containers {
        if remove_container(runner, name)? {
            report.containers_removed.push(name.clone());
        }
    }

    if options.gradle_clean {
        info!(image = %options.gradle_image, "running Gradle clean in a container");
        let clean = CommandSpec::new(DOCKER).args([
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:/workspace", env.workspace.display()),
            "-w".to_string(),
            "/workspace".to_string(),
            options.gradle_image.clone(),
            "./gradlew".to_string(),
            "clean".to_string(),
        ]);
        runner.run_checked(&clean)?;
    }

    if options.purge_gradle_cache {
        let cache = &env.gradle_cache_dir;
        if !cache.exists() {
            info!(path = %cache.display(), "Gradle cache not found; skipping");
        } else if options.dry_run {
            info!(path = %cache.display(), "[dry-run] would remove Gradle cache");
        } else {
            remove_dir_if_exists(cache)?;
            info!(path = %cache.display(), "removed Gradle cache");
        }
    }

    if options.clean_temp {
        for path in temp_artifacts(&env.temp_dir)? {
            if options.dry_run {
                info!(path = %path.display(), "[dry-run] would remove");
                continue;
            }
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
            report.temp_files_removed += 1;
        }
        info!(removed = report.temp_files_removed, "cleaned temp logs and JSON files");
    }

    if options.clean_reports {
        for dir in module_report_dirs(&env.workspace)? {
            if options.dry_run {
                info!(path = %dir.display(), "[dry-run] would remove");
                continue;
            }
            if remove_dir_if_exists(&dir)? {
                report.report_dirs_removed += 1;
            }
        }
        info!(removed = report.report_dirs_removed, "removed module report directories");
    }

    if options.prune_collections {
        for dir in complete_collections(&env.results_runs_dir)? {
            if options.dry_run {
                info!(path = %dir.display(), "[dry-run] would prune collection");
                continue;
            }
            prune_collection(&dir)?;
            report.collections_pruned += 1;
        }
        info!(pruned = report.collections_pruned, "pruned collections");
    }

    Ok(report)
}

/// Removes `name` when `docker ps` knows it. Returns whether a removal succeeded.
fn remove_container(runner: &dyn CommandRunner, name: &str) -> Result<bool> {
    let lookup = CommandSpec::new(DOCKER).args([
        "ps".to_string(),
        "-aq".to_string(),
        "--filter".to_string(),
        format!("name=^{name}$"),
    ]);
    let found = runner.run(&lookup)?;
    if !found.succeeded() || found.stdout.trim().is_empty() {
        info!(container = name, "container not present");
        return Ok(false);
    }

    let remove = CommandSpec::new(DOCKER).args(["rm", "-f", name]);
    let output = runner.run(&remove)?;
    if output.succeeded() {
        info!(container = name, "removed container");
        Ok(true)
    } else {
        warn!(container = name, status = output.status, "failed to remove container");
        Ok(false)
    }
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut paths = fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .flatten()
        .map(|entry| entry.path())
        .collect::<Vec<PathBuf>>();
    paths.sort();
    Ok(paths)
}

/// Top-level `*.log` and `*.json` files in the temp directory.
pub fn temp_artifacts(temp_dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(read_dir_sorted(temp_dir)?
        .into_iter()
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| TEMP_EXTENSIONS.contains(&ext))
                .unwrap_or(false)
        })
        .collect())
}

/// `<workspace>/<module>/target/reports` directories.
pub fn module_report_dirs(workspace: &Path) -> Result<Vec<PathBuf>> {
    Ok(read_dir_sorted(workspace)?
        .into_iter()
        .map(|module| module.join(RESULT_MARKER).join(REPORTS_DIR))
        .filter(|dir| dir.is_dir())
        .collect())
}

/// Collection directories in `results_runs_dir` that carry a manifest.
pub fn complete_collections(results_runs_dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(read_dir_sorted(results_runs_dir)?
        .into_iter()
        .filter(|dir| dir.join(MANIFEST_FILE).is_file())
        .collect())
}

/// Drops the manifest before the tree.
fn prune_collection(dir: &Path) -> Result<()> {
    let manifest = dir.join(MANIFEST_FILE);
    fs::remove_file(&manifest)
        .with_context(|| format!("failed to remove {}", manifest.display()))?;
    remove_dir_if_exists(dir)?;
    info!(path = %dir.display(), "pruned collection");
    Ok(())
}

//! Write-once snapshots of per-module test-result trees.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{info, warn};

use crate::junit::{REPORTS_DIR, RESULT_MARKER, TEST_RESULTS_DIR, result_marker_index};
use crate::model::CollectionManifest;
use crate::util::{
    copy_dir_all, ensure_directory, path_segments, remove_dir_if_exists, walk_files,
    write_json_pretty,
};

pub const MANIFEST_FILE: &str = "collection.json";
const COPIED_SUBDIRS: [&str; 2] = [TEST_RESULTS_DIR, REPORTS_DIR];

#[derive(Debug, Clone)]
pub struct CollectRequest {
    pub root: PathBuf,
    pub dest_prefix: PathBuf,
    pub timestamp: String,
    pub log_path: Option<PathBuf>,
    /// Base directory for relative `log_path` values.
    pub log_dir: Option<PathBuf>,
    pub remove_source: bool,
    pub backend_hint: Option<String>,
}

pub fn collection_dir_for(dest_prefix: &Path, timestamp: &str) -> PathBuf {
    PathBuf::from(format!("{}-{}", dest_prefix.display(), timestamp))
}

/// Module directories (relative to `root`) that produced `target/test-results/**/*.xml`.
pub fn find_modules(root: &Path) -> Result<BTreeSet<PathBuf>> {
    let mut modules = BTreeSet::new();
    for path in walk_files(root)? {
        let is_xml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("xml"))
            .unwrap_or(false);
        if !is_xml {
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let segments = path_segments(relative);
        match result_marker_index(&segments) {
            Some(index) if index > 0 => {
                modules.insert(segments[..index].iter().collect::<PathBuf>());
            }
            _ => {}
        }
    }
    Ok(modules)
}

pub fn collect(request: &CollectRequest) -> Result<PathBuf> {
    let collection_dir = collection_dir_for(&request.dest_prefix, &request.timestamp);
    info!(
        root = %request.root.display(),
        destination = %collection_dir.display(),
        "collecting test results"
    );

    if let Some(parent) = collection_dir.parent() {
        ensure_directory(parent)?;
    }
    fs::create_dir(&collection_dir).map_err(|err| {
        if err.kind() == io::ErrorKind::AlreadyExists {
            anyhow!(
                "destination already exists: {}",
                collection_dir.display()
            )
        } else {
            anyhow!(err).context(format!(
                "failed to create collection directory: {}",
                collection_dir.display()
            ))
        }
    })?;

    let sources = match populate(request, &collection_dir) {
        Ok(sources) => sources,
        Err(err) => {
            if let Err(cleanup) = remove_dir_if_exists(&collection_dir) {
                warn!(
                    path = %collection_dir.display(),
                    error = %cleanup,
                    "failed to remove incomplete collection"
                );
            }
            return Err(err);
        }
    };

    if request.remove_source {
        remove_sources(&sources);
    }
    Ok(collection_dir)
}

/// Copies every module subtree and writes the manifest. Returns the copied sources.
fn populate(request: &CollectRequest, collection_dir: &Path) -> Result<Vec<PathBuf>> {
    let modules = find_modules(&request.root)?;
    if modules.is_empty() {
        bail!(
            "no test results were found under {}",
            request.root.display()
        );
    }

    let mut sources = Vec::new();
    for module in &modules {
        let target_dir = request.root.join(module).join(RESULT_MARKER);

        for subdir in COPIED_SUBDIRS {
            let source = target_dir.join(subdir);
            if !source.is_dir() {
                continue;
            }
            let destination = collection_dir.join(module).join(RESULT_MARKER).join(subdir);
            copy_dir_all(&source, &destination)?;
            sources.push(source);
        }
    }

    if sources.is_empty() {
        bail!("located modules, but no test-results/reports directories were copied");
    }
    info!(modules = modules.len(), subtrees = sources.len(), "copied result trees");

    let log_copy = match &request.log_path {
        Some(log_path) => attach_log(log_path, request.log_dir.as_deref(), collection_dir)?,
        None => None,
    };

    let manifest = CollectionManifest {
        timestamp: request.timestamp.clone(),
        source_root: request.root.display().to_string(),
        collection_dir: collection_dir.display().to_string(),
        log_copy: log_copy.map(|path| path.display().to_string()),
        modules: modules
            .iter()
            .map(|module| module.display().to_string())
            .collect(),
        backend: request.backend_hint.clone(),
    };
    let manifest_path = collection_dir.join(MANIFEST_FILE);
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote collection manifest");

    Ok(sources)
}

/// Runs only once the manifest is on disk; failures leave the source in place.
fn remove_sources(sources: &[PathBuf]) {
    for source in sources {
        match fs::remove_dir_all(source) {
            Ok(()) => info!(path = %source.display(), "removed collected source"),
            Err(err) => warn!(
                path = %source.display(),
                error = %err,
                "failed to remove collected source"
            ),
        }
    }
}

/// Absolute paths are used as-is; relative ones are tried under `log_dir`, then as given.
pub fn resolve_log_path(log_path: &Path, log_dir: Option<&Path>) -> PathBuf {
    if log_path.is_absolute() {
        return log_path.to_path_buf();
    }
    if let Some(log_dir) = log_dir {
        let candidate = log_dir.join(log_path);
        if candidate.exists() {
            return candidate;
        }
    }
    log_path.to_path_buf()
}

fn attach_log(
    log_path: &Path,
    log_dir: Option<&Path>,
    collection_dir: &Path,
) -> Result<Option<PathBuf>> {
    let resolved = resolve_log_path(log_path, log_dir);
    if !resolved.is_file() {
        warn!(path = %resolved.display(), "log file not found; collection continues without it");
        return Ok(None);
    }

    let logs_dir = collection_dir.join("logs");
    ensure_directory(&logs_dir)?;
    let file_name = resolved
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "run.log".into());
    let copy = logs_dir.join(file_name);
    fs::copy(&resolved, &copy).with_context(|| {
        format!(
            "failed to copy log {} to {}",
            resolved.display(),
            copy.display()
        )
    })?;
    info!(path = %copy.display(), "copied log file");
    Ok(Some(copy))
}

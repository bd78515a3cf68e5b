//! Aggregation of collected JUnit results and backend inference.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::collector::MANIFEST_FILE;
use crate::junit::{find_result_files, module_name_for, parse_suite};
use crate::model::{CollectionManifest, SuiteTotals, SummaryPayload};
use crate::util::{newest_path, now_utc_string, read_json, run_timestamp, write_json_pretty};

pub const UNKNOWN_BACKEND: &str = "unknown";
const LOG_TAIL_LINES: usize = 256;

pub type ModuleTotals = BTreeMap<String, SuiteTotals>;

/// Sums every `<testsuite>` under `root` into overall and per-module totals.
pub fn aggregate(root: &Path) -> Result<(SuiteTotals, ModuleTotals)> {
    let mut overall = SuiteTotals::default();
    let mut per_module = ModuleTotals::new();

    for path in find_result_files(root)? {
        let Some(suite) = parse_suite(&path) else {
            continue;
        };
        let module = module_name_for(&path, root);
        overall.absorb(&suite.totals);
        per_module.entry(module).or_default().absorb(&suite.totals);
    }

    Ok((overall, per_module))
}

/// Renders seconds as `XhYmZs`, dropping zero leading units.
pub fn friendly_duration(seconds: f64) -> String {
    if seconds.is_nan() || seconds <= 0.0 {
        return "0s".to_string();
    }
    let total = seconds.round() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    let mut rendered = String::new();
    if hours > 0 {
        rendered.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        rendered.push_str(&format!("{minutes}m"));
    }
    if secs > 0 || rendered.is_empty() {
        rendered.push_str(&format!("{secs}s"));
    }
    rendered
}

/// Value of the first non-empty `RDBMS=` assignment in `lines`.
pub fn extract_db_hint<'a>(lines: impl IntoIterator<Item = &'a str>) -> Option<String> {
    lines.into_iter().find_map(|line| {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();
        (key == "RDBMS" && !value.is_empty()).then(|| value.to_string())
    })
}

/// Scans the last lines of a log, newest first, for an `RDBMS=` printout.
pub fn tail_log_for_backend(log_path: &Path) -> Option<String> {
    let raw = fs::read(log_path).ok()?;
    let text = String::from_utf8_lossy(&raw);
    let lines = text.lines().collect::<Vec<&str>>();
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    extract_db_hint(lines[start..].iter().rev().copied())
}

pub fn infer_from_filename(log_path: &Path) -> Option<String> {
    let name = log_path.file_name()?.to_string_lossy().to_ascii_lowercase();
    if name.starts_with("mysql-ci") {
        return Some("mysql_8_0".to_string());
    }
    if name.starts_with("tidb-ci") {
        return Some("tidb".to_string());
    }
    None
}

/// Manifest hint, then log tail, then log filename, then `unknown`.
pub fn infer_backend(manifest: Option<&CollectionManifest>, log_path: Option<&Path>) -> String {
    if let Some(hint) = manifest
        .and_then(|manifest| manifest.backend.as_deref())
        .map(str::trim)
        .filter(|hint| !hint.is_empty())
    {
        return hint.to_string();
    }

    if let Some(log_path) = log_path {
        if let Some(hint) = tail_log_for_backend(log_path) {
            return hint;
        }
        if let Some(hint) = infer_from_filename(log_path) {
            return hint;
        }
    }

    UNKNOWN_BACKEND.to_string()
}

pub fn load_manifest(path: &Path) -> Option<CollectionManifest> {
    if !path.exists() {
        return None;
    }
    match read_json(path) {
        Ok(manifest) => Some(manifest),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read manifest");
            None
        }
    }
}

fn logs_with_extension(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("log"))
        .collect()
}

fn discover_log_in_collection(root: &Path) -> Option<PathBuf> {
    let logs_dir = root.join("logs");
    if !logs_dir.is_dir() {
        return None;
    }
    newest_path(logs_with_extension(&logs_dir))
}

fn newest_ci_log(log_dir: &Path) -> Option<PathBuf> {
    let candidates = logs_with_extension(log_dir).into_iter().filter(|path| {
        path.file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with("mysql-ci-") || name.starts_with("tidb-ci-"))
            .unwrap_or(false)
    });
    newest_path(candidates)
}

/// Explicit path, manifest `log_copy`, newest `logs/*.log`, newest CI log in `log_dir`.
pub fn resolve_log_path(
    explicit: Option<&Path>,
    root: &Path,
    manifest: Option<&CollectionManifest>,
    log_dir: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(explicit) = explicit {
        if explicit.is_absolute() {
            return Some(explicit.to_path_buf());
        }
        let relative = root.join(explicit);
        if relative.exists() {
            return Some(relative);
        }
        if let Some(log_dir) = log_dir {
            let candidate = log_dir.join(explicit);
            if candidate.exists() {
                return Some(candidate);
            }
        }
        return Some(explicit.to_path_buf());
    }

    if let Some(log_copy) = manifest.and_then(|manifest| manifest.log_copy.as_deref()) {
        let candidate = PathBuf::from(log_copy);
        if candidate.is_absolute() {
            return Some(candidate);
        }
        return Some(root.join(candidate));
    }

    discover_log_in_collection(root).or_else(|| log_dir.and_then(newest_ci_log))
}

#[derive(Debug, Clone, Default)]
pub struct SummaryRequest {
    pub root: PathBuf,
    /// Either a `.json` file or a prefix completed as `{prefix}-{timestamp}.json`.
    pub json_out: Option<PathBuf>,
    pub log: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
    pub timestamp: Option<String>,
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SummaryResult {
    pub payload: SummaryPayload,
    pub json_path: Option<PathBuf>,
    pub log_hint: String,
}

pub fn summary_json_path(json_out: &Path, timestamp: &str) -> PathBuf {
    let is_json = json_out
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.ends_with(".json"))
        .unwrap_or(false);
    if is_json {
        return json_out.to_path_buf();
    }
    PathBuf::from(format!("{}-{}.json", json_out.display(), timestamp))
}

pub fn summarize(request: &SummaryRequest) -> Result<SummaryResult> {
    let root = &request.root;
    if !root.is_dir() {
        bail!("root path not found: {}", root.display());
    }

    let manifest_path = request
        .manifest
        .clone()
        .unwrap_or_else(|| root.join(MANIFEST_FILE));
    let manifest = load_manifest(&manifest_path);
    let manifest_ref = manifest_path.exists().then(|| manifest_path.clone());

    let timestamp = request
        .timestamp
        .clone()
        .or_else(|| manifest.as_ref().map(|manifest| manifest.timestamp.clone()))
        .unwrap_or_else(run_timestamp);

    let (overall, modules) = aggregate(root)?;
    let log_path = resolve_log_path(
        request.log.as_deref(),
        root,
        manifest.as_ref(),
        request.log_dir.as_deref(),
    );

    let existing_log = log_path.as_deref().filter(|path| path.exists());
    let database = infer_backend(manifest.as_ref(), existing_log);
    let log_hint = match &log_path {
        Some(path) if path.exists() => match path.strip_prefix(root) {
            Ok(relative) => format!("log: {}", relative.display()),
            Err(_) => format!("log: {}", path.display()),
        },
        Some(path) => format!("log: {} (missing)", path.display()),
        None => "log: auto-detect failed".to_string(),
    };

    let payload = SummaryPayload {
        generated_at: now_utc_string(),
        timestamp: timestamp.clone(),
        root: root.display().to_string(),
        manifest: manifest_ref.map(|path| path.display().to_string()),
        database,
        overall,
        modules,
        log: log_path.map(|path| path.display().to_string()),
    };

    let json_path = match &request.json_out {
        Some(json_out) => {
            let json_path = summary_json_path(json_out, &timestamp);
            write_json_pretty(&json_path, &payload)?;
            info!(path = %json_path.display(), "wrote JSON summary");
            Some(json_path)
        }
        None => None,
    };

    Ok(SummaryResult {
        payload,
        json_path,
        log_hint,
    })
}

pub fn write_report(result: &SummaryResult) -> Result<()> {
    let payload = &result.payload;
    let overall = &payload.overall;
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(output, "Local JUnit summary")?;
    writeln!(output, "  Root path:        {}", payload.root)?;
    writeln!(output, "  XML files found:  {}", overall.files)?;
    writeln!(output, "  Database:         {}", payload.database)?;
    writeln!(output, "                    ({})", result.log_hint)?;
    writeln!(output)?;
    writeln!(output, "Aggregated totals (all modules):")?;
    writeln!(output, "  Tests:    {}", overall.tests)?;
    writeln!(output, "  Failures: {}", overall.failures)?;
    writeln!(output, "  Errors:   {}", overall.errors)?;
    writeln!(output, "  Skipped:  {}", overall.skipped)?;
    writeln!(output, "  Duration: {}", friendly_duration(overall.time))?;

    if payload.modules.is_empty() {
        writeln!(output)?;
        writeln!(output, "No JUnit XML files discovered under the given root.")?;
        output.flush()?;
        return Ok(());
    }

    writeln!(output)?;
    for line in module_table(&payload.modules) {
        writeln!(output, "{line}")?;
    }
    output.flush()?;
    Ok(())
}

pub fn module_table(modules: &ModuleTotals) -> Vec<String> {
    let mut lines = vec![format!(
        "{:25} {:>12} {:>8} {:>10} {:>10} {:>10} {:>10}",
        "Module", "Duration", "Files", "Tests", "Failures", "Errors", "Skipped"
    )];
    for (module, stats) in modules {
        lines.push(format!(
            "{:25} {:>12} {:>8} {:>10} {:>10} {:>10} {:>10}",
            module,
            friendly_duration(stats.time),
            stats.files,
            stats.tests,
            stats.failures,
            stats.errors,
            stats.skipped
        ));
    }
    lines
}

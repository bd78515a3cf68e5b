//! Pairwise comparison of the newest summary of each target.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;
use tracing::{info, warn};

use crate::model::{ComparisonReport, MetricDelta, SuiteTotals};
use crate::util::{newest_path, read_json};

pub struct ComparisonPair {
    pub left: &'static str,
    pub right: &'static str,
    pub left_label: &'static str,
    pub right_label: &'static str,
}

pub const COMPARISON_PAIRS: [ComparisonPair; 4] = [
    ComparisonPair {
        left: "mysql",
        right: "tidb-tidbdialect",
        left_label: "MySQL 8.0",
        right_label: "TiDB with TiDBDialect",
    },
    ComparisonPair {
        left: "tidb-tidbdialect",
        right: "tidb-mysqldialect",
        left_label: "TiDB TiDBDialect",
        right_label: "TiDB MySQLDialect",
    },
    ComparisonPair {
        left: "mysql",
        right: "tidb-mysqldialect",
        left_label: "MySQL 8.0",
        right_label: "TiDB with MySQLDialect",
    },
    ComparisonPair {
        left: "mysql",
        right: "tidb-coredialect",
        left_label: "MySQL 8.0",
        right_label: "TiDB with core TiDBDialect",
    },
];

const BORDER_TOP: &str = "╔════════════════╦══════════╦══════════╦═══════════╗";
const BORDER_MID: &str = "╠════════════════╬══════════╬══════════╬═══════════╣";
const BORDER_BOTTOM: &str = "╚════════════════╩══════════╩══════════╩═══════════╝";

#[derive(Deserialize)]
struct StoredSummary {
    #[serde(default)]
    overall: SuiteTotals,
}

/// Most recently modified `{identifier}-summary-*.json` in `results_runs_dir`.
pub fn latest_summary(results_runs_dir: &Path, identifier: &str) -> Option<PathBuf> {
    let prefix = format!("{identifier}-summary-");
    let entries = fs::read_dir(results_runs_dir).ok()?;
    let candidates = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with(&prefix) && name.ends_with(".json"))
                .unwrap_or(false)
        });
    newest_path(candidates)
}

pub fn load_totals(path: &Path) -> Result<SuiteTotals> {
    let stored: StoredSummary = read_json(path)?;
    Ok(stored.overall)
}

pub fn compare(
    left_label: &str,
    right_label: &str,
    left: &SuiteTotals,
    right: &SuiteTotals,
) -> ComparisonReport {
    ComparisonReport {
        left_label: left_label.to_string(),
        right_label: right_label.to_string(),
        tests: MetricDelta::new(left.tests, right.tests),
        failures: MetricDelta::new(left.failures, right.failures),
        skipped: MetricDelta::new(left.skipped, right.skipped),
    }
}

pub fn format_table(report: &ComparisonReport) -> Vec<String> {
    let mut rows = vec![
        format!("{} vs {}:", report.left_label, report.right_label),
        BORDER_TOP.to_string(),
        format!(
            "║ {:<14} ║ {:>8} ║ {:>8} ║ {:>9} ║",
            "Metric", "Left", "Right", "Diff"
        ),
        BORDER_MID.to_string(),
    ];
    for (metric, delta) in [
        ("Tests", report.tests),
        ("Failures", report.failures),
        ("Skipped", report.skipped),
    ] {
        rows.push(format!(
            "║ {:<14} ║ {:>8} ║ {:>8} ║ {:>9} ║",
            metric, delta.left, delta.right, delta.diff
        ));
    }
    rows.push(BORDER_BOTTOM.to_string());
    rows
}

/// Reports for every configured pair whose two summaries exist.
pub fn compare_latest(results_runs_dir: &Path) -> Vec<ComparisonReport> {
    let mut identifiers = COMPARISON_PAIRS
        .iter()
        .flat_map(|pair| [pair.left, pair.right])
        .collect::<Vec<&str>>();
    identifiers.sort_unstable();
    identifiers.dedup();

    let available = identifiers
        .into_iter()
        .filter_map(|identifier| {
            latest_summary(results_runs_dir, identifier).map(|path| (identifier, path))
        })
        .collect::<Vec<(&str, PathBuf)>>();
    if available.len() < 2 {
        warn!(
            found = available.len(),
            dir = %results_runs_dir.display(),
            "need at least 2 summaries to compare; generate more runs first"
        );
        return Vec::new();
    }
    for (identifier, path) in &available {
        info!(identifier = *identifier, summary = %path.display(), "using summary");
    }

    let lookup = |identifier: &str| {
        available
            .iter()
            .find(|(candidate, _)| *candidate == identifier)
            .map(|(_, path)| path)
    };

    let mut reports = Vec::new();
    for pair in &COMPARISON_PAIRS {
        let (Some(left), Some(right)) = (lookup(pair.left), lookup(pair.right)) else {
            continue;
        };
        match (load_totals(left), load_totals(right)) {
            (Ok(left), Ok(right)) => {
                reports.push(compare(pair.left_label, pair.right_label, &left, &right));
            }
            (Err(err), _) | (_, Err(err)) => {
                warn!(
                    left = pair.left,
                    right = pair.right,
                    error = %err,
                    "skipping comparison with unreadable summary"
                );
            }
        }
    }
    reports
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use crate::model::SuiteTotals;
use crate::util::{path_segments, walk_files};

/// Build-output segment that owns the per-module result trees.
pub const RESULT_MARKER: &str = "target";
pub const TEST_RESULTS_DIR: &str = "test-results";
pub const REPORTS_DIR: &str = "reports";

#[derive(Debug, Clone, PartialEq)]
pub struct SuiteRecord {
    pub path: PathBuf,
    pub totals: SuiteTotals,
    pub cases: Vec<CaseRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseRecord {
    pub classname: String,
    pub name: String,
    pub failure: Option<String>,
}

/// Module owning a result file: the segment before `target`, else the first segment.
pub fn module_name_for(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let segments = path_segments(relative);
    match segments.iter().position(|segment| segment == RESULT_MARKER) {
        Some(index) if index > 0 => segments[index - 1].clone(),
        _ => segments
            .first()
            .cloned()
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

/// Index of the `target` segment directly followed by `test-results`, if any.
pub fn result_marker_index(segments: &[String]) -> Option<usize> {
    segments.windows(2).position(|pair| {
        pair[0] == RESULT_MARKER && pair[1] == TEST_RESULTS_DIR
    })
}

fn is_xml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("xml"))
        .unwrap_or(false)
}

/// Every `*.xml` below a `test-results` directory, sorted by path.
pub fn find_result_files(root: &Path) -> Result<Vec<PathBuf>> {
    Ok(walk_files(root)?
        .into_iter()
        .filter(|path| is_xml(path))
        .filter(|path| {
            let relative = path.strip_prefix(root).unwrap_or(path);
            let segments = path_segments(relative);
            segments
                .iter()
                .take(segments.len().saturating_sub(1))
                .any(|segment| segment == TEST_RESULTS_DIR)
        })
        .collect())
}

/// Every `TEST-*.xml` under `root`, sorted by path.
pub fn find_suite_reports(root: &Path) -> Result<Vec<PathBuf>> {
    Ok(walk_files(root)?
        .into_iter()
        .filter(|path| is_xml(path))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with("TEST-"))
                .unwrap_or(false)
        })
        .collect())
}

/// Parses a `<testsuite>` document. Unreadable, malformed or non-suite files yield `None`.
pub fn parse_suite(path: &Path) -> Option<SuiteRecord> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "skipping unreadable result file");
            return None;
        }
    };
    let document = match roxmltree::Document::parse(&text) {
        Ok(document) => document,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "skipping malformed result file");
            return None;
        }
    };

    let suite = document.root_element();
    if suite.tag_name().name() != "testsuite" {
        return None;
    }

    let totals = SuiteTotals {
        files: 1,
        tests: count_attribute(&suite, "tests"),
        failures: count_attribute(&suite, "failures"),
        errors: count_attribute(&suite, "errors"),
        skipped: count_attribute(&suite, "skipped"),
        time: suite
            .attribute("time")
            .and_then(|value| value.trim().parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .unwrap_or(0.0),
    };

    let cases = suite
        .children()
        .filter(|node| node.has_tag_name("testcase"))
        .map(|case| {
            let failure = case
                .children()
                .find(|node| node.has_tag_name("failure"))
                .map(|failure| {
                    failure
                        .attribute("message")
                        .filter(|message| !message.is_empty())
                        .or_else(|| failure.text())
                        .unwrap_or_default()
                        .trim()
                        .to_string()
                });
            CaseRecord {
                classname: case
                    .attribute("classname")
                    .filter(|value| !value.is_empty())
                    .unwrap_or("unknown")
                    .to_string(),
                name: case.attribute("name").unwrap_or_default().to_string(),
                failure,
            }
        })
        .collect();

    Some(SuiteRecord {
        path: path.to_path_buf(),
        totals,
        cases,
    })
}

fn count_attribute(node: &roxmltree::Node<'_, '_>, name: &str) -> u64 {
    node.attribute(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

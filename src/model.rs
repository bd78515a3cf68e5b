use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Written last by the collector; its presence marks a complete collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionManifest {
    pub timestamp: String,
    pub source_root: String,
    pub collection_dir: String,
    pub log_copy: Option<String>,
    pub modules: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SuiteTotals {
    pub files: u64,
    pub tests: u64,
    pub failures: u64,
    pub errors: u64,
    pub skipped: u64,
    pub time: f64,
}

impl SuiteTotals {
    pub fn absorb(&mut self, other: &SuiteTotals) {
        self.files += other.files;
        self.tests += other.tests;
        self.failures += other.failures;
        self.errors += other.errors;
        self.skipped += other.skipped;
        self.time += other.time;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryPayload {
    pub generated_at: String,
    pub timestamp: String,
    pub root: String,
    pub manifest: Option<String>,
    pub database: String,
    pub overall: SuiteTotals,
    pub modules: BTreeMap<String, SuiteTotals>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCase {
    pub module: String,
    pub classname: String,
    pub raw_name: String,
    pub message: String,
    pub result_file: PathBuf,
}

impl FailureCase {
    pub fn gradle_task(&self) -> String {
        format!(":{}:test", self.module)
    }

    /// Plain method name, or `None` for class-level and parameterized entries.
    pub fn method(&self) -> Option<String> {
        let clean = self.raw_name.split('(').next().unwrap_or_default();
        let clean = clean.split('[').next().unwrap_or_default().trim();
        if clean.is_empty() || clean.contains(' ') {
            return None;
        }
        Some(clean.to_string())
    }

    pub fn display_name(&self) -> String {
        let method = if self.raw_name.is_empty() {
            "<class>"
        } else {
            self.raw_name.as_str()
        };
        format!("{}#{}", self.classname, method)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetProvenance {
    Selected { index: usize, result_file: PathBuf },
    Manual { identifier: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReproductionTarget {
    pub module: String,
    pub gradle_task: String,
    pub classname: String,
    pub method: Option<String>,
    pub provenance: TargetProvenance,
}

impl ReproductionTarget {
    pub fn test_pattern(&self) -> String {
        match &self.method {
            Some(method) => format!("{}.{}", self.classname, method),
            None => self.classname.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub duration: Duration,
    pub log_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub timed_out: bool,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MetricDelta {
    pub left: u64,
    pub right: u64,
    pub diff: i64,
}

impl MetricDelta {
    pub fn new(left: u64, right: u64) -> Self {
        Self {
            left,
            right,
            diff: right as i64 - left as i64,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ComparisonReport {
    pub left_label: String,
    pub right_label: String,
    pub tests: MetricDelta,
    pub failures: MetricDelta,
    pub skipped: MetricDelta,
}

//! Failing test cases of a prior run and selection of one to reproduce.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use crate::junit::{find_suite_reports, module_name_for, parse_suite};
use crate::model::{FailureCase, ReproductionTarget, TargetProvenance};
use crate::util::newest_path;

const MESSAGE_PREVIEW_CHARS: usize = 200;

/// Failures in `TEST-*.xml` files under `run_root`, in lexicographic path order.
pub fn collect_failures(run_root: &Path) -> Result<Vec<FailureCase>> {
    let mut failures = Vec::new();
    for path in find_suite_reports(run_root)? {
        let Some(suite) = parse_suite(&path) else {
            continue;
        };
        let module = module_name_for(&path, run_root);
        for case in suite.cases {
            let Some(message) = case.failure else {
                continue;
            };
            failures.push(FailureCase {
                module: module.clone(),
                classname: case.classname,
                raw_name: case.name,
                message,
                result_file: path.clone(),
            });
        }
    }
    Ok(failures)
}

/// Splits `package.Class#method` (method optional).
pub fn parse_test_identifier(identifier: &str) -> Result<(String, Option<String>)> {
    let (classname, method) = match identifier.split_once('#') {
        Some((classname, method)) => (classname, Some(method)),
        None => (identifier, None),
    };
    let classname = classname.trim();
    if classname.is_empty() {
        bail!("invalid test identifier `{identifier}`; expected package.ClassName or package.ClassName#method");
    }
    let method = method
        .map(str::trim)
        .filter(|method| !method.is_empty())
        .map(str::to_string);
    Ok((classname.to_string(), method))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// 1-based position in the failure listing.
    Index(usize),
    Identifier {
        identifier: String,
        module: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionOverrides {
    pub method: Option<String>,
    pub gradle_task: Option<String>,
}

pub fn resolve_target(
    failures: &[FailureCase],
    selection: &Selection,
    overrides: &SelectionOverrides,
) -> Result<ReproductionTarget> {
    match selection {
        Selection::Index(index) => {
            if failures.is_empty() {
                bail!("no failures were found to select from");
            }
            if *index < 1 || *index > failures.len() {
                bail!(
                    "--select must be between 1 and {} (got {})",
                    failures.len(),
                    index
                );
            }
            let failure = &failures[index - 1];
            Ok(ReproductionTarget {
                module: failure.module.clone(),
                gradle_task: overrides
                    .gradle_task
                    .clone()
                    .unwrap_or_else(|| failure.gradle_task()),
                classname: failure.classname.clone(),
                method: overrides.method.clone().or_else(|| failure.method()),
                provenance: TargetProvenance::Selected {
                    index: *index,
                    result_file: failure.result_file.clone(),
                },
            })
        }
        Selection::Identifier { identifier, module } => {
            let (classname, method) = parse_test_identifier(identifier)?;
            // First match wins when several modules share a classname.
            let module = module.clone().or_else(|| {
                failures
                    .iter()
                    .find(|failure| failure.classname == classname)
                    .map(|failure| failure.module.clone())
            });
            let Some(module) = module else {
                bail!(
                    "unable to determine the Gradle module for {classname}; pass --module <module-name> (e.g. hibernate-core)"
                );
            };
            Ok(ReproductionTarget {
                gradle_task: overrides
                    .gradle_task
                    .clone()
                    .unwrap_or_else(|| format!(":{module}:test")),
                module,
                classname,
                method: overrides.method.clone().or(method),
                provenance: TargetProvenance::Manual {
                    identifier: identifier.clone(),
                },
            })
        }
    }
}

pub fn listing_lines(failures: &[FailureCase]) -> Vec<String> {
    let mut lines = Vec::with_capacity(failures.len() * 2);
    for (index, failure) in failures.iter().enumerate() {
        let file_name = failure
            .result_file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        lines.push(format!(
            "[{}] {} (module={}, file={})",
            index + 1,
            failure.display_name(),
            failure.module,
            file_name
        ));
        lines.push(format!("      {}", preview(&failure.message)));
    }
    lines
}

fn preview(message: &str) -> String {
    let flat = message.replace('\n', " ");
    if flat.chars().count() <= MESSAGE_PREVIEW_CHARS {
        return flat;
    }
    let cut = flat
        .chars()
        .take(MESSAGE_PREVIEW_CHARS - 3)
        .collect::<String>();
    format!("{cut}...")
}

/// Newest directory named `{prefix}-*` under `search_dir`.
pub fn find_latest_run_root(search_dir: &Path, prefix: &str) -> Result<PathBuf> {
    if !search_dir.is_dir() {
        bail!("results directory not found: {}", search_dir.display());
    }
    let needle = format!("{prefix}-");
    let entries = std::fs::read_dir(search_dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with(&needle))
                .unwrap_or(false)
        });
    match newest_path(entries) {
        Some(path) => Ok(path),
        None => bail!(
            "no directories matching {}* under {}",
            needle,
            search_dir.display()
        ),
    }
}

/// `gradlew <task> -Pdb=<profile> --stacktrace --tests <pattern> [extra...]`.
pub fn build_gradle_command(
    workspace: &Path,
    target: &ReproductionTarget,
    gradle_profile: &str,
    extra_args: &[String],
) -> Result<Vec<String>> {
    let gradle_wrapper = workspace.join("gradlew");
    if !gradle_wrapper.exists() {
        bail!(
            "gradlew not found at {}; verify the workspace path",
            gradle_wrapper.display()
        );
    }

    let mut command = vec![
        gradle_wrapper.display().to_string(),
        target.gradle_task.clone(),
        format!("-Pdb={gradle_profile}"),
        "--stacktrace".to_string(),
        "--tests".to_string(),
        target.test_pattern(),
    ];
    command.extend(extra_args.iter().cloned());
    Ok(command)
}

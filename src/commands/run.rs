use std::io::{self, Write};

use anyhow::Result;
use tracing::info;

use crate::cli::RunArgs;
use crate::config::{ComparisonOptions, LabEnvironment};
use crate::interrupt::Interrupt;
use crate::orchestrator::compare::format_table;
use crate::orchestrator::{MatrixReport, Orchestrator, TargetStatus};
use crate::process::{CommandRunner, DryRunRunner, SystemRunner};

pub fn run(args: RunArgs, interrupt: Interrupt) -> Result<i32> {
    let env = LabEnvironment::from_args(&args.lab)?;
    let options = ComparisonOptions::from_args(&args)?;
    let runner: Box<dyn CommandRunner> = if options.dry_run {
        Box::new(DryRunRunner)
    } else {
        Box::new(SystemRunner::new(interrupt.clone()))
    };

    let report = Orchestrator::new(&env, &options, runner.as_ref(), interrupt).execute()?;
    let mut output = io::BufWriter::new(io::stdout().lock());
    for line in report_lines(&report) {
        writeln!(output, "{line}")?;
    }
    output.flush()?;

    let exit_code = report.exit_code();
    info!(exit_code, "comparison finished");
    Ok(exit_code)
}

pub fn report_lines(report: &MatrixReport) -> Vec<String> {
    let mut lines = Vec::new();
    if !report.targets.is_empty() {
        lines.push("Targets:".to_string());
    }
    for target in &report.targets {
        match &target.status {
            TargetStatus::Completed {
                summary_path,
                test_exit_code,
                ..
            } => lines.push(format!(
                "  {:<20} completed (tests exit {}) -> {}",
                target.identifier,
                test_exit_code,
                summary_path.display()
            )),
            TargetStatus::Abandoned { stage, reason } => lines.push(format!(
                "  {:<20} abandoned at {}: {}",
                target.identifier, stage, reason
            )),
        }
    }
    for comparison in &report.comparisons {
        lines.push(String::new());
        lines.extend(format_table(comparison));
    }
    lines
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::report_lines;
    use crate::model::{ComparisonReport, MetricDelta};
    use crate::orchestrator::{MatrixReport, Stage, TargetReport, TargetStatus};

    #[test]
    fn report_lists_targets_then_tables() {
        let report = MatrixReport {
            targets: vec![
                TargetReport {
                    identifier: "mysql",
                    status: TargetStatus::Completed {
                        collection_dir: PathBuf::from("/runs/mysql-results-1"),
                        summary_path: PathBuf::from("/runs/mysql-summary-1.json"),
                        test_exit_code: 1,
                    },
                },
                TargetReport {
                    identifier: "tidb-tidbdialect",
                    status: TargetStatus::Abandoned {
                        stage: Stage::StartBackend,
                        reason: "tidb container is not running".to_string(),
                    },
                },
            ],
            comparisons: vec![ComparisonReport {
                left_label: "MySQL 8.0".to_string(),
                right_label: "TiDB with TiDBDialect".to_string(),
                tests: MetricDelta::new(100, 98),
                failures: MetricDelta::new(3, 7),
                skipped: MetricDelta::new(5, 5),
            }],
        };

        let lines = report_lines(&report);
        assert_eq!(lines[0], "Targets:");
        assert!(lines[1].contains("completed (tests exit 1)"));
        assert!(lines[2].contains("abandoned at start-backend: tidb container is not running"));
        assert_eq!(lines[4], "MySQL 8.0 vs TiDB with TiDBDialect:");
        assert_eq!(report.exit_code(), 2);
    }
}

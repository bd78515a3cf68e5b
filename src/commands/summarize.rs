use anyhow::Result;

use crate::cli::SummarizeArgs;
use crate::summary::{SummaryRequest, summarize, write_report};

pub fn run(args: SummarizeArgs) -> Result<()> {
    let result = summarize(&SummaryRequest {
        root: args.root,
        json_out: args.json_out,
        log: args.log,
        manifest: args.manifest,
        timestamp: args.timestamp,
        log_dir: args.log_dir,
    })?;
    write_report(&result)
}

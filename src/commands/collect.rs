use anyhow::Result;
use tracing::info;

use crate::cli::CollectArgs;
use crate::collector::{CollectRequest, collect};
use crate::util::run_timestamp;

pub fn run(args: CollectArgs) -> Result<()> {
    let request = CollectRequest {
        root: args.root,
        dest_prefix: args.dest,
        timestamp: args.timestamp.unwrap_or_else(run_timestamp),
        log_path: args.log,
        log_dir: args.log_dir,
        remove_source: args.remove_source,
        backend_hint: args.backend,
    };
    let collection_dir = collect(&request)?;
    info!(path = %collection_dir.display(), "collection complete");
    Ok(())
}

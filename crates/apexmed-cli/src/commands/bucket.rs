use std::sync::Arc;

use apexmed_core::{ConfigDistributor, FileStore};
use serde_json::json;

use crate::cli::BucketArgs;
use crate::error::CliError;

use super::CommandResult;

pub fn run(args: &BucketArgs) -> Result<CommandResult, CliError> {
    let store = Arc::new(FileStore::open(&args.store)?);
    let distributor = ConfigDistributor::open(store, 5)?;

    Ok(CommandResult::ok(json!({
        "store": args.store.display().to_string(),
        "bucket": distributor.bucket(),
        "activeVersion": distributor.active_version(),
        "previousVersion": distributor.previous().map(|bundle| bundle.version),
        "rollbackFloor": distributor.rollback_floor(),
        "sloFailures": distributor.slo_failures(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_stable_across_invocations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = BucketArgs {
            store: dir.path().join("state.json"),
        };

        let first = run(&args).expect("first run").data;
        let second = run(&args).expect("second run").data;

        assert_eq!(first["bucket"], second["bucket"]);
        assert!(first["bucket"].as_u64().expect("bucket") < 100);
        assert_eq!(first["activeVersion"], 0);
    }
}

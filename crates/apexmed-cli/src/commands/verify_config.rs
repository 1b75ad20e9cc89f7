use std::fs;
use std::sync::Arc;

use apexmed_core::{
    ConfigDistributor, FileStore, KeyValueStore, MemoryStore, RemoteConfigBundle,
    SignatureVerifier,
};
use serde_json::json;

use crate::cli::VerifyConfigArgs;
use crate::error::CliError;

use super::{decision_json, CommandResult};

pub fn run(args: &VerifyConfigArgs) -> Result<CommandResult, CliError> {
    let body = fs::read(&args.body)?;
    SignatureVerifier::from_base64(&args.public_key)?.verify(&body, &args.signature)?;
    let bundle = RemoteConfigBundle::parse(&body)?;

    let store: Arc<dyn KeyValueStore> = match &args.store {
        Some(path) => Arc::new(FileStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };
    let distributor = ConfigDistributor::open(store, 5)?;

    let version = bundle.version;
    let rollout_percent = bundle.rollout_percent;
    let decision = if args.apply {
        distributor.offer(bundle)?
    } else {
        distributor.decide(&bundle)
    };

    Ok(CommandResult::ok(json!({
        "verified": true,
        "version": version,
        "rolloutPercent": rollout_percent,
        "bucket": distributor.bucket(),
        "applied": args.apply && decision.is_adopted(),
        "decision": decision_json(decision),
    })))
}

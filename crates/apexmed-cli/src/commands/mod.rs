mod bucket;
mod sign;
mod simulate;
mod verify_config;

use std::env;
use std::fs;

use apexmed_core::{AdoptionDecision, RuntimeSettings};
use serde_json::{json, Value};

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub struct CommandResult {
    pub data: Value,
    /// The command ran but the operation it exercised did not succeed.
    pub failed: bool,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            failed: false,
        }
    }

    pub fn failed(data: Value) -> Self {
        Self { data, failed: true }
    }
}

pub async fn run(cli: &Cli) -> Result<CommandResult, CliError> {
    match &cli.command {
        Command::Bucket(args) => bucket::run(args),
        Command::Sign(args) => sign::run(args),
        Command::VerifyConfig(args) => verify_config::run(args),
        Command::Simulate(args) => simulate::run(args, load_settings(cli)?).await,
    }
}

fn load_settings(cli: &Cli) -> Result<RuntimeSettings, CliError> {
    let base = match &cli.settings {
        Some(path) => RuntimeSettings::from_json_str(&fs::read_to_string(path)?)?,
        None => RuntimeSettings::default(),
    };
    Ok(base.with_overrides(|name| env::var(name).ok())?)
}

fn decision_json(decision: AdoptionDecision) -> Value {
    match decision {
        AdoptionDecision::Adopted { version } => json!({
            "status": "adopted",
            "version": version,
        }),
        AdoptionDecision::RejectedStale { version, active } => json!({
            "status": "rejected_stale",
            "version": version,
            "active": active,
        }),
        AdoptionDecision::RejectedRollout { bucket, percent } => json!({
            "status": "rejected_rollout",
            "bucket": bucket,
            "rolloutPercent": percent,
        }),
        AdoptionDecision::RejectedRolledBack { version, floor } => json!({
            "status": "rejected_rolled_back",
            "version": version,
            "rollbackFloor": floor,
        }),
    }
}

//! CLI argument definitions for apexmed.
//!
//! Operator tooling around the mediation runtime: inspect the persisted
//! rollout state, sign and verify remote config bundles, and run an
//! in-process load/show simulation against scripted adapters.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bucket` | Show (and persist) the install's rollout bucket |
//! | `sign` | Sign a config body with an Ed25519 seed |
//! | `verify-config` | Verify a signed body and evaluate the adoption rule |
//! | `simulate` | Run one load and show against scripted adapters |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--log-level` | `warn` | Tracing filter when `RUST_LOG` is unset |
//! | `--log-format` | `pretty` | Log output format (pretty, json) |
//! | `--settings` | none | JSON runtime settings file |
//!
//! # Examples
//!
//! ```bash
//! # Inspect the rollout bucket stored in a state file
//! apexmed bucket --store state.json
//!
//! # Verify a bundle and preview the adoption decision
//! apexmed verify-config bundle.json --signature "$SIG" --public-key "$PK" --store state.json
//!
//! # Simulate a round where one adapter wins and one has no fill
//! apexmed simulate rewarded_main --source unity=2.5 --source vungle=nofill --pretty
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// ApexMed - mediation runtime operator tool
#[derive(Debug, Parser)]
#[command(
    name = "apexmed",
    author,
    version,
    about = "Mediation runtime operator tool",
    long_about = "apexmed inspects and exercises the ApexMed adapter reliability runtime:\n\
\n\
  • Rollout bucket and config state in a local store file\n\
  • Ed25519 signing and verification of remote config bundles\n\
  • In-process load/show simulation with scripted adapters\n\
\n\
Use 'apexmed <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// JSON runtime settings file. APEXMED_* variables apply on top.
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the rollout bucket and config state held in a store file.
    ///
    /// The bucket is drawn and persisted on first use.
    ///
    /// # Examples
    ///
    ///   apexmed bucket --store state.json
    Bucket(BucketArgs),

    /// Sign a config body with a base64 Ed25519 seed.
    ///
    /// # Examples
    ///
    ///   apexmed sign bundle.json --seed "$SEED"
    Sign(SignArgs),

    /// Verify a signed config body and evaluate the adoption rule.
    ///
    /// Without --store the decision is evaluated against an empty state.
    /// With --apply the bundle is offered and persisted on adoption.
    ///
    /// # Examples
    ///
    ///   apexmed verify-config bundle.json --signature "$SIG" --public-key "$PK"
    ///   apexmed verify-config bundle.json --signature "$SIG" --public-key "$PK" --store state.json --apply
    VerifyConfig(VerifyConfigArgs),

    /// Run one load and one show against scripted adapters.
    ///
    /// Each --source is NAME=BEHAVIOR where BEHAVIOR is a CPM (e.g. 2.5),
    /// nofill, timeout, network, or vendor:CODE.
    ///
    /// # Examples
    ///
    ///   apexmed simulate rewarded_main --source unity=2.5 --source pangle=timeout
    ///   apexmed simulate banner_top --format banner --source unity=1.0 --render fail
    Simulate(SimulateArgs),
}

#[derive(Debug, Args)]
pub struct BucketArgs {
    /// Store file holding persisted runtime state.
    #[arg(long)]
    pub store: PathBuf,
}

#[derive(Debug, Args)]
pub struct SignArgs {
    /// File containing the raw config body.
    pub body: PathBuf,

    /// Base64-encoded 32-byte Ed25519 seed.
    #[arg(long)]
    pub seed: String,
}

#[derive(Debug, Args)]
pub struct VerifyConfigArgs {
    /// File containing the raw config body.
    pub body: PathBuf,

    /// Base64 signature as carried in the x-config-sig header.
    #[arg(long)]
    pub signature: String,

    /// Base64 Ed25519 verification key.
    #[arg(long)]
    pub public_key: String,

    /// Store file to evaluate the decision against.
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Offer the bundle and persist it when adopted. Requires --store.
    #[arg(long, default_value_t = false, requires = "store")]
    pub apply: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Banner,
    Interstitial,
    Rewarded,
    Native,
}

/// What the simulated render primitive does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RenderArg {
    /// Report completion.
    Complete,
    /// Report a render failure.
    Fail,
    /// Drop the completion handle without reporting.
    Drop,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Placement to load and show.
    pub placement: String,

    /// Ad format requested.
    #[arg(long, value_enum, default_value_t = FormatArg::Interstitial)]
    pub format: FormatArg,

    /// Scripted adapter as NAME=BEHAVIOR (repeatable).
    #[arg(long = "source", required = true, num_args = 1)]
    pub sources: Vec<String>,

    /// Latency of every scripted adapter response in milliseconds.
    #[arg(long, default_value_t = 0)]
    pub latency_ms: u64,

    /// Render primitive behavior.
    #[arg(long, value_enum, default_value_t = RenderArg::Complete)]
    pub render: RenderArg,

    /// Skip the show step.
    #[arg(long, default_value_t = false)]
    pub load_only: bool,
}

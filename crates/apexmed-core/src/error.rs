use std::time::Duration;

use thiserror::Error;

use crate::outcome::Outcome;

/// Validation errors for identifiers and inbound documents.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("adapter id cannot be empty")]
    EmptyAdapterId,
    #[error("placement id cannot be empty")]
    EmptyPlacementId,
    #[error("{field} length {len} exceeds max {max}")]
    IdTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    #[error("{field} contains invalid character '{ch}' at index {index}")]
    InvalidIdChar {
        field: &'static str,
        ch: char,
        index: usize,
    },

    #[error("invalid ad format '{value}', expected one of banner, interstitial, rewarded, native")]
    InvalidAdFormat { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },

    #[error("bid ttl must be greater than zero")]
    ZeroTtl,
    #[error("bid ttl {ttl_seconds}s exceeds max {max}s")]
    TtlOutOfRange { ttl_seconds: u64, max: u64 },
    #[error("creative reference cannot be empty")]
    EmptyCreative,

    #[error("rollout percent {value} exceeds 100")]
    RolloutOutOfRange { value: u8 },
}

/// Errors raised by the persisted key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store contents are not valid json: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Errors raised while fetching, verifying or persisting remote configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("remote config endpoint is not configured")]
    NotConfigured,

    #[error("config fetch failed: {0}")]
    Fetch(String),

    #[error("config endpoint returned status {status}")]
    Status { status: u16 },

    #[error("config response is missing the signature header")]
    MissingSignature,

    #[error("config signature is not valid base64")]
    SignatureEncoding,

    #[error("config signature verification failed")]
    BadSignature,

    #[error("embedded public key is invalid: {0}")]
    InvalidPublicKey(String),

    #[error("config body is not a valid bundle: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Top-level error type for runtime construction and settings.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid setting {field}: {reason}")]
    Settings { field: &'static str, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Typed result of an orchestrated adapter call that did not succeed.
///
/// Adapter failures never escape the orchestrator as panics or raw vendor
/// errors; they resolve to one of these values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("circuit open")]
    CircuitOpen,

    #[error("paced after no-fill, retry after {retry_after:?}")]
    Paced { retry_after: Duration },

    #[error("call failed after {attempts} attempt(s): {outcome}")]
    Failed { outcome: Outcome, attempts: u32 },
}

impl CallError {
    pub fn label(&self) -> &'static str {
        match self {
            Self::CircuitOpen => "circuit_open",
            Self::Paced { .. } => "paced",
            Self::Failed { outcome, .. } => outcome.label(),
        }
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            Self::Failed { outcome, .. } => Some(outcome),
            _ => None,
        }
    }

    pub fn is_no_fill(&self) -> bool {
        matches!(self.outcome(), Some(Outcome::NoFill))
    }
}

/// Why a load round produced no cached bid.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("load blocked: {reason}")]
    Blocked { reason: &'static str },

    #[error("no bid source is registered")]
    NoSources,

    #[error("winning bid rejected: {0}")]
    InvalidBid(#[from] ValidationError),

    #[error(transparent)]
    Call(#[from] CallError),
}

impl LoadError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Blocked { reason } => reason,
            Self::NoSources => "no_sources",
            Self::InvalidBid(_) => "invalid_bid",
            Self::Call(error) => error.label(),
        }
    }
}

/// Terminal failure of one show attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PresentationError {
    #[error("another presentation is already in flight")]
    AlreadyPresenting,

    #[error("show blocked: {reason}")]
    Blocked { reason: &'static str },

    #[error("no ready bid for placement")]
    NotReady,

    #[error("cached bid expired before show")]
    Expired,

    #[error("no ui container available")]
    NoContainer,

    #[error("container destroyed before dispatch")]
    ActivityDestroyed,

    #[error("container did not reach the foreground in time")]
    ForegroundTimeout,

    #[error("container did not resume in time")]
    ResumeTimeout,

    #[error("render failed: {message}")]
    RenderFailed { message: String },

    #[error("render did not finish in time")]
    RenderTimeout,
}

impl PresentationError {
    /// Stable reason string reported to the publisher.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::AlreadyPresenting => "already_presenting",
            Self::Blocked { reason } => reason,
            Self::NotReady => "not_ready",
            Self::Expired => "expired",
            Self::NoContainer => "no_container",
            Self::ActivityDestroyed => "activity_destroyed",
            Self::ForegroundTimeout => "foreground_timeout",
            Self::ResumeTimeout => "resume_timeout",
            Self::RenderFailed { .. } => "render_failed",
            Self::RenderTimeout => "render_timeout",
        }
    }
}

//! # ApexMed Core
//!
//! Adapter reliability and presentation runtime for the ApexMed mediation SDK.
//!
//! ## Overview
//!
//! This crate sits between the publisher-facing API and the demand adapters:
//!
//! - **Error normalization** of vendor codes into one outcome taxonomy
//! - **Circuit breaking** per (adapter, placement)
//! - **Retry and hedging** with bounded attempts and p95-derived hedge delays
//! - **Single-take ad cache** with monotonic TTL expiry
//! - **Presentation coordination** against the host UI lifecycle
//! - **Signed remote configuration** with staged rollout and automatic rollback
//! - **Metrics aggregation** flushed to an observability endpoint
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`auction`] | Bid sources and the HTTP auction client |
//! | [`cache`] | Single-take store of won bids |
//! | [`circuit_breaker`] | Per-key circuit breakers |
//! | [`clock`] | Monotonic time source |
//! | [`domain`] | Identifiers and ad formats |
//! | [`error`] | Error types |
//! | [`http_client`] | HTTP client abstraction |
//! | [`latency`] | Rolling latency windows and percentiles |
//! | [`logging`] | Tracing subscriber setup |
//! | [`metrics`] | Counters, latency reservoirs and telemetry flush |
//! | [`orchestrator`] | Timeout, retry and hedged dispatch |
//! | [`outcome`] | Outcome taxonomy and vendor code tables |
//! | [`pacing`] | No-fill pacing per key |
//! | [`presentation`] | Show coordination, container lifecycle, UI thread |
//! | [`remote_config`] | Signed, staged configuration with rollback |
//! | [`retry`] | Retry policy and jitter |
//! | [`runtime`] | Runtime context wiring every component |
//! | [`settings`] | Runtime settings from JSON or environment |
//! | [`viewability`] | Optional viewability bridge |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ Publisher / CLI  │
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ MediationRuntime │────▶│ ConfigDistributor│
//! └────────┬─────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ CallOrchestrator │────▶│ Circuit Breaker  │
//! └────────┬─────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ BidSource        │────▶│ HTTP Client      │
//! └────────┬─────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ AdCache          │────▶│ Presentation     │
//! └──────────────────┘     └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Adapter failures resolve to typed values at the orchestrator boundary:
//!
//! ```rust
//! use apexmed_core::{CallError, Outcome};
//!
//! fn describe(error: &CallError) -> &'static str {
//!     match error {
//!         CallError::CircuitOpen => "fast-failed",
//!         CallError::Failed { outcome: Outcome::NoFill, .. } => "no ad",
//!         CallError::Failed { .. } => "adapter failure",
//!         CallError::Paced { .. } => "paced",
//!     }
//! }
//! ```

pub mod auction;
pub mod cache;
pub mod circuit_breaker;
pub mod clock;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod latency;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod outcome;
pub mod pacing;
pub mod presentation;
pub mod remote_config;
pub mod retry;
pub mod runtime;
pub mod settings;
pub mod viewability;

// Auction
pub use auction::{
    AuctionClient, AuctionSettings, BidDocument, BidRequest, BidSource, ConsentSignals,
    DeviceInfo, ScriptedBidSource,
};

// Caching
pub use cache::{AdCache, CacheMiss, CachedBid};

// Circuit breaker
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitRegistry, CircuitState};

// Time
pub use clock::{Clock, ManualClock, SystemClock};

// Domain types
pub use domain::{AdFormat, AdapterCallKey, AdapterId, PlacementId};

// Error types
pub use error::{
    CallError, ConfigError, CoreError, LoadError, PresentationError, StoreError, ValidationError,
};

// HTTP client types
pub use http_client::{
    HttpClient, HttpError, HttpErrorKind, HttpMethod, HttpRequest, HttpResponse,
    ReqwestHttpClient, ScriptedHttpClient,
};

// Latency
pub use latency::{LatencyTracker, Percentiles};

// Logging
pub use logging::LoggingSettings;

// Metrics
pub use metrics::{
    HttpTelemetrySink, MetricsAggregator, MetricsGate, MetricsSettings, TelemetryBatch,
    TelemetrySink,
};

// Orchestration
pub use orchestrator::{CallOrchestrator, CallResult, CallSuccess, HedgeSettings};

// Outcomes
pub use outcome::{normalize, AdapterError, Outcome, OutcomeClass, VendorCodeTable};

// Pacing
pub use pacing::PlacementPacer;

// Presentation
pub use presentation::{
    ContainerHandle, ContainerId, ContainerRegistry, LifecycleEvent, LifecycleSource,
    LifecycleState, PresentationCoordinator, PresentationReceipt, PresentationSettings,
    RenderAction, RenderCompletion, RenderRequest, UiExecutor, UiThread,
};

// Remote configuration
pub use remote_config::{
    sign_base64, AdoptionDecision, ConfigDistributor, ConfigFetcher, FeatureFlags, FileStore,
    KeyValueStore, MemoryStore, PlacementOverride, RemoteConfigBundle, RemoteConfigSettings,
    SignatureVerifier, SIGNATURE_HEADER,
};

// Retry
pub use retry::{Backoff, RetryPolicy};

// Runtime
pub use runtime::{HostParts, LoadReceipt, MediationRuntime};

// Settings
pub use settings::{PacingSettings, RuntimeSettings};

// Viewability
pub use viewability::{NoopViewability, ViewabilityBridge, ViewabilityProbe};

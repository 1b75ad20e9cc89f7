//! # Domain Types
//!
//! Identifiers shared by every runtime component.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`AdapterId`] | Demand-network integration id (lowercase) |
//! | [`PlacementId`] | Publisher placement id |
//! | [`AdapterCallKey`] | (adapter, placement) identity for breaker/pacing/latency state |
//! | [`AdFormat`] | Requested ad format |
//!
//! All identifiers validate at construction, so an `AdapterCallKey` that
//! exists is always well-formed.

mod format;
mod ids;

pub use format::AdFormat;
pub use ids::{AdapterCallKey, AdapterId, PlacementId};

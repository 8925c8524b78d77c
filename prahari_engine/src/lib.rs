//! Prahari Engine - Adaptive abuse prevention and rate limiting
//!
//! For every inbound action the engine decides, in real time, whether to
//! allow or deny the caller based on:
//! - per-action quotas from a static catalog,
//! - the caller's trust history (account age, violations, role),
//! - live abuse-pattern detection over the recent event stream,
//! - accumulated violations and temporary blocks.
//!
//! Cross-process coordination happens exclusively through the counter
//! store (Redis in production); nothing in-process is authoritative. When
//! the store is unreachable the engine fails open by explicit policy - a
//! cache outage must not take the site down.

pub mod abuse;
pub mod catalog;
pub mod config;
pub mod directory;
pub mod limiter;
pub mod observe;
pub mod patterns;
pub mod store;
pub mod trust;
pub mod window;

pub use catalog::{ActionCatalog, ActionCategory, ActionDescriptor};
pub use config::EngineConfig;
pub use limiter::{CheckRequest, RateLimiter};
pub use observe::{DecisionSink, NullSink, TracingSink};

pub use prahari_common::{
    Decision, Error, Identity, QuotaStatus, Result, TrustLevel, TrustRecord,
};

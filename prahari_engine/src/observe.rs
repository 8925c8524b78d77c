//! Decision observability
//!
//! Sinks receive every decision for dashboards and audit. Recording is
//! fire-and-forget: a sink must not block and must not fail the decision
//! path. Implementations that do real I/O should hand off to a background
//! task rather than await inline.

use prahari_common::{Decision, Identity};

/// Receives decisions after they are made.
pub trait DecisionSink: Send + Sync {
    fn record_decision(&self, identity: &Identity, action: &str, decision: &Decision);
}

/// Default sink: structured log lines, one per decision.
#[derive(Default)]
pub struct TracingSink;

impl DecisionSink for TracingSink {
    fn record_decision(&self, identity: &Identity, action: &str, decision: &Decision) {
        if decision.allowed {
            tracing::debug!(
                identity = %identity,
                action = %action,
                remaining = decision.remaining,
                limit = decision.limit,
                trust = decision.trust_level.as_str(),
                "request allowed"
            );
        } else {
            tracing::info!(
                identity = %identity,
                action = %action,
                limit = decision.limit,
                reason = decision.reason.as_deref().unwrap_or("unknown"),
                retry_after = ?decision.retry_after_secs,
                trust = decision.trust_level.as_str(),
                "request denied"
            );
        }
    }
}

/// Sink that drops everything (for hosts that do their own logging).
#[derive(Default)]
pub struct NullSink;

impl DecisionSink for NullSink {
    fn record_decision(&self, _identity: &Identity, _action: &str, _decision: &Decision) {}
}

//! Prahari Common - Shared decision vocabulary for the abuse-prevention engine
//!
//! This crate contains the types that cross the engine boundary: the identity
//! a decision is keyed on, the trust tiers, the pattern verdict vocabulary,
//! the decision itself, and the public error taxonomy. The calling
//! application depends on these without pulling in the engine's store and
//! database adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Engine errors surfaced to callers.
///
/// Transient store failures are *not* represented here on the check path:
/// they are converted into permissive decisions inside the engine (fail-open)
/// and never reach the caller as errors. The variants below are integration
/// bugs or startup failures and must not be silently defaulted.
#[derive(Debug, Error)]
pub enum Error {
    /// The action id was never registered in the catalog. Programmer error.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// The counter store could not be reached. Only surfaced by operations
    /// that are allowed to fail (health probes, admin resets), never by
    /// `check`.
    #[error("counter store unavailable: {0}")]
    StoreUnavailable(String),

    /// A check was submitted with neither a user id nor an ip address.
    #[error("request carried neither a user id nor an ip address")]
    InvalidIdentity,

    /// Malformed limits or weights at startup. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The caller a rate-limit decision is keyed on.
///
/// A request may carry both a user id and an ip address; user-based limiting
/// takes precedence and is less strict than ip-only limiting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    /// Authenticated caller
    User(Uuid),

    /// Anonymous caller, keyed by remote address
    Ip(String),
}

impl Identity {
    /// Resolve an identity from optional request parts, user id first.
    pub fn resolve(user_id: Option<Uuid>, ip_address: Option<&str>) -> Result<Self> {
        match (user_id, ip_address) {
            (Some(id), _) => Ok(Identity::User(id)),
            (None, Some(ip)) if !ip.is_empty() => Ok(Identity::Ip(ip.to_string())),
            _ => Err(Error::InvalidIdentity),
        }
    }

    /// Stable key fragment used in store keys (e.g. "user:<uuid>").
    pub fn key(&self) -> String {
        match self {
            Identity::User(id) => format!("user:{}", id),
            Identity::Ip(ip) => format!("ip:{}", ip),
        }
    }

    /// Whether this identity is ip-only (weaker assurance, stricter limits).
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Ip(_))
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Discrete trust tier derived from account behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustLevel {
    New,
    Basic,
    Trusted,
    Veteran,
    Banned,
}

impl TrustLevel {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::New => "new",
            TrustLevel::Basic => "basic",
            TrustLevel::Trusted => "trusted",
            TrustLevel::Veteran => "veteran",
            TrustLevel::Banned => "banned",
        }
    }
}

/// Account role reported by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountRole {
    User,
    Staff,
    Admin,
}

impl AccountRole {
    /// Staff and admins qualify for the (finite) role bonus.
    pub fn is_privileged(&self) -> bool {
        matches!(self, AccountRole::Staff | AccountRole::Admin)
    }
}

/// Named abuse signatures the pattern detector can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternType {
    /// Request cadence far beyond human-plausible speed
    RapidFire,

    /// Rapid attempts against a critical action (login, password reset)
    CredentialStuffing,

    /// Sustained hammering of a read endpoint well past its quota
    SequentialProbe,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::RapidFire => "rapid_fire",
            PatternType::CredentialStuffing => "credential_stuffing",
            PatternType::SequentialProbe => "sequential_probe",
        }
    }
}

/// Heuristic severity of a detected pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// What the pattern detector recommends for the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuggestedAction {
    Allow,
    Throttle,
    Block,
}

/// The outcome of one rate-limit check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,

    /// Requests left in the current window (0 when denied)
    pub remaining: u64,

    /// The effective limit the count was compared against
    pub limit: u64,

    /// Seconds until the oldest marker in the window expires.
    /// Populated only when `allowed` is false.
    pub retry_after_secs: Option<u64>,

    /// Human-readable denial reason ("banned", "Rate limit exceeded", ...)
    pub reason: Option<String>,

    /// Trust tier of the caller at decision time
    pub trust_level: TrustLevel,
}

impl Decision {
    /// Serialize for observability sinks and wire transport
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Create headers for a rate limit response
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit".to_string(), self.limit.to_string()),
            ("X-RateLimit-Remaining".to_string(), self.remaining.to_string()),
        ];
        if let Some(retry) = self.retry_after_secs {
            headers.push(("X-RateLimit-Reset".to_string(), retry.to_string()));
            headers.push(("Retry-After".to_string(), retry.to_string()));
        }
        headers
    }
}

/// Non-mutating quota snapshot returned by `get_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub limit: u64,
    pub remaining: u64,
    pub trust_level: TrustLevel,
}

/// A trust score computed for one account.
///
/// Derived, never stored by the engine; recomputed when `next_review`
/// passes. `is_banned` forces `level = Banned` regardless of every other
/// factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustRecord {
    pub user_id: Option<Uuid>,
    pub score: u8,
    pub level: TrustLevel,
    pub factors: TrustFactors,
    pub calculated_at: DateTime<Utc>,
    pub next_review: DateTime<Utc>,
}

/// The behavioral inputs a trust score was computed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustFactors {
    pub account_age_days: i64,
    pub violation_count: u64,
    pub is_banned: bool,
    pub verified_contact: bool,
    pub role: AccountRole,
}

//! The rate limiter: adaptive limit composition and the public check surface
//!
//! Precedence is fixed: temporary block, then ban, then pattern veto, then
//! the counter comparison. The effective limit folds the base quota, the
//! trust multiplier and the (finite) role bonus together before the counter
//! is consulted; critical actions take the base limit untouched.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use prahari_common::{
    Decision, Error, Identity, QuotaStatus, Result, SuggestedAction, TrustLevel, TrustRecord,
};

use crate::abuse::{AbuseStore, AbuseTracker, RedisAbuseStore};
use crate::catalog::{ActionCatalog, ActionCategory, ActionDescriptor};
use crate::config::EngineConfig;
use crate::directory::{AccountDirectory, PgDirectory};
use crate::observe::{DecisionSink, TracingSink};
use crate::patterns::{Observation, PatternDetector};
use crate::store::{now_ms, CounterStore, RedisCounterStore};
use crate::trust::TrustScorer;
use crate::window::SlidingWindow;

/// One inbound action to be checked.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub user_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub action: String,
}

/// The engine's single public entry point.
///
/// `check` has a side effect - every invocation consumes one quota unit -
/// so callers must not invoke it speculatively. `get_status` is the
/// non-mutating view.
#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<EngineConfig>,
    catalog: Arc<ActionCatalog>,
    store: Arc<dyn CounterStore>,
    window: SlidingWindow,
    scorer: TrustScorer,
    detector: Arc<PatternDetector>,
    tracker: AbuseTracker,
    sink: Arc<dyn DecisionSink>,
}

impl RateLimiter {
    /// Assemble an engine from explicit collaborators. Validates the
    /// configuration; a malformed limits table refuses to start.
    pub fn new(
        config: EngineConfig,
        catalog: ActionCatalog,
        store: Arc<dyn CounterStore>,
        directory: Arc<dyn AccountDirectory>,
        abuse_store: Arc<dyn AbuseStore>,
        sink: Arc<dyn DecisionSink>,
    ) -> Result<Self> {
        config.validate()?;
        let window = SlidingWindow::new(store.clone(), config.store_timeout, config.key_grace);
        let tracker = AbuseTracker::new(abuse_store, config.abuse.clone());
        let scorer = TrustScorer::new(
            directory,
            tracker.clone(),
            config.trust.clone(),
            config.store_timeout,
        );
        let detector = Arc::new(PatternDetector::new(config.patterns.clone()));
        Ok(Self {
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            store,
            window,
            scorer,
            detector,
            tracker,
            sink,
        })
    }

    /// Connect the production backends (Redis counter store, Postgres
    /// directory) from the configured URLs.
    pub async fn connect(config: EngineConfig) -> Result<Self> {
        let client = crate::store::init_client(&config.redis_url).await?;
        let database_url = config.database_url.clone().ok_or_else(|| {
            Error::Configuration("DATABASE_URL is required for the account directory".to_string())
        })?;
        let pool = crate::directory::init_pool(&database_url).await?;
        Self::new(
            config,
            ActionCatalog::with_defaults(),
            Arc::new(RedisCounterStore::new(client.clone())),
            Arc::new(PgDirectory::new(pool)),
            Arc::new(RedisAbuseStore::new(client)),
            Arc::new(TracingSink),
        )
    }

    /// Check one action and consume one quota unit.
    pub async fn check(&self, request: CheckRequest) -> Result<Decision> {
        let identity = Identity::resolve(request.user_id, request.ip_address.as_deref())?;
        let descriptor = self.catalog.describe(&request.action)?;

        if !self.config.enabled {
            return Ok(Decision {
                allowed: true,
                remaining: descriptor.base_limit,
                limit: descriptor.base_limit,
                retry_after_secs: None,
                reason: None,
                trust_level: TrustLevel::New,
            });
        }

        // Standing block from accumulated violations
        if let Some(until) = self.tracker.blocked_until(&identity).await {
            let retry = (until - Utc::now()).num_seconds().max(1) as u64;
            let trust_level = match &identity {
                Identity::User(id) => self.scorer.cached_level(id).unwrap_or(TrustLevel::New),
                Identity::Ip(_) => TrustLevel::New,
            };
            let decision = deny(
                descriptor.base_limit,
                "temporarily blocked",
                Some(retry),
                trust_level,
            );
            self.sink
                .record_decision(&identity, &descriptor.action, &decision);
            return Ok(decision);
        }

        let trust = self.trust_for(&identity).await;
        if trust.level == TrustLevel::Banned {
            let decision = deny(0, "banned", None, TrustLevel::Banned);
            self.sink
                .record_decision(&identity, &descriptor.action, &decision);
            return Ok(decision);
        }

        let key = counter_key(descriptor, &identity);
        let effective = self.effective_limit(descriptor, &trust, &identity);

        // Anomaly veto comes before the quota comparison
        let observation = Observation {
            burst: self
                .window
                .peek(&key, self.config.patterns.burst_window)
                .await,
            total: self.window.peek(&key, descriptor.window).await,
        };
        let verdict = self.detector.detect(&key, descriptor, &observation);
        if verdict.suggested_action == SuggestedAction::Block {
            let retry = self
                .detector
                .veto_remaining(&key)
                .map(|d| d.as_secs().max(1))
                .unwrap_or(1);
            let decision = deny(
                effective,
                &format!("pattern:{}", verdict.pattern_names()),
                Some(retry),
                trust.level,
            );
            self.tracker.record_violation(&identity).await;
            self.sink
                .record_decision(&identity, &descriptor.action, &decision);
            return Ok(decision);
        }

        // Atomic increment-and-compare; a degraded sample means the store is
        // down and the check fails open
        let sample = self.window.increment(&key, descriptor.window).await;
        let decision = if sample.count > effective {
            let retry = sample.retry_after_secs(descriptor.window, now_ms());
            deny(effective, "Rate limit exceeded", Some(retry), trust.level)
        } else {
            Decision {
                allowed: true,
                remaining: effective.saturating_sub(sample.count),
                limit: effective,
                retry_after_secs: None,
                reason: None,
                trust_level: trust.level,
            }
        };

        if !decision.allowed {
            self.tracker.record_violation(&identity).await;
        }
        self.sink
            .record_decision(&identity, &descriptor.action, &decision);
        Ok(decision)
    }

    /// Check an anonymous HTTP request by its route shape.
    pub async fn check_by_ip(&self, ip: &str, path: &str, method: &str) -> Result<Decision> {
        let action = self.catalog.classify_route(path, method);
        self.check(CheckRequest {
            user_id: None,
            ip_address: Some(ip.to_string()),
            action: action.to_string(),
        })
        .await
    }

    /// Current quota state for a user without consuming anything.
    pub async fn get_status(&self, user_id: Uuid, action: &str) -> Result<QuotaStatus> {
        let descriptor = self.catalog.describe(action)?;
        let identity = Identity::User(user_id);
        let trust = self.scorer.score(user_id).await;
        if trust.level == TrustLevel::Banned {
            return Ok(QuotaStatus {
                limit: 0,
                remaining: 0,
                trust_level: TrustLevel::Banned,
            });
        }

        let effective = self.effective_limit(descriptor, &trust, &identity);
        let sample = self
            .window
            .peek(&counter_key(descriptor, &identity), descriptor.window)
            .await;
        Ok(QuotaStatus {
            limit: effective,
            remaining: effective.saturating_sub(sample.count),
            trust_level: trust.level,
        })
    }

    /// Clear the counter for one identity and action (admin escape hatch).
    pub async fn reset(&self, identity: &Identity, action: &str) -> Result<()> {
        let descriptor = self.catalog.describe(action)?;
        self.store.remove(&counter_key(descriptor, identity)).await
    }

    /// Probe the counter store connection.
    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }

    async fn trust_for(&self, identity: &Identity) -> TrustRecord {
        match identity {
            Identity::User(id) => self.scorer.score(*id).await,
            Identity::Ip(_) => self.scorer.anonymous(),
        }
    }

    /// Fold base quota, trust multiplier and role bonus into one limit.
    /// Critical actions take the base limit for every identity; everything
    /// else scales, bounded by a finite ceiling, with ip-only callers
    /// held to a stricter fraction.
    fn effective_limit(
        &self,
        descriptor: &ActionDescriptor,
        trust: &TrustRecord,
        identity: &Identity,
    ) -> u64 {
        if descriptor.category == ActionCategory::Critical {
            return descriptor.base_limit;
        }

        let mut limit = descriptor.base_limit as f64 * self.config.trust.multiplier(trust.level);
        if self.config.admin_bonus_enabled && trust.factors.role.is_privileged() {
            limit *= self.config.role_bonus;
        }
        if identity.is_anonymous() {
            limit *= self.config.ip_limit_factor;
        }
        (limit.floor() as u64).clamp(1, self.config.max_effective_limit)
    }
}

fn counter_key(descriptor: &ActionDescriptor, identity: &Identity) -> String {
    format!("rl:{}:{}", descriptor.action, identity.key())
}

fn deny(limit: u64, reason: &str, retry_after_secs: Option<u64>, trust_level: TrustLevel) -> Decision {
    Decision {
        allowed: false,
        remaining: 0,
        limit,
        retry_after_secs,
        reason: Some(reason.to_string()),
        trust_level,
    }
}

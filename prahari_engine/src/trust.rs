//! Trust scoring: behavioral signals in, a 0-100 score and tier out
//!
//! The score is a pure function of directory signals and the violation
//! history; nothing here is persisted. Records are cached per process for
//! the review interval as an optimization - the cache is never
//! authoritative, and trust is not safety-critical to the millisecond.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use prahari_common::{AccountRole, Identity, TrustFactors, TrustLevel, TrustRecord};

use crate::abuse::AbuseTracker;
use crate::config::TrustConfig;
use crate::directory::{AccountDirectory, AccountSignals};

/// Computes and caches trust records.
#[derive(Clone)]
pub struct TrustScorer {
    directory: Arc<dyn AccountDirectory>,
    tracker: AbuseTracker,
    config: TrustConfig,
    timeout: Duration,
    cache: Arc<DashMap<Uuid, TrustRecord>>,
}

impl TrustScorer {
    pub fn new(
        directory: Arc<dyn AccountDirectory>,
        tracker: AbuseTracker,
        config: TrustConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            directory,
            tracker,
            config,
            timeout,
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Score one account, serving from the per-process cache while the
    /// record is within its review interval.
    pub async fn score(&self, user_id: Uuid) -> TrustRecord {
        let now = Utc::now();
        if let Some(cached) = self.cache.get(&user_id) {
            if now < cached.next_review {
                return cached.clone();
            }
        }

        let signals = match tokio::time::timeout(
            self.timeout,
            self.directory.account_signals(user_id),
        )
        .await
        {
            Ok(Ok(Some(signals))) => signals,
            Ok(Ok(None)) => Self::unknown_account(),
            Ok(Err(e)) => {
                tracing::warn!(user_id = %user_id, error = %e, "directory read failed; using fallback signals");
                return self.fallback_record(user_id);
            }
            Err(_) => {
                tracing::warn!(user_id = %user_id, "directory read timed out; using fallback signals");
                return self.fallback_record(user_id);
            }
        };

        let violations = self
            .tracker
            .violation_count(&Identity::User(user_id))
            .await;
        let record = self.compute(Some(user_id), &signals, violations);
        self.cache.insert(user_id, record.clone());
        record
    }

    /// The cached trust tier, if a fresh-enough record exists. No I/O.
    pub fn cached_level(&self, user_id: &Uuid) -> Option<TrustLevel> {
        self.cache
            .get(user_id)
            .filter(|r| Utc::now() < r.next_review)
            .map(|r| r.level)
    }

    /// Baseline record for ip-only callers: no history, no privileges.
    pub fn anonymous(&self) -> TrustRecord {
        let now = Utc::now();
        TrustRecord {
            user_id: None,
            score: 0,
            level: TrustLevel::New,
            factors: TrustFactors {
                account_age_days: 0,
                violation_count: 0,
                is_banned: false,
                verified_contact: false,
                role: AccountRole::User,
            },
            calculated_at: now,
            next_review: now,
        }
    }

    /// Accounts the directory has never seen score like day-zero signups.
    fn unknown_account() -> AccountSignals {
        AccountSignals {
            created_at: Utc::now(),
            role: AccountRole::User,
            is_banned: false,
            verified_contact: false,
        }
    }

    /// Directory outage: keep serving the stale record when there is one,
    /// otherwise a neutral baseline. Never an error to the caller.
    fn fallback_record(&self, user_id: Uuid) -> TrustRecord {
        if let Some(stale) = self.cache.get(&user_id) {
            return stale.clone();
        }
        TrustRecord {
            user_id: Some(user_id),
            ..self.anonymous()
        }
    }

    /// The scoring policy itself. Banned is terminal; everything else is a
    /// weighted sum of normalized signals clipped to [0, 100].
    fn compute(
        &self,
        user_id: Option<Uuid>,
        signals: &AccountSignals,
        violations: u64,
    ) -> TrustRecord {
        let now = Utc::now();
        let age_days = (now - signals.created_at).num_days().max(0);
        let factors = TrustFactors {
            account_age_days: age_days,
            violation_count: violations,
            is_banned: signals.is_banned,
            verified_contact: signals.verified_contact,
            role: signals.role,
        };

        let (score, level) = if signals.is_banned {
            (0, TrustLevel::Banned)
        } else {
            let cfg = &self.config;
            let age_score = (age_days as f64 / cfg.age_saturation_days as f64).min(1.0)
                * cfg.age_weight;
            let verified_score = if signals.verified_contact {
                cfg.verified_weight
            } else {
                0.0
            };
            let clean_score =
                (cfg.clean_history_weight - violations as f64 * cfg.violation_penalty).max(0.0);

            let score = (age_score + verified_score + clean_score).clamp(0.0, 100.0) as u8;
            (score, self.level_for(score))
        };

        TrustRecord {
            user_id,
            score,
            level,
            factors,
            calculated_at: now,
            next_review: now
                + chrono::Duration::from_std(self.config.review_interval)
                    .unwrap_or(chrono::Duration::zero()),
        }
    }

    fn level_for(&self, score: u8) -> TrustLevel {
        let cfg = &self.config;
        if score > cfg.veteran_threshold {
            TrustLevel::Veteran
        } else if score >= cfg.trusted_threshold {
            TrustLevel::Trusted
        } else if score >= cfg.basic_threshold {
            TrustLevel::Basic
        } else {
            TrustLevel::New
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abuse::MemoryAbuseStore;
    use crate::config::AbuseConfig;
    use crate::directory::StaticDirectory;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use prahari_common::{Error, Result};

    fn scorer_with(directory: Arc<dyn AccountDirectory>) -> (TrustScorer, AbuseTracker) {
        let tracker = AbuseTracker::new(Arc::new(MemoryAbuseStore::new()), AbuseConfig::default());
        let scorer = TrustScorer::new(
            directory,
            tracker.clone(),
            TrustConfig::default(),
            Duration::from_millis(100),
        );
        (scorer, tracker)
    }

    fn account(age_days: i64, verified: bool, banned: bool, role: AccountRole) -> AccountSignals {
        AccountSignals {
            created_at: Utc::now() - ChronoDuration::days(age_days),
            role,
            is_banned: banned,
            verified_contact: verified,
        }
    }

    #[tokio::test]
    async fn banned_is_terminal_even_for_admins() {
        let directory = StaticDirectory::new();
        let id = Uuid::new_v4();
        directory.insert(id, account(1000, true, true, AccountRole::Admin));
        let (scorer, _) = scorer_with(Arc::new(directory));

        let record = scorer.score(id).await;
        assert_eq!(record.level, TrustLevel::Banned);
        assert_eq!(record.score, 0);
    }

    #[tokio::test]
    async fn old_verified_clean_account_is_veteran() {
        let directory = StaticDirectory::new();
        let id = Uuid::new_v4();
        directory.insert(id, account(400, true, false, AccountRole::User));
        let (scorer, _) = scorer_with(Arc::new(directory));

        let record = scorer.score(id).await;
        // 55 (age, saturated) + 25 (verified) + 15 (clean) = 95
        assert_eq!(record.score, 95);
        assert_eq!(record.level, TrustLevel::Veteran);
    }

    #[tokio::test]
    async fn fresh_account_is_new() {
        let directory = StaticDirectory::new();
        let id = Uuid::new_v4();
        directory.insert(id, account(0, false, false, AccountRole::User));
        let (scorer, _) = scorer_with(Arc::new(directory));

        let record = scorer.score(id).await;
        // Only the clean-history signal: 15 points, below the Basic threshold
        assert_eq!(record.score, 15);
        assert_eq!(record.level, TrustLevel::New);
    }

    #[tokio::test]
    async fn unknown_account_scores_like_day_zero() {
        let (scorer, _) = scorer_with(Arc::new(StaticDirectory::new()));
        let record = scorer.score(Uuid::new_v4()).await;
        assert_eq!(record.level, TrustLevel::New);
        assert_eq!(record.factors.account_age_days, 0);
    }

    #[tokio::test]
    async fn violations_drag_the_score_down() {
        let directory = StaticDirectory::new();
        let id = Uuid::new_v4();
        directory.insert(id, account(400, true, false, AccountRole::User));
        let (scorer, tracker) = scorer_with(Arc::new(directory));

        for _ in 0..3 {
            tracker.record_violation(&Identity::User(id)).await;
        }
        let record = scorer.score(id).await;
        // Clean-history signal fully burned: 95 - 15 = 80
        assert_eq!(record.score, 80);
        assert_eq!(record.level, TrustLevel::Trusted);
        assert_eq!(record.factors.violation_count, 3);
    }

    #[tokio::test]
    async fn records_are_cached_until_review() {
        let directory = StaticDirectory::new();
        let id = Uuid::new_v4();
        directory.insert(id, account(400, true, false, AccountRole::User));
        let (scorer, tracker) = scorer_with(Arc::new(directory));

        let first = scorer.score(id).await;
        assert_eq!(first.score, 95);

        // New violations do not show up until the review interval passes
        for _ in 0..5 {
            tracker.record_violation(&Identity::User(id)).await;
        }
        let cached = scorer.score(id).await;
        assert_eq!(cached.score, 95);
        assert_eq!(scorer.cached_level(&id), Some(TrustLevel::Veteran));
    }

    struct DownDirectory;

    #[async_trait]
    impl AccountDirectory for DownDirectory {
        async fn account_signals(&self, _user_id: Uuid) -> Result<Option<AccountSignals>> {
            Err(Error::StoreUnavailable("directory down".to_string()))
        }
    }

    #[tokio::test]
    async fn directory_outage_degrades_to_neutral_record() {
        let (scorer, _) = scorer_with(Arc::new(DownDirectory));
        let record = scorer.score(Uuid::new_v4()).await;
        assert_eq!(record.level, TrustLevel::New);
        assert_eq!(record.score, 0);
    }
}

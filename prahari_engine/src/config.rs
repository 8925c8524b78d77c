//! Engine configuration loaded from environment variables
//!
//! The numeric policy here (trust weights, multipliers, pattern thresholds)
//! is deliberately configuration, not constants: deployments tune it
//! empirically. Everything is validated once at startup; a malformed value
//! is fatal and prevents the process from starting.

use std::env;
use std::time::Duration;

use prahari_common::{Error, Result, TrustLevel};

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Master switch. When off, every check allows without touching the store.
    pub enabled: bool,

    /// Timeout for each counter-store round-trip, after which the check
    /// fails open.
    pub store_timeout: Duration,

    /// Grace added to a key's expiry beyond its window length
    pub key_grace: Duration,

    /// Scale applied to ip-only identities (must be in (0, 1]; ip limits are
    /// never looser than user limits)
    pub ip_limit_factor: f64,

    /// Whether staff/admin accounts get the role bonus at all
    pub admin_bonus_enabled: bool,

    /// Role bonus multiplier for staff/admin on non-critical actions
    pub role_bonus: f64,

    /// Hard ceiling on any effective limit. A finite ceiling always exists;
    /// no multiplier stack can make an action unlimited.
    pub max_effective_limit: u64,

    /// Redis connection string for the counter store
    pub redis_url: String,

    /// Postgres connection string for the account directory
    pub database_url: Option<String>,

    pub trust: TrustConfig,
    pub patterns: PatternConfig,
    pub abuse: AbuseConfig,
}

/// Trust scoring policy.
#[derive(Debug, Clone)]
pub struct TrustConfig {
    /// Points contributed by account age at saturation
    pub age_weight: f64,
    /// Days of account age at which the age signal saturates
    pub age_saturation_days: i64,
    /// Points for a verified contact method
    pub verified_weight: f64,
    /// Points for a clean violation history
    pub clean_history_weight: f64,
    /// Points deducted per recorded violation
    pub violation_penalty: f64,
    /// Score thresholds for Basic / Trusted / Veteran
    pub basic_threshold: u8,
    pub trusted_threshold: u8,
    pub veteran_threshold: u8,
    /// Per-level limit multipliers
    pub new_multiplier: f64,
    pub basic_multiplier: f64,
    pub trusted_multiplier: f64,
    pub veteran_multiplier: f64,
    /// How long a computed record stays valid in the per-process cache
    pub review_interval: Duration,
}

impl TrustConfig {
    /// Limit multiplier for a trust level. Banned accounts never reach the
    /// limit computation; their multiplier is zero by construction.
    pub fn multiplier(&self, level: TrustLevel) -> f64 {
        match level {
            TrustLevel::New => self.new_multiplier,
            TrustLevel::Basic => self.basic_multiplier,
            TrustLevel::Trusted => self.trusted_multiplier,
            TrustLevel::Veteran => self.veteran_multiplier,
            TrustLevel::Banned => 0.0,
        }
    }
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            age_weight: 55.0,
            age_saturation_days: 365,
            verified_weight: 25.0,
            clean_history_weight: 15.0,
            violation_penalty: 10.0,
            basic_threshold: 20,
            trusted_threshold: 60,
            veteran_threshold: 85,
            new_multiplier: 1.0,
            basic_multiplier: 1.5,
            trusted_multiplier: 3.0,
            veteran_multiplier: 5.0,
            review_interval: Duration::from_secs(30),
        }
    }
}

/// Pattern detection thresholds.
#[derive(Debug, Clone)]
pub struct PatternConfig {
    /// Length of the short burst window the detector inspects
    pub burst_window: Duration,
    /// Requests inside the burst window that qualify as rapid-fire
    pub rapid_fire_threshold: u64,
    /// Burst requests against a critical action that qualify as stuffing
    pub credential_stuffing_threshold: u64,
    /// Multiple of the base limit at which sustained read traffic counts as
    /// probing
    pub probe_limit_factor: f64,
    /// Confidence at or above which a critical verdict becomes a block
    pub block_confidence: f64,
    /// How long a block verdict keeps vetoing after it fires
    pub veto_cooldown: Duration,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            burst_window: Duration::from_secs(3),
            rapid_fire_threshold: 12,
            credential_stuffing_threshold: 5,
            probe_limit_factor: 1.5,
            block_confidence: 0.9,
            veto_cooldown: Duration::from_secs(30),
        }
    }
}

/// Violation tracking and temporary-block policy.
#[derive(Debug, Clone)]
pub struct AbuseConfig {
    /// Decay window for the violation counter (hours-to-days scale)
    pub violation_window: Duration,
    /// Violations within the window that trigger a temporary block
    pub block_threshold: u64,
    /// Duration of the first block; doubles per repeat offense
    pub base_block: Duration,
    /// Upper bound on any block duration
    pub max_block: Duration,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            violation_window: Duration::from_secs(24 * 3600),
            block_threshold: 10,
            base_block: Duration::from_secs(15 * 60),
            max_block: Duration::from_secs(24 * 3600),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_timeout: Duration::from_millis(150),
            key_grace: Duration::from_secs(10),
            ip_limit_factor: 0.5,
            admin_bonus_enabled: true,
            role_bonus: 10.0,
            max_effective_limit: 100_000,
            redis_url: "redis://localhost:6379".to_string(),
            database_url: None,
            trust: TrustConfig::default(),
            patterns: PatternConfig::default(),
            abuse: AbuseConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            enabled: env_bool("PRAHARI_ENABLED", defaults.enabled)?,
            store_timeout: Duration::from_millis(env_parse(
                "PRAHARI_STORE_TIMEOUT_MS",
                defaults.store_timeout.as_millis() as u64,
            )?),
            key_grace: defaults.key_grace,
            ip_limit_factor: env_parse("PRAHARI_IP_LIMIT_FACTOR", defaults.ip_limit_factor)?,
            admin_bonus_enabled: env_bool(
                "PRAHARI_ADMIN_BONUS",
                defaults.admin_bonus_enabled,
            )?,
            role_bonus: env_parse("PRAHARI_ROLE_BONUS", defaults.role_bonus)?,
            max_effective_limit: env_parse(
                "PRAHARI_MAX_EFFECTIVE_LIMIT",
                defaults.max_effective_limit,
            )?,
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            database_url: env::var("DATABASE_URL").ok(),
            trust: defaults.trust,
            patterns: defaults.patterns,
            abuse: defaults.abuse,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every tunable for sanity. Called by `from_env`; call it
    /// directly when building a config in code.
    pub fn validate(&self) -> Result<()> {
        if self.ip_limit_factor <= 0.0 || self.ip_limit_factor > 1.0 {
            return Err(Error::Configuration(
                "ip_limit_factor must be in (0, 1]".to_string(),
            ));
        }
        if self.role_bonus < 1.0 {
            return Err(Error::Configuration(
                "role_bonus must be at least 1".to_string(),
            ));
        }
        if self.max_effective_limit == 0 {
            return Err(Error::Configuration(
                "max_effective_limit must be positive".to_string(),
            ));
        }
        if self.store_timeout.is_zero() {
            return Err(Error::Configuration(
                "store_timeout must be positive".to_string(),
            ));
        }

        let t = &self.trust;
        if !(t.basic_threshold < t.trusted_threshold && t.trusted_threshold < t.veteran_threshold)
        {
            return Err(Error::Configuration(
                "trust thresholds must be strictly increasing".to_string(),
            ));
        }
        for multiplier in [
            t.new_multiplier,
            t.basic_multiplier,
            t.trusted_multiplier,
            t.veteran_multiplier,
        ] {
            if multiplier < 1.0 {
                return Err(Error::Configuration(
                    "trust multipliers must be at least 1".to_string(),
                ));
            }
        }

        let p = &self.patterns;
        if !(0.0..=1.0).contains(&p.block_confidence) {
            return Err(Error::Configuration(
                "block_confidence must be in [0, 1]".to_string(),
            ));
        }
        if p.rapid_fire_threshold == 0 || p.credential_stuffing_threshold == 0 {
            return Err(Error::Configuration(
                "pattern thresholds must be positive".to_string(),
            ));
        }
        if p.probe_limit_factor < 1.0 {
            return Err(Error::Configuration(
                "probe_limit_factor must be at least 1".to_string(),
            ));
        }

        let a = &self.abuse;
        if a.block_threshold == 0 {
            return Err(Error::Configuration(
                "abuse block_threshold must be positive".to_string(),
            ));
        }
        if a.base_block > a.max_block {
            return Err(Error::Configuration(
                "abuse base_block must not exceed max_block".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::Configuration(format!("invalid value for {}", name))),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(raw) => match raw.as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(Error::Configuration(format!(
                "invalid boolean for {}",
                name
            ))),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn ip_factor_above_one_is_rejected() {
        let mut config = EngineConfig::default();
        config.ip_limit_factor = 1.5;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn unordered_trust_thresholds_are_rejected() {
        let mut config = EngineConfig::default();
        config.trust.trusted_threshold = config.trust.basic_threshold;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn sub_one_multiplier_is_rejected() {
        let mut config = EngineConfig::default();
        config.trust.veteran_multiplier = 0.5;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn zero_effective_ceiling_is_rejected() {
        let mut config = EngineConfig::default();
        config.max_effective_limit = 0;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn multiplier_maps_levels() {
        let trust = TrustConfig::default();
        assert_eq!(trust.multiplier(TrustLevel::New), 1.0);
        assert_eq!(trust.multiplier(TrustLevel::Veteran), 5.0);
        assert_eq!(trust.multiplier(TrustLevel::Banned), 0.0);
    }
}

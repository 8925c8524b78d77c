//! Abuse-pattern detection over the short-term event stream
//!
//! Signatures are graded heuristically: each produces a severity and a
//! confidence, not a binary hit. Only a critical-severity, high-confidence
//! verdict escalates to a block - and a block keeps vetoing the key for a
//! short cool-down window regardless of remaining quota.

use dashmap::DashMap;
use std::time::Duration;

use prahari_common::{PatternType, Severity, SuggestedAction};

use crate::catalog::{ActionCategory, ActionDescriptor};
use crate::config::PatternConfig;
use crate::store::now_ms;
use crate::window::WindowSample;

/// What the detector saw for one key at decision time.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    /// Count over the short burst window
    pub burst: WindowSample,
    /// Count over the action's own window
    pub total: WindowSample,
}

/// Ephemeral judgment for the current request. Never persisted.
#[derive(Debug, Clone)]
pub struct PatternVerdict {
    pub detected: bool,
    pub patterns: Vec<PatternType>,
    pub severity: Severity,
    pub confidence: f64,
    pub suggested_action: SuggestedAction,
}

impl PatternVerdict {
    fn clean() -> Self {
        Self {
            detected: false,
            patterns: Vec::new(),
            severity: Severity::Low,
            confidence: 0.0,
            suggested_action: SuggestedAction::Allow,
        }
    }

    /// "rapid_fire,credential_stuffing" - used in denial reasons.
    pub fn pattern_names(&self) -> String {
        self.patterns
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Inspects recent request timing against named abuse signatures.
pub struct PatternDetector {
    config: PatternConfig,
    /// Active block vetoes: key -> (expiry ms, patterns that fired)
    vetoes: DashMap<String, (i64, Vec<PatternType>)>,
}

impl PatternDetector {
    pub fn new(config: PatternConfig) -> Self {
        Self {
            config,
            vetoes: DashMap::new(),
        }
    }

    /// Evaluate one key against the known signatures.
    pub fn detect(&self, key: &str, descriptor: &ActionDescriptor, observation: &Observation) -> PatternVerdict {
        let now = now_ms();

        // An earlier block verdict holds for the whole cool-down
        if let Some(veto) = self.vetoes.get(key) {
            let (until, ref patterns) = *veto;
            if until > now {
                return PatternVerdict {
                    detected: true,
                    patterns: patterns.clone(),
                    severity: Severity::Critical,
                    confidence: 1.0,
                    suggested_action: SuggestedAction::Block,
                };
            }
            drop(veto);
            self.vetoes.remove(key);
        }

        // Degraded samples carry no signal; detection stands down
        if observation.burst.degraded || observation.total.degraded {
            return PatternVerdict::clean();
        }

        let mut patterns = Vec::new();
        let mut severity = Severity::Low;
        let mut confidence: f64 = 0.0;

        let mut record = |hit: Option<(Severity, f64)>, pattern: PatternType| {
            if let Some((hit_severity, hit_confidence)) = hit {
                patterns.push(pattern);
                if hit_severity > severity
                    || (hit_severity == severity && hit_confidence > confidence)
                {
                    severity = hit_severity;
                    confidence = hit_confidence;
                }
            }
        };

        record(
            grade(observation.burst.count, self.config.rapid_fire_threshold),
            PatternType::RapidFire,
        );

        if descriptor.category == ActionCategory::Critical {
            record(
                grade(
                    observation.burst.count,
                    self.config.credential_stuffing_threshold,
                ),
                PatternType::CredentialStuffing,
            );
        }

        if descriptor.category == ActionCategory::Read {
            let probe_threshold =
                (descriptor.base_limit as f64 * self.config.probe_limit_factor).ceil() as u64;
            record(
                grade(observation.total.count, probe_threshold),
                PatternType::SequentialProbe,
            );
        }

        if patterns.is_empty() {
            return PatternVerdict::clean();
        }

        let suggested_action = if severity == Severity::Critical
            && confidence >= self.config.block_confidence
        {
            let until = now + self.config.veto_cooldown.as_millis() as i64;
            self.vetoes.insert(key.to_string(), (until, patterns.clone()));
            SuggestedAction::Block
        } else if severity >= Severity::High {
            SuggestedAction::Throttle
        } else {
            SuggestedAction::Allow
        };

        if suggested_action == SuggestedAction::Block {
            tracing::warn!(
                key = %key,
                patterns = %patterns.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(","),
                confidence,
                "abuse pattern veto engaged"
            );
        }

        PatternVerdict {
            detected: true,
            patterns,
            severity,
            confidence,
            suggested_action,
        }
    }

    /// Time left on an active veto for this key.
    pub fn veto_remaining(&self, key: &str) -> Option<Duration> {
        let now = now_ms();
        self.vetoes.get(key).and_then(|veto| {
            let (until, _) = *veto;
            (until > now).then(|| Duration::from_millis((until - now) as u64))
        })
    }
}

/// Grade a count against its signature threshold. Below threshold: no hit.
/// At threshold: medium. Past 1.5x: high. Past 2x: critical, full confidence.
fn grade(count: u64, threshold: u64) -> Option<(Severity, f64)> {
    if count < threshold.max(1) {
        return None;
    }
    let ratio = count as f64 / threshold as f64;
    let severity = if ratio >= 2.0 {
        Severity::Critical
    } else if ratio >= 1.5 {
        Severity::High
    } else {
        Severity::Medium
    };
    Some((severity, (ratio / 2.0).min(1.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(count: u64) -> WindowSample {
        WindowSample {
            count,
            oldest_ms: Some(0),
            degraded: false,
        }
    }

    fn degraded() -> WindowSample {
        WindowSample {
            count: 0,
            oldest_ms: None,
            degraded: true,
        }
    }

    fn read_action() -> ActionDescriptor {
        ActionDescriptor {
            action: "post:read".to_string(),
            category: ActionCategory::Read,
            window: Duration::from_secs(60),
            base_limit: 100,
        }
    }

    fn login_action() -> ActionDescriptor {
        ActionDescriptor {
            action: "auth:login".to_string(),
            category: ActionCategory::Critical,
            window: Duration::from_secs(900),
            base_limit: 5,
        }
    }

    #[test]
    fn quiet_traffic_detects_nothing() {
        let detector = PatternDetector::new(PatternConfig::default());
        let verdict = detector.detect(
            "k",
            &read_action(),
            &Observation {
                burst: sample(3),
                total: sample(40),
            },
        );
        assert!(!verdict.detected);
        assert_eq!(verdict.suggested_action, SuggestedAction::Allow);
    }

    #[test]
    fn rapid_fire_at_double_threshold_blocks() {
        let detector = PatternDetector::new(PatternConfig::default());
        let verdict = detector.detect(
            "k",
            &read_action(),
            &Observation {
                burst: sample(24),
                total: sample(30),
            },
        );
        assert!(verdict.detected);
        assert!(verdict.patterns.contains(&PatternType::RapidFire));
        assert_eq!(verdict.severity, Severity::Critical);
        assert!(verdict.confidence >= 0.9);
        assert_eq!(verdict.suggested_action, SuggestedAction::Block);
    }

    #[test]
    fn rapid_fire_just_over_threshold_stays_advisory() {
        let detector = PatternDetector::new(PatternConfig::default());
        let verdict = detector.detect(
            "k",
            &read_action(),
            &Observation {
                burst: sample(13),
                total: sample(20),
            },
        );
        assert!(verdict.detected);
        assert_eq!(verdict.severity, Severity::Medium);
        assert_eq!(verdict.suggested_action, SuggestedAction::Allow);
    }

    #[test]
    fn stuffing_trips_on_critical_actions_at_low_volume() {
        let detector = PatternDetector::new(PatternConfig::default());
        // 10 burst attempts: rapid-fire threshold not reached, but twice the
        // stuffing threshold for a critical action
        let verdict = detector.detect(
            "k",
            &login_action(),
            &Observation {
                burst: sample(10),
                total: sample(10),
            },
        );
        assert!(verdict.patterns.contains(&PatternType::CredentialStuffing));
        assert_eq!(verdict.severity, Severity::Critical);
        assert_eq!(verdict.suggested_action, SuggestedAction::Block);
    }

    #[test]
    fn sustained_read_hammering_reads_as_probing() {
        let detector = PatternDetector::new(PatternConfig::default());
        // Burst is calm; the full window is at 3x the base limit
        let verdict = detector.detect(
            "k",
            &read_action(),
            &Observation {
                burst: sample(2),
                total: sample(300),
            },
        );
        assert!(verdict.patterns.contains(&PatternType::SequentialProbe));
        assert_eq!(verdict.suggested_action, SuggestedAction::Block);
    }

    #[test]
    fn block_verdict_keeps_vetoing_through_the_cooldown() {
        let detector = PatternDetector::new(PatternConfig::default());
        detector.detect(
            "k",
            &read_action(),
            &Observation {
                burst: sample(24),
                total: sample(30),
            },
        );

        // Traffic is quiet again, but the veto holds
        let verdict = detector.detect(
            "k",
            &read_action(),
            &Observation {
                burst: sample(0),
                total: sample(0),
            },
        );
        assert_eq!(verdict.suggested_action, SuggestedAction::Block);
        assert!(detector.veto_remaining("k").is_some());
        assert!(detector.veto_remaining("other").is_none());
    }

    #[tokio::test]
    async fn veto_expires_after_the_cooldown() {
        let config = PatternConfig {
            veto_cooldown: Duration::from_millis(40),
            ..PatternConfig::default()
        };
        let detector = PatternDetector::new(config);
        detector.detect(
            "k",
            &read_action(),
            &Observation {
                burst: sample(24),
                total: sample(30),
            },
        );
        assert!(detector.veto_remaining("k").is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        let verdict = detector.detect(
            "k",
            &read_action(),
            &Observation {
                burst: sample(0),
                total: sample(0),
            },
        );
        assert_eq!(verdict.suggested_action, SuggestedAction::Allow);
        assert!(detector.veto_remaining("k").is_none());
    }

    #[test]
    fn degraded_observations_stand_down() {
        let detector = PatternDetector::new(PatternConfig::default());
        let verdict = detector.detect(
            "k",
            &read_action(),
            &Observation {
                burst: degraded(),
                total: degraded(),
            },
        );
        assert!(!verdict.detected);
        assert_eq!(verdict.suggested_action, SuggestedAction::Allow);
    }
}

//! Configuration for the custodia evidence storage engine.
//!
//! All tunables live here: retention class policies, replication behavior,
//! conditional-update retry bounds, and provider call timeouts. Components
//! receive their configuration at construction; there is no ambient global
//! state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodiaConfig {
    /// Bound on every individual provider call (put, get, head).
    #[serde(with = "humantime_serde")]
    pub provider_timeout: Duration,
    /// Retention class policies.
    pub retention: RetentionConfig,
    /// Replication behavior.
    pub replication: ReplicationConfig,
    /// Custody ledger conditional-update bounds.
    pub ledger: LedgerConfig,
}

impl Default for CustodiaConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(30),
            retention: RetentionConfig::default(),
            replication: ReplicationConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl CustodiaConfig {
    /// Configuration for development and testing: short retention, fast
    /// asynchronous replication, quick retries.
    pub fn development() -> Self {
        Self {
            provider_timeout: Duration::from_secs(5),
            retention: RetentionConfig {
                classes: vec![RetentionClassPolicy {
                    name: "standard".to_string(),
                    retention_days: 30,
                    tier_windows: TierWindows {
                        hot_days: Some(7),
                        warm_days: Some(14),
                    },
                }],
                default_class: "standard".to_string(),
            },
            replication: ReplicationConfig {
                synchronous: false,
                max_concurrent: 4,
                retry: RetryConfig::quick(),
            },
            ledger: LedgerConfig::default(),
        }
    }

    /// Compliance-grade configuration: years-scale WORM retention and
    /// synchronous replication so upload acknowledgment implies durability on
    /// every configured provider.
    pub fn compliance() -> Self {
        Self {
            provider_timeout: Duration::from_secs(60),
            retention: RetentionConfig {
                classes: vec![
                    RetentionClassPolicy {
                        name: "standard".to_string(),
                        retention_days: 365 * 3,
                        tier_windows: TierWindows {
                            hot_days: Some(30),
                            warm_days: Some(180),
                        },
                    },
                    RetentionClassPolicy {
                        name: "criminal".to_string(),
                        retention_days: 365 * 7,
                        tier_windows: TierWindows {
                            hot_days: Some(30),
                            warm_days: Some(365),
                        },
                    },
                ],
                default_class: "standard".to_string(),
            },
            replication: ReplicationConfig {
                synchronous: true,
                max_concurrent: 4,
                retry: RetryConfig::patient(),
            },
            ledger: LedgerConfig {
                max_append_attempts: 10,
                retry: RetryConfig::patient(),
            },
        }
    }

    /// Look up a retention class by name, or the default class when `None`.
    pub fn retention_class(&self, name: Option<&str>) -> Option<&RetentionClassPolicy> {
        let wanted = name.unwrap_or(&self.retention.default_class);
        self.retention.classes.iter().find(|c| c.name == wanted)
    }
}

/// Retention policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Available class policies.
    pub classes: Vec<RetentionClassPolicy>,
    /// Class applied when the caller does not name one.
    pub default_class: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            classes: vec![RetentionClassPolicy::default()],
            default_class: "standard".to_string(),
        }
    }
}

/// One retention class: the WORM window plus advisory tier windows.
///
/// Tier windows describe expected residency per tier for tiering decisions;
/// the WORM `retention_days` is the binding constraint on deletion and lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionClassPolicy {
    /// Class name, referenced by upload requests.
    pub name: String,
    /// WORM retention period in days from ingestion.
    pub retention_days: u32,
    /// Advisory tier residency windows.
    pub tier_windows: TierWindows,
}

impl Default for RetentionClassPolicy {
    fn default() -> Self {
        Self {
            name: "standard".to_string(),
            retention_days: 365,
            tier_windows: TierWindows::default(),
        }
    }
}

/// Advisory residency windows per tier. `None` means indefinite.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierWindows {
    pub hot_days: Option<u32>,
    pub warm_days: Option<u32>,
}

/// Replication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// When true, upload acknowledgment waits for every replica write.
    pub synchronous: bool,
    /// Maximum replica writes in flight at once.
    pub max_concurrent: usize,
    /// Retry policy for replica writes.
    pub retry: RetryConfig,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            synchronous: false,
            max_concurrent: 4,
            retry: RetryConfig::default(),
        }
    }
}

/// Custody ledger conditional-update configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Attempts before an append fails with `ContentionExceeded`.
    pub max_append_attempts: u32,
    /// Backoff between losing attempts.
    pub retry: RetryConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_append_attempts: 5,
            retry: RetryConfig::quick(),
        }
    }
}

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts.
    pub max_attempts: u32,
    /// Initial delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
    /// Add jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Quick retry configuration.
    pub fn quick() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Patient retry configuration.
    pub fn patient() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Calculate delay for a given attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        let delay = Duration::from_secs_f64(base_delay.min(self.max_delay.as_secs_f64()));

        if self.jitter {
            // Add up to 25% jitter
            let jitter_factor = 1.0 + (rand_jitter() * 0.25);
            Duration::from_secs_f64(delay.as_secs_f64() * jitter_factor)
        } else {
            delay
        }
    }
}

/// Generate random jitter factor (0.0 to 1.0).
fn rand_jitter() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|e| e.to_string())
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        }
    }
}

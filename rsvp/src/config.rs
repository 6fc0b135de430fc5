//! Engine configuration loaded from environment variables with defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// What to do with a charge whose RSVP could not be granted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Record it in the admin-visible queue only
    #[default]
    Queue,
    /// Record it and request a refund
    Refund,
}

impl FromStr for OrphanPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" => Ok(Self::Queue),
            "refund" => Ok(Self::Refund),
            other => Err(format!("unknown orphan policy: {other}")),
        }
    }
}

/// Payment orchestration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Provider runs in test mode; the first payment shows an advisory
    pub test_mode: bool,
    /// Upper bound on client-side confirmation; elapsed means failed
    pub confirmation_timeout: Duration,
    /// Compensation for orphaned payments
    pub orphan_policy: OrphanPolicy,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            test_mode: false,
            confirmation_timeout: Duration::from_secs(300),
            orphan_policy: OrphanPolicy::Queue,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Payment settings
    pub payments: PaymentConfig,
    /// How long a session call waits for its outcome
    pub outcome_timeout: Duration,
    /// Buffered actions per session observer
    pub broadcast_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            payments: PaymentConfig::default(),
            outcome_timeout: Duration::from_secs(30),
            broadcast_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// How long a call that may reach the payment provider waits.
    ///
    /// Covers the full confirmation window plus the follow-up RSVP write,
    /// so a slow but successful charge is never reported as a timeout.
    #[must_use]
    pub fn payment_outcome_timeout(&self) -> Duration {
        self.outcome_timeout
            .saturating_add(self.payments.confirmation_timeout)
    }

    /// Load configuration from environment variables.
    ///
    /// Missing or unparsable values fall back to [`Default`].
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            payments: PaymentConfig {
                test_mode: env::var("RSVP_PAYMENTS_TEST_MODE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.payments.test_mode),
                confirmation_timeout: env::var("RSVP_CONFIRMATION_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .map_or(defaults.payments.confirmation_timeout, Duration::from_secs),
                orphan_policy: env::var("RSVP_ORPHAN_POLICY")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.payments.orphan_policy),
            },
            outcome_timeout: env::var("RSVP_OUTCOME_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.outcome_timeout, Duration::from_secs),
            broadcast_capacity: env::var("RSVP_BROADCAST_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.broadcast_capacity),
        }
    }
}

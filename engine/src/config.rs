//! Engine configuration.
//!
//! Loads from environment variables with sensible defaults. Intervals feed
//! the periodic task driver; the store timeout bounds every backend call.

use std::env;
use std::time::Duration;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interval between consistency sweep ticks (default: 5 minutes).
    pub sweep_interval: Duration,
    /// Interval between deletion processor ticks (default: 5 minutes).
    pub deletion_interval: Duration,
    /// Interval between reconciliation ticks (default: 15 minutes).
    pub reconcile_interval: Duration,
    /// Bound on a single store call (default: 5 seconds).
    pub store_timeout: Duration,
    /// Attempts before a repair ticket is left for an operator (default: 5).
    pub repair_max_attempts: u32,
    /// Default grace period between a deletion request and its due instant
    /// (default: 14 days).
    pub deletion_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(300),
            deletion_interval: Duration::from_secs(300),
            reconcile_interval: Duration::from_secs(900),
            store_timeout: Duration::from_secs(5),
            repair_max_attempts: 5,
            deletion_grace: Duration::from_secs(14 * 24 * 60 * 60),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sweep_interval: secs_var("EVENTLINE_SWEEP_INTERVAL_SECS", defaults.sweep_interval),
            deletion_interval: secs_var(
                "EVENTLINE_DELETION_INTERVAL_SECS",
                defaults.deletion_interval,
            ),
            reconcile_interval: secs_var(
                "EVENTLINE_RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval,
            ),
            store_timeout: secs_var("EVENTLINE_STORE_TIMEOUT_SECS", defaults.store_timeout),
            repair_max_attempts: env::var("EVENTLINE_REPAIR_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.repair_max_attempts),
            deletion_grace: secs_var("EVENTLINE_DELETION_GRACE_SECS", defaults.deletion_grace),
        }
    }
}

fn secs_var(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map_or(default, Duration::from_secs)
}

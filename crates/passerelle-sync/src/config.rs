//! Engine configuration loaded from environment variables.
//!
//! All settings have defaults matching the reference tuning, so the
//! engine runs with zero configuration.  The debounce window and typing
//! timeout are tuned against the reference transport's own retry
//! interval; when targeting a different transport, keep the debounce
//! above that transport's minimum reconnect interval.

use std::time::Duration;

use passerelle_types::constants::{
    DEFAULT_BACKFILL_COUNT, DISCONNECT_DEBOUNCE, RECONNECT_BACKOFF_MAX, RECONNECT_BACKOFF_MIN,
    TYPING_TIMEOUT,
};

/// Tuning knobs of the synchronization engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Grace window before a raw `Disconnected` signal is reported
    /// outward as a transient disconnect.
    /// Env: `PASSERELLE_DEBOUNCE_SECS`
    pub disconnect_debounce: Duration,

    /// Implicit expiry of a "started typing" signal.
    /// Env: `PASSERELLE_TYPING_TIMEOUT_SECS`
    pub typing_timeout: Duration,

    /// Initial reconnect backoff delay.
    /// Env: `PASSERELLE_BACKOFF_MIN_SECS`
    pub backoff_min: Duration,

    /// Reconnect backoff cap.
    /// Env: `PASSERELLE_BACKOFF_MAX_SECS`
    pub backoff_max: Duration,

    /// Default page size for history import requests.
    /// Env: `PASSERELLE_BACKFILL_COUNT`
    pub backfill_count: usize,

    /// Whether historical (backward) pagination is enabled.  When
    /// disabled, the whole snapshot is consumed in one pass and deleted.
    /// Env: `PASSERELLE_BACKFILL_PAGINATE` (true/false)
    pub paginate_backward: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            disconnect_debounce: DISCONNECT_DEBOUNCE,
            typing_timeout: TYPING_TIMEOUT,
            backoff_min: RECONNECT_BACKOFF_MIN,
            backoff_max: RECONNECT_BACKOFF_MAX,
            backfill_count: DEFAULT_BACKFILL_COUNT,
            paginate_backward: true,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = read_u64("PASSERELLE_DEBOUNCE_SECS") {
            config.disconnect_debounce = Duration::from_secs(secs);
        }
        if let Some(secs) = read_u64("PASSERELLE_TYPING_TIMEOUT_SECS") {
            config.typing_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = read_u64("PASSERELLE_BACKOFF_MIN_SECS") {
            config.backoff_min = Duration::from_secs(secs);
        }
        if let Some(secs) = read_u64("PASSERELLE_BACKOFF_MAX_SECS") {
            config.backoff_max = Duration::from_secs(secs);
        }
        if let Some(count) = read_u64("PASSERELLE_BACKFILL_COUNT") {
            config.backfill_count = count as usize;
        }
        if let Ok(val) = std::env::var("PASSERELLE_BACKFILL_PAGINATE") {
            config.paginate_backward = val != "false" && val != "0";
        }

        config
    }
}

fn read_u64(var: &str) -> Option<u64> {
    let raw = std::env::var(var).ok()?;
    match raw.parse::<u64>() {
        Ok(n) => Some(n),
        Err(e) => {
            tracing::warn!(var, value = %raw, error = %e, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_tuning() {
        let config = SyncConfig::default();
        assert_eq!(config.disconnect_debounce, Duration::from_secs(7));
        assert_eq!(config.typing_timeout, Duration::from_secs(15));
        assert_eq!(config.backoff_min, Duration::from_secs(2));
        assert_eq!(config.backoff_max, Duration::from_secs(150));
        assert!(config.paginate_backward);
    }
}

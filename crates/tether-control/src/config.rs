//! Session configuration types.

use std::time::Duration;

use serde::Deserialize;
use tether_core::{ClientName, SystemParams};

/// Configuration for one control session.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Resource to lease (e.g., "body").
    #[serde(default = "SessionConfig::default_resource")]
    pub resource: String,

    /// Identity the lease is held under.
    #[serde(default = "SessionConfig::default_client_name")]
    pub client_name: ClientName,

    /// Fail instead of preempting when another client holds the lease.
    #[serde(default = "SessionConfig::default_must_acquire")]
    pub must_acquire: bool,

    /// Power-on verification timeout in seconds.
    #[serde(default = "SessionConfig::default_power_on_timeout")]
    pub power_on_timeout_secs: u64,

    /// Stand verification timeout in seconds.
    #[serde(default = "SessionConfig::default_stand_timeout")]
    pub stand_timeout_secs: u64,

    /// Power-off verification timeout in seconds.
    #[serde(default = "SessionConfig::default_power_off_timeout")]
    pub power_off_timeout_secs: u64,

    /// Cut motor power at shutdown instead of settling first.
    #[serde(default)]
    pub cut_immediately: bool,

    /// Interval between power state polls in milliseconds.
    #[serde(default = "SessionConfig::default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Lease renewal settings.
    #[serde(default)]
    pub keep_alive: KeepAliveConfig,

    /// Audio/visual parameters applied after standing, if any.
    #[serde(default)]
    pub system_params: Option<SystemParams>,
}

impl SessionConfig {
    fn default_resource() -> String {
        "body".to_string()
    }

    fn default_client_name() -> ClientName {
        ClientName::generate("tether")
    }

    const fn default_must_acquire() -> bool {
        true
    }

    const fn default_power_on_timeout() -> u64 {
        20
    }

    const fn default_stand_timeout() -> u64 {
        10
    }

    const fn default_power_off_timeout() -> u64 {
        20
    }

    const fn default_poll_interval() -> u64 {
        100
    }

    /// Get the power-on timeout as a `Duration`.
    #[must_use]
    pub const fn power_on_timeout(&self) -> Duration {
        Duration::from_secs(self.power_on_timeout_secs)
    }

    /// Get the stand timeout as a `Duration`.
    #[must_use]
    pub const fn stand_timeout(&self) -> Duration {
        Duration::from_secs(self.stand_timeout_secs)
    }

    /// Get the power-off timeout as a `Duration`.
    #[must_use]
    pub const fn power_off_timeout(&self) -> Duration {
        Duration::from_secs(self.power_off_timeout_secs)
    }

    /// Get the poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `TETHER_RESOURCE`: Resource to lease
    /// - `TETHER_CLIENT_NAME`: Identity the lease is held under
    /// - `TETHER_POWER_ON_TIMEOUT_SECS`: Power-on timeout
    /// - `TETHER_STAND_TIMEOUT_SECS`: Stand timeout
    /// - `TETHER_POWER_OFF_TIMEOUT_SECS`: Power-off timeout
    ///
    /// Unparseable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("TETHER_RESOURCE") {
            if !val.trim().is_empty() {
                config.resource = val;
            }
        }
        if let Ok(val) = std::env::var("TETHER_CLIENT_NAME") {
            match ClientName::new(val) {
                Ok(name) => config.client_name = name,
                Err(e) => tracing::warn!(error = %e, "Ignoring invalid TETHER_CLIENT_NAME"),
            }
        }
        if let Ok(val) = std::env::var("TETHER_POWER_ON_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.power_on_timeout_secs = n;
            }
        }
        if let Ok(val) = std::env::var("TETHER_STAND_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.stand_timeout_secs = n;
            }
        }
        if let Ok(val) = std::env::var("TETHER_POWER_OFF_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.power_off_timeout_secs = n;
            }
        }

        config
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            resource: Self::default_resource(),
            client_name: Self::default_client_name(),
            must_acquire: Self::default_must_acquire(),
            power_on_timeout_secs: Self::default_power_on_timeout(),
            stand_timeout_secs: Self::default_stand_timeout(),
            power_off_timeout_secs: Self::default_power_off_timeout(),
            cut_immediately: false,
            poll_interval_ms: Self::default_poll_interval(),
            keep_alive: KeepAliveConfig::default(),
            system_params: None,
        }
    }
}

/// Lease renewal settings.
#[derive(Debug, Clone, Deserialize)]
pub struct KeepAliveConfig {
    /// Interval between renewals in milliseconds.
    #[serde(default = "KeepAliveConfig::default_interval")]
    pub interval_ms: u64,

    /// First retry delay after a failed renewal, in milliseconds. Doubles on
    /// each consecutive failure up to `interval_ms`.
    #[serde(default = "KeepAliveConfig::default_initial_retry")]
    pub initial_retry_ms: u64,
}

impl KeepAliveConfig {
    const fn default_interval() -> u64 {
        2000
    }

    const fn default_initial_retry() -> u64 {
        1000
    }

    /// Get the renewal interval as a `Duration`.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Get the initial retry delay as a `Duration`.
    #[must_use]
    pub const fn initial_retry(&self) -> Duration {
        Duration::from_millis(self.initial_retry_ms)
    }
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval_ms: Self::default_interval(),
            initial_retry_ms: Self::default_initial_retry(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.resource, "body");
        assert!(config.must_acquire);
        assert!(!config.cut_immediately);
        assert!(config.client_name.as_str().starts_with("tether-"));
        assert!(config.system_params.is_none());
    }

    #[test]
    fn timeout_durations() {
        let config = SessionConfig::default();
        assert_eq!(config.power_on_timeout(), Duration::from_secs(20));
        assert_eq!(config.stand_timeout(), Duration::from_secs(10));
        assert_eq!(config.power_off_timeout(), Duration::from_secs(20));
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.keep_alive.interval(), Duration::from_secs(2));
        assert_eq!(config.keep_alive.initial_retry(), Duration::from_secs(1));
    }

    #[test]
    fn deserialize_partial() {
        let config: SessionConfig = serde_json::from_str(
            r#"{"client_name": "scale", "must_acquire": false, "keep_alive": {"interval_ms": 500}}"#,
        )
        .unwrap();
        assert_eq!(config.client_name.as_str(), "scale");
        assert!(!config.must_acquire);
        assert_eq!(config.keep_alive.interval_ms, 500);
        assert_eq!(config.keep_alive.initial_retry_ms, 1000);
        assert_eq!(config.power_on_timeout_secs, 20);
    }
}

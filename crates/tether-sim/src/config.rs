//! Simulator configuration types.

use std::time::Duration;

use serde::Deserialize;
use tether_control::mock::MockConfig;

/// Configuration for the simulator service.
#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    /// Listen address (e.g., "0.0.0.0:8080").
    #[serde(default = "SimConfig::default_listen_addr")]
    pub listen_addr: String,

    /// How long a lease stays valid without renewal, in seconds.
    #[serde(default = "SimConfig::default_lease_ttl")]
    pub lease_ttl_secs: u64,

    /// Delay before an accepted power-on is observed, in milliseconds.
    #[serde(default = "SimConfig::default_transition_delay")]
    pub power_on_delay_ms: u64,

    /// Delay before an accepted stand is observed, in milliseconds.
    #[serde(default = "SimConfig::default_transition_delay")]
    pub stand_delay_ms: u64,

    /// Delay before a graceful power-off is observed, in milliseconds.
    #[serde(default = "SimConfig::default_transition_delay")]
    pub power_off_delay_ms: u64,

    /// Seed the actuator's own permanent behaviors at startup.
    #[serde(default = "SimConfig::default_seed_permanent")]
    pub seed_permanent: bool,

    /// Maximum request body size in bytes.
    #[serde(default = "SimConfig::default_max_body")]
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    #[serde(default = "SimConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl SimConfig {
    fn default_listen_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    const fn default_lease_ttl() -> u64 {
        10
    }

    const fn default_transition_delay() -> u64 {
        500
    }

    const fn default_seed_permanent() -> bool {
        true
    }

    const fn default_max_body() -> usize {
        64 * 1024
    }

    const fn default_request_timeout() -> u64 {
        30
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Timing for the simulated actuator.
    #[must_use]
    pub const fn mock_config(&self) -> MockConfig {
        MockConfig {
            lease_ttl: Duration::from_secs(self.lease_ttl_secs),
            power_on_delay: Duration::from_millis(self.power_on_delay_ms),
            stand_delay: Duration::from_millis(self.stand_delay_ms),
            power_off_delay: Duration::from_millis(self.power_off_delay_ms),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `LISTEN_ADDR`: Listen address
    /// - `SIM_LEASE_TTL_SECS`: Lease lifetime without renewal
    /// - `SIM_POWER_ON_DELAY_MS`: Power-on transition time
    /// - `SIM_STAND_DELAY_MS`: Stand transition time
    /// - `SIM_POWER_OFF_DELAY_MS`: Power-off transition time
    /// - `SIM_SEED_PERMANENT`: Set to `false` to start without permanent behaviors
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("LISTEN_ADDR") {
            config.listen_addr = val;
        }
        if let Ok(val) = std::env::var("SIM_LEASE_TTL_SECS") {
            if let Ok(n) = val.parse() {
                config.lease_ttl_secs = n;
            }
        }
        if let Ok(val) = std::env::var("SIM_POWER_ON_DELAY_MS") {
            if let Ok(n) = val.parse() {
                config.power_on_delay_ms = n;
            }
        }
        if let Ok(val) = std::env::var("SIM_STAND_DELAY_MS") {
            if let Ok(n) = val.parse() {
                config.stand_delay_ms = n;
            }
        }
        if let Ok(val) = std::env::var("SIM_POWER_OFF_DELAY_MS") {
            if let Ok(n) = val.parse() {
                config.power_off_delay_ms = n;
            }
        }
        if let Ok(val) = std::env::var("SIM_SEED_PERMANENT") {
            if let Ok(b) = val.parse() {
                config.seed_permanent = b;
            }
        }

        config
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            lease_ttl_secs: Self::default_lease_ttl(),
            power_on_delay_ms: Self::default_transition_delay(),
            stand_delay_ms: Self::default_transition_delay(),
            power_off_delay_ms: Self::default_transition_delay(),
            seed_permanent: Self::default_seed_permanent(),
            max_body_bytes: Self::default_max_body(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SimConfig::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.lease_ttl_secs, 10);
        assert!(config.seed_permanent);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn mock_config_uses_configured_timing() {
        let config = SimConfig {
            lease_ttl_secs: 3,
            stand_delay_ms: 40,
            ..SimConfig::default()
        };
        let mock = config.mock_config();
        assert_eq!(mock.lease_ttl, Duration::from_secs(3));
        assert_eq!(mock.stand_delay, Duration::from_millis(40));
        assert_eq!(mock.power_on_delay, Duration::from_millis(500));
    }

    #[test]
    fn deserialize_partial() {
        let config: SimConfig =
            serde_json::from_str(r#"{"listen_addr": "127.0.0.1:9000", "seed_permanent": false}"#)
                .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert!(!config.seed_permanent);
        assert_eq!(config.power_off_delay_ms, 500);
    }
}

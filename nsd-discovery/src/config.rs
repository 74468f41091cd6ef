use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{bail, Context, Result};
use shared::protocol::{DEFAULT_BROWSE_TIMEOUT_MS, DEFAULT_SERVICE_TYPE};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub mdns: MdnsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_service_type")]
    pub service_type: String,
    #[serde(default = "default_browse_timeout")]
    pub browse_timeout_ms: u64,
    /// Overall deadline; twice the browse timeout when unset
    #[serde(default)]
    pub task_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MdnsConfig {
    /// Restrict the daemon to one network interface
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_ms: u64,
}

fn default_service_type() -> String {
    DEFAULT_SERVICE_TYPE.to_string()
}

fn default_browse_timeout() -> u64 {
    DEFAULT_BROWSE_TIMEOUT_MS
}

fn default_resolve_timeout() -> u64 {
    500
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            browse_timeout_ms: default_browse_timeout(),
            task_timeout_ms: None,
        }
    }
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            interface: None,
            resolve_timeout_ms: default_resolve_timeout(),
        }
    }
}

impl DiscoveryConfig {
    pub fn browse_timeout(&self) -> Duration {
        Duration::from_millis(self.browse_timeout_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms.unwrap_or(self.browse_timeout_ms.saturating_mul(2)))
    }
}

impl MdnsConfig {
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.discovery.service_type.trim().is_empty() {
            bail!("discovery.service_type must not be empty");
        }
        if self.discovery.browse_timeout_ms == 0 {
            bail!("discovery.browse_timeout_ms must be greater than zero");
        }
        if self.discovery.task_timeout_ms == Some(0) {
            bail!("discovery.task_timeout_ms must be greater than zero");
        }
        if self.mdns.resolve_timeout_ms == 0 {
            bail!("mdns.resolve_timeout_ms must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.discovery.service_type, "_drone._tcp");
        assert_eq!(config.discovery.browse_timeout(), Duration::from_millis(1000));
        assert_eq!(config.discovery.task_timeout(), Duration::from_millis(2000));
        assert_eq!(config.mdns.resolve_timeout(), Duration::from_millis(500));
        assert!(config.mdns.interface.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config: Config = toml::from_str(
            r#"
            [discovery]
            service_type = "_camera._udp"
            browse_timeout_ms = 3000

            [mdns]
            interface = "wlan0"
            "#,
        )
        .unwrap();

        assert_eq!(config.discovery.service_type, "_camera._udp");
        // Deadline follows the browse timeout when not set explicitly
        assert_eq!(config.discovery.task_timeout(), Duration::from_millis(6000));
        assert_eq!(config.mdns.interface.as_deref(), Some("wlan0"));
    }

    #[test]
    fn test_rejects_zero_timeouts() {
        let mut config = Config::default();
        config.discovery.browse_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.discovery.task_timeout_ms = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.discovery.service_type = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_browse_timeout_saturates_deadline() {
        let mut config = Config::default();
        config.discovery.browse_timeout_ms = u64::MAX;

        assert!(config.validate().is_ok());
        assert_eq!(config.discovery.task_timeout(), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(Config::load("/nonexistent/nsd-discovery.toml").is_err());
    }
}

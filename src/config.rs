use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const MAX_RETENTION_HOURS: u64 = 24 * 365 * 10;
const MAX_PRUNE_INTERVAL_SECS: u64 = 7 * 24 * 3600;
const MAX_POLL_INTERVAL_MS: u64 = 24 * 3600 * 1000;
const MAX_TIMEOUT_MS: u64 = 10 * 60 * 1000;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default = "default_pollers")]
    pub pollers: Vec<PollerConfig>,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub executable: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollerConfig {
    pub name: String,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_analytics_limit")]
    pub analytics_limit: u32,
    #[serde(default = "default_export_window_minutes")]
    pub export_window_minutes: u32,
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            executable: None,
            args: Vec::new(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            retention_hours: default_retention_hours(),
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            analytics_limit: default_analytics_limit(),
            export_window_minutes: default_export_window_minutes(),
            export_dir: default_export_dir(),
        }
    }
}

impl AgentConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl StoreConfig {
    /// `None` when pruning is disabled.
    pub fn retention(&self) -> Option<Duration> {
        if self.retention_hours == 0 {
            None
        } else {
            Some(Duration::from_secs(self.retention_hours.saturating_mul(3600)))
        }
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }

        validate_agent(&self.agent)?;
        validate_store(&self.store)?;
        validate_pollers(&self.pollers)?;
        validate_bridge(&self.bridge)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_agent(cfg: &AgentConfig) -> Result<(), ConfigError> {
    let url = cfg.base_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::Validation(format!(
            "agent.base_url '{}' must start with http:// or https://",
            cfg.base_url
        )));
    }
    if cfg.connect_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "agent.connect_timeout_ms must be > 0".to_string(),
        ));
    }
    if cfg.request_timeout_ms > MAX_TIMEOUT_MS {
        return Err(ConfigError::Validation(format!(
            "agent.request_timeout_ms must be <= {MAX_TIMEOUT_MS}"
        )));
    }
    if cfg.request_timeout_ms < cfg.connect_timeout_ms {
        return Err(ConfigError::Validation(
            "agent.request_timeout_ms must be >= agent.connect_timeout_ms".to_string(),
        ));
    }
    if let Some(exe) = &cfg.executable {
        if exe.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "agent.executable must not be empty when set".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_store(cfg: &StoreConfig) -> Result<(), ConfigError> {
    if cfg.path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "store.path must not be empty".to_string(),
        ));
    }
    if cfg.retention_hours > MAX_RETENTION_HOURS {
        return Err(ConfigError::Validation(format!(
            "store.retention_hours must be <= {MAX_RETENTION_HOURS}"
        )));
    }
    if cfg.retention_hours > 0 && cfg.prune_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "store.prune_interval_secs must be > 0 when retention is enabled".to_string(),
        ));
    }
    if cfg.prune_interval_secs > MAX_PRUNE_INTERVAL_SECS {
        return Err(ConfigError::Validation(format!(
            "store.prune_interval_secs must be <= {MAX_PRUNE_INTERVAL_SECS}"
        )));
    }
    Ok(())
}

fn validate_pollers(pollers: &[PollerConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for poller in pollers {
        if poller.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "pollers[*].name must not be empty".to_string(),
            ));
        }
        if !names.insert(poller.name.clone()) {
            return Err(ConfigError::Validation(format!(
                "poller name '{}' must be unique",
                poller.name
            )));
        }
        if poller.interval_ms < 100 {
            return Err(ConfigError::Validation(format!(
                "poller '{}' interval_ms must be >= 100",
                poller.name
            )));
        }
        if poller.interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(ConfigError::Validation(format!(
                "poller '{}' interval_ms must be <= {MAX_POLL_INTERVAL_MS}",
                poller.name
            )));
        }
    }
    Ok(())
}

fn validate_bridge(cfg: &BridgeConfig) -> Result<(), ConfigError> {
    if cfg.workers == 0 {
        return Err(ConfigError::Validation(
            "bridge.workers must be >= 1".to_string(),
        ));
    }
    if cfg.queue_capacity == 0 {
        return Err(ConfigError::Validation(
            "bridge.queue_capacity must be >= 1".to_string(),
        ));
    }
    if cfg.analytics_limit == 0 {
        return Err(ConfigError::Validation(
            "bridge.analytics_limit must be >= 1".to_string(),
        ));
    }
    if cfg.export_window_minutes == 0 {
        return Err(ConfigError::Validation(
            "bridge.export_window_minutes must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

const fn default_connect_timeout_ms() -> u64 {
    2000
}

const fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_store_path() -> PathBuf {
    PathBuf::from("smcmap.db")
}

const fn default_retention_hours() -> u64 {
    168
}

const fn default_prune_interval_secs() -> u64 {
    600
}

fn default_pollers() -> Vec<PollerConfig> {
    vec![PollerConfig {
        name: "dashboard".to_string(),
        interval_ms: 1000,
    }]
}

const fn default_workers() -> usize {
    4
}

const fn default_queue_capacity() -> usize {
    64
}

const fn default_analytics_limit() -> u32 {
    100
}

const fn default_export_window_minutes() -> u32 {
    3
}

fn default_export_dir() -> PathBuf {
    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            listen: "127.0.0.1:9310".to_string(),
            agent: AgentConfig::default(),
            store: StoreConfig::default(),
            pollers: default_pollers(),
            bridge: BridgeConfig::default(),
        }
    }

    #[test]
    fn defaults_validate() {
        valid_config().validate().expect("defaults must be valid");
    }

    #[test]
    fn example_config_parses_and_validates() {
        let cfg: Config = serde_yaml::from_str(Config::example_yaml()).expect("example parses");
        cfg.validate().expect("example validates");
        assert_eq!(cfg.pollers.len(), 2);
        assert_eq!(cfg.agent.connect_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn minimal_yaml_fills_defaults() {
        let cfg: Config = serde_yaml::from_str("listen: \"127.0.0.1:9999\"\n").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.agent.base_url, "http://127.0.0.1:8080");
        assert_eq!(cfg.pollers[0].name, "dashboard");
        assert_eq!(cfg.pollers[0].interval(), Duration::from_secs(1));
        assert_eq!(cfg.bridge.analytics_limit, 100);
        assert_eq!(cfg.bridge.export_window_minutes, 3);
    }

    #[test]
    fn duplicate_poller_names_rejected() {
        let mut cfg = valid_config();
        cfg.pollers.push(PollerConfig {
            name: "dashboard".to_string(),
            interval_ms: 3000,
        });
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("unique"));
    }

    #[test]
    fn zero_queue_capacity_rejected() {
        let mut cfg = valid_config();
        cfg.bridge.queue_capacity = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn non_http_base_url_rejected() {
        let mut cfg = valid_config();
        cfg.agent.base_url = "127.0.0.1:8080".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn retention_zero_disables_pruning() {
        let mut cfg = valid_config();
        cfg.store.retention_hours = 0;
        cfg.store.prune_interval_secs = 0;
        cfg.validate().unwrap();
        assert!(cfg.store.retention().is_none());
    }

    #[test]
    fn huge_retention_rejected() {
        let mut cfg = valid_config();
        cfg.store.retention_hours = u64::MAX;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("retention_hours"), "{err}");
        assert!(cfg.store.retention().is_some());

        cfg.store.retention_hours = MAX_RETENTION_HOURS;
        cfg.validate().unwrap();
    }

    #[test]
    fn huge_prune_interval_rejected() {
        let mut cfg = valid_config();
        cfg.store.prune_interval_secs = u64::MAX;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("prune_interval_secs"), "{err}");
    }

    #[test]
    fn huge_poll_interval_rejected() {
        let mut cfg = valid_config();
        cfg.pollers[0].interval_ms = u64::MAX;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("interval_ms"), "{err}");
    }

    #[test]
    fn huge_request_timeout_rejected() {
        let mut cfg = valid_config();
        cfg.agent.request_timeout_ms = u64::MAX;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }
}

//! Configuration management for servbase
//!
//! This module handles loading and validating the static service
//! configuration from environment variables, TOML files, or a builder.

pub mod tier;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use tier::{deep_merge, merge_tiers};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Logical service location, `group/service`
    pub location: String,

    /// Key identifying this process in the id claim; the service ip when unset
    #[serde(default)]
    pub session_key: Option<String>,

    /// Deployment lane (e.g. `pre`)
    #[serde(default)]
    pub env_group: String,

    /// Address published in registrations; detected when unset
    #[serde(default)]
    pub serv_ip: Option<String>,

    /// Primary store connection
    #[serde(default)]
    pub etcd: EtcdConfig,

    /// Registration lifecycle timing
    #[serde(default)]
    pub registration: RegistrationConfig,

    /// Distributed lock timing
    #[serde(default)]
    pub lock: LockConfig,

    /// Instance id claim
    #[serde(default)]
    pub id: IdConfig,

    /// Remote regions registrations are mirrored to
    #[serde(default)]
    pub regions: Vec<RegionConfig>,
}

/// etcd connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    pub base_path: String,
    pub request_timeout_secs: u64,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            base_path: "/roc".to_string(),
            request_timeout_secs: 5,
        }
    }
}

/// Registration TTL, refresh tick and deregistration grace delay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub ttl_secs: u64,
    pub refresh_interval_secs: u64,
    pub grace_delay_ms: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            refresh_interval_secs: 20,
            grace_delay_ms: 2000,
        }
    }
}

/// Lock node TTL and heartbeat renewal interval
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub ttl_secs: u64,
    pub heartbeat_interval_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30,
            heartbeat_interval_secs: 10,
        }
    }
}

/// Instance id claim settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdConfig {
    /// Total claim attempts before startup fails
    pub claim_retries: u32,

    /// Added to the claimed id to form the generator worker id
    pub sid_offset: u32,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            claim_retries: 3,
            sid_offset: 0,
        }
    }
}

/// One remote region store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegionConfig {
    pub region_id: i32,
    pub endpoints: Vec<String>,
}

impl ServiceConfig {
    /// Minimal config for a location with every other field defaulted
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            session_key: None,
            env_group: String::new(),
            serv_ip: None,
            etcd: EtcdConfig::default(),
            registration: RegistrationConfig::default(),
            lock: LockConfig::default(),
            id: IdConfig::default(),
            regions: Vec::new(),
        }
    }

    /// Create a new config builder
    pub fn builder(location: impl Into<String>) -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::new(location),
        }
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `SERVBASE_LOCATION`: `group/service` [required]
    /// - `SERVBASE_ETCD_ENDPOINTS`: comma separated [default: http://127.0.0.1:2379]
    /// - `SERVBASE_BASE_PATH`: [default: /roc]
    /// - `SERVBASE_SESSION_KEY`: [optional]
    /// - `SERVBASE_ENV_GROUP`: [optional]
    /// - `SERVBASE_SERV_IP`: [optional]
    /// - `SERVBASE_REG_TTL`: seconds [default: 60]
    /// - `SERVBASE_REG_INTERVAL`: seconds [default: 20]
    /// - `SERVBASE_GRACE_DELAY_MS`: [default: 2000]
    /// - `SERVBASE_SID_OFFSET`: [default: 0]
    /// - `SERVBASE_CROSS_REGIONS`: `3=http://a:2379|http://b:2379;5=http://c:2379` [optional]
    pub fn from_env() -> Result<Self, ConfigError> {
        let location = std::env::var("SERVBASE_LOCATION")
            .map_err(|_| ConfigError::MissingEnvVar("SERVBASE_LOCATION".to_string()))?;

        let mut config = Self::new(location);

        if let Ok(endpoints) = std::env::var("SERVBASE_ETCD_ENDPOINTS") {
            config.etcd.endpoints = split_list(&endpoints, ',');
        }
        if let Ok(base) = std::env::var("SERVBASE_BASE_PATH") {
            config.etcd.base_path = base;
        }
        config.session_key = std::env::var("SERVBASE_SESSION_KEY").ok();
        config.env_group = std::env::var("SERVBASE_ENV_GROUP").unwrap_or_default();
        config.serv_ip = std::env::var("SERVBASE_SERV_IP").ok();
        config.registration.ttl_secs = env_parse("SERVBASE_REG_TTL", 60);
        config.registration.refresh_interval_secs = env_parse("SERVBASE_REG_INTERVAL", 20);
        config.registration.grace_delay_ms = env_parse("SERVBASE_GRACE_DELAY_MS", 2000);
        config.id.sid_offset = env_parse("SERVBASE_SID_OFFSET", 0);

        if let Ok(regions) = std::env::var("SERVBASE_CROSS_REGIONS") {
            config.regions = parse_regions(&regions)?;
        }

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.location.trim_matches('/').is_empty() {
            return Err(ConfigError::invalid("location", "Location cannot be empty"));
        }

        if self.location.starts_with('/') || self.location.ends_with('/') {
            return Err(ConfigError::invalid(
                "location",
                "Location must not start or end with '/'",
            ));
        }

        if self.etcd.endpoints.is_empty() {
            return Err(ConfigError::invalid("etcd.endpoints", "At least one endpoint required"));
        }

        if self.registration.refresh_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "registration.refresh_interval_secs",
                "Must be positive",
            ));
        }

        // at least two refresh attempts per TTL window
        if self.registration.refresh_interval_secs.saturating_mul(2)
            >= self.registration.ttl_secs
        {
            return Err(ConfigError::invalid(
                "registration.refresh_interval_secs",
                "Interval must be less than half of the TTL",
            ));
        }

        if self.lock.heartbeat_interval_secs == 0
            || self.lock.heartbeat_interval_secs.saturating_mul(2) >= self.lock.ttl_secs
        {
            return Err(ConfigError::invalid(
                "lock.heartbeat_interval_secs",
                "Heartbeat must be positive and less than half of the lock TTL",
            ));
        }

        if self.id.claim_retries == 0 {
            return Err(ConfigError::invalid("id.claim_retries", "Must allow at least 1 attempt"));
        }

        let mut seen = std::collections::HashSet::new();
        for region in &self.regions {
            if !seen.insert(region.region_id) {
                return Err(ConfigError::invalid(
                    "regions",
                    format!("Duplicate region id {}", region.region_id),
                ));
            }
            if region.endpoints.is_empty() {
                return Err(ConfigError::invalid(
                    "regions",
                    format!("Region {} has no endpoints", region.region_id),
                ));
            }
        }

        Ok(())
    }

    /// Registration node TTL
    pub fn registration_ttl(&self) -> Duration {
        Duration::from_secs(self.registration.ttl_secs)
    }

    /// Registration maintenance tick
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.registration.refresh_interval_secs)
    }

    /// Delay between the stop flag and deleting registrations
    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.registration.grace_delay_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock.ttl_secs)
    }

    pub fn lock_heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.lock.heartbeat_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.etcd.request_timeout_secs)
    }
}

/// Builder for ServiceConfig
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.config.etcd.endpoints = endpoints;
        self
    }

    pub fn base_path(mut self, base: impl Into<String>) -> Self {
        self.config.etcd.base_path = base.into();
        self
    }

    pub fn session_key(mut self, key: impl Into<String>) -> Self {
        self.config.session_key = Some(key.into());
        self
    }

    pub fn env_group(mut self, group: impl Into<String>) -> Self {
        self.config.env_group = group.into();
        self
    }

    pub fn serv_ip(mut self, ip: impl Into<String>) -> Self {
        self.config.serv_ip = Some(ip.into());
        self
    }

    /// Set registration TTL and refresh tick
    pub fn registration_timing(mut self, ttl_secs: u64, refresh_interval_secs: u64) -> Self {
        self.config.registration.ttl_secs = ttl_secs;
        self.config.registration.refresh_interval_secs = refresh_interval_secs;
        self
    }

    pub fn grace_delay_ms(mut self, ms: u64) -> Self {
        self.config.registration.grace_delay_ms = ms;
        self
    }

    /// Set lock TTL and heartbeat interval
    pub fn lock_timing(mut self, ttl_secs: u64, heartbeat_interval_secs: u64) -> Self {
        self.config.lock.ttl_secs = ttl_secs;
        self.config.lock.heartbeat_interval_secs = heartbeat_interval_secs;
        self
    }

    pub fn claim_retries(mut self, retries: u32) -> Self {
        self.config.id.claim_retries = retries;
        self
    }

    pub fn sid_offset(mut self, offset: u32) -> Self {
        self.config.id.sid_offset = offset;
        self
    }

    /// Add a remote region
    pub fn region(mut self, region_id: i32, endpoints: Vec<String>) -> Self {
        self.config.regions.push(RegionConfig {
            region_id,
            endpoints,
        });
        self
    }

    /// Build the config
    pub fn build(self) -> Result<ServiceConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn split_list(raw: &str, sep: char) -> Vec<String> {
    raw.split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_regions(raw: &str) -> Result<Vec<RegionConfig>, ConfigError> {
    split_list(raw, ';')
        .into_iter()
        .map(|entry| {
            let (id, endpoints) = entry.split_once('=').ok_or_else(|| {
                ConfigError::invalid("SERVBASE_CROSS_REGIONS", format!("Expected id=endpoints, got '{entry}'"))
            })?;
            let region_id = id.trim().parse().map_err(|_| {
                ConfigError::invalid("SERVBASE_CROSS_REGIONS", format!("Invalid region id '{id}'"))
            })?;
            Ok(RegionConfig {
                region_id,
                endpoints: split_list(endpoints, '|'),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServiceConfig::new("groupA/svcB");
        assert!(config.validate().is_ok());
        assert_eq!(config.registration_ttl(), Duration::from_secs(60));
        assert_eq!(config.refresh_interval(), Duration::from_secs(20));
        assert_eq!(config.grace_delay(), Duration::from_secs(2));
        assert_eq!(config.id.claim_retries, 3);
    }

    #[test]
    fn test_refresh_interval_must_be_under_half_ttl() {
        let result = ServiceConfig::builder("g/s").registration_timing(60, 30).build();
        assert!(result.is_err());

        let result = ServiceConfig::builder("g/s").registration_timing(60, 29).build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_huge_intervals_rejected_without_overflow() {
        let result = ServiceConfig::builder("g/s")
            .registration_timing(u64::MAX, u64::MAX / 2 + 1)
            .build();
        assert!(result.is_err());

        let result = ServiceConfig::builder("g/s")
            .lock_timing(u64::MAX, u64::MAX)
            .build();
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_huge_interval_is_invalid() {
        std::env::set_var("SERVBASE_LOCATION", "groupA/svcB");
        std::env::set_var("SERVBASE_REG_INTERVAL", u64::MAX.to_string());

        let config = ServiceConfig::from_env().unwrap();

        std::env::remove_var("SERVBASE_LOCATION");
        std::env::remove_var("SERVBASE_REG_INTERVAL");

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_invalid_location() {
        assert!(ServiceConfig::new("").validate().is_err());
        assert!(ServiceConfig::new("/g/s").validate().is_err());
    }

    #[test]
    fn test_duplicate_regions_rejected() {
        let result = ServiceConfig::builder("g/s")
            .region(3, vec!["http://a:2379".to_string()])
            .region(3, vec!["http://b:2379".to_string()])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_regions() {
        let regions = parse_regions("3=http://a:2379|http://b:2379; 5=http://c:2379").unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].region_id, 3);
        assert_eq!(regions[0].endpoints.len(), 2);
        assert_eq!(regions[1].endpoints, vec!["http://c:2379".to_string()]);

        assert!(parse_regions("nonsense").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
location = "groupA/svcB"
env_group = "pre"

[etcd]
endpoints = ["http://10.0.0.2:2379"]
base_path = "/roc"

[registration]
ttl_secs = 30
refresh_interval_secs = 10

[[regions]]
region_id = 2
endpoints = ["http://10.1.0.2:2379"]
"#
        )
        .unwrap();

        let config = ServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.location, "groupA/svcB");
        assert_eq!(config.env_group, "pre");
        assert_eq!(config.registration.ttl_secs, 30);
        assert_eq!(config.registration.grace_delay_ms, 2000);
        assert_eq!(config.regions.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("SERVBASE_LOCATION", "groupA/svcB");
        std::env::set_var("SERVBASE_ETCD_ENDPOINTS", "http://e1:2379, http://e2:2379");
        std::env::set_var("SERVBASE_REG_TTL", "90");
        std::env::set_var("SERVBASE_CROSS_REGIONS", "7=http://r7:2379");

        let config = ServiceConfig::from_env().unwrap();

        std::env::remove_var("SERVBASE_LOCATION");
        std::env::remove_var("SERVBASE_ETCD_ENDPOINTS");
        std::env::remove_var("SERVBASE_REG_TTL");
        std::env::remove_var("SERVBASE_CROSS_REGIONS");

        assert_eq!(config.etcd.endpoints.len(), 2);
        assert_eq!(config.registration.ttl_secs, 90);
        assert_eq!(config.regions[0].region_id, 7);
    }

    #[test]
    #[serial]
    fn test_from_env_missing_location() {
        std::env::remove_var("SERVBASE_LOCATION");
        assert!(matches!(
            ServiceConfig::from_env(),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }
}

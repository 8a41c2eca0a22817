//! Configuration for the service discovery module.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use service_discovery_sdk::{EndpointEntity, ServiceIdentifier};
use thiserror::Error;

/// Service discovery module configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Idle time after which a connection or subscription is evicted.
    #[serde(default = "default_ttl", with = "humantime_duration")]
    pub ttl: Duration,

    /// Period of the background sweep of idle entries.
    #[serde(default = "default_sweep_interval", with = "humantime_duration")]
    pub sweep_interval: Duration,

    /// Root node under which serversets are registered.
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Coordination cluster members, `host:port` each.
    #[serde(default = "default_cluster")]
    pub cluster: Vec<String>,

    /// Initial members served by the in-memory registry backend.
    pub static_members: BTreeMap<ServiceIdentifier, Vec<EndpointEntity>>,
}

fn default_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_base_path() -> String {
    "/aurora".to_owned()
}

fn default_cluster() -> Vec<String> {
    vec!["127.0.0.1:2181".to_owned()]
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            sweep_interval: default_sweep_interval(),
            base_path: default_base_path(),
            cluster: default_cluster(),
            static_members: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("discovery.cluster must list at least one host:port")]
    EmptyCluster,

    #[error("invalid cluster address '{address}': {reason}")]
    InvalidClusterAddress { address: String, reason: &'static str },

    #[error("discovery.{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("discovery.base_path must start with '/', got '{0}'")]
    InvalidBasePath(String),
}

impl DiscoveryConfig {
    /// # Errors
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "ttl" });
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "sweep_interval",
            });
        }
        if !self.base_path.starts_with('/') {
            return Err(ConfigError::InvalidBasePath(self.base_path.clone()));
        }
        if self.cluster.is_empty() {
            return Err(ConfigError::EmptyCluster);
        }
        self.cluster.iter().try_for_each(|address| validate_cluster_address(address))
    }
}

fn validate_cluster_address(address: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidClusterAddress {
        address: address.to_owned(),
        reason,
    };

    let mut parts = address.split(':');
    let (Some(host), Some(port), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid("expected host:port"));
    };
    if host.is_empty() {
        return Err(invalid("empty host"));
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid("port must be in 1..=65535")),
        Ok(_) => Ok(()),
    }
}

/// `Duration` as a humantime string (`"90s"`, `"1h 30m"`).
pub mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    /// # Errors
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    /// # Errors
    /// Fails on strings humantime cannot parse.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(de::Error::custom)
    }
}

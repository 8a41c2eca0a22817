use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use service_discovery::DiscoveryConfig;
use service_discovery::config::humantime_duration;

/// Environment variables starting with this prefix override config keys,
/// `__` separating nesting levels: `DISCOVERY__SERVER__BIND_ADDR`.
pub const ENV_PREFIX: &str = "DISCOVERY__";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Public listener serving lookups.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Admin listener serving health, cache inspection and shutdown endpoints.
    #[serde(default = "default_admin_bind_addr")]
    pub admin_bind_addr: SocketAddr,

    #[serde(default = "default_request_timeout", with = "humantime_duration")]
    pub request_timeout: Duration,

    /// Upper bound on draining in-flight requests at shutdown.
    #[serde(default = "default_shutdown_timeout", with = "humantime_duration")]
    pub shutdown_timeout: Duration,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 5000))
}

fn default_admin_bind_addr() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 9000))
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            admin_bind_addr: default_admin_bind_addr(),
            request_timeout: default_request_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `info,service_discovery=debug`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Text,
        }
    }
}

/// Command-line values that take precedence over every other layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct CliOverrides {
    pub http_addr: Option<SocketAddr>,
    pub admin_addr: Option<SocketAddr>,
}

impl AppConfig {
    /// Layered load: defaults, then the YAML file (if given), then
    /// `DISCOVERY__*` environment variables.
    ///
    /// # Errors
    /// Fails if `path` is not a file or any layer does not deserialize.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));

        if let Some(path) = path {
            if !path.is_file() {
                anyhow::bail!("config file does not exist: {}", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("failed to load configuration")
    }

    pub fn apply_cli_overrides(&mut self, overrides: &CliOverrides) {
        if let Some(addr) = overrides.http_addr {
            self.server.bind_addr = addr;
        }
        if let Some(addr) = overrides.admin_addr {
            self.server.admin_bind_addr = addr;
        }
    }

    /// # Errors
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<()> {
        if self.server.request_timeout.is_zero() {
            anyhow::bail!("server.request_timeout must be greater than zero");
        }
        if self.server.bind_addr == self.server.admin_bind_addr && self.server.bind_addr.port() != 0 {
            anyhow::bail!(
                "server.bind_addr and server.admin_bind_addr must differ, both are {}",
                self.server.bind_addr
            );
        }
        self.discovery.validate()?;
        Ok(())
    }

    /// # Errors
    /// Fails only if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize configuration")
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::error::DiscoveryError;

/// `role/environment/service`, each segment restricted to `[A-Za-z0-9_-]+`.
/// The environment segment is checked against [`Environment`] after matching.
static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^([A-Za-z0-9_-]+)/([A-Za-z0-9_-]+)/([A-Za-z0-9_-]+)$")
        .expect("identifier pattern must compile")
});

/// Deployment environment a service is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Prod,
    Release,
    Releasedr,
    Staging,
    Devel,
    Beta,
    Alpha,
}

impl Environment {
    pub const ALL: [Environment; 7] = [
        Environment::Prod,
        Environment::Release,
        Environment::Releasedr,
        Environment::Staging,
        Environment::Devel,
        Environment::Beta,
        Environment::Alpha,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Environment::Prod => "prod",
            Environment::Release => "release",
            Environment::Releasedr => "releasedr",
            Environment::Staging => "staging",
            Environment::Devel => "devel",
            Environment::Beta => "beta",
            Environment::Alpha => "alpha",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown environment '{0}'")]
pub struct UnknownEnvironment(pub String);

impl FromStr for Environment {
    type Err = UnknownEnvironment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Environment::ALL
            .into_iter()
            .find(|env| env.as_str() == s)
            .ok_or_else(|| UnknownEnvironment(s.to_owned()))
    }
}

/// Validated `role/environment/service` triple.
///
/// Only constructible through [`ServiceIdentifier::parse`] (or [`FromStr`]),
/// so every value in circulation has passed validation. Used as the key of
/// every cache in the module.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceIdentifier {
    role: String,
    environment: Environment,
    service: String,
}

impl ServiceIdentifier {
    /// Parse and validate a raw identifier.
    ///
    /// Matching is case-sensitive: `search/PROD/api` is rejected.
    ///
    /// # Errors
    /// Returns [`DiscoveryError::InvalidIdentifier`] when `raw` does not have
    /// exactly three non-empty segments from the allowed alphabet, or when the
    /// environment segment is not one of [`Environment::ALL`].
    pub fn parse(raw: &str) -> Result<Self, DiscoveryError> {
        let invalid = || DiscoveryError::InvalidIdentifier {
            raw: raw.to_owned(),
        };

        let caps = IDENTIFIER_RE.captures(raw).ok_or_else(invalid)?;
        let environment = caps[2].parse::<Environment>().map_err(|_| invalid())?;

        Ok(Self {
            role: caps[1].to_owned(),
            environment,
            service: caps[3].to_owned(),
        })
    }

    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Path of the serverset node in the coordination service, e.g.
    /// `/aurora/search/prod/api` for base `/aurora`.
    #[must_use]
    pub fn registry_path(&self, base: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), self)
    }
}

impl fmt::Display for ServiceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.role, self.environment, self.service)
    }
}

impl FromStr for ServiceIdentifier {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ServiceIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ServiceIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// One live member of a serverset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointEntity {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl EndpointEntity {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// `host:port` form suitable for dialing.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Number of live entries held by each registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub connections: usize,
    pub subscriptions: usize,
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use service_discovery_sdk::{CacheStats, EndpointEntity};

/// REST DTO for one serverset member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDto {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl From<EndpointEntity> for EndpointDto {
    fn from(ep: EndpointEntity) -> Self {
        Self {
            host: ep.host,
            port: ep.port,
            metadata: ep.metadata,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsDto {
    pub connections: usize,
    pub subscriptions: usize,
}

impl From<CacheStats> for CacheStatsDto {
    fn from(stats: CacheStats) -> Self {
        Self {
            connections: stats.connections,
            subscriptions: stats.subscriptions,
        }
    }
}

//! Service discovery module.
//!
//! Resolves `role/environment/service` identifiers to the live members of
//! their serverset. Registry connections and membership watches are shared
//! across callers and released after a period of disuse.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

// Re-export the public API from the SDK
pub use service_discovery_sdk::{
    BackendError, CacheStats, DiscoveryError, EndpointEntity, Environment, ServiceDiscoveryClient,
    ServiceIdentifier,
};

pub mod api;
pub mod backends;
pub mod config;
pub mod domain;
pub mod module;

pub use config::{ConfigError, DiscoveryConfig};
pub use domain::DiscoveryCache;
pub use module::ServiceDiscoveryModule;

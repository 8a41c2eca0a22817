//! Service discovery SDK
//!
//! Public surface of the `service_discovery` module:
//! - [`ServiceDiscoveryClient`] - the API consumers use to resolve services
//! - [`ServiceIdentifier`], [`EndpointEntity`], [`CacheStats`] - data models
//! - [`DiscoveryError`], [`BackendError`] - error types
//! - [`RegistryClient`] and friends - the seam a coordination backend plugs into
//!
//! ## Example
//!
//! ```ignore
//! use service_discovery_sdk::ServiceDiscoveryClient;
//!
//! let endpoints = client.lookup("search/prod/api").await?;
//! for ep in &endpoints {
//!     println!("{}", ep.address());
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod api;
pub mod backend;
pub mod error;
pub mod models;

pub use api::ServiceDiscoveryClient;
pub use backend::{EndpointSnapshot, Membership, RegistryClient, RegistrySession, WatchGuard};
pub use error::{BackendError, DiscoveryError};
pub use models::{CacheStats, EndpointEntity, Environment, ServiceIdentifier, UnknownEnvironment};

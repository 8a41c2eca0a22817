pub mod connections;
pub mod local_client;
pub mod resource_cache;
pub mod service;
pub mod subscriptions;

pub use connections::{ConnectionHandle, ConnectionRegistry};
pub use resource_cache::ResourceCache;
pub use service::DiscoveryCache;
pub use subscriptions::{SubscriptionHandle, SubscriptionRegistry};

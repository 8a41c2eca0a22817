pub mod static_registry;

pub use static_registry::{RegistryCounters, RegistryEvent, StaticRegistry};

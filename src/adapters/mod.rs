pub mod configured_primary_host;
pub mod json_file_store;
pub mod memory_store;
pub mod nginx_serving_layer;
pub mod static_services_registry;

/// Re-export commonly used types from adapters
pub use configured_primary_host::ConfiguredPrimaryHost;
pub use json_file_store::JsonFileStore;
pub use memory_store::MemoryStore;
pub use nginx_serving_layer::NginxServingLayer;
pub use static_services_registry::StaticServicesRegistry;

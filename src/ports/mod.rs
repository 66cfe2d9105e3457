pub mod primary_host;
pub mod serving_layer;
pub mod services_registry;
pub mod store;

pub use primary_host::PrimaryHostLookup;
pub use serving_layer::{ServingError, ServingLayer, ServingResult};
pub use services_registry::ServicesRegistry;
pub use store::{DurableStore, StoreError, StoreResult};

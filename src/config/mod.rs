pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{load_config, load_default_config};
pub use models::*;
pub use validation::{ConfigError, ConfigResult, ConfigValidator};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::{model::Fqdn, synthesizer::ConfigArtifact};

/// Error type for serving layer operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServingError {
    /// Error when writing or removing configuration files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error when an external command exits unsuccessfully
    #[error("`{command}` failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// Error when the serving layer does not answer in time
    #[error("Timeout error after {0:?}")]
    Timeout(Duration),

    /// Error when the serving layer refuses the configuration
    #[error("Rejected: {0}")]
    Rejected(String),
}

/// Result type for serving layer operations
pub type ServingResult<T> = Result<T, ServingError>;

/// ServingLayer defines the port (interface) to the external process that
/// actually serves traffic. Every call is idempotent and safe to retry with
/// the same input.
#[async_trait]
pub trait ServingLayer: Send + Sync + 'static {
    /// Install the configuration for one server block
    ///
    /// # Arguments
    /// * `artifact` - Rendered configuration, replacing any previous version
    async fn apply_config(&self, artifact: &ConfigArtifact) -> ServingResult<()>;

    /// Drop the configuration of a server block that no longer exists
    async fn remove_config(&self, hostname: &Fqdn) -> ServingResult<()>;

    /// Make the running process pick up the installed configuration
    async fn reload(&self) -> ServingResult<()>;
}

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::model::{Fqdn, HostingModel, Mapping, MappingId, VirtualHost};

/// Error type for durable store operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// Error when reading or writing the backing file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error when the stored document cannot be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error when the backend refuses the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for durable store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// DurableStore defines the port (interface) for persisting virtual hosts and
/// mappings.
///
/// Writes must be visible to the next `snapshot` call (read-your-writes), and
/// `restore` must put back exactly the state captured by an earlier
/// `snapshot`, including the mapping id counter.
#[async_trait]
pub trait DurableStore: Send + Sync + 'static {
    /// A consistent, immutable view of everything stored.
    async fn snapshot(&self) -> StoreResult<Arc<HostingModel>>;

    async fn read_virtual_hosts(&self) -> StoreResult<Vec<VirtualHost>> {
        Ok(self.snapshot().await?.virtual_hosts().cloned().collect())
    }

    /// All mappings, or only those owned by `hostname`, ordered by id.
    async fn read_mappings(&self, hostname: Option<&Fqdn>) -> StoreResult<Vec<Mapping>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .mappings()
            .filter(|m| hostname.is_none_or(|h| &m.hostname == h))
            .cloned()
            .collect())
    }

    /// Insert or replace a virtual host.
    async fn write_virtual_host(&self, vhost: &VirtualHost) -> StoreResult<()>;

    /// Insert or replace a mapping.
    async fn write_mapping(&self, mapping: &Mapping) -> StoreResult<()>;

    /// Reserve a mapping id that has never been handed out before.
    async fn allocate_mapping_id(&self) -> StoreResult<MappingId>;

    /// Remove a virtual host. Removing an absent host is not an error.
    async fn delete_virtual_host(&self, hostname: &Fqdn) -> StoreResult<()>;

    /// Remove a mapping. Removing an absent mapping is not an error.
    async fn delete_mapping(&self, id: MappingId) -> StoreResult<()>;

    /// Revert to a previously captured snapshot.
    async fn restore(&self, snapshot: Arc<HostingModel>) -> StoreResult<()>;
}

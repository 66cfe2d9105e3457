use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    core::model::{Fqdn, HostingModel, Mapping, MappingId, VirtualHost},
    ports::store::{DurableStore, StoreResult},
};

/// Volatile store keeping the model in memory. Readers load the current
/// snapshot without locking; writers are serialized and publish a fresh
/// snapshot per write.
#[derive(Default)]
pub struct MemoryStore {
    current: ArcSwap<HostingModel>,
    writer: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: HostingModel) -> Self {
        Self {
            current: ArcSwap::from_pointee(model),
            writer: Mutex::new(()),
        }
    }

    async fn mutate<R>(&self, change: impl FnOnce(&mut HostingModel) -> R) -> R {
        let _guard = self.writer.lock().await;
        let mut next = HostingModel::clone(&self.current.load());
        let result = change(&mut next);
        self.current.store(Arc::new(next));
        result
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn snapshot(&self) -> StoreResult<Arc<HostingModel>> {
        Ok(self.current.load_full())
    }

    async fn write_virtual_host(&self, vhost: &VirtualHost) -> StoreResult<()> {
        self.mutate(|model| model.insert_virtual_host(vhost.clone())).await;
        Ok(())
    }

    async fn write_mapping(&self, mapping: &Mapping) -> StoreResult<()> {
        self.mutate(|model| model.insert_mapping(mapping.clone())).await;
        Ok(())
    }

    async fn allocate_mapping_id(&self) -> StoreResult<MappingId> {
        Ok(self.mutate(HostingModel::allocate_mapping_id).await)
    }

    async fn delete_virtual_host(&self, hostname: &Fqdn) -> StoreResult<()> {
        self.mutate(|model| model.remove_virtual_host(hostname)).await;
        Ok(())
    }

    async fn delete_mapping(&self, id: MappingId) -> StoreResult<()> {
        self.mutate(|model| model.remove_mapping(id)).await;
        Ok(())
    }

    async fn restore(&self, snapshot: Arc<HostingModel>) -> StoreResult<()> {
        let _guard = self.writer.lock().await;
        self.current.store(snapshot);
        Ok(())
    }
}

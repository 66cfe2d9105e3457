use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    core::model::{Fqdn, HostingModel, Mapping, MappingId, VirtualHost},
    ports::store::{DurableStore, StoreResult},
};

/// Store persisting the whole model as one pretty-printed JSON document.
///
/// Every write replaces the document atomically (temporary file, then
/// rename), so a crash leaves either the old or the new document on disk.
/// The parsed model is cached and served to readers without touching disk.
pub struct JsonFileStore {
    path: PathBuf,
    current: ArcSwap<HostingModel>,
    writer: Mutex<()>,
}

impl JsonFileStore {
    /// Open the document at `path`. A missing file is an empty model; the
    /// file is created by the first write.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let model = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<HostingModel>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "store document not found, starting empty");
                HostingModel::default()
            }
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(
            path = %path.display(),
            virtual_hosts = model.virtual_host_count(),
            "store document loaded"
        );

        Ok(Self {
            path,
            current: ArcSwap::from_pointee(model),
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn mutate<R>(&self, change: impl FnOnce(&mut HostingModel) -> R) -> StoreResult<R> {
        let _guard = self.writer.lock().await;
        let mut next = HostingModel::clone(&self.current.load());
        let result = change(&mut next);
        self.persist(&next).await?;
        self.current.store(Arc::new(next));
        Ok(result)
    }

    async fn persist(&self, model: &HostingModel) -> StoreResult<()> {
        let mut document = serde_json::to_vec_pretty(model)?;
        document.push(b'\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        tokio::fs::write(&temp, &document).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl DurableStore for JsonFileStore {
    async fn snapshot(&self) -> StoreResult<Arc<HostingModel>> {
        Ok(self.current.load_full())
    }

    async fn write_virtual_host(&self, vhost: &VirtualHost) -> StoreResult<()> {
        self.mutate(|model| model.insert_virtual_host(vhost.clone()))
            .await
            .map(drop)
    }

    async fn write_mapping(&self, mapping: &Mapping) -> StoreResult<()> {
        self.mutate(|model| model.insert_mapping(mapping.clone()))
            .await
            .map(drop)
    }

    async fn allocate_mapping_id(&self) -> StoreResult<MappingId> {
        self.mutate(HostingModel::allocate_mapping_id).await
    }

    async fn delete_virtual_host(&self, hostname: &Fqdn) -> StoreResult<()> {
        self.mutate(|model| model.remove_virtual_host(hostname))
            .await
            .map(drop)
    }

    async fn delete_mapping(&self, id: MappingId) -> StoreResult<()> {
        self.mutate(|model| model.remove_mapping(id)).await.map(drop)
    }

    async fn restore(&self, snapshot: Arc<HostingModel>) -> StoreResult<()> {
        let _guard = self.writer.lock().await;
        self.persist(&snapshot).await?;
        self.current.store(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::core::model::{MappingDraft, MappingPath, MappingTarget, MatchPattern, TargetType};

    #[tokio::test]
    async fn test_missing_file_is_empty_and_written_on_demand() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("vhosts.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        assert!(store.snapshot().await.unwrap().is_empty());
        assert!(!path.exists());

        let host = VirtualHost::top_level(Fqdn::new("example.com").unwrap()).unwrap();
        store.write_virtual_host(&host).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_reopen_reads_back_counter_and_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vhosts.json");
        let host = Fqdn::new("example.com").unwrap();

        {
            let store = JsonFileStore::open(&path).await.unwrap();
            store
                .write_virtual_host(&VirtualHost::top_level(host.clone()).unwrap())
                .await
                .unwrap();
            let id = store.allocate_mapping_id().await.unwrap();
            let mapping = MappingDraft {
                hostname: host.clone(),
                path: MappingPath::new("/").unwrap(),
                match_pattern: MatchPattern::Equals,
                target: MappingTarget::new(TargetType::ResponseCode, None, Some(204)).unwrap(),
            }
            .into_mapping(id);
            store.write_mapping(&mapping).await.unwrap();
            store.delete_mapping(id).await.unwrap();
        }

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let snapshot = reopened.snapshot().await.unwrap();
        assert!(snapshot.virtual_host(&host).is_some());
        assert_eq!(snapshot.mappings().count(), 0);
        assert_eq!(reopened.allocate_mapping_id().await.unwrap(), MappingId::new(2));
    }

    #[tokio::test]
    async fn test_restore_reproduces_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vhosts.json");
        let store = JsonFileStore::open(&path).await.unwrap();
        store
            .write_virtual_host(&VirtualHost::top_level(Fqdn::new("a.example").unwrap()).unwrap())
            .await
            .unwrap();

        let saved = store.snapshot().await.unwrap();
        let bytes = std::fs::read(&path).unwrap();

        store
            .write_virtual_host(&VirtualHost::top_level(Fqdn::new("b.example").unwrap()).unwrap())
            .await
            .unwrap();
        store.allocate_mapping_id().await.unwrap();
        store.restore(saved).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_corrupt_document_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vhosts.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(JsonFileStore::open(&path).await.is_err());
    }
}

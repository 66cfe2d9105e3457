// Shared fixtures for the engine integration tests
#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tempfile::TempDir;
use vhostd::{
    adapters::{ConfiguredPrimaryHost, JsonFileStore, NginxServingLayer, StaticServicesRegistry},
    core::{
        CommandEngine, CreateVirtualHost, EngineTimeouts,
        model::{
            Fqdn, HostingModel, Mapping, MappingDraft, MappingId, MappingPath, MappingTarget,
            MatchPattern, TargetType, VirtualHost, VirtualHostType,
        },
        synthesizer::ConfigArtifact,
    },
    ports::{DurableStore, ServingError, ServingLayer, ServingResult, StoreError, StoreResult},
};

/// Serving layer writing real files through the nginx adapter, with switches
/// to make individual calls fail or hang. `fail_apply_on` fires once; the
/// reload counters say how many of the next reloads fail or hang.
pub struct FaultyServingLayer {
    inner: NginxServingLayer,
    pub fail_apply_on: Mutex<Option<Fqdn>>,
    pub failing_reloads: AtomicUsize,
    pub hanging_reloads: AtomicUsize,
    pub calls: Mutex<Vec<String>>,
}

impl FaultyServingLayer {
    pub fn new(config_dir: PathBuf) -> Self {
        Self {
            inner: NginxServingLayer::new(config_dir, vec!["true".to_string()]),
            fail_apply_on: Mutex::new(None),
            failing_reloads: AtomicUsize::new(0),
            hanging_reloads: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ServingLayer for FaultyServingLayer {
    async fn apply_config(&self, artifact: &ConfigArtifact) -> ServingResult<()> {
        self.record(format!("apply {}", artifact.hostname));
        let armed = self
            .fail_apply_on
            .lock()
            .unwrap()
            .take_if(|host| *host == artifact.hostname)
            .is_some();
        if armed {
            return Err(ServingError::Rejected(format!("{} refused", artifact.hostname)));
        }
        self.inner.apply_config(artifact).await
    }

    async fn remove_config(&self, hostname: &Fqdn) -> ServingResult<()> {
        self.record(format!("remove {hostname}"));
        self.inner.remove_config(hostname).await
    }

    async fn reload(&self) -> ServingResult<()> {
        self.record("reload".to_string());
        if take_one(&self.hanging_reloads) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if take_one(&self.failing_reloads) {
            return Err(ServingError::CommandFailed {
                command: "nginx -s reload".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "emerg: unexpected end of file".to_string(),
            });
        }
        self.inner.reload().await
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// JSON file store that can be told to refuse host deletions, leaving a
/// cascade half done.
pub struct FaultyStore {
    inner: JsonFileStore,
    pub fail_host_deletes: AtomicBool,
}

#[async_trait]
impl DurableStore for FaultyStore {
    async fn snapshot(&self) -> StoreResult<Arc<HostingModel>> {
        self.inner.snapshot().await
    }

    async fn write_virtual_host(&self, vhost: &VirtualHost) -> StoreResult<()> {
        self.inner.write_virtual_host(vhost).await
    }

    async fn write_mapping(&self, mapping: &Mapping) -> StoreResult<()> {
        self.inner.write_mapping(mapping).await
    }

    async fn allocate_mapping_id(&self) -> StoreResult<MappingId> {
        self.inner.allocate_mapping_id().await
    }

    async fn delete_virtual_host(&self, hostname: &Fqdn) -> StoreResult<()> {
        if self.fail_host_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk quota exceeded".to_string()));
        }
        self.inner.delete_virtual_host(hostname).await
    }

    async fn delete_mapping(&self, id: MappingId) -> StoreResult<()> {
        self.inner.delete_mapping(id).await
    }

    async fn restore(&self, snapshot: Arc<HostingModel>) -> StoreResult<()> {
        self.inner.restore(snapshot).await
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<FaultyStore>,
    pub serving: Arc<FaultyServingLayer>,
    pub engine: CommandEngine,
}

impl Harness {
    pub async fn new(primary: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FaultyStore {
            inner: JsonFileStore::open(dir.path().join("vhosts.json")).await.unwrap(),
            fail_host_deletes: AtomicBool::new(false),
        });
        let serving = Arc::new(FaultyServingLayer::new(dir.path().join("sites")));
        let engine = CommandEngine::new(
            store.clone(),
            serving.clone(),
            Arc::new(StaticServicesRegistry::new(["php-webserver"])),
            Arc::new(ConfiguredPrimaryHost::new(primary.map(fqdn))),
        )
        .with_timeouts(EngineTimeouts {
            apply: Duration::from_secs(5),
            reload: Duration::from_millis(200),
        });

        Self {
            dir,
            store,
            serving,
            engine,
        }
    }

    pub fn store_bytes(&self) -> Vec<u8> {
        std::fs::read(self.dir.path().join("vhosts.json")).unwrap_or_default()
    }

    /// Rendered server block files by name.
    pub fn sites(&self) -> BTreeMap<String, String> {
        let Ok(entries) = std::fs::read_dir(self.dir.path().join("sites")) else {
            return BTreeMap::new();
        };
        entries
            .map(|entry| {
                let entry = entry.unwrap();
                (
                    entry.file_name().to_string_lossy().into_owned(),
                    std::fs::read_to_string(entry.path()).unwrap(),
                )
            })
            .collect()
    }
}

pub fn fqdn(name: &str) -> Fqdn {
    Fqdn::new(name).unwrap()
}

pub fn top_level(name: &str) -> CreateVirtualHost {
    CreateVirtualHost {
        hostname: fqdn(name),
        kind: VirtualHostType::TopLevel,
        parent_hostname: None,
    }
}

pub fn alias(name: &str, parent: &str) -> CreateVirtualHost {
    CreateVirtualHost {
        hostname: fqdn(name),
        kind: VirtualHostType::Alias,
        parent_hostname: Some(fqdn(parent)),
    }
}

pub fn status(code: u16) -> MappingTarget {
    MappingTarget::new(TargetType::ResponseCode, None, Some(code)).unwrap()
}

pub fn draft(host: &str, path: &str, pattern: MatchPattern, target: MappingTarget) -> MappingDraft {
    MappingDraft {
        hostname: fqdn(host),
        path: MappingPath::new(path).unwrap(),
        match_pattern: pattern,
        target,
    }
}

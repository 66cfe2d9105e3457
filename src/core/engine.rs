//! Transactional command engine.
//!
//! Every administrative command runs the same pipeline under one global lock:
//! validate against a store snapshot, persist, synthesize, apply the changed
//! server blocks to the serving layer, reload it. A failure after persisting
//! has begun puts the store back to the snapshot taken before the command and
//! hands the serving layer its previous artifacts back, so callers only ever
//! observe the state before or after a command.
use std::{fmt, future::Future, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::{
    core::{
        error::{EngineError, EngineResult},
        invariants::{CascadeSet, InvariantValidator, ServiceAvailability},
        model::{
            Fqdn, HostingModel, Mapping, MappingDraft, MappingId, MappingPath, MappingTarget,
            MatchPattern, VirtualHost, VirtualHostType, VirtualHostWithMappings,
        },
        resolver::MappingResolver,
        synthesizer::{ArtifactSet, ConfigSynthesizer},
    },
    metrics,
    ports::{
        DurableStore, PrimaryHostLookup, ServicesRegistry, ServingError, ServingLayer,
        ServingResult, StoreError, StoreResult,
    },
    tracing_setup,
};

/// Where a command is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPhase {
    Validating,
    Persisting,
    Synthesizing,
    Applying,
    Reloading,
    Committed,
    RollingBack,
    RolledBack,
}

impl CommandPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandPhase::Validating => "validating",
            CommandPhase::Persisting => "persisting",
            CommandPhase::Synthesizing => "synthesizing",
            CommandPhase::Applying => "applying",
            CommandPhase::Reloading => "reloading",
            CommandPhase::Committed => "committed",
            CommandPhase::RollingBack => "rolling_back",
            CommandPhase::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for CommandPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounds on serving-layer calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTimeouts {
    pub apply: Duration,
    pub reload: Duration,
}

impl Default for EngineTimeouts {
    fn default() -> Self {
        Self {
            apply: Duration::from_secs(10),
            reload: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateVirtualHost {
    pub hostname: Fqdn,
    pub kind: VirtualHostType,
    pub parent_hostname: Option<Fqdn>,
}

/// Replacement values for an existing mapping. The owning host never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateMapping {
    pub id: MappingId,
    pub path: MappingPath,
    pub match_pattern: MatchPattern,
    pub target: MappingTarget,
}

/// A single store mutation.
#[derive(Debug)]
enum Write {
    PutVirtualHost(VirtualHost),
    /// Gets its id from the store while persisting
    NewMapping(MappingDraft),
    PutMapping(Mapping),
    DeleteMapping(MappingId),
    DeleteVirtualHost(Fqdn),
}

/// Store mutations of a validated command and what it reports back.
struct Plan<T> {
    writes: Vec<Write>,
    output: T,
}

pub struct CommandEngine {
    store: Arc<dyn DurableStore>,
    serving: Arc<dyn ServingLayer>,
    services: Arc<dyn ServicesRegistry>,
    primary: Arc<dyn PrimaryHostLookup>,
    synthesizer: ConfigSynthesizer,
    timeouts: EngineTimeouts,
    command_lock: Mutex<()>,
}

impl CommandEngine {
    pub fn new(
        store: Arc<dyn DurableStore>,
        serving: Arc<dyn ServingLayer>,
        services: Arc<dyn ServicesRegistry>,
        primary: Arc<dyn PrimaryHostLookup>,
    ) -> Self {
        Self {
            store,
            serving,
            services,
            primary,
            synthesizer: ConfigSynthesizer::default(),
            timeouts: EngineTimeouts::default(),
            command_lock: Mutex::new(()),
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: ConfigSynthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_timeouts(mut self, timeouts: EngineTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub async fn create_virtual_host(&self, command: CreateVirtualHost) -> EngineResult<VirtualHost> {
        let vhost = VirtualHost::new(command.hostname, command.kind, command.parent_hostname)?;

        let (vhost, _) = self
            .execute("create_virtual_host", move |model| {
                InvariantValidator::validate_create_virtual_host(model, &vhost)?;
                Ok(Plan {
                    writes: vec![Write::PutVirtualHost(vhost.clone())],
                    output: vhost,
                })
            })
            .await?;
        Ok(vhost)
    }

    /// Delete a host together with its aliases and all their mappings.
    pub async fn delete_virtual_host(&self, hostname: &Fqdn) -> EngineResult<CascadeSet> {
        let primary = self.primary.primary_hostname();
        let hostname = hostname.clone();

        let (cascade, _) = self
            .execute("delete_virtual_host", move |model| {
                let cascade = InvariantValidator::plan_virtual_host_deletion(
                    model,
                    &hostname,
                    primary.as_ref(),
                )?;
                // Mappings first, then aliases, the parent last
                let mut writes: Vec<Write> =
                    cascade.mappings.iter().copied().map(Write::DeleteMapping).collect();
                writes.extend(
                    cascade
                        .virtual_hosts
                        .iter()
                        .rev()
                        .cloned()
                        .map(Write::DeleteVirtualHost),
                );
                Ok(Plan {
                    writes,
                    output: cascade,
                })
            })
            .await?;
        Ok(cascade)
    }

    pub async fn create_mapping(&self, draft: MappingDraft) -> EngineResult<Mapping> {
        let service = self.service_availability(&draft.target).await;

        let (_, written) = self
            .execute("create_mapping", move |model| {
                InvariantValidator::validate_create_mapping(model, &draft, service)?;
                Ok(Plan {
                    writes: vec![Write::NewMapping(draft)],
                    output: (),
                })
            })
            .await?;
        single_mapping(written)
    }

    pub async fn update_mapping(&self, command: UpdateMapping) -> EngineResult<Mapping> {
        let service = self.service_availability(&command.target).await;

        let (_, written) = self
            .execute("update_mapping", move |model| {
                let existing = InvariantValidator::validate_delete_mapping(model, command.id)?;
                let draft = MappingDraft {
                    hostname: existing.hostname.clone(),
                    path: command.path,
                    match_pattern: command.match_pattern,
                    target: command.target,
                };
                InvariantValidator::validate_update_mapping(model, command.id, &draft, service)?;
                Ok(Plan {
                    writes: vec![Write::PutMapping(draft.into_mapping(command.id))],
                    output: (),
                })
            })
            .await?;
        single_mapping(written)
    }

    /// Delete a mapping, returning what was removed.
    pub async fn delete_mapping(&self, id: MappingId) -> EngineResult<Mapping> {
        let (removed, _) = self
            .execute("delete_mapping", move |model| {
                let mapping = InvariantValidator::validate_delete_mapping(model, id)?.clone();
                Ok(Plan {
                    writes: vec![Write::DeleteMapping(id)],
                    output: mapping,
                })
            })
            .await?;
        Ok(removed)
    }

    pub async fn read_virtual_hosts(&self) -> EngineResult<Vec<VirtualHost>> {
        Ok(self.store.read_virtual_hosts().await?)
    }

    /// Server blocks with nested aliases and mappings, flagging the primary
    /// host.
    pub async fn read_virtual_hosts_with_mappings(
        &self,
    ) -> EngineResult<Vec<VirtualHostWithMappings>> {
        let snapshot = self.store.snapshot().await?;
        let primary = self.primary.primary_hostname();
        Ok(snapshot.with_mappings(primary.as_ref()))
    }

    /// The mapping serving `request_path` on `hostname`. `Ok(None)` means the
    /// host exists but no mapping matches.
    pub async fn resolve(&self, hostname: &Fqdn, request_path: &str) -> EngineResult<Option<Mapping>> {
        let snapshot = self.store.snapshot().await?;
        if MappingResolver::server_block(&snapshot, hostname).is_none() {
            return Err(EngineError::NotFound(format!(
                "no virtual host serves {hostname}"
            )));
        }
        Ok(MappingResolver::resolve(&snapshot, hostname, request_path).cloned())
    }

    /// Render the stored configuration without touching the serving layer.
    pub async fn render(&self) -> EngineResult<ArtifactSet> {
        let snapshot = self.store.snapshot().await?;
        Ok(self.synthesizer.synthesize(&snapshot)?)
    }

    async fn service_availability(&self, target: &MappingTarget) -> ServiceAvailability {
        match target.service() {
            None => ServiceAvailability::NotReferenced,
            Some(service) if self.services.exists(&service.name).await => {
                ServiceAvailability::Installed
            }
            Some(_) => ServiceAvailability::Missing,
        }
    }

    async fn execute<T, F>(&self, operation: &'static str, plan: F) -> EngineResult<(T, Vec<Mapping>)>
    where
        T: Send,
        F: FnOnce(&HostingModel) -> EngineResult<Plan<T>> + Send,
    {
        let command_id = Uuid::new_v4().to_string();
        let span = tracing_setup::command_span(operation, &command_id);
        let _timer = metrics::CommandTimer::new(operation);

        let result = self.run(plan).instrument(span.clone()).await;

        let outcome = match &result {
            Ok(_) => "committed",
            Err(e) if e.is_user_error() => "rejected",
            Err(EngineError::Rollback { .. }) => "rollback_failed",
            Err(_) => "rolled_back",
        };
        span.record("outcome", outcome);
        metrics::increment_command_total(operation, outcome);
        result
    }

    async fn run<T, F>(&self, plan: F) -> EngineResult<(T, Vec<Mapping>)>
    where
        F: FnOnce(&HostingModel) -> EngineResult<Plan<T>>,
    {
        let _guard = self.command_lock.lock().await;

        let mut phase = CommandPhase::Validating;
        debug!(%phase, "command started");
        let before = self.store.snapshot().await?;
        let Plan { writes, output } = plan(before.as_ref())?;

        phase = CommandPhase::Persisting;
        debug!(%phase, writes = writes.len());
        let written = match self.persist(writes).await {
            Ok(written) => written,
            Err(e) => {
                let cause = EngineError::Persistence(e);
                return Err(self.roll_back(phase, cause, &before, None, &[]).await);
            }
        };

        phase = CommandPhase::Synthesizing;
        debug!(%phase);
        let previous = match self.synthesizer.synthesize(&before) {
            Ok(artifacts) => Some(artifacts),
            Err(e) => {
                warn!(error = %e, "previous configuration cannot be rendered");
                None
            }
        };
        let after = match self.store.snapshot().await {
            Ok(after) => after,
            Err(e) => {
                let cause = EngineError::Persistence(e);
                return Err(self.roll_back(phase, cause, &before, previous.as_ref(), &[]).await);
            }
        };
        let next = match self.synthesizer.synthesize(&after) {
            Ok(next) => next,
            Err(e) => {
                let cause = EngineError::Synthesis(e);
                return Err(self.roll_back(phase, cause, &before, previous.as_ref(), &[]).await);
            }
        };
        let empty = ArtifactSet::default();
        let diff = ArtifactSet::diff(previous.as_ref().unwrap_or(&empty), &next);

        phase = CommandPhase::Applying;
        debug!(%phase, changed = diff.changed.len(), removed = diff.removed.len());
        let mut touched: Vec<Fqdn> = Vec::with_capacity(diff.changed.len() + diff.removed.len());
        for artifact in &diff.changed {
            touched.push(artifact.hostname.clone());
            let applied =
                bounded(self.timeouts.apply, self.serving.apply_config(artifact)).await;
            if let Err(source) = applied {
                let cause = EngineError::Apply {
                    hostname: artifact.hostname.to_string(),
                    source,
                };
                return Err(self
                    .roll_back(phase, cause, &before, previous.as_ref(), &touched)
                    .await);
            }
        }
        for hostname in &diff.removed {
            touched.push(hostname.clone());
            let removed = bounded(self.timeouts.apply, self.serving.remove_config(hostname)).await;
            if let Err(source) = removed {
                let cause = EngineError::Apply {
                    hostname: hostname.to_string(),
                    source,
                };
                return Err(self
                    .roll_back(phase, cause, &before, previous.as_ref(), &touched)
                    .await);
            }
        }

        if !diff.is_empty() {
            phase = CommandPhase::Reloading;
            debug!(%phase);
            if let Err(e) = bounded(self.timeouts.reload, self.serving.reload()).await {
                let cause = EngineError::Reload(e);
                return Err(self
                    .roll_back(phase, cause, &before, previous.as_ref(), &touched)
                    .await);
            }
        }

        phase = CommandPhase::Committed;
        metrics::set_configuration_size(after.virtual_host_count(), after.mappings().count());
        info!(%phase, changed = diff.changed.len(), removed = diff.removed.len(), "command committed");
        Ok((output, written))
    }

    async fn persist(&self, writes: Vec<Write>) -> StoreResult<Vec<Mapping>> {
        let mut written = Vec::new();
        for write in writes {
            match write {
                Write::PutVirtualHost(vhost) => self.store.write_virtual_host(&vhost).await?,
                Write::NewMapping(draft) => {
                    let id = self.store.allocate_mapping_id().await?;
                    let mapping = draft.into_mapping(id);
                    self.store.write_mapping(&mapping).await?;
                    written.push(mapping);
                }
                Write::PutMapping(mapping) => {
                    self.store.write_mapping(&mapping).await?;
                    written.push(mapping);
                }
                Write::DeleteMapping(id) => self.store.delete_mapping(id).await?,
                Write::DeleteVirtualHost(hostname) => {
                    self.store.delete_virtual_host(&hostname).await?
                }
            }
        }
        Ok(written)
    }

    /// Undo a failed command and return the error to report.
    ///
    /// The serving layer is reloaded once more only when the reload itself
    /// failed: a timed-out reload may already have been picked up by the
    /// running process. Earlier failures never reached a reload.
    async fn roll_back(
        &self,
        failed: CommandPhase,
        cause: EngineError,
        before: &Arc<HostingModel>,
        previous: Option<&ArtifactSet>,
        touched: &[Fqdn],
    ) -> EngineError {
        warn!(phase = %CommandPhase::RollingBack, failed_phase = %failed, error = %cause, "rolling back command");
        metrics::increment_rollback_total(failed.as_str());

        let mut failures = Vec::new();
        if let Err(e) = self.store.restore(Arc::clone(before)).await {
            failures.push(format!("store restore failed: {e}"));
        }

        match previous {
            Some(previous) => {
                for hostname in touched {
                    let restored = match previous.get(hostname) {
                        Some(artifact) => {
                            bounded(self.timeouts.apply, self.serving.apply_config(artifact)).await
                        }
                        None => {
                            bounded(self.timeouts.apply, self.serving.remove_config(hostname))
                                .await
                        }
                    };
                    if let Err(e) = restored {
                        failures.push(format!("restoring configuration of {hostname} failed: {e}"));
                    }
                }
                if failed == CommandPhase::Reloading {
                    if let Err(e) = bounded(self.timeouts.reload, self.serving.reload()).await {
                        failures.push(format!("reloading the restored configuration failed: {e}"));
                    }
                }
            }
            None if !touched.is_empty() => {
                failures.push("previous configuration cannot be rendered".to_string());
            }
            None => {}
        }

        if failures.is_empty() {
            debug!(phase = %CommandPhase::RolledBack);
            return cause;
        }

        let reason = failures.join("; ");
        error!(error = %cause, %reason, "rollback failed, manual intervention required");
        EngineError::Rollback {
            cause: Box::new(cause),
            reason,
        }
    }
}

/// Run a serving-layer call, turning an elapsed deadline into a timeout error.
async fn bounded<F>(limit: Duration, call: F) -> ServingResult<()>
where
    F: Future<Output = ServingResult<()>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(ServingError::Timeout(limit)))
}

fn single_mapping(written: Vec<Mapping>) -> EngineResult<Mapping> {
    written.into_iter().next().ok_or_else(|| {
        EngineError::Persistence(StoreError::Unavailable(
            "store did not report the written mapping".to_string(),
        ))
    })
}

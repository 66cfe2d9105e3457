//! Structural invariants over the whole configuration.
//!
//! Everything here is a pure function of a [`HostingModel`] snapshot: a check
//! either passes or explains why the requested change would leave the
//! configuration ambiguous or inconsistent. Nothing is mutated.
use serde::Serialize;
use thiserror::Error;

use crate::core::model::{
    Fqdn, HostingModel, Mapping, MappingDraft, MappingId, VirtualHost, VirtualHostType,
};

/// Reasons a change is rejected by the invariant checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantError {
    /// The change contradicts existing state
    #[error("{0}")]
    Conflict(String),

    /// The change references something that does not exist
    #[error("{0}")]
    NotFound(String),
}

pub type InvariantResult<T> = Result<T, InvariantError>;

/// Hosts and mappings removed together by one virtual host deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CascadeSet {
    pub virtual_hosts: Vec<Fqdn>,
    pub mappings: Vec<MappingId>,
}

/// Registry answer for the service a mapping target points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAvailability {
    NotReferenced,
    Installed,
    Missing,
}

pub struct InvariantValidator;

impl InvariantValidator {
    /// A new host must have a unique name; an alias must hang off an existing
    /// top-level host.
    pub fn validate_create_virtual_host(
        model: &HostingModel,
        vhost: &VirtualHost,
    ) -> InvariantResult<()> {
        if model.virtual_host(vhost.hostname()).is_some() {
            return Err(InvariantError::Conflict(format!(
                "virtual host {} already exists",
                vhost.hostname()
            )));
        }

        if let Some(parent_name) = vhost.parent_hostname() {
            let parent = model.virtual_host(parent_name).ok_or_else(|| {
                InvariantError::NotFound(format!("parent virtual host {parent_name} not found"))
            })?;
            if parent.kind() != VirtualHostType::TopLevel {
                return Err(InvariantError::Conflict(format!(
                    "parent virtual host {parent_name} is {}, aliases must point at a top-level host",
                    parent.kind()
                )));
            }
        }

        Ok(())
    }

    /// Work out everything a host deletion removes.
    ///
    /// Deleting a top-level host takes its aliases with it; every removed host
    /// takes its own mappings. A cascade that would remove the primary host is
    /// rejected while any host outside the cascade exists.
    pub fn plan_virtual_host_deletion(
        model: &HostingModel,
        hostname: &Fqdn,
        primary: Option<&Fqdn>,
    ) -> InvariantResult<CascadeSet> {
        let vhost = model
            .virtual_host(hostname)
            .ok_or_else(|| InvariantError::NotFound(format!("virtual host {hostname} not found")))?;

        let mut virtual_hosts = vec![vhost.hostname().clone()];
        if vhost.kind() == VirtualHostType::TopLevel {
            virtual_hosts.extend(model.aliases_of(hostname).map(|alias| alias.hostname().clone()));
        }

        // The primary may only go when it takes the last hosts with it
        let survivors = model.virtual_host_count() > virtual_hosts.len();
        if let Some(primary) = primary.filter(|p| survivors && virtual_hosts.contains(p)) {
            return Err(InvariantError::Conflict(format!(
                "{primary} is the primary virtual host and cannot be deleted while other virtual hosts exist"
            )));
        }

        let mappings = model
            .mappings()
            .filter(|m| virtual_hosts.contains(&m.hostname))
            .map(|m| m.id)
            .collect();

        Ok(CascadeSet {
            virtual_hosts,
            mappings,
        })
    }

    pub fn validate_create_mapping(
        model: &HostingModel,
        draft: &MappingDraft,
        service: ServiceAvailability,
    ) -> InvariantResult<()> {
        Self::validate_mapping(model, draft, service, None)
    }

    /// Same rules as creation, ignoring the mapping being replaced.
    pub fn validate_update_mapping(
        model: &HostingModel,
        id: MappingId,
        draft: &MappingDraft,
        service: ServiceAvailability,
    ) -> InvariantResult<()> {
        let existing = Self::validate_delete_mapping(model, id)?;
        if existing.hostname != draft.hostname {
            return Err(InvariantError::Conflict(format!(
                "mapping {id} belongs to {}, it cannot be moved to {}",
                existing.hostname, draft.hostname
            )));
        }
        Self::validate_mapping(model, draft, service, Some(id))
    }

    pub fn validate_delete_mapping(
        model: &HostingModel,
        id: MappingId,
    ) -> InvariantResult<&Mapping> {
        model
            .mapping(id)
            .ok_or_else(|| InvariantError::NotFound(format!("mapping {id} not found")))
    }

    fn validate_mapping(
        model: &HostingModel,
        draft: &MappingDraft,
        service: ServiceAvailability,
        replacing: Option<MappingId>,
    ) -> InvariantResult<()> {
        let root = model.block_root(&draft.hostname).ok_or_else(|| {
            InvariantError::NotFound(format!("virtual host {} not found", draft.hostname))
        })?;

        if service == ServiceAvailability::Missing {
            let name = draft
                .target
                .service()
                .map(|s| s.name.as_str())
                .unwrap_or_default();
            return Err(InvariantError::NotFound(format!(
                "service '{name}' is not installed"
            )));
        }

        // Aliases render into their parent's server block, so uniqueness is
        // checked across the whole block.
        let duplicate = model.block_mappings(root.hostname()).find(|m| {
            Some(m.id) != replacing && m.path == draft.path && m.match_pattern == draft.match_pattern
        });
        if let Some(existing) = duplicate {
            return Err(InvariantError::Conflict(format!(
                "mapping {} on {} already handles {} {}",
                existing.id, existing.hostname, draft.match_pattern, draft.path
            )));
        }

        Ok(())
    }
}

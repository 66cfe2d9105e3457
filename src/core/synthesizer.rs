//! Rendering of the hosting model into serving-layer configuration.
//!
//! One artifact is produced per server block (a top-level or wildcard host,
//! with its aliases listed in `server_name`). Locations are emitted bucket by
//! bucket, most specific match kind first, and by ascending mapping id inside
//! a bucket; `MappingResolver` applies the same precedence. Rendering is a
//! pure function of the snapshot: the same model always yields byte-identical
//! artifacts.
use std::{collections::BTreeMap, fmt::Write as _};

use serde::Serialize;
use thiserror::Error;

use crate::core::model::{
    Fqdn, HostingModel, Mapping, MappingId, MappingTarget, MatchPattern, VirtualHost,
    VirtualHostType,
};

pub const ARTIFACT_HEADER: &str = "# Managed by vhostd. Manual edits are overwritten.";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SynthesisError {
    #[error("mapping {id} belongs to unknown virtual host {hostname}")]
    OrphanMapping { id: MappingId, hostname: Fqdn },

    #[error("alias {alias} points at {parent}, which is not a top-level virtual host")]
    DanglingAlias { alias: Fqdn, parent: Fqdn },

    #[error("mapping {id} cannot be rendered: {reason}")]
    Unrepresentable { id: MappingId, reason: String },
}

pub type SynthesisResult<T> = Result<T, SynthesisError>;

/// Rendered configuration for one server block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigArtifact {
    pub hostname: Fqdn,
    pub file_name: String,
    pub contents: String,
}

impl ConfigArtifact {
    /// File name for a server block. `*` never occurs in a DNS label and `_`
    /// never does either, so wildcard names cannot collide with real ones.
    pub fn file_name_for(hostname: &Fqdn) -> String {
        format!("{}.conf", hostname.as_str().replace('*', "_"))
    }
}

/// Artifacts keyed by server block hostname.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactSet(BTreeMap<Fqdn, ConfigArtifact>);

/// What has to change on the serving layer to go from one artifact set to
/// another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactDiff {
    pub changed: Vec<ConfigArtifact>,
    pub removed: Vec<Fqdn>,
}

impl ArtifactDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

impl ArtifactSet {
    pub fn get(&self, hostname: &Fqdn) -> Option<&ConfigArtifact> {
        self.0.get(hostname)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigArtifact> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Artifacts in `after` that are new or differ from `before`, and the
    /// server blocks present in `before` but gone from `after`.
    pub fn diff(before: &ArtifactSet, after: &ArtifactSet) -> ArtifactDiff {
        let changed = after
            .iter()
            .filter(|artifact| before.get(&artifact.hostname) != Some(artifact))
            .cloned()
            .collect();
        let removed = before
            .0
            .keys()
            .filter(|hostname| !after.0.contains_key(*hostname))
            .cloned()
            .collect();
        ArtifactDiff { changed, removed }
    }
}

/// Renders nginx-style `server` blocks.
#[derive(Debug, Clone)]
pub struct ConfigSynthesizer {
    listen_port: u16,
}

impl Default for ConfigSynthesizer {
    fn default() -> Self {
        Self { listen_port: 80 }
    }
}

impl ConfigSynthesizer {
    pub fn new(listen_port: u16) -> Self {
        Self { listen_port }
    }

    pub fn synthesize(&self, model: &HostingModel) -> SynthesisResult<ArtifactSet> {
        for vhost in model.virtual_hosts() {
            if let Some(parent) = vhost.parent_hostname() {
                let parent_ok = model
                    .virtual_host(parent)
                    .is_some_and(|p| p.kind() == VirtualHostType::TopLevel);
                if !parent_ok {
                    return Err(SynthesisError::DanglingAlias {
                        alias: vhost.hostname().clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }
        if let Some(orphan) = model
            .mappings()
            .find(|m| model.virtual_host(&m.hostname).is_none())
        {
            return Err(SynthesisError::OrphanMapping {
                id: orphan.id,
                hostname: orphan.hostname.clone(),
            });
        }

        let mut artifacts = BTreeMap::new();
        for root in model.block_roots() {
            let artifact = self.render_block(model, root)?;
            artifacts.insert(artifact.hostname.clone(), artifact);
        }
        Ok(ArtifactSet(artifacts))
    }

    fn render_block(&self, model: &HostingModel, root: &VirtualHost) -> SynthesisResult<ConfigArtifact> {
        let hostname = root.hostname();
        let mut server_names = vec![hostname.as_str()];
        server_names.extend(model.aliases_of(hostname).map(|a| a.hostname().as_str()));

        let mut out = String::new();
        let _ = writeln!(out, "{ARTIFACT_HEADER}");
        let _ = writeln!(out, "server {{");
        let _ = writeln!(out, "    listen {};", self.listen_port);
        let _ = writeln!(out, "    server_name {};", server_names.join(" "));

        let mappings: Vec<&Mapping> = model.block_mappings(hostname).collect();
        for pattern in MatchPattern::ALL {
            for mapping in mappings.iter().filter(|m| m.match_pattern == pattern) {
                out.push('\n');
                render_location(&mut out, mapping)?;
            }
        }
        let _ = writeln!(out, "}}");

        Ok(ConfigArtifact {
            hostname: hostname.clone(),
            file_name: ConfigArtifact::file_name_for(hostname),
            contents: out,
        })
    }
}

fn render_location(out: &mut String, mapping: &Mapping) -> SynthesisResult<()> {
    let path = mapping.path.as_str();
    let selector = match mapping.match_pattern {
        MatchPattern::Equals => format!("= {path}"),
        MatchPattern::BeginsWith => format!("^~ {path}"),
        MatchPattern::Contains => format!("~ {}", regex::escape(path)),
        MatchPattern::EndsWith => format!("~ {}$", regex::escape(path)),
    };

    let directive = match &mapping.target {
        MappingTarget::Url { url } => match url.service() {
            Some(service) => {
                let port = service.port.ok_or_else(|| SynthesisError::Unrepresentable {
                    id: mapping.id,
                    reason: format!("service '{}' has no port to proxy to", service.name),
                })?;
                format!("proxy_pass http://127.0.0.1:{port};")
            }
            None => format!("proxy_pass {};", no_variables(mapping.id, url.as_str())?),
        },
        MappingTarget::InlineResponse { body } => {
            format!("return 200 \"{}\";", quote(no_variables(mapping.id, body.as_str())?))
        }
        MappingTarget::Redirect { location } => {
            format!("return 301 \"{}\";", quote(no_variables(mapping.id, location.as_str())?))
        }
        MappingTarget::ResponseCode { code } => format!("return {code};"),
    };

    let _ = writeln!(out, "    # mapping {}", mapping.id);
    let _ = writeln!(out, "    location {selector} {{");
    let _ = writeln!(out, "        {directive}");
    let _ = writeln!(out, "    }}");
    Ok(())
}

/// nginx interpolates `$name` in these directives and offers no escape.
fn no_variables(id: MappingId, text: &str) -> SynthesisResult<&str> {
    if text.contains('$') {
        return Err(SynthesisError::Unrepresentable {
            id,
            reason: "'$' would be interpreted as a serving-layer variable".to_string(),
        });
    }
    Ok(text)
}

fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            other => quoted.push(other),
        }
    }
    quoted
}

//! Request-path resolution against the mappings of a virtual host.
//!
//! Precedence follows the rendered location blocks, so the serving layer and
//! this resolver always agree:
//!
//! 1. an `equals` mapping that matches wins outright;
//! 2. otherwise the longest matching `begins-with` mapping wins, and no
//!    `contains`/`ends-with` mapping is consulted (`^~` prefix locations);
//! 3. otherwise the first matching `contains`, then `ends-with`, mapping in
//!    ascending id order wins, which is the order regex locations are
//!    emitted and tried in.
//!
//! Remaining ties go to the lowest id. The ordering is total, so the result
//! never depends on iteration order.
use std::cmp::Reverse;

use crate::core::model::{Fqdn, HostingModel, Mapping, MatchPattern, VirtualHost};

pub struct MappingResolver;

impl MappingResolver {
    /// The host whose server block answers for `hostname`.
    ///
    /// Exact names win; an alias resolves to its parent; otherwise a wildcard
    /// host covering the name (`*.example.com` for `api.example.com`) is used.
    pub fn server_block<'a>(model: &'a HostingModel, hostname: &Fqdn) -> Option<&'a VirtualHost> {
        model.block_root(hostname).or_else(|| {
            hostname
                .covering_wildcard()
                .and_then(|wildcard| model.virtual_host(&wildcard))
        })
    }

    /// Select the single mapping that applies to `request_path` on
    /// `hostname`, or `None` when the serving layer's default applies.
    pub fn resolve<'a>(
        model: &'a HostingModel,
        hostname: &Fqdn,
        request_path: &str,
    ) -> Option<&'a Mapping> {
        let root = Self::server_block(model, hostname)?;
        let candidates: Vec<&Mapping> = model
            .block_mappings(root.hostname())
            .filter(|mapping| mapping.matches(request_path))
            .collect();

        MatchPattern::ALL.into_iter().find_map(|pattern| {
            let bucket = candidates
                .iter()
                .copied()
                .filter(|mapping| mapping.match_pattern == pattern);
            match pattern {
                MatchPattern::Equals | MatchPattern::BeginsWith => {
                    bucket.max_by_key(|mapping| (mapping.path.len(), Reverse(mapping.id)))
                }
                MatchPattern::Contains | MatchPattern::EndsWith => {
                    bucket.min_by_key(|mapping| mapping.id)
                }
            }
        })
    }
}

use crate::core::model::Fqdn;

/// PrimaryHostLookup names the host holding the reserved primary status.
pub trait PrimaryHostLookup: Send + Sync + 'static {
    /// `None` when no primary host has been designated.
    fn primary_hostname(&self) -> Option<Fqdn>;
}

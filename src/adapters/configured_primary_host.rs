use crate::{core::model::Fqdn, ports::primary_host::PrimaryHostLookup};

/// Primary host taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredPrimaryHost {
    hostname: Option<Fqdn>,
}

impl ConfiguredPrimaryHost {
    pub fn new(hostname: Option<Fqdn>) -> Self {
        Self { hostname }
    }
}

impl PrimaryHostLookup for ConfiguredPrimaryHost {
    fn primary_hostname(&self) -> Option<Fqdn> {
        self.hostname.clone()
    }
}

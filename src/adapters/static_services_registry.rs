use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::ports::services_registry::ServicesRegistry;

/// Services registry answering from a fixed list of installed service names.
#[derive(Debug, Clone, Default)]
pub struct StaticServicesRegistry {
    installed: BTreeSet<String>,
}

impl StaticServicesRegistry {
    pub fn new<I, S>(installed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            installed: installed.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ServicesRegistry for StaticServicesRegistry {
    async fn exists(&self, service: &str) -> bool {
        self.installed.contains(service)
    }
}

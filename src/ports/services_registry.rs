use async_trait::async_trait;

/// ServicesRegistry answers whether an installed application or service
/// exists, so mappings cannot point at something that is not there.
#[async_trait]
pub trait ServicesRegistry: Send + Sync + 'static {
    async fn exists(&self, service: &str) -> bool;
}

// Integration tests for the protected primary virtual host
mod common;

#[cfg(test)]
mod tests {
    use vhostd::{EngineError, ports::DurableStore};

    use crate::common::{Harness, alias, fqdn, top_level};

    #[tokio::test]
    async fn test_primary_flag_is_unique() {
        let harness = Harness::new(Some("example.com")).await;
        let engine = &harness.engine;
        engine.create_virtual_host(top_level("example.com")).await.unwrap();
        engine.create_virtual_host(top_level("other.org")).await.unwrap();
        engine
            .create_virtual_host(alias("www.other.org", "other.org"))
            .await
            .unwrap();

        let tree = engine.read_virtual_hosts_with_mappings().await.unwrap();
        let primaries: Vec<_> = tree.iter().filter(|block| block.is_primary).collect();
        assert_eq!(primaries.len(), 1);
        assert_eq!(primaries[0].virtual_host.hostname(), &fqdn("example.com"));
    }

    #[tokio::test]
    async fn test_primary_cannot_be_deleted_while_others_exist() {
        let harness = Harness::new(Some("example.com")).await;
        let engine = &harness.engine;
        engine.create_virtual_host(top_level("example.com")).await.unwrap();
        engine.create_virtual_host(top_level("other.org")).await.unwrap();
        let before = harness.store_bytes();

        let err = engine.delete_virtual_host(&fqdn("example.com")).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        assert!(err.is_user_error());
        assert_eq!(harness.store_bytes(), before);

        engine.delete_virtual_host(&fqdn("other.org")).await.unwrap();
        engine.delete_virtual_host(&fqdn("example.com")).await.unwrap();
        assert!(harness.store.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_primary_alias_blocks_deletion_too() {
        let harness = Harness::new(Some("www.example.com")).await;
        let engine = &harness.engine;
        engine.create_virtual_host(top_level("example.com")).await.unwrap();
        engine
            .create_virtual_host(alias("www.example.com", "example.com"))
            .await
            .unwrap();

        let err = engine
            .delete_virtual_host(&fqdn("www.example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        // The cascade from the parent would remove the primary as well
        engine.create_virtual_host(top_level("other.org")).await.unwrap();
        let err = engine
            .delete_virtual_host(&fqdn("example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }
}

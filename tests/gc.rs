//! Garbage collection of settled contracts and inventory clearing.

mod common;

use std::sync::Arc;

use audit_node::{Clock, GarbageCollector, TagStore};
use common::{address, node, node_with, TestNode, T0};

const SECS: i64 = 1000;

async fn collector(node: &TestNode) -> GarbageCollector {
    let tags = Arc::new(TagStore::new(node.config.tags_dir()).await.unwrap());
    let clock: Arc<dyn Clock> = node.clock.clone();
    GarbageCollector::new(node.services.db.clone(), tags, clock, &node.config.gc)
}

#[tokio::test]
async fn test_settled_contracts_are_collected_after_retention() {
    let node = node_with(1024, 1024, 1024, |config| config.gc.retention_secs = 60).await;
    node.maintainer.reconcile_once().await.unwrap();
    let gc = collector(&node).await;

    let issued = node
        .services
        .tokens
        .create_token(&address(0), "10.5.0.1", None, None)
        .unwrap();
    let chunks = node
        .services
        .contracts
        .grant_chunks(issued.token.clone(), "10.5.0.1".into(), None)
        .await
        .unwrap();
    assert_eq!(chunks.len(), 1);

    // Live contract: nothing to do
    assert_eq!(gc.run_once().await.unwrap().contracts, 0);

    // Expired at T0+300s but not yet folded into the uptime summary
    node.clock.set(T0 + 400 * SECS);
    assert_eq!(gc.run_once().await.unwrap().contracts, 0);

    node.services.status.show(&issued.farmer_id).unwrap();
    let report = gc.run_once().await.unwrap();
    assert_eq!(report.contracts, 1);
    assert_eq!(report.files, 1);
    assert_eq!(report.tags, 1);

    let stats = node.services.db.stats().unwrap();
    assert_eq!(stats.contracts, 0);
    assert_eq!(stats.files, 0);

    // Uptime survives the deletion
    let status = node.services.status.show(&issued.farmer_id).unwrap();
    assert!((status.uptime - 0.75).abs() < 1e-9);
}

#[tokio::test]
async fn test_retention_holds_recent_settlements() {
    let node = node_with(1024, 1024, 1024, |config| config.gc.retention_secs = 3600).await;
    node.maintainer.reconcile_once().await.unwrap();
    let gc = collector(&node).await;

    let issued = node
        .services
        .tokens
        .create_token(&address(1), "10.5.0.2", None, None)
        .unwrap();
    node.services
        .contracts
        .grant_chunks(issued.token.clone(), "10.5.0.2".into(), None)
        .await
        .unwrap();

    node.clock.set(T0 + 400 * SECS);
    node.services.status.show(&issued.farmer_id).unwrap();
    assert_eq!(gc.run_once().await.unwrap().contracts, 0);
    assert_eq!(node.services.db.stats().unwrap().contracts, 1);
}

#[tokio::test]
async fn test_clear_inventory_drops_idle_chunks_only() {
    let node = node(1024, 1024, 3 * 1024).await;
    node.maintainer.reconcile_once().await.unwrap();
    let gc = collector(&node).await;

    let issued = node
        .services
        .tokens
        .create_token(&address(2), "10.5.0.3", None, None)
        .unwrap();
    let granted = node
        .services
        .contracts
        .grant_chunks(issued.token.clone(), "10.5.0.3".into(), Some(1024))
        .await
        .unwrap();
    assert_eq!(granted.len(), 1);

    let report = gc.clear_inventory().await.unwrap();
    assert_eq!(report.files, 2);
    assert_eq!(report.tags, 2);

    let stats = node.services.db.stats().unwrap();
    assert_eq!(stats.chunks, 0);
    assert_eq!(stats.files, 1);
    assert_eq!(stats.contracts, 1);

    // The maintainer restocks what was cleared
    assert_eq!(node.maintainer.reconcile_once().await.unwrap(), 3);
}

//! Two instances over one store: the leader publishes the cluster target,
//! the follower applies its sorted-position share.

mod support;

use babelgrid_cluster::SCALING_DECISION_KEY;
use babelgrid_store::Store;
use babelgrid_tasks::QUEUE_KEY;
use babelgrid_store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use support::{quiet_pool, stack_on, StubBackend};

#[tokio::test]
async fn test_two_instances_split_a_scale_up() {
    let store = Arc::new(MemoryStore::new());
    // Plenty of credential capacity on both keyrings (they see the same
    // counters, different key ids).
    let stack_a = stack_on(store.clone(), "key-a", 1000, StubBackend::ok());
    let stack_b = stack_on(store.clone(), "key-b", 1000, StubBackend::ok());

    let pool_a = quiet_pool(&stack_a, "instance-a", 0);
    let pool_b = quiet_pool(&stack_b, "instance-b", 0);
    pool_a.start().await;
    pool_b.start().await;

    // Pressure in (200, 500]: the plan adds 25 workers to a cluster of 0.
    for i in 0..300 {
        store.lpush(QUEUE_KEY, &format!("ghost-{i}")).await.unwrap();
    }

    // instance-a wins the lock and leads; instance-b follows the decision.
    pool_a.scale_tick().await;
    pool_b.scale_tick().await;

    let decision = store.hgetall(SCALING_DECISION_KEY).await.unwrap();
    assert_eq!(decision["target_cluster_workers"], "25");
    assert_eq!(decision["leader_instance"], "instance-a");
    assert_eq!(decision["base_target_per_instance"], "12");
    assert_eq!(decision["remainder"], "1");

    // Sorted first gets the remainder worker.
    assert_eq!(pool_a.stats().await.total_workers, 13);
    assert_eq!(pool_b.stats().await.total_workers, 12);

    pool_a.stop().await;
    pool_b.stop().await;
}

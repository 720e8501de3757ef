//! Elastic worker pool with cluster-wide scaling consensus.
//!
//! Each process instance runs a [`WorkerPool`] owning N workers, where each
//! worker claims one task at a time and fans out one provider call per
//! image. Instances coordinate exclusively through the shared store: TTL'd
//! membership sets, heartbeat hashes, and a `SET NX` scaling lock that
//! elects one leader per interval to publish the cluster-wide worker target.
//! Followers read the decision and apply their sorted-position share, so the
//! cluster converges on the target without any instance-to-instance
//! traffic.
//!
//! The scaling table itself lives in [`plan`] as pure functions.

mod config;
pub mod plan;
mod pool;
mod worker;

pub use config::{PoolConfig, PoolConfigBuilder};
pub use pool::{
    PoolStats, WorkerPool, ACTIVE_INSTANCES_KEY, ACTIVE_WORKERS_KEY, CONSECUTIVE_LOW_KEY,
    SCALING_DECISION_KEY, SCALING_LOCK_KEY,
};
pub use worker::WorkerHandle;

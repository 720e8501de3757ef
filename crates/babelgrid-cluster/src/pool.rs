use crate::plan::{instance_share, plan_cluster_target, LowStreak, ScaleInput, ScalingDecision};
use crate::worker::{Worker, WorkerHandle};
use crate::PoolConfig;
use babelgrid_keyring::Keyring;
use babelgrid_provider::Translator;
use babelgrid_store::{Store, StoreError};
use babelgrid_tasks::TaskManager;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Set of live instance ids, TTL-refreshed by heartbeats.
pub const ACTIVE_INSTANCES_KEY: &str = "cluster:active_instances";
/// Set of `{instance}:{worker}` pairs across the cluster.
pub const ACTIVE_WORKERS_KEY: &str = "cluster:active_workers";
/// Leader election for the scaling cycle.
pub const SCALING_LOCK_KEY: &str = "cluster:scaling_lock";
/// The leader's published decision.
pub const SCALING_DECISION_KEY: &str = "cluster:scaling_decision";
/// Hysteresis counter for scale-down.
pub const CONSECUTIVE_LOW_KEY: &str = "cluster:consecutive_low_queue";

fn heartbeat_key(instance_id: &str) -> String {
    format!("instance:heartbeat:{instance_id}")
}

struct WorkerSlot {
    handle: Arc<WorkerHandle>,
    stop: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Instance and cluster statistics for the monitoring endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub instance_id: String,
    pub total_workers: usize,
    pub active_workers: usize,
    pub idle_workers: usize,
    pub tasks_processed: u64,
    pub tasks_successful: u64,
    pub tasks_failed: u64,
    pub cluster_workers: u64,
    pub cluster_instances: u64,
    pub cluster_available_keys: u64,
    pub cluster_max_workers: u64,
    pub queue_pressure: u64,
}

/// Per-instance worker pool participating in cluster-wide scaling.
///
/// Every instance heartbeats its membership; each scaling interval exactly
/// one instance wins `cluster:scaling_lock` and computes the cluster target
/// from queue pressure and credential capacity, publishing the decision for
/// the others. Each instance then applies its sorted-position share of the
/// target. Scale-down stops idle workers first; a busy worker finishes its
/// current task before exiting.
pub struct WorkerPool {
    store: Arc<dyn Store>,
    tasks: Arc<TaskManager>,
    translator: Arc<Translator>,
    keyring: Arc<Keyring>,
    config: PoolConfig,
    instance_id: String,
    workers: Mutex<HashMap<String, WorkerSlot>>,
    shutdown: watch::Sender<bool>,
    loops: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn Store>,
        tasks: Arc<TaskManager>,
        translator: Arc<Translator>,
        keyring: Arc<Keyring>,
        config: PoolConfig,
    ) -> Arc<Self> {
        let instance_id = config.instance_id.clone().unwrap_or_else(|| {
            let hex = Uuid::new_v4().simple().to_string();
            format!("instance-{}", &hex[..8])
        });
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            store,
            tasks,
            translator,
            keyring,
            config,
            instance_id,
            workers: Mutex::new(HashMap::new()),
            shutdown,
            loops: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Registers the instance, starts the minimum workers, and spawns the
    /// scaling, heartbeat, and stale-instance sweep loops.
    pub async fn start(self: &Arc<Self>) {
        self.register_instance().await;
        self.scale_to(self.config.min_workers).await;
        self.spawn_loops();
        tracing::info!(
            instance_id = %self.instance_id,
            workers = self.config.min_workers,
            "worker pool started"
        );
    }

    /// Graceful shutdown: stops every worker (busy ones finish their task),
    /// waits for them, then deregisters from the cluster.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);

        let drained = self.scale_to(0).await;
        for join in drained {
            let _ = join.await;
        }

        let loops: Vec<JoinHandle<()>> = self.loops.lock().unwrap().drain(..).collect();
        for handle in loops {
            let _ = handle.await;
        }

        self.deregister_instance().await;
        tracing::info!(instance_id = %self.instance_id, "worker pool stopped");
    }

    /// One leader-or-follower scaling cycle.
    pub async fn scale_tick(&self) {
        match self
            .store
            .set_nx(SCALING_LOCK_KEY, &self.instance_id, self.config.lock_ttl)
            .await
        {
            Ok(true) => {
                if let Err(err) = self.lead().await {
                    tracing::error!(error = %err, "leading scaling cycle failed");
                }
            }
            Ok(false) => {
                if let Err(err) = self.follow().await {
                    tracing::error!(error = %err, "following scaling decision failed");
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not contend for scaling lock");
            }
        }
    }

    /// Instance plus cluster statistics.
    pub async fn stats(&self) -> PoolStats {
        let (total, active, processed, successful, failed) = {
            let workers = self.workers.lock().await;
            let active = workers.values().filter(|s| s.handle.is_busy()).count();
            (
                workers.len(),
                active,
                workers.values().map(|s| s.handle.processed()).sum(),
                workers.values().map(|s| s.handle.successful()).sum(),
                workers.values().map(|s| s.handle.failed()).sum(),
            )
        };

        let queue = self.tasks.queue_stats().await;
        let capacity = self.keyring.capacity().await;
        let cluster_workers = self.store.scard(ACTIVE_WORKERS_KEY).await.unwrap_or(0);
        let cluster_instances = self.store.scard(ACTIVE_INSTANCES_KEY).await.unwrap_or(0);

        PoolStats {
            instance_id: self.instance_id.clone(),
            total_workers: total,
            active_workers: active,
            idle_workers: total - active,
            tasks_processed: processed,
            tasks_successful: successful,
            tasks_failed: failed,
            cluster_workers,
            cluster_instances,
            cluster_available_keys: capacity.available_keys,
            cluster_max_workers: self.max_cluster_workers(capacity.total_rpm),
            queue_pressure: queue.total,
        }
    }

    fn max_cluster_workers(&self, total_rpm: u64) -> u64 {
        (total_rpm / self.config.rpm_per_worker.max(1)).min(self.config.max_workers as u64)
    }

    async fn lead(&self) -> Result<(), StoreError> {
        let queue = self.tasks.queue_stats().await;
        let capacity = self.keyring.capacity().await;
        let current_workers = self.store.scard(ACTIVE_WORKERS_KEY).await?;
        let consecutive_low = self
            .store
            .get(CONSECUTIVE_LOW_KEY)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let plan = plan_cluster_target(ScaleInput {
            queue_pressure: queue.total,
            current_workers,
            max_capacity: self.max_cluster_workers(capacity.total_rpm),
            consecutive_low,
            min_workers: self.config.min_workers as u64,
        });
        match plan.low_streak {
            LowStreak::Increment => {
                self.store
                    .incr(CONSECUTIVE_LOW_KEY, Some(self.config.low_streak_ttl))
                    .await?;
            }
            LowStreak::Clear => {
                self.store.del(CONSECUTIVE_LOW_KEY).await?;
            }
        }

        let mut instances = self.store.smembers(ACTIVE_INSTANCES_KEY).await?;
        if instances.is_empty() {
            // Membership can lapse between heartbeats; the leader is alive by
            // definition.
            instances.push(self.instance_id.clone());
        }
        let n = instances.len() as u64;

        let decision = ScalingDecision {
            timestamp: Utc::now().to_rfc3339(),
            target_cluster_workers: plan.target,
            base_target_per_instance: plan.target / n,
            remainder: plan.target % n,
            leader_instance: self.instance_id.clone(),
            queue_pressure: queue.total,
        };
        self.store
            .hset(SCALING_DECISION_KEY, &decision.to_fields())
            .await?;
        self.store
            .expire(SCALING_DECISION_KEY, self.config.decision_ttl)
            .await?;

        tracing::info!(
            pressure = queue.total,
            current = current_workers,
            target = plan.target,
            instances = n,
            "led cluster scaling decision"
        );

        let my_target = instance_share(plan.target, &instances, &self.instance_id);
        self.apply_share(my_target as usize, "leader").await;
        Ok(())
    }

    async fn follow(&self) -> Result<(), StoreError> {
        let fields = self.store.hgetall(SCALING_DECISION_KEY).await?;
        if fields.is_empty() {
            return Ok(());
        }
        let Some(decision) = ScalingDecision::from_fields(&fields) else {
            tracing::warn!("malformed scaling decision in store, holding current workers");
            return Ok(());
        };

        let instances = self.store.smembers(ACTIVE_INSTANCES_KEY).await?;
        let my_target = instance_share(
            decision.target_cluster_workers,
            &instances,
            &self.instance_id,
        );
        tracing::debug!(
            target = my_target,
            cluster_target = decision.target_cluster_workers,
            leader = %decision.leader_instance,
            "following cluster scaling decision"
        );
        self.apply_share(my_target as usize, "follower").await;
        Ok(())
    }

    async fn apply_share(&self, target: usize, role: &str) {
        let current = self.workers.lock().await.len();
        if current == target {
            return;
        }
        tracing::info!(role, current, target, "scaling instance workers");
        self.scale_to(target).await;
    }

    /// Adds or removes workers until the instance holds `target`. Returns
    /// join handles of removed workers; callers that need to wait (shutdown)
    /// await them, the scaling path lets busy workers drain in the
    /// background.
    async fn scale_to(&self, target: usize) -> Vec<JoinHandle<()>> {
        let mut workers = self.workers.lock().await;
        while workers.len() < target {
            self.spawn_worker(&mut workers).await;
        }
        if workers.len() > target {
            let excess = workers.len() - target;
            return self.remove_workers(&mut workers, excess);
        }
        Vec::new()
    }

    async fn spawn_worker(&self, workers: &mut HashMap<String, WorkerSlot>) {
        let hex = Uuid::new_v4().simple().to_string();
        let worker_id = format!("worker-{}", &hex[..8]);
        let cluster_id = format!("{}:{}", self.instance_id, worker_id);

        if let Err(err) = self.store.sadd(ACTIVE_WORKERS_KEY, &cluster_id).await {
            tracing::error!(worker_id = %worker_id, error = %err, "could not register worker in cluster");
        }
        let _ = self
            .store
            .expire(ACTIVE_WORKERS_KEY, self.config.worker_ttl)
            .await;

        let handle = Arc::new(WorkerHandle::new(worker_id.clone()));
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = Worker::new(
            Arc::clone(&handle),
            Arc::clone(&self.tasks),
            Arc::clone(&self.translator),
            stop_rx,
            self.config.idle_backoff,
        );

        let store = Arc::clone(&self.store);
        let join = tokio::spawn(async move {
            worker.run().await;
            // Deregister after the loop exits so a busy worker stays visible
            // until its last task settles.
            if let Err(err) = store.srem(ACTIVE_WORKERS_KEY, &cluster_id).await {
                tracing::warn!(error = %err, "could not deregister worker from cluster");
            }
        });

        tracing::debug!(worker_id = %handle.id, "worker added");
        workers.insert(worker_id, WorkerSlot {
            handle,
            stop: stop_tx,
            join,
        });
    }

    /// Signals `count` workers to stop, idle ones first.
    fn remove_workers(
        &self,
        workers: &mut HashMap<String, WorkerSlot>,
        count: usize,
    ) -> Vec<JoinHandle<()>> {
        let mut victims: Vec<String> = workers
            .iter()
            .filter(|(_, slot)| !slot.handle.is_busy())
            .map(|(id, _)| id.clone())
            .take(count)
            .collect();
        if victims.len() < count {
            let more: Vec<String> = workers
                .keys()
                .filter(|id| !victims.contains(*id))
                .take(count - victims.len())
                .cloned()
                .collect();
            victims.extend(more);
        }

        let mut joins = Vec::with_capacity(victims.len());
        for id in victims {
            if let Some(slot) = workers.remove(&id) {
                let _ = slot.stop.send(true);
                tracing::debug!(worker_id = %id, "worker stopping");
                joins.push(slot.join);
            }
        }
        joins
    }

    async fn register_instance(&self) {
        if let Err(err) = self.store.sadd(ACTIVE_INSTANCES_KEY, &self.instance_id).await {
            tracing::error!(error = %err, "could not register instance in cluster");
        }
        let _ = self
            .store
            .expire(ACTIVE_INSTANCES_KEY, self.config.instance_ttl)
            .await;
        self.heartbeat().await;
        tracing::info!(instance_id = %self.instance_id, "instance registered in cluster");
    }

    async fn deregister_instance(&self) {
        let workers = self.workers.lock().await;
        for id in workers.keys() {
            let cluster_id = format!("{}:{}", self.instance_id, id);
            let _ = self.store.srem(ACTIVE_WORKERS_KEY, &cluster_id).await;
        }
        drop(workers);
        let _ = self.store.srem(ACTIVE_INSTANCES_KEY, &self.instance_id).await;
        let _ = self.store.del(&heartbeat_key(&self.instance_id)).await;
        tracing::info!(instance_id = %self.instance_id, "instance deregistered from cluster");
    }

    async fn heartbeat(&self) {
        let (worker_count, active, processed) = {
            let workers = self.workers.lock().await;
            (
                workers.len(),
                workers.values().filter(|s| s.handle.is_busy()).count(),
                workers
                    .values()
                    .map(|s| s.handle.processed())
                    .sum::<u64>(),
            )
        };

        let fields = vec![
            ("timestamp".to_string(), Utc::now().to_rfc3339()),
            ("worker_count".to_string(), worker_count.to_string()),
            ("active_workers".to_string(), active.to_string()),
            ("processed_tasks".to_string(), processed.to_string()),
        ];
        let key = heartbeat_key(&self.instance_id);
        if let Err(err) = self.store.hset(&key, &fields).await {
            tracing::warn!(error = %err, "heartbeat write failed");
            return;
        }
        let _ = self.store.expire(&key, self.config.instance_ttl).await;
        let _ = self.store.sadd(ACTIVE_INSTANCES_KEY, &self.instance_id).await;
        let _ = self
            .store
            .expire(ACTIVE_INSTANCES_KEY, self.config.instance_ttl)
            .await;
    }

    /// Removes instances whose heartbeat is missing or too old, along with
    /// their workers and heartbeat records.
    pub async fn sweep_stale_instances(&self) {
        let instances = match self.store.smembers(ACTIVE_INSTANCES_KEY).await {
            Ok(instances) => instances,
            Err(err) => {
                tracing::warn!(error = %err, "could not list instances for sweep");
                return;
            }
        };

        for instance in instances {
            let heartbeat = self
                .store
                .hgetall(&heartbeat_key(&instance))
                .await
                .unwrap_or_default();
            let stale = if heartbeat.is_empty() {
                true
            } else {
                heartbeat
                    .get("timestamp")
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map_or(true, |ts| {
                        let age = Utc::now() - ts.with_timezone(&Utc);
                        age.to_std().unwrap_or_default() > self.config.stale_after
                    })
            };
            if !stale {
                continue;
            }

            tracing::info!(instance = %instance, "removing stale instance from cluster");
            let _ = self.store.srem(ACTIVE_INSTANCES_KEY, &instance).await;
            if let Ok(all_workers) = self.store.smembers(ACTIVE_WORKERS_KEY).await {
                let prefix = format!("{instance}:");
                for worker in all_workers.iter().filter(|w| w.starts_with(&prefix)) {
                    let _ = self.store.srem(ACTIVE_WORKERS_KEY, worker).await;
                }
            }
            let _ = self.store.del(&heartbeat_key(&instance)).await;
        }
    }

    fn spawn_loops(self: &Arc<Self>) {
        let mut handles = Vec::with_capacity(3);

        {
            let pool = Arc::clone(self);
            let mut shutdown = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(pool.config.scale_check_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => pool.scale_tick().await,
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        {
            let pool = Arc::clone(self);
            let mut shutdown = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(pool.config.heartbeat_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => pool.heartbeat().await,
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        {
            let pool = Arc::clone(self);
            let mut shutdown = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(pool.config.sweep_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => pool.sweep_stale_instances().await,
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        self.loops.lock().unwrap().extend(handles);
    }
}

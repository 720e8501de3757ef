use crate::TaskManager;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Spawns the background loop that periodically fails tasks stuck in the
/// processing set.
///
/// This closes the narrow window between the queue pop and the processing-set
/// add, and recovers tasks whose worker died mid-flight. Errors never stop
/// the loop; it logs and waits for the next tick. The loop exits when
/// `shutdown` flips.
pub fn spawn_reclaimer(
    manager: Arc<TaskManager>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(manager.config().reclaim_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a fresh process does
        // not reclaim before workers have a chance to make progress.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match manager.reclaim_stale().await {
                        Ok(0) => {}
                        Ok(count) => tracing::info!(count, "reclaimed stale tasks"),
                        Err(err) => tracing::error!(error = %err, "stale task reclaim failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("stale task reclaimer stopped");
    })
}

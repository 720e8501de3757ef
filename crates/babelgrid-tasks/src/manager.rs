use crate::{ImageResult, Language, Task, TaskConfig, TaskError, TaskStatus};
use babelgrid_store::Store;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// FIFO queue of pending task ids: pushed left on submit, popped right on
/// claim.
pub const QUEUE_KEY: &str = "translation_queue";
/// Set of task ids currently claimed by some worker.
pub const PROCESSING_KEY: &str = "processing_tasks";

fn task_key(task_id: &str) -> String {
    format!("tasks:{task_id}")
}

fn images_key(task_id: &str) -> String {
    format!("task_images:{task_id}")
}

/// Outcome of processing one image, written back as a partial result.
#[derive(Debug, Clone)]
pub enum ImageOutcome {
    Translated(String),
    Failed(String),
}

/// Queue depth snapshot. "Pressure" for scaling is `total`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub total: u64,
}

/// Creates, persists, claims, and finalizes tasks against the coordination
/// store.
///
/// At-least-once semantics: the pop from the queue and the add to the
/// processing set are two steps, and a worker can die between claim and
/// completion. Both windows are closed by [`reclaim_stale`](Self::reclaim_stale),
/// and partial-result writes are idempotent, so replays converge.
pub struct TaskManager {
    store: Arc<dyn Store>,
    config: TaskConfig,
}

impl TaskManager {
    pub fn new(store: Arc<dyn Store>, config: TaskConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// Persists a new task and enqueues it.
    ///
    /// The record and the image payloads are written before the queue push
    /// so any consumer that observes the id can resolve them.
    pub async fn create_task(
        &self,
        images: &[Vec<u8>],
        target_language: Language,
    ) -> Result<Task, TaskError> {
        let encoded: Vec<String> = images.iter().map(|bytes| BASE64.encode(bytes)).collect();
        let task = Task::new(encoded.len(), target_language);

        self.put_task(&task).await?;
        self.store
            .set(
                &images_key(&task.task_id),
                &serde_json::to_string(&encoded)?,
                Some(self.config.retention),
            )
            .await?;
        self.store.lpush(QUEUE_KEY, &task.task_id).await?;

        tracing::info!(
            task_id = %task.task_id,
            language = %target_language,
            images = task.total_images,
            "task created"
        );
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>, TaskError> {
        let Some(raw) = self.store.get(&task_key(task_id)).await? else {
            return Ok(None);
        };
        let task = serde_json::from_str(&raw).map_err(|err| TaskError::Corrupt {
            task_id: task_id.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Some(task))
    }

    /// Loads the base64 image payloads for a task. Empty when the payloads
    /// have expired or were never written.
    pub async fn load_images(&self, task_id: &str) -> Result<Vec<String>, TaskError> {
        let Some(raw) = self.store.get(&images_key(task_id)).await? else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw).map_err(|err| TaskError::Corrupt {
            task_id: task_id.to_string(),
            reason: format!("image payloads: {err}"),
        })
    }

    /// Claims the next queued task for `worker_id`.
    ///
    /// Blocks for at most the configured claim timeout; `None` means the
    /// queue stayed empty. On success the task is added to the processing
    /// set and stamped PROCESSING with `started_at`.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<String>, TaskError> {
        let Some((_, task_id)) = self
            .store
            .brpop(QUEUE_KEY, self.config.claim_timeout)
            .await?
        else {
            return Ok(None);
        };

        self.store.sadd(PROCESSING_KEY, &task_id).await?;

        if let Some(mut task) = self.get_task(&task_id).await? {
            task.status = TaskStatus::Processing;
            task.worker_id = Some(worker_id.to_string());
            task.started_at = Some(Utc::now());
            self.put_task(&task).await?;
        }

        tracing::info!(worker_id, task_id = %task_id, "task claimed");
        Ok(Some(task_id))
    }

    /// Records the outcome for one image and finalizes the task when every
    /// index has turned terminal.
    ///
    /// Terminal entries are never overwritten, so replaying the same write
    /// is a no-op. Returns `false` when the task record no longer exists.
    pub async fn update_partial_result(
        &self,
        task_id: &str,
        index: usize,
        outcome: ImageOutcome,
    ) -> Result<bool, TaskError> {
        let Some(mut task) = self.get_task(task_id).await? else {
            tracing::warn!(task_id, index, "partial result for unknown task dropped");
            return Ok(false);
        };

        while task.partial_results.len() <= index {
            let next = task.partial_results.len();
            task.partial_results.push(ImageResult::pending(next));
        }

        let now = Utc::now();
        {
            let entry = &mut task.partial_results[index];
            if entry.is_terminal() {
                return Ok(true);
            }
            entry.completed_at = Some(now);
            entry.processing_time = task.started_at.map(|started| seconds_between(started, now));
            match outcome {
                ImageOutcome::Translated(text) => {
                    entry.status = TaskStatus::Completed;
                    entry.translated_text = Some(text);
                }
                ImageOutcome::Failed(error) => {
                    entry.status = TaskStatus::Failed;
                    entry.error = Some(error);
                }
            }
        }

        tracing::debug!(
            task_id,
            index,
            terminal = task.terminal_count(),
            total = task.total_images,
            "partial result recorded"
        );

        if task.terminal_count() >= task.total_images {
            self.finalize(&mut task, now).await?;
        }

        self.put_task(&task).await?;
        Ok(true)
    }

    /// Fails the whole task, marking every still-pending image FAILED with
    /// the same reason so terminal tasks always have terminal partials.
    pub async fn fail_task(
        &self,
        task_id: &str,
        error: &str,
        processing_time: Option<f64>,
    ) -> Result<bool, TaskError> {
        self.store.srem(PROCESSING_KEY, task_id).await?;

        let Some(mut task) = self.get_task(task_id).await? else {
            return Ok(false);
        };

        let now = Utc::now();
        for entry in &mut task.partial_results {
            if !entry.is_terminal() {
                entry.status = TaskStatus::Failed;
                entry.error = Some(error.to_string());
                entry.completed_at = Some(now);
            }
        }
        task.status = TaskStatus::Failed;
        task.error = Some(error.to_string());
        task.completed_at = Some(now);
        task.processing_time = processing_time
            .or_else(|| task.started_at.map(|started| seconds_between(started, now)));

        self.put_task(&task).await?;
        tracing::info!(task_id, error, "task failed");
        Ok(true)
    }

    /// Queue depth, failing soft to zeros so monitoring never errors.
    pub async fn queue_stats(&self) -> QueueStats {
        let pending = self.store.llen(QUEUE_KEY).await.unwrap_or(0);
        let processing = self.store.scard(PROCESSING_KEY).await.unwrap_or(0);
        QueueStats {
            pending,
            processing,
            total: pending + processing,
        }
    }

    /// Advisory wait estimate in seconds for a newly queued task.
    pub async fn estimate_wait_time(&self) -> u64 {
        let pending = match self.store.llen(QUEUE_KEY).await {
            Ok(n) => n,
            Err(_) => return 10,
        };
        if pending == 0 {
            return 0;
        }
        let workers = self.store.scard(PROCESSING_KEY).await.unwrap_or(0).max(1);
        let estimate = (pending as f64
            * self.config.avg_image_seconds
            * self.config.avg_images_per_task as f64
            / workers as f64) as u64;
        estimate.clamp(2, 300)
    }

    /// Fails every claimed task whose `started_at` is older than the
    /// configured maximum processing time, and drops processing-set members
    /// whose record has expired entirely. Returns how many tasks were
    /// reclaimed.
    pub async fn reclaim_stale(&self) -> Result<usize, TaskError> {
        let members = self.store.smembers(PROCESSING_KEY).await?;
        let max = self.config.max_processing_time;
        let mut reclaimed = 0;

        for task_id in members {
            let task = match self.get_task(&task_id).await {
                Ok(task) => task,
                Err(err) => {
                    tracing::warn!(task_id = %task_id, error = %err, "skipping unreadable task during reclaim");
                    continue;
                }
            };
            let Some(task) = task else {
                // Record expired out from under the claim; drop the orphan.
                let _ = self.store.srem(PROCESSING_KEY, &task_id).await;
                continue;
            };
            let Some(started) = task.started_at else {
                continue;
            };

            let elapsed = (Utc::now() - started).to_std().unwrap_or_default();
            if elapsed > max {
                let secs = elapsed.as_secs();
                tracing::warn!(task_id = %task_id, elapsed_s = secs, "reclaiming stale task");
                self.fail_task(
                    &task_id,
                    &format!("timed out after {secs}s"),
                    Some(elapsed.as_secs_f64()),
                )
                .await?;
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn put_task(&self, task: &Task) -> Result<(), TaskError> {
        self.store
            .set(
                &task_key(&task.task_id),
                &serde_json::to_string(task)?,
                Some(self.config.retention),
            )
            .await?;
        Ok(())
    }

    async fn finalize(&self, task: &mut Task, now: DateTime<Utc>) -> Result<(), TaskError> {
        let first_success = task
            .partial_results
            .iter()
            .find(|r| r.status == TaskStatus::Completed)
            .and_then(|r| r.translated_text.clone());

        match first_success {
            Some(text) => {
                task.status = TaskStatus::Completed;
                task.translated_text = Some(text);
            }
            None => {
                task.status = TaskStatus::Failed;
                task.error = task
                    .partial_results
                    .iter()
                    .find_map(|r| r.error.clone())
                    .or_else(|| Some("all images failed".to_string()));
            }
        }
        task.completed_at = Some(now);
        task.processing_time = task
            .started_at
            .map(|started| seconds_between(started, now));

        self.store.srem(PROCESSING_KEY, &task.task_id).await?;
        tracing::info!(
            task_id = %task.task_id,
            status = %task.status,
            processing_time = task.processing_time,
            "task finished"
        );
        Ok(())
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

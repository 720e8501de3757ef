use babelgrid_provider::Translator;
use babelgrid_tasks::{ImageOutcome, TaskManager};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Shared view of one worker, kept by the pool for stats and idle-first
/// scale-down after the worker task itself has been spawned.
#[derive(Debug)]
pub struct WorkerHandle {
    pub id: String,
    busy: AtomicBool,
    processed: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
}

impl WorkerHandle {
    pub(crate) fn new(id: String) -> Self {
        Self {
            id,
            busy: AtomicBool::new(false),
            processed: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn successful(&self) -> u64 {
        self.successful.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// A long-lived claim-and-process loop. One worker owns at most one task at
/// a time; within a task it fans out one concurrent operation per image and
/// waits for all of them to settle, so one image's failure never cancels its
/// siblings.
pub(crate) struct Worker {
    handle: Arc<WorkerHandle>,
    tasks: Arc<TaskManager>,
    translator: Arc<Translator>,
    stop: watch::Receiver<bool>,
    idle_backoff: Duration,
}

impl Worker {
    pub(crate) fn new(
        handle: Arc<WorkerHandle>,
        tasks: Arc<TaskManager>,
        translator: Arc<Translator>,
        stop: watch::Receiver<bool>,
        idle_backoff: Duration,
    ) -> Self {
        Self {
            handle,
            tasks,
            translator,
            stop,
            idle_backoff,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::info!(worker_id = %self.handle.id, "worker started");
        loop {
            if *self.stop.borrow() {
                break;
            }
            match self.tasks.claim_next(&self.handle.id).await {
                Ok(Some(task_id)) => {
                    self.handle.busy.store(true, Ordering::Relaxed);
                    self.process(&task_id).await;
                    self.handle.busy.store(false, Ordering::Relaxed);
                    self.handle.processed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.idle_backoff) => {}
                        _ = self.stop.changed() => {}
                    }
                }
                Err(err) => {
                    tracing::warn!(worker_id = %self.handle.id, error = %err, "claim failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        tracing::info!(worker_id = %self.handle.id, "worker stopped");
    }

    async fn process(&self, task_id: &str) {
        let task = match self.tasks.get_task(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tracing::warn!(task_id, "claimed task has no record");
                let _ = self.tasks.fail_task(task_id, "task record not found", None).await;
                self.handle.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(err) => {
                tracing::error!(task_id, error = %err, "could not load claimed task");
                let _ = self
                    .tasks
                    .fail_task(task_id, &format!("could not load task: {err}"), None)
                    .await;
                self.handle.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let images = match self.tasks.load_images(task_id).await {
            Ok(images) => images,
            Err(err) => {
                tracing::error!(task_id, error = %err, "could not load image payloads");
                let _ = self
                    .tasks
                    .fail_task(task_id, &format!("could not load images: {err}"), None)
                    .await;
                self.handle.failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        if images.is_empty() {
            let _ = self.tasks.fail_task(task_id, "no image data found", None).await;
            self.handle.failed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        tracing::info!(
            worker_id = %self.handle.id,
            task_id,
            images = images.len(),
            "processing task"
        );

        let language = task.target_language;
        let operations = images.into_iter().enumerate().map(|(index, encoded)| {
            let tasks = Arc::clone(&self.tasks);
            let translator = Arc::clone(&self.translator);
            let task_id = task_id.to_string();
            async move {
                let outcome = match BASE64.decode(encoded.as_bytes()) {
                    Ok(bytes) => match translator.translate(bytes, language).await {
                        Ok(translation) => ImageOutcome::Translated(translation.text),
                        Err(err) => ImageOutcome::Failed(err.to_string()),
                    },
                    Err(err) => {
                        ImageOutcome::Failed(format!("failed to decode image {}: {err}", index + 1))
                    }
                };
                let succeeded = matches!(outcome, ImageOutcome::Translated(_));
                if let Err(err) = tasks.update_partial_result(&task_id, index, outcome).await {
                    tracing::error!(task_id = %task_id, index, error = %err, "failed to record partial result");
                }
                succeeded
            }
        });

        let results = join_all(operations).await;
        let succeeded = results.iter().filter(|ok| **ok).count();
        if succeeded > 0 {
            self.handle.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.handle.failed.fetch_add(1, Ordering::Relaxed);
        }
        tracing::info!(
            worker_id = %self.handle.id,
            task_id,
            succeeded,
            failed = results.len() - succeeded,
            "task processed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use babelgrid_keyring::{Credential, Keyring, KeyringConfig, RateLimits};
    use babelgrid_provider::{
        BackendError, PreparedImage, PromptCatalog, TranslateBackend, TranslatorConfig,
    };
    use babelgrid_store::MemoryStore;
    use babelgrid_tasks::{Language, TaskConfig, TaskStatus};
    use image::{DynamicImage, RgbImage};
    use std::collections::HashMap;

    /// Call order is racy under fan-out, so behavior keys off the image
    /// dimensions instead: 5px-wide images hit quota (after a short delay so
    /// sibling images acquire their credential first), everything else
    /// translates.
    struct IndexedBackend;

    #[async_trait]
    impl TranslateBackend for IndexedBackend {
        async fn translate(
            &self,
            _api_key: &str,
            image: &PreparedImage,
            _prompt: &str,
        ) -> Result<String, BackendError> {
            if image.width == 5 {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Err(BackendError::QuotaOrRate("quota exceeded".into()))
            } else {
                Ok(format!("translated-{}", image.width))
            }
        }
    }

    fn png(width: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, 3, image::Rgb([9, 9, 9])));
        let mut out = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    fn fixture() -> (Arc<TaskManager>, Arc<Translator>, Arc<Keyring>) {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let tasks = Arc::new(TaskManager::new(
            store.clone(),
            TaskConfig::builder()
                .claim_timeout(Duration::from_millis(20))
                .build(),
        ));
        let keyring = Arc::new(Keyring::new(
            store,
            vec![
                Credential {
                    id: "k1".into(),
                    api_key: "s1".into(),
                    limits: RateLimits {
                        requests_per_minute: 100,
                        requests_per_day: 1000,
                        tokens_per_minute: 1_000_000,
                    },
                },
                Credential {
                    id: "k2".into(),
                    api_key: "s2".into(),
                    limits: RateLimits {
                        requests_per_minute: 100,
                        requests_per_day: 1000,
                        tokens_per_minute: 1_000_000,
                    },
                },
            ],
            KeyringConfig::default(),
        ));
        let mut prompts = HashMap::new();
        prompts.insert(Language::English, "Translate:".to_string());
        let translator = Arc::new(Translator::new(
            keyring.clone(),
            Arc::new(IndexedBackend),
            Arc::new(PromptCatalog::from_map(prompts)),
            TranslatorConfig::default().retry_unit(Duration::from_millis(1)),
        ));
        (tasks, translator, keyring)
    }

    #[tokio::test]
    async fn test_worker_fans_out_and_completes_mixed_results() {
        let (tasks, translator, _keyring) = fixture();
        // Image 1 (width 5) fails with quota; 0 and 2 succeed.
        let task = tasks
            .create_task(&[png(4), png(5), png(6)], Language::English)
            .await
            .unwrap();

        let handle = Arc::new(WorkerHandle::new("worker-test".into()));
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = Worker::new(
            handle.clone(),
            tasks.clone(),
            translator,
            stop_rx,
            Duration::from_millis(10),
        );
        let join = tokio::spawn(worker.run());

        let mut done = None;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let current = tasks.get_task(&task.task_id).await.unwrap().unwrap();
            if current.status.is_terminal() {
                done = Some(current);
                break;
            }
        }
        let done = done.expect("task did not finish");

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.partial_results[0].status, TaskStatus::Completed);
        assert_eq!(done.partial_results[1].status, TaskStatus::Failed);
        assert_eq!(done.partial_results[2].status, TaskStatus::Completed);
        assert_eq!(done.terminal_count(), 3);
        assert_eq!(done.translated_text.as_deref(), Some("translated-4"));

        assert_eq!(handle.processed(), 1);
        assert_eq!(handle.successful(), 1);
        assert_eq!(handle.failed(), 0);

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), join)
            .await
            .expect("worker did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_undecodable_payload_fails_that_image_only() {
        let (tasks, translator, _) = fixture();
        // A payload that is valid base64 in the store but not a decodable image.
        let bogus = vec![0u8, 1, 2, 3];
        let mixed = tasks
            .create_task(&[bogus, png(4)], Language::English)
            .await
            .unwrap();

        let handle = Arc::new(WorkerHandle::new("worker-test".into()));
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = Worker::new(
            handle,
            tasks.clone(),
            translator,
            stop_rx,
            Duration::from_millis(10),
        );
        let join = tokio::spawn(worker.run());

        let mut done = None;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let current = tasks.get_task(&mixed.task_id).await.unwrap().unwrap();
            if current.status.is_terminal() {
                done = Some(current);
                break;
            }
        }
        let done = done.expect("task did not finish");

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.partial_results[0].status, TaskStatus::Failed);
        assert!(done.partial_results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("image preparation failed"));
        assert_eq!(done.partial_results[1].status, TaskStatus::Completed);

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), join)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}

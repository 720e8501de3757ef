use babelgrid_tasks::{Task, TaskError, TaskManager};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Configuration for the long-polling [`ResultObserver`].
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// How often the task record is re-read while polling.
    pub poll_interval: Duration,
    /// Upper bound on the client-requested timeout.
    pub max_timeout: Duration,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_timeout: Duration::from_secs(60),
        }
    }
}

/// What a poll resolved to.
#[derive(Debug)]
pub enum Observation {
    /// At least one partial result (or the task itself) is terminal.
    Ready(Task),
    /// The timeout elapsed first; the snapshot plus a wait estimate.
    TimedOut {
        task: Task,
        estimated_wait_time: u64,
    },
}

#[derive(Debug, Error)]
pub enum ObserveError {
    #[error("task not found")]
    NotFound,

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Serves long-polling clients by watching a task record until the first
/// terminal partial result.
///
/// Returning on the *first* terminal index (rather than full completion)
/// surfaces progress of multi-image jobs quickly and amortizes the poll
/// overhead across independent images. Cancellation is the client dropping
/// the connection: the future is simply dropped, the task runs on.
pub struct ResultObserver {
    tasks: Arc<TaskManager>,
    config: ObserverConfig,
}

impl ResultObserver {
    pub fn new(tasks: Arc<TaskManager>, config: ObserverConfig) -> Self {
        Self { tasks, config }
    }

    pub async fn wait(
        &self,
        task_id: &str,
        timeout: Duration,
    ) -> Result<Observation, ObserveError> {
        let timeout = timeout.min(self.config.max_timeout);
        let deadline = Instant::now() + timeout;

        loop {
            let task = self
                .tasks
                .get_task(task_id)
                .await?
                .ok_or(ObserveError::NotFound)?;

            if task.status.is_terminal() || task.terminal_count() > 0 {
                return Ok(Observation::Ready(task));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let estimated_wait_time = self.tasks.estimate_wait_time().await;
                return Ok(Observation::TimedOut {
                    task,
                    estimated_wait_time,
                });
            }
            tokio::time::sleep(self.config.poll_interval.min(remaining)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use babelgrid_store::MemoryStore;
    use babelgrid_tasks::{ImageOutcome, Language, TaskConfig, TaskStatus};

    fn fixture() -> (Arc<TaskManager>, ResultObserver) {
        let tasks = Arc::new(TaskManager::new(
            Arc::new(MemoryStore::new()),
            TaskConfig::builder()
                .claim_timeout(Duration::from_millis(20))
                .build(),
        ));
        let observer = ResultObserver::new(
            tasks.clone(),
            ObserverConfig {
                poll_interval: Duration::from_millis(10),
                max_timeout: Duration::from_secs(5),
            },
        );
        (tasks, observer)
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let (_, observer) = fixture();
        let err = observer
            .wait("missing", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ObserveError::NotFound));
    }

    #[tokio::test]
    async fn test_pending_task_times_out_with_estimate() {
        let (tasks, observer) = fixture();
        let task = tasks
            .create_task(&[vec![1u8; 8]], Language::Vietnamese)
            .await
            .unwrap();

        let started = Instant::now();
        let observation = observer
            .wait(&task.task_id, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));

        match observation {
            Observation::TimedOut {
                task,
                estimated_wait_time,
            } => {
                assert_eq!(task.status, TaskStatus::Pending);
                assert!(estimated_wait_time >= 2);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_first_partial_result_wakes_the_poll() {
        let (tasks, observer) = fixture();
        let task = tasks
            .create_task(&[vec![1u8; 8], vec![2u8; 8]], Language::English)
            .await
            .unwrap();
        tasks.claim_next("w").await.unwrap();

        let writer = {
            let tasks = tasks.clone();
            let task_id = task.task_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                tasks
                    .update_partial_result(&task_id, 0, ImageOutcome::Translated("hi".into()))
                    .await
                    .unwrap();
            })
        };

        let observation = observer
            .wait(&task.task_id, Duration::from_secs(3))
            .await
            .unwrap();
        writer.await.unwrap();

        match observation {
            Observation::Ready(task) => {
                assert_eq!(task.status, TaskStatus::Processing);
                assert_eq!(task.terminal_count(), 1);
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_clamped_to_configured_maximum() {
        let (tasks, _) = fixture();
        let observer = ResultObserver::new(
            tasks.clone(),
            ObserverConfig {
                poll_interval: Duration::from_millis(10),
                max_timeout: Duration::from_millis(50),
            },
        );
        let task = tasks
            .create_task(&[vec![1u8; 8]], Language::Thai)
            .await
            .unwrap();

        let started = Instant::now();
        let observation = observer
            .wait(&task.task_id, Duration::from_secs(600))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(observation, Observation::TimedOut { .. }));
    }
}

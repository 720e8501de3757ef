use crate::observer::ResultObserver;
use babelgrid_cluster::WorkerPool;
use babelgrid_keyring::Keyring;
use babelgrid_store::Store;
use babelgrid_tasks::TaskManager;
use std::sync::Arc;

/// Upload validation limits for the submission endpoint.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    /// Per-file byte limit.
    pub max_upload_size: usize,
    /// Whole-request byte limit.
    pub max_total_size: usize,
    /// Images per task.
    pub max_files: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_upload_size: 10 * 1024 * 1024,
            max_total_size: 50 * 1024 * 1024,
            max_files: 10,
        }
    }
}

/// Handles shared by the HTTP layer. All long-lived state is injected here
/// rather than living in globals, so tests wire the router against
/// in-memory doubles.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub tasks: Arc<TaskManager>,
    pub keyring: Arc<Keyring>,
    pub pool: Arc<WorkerPool>,
    pub observer: Arc<ResultObserver>,
    pub limits: UploadLimits,
}

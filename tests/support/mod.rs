#![allow(dead_code)]

use async_trait::async_trait;
use babelgrid_cluster::{PoolConfig, WorkerPool};
use babelgrid_keyring::{Credential, Keyring, KeyringConfig, RateLimits};
use babelgrid_provider::{
    BackendError, PreparedImage, PromptCatalog, TranslateBackend, Translator, TranslatorConfig,
};
use babelgrid_server::{AppState, ObserverConfig, ResultObserver, UploadLimits};
use babelgrid_store::MemoryStore;
use babelgrid_tasks::{Language, TaskConfig, TaskManager};
use image::{DynamicImage, RgbImage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A small PNG whose width doubles as a test marker: the stub backend keys
/// its behavior off the decoded dimensions, which is stable under the
/// worker's concurrent fan-out (call order is not).
pub fn png(width: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, 3, image::Rgb([7, 7, 7])));
    let mut out = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

/// Backend stub: images of `quota_width` hit the provider's rate limit
/// (after a short delay so sibling images get their credential first);
/// everything else translates to `text-{width}`.
pub struct StubBackend {
    pub quota_width: Option<u32>,
    pub quota_delay: Duration,
}

impl StubBackend {
    pub fn ok() -> Self {
        Self {
            quota_width: None,
            quota_delay: Duration::ZERO,
        }
    }

    pub fn quota_on(width: u32) -> Self {
        Self {
            quota_width: Some(width),
            quota_delay: Duration::from_millis(150),
        }
    }
}

#[async_trait]
impl TranslateBackend for StubBackend {
    async fn translate(
        &self,
        _api_key: &str,
        image: &PreparedImage,
        _prompt: &str,
    ) -> Result<String, BackendError> {
        if self.quota_width == Some(image.width) {
            tokio::time::sleep(self.quota_delay).await;
            return Err(BackendError::QuotaOrRate("quota exceeded".into()));
        }
        Ok(format!("text-{}", image.width))
    }
}

/// One instance's worth of subsystems over a shared in-memory store.
pub struct Stack {
    pub store: Arc<MemoryStore>,
    pub tasks: Arc<TaskManager>,
    pub keyring: Arc<Keyring>,
    pub translator: Arc<Translator>,
    pub observer: Arc<ResultObserver>,
}

pub fn stack(rpm: u32, backend: StubBackend) -> Stack {
    stack_on(Arc::new(MemoryStore::new()), "test-key", rpm, backend)
}

pub fn stack_on(
    store: Arc<MemoryStore>,
    key_id: &str,
    rpm: u32,
    backend: StubBackend,
) -> Stack {
    let tasks = Arc::new(TaskManager::new(
        store.clone(),
        TaskConfig::builder()
            .claim_timeout(Duration::from_millis(20))
            .build(),
    ));
    let keyring = Arc::new(Keyring::new(
        store.clone(),
        vec![Credential {
            id: key_id.to_string(),
            api_key: format!("secret-{key_id}"),
            limits: RateLimits {
                requests_per_minute: rpm,
                requests_per_day: 100_000,
                tokens_per_minute: 10_000_000,
            },
        }],
        KeyringConfig::default(),
    ));
    let mut prompts = HashMap::new();
    for lang in Language::ALL {
        prompts.insert(lang, format!("Translate the image text to {lang}:"));
    }
    let translator = Arc::new(Translator::new(
        keyring.clone(),
        Arc::new(backend),
        Arc::new(PromptCatalog::from_map(prompts)),
        TranslatorConfig::default().retry_unit(Duration::from_millis(1)),
    ));
    let observer = Arc::new(ResultObserver::new(
        tasks.clone(),
        ObserverConfig {
            poll_interval: Duration::from_millis(20),
            max_timeout: Duration::from_secs(10),
        },
    ));
    Stack {
        store,
        tasks,
        keyring,
        translator,
        observer,
    }
}

/// A worker pool over the stack that will not scale or heartbeat on its own
/// during a test (long intervals); drive it with `scale_tick` or rely on the
/// `min_workers` started by `start()`.
pub fn quiet_pool(stack: &Stack, instance_id: &str, min_workers: usize) -> Arc<WorkerPool> {
    WorkerPool::new(
        stack.store.clone(),
        stack.tasks.clone(),
        stack.translator.clone(),
        stack.keyring.clone(),
        PoolConfig::builder()
            .min_workers(min_workers)
            .max_workers(50)
            .scale_check_interval(Duration::from_secs(3600))
            .heartbeat_interval(Duration::from_secs(3600))
            .sweep_interval(Duration::from_secs(3600))
            .idle_backoff(Duration::from_millis(10))
            .instance_id(instance_id)
            .build(),
    )
}

pub fn app_state(stack: &Stack, pool: Arc<WorkerPool>, limits: UploadLimits) -> AppState {
    AppState {
        store: stack.store.clone(),
        tasks: stack.tasks.clone(),
        keyring: stack.keyring.clone(),
        pool,
        observer: stack.observer.clone(),
        limits,
    }
}

pub const BOUNDARY: &str = "babelgrid-test-boundary";

pub enum Part {
    File { name: &'static str, bytes: Vec<u8> },
    Text { name: &'static str, value: String },
}

/// Builds a multipart/form-data body for the submission endpoint.
pub fn multipart_body(parts: Vec<Part>) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File { name, bytes } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"upload.png\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&bytes);
                body.extend_from_slice(b"\r\n");
            }
            Part::Text { name, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

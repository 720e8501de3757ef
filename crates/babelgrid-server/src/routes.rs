use crate::error::ApiError;
use crate::observer::{Observation, ObserveError};
use crate::state::AppState;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use babelgrid_tasks::{ImageResult, Language, Task, TaskStatus};
use chrono::{DateTime, Utc};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    // Slack above the 50 MiB total so the multipart framing itself never
    // trips the body limit before our own validation does.
    let body_limit = state.limits.max_total_size + 1024 * 1024;
    Router::new()
        .route("/translate", post(create_translation_task))
        .route("/translate/result/:task_id", get(get_translation_result))
        .route("/translate/languages", get(get_supported_languages))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct TaskCreatedResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub estimated_processing_time: u64,
}

#[derive(Debug, Serialize)]
pub struct TaskResultResponse {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    pub partial_results: Vec<ImageResult>,
    pub completed_images: usize,
    pub total_images: usize,
    pub progress_percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    pub target_language: Language,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_wait_time: Option<u64>,
}

impl TaskResultResponse {
    fn from_task(task: Task, estimated_wait_time: Option<u64>) -> Self {
        let success = if task.status.is_terminal() {
            Some(task.status == TaskStatus::Completed)
        } else {
            None
        };
        Self {
            task_id: task.task_id.clone(),
            status: task.status,
            success,
            completed_images: task.terminal_count(),
            total_images: task.total_images,
            progress_percentage: task.progress_percentage(),
            translated_text: task.translated_text.clone(),
            target_language: task.target_language,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            processing_time: task.processing_time,
            error: task.error.clone(),
            estimated_wait_time,
            partial_results: task.partial_results,
        }
    }
}

const ALLOWED_FORMATS: [ImageFormat; 6] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Gif,
    ImageFormat::WebP,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
];

async fn create_translation_task(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<TaskCreatedResponse>, ApiError> {
    let mut images: Vec<Vec<u8>> = Vec::new();
    let mut language = Language::Vietnamese;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::Validation(format!("malformed multipart body: {err}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "target_language" {
            let raw = field
                .text()
                .await
                .map_err(|err| ApiError::Validation(format!("unreadable field: {err}")))?;
            language = Language::from_name(raw.trim())
                .ok_or_else(|| ApiError::Validation(format!("unsupported language: {raw}")))?;
            continue;
        }

        if name == "files" || name == "file" || field.file_name().is_some() {
            if images.len() >= state.limits.max_files {
                return Err(ApiError::Validation(format!(
                    "Maximum {} images allowed per request",
                    state.limits.max_files
                )));
            }
            let bytes = field
                .bytes()
                .await
                .map_err(|err| ApiError::Validation(format!("unreadable file part: {err}")))?;
            if bytes.is_empty() {
                return Err(ApiError::Validation(format!(
                    "File {} is empty",
                    images.len() + 1
                )));
            }
            if bytes.len() > state.limits.max_upload_size {
                return Err(ApiError::PayloadTooLarge(format!(
                    "File {} too large. Maximum size: {} bytes",
                    images.len() + 1,
                    state.limits.max_upload_size
                )));
            }
            images.push(bytes.to_vec());
        }
    }

    if images.is_empty() {
        return Err(ApiError::Validation("No file(s) provided".to_string()));
    }
    let total: usize = images.iter().map(Vec::len).sum();
    if total > state.limits.max_total_size {
        return Err(ApiError::PayloadTooLarge(format!(
            "Total files too large. Maximum total size: {} bytes",
            state.limits.max_total_size
        )));
    }

    for (i, bytes) in images.iter().enumerate() {
        let format = image::guess_format(bytes)
            .map_err(|_| ApiError::Validation(format!("Unable to detect file type for file {}", i + 1)))?;
        if !ALLOWED_FORMATS.contains(&format) {
            return Err(ApiError::Validation(format!(
                "Invalid file type for file {}: {format:?}",
                i + 1
            )));
        }
    }

    let task = state
        .tasks
        .create_task(&images, language)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    let estimated_processing_time = state.tasks.estimate_wait_time().await;

    tracing::info!(
        task_id = %task.task_id,
        language = %language,
        images = task.total_images,
        "translation task accepted"
    );

    Ok(Json(TaskCreatedResponse {
        task_id: task.task_id,
        status: TaskStatus::Pending,
        estimated_processing_time,
    }))
}

#[derive(Debug, Deserialize)]
struct ResultParams {
    timeout: Option<u64>,
}

async fn get_translation_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(params): Query<ResultParams>,
) -> Result<Json<TaskResultResponse>, ApiError> {
    let timeout = Duration::from_secs(params.timeout.unwrap_or(60));

    let observation = state.observer.wait(&task_id, timeout).await.map_err(|err| {
        match err {
            ObserveError::NotFound => ApiError::NotFound,
            ObserveError::Task(err) => ApiError::Internal(err.to_string()),
        }
    })?;

    let response = match observation {
        Observation::Ready(task) => TaskResultResponse::from_task(task, None),
        Observation::TimedOut {
            task,
            estimated_wait_time,
        } => TaskResultResponse::from_task(task, Some(estimated_wait_time)),
    };
    Ok(Json(response))
}

async fn get_supported_languages() -> Json<serde_json::Value> {
    let languages: Vec<serde_json::Value> = Language::ALL
        .iter()
        .map(|lang| {
            serde_json::json!({
                "code": lang.code(),
                "name": lang.display_name(),
            })
        })
        .collect();
    Json(serde_json::json!({
        "supported_languages": languages,
        "default": Language::Vietnamese.display_name(),
    }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let store_connected = state.store.ping().await.is_ok();
    let api_keys = state.keyring.key_count();

    let status = if api_keys == 0 {
        "unhealthy"
    } else if !store_connected {
        "degraded"
    } else {
        "healthy"
    };

    Json(serde_json::json!({
        "status": status,
        "service": "babelgrid",
        "version": env!("CARGO_PKG_VERSION"),
        "store_connected": store_connected,
        "api_keys_count": api_keys,
    }))
}

async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let queue = state.tasks.queue_stats().await;
    let pool = state.pool.stats().await;
    let keys = state.keyring.stats().await;

    Json(serde_json::json!({
        "queue": queue,
        "pool": pool,
        "keys": keys,
    }))
}

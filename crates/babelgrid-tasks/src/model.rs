use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state shared by tasks and per-image results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Supported translation targets. Serialized as the human-readable display
/// name, which is also what clients submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "Vietnamese")]
    Vietnamese,
    #[serde(rename = "English")]
    English,
    #[serde(rename = "Japanese")]
    Japanese,
    #[serde(rename = "Korean")]
    Korean,
    #[serde(rename = "Chinese (Simplified)")]
    ChineseSimplified,
    #[serde(rename = "Chinese (Traditional)")]
    ChineseTraditional,
    #[serde(rename = "Spanish")]
    Spanish,
    #[serde(rename = "French")]
    French,
    #[serde(rename = "German")]
    German,
    #[serde(rename = "Portuguese")]
    Portuguese,
    #[serde(rename = "Russian")]
    Russian,
    #[serde(rename = "Thai")]
    Thai,
    #[serde(rename = "Indonesian")]
    Indonesian,
}

impl Language {
    pub const ALL: [Language; 13] = [
        Language::Vietnamese,
        Language::English,
        Language::Japanese,
        Language::Korean,
        Language::ChineseSimplified,
        Language::ChineseTraditional,
        Language::Spanish,
        Language::French,
        Language::German,
        Language::Portuguese,
        Language::Russian,
        Language::Thai,
        Language::Indonesian,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            Language::Vietnamese => "Vietnamese",
            Language::English => "English",
            Language::Japanese => "Japanese",
            Language::Korean => "Korean",
            Language::ChineseSimplified => "Chinese (Simplified)",
            Language::ChineseTraditional => "Chinese (Traditional)",
            Language::Spanish => "Spanish",
            Language::French => "French",
            Language::German => "German",
            Language::Portuguese => "Portuguese",
            Language::Russian => "Russian",
            Language::Thai => "Thai",
            Language::Indonesian => "Indonesian",
        }
    }

    /// Stable machine code used in the languages listing.
    pub fn code(self) -> &'static str {
        match self {
            Language::Vietnamese => "vietnamese",
            Language::English => "english",
            Language::Japanese => "japanese",
            Language::Korean => "korean",
            Language::ChineseSimplified => "chinese_simplified",
            Language::ChineseTraditional => "chinese_traditional",
            Language::Spanish => "spanish",
            Language::French => "french",
            Language::German => "german",
            Language::Portuguese => "portuguese",
            Language::Russian => "russian",
            Language::Thai => "thai",
            Language::Indonesian => "indonesian",
        }
    }

    /// Resolves a client-submitted display name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|l| l.display_name() == name)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Terminal (or pending) outcome for one image within a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResult {
    pub index: usize,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
}

impl ImageResult {
    pub fn pending(index: usize) -> Self {
        Self {
            index,
            status: TaskStatus::Pending,
            translated_text: None,
            error: None,
            completed_at: None,
            processing_time: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A client-submitted batch of 1..10 images with one target language.
///
/// The record is mutated only by the worker that claimed it (and the stale
/// reclaimer); concurrent readers may observe any prefix of indices having
/// turned terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub status: TaskStatus,
    pub target_language: Language,
    pub total_images: usize,
    pub partial_results: Vec<ImageResult>,
    /// First successful translation, kept for single-image clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl Task {
    pub fn new(total_images: usize, target_language: Language) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            status: TaskStatus::Pending,
            target_language,
            total_images,
            partial_results: (0..total_images).map(ImageResult::pending).collect(),
            translated_text: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            processing_time: None,
            worker_id: None,
        }
    }

    /// Number of images that have reached a terminal status.
    pub fn terminal_count(&self) -> usize {
        self.partial_results
            .iter()
            .filter(|r| r.is_terminal())
            .count()
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.total_images == 0 {
            return 0.0;
        }
        self.terminal_count() as f64 / self.total_images as f64 * 100.0
    }
}

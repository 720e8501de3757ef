use crate::PreparedImage;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Provider failures, bucketed by how the keyring should react: quota/rate
/// rejections back the credential off for 10 minutes, auth rejections for an
/// hour, everything else is retried without penalizing the key.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("provider quota or rate limit exhausted: {0}")]
    QuotaOrRate(String),

    #[error("provider rejected credential: {0}")]
    Auth(String),

    #[error("transient provider failure: {0}")]
    Transient(String),
}

/// The single operation babelgrid needs from a multimodal translation
/// provider. Implementations must be stateless with respect to credentials;
/// the key arrives with every call because rotation happens per attempt.
#[async_trait]
pub trait TranslateBackend: Send + Sync {
    async fn translate(
        &self,
        api_key: &str,
        image: &PreparedImage,
        prompt: &str,
    ) -> Result<String, BackendError>;
}

/// REST backend speaking the `generateContent` wire shape.
pub struct RestBackend {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    request_timeout: Duration,
}

impl RestBackend {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            request_timeout: Duration::from_secs(60),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }
}

#[async_trait]
impl TranslateBackend for RestBackend {
    async fn translate(
        &self,
        api_key: &str,
        image: &PreparedImage,
        prompt: &str,
    ) -> Result<String, BackendError> {
        let body = serde_json::json!({
            "contents": [{
                "parts": [
                    {
                        "inline_data": {
                            "mime_type": image.mime_type(),
                            "data": BASE64.encode(&image.data),
                        }
                    },
                    { "text": prompt },
                ]
            }]
        });

        let response = self
            .http
            .post(self.url())
            .timeout(self.request_timeout)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| BackendError::Transient(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let payload: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| BackendError::Transient(format!("malformed response: {err}")))?;

        let text: String = payload
            .candidates
            .into_iter()
            .flat_map(|c| c.content.parts)
            .filter_map(|p| p.text)
            .collect();
        Ok(text)
    }
}

fn classify_status(status: StatusCode, detail: &str) -> BackendError {
    let detail: String = detail.chars().take(300).collect();
    match status.as_u16() {
        429 => BackendError::QuotaOrRate(format!("HTTP 429: {detail}")),
        401 | 403 => BackendError::Auth(format!("HTTP {}: {detail}", status.as_u16())),
        _ => BackendError::Transient(format!("HTTP {}: {detail}", status.as_u16())),
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

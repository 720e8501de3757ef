use crate::{prepare_image, BackendError, PromptCatalog, TranslateBackend};
use babelgrid_keyring::Keyring;
use babelgrid_tasks::Language;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Configuration for the [`Translator`] retry loop.
#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    /// Attempts per `translate` call, each with a freshly selected key.
    pub(crate) max_attempts: u32,
    /// Failure backoff base for quota/rate rejections.
    pub(crate) quota_failure_base: Duration,
    /// Failure backoff base for auth rejections.
    pub(crate) auth_failure_base: Duration,
    /// Unit for the `2^attempt` sleep between attempts.
    pub(crate) retry_unit: Duration,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            quota_failure_base: Duration::from_secs(600),
            auth_failure_base: Duration::from_secs(3600),
            retry_unit: Duration::from_secs(1),
        }
    }
}

impl TranslatorConfig {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn retry_unit(mut self, unit: Duration) -> Self {
        self.retry_unit = unit;
        self
    }
}

/// A successful translation of one image.
#[derive(Debug, Clone)]
pub struct Translation {
    pub text: String,
    pub credential_id: String,
    pub estimated_tokens: u64,
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("no API keys available")]
    NoCredentials,

    #[error("image preparation failed: {0}")]
    InvalidImage(String),

    #[error("provider returned no translation")]
    EmptyResponse,

    #[error("translation failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// Drives one image through the provider: prepares it once, then attempts
/// translation up to `max_attempts` times with exponential backoff, acquiring
/// a credential from the keyring per attempt and feeding outcomes back into
/// its disablement policy.
pub struct Translator {
    keyring: Arc<Keyring>,
    backend: Arc<dyn TranslateBackend>,
    prompts: Arc<PromptCatalog>,
    config: TranslatorConfig,
}

impl Translator {
    pub fn new(
        keyring: Arc<Keyring>,
        backend: Arc<dyn TranslateBackend>,
        prompts: Arc<PromptCatalog>,
        config: TranslatorConfig,
    ) -> Self {
        Self {
            keyring,
            backend,
            prompts,
            config,
        }
    }

    pub fn keyring(&self) -> &Arc<Keyring> {
        &self.keyring
    }

    pub async fn translate(
        &self,
        image_bytes: Vec<u8>,
        language: Language,
    ) -> Result<Translation, TranslateError> {
        let image = prepare_image(image_bytes)
            .await
            .map_err(|err| TranslateError::InvalidImage(err.to_string()))?;
        let prompt = self.prompts.get(language).to_string();

        let mut last_error = String::new();
        for attempt in 1..=self.config.max_attempts {
            let Some(cred) = self.keyring.select().await else {
                return Err(TranslateError::NoCredentials);
            };

            match self.backend.translate(&cred.api_key, &image, &prompt).await {
                Ok(raw) => {
                    let text = raw.trim().to_string();
                    if text.is_empty() {
                        tracing::warn!(key = %cred.id, "provider returned empty translation");
                        return Err(TranslateError::EmptyResponse);
                    }
                    let estimated_tokens = estimate_tokens(&prompt, &text);
                    self.keyring.record_usage(&cred, estimated_tokens).await;
                    tracing::debug!(key = %cred.id, attempt, tokens = estimated_tokens, "translation completed");
                    return Ok(Translation {
                        text,
                        credential_id: cred.id,
                        estimated_tokens,
                    });
                }
                Err(err) => {
                    tracing::warn!(key = %cred.id, attempt, error = %err, "translation attempt failed");
                    match &err {
                        BackendError::QuotaOrRate(_) => {
                            self.keyring
                                .mark_failed(&cred, self.config.quota_failure_base)
                                .await;
                        }
                        BackendError::Auth(_) => {
                            self.keyring
                                .mark_failed(&cred, self.config.auth_failure_base)
                                .await;
                        }
                        BackendError::Transient(_) => {}
                    }
                    last_error = err.to_string();
                }
            }

            if attempt < self.config.max_attempts {
                let delay = self.config.retry_unit * 2u32.saturating_pow(attempt);
                tokio::time::sleep(delay).await;
            }
        }

        Err(TranslateError::Exhausted {
            attempts: self.config.max_attempts,
            last_error,
        })
    }
}

/// Word-count proxy for token usage: good enough for the soft TPM bound.
fn estimate_tokens(prompt: &str, response: &str) -> u64 {
    (prompt.split_whitespace().count() + response.split_whitespace().count()) as u64
}

//! Provider adapter for the babelgrid dispatch fabric.
//!
//! Wraps the remote multimodal translation provider behind the
//! [`TranslateBackend`] trait and layers on everything the workers need
//! around it:
//!
//! - **Image preparation** ([`prepare_image`]): content-sniffed decode,
//!   alpha flattened onto white, RGB, longest side capped at 2048px with a
//!   Lanczos3 downscale. All of it runs on the blocking pool, never the I/O
//!   loop.
//! - **Prompt catalog** ([`PromptCatalog`]): per-language prompt text from a
//!   YAML file, with English and built-in fallbacks.
//! - **The retry loop** ([`Translator`]): three attempts with `2^attempt`
//!   backoff, a fresh credential from the keyring per attempt, and provider
//!   errors classified into the buckets the keyring's disablement policy
//!   cares about (quota/rate, auth, transient).

mod backend;
mod prep;
mod prompts;
mod translator;

pub use backend::{BackendError, RestBackend, TranslateBackend};
pub use prep::{prepare_image, PrepareError, PreparedImage, MAX_DIMENSION};
pub use prompts::{PromptCatalog, PromptError, FALLBACK_PROMPT};
pub use translator::{TranslateError, Translation, Translator, TranslatorConfig};

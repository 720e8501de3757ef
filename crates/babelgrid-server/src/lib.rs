//! HTTP surface for the babelgrid dispatch fabric.
//!
//! Exposes task submission (multipart upload), long-polling result
//! retrieval, the language listing, and health/stats endpoints over axum.
//! All long-lived state (store, task manager, keyring, worker pool,
//! observer) is dependency-injected through [`AppState`], which is what lets
//! the integration tests drive the full router against in-memory backends.

mod error;
mod observer;
mod routes;
mod settings;
mod state;

pub use error::ApiError;
pub use observer::{Observation, ObserveError, ObserverConfig, ResultObserver};
pub use routes::{router, TaskCreatedResponse, TaskResultResponse};
pub use settings::Settings;
pub use state::{AppState, UploadLimits};

use thiserror::Error;

/// Errors raised while loading credentials.
///
/// Runtime selection and accounting deliberately do not return errors:
/// counter reads fail open so that an unreachable store degrades rotation
/// quality instead of blocking translation.
#[derive(Debug, Error)]
pub enum KeyringError {
    #[error("failed to read credentials file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse credentials file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

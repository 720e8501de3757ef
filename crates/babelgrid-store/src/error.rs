use thiserror::Error;

/// Errors surfaced by [`Store`](crate::Store) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or the connection was lost.
    #[error("store connection failed: {0}")]
    Connect(String),

    /// The backend rejected or failed a command.
    #[error("store command failed: {0}")]
    Command(String),

    /// The value at `key` is not the type the operation expected.
    #[error("wrong value type at {key} for {op}")]
    WrongType { key: String, op: &'static str },

    /// The value at `key` could not be parsed (e.g. a counter that does not
    /// hold an integer).
    #[error("malformed value at {key}: {reason}")]
    Malformed { key: String, reason: String },
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            StoreError::Connect(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = StoreError::WrongType {
            key: "translation_queue".to_string(),
            op: "incr",
        };
        assert_eq!(err.to_string(), "wrong value type at translation_queue for incr");
    }
}

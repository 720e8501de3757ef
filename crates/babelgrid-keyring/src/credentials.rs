use crate::KeyringError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-credential rate limits. Missing values in the credentials file fall
/// back to the keyring defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
    pub tokens_per_minute: u64,
}

/// An API key entry as loaded from the credentials file.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: String,
    pub api_key: String,
    pub limits: RateLimits,
}

#[derive(Deserialize)]
struct RawLimits {
    requests_per_minute: Option<u32>,
    requests_per_day: Option<u32>,
    tokens_per_minute: Option<u64>,
}

#[derive(Deserialize)]
struct RawCredential {
    id: String,
    api_key: String,
    limits: Option<RawLimits>,
}

#[derive(Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    keys: Vec<RawCredential>,
}

/// Loads credentials from a YAML file of the form:
///
/// ```yaml
/// keys:
///   - id: key-1
///     api_key: "..."
///     limits:
///       requests_per_minute: 15
///       requests_per_day: 1500
///       tokens_per_minute: 1000000
/// ```
pub fn load_credentials(path: &Path, defaults: RateLimits) -> Result<Vec<Credential>, KeyringError> {
    let raw = std::fs::read_to_string(path).map_err(|source| KeyringError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let file: CredentialsFile =
        serde_yaml::from_str(&raw).map_err(|source| KeyringError::Parse {
            path: path.display().to_string(),
            source,
        })?;

    let keys: Vec<Credential> = file
        .keys
        .into_iter()
        .map(|raw| Credential {
            id: raw.id,
            api_key: raw.api_key,
            limits: match raw.limits {
                Some(l) => RateLimits {
                    requests_per_minute: l
                        .requests_per_minute
                        .unwrap_or(defaults.requests_per_minute),
                    requests_per_day: l.requests_per_day.unwrap_or(defaults.requests_per_day),
                    tokens_per_minute: l
                        .tokens_per_minute
                        .unwrap_or(defaults.tokens_per_minute),
                },
                None => defaults,
            },
        })
        .collect();

    if keys.is_empty() {
        tracing::warn!(path = %path.display(), "no API keys loaded from credentials file");
    } else {
        tracing::info!(count = keys.len(), "loaded API keys");
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_fills_missing_limits_from_defaults() {
        let dir = std::env::temp_dir().join("babelgrid-keyring-test-load");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("keys.yaml");
        std::fs::write(
            &path,
            r#"
keys:
  - id: key-1
    api_key: aaa
    limits:
      requests_per_minute: 5
  - id: key-2
    api_key: bbb
"#,
        )
        .unwrap();

        let defaults = RateLimits {
            requests_per_minute: 15,
            requests_per_day: 1500,
            tokens_per_minute: 1_000_000,
        };
        let keys = load_credentials(&path, defaults).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].limits.requests_per_minute, 5);
        assert_eq!(keys[0].limits.requests_per_day, 1500);
        assert_eq!(keys[1].limits, defaults);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let defaults = RateLimits {
            requests_per_minute: 15,
            requests_per_day: 1500,
            tokens_per_minute: 1_000_000,
        };
        let err = load_credentials(Path::new("/nonexistent/keys.yaml"), defaults).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/keys.yaml"));
    }
}

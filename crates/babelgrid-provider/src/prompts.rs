use babelgrid_tasks::Language;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Used when neither the requested language nor English has a prompt.
pub const FALLBACK_PROMPT: &str = "Extract all text from the provided image:";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("failed to read prompts file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse prompts file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Translation prompts keyed by target language, loaded from a YAML mapping
/// of language display name to prompt text.
pub struct PromptCatalog {
    prompts: HashMap<Language, String>,
}

impl PromptCatalog {
    pub fn from_file(path: &Path) -> Result<Self, PromptError> {
        let raw = std::fs::read_to_string(path).map_err(|source| PromptError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let entries: HashMap<String, String> =
            serde_yaml::from_str(&raw).map_err(|source| PromptError::Parse {
                path: path.display().to_string(),
                source,
            })?;

        let mut prompts = HashMap::new();
        for (name, prompt) in entries {
            match Language::from_name(&name) {
                Some(language) => {
                    prompts.insert(language, prompt);
                }
                None => {
                    tracing::warn!(language = %name, "unknown language in prompts file, skipping");
                }
            }
        }
        tracing::info!(count = prompts.len(), path = %path.display(), "loaded translation prompts");
        Ok(Self { prompts })
    }

    pub fn from_map(prompts: HashMap<Language, String>) -> Self {
        Self { prompts }
    }

    /// Prompt for `language`, falling back to English and finally to the
    /// built-in extraction prompt.
    pub fn get(&self, language: Language) -> &str {
        if let Some(prompt) = self.prompts.get(&language) {
            return prompt;
        }
        tracing::warn!(language = %language, "no prompt for language, using English fallback");
        self.prompts
            .get(&Language::English)
            .map(String::as_str)
            .unwrap_or(FALLBACK_PROMPT)
    }

    pub fn languages(&self) -> Vec<Language> {
        self.prompts.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_prompts(contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("babelgrid-provider-test-prompts");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("prompts-{}.yaml", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_loads_known_languages_and_skips_unknown() {
        let path = write_prompts(
            r#"
Vietnamese: "Dich sang tieng Viet:"
English: "Translate to English:"
Elvish: "n/a"
"#,
        );
        let catalog = PromptCatalog::from_file(&path).unwrap();
        assert_eq!(catalog.languages().len(), 2);
        assert_eq!(catalog.get(Language::Vietnamese), "Dich sang tieng Viet:");
    }

    #[test]
    fn test_missing_language_falls_back_to_english_then_builtin() {
        let mut map = HashMap::new();
        map.insert(Language::English, "Translate to English:".to_string());
        let catalog = PromptCatalog::from_map(map);
        assert_eq!(catalog.get(Language::Thai), "Translate to English:");

        let empty = PromptCatalog::from_map(HashMap::new());
        assert_eq!(empty.get(Language::Thai), FALLBACK_PROMPT);
    }
}

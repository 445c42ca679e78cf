use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{MemoryError, Result};

/// Top-level engine configuration.
///
/// Everything has a working default except the two capability descriptors:
/// without [`EmbedderConfig`] the engine runs text-only, and without
/// [`LlmConfig`] the extraction pipeline is unavailable.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MemoryConfig {
    pub storage: StorageConfig,
    /// Embedding model descriptor. `None` disables vector features.
    pub embedder: Option<EmbedderConfig>,
    /// Chat model descriptor for the extraction pipeline. `None` disables
    /// `process_turn`.
    pub llm: Option<LlmConfig>,
    pub prompts: PromptConfig,
    /// Owner identifier used when an operation does not specify one.
    pub default_user_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

/// Descriptor of an embedding model and its provider endpoint.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EmbedderConfig {
    /// Provider kind. Currently `"openai"` (any OpenAI-compatible endpoint).
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Expected vector length. Defaults per model when unset.
    pub dimensions: Option<usize>,
}

/// Descriptor of the chat-completion model used by the pipeline.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider kind. Currently `"openai"` (any OpenAI-compatible endpoint).
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

/// Overridable system-prompt templates. Built-in defaults apply when unset.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PromptConfig {
    pub fact_extraction: Option<String>,
    pub memory_update: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_data_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "text-embedding-3-small".into(),
            endpoint: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            dimensions: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            endpoint: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
        }
    }
}

impl EmbedderConfig {
    /// Vector length for this descriptor: explicit config wins, otherwise
    /// the recognized per-model default.
    pub fn resolved_dimensions(&self) -> usize {
        self.dimensions
            .unwrap_or_else(|| crate::embedding::known_dimensions(&self.model))
    }
}

/// Returns `~/.mnemon/`
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".mnemon")
}

/// Returns the default config file path: `~/.mnemon/config.toml`
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

impl MemoryConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                MemoryError::InvalidInput(format!("failed to read config file: {e}"))
            })?;
            toml::from_str(&contents).map_err(|e| {
                MemoryError::InvalidInput(format!("failed to parse config TOML: {e}"))
            })?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MemoryConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (MNEMON_DB, MNEMON_USER,
    /// MNEMON_EMBEDDING_ENDPOINT, MNEMON_LLM_ENDPOINT).
    ///
    /// The endpoint overrides materialize a default descriptor when the
    /// config file left it unset, so pointing at a local server needs no
    /// TOML at all.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEMON_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MNEMON_USER") {
            self.default_user_id = Some(val);
        }
        if let Ok(val) = std::env::var("MNEMON_EMBEDDING_ENDPOINT") {
            self.embedder.get_or_insert_with(EmbedderConfig::default).endpoint = val;
        }
        if let Ok(val) = std::env::var("MNEMON_LLM_ENDPOINT") {
            self.llm.get_or_insert_with(LlmConfig::default).endpoint = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = MemoryConfig::default();
        assert!(config.embedder.is_none());
        assert!(config.llm.is_none());
        assert!(config.storage.db_path.ends_with("memory.db"));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
default_user_id = "alice"

[storage]
db_path = "/tmp/test.db"

[embedder]
model = "nomic-embed-text"
endpoint = "http://localhost:11434/v1"

[llm]
model = "gpt-4o-mini"
"#;
        let config: MemoryConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.default_user_id.as_deref(), Some("alice"));

        let embedder = config.embedder.unwrap();
        assert_eq!(embedder.model, "nomic-embed-text");
        assert_eq!(embedder.endpoint, "http://localhost:11434/v1");
        // defaults still apply for unset fields
        assert_eq!(embedder.api_key_env, "OPENAI_API_KEY");
        assert_eq!(embedder.resolved_dimensions(), 768);
    }

    #[test]
    fn explicit_dimensions_override_model_default() {
        let embedder = EmbedderConfig {
            model: "text-embedding-3-large".into(),
            dimensions: Some(256),
            ..EmbedderConfig::default()
        };
        assert_eq!(embedder.resolved_dimensions(), 256);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = MemoryConfig::default();
        std::env::set_var("MNEMON_DB", "/tmp/override.db");
        std::env::set_var("MNEMON_USER", "env-user");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.default_user_id.as_deref(), Some("env-user"));

        // Clean up
        std::env::remove_var("MNEMON_DB");
        std::env::remove_var("MNEMON_USER");
    }

    #[test]
    fn endpoint_overrides_apply() {
        // One test owns both endpoint vars: parallel tests sharing
        // process env must not interleave set/remove
        std::env::set_var("MNEMON_EMBEDDING_ENDPOINT", "http://localhost:11434/v1");
        std::env::set_var("MNEMON_LLM_ENDPOINT", "http://localhost:1234/v1");

        // Unset descriptors are materialized with defaults
        let mut config = MemoryConfig::default();
        config.apply_env_overrides();
        let embedder = config.embedder.unwrap();
        assert_eq!(embedder.endpoint, "http://localhost:11434/v1");
        assert_eq!(embedder.model, "text-embedding-3-small");
        assert_eq!(config.llm.unwrap().endpoint, "http://localhost:1234/v1");

        // An existing descriptor keeps its other fields
        let mut config = MemoryConfig::default();
        config.embedder = Some(EmbedderConfig {
            model: "nomic-embed-text".into(),
            ..EmbedderConfig::default()
        });
        config.apply_env_overrides();
        let embedder = config.embedder.unwrap();
        assert_eq!(embedder.endpoint, "http://localhost:11434/v1");
        assert_eq!(embedder.model, "nomic-embed-text");

        // Clean up
        std::env::remove_var("MNEMON_EMBEDDING_ENDPOINT");
        std::env::remove_var("MNEMON_LLM_ENDPOINT");
    }
}

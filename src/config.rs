//! Configuration parsing and validation.
//!
//! ragbridge reads a single TOML file (default `./config/ragbridge.toml`):
//!
//! ```toml
//! [db]
//! path = "./data/ragbridge.sqlite"
//!
//! [defaults]
//! llm_provider = "openai"
//! chat_model = "gpt-4o"
//! top_n = 4
//! similarity_threshold = 0.25
//!
//! [embedding]
//! provider = "hashing"     # disabled | openai | hashing
//!
//! [tokenizer]
//! path = "./models/tokenizer.json"
//!
//! [models."openai/gpt-4o"]
//! window = 128000
//! ```
//!
//! `LLM_PROVIDER` and `CHAT_MODEL_PREF` override `[defaults]` once, at load.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ragbridge_core::embedding::HASH_EMBED_DIMS;
use ragbridge_core::models::{DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_TOP_N};
use ragbridge_core::ConnectorDefaults;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
    /// Prompt-window overrides keyed by `"<provider>/<model>"`.
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DefaultsConfig {
    #[serde(default = "default_llm_provider")]
    pub llm_provider: String,
    #[serde(default)]
    pub chat_model: Option<String>,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            llm_provider: default_llm_provider(),
            chat_model: None,
            top_n: default_top_n(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_top_n() -> usize {
    DEFAULT_TOP_N
}
fn default_similarity_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Vector width for this provider. `hashing` falls back to its default.
    pub fn effective_dims(&self) -> usize {
        match (self.provider.as_str(), self.dims) {
            (_, Some(d)) => d,
            ("hashing", None) => HASH_EMBED_DIMS,
            _ => 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenizerConfig {
    /// HuggingFace `tokenizer.json`. Unset means approximate counting.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            path: None,
            chars_per_token: default_chars_per_token(),
        }
    }
}

fn default_chars_per_token() -> usize {
    ragbridge_core::budget::CHARS_PER_TOKEN
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub window: usize,
}

impl Config {
    /// Apply `LLM_PROVIDER` / `CHAT_MODEL_PREF`-style overrides.
    pub fn apply_overrides(&mut self, llm_provider: Option<String>, chat_model: Option<String>) {
        if let Some(provider) = llm_provider.filter(|p| !p.trim().is_empty()) {
            self.defaults.llm_provider = provider;
        }
        if let Some(model) = chat_model.filter(|m| !m.trim().is_empty()) {
            self.defaults.chat_model = Some(model);
        }
    }

    pub fn connector_defaults(&self) -> ConnectorDefaults {
        ConnectorDefaults {
            llm_provider: self.defaults.llm_provider.clone(),
            chat_model: self.defaults.chat_model.clone(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    config.apply_overrides(
        std::env::var("LLM_PROVIDER").ok(),
        std::env::var("CHAT_MODEL_PREF").ok(),
    );
    Ok(config)
}

/// Parse and validate config text. Environment overrides are not applied.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.defaults.top_n == 0 {
        bail!("defaults.top_n must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.defaults.similarity_threshold) {
        bail!("defaults.similarity_threshold must be in [0.0, 1.0]");
    }

    if config.tokenizer.chars_per_token == 0 {
        bail!("tokenizer.chars_per_token must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "hashing" => {}
        "openai" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!("embedding.dims must be > 0 when provider is 'openai'");
            }
            if config.embedding.model.is_none() {
                bail!("embedding.model must be specified when provider is 'openai'");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or hashing.",
            other
        ),
    }

    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }

    for (key, model) in &config.models {
        if !key.contains('/') {
            bail!("models.\"{}\": key must look like \"<provider>/<model>\"", key);
        }
        if model.window == 0 {
            bail!("models.\"{}\".window must be > 0", key);
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/ragbridge.sqlite"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.defaults.llm_provider, "openai");
        assert_eq!(cfg.defaults.top_n, 4);
        assert_eq!(cfg.defaults.similarity_threshold, 0.25);
        assert!(!cfg.embedding.is_enabled());
        assert_eq!(cfg.tokenizer.chars_per_token, 4);
        assert!(cfg.models.is_empty());
    }

    #[test]
    fn test_full_config() {
        let cfg = parse_config(
            r#"
[db]
path = "/tmp/x.sqlite"

[defaults]
llm_provider = "anthropic"
chat_model = "claude-3-5-sonnet"
top_n = 6

[embedding]
provider = "hashing"

[models."ollama/llama3"]
window = 8192
"#,
        )
        .unwrap();
        assert_eq!(cfg.defaults.chat_model.as_deref(), Some("claude-3-5-sonnet"));
        assert_eq!(cfg.embedding.effective_dims(), HASH_EMBED_DIMS);
        assert_eq!(cfg.models["ollama/llama3"].window, 8192);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let err = parse_config(
            r#"
[db]
path = "x"
[defaults]
similarity_threshold = 1.5
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("similarity_threshold"));
    }

    #[test]
    fn test_openai_requires_model_and_dims() {
        let err = parse_config(
            r#"
[db]
path = "x"
[embedding]
provider = "openai"
dims = 1536
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let err = parse_config(
            r#"
[db]
path = "x"
[embedding]
provider = "carrier-pigeon"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_rejects_malformed_model_key() {
        assert!(parse_config(
            r#"
[db]
path = "x"
[models.gpt4]
window = 100
"#,
        )
        .is_err());
    }

    #[test]
    fn test_overrides() {
        let mut cfg = parse_config(MINIMAL).unwrap();
        cfg.apply_overrides(Some("ollama".into()), Some("llama3".into()));
        let defaults = cfg.connector_defaults();
        assert_eq!(defaults.llm_provider, "ollama");
        assert_eq!(defaults.chat_model.as_deref(), Some("llama3"));

        cfg.apply_overrides(Some("".into()), None);
        assert_eq!(cfg.defaults.llm_provider, "ollama");
    }
}

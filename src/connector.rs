//! LLM connectors built from configuration.
//!
//! A connector knows its prompt window and how to count tokens; ragbridge
//! never sends a completion request. Windows come from a small built-in
//! catalog, overridden per model by `[models."<provider>/<model>"]`.
//!
//! Token counting uses a HuggingFace `tokenizer.json` when `[tokenizer].path`
//! is set (feature `hf-tokenizer`), otherwise `ceil(chars / chars_per_token)`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use ragbridge_core::budget::ApproxTokenEncoder;
use ragbridge_core::provider::{ConnectorFactory, ConnectorSpec, LlmConnector, TokenEncoder};

use crate::config::Config;

/// Window used when neither the catalog nor the config knows a model.
pub const FALLBACK_WINDOW: usize = 4_096;

/// Built-in prompt window for `provider`/`model`.
pub fn catalog_window(provider: &str, model: &str) -> usize {
    let model = model.to_ascii_lowercase();
    match provider.to_ascii_lowercase().as_str() {
        "openai" | "azure" => {
            if model.starts_with("gpt-4o") || model.starts_with("gpt-4-turbo") {
                128_000
            } else if model.starts_with("gpt-4.1") {
                1_047_576
            } else if model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4")
            {
                200_000
            } else if model.starts_with("gpt-4-32k") {
                32_768
            } else if model.starts_with("gpt-4") {
                8_192
            } else if model.starts_with("gpt-3.5") {
                16_385
            } else {
                128_000
            }
        }
        "anthropic" => 200_000,
        "gemini" => {
            if model.contains("1.5-pro") {
                2_097_152
            } else {
                1_048_576
            }
        }
        "mistral" => 32_000,
        "groq" => 8_192,
        _ => FALLBACK_WINDOW,
    }
}

/// How connectors count tokens.
#[derive(Debug, Clone)]
pub enum TokenizerSource {
    Approx { chars_per_token: usize },
    #[cfg(feature = "hf-tokenizer")]
    HuggingFace { path: PathBuf },
}

impl TokenizerSource {
    pub fn from_config(config: &Config) -> Self {
        let approx = TokenizerSource::Approx {
            chars_per_token: config.tokenizer.chars_per_token,
        };
        match &config.tokenizer.path {
            None => approx,
            Some(path) => Self::with_path(path.clone()).unwrap_or(approx),
        }
    }

    #[cfg(feature = "hf-tokenizer")]
    fn with_path(path: PathBuf) -> Option<Self> {
        Some(TokenizerSource::HuggingFace { path })
    }

    #[cfg(not(feature = "hf-tokenizer"))]
    fn with_path(path: PathBuf) -> Option<Self> {
        tracing::warn!(
            path = %path.display(),
            "tokenizer.path ignored: built without the hf-tokenizer feature"
        );
        None
    }
}

/// A connector resolved from configuration.
#[derive(Debug, Clone)]
pub struct ConfiguredConnector {
    provider: String,
    model: String,
    window: usize,
    tokenizer: TokenizerSource,
}

impl LlmConnector for ConfiguredConnector {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn prompt_window_limit(&self) -> usize {
        self.window
    }

    fn token_encoder(&self) -> Result<Box<dyn TokenEncoder>> {
        match &self.tokenizer {
            TokenizerSource::Approx { chars_per_token } => {
                Ok(Box::new(ApproxTokenEncoder::new(*chars_per_token)))
            }
            #[cfg(feature = "hf-tokenizer")]
            TokenizerSource::HuggingFace { path } => Ok(Box::new(hf::HfEncoder::load(path)?)),
        }
    }
}

#[cfg(feature = "hf-tokenizer")]
mod hf {
    use std::path::Path;

    use anyhow::{anyhow, Result};
    use ragbridge_core::provider::TokenEncoder;

    /// Loaded per analysis and dropped with the encoder.
    pub struct HfEncoder {
        tokenizer: tokenizers::Tokenizer,
    }

    impl HfEncoder {
        pub fn load(path: &Path) -> Result<Self> {
            let tokenizer = tokenizers::Tokenizer::from_file(path)
                .map_err(|e| anyhow!("failed to load tokenizer {}: {}", path.display(), e))?;
            Ok(Self { tokenizer })
        }
    }

    impl TokenEncoder for HfEncoder {
        fn count_tokens(&self, text: &str) -> Result<usize> {
            let encoding = self
                .tokenizer
                .encode(text, false)
                .map_err(|e| anyhow!("tokenization failed: {}", e))?;
            Ok(encoding.len())
        }
    }
}

/// Builds [`ConfiguredConnector`]s from the catalog plus config overrides.
pub struct ConfiguredConnectorFactory {
    windows: HashMap<String, usize>,
    tokenizer: TokenizerSource,
}

impl ConfiguredConnectorFactory {
    pub fn from_config(config: &Config) -> Self {
        Self {
            windows: config
                .models
                .iter()
                .map(|(key, m)| (key.to_ascii_lowercase(), m.window))
                .collect(),
            tokenizer: TokenizerSource::from_config(config),
        }
    }

    fn window_for(&self, provider: &str, model: &str) -> usize {
        let key = format!("{}/{}", provider, model).to_ascii_lowercase();
        self.windows
            .get(&key)
            .copied()
            .unwrap_or_else(|| catalog_window(provider, model))
    }
}

impl ConnectorFactory for ConfiguredConnectorFactory {
    fn connect(&self, spec: &ConnectorSpec) -> Result<Arc<dyn LlmConnector>> {
        let model = spec.model.clone().unwrap_or_else(|| "default".to_string());
        let window = self.window_for(&spec.provider, &model);
        debug!(provider = %spec.provider, model = %model, window, "resolved connector");
        Ok(Arc::new(ConfiguredConnector {
            provider: spec.provider.clone(),
            model,
            window,
            tokenizer: self.tokenizer.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn factory(extra: &str) -> ConfiguredConnectorFactory {
        let cfg = parse_config(&format!("[db]\npath = \"x\"\n{}", extra)).unwrap();
        ConfiguredConnectorFactory::from_config(&cfg)
    }

    #[test]
    fn test_catalog_windows() {
        assert_eq!(catalog_window("openai", "gpt-4o-mini"), 128_000);
        assert_eq!(catalog_window("openai", "gpt-4"), 8_192);
        assert_eq!(catalog_window("anthropic", "claude-3-haiku"), 200_000);
        assert_eq!(catalog_window("ollama", "llama3"), FALLBACK_WINDOW);
    }

    #[test]
    fn test_config_override_wins() {
        let f = factory("[models.\"ollama/llama3\"]\nwindow = 8192\n");
        let c = f
            .connect(&ConnectorSpec {
                provider: "ollama".into(),
                model: Some("llama3".into()),
            })
            .unwrap();
        assert_eq!(c.prompt_window_limit(), 8192);
        assert_eq!(c.model(), "llama3");
    }

    #[test]
    fn test_approx_encoder_by_default() {
        let f = factory("[tokenizer]\nchars_per_token = 2\n");
        let c = f
            .connect(&ConnectorSpec {
                provider: "openai".into(),
                model: None,
            })
            .unwrap();
        let enc = c.token_encoder().unwrap();
        assert_eq!(enc.count_tokens("abcdef").unwrap(), 3);
    }

    #[cfg(feature = "hf-tokenizer")]
    #[test]
    fn test_missing_tokenizer_file_fails_on_acquire() {
        let f = factory("[tokenizer]\npath = \"/nonexistent/tokenizer.json\"\n");
        let c = f
            .connect(&ConnectorSpec {
                provider: "openai".into(),
                model: Some("gpt-4o".into()),
            })
            .unwrap();
        assert!(c.token_encoder().is_err());
    }
}

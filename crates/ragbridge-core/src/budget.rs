//! Token budget analysis for assembled context.
//!
//! Reports how much of a connector's prompt window the context texts
//! would use. Advisory only: nothing here truncates or reorders context.

use serde::{Serialize, Serializer};

use crate::error::{Error, Result};
use crate::provider::{LlmConnector, TokenEncoder};

/// Separator used when joining context texts for counting.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Usage above this fraction of the window sets the warning flag.
pub const NEAR_EXHAUSTION_RATIO: f64 = 0.8;

/// Approximate chars-per-token ratio used when no tokenizer is configured.
pub const CHARS_PER_TOKEN: usize = 4;

/// Token usage of a context against a prompt window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBudget {
    pub total: usize,
    pub window_limit: usize,
    /// Percentage of the window, rounded to one decimal place.
    #[serde(serialize_with = "serialize_percent")]
    pub percent_of_window: f64,
    /// Set when usage exceeds [`NEAR_EXHAUSTION_RATIO`] of the window.
    pub over_budget_warning: bool,
}

fn serialize_percent<S: Serializer>(value: &f64, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{:.1}%", value))
}

impl TokenBudget {
    /// Compute usage from a token count. `window_limit` must be positive.
    pub fn from_counts(total: usize, window_limit: usize) -> Result<Self> {
        if window_limit == 0 {
            return Err(Error::BudgetAnalysis(
                "prompt window limit must be positive".to_string(),
            ));
        }
        let percent = total as f64 / window_limit as f64 * 100.0;
        Ok(Self {
            total,
            window_limit,
            percent_of_window: (percent * 10.0).round() / 10.0,
            over_budget_warning: total as f64 > window_limit as f64 * NEAR_EXHAUSTION_RATIO,
        })
    }

    /// Percentage formatted for display, e.g. `"90.0%"`.
    pub fn percent_display(&self) -> String {
        format!("{:.1}%", self.percent_of_window)
    }
}

/// Count the tokens of `texts` against `connector`'s window.
///
/// The encoder is acquired for this call only and dropped before
/// returning, on success and on failure alike.
pub fn analyze(texts: &[String], connector: &dyn LlmConnector) -> Result<TokenBudget> {
    let combined = texts.join(CONTEXT_SEPARATOR);
    let total = {
        let encoder = connector
            .token_encoder()
            .map_err(|e| Error::BudgetAnalysis(e.to_string()))?;
        encoder
            .count_tokens(&combined)
            .map_err(|e| Error::BudgetAnalysis(e.to_string()))?
    };
    TokenBudget::from_counts(total, connector.prompt_window_limit())
}

/// Estimates tokens as `ceil(chars / chars_per_token)`.
#[derive(Debug, Clone, Copy)]
pub struct ApproxTokenEncoder {
    chars_per_token: usize,
}

impl ApproxTokenEncoder {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for ApproxTokenEncoder {
    fn default() -> Self {
        Self::new(CHARS_PER_TOKEN)
    }
}

impl TokenEncoder for ApproxTokenEncoder {
    fn count_tokens(&self, text: &str) -> anyhow::Result<usize> {
        let chars = text.chars().count();
        Ok(chars.div_ceil(self.chars_per_token))
    }
}

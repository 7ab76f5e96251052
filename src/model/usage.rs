//! Token accounting and cost estimation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::message::Message;

/// Token counts for a message or a whole session.
///
/// `input` excludes cached reads; sources that report cached tokens as part
/// of their input count are normalized before landing here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_creation: u64,
}

impl TokenUsage {
    /// Sum of all token categories.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input
            .saturating_add(self.output)
            .saturating_add(self.cache_read)
            .saturating_add(self.cache_creation)
    }

    /// Accumulate another usage record into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input = self.input.saturating_add(other.input);
        self.output = self.output.saturating_add(other.output);
        self.cache_read = self.cache_read.saturating_add(other.cache_read);
        self.cache_creation = self.cache_creation.saturating_add(other.cache_creation);
    }

    /// True when every category is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }
}

/// Per-million-token rates for one model family, matched by prefix.
struct ModelRates {
    prefix: &'static str,
    input: f64,
    output: f64,
    cache_read: f64,
    cache_creation: f64,
}

/// Published list rates. More specific prefixes come first; unknown models
/// cost zero rather than guessing.
const RATES: &[ModelRates] = &[
    ModelRates { prefix: "claude-opus-4", input: 15.0, output: 75.0, cache_read: 1.5, cache_creation: 18.75 },
    ModelRates { prefix: "claude-sonnet-4", input: 3.0, output: 15.0, cache_read: 0.3, cache_creation: 3.75 },
    ModelRates { prefix: "claude-3-7-sonnet", input: 3.0, output: 15.0, cache_read: 0.3, cache_creation: 3.75 },
    ModelRates { prefix: "claude-haiku-4", input: 1.0, output: 5.0, cache_read: 0.1, cache_creation: 1.25 },
    ModelRates { prefix: "claude-3-5-haiku", input: 0.8, output: 4.0, cache_read: 0.08, cache_creation: 1.0 },
    ModelRates { prefix: "gpt-5-mini", input: 0.25, output: 2.0, cache_read: 0.025, cache_creation: 0.0 },
    ModelRates { prefix: "gpt-5-nano", input: 0.05, output: 0.4, cache_read: 0.005, cache_creation: 0.0 },
    ModelRates { prefix: "gpt-5", input: 1.25, output: 10.0, cache_read: 0.125, cache_creation: 0.0 },
    ModelRates { prefix: "gpt-4.1-mini", input: 0.4, output: 1.6, cache_read: 0.1, cache_creation: 0.0 },
    ModelRates { prefix: "gpt-4.1", input: 2.0, output: 8.0, cache_read: 0.5, cache_creation: 0.0 },
    ModelRates { prefix: "gpt-4o", input: 2.5, output: 10.0, cache_read: 1.25, cache_creation: 0.0 },
    ModelRates { prefix: "o4-mini", input: 1.1, output: 4.4, cache_read: 0.275, cache_creation: 0.0 },
    ModelRates { prefix: "o3", input: 2.0, output: 8.0, cache_read: 0.5, cache_creation: 0.0 },
    ModelRates { prefix: "codex-mini", input: 1.5, output: 6.0, cache_read: 0.375, cache_creation: 0.0 },
    ModelRates { prefix: "gemini-2.5-pro", input: 1.25, output: 10.0, cache_read: 0.31, cache_creation: 0.0 },
    ModelRates { prefix: "gemini-2.5-flash", input: 0.3, output: 2.5, cache_read: 0.075, cache_creation: 0.0 },
    ModelRates { prefix: "gemini-2.0-flash", input: 0.1, output: 0.4, cache_read: 0.025, cache_creation: 0.0 },
];

fn rates_for(model: &str) -> Option<&'static ModelRates> {
    let model = model.to_ascii_lowercase();
    RATES.iter().find(|r| model.starts_with(r.prefix))
}

/// Estimated dollar cost of `usage` on `model`, zero for unknown models.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn estimate_cost(model: &str, usage: &TokenUsage) -> f64 {
    const MTOK: f64 = 1_000_000.0;
    let Some(rates) = rates_for(model) else {
        return 0.0;
    };
    (usage.input as f64 / MTOK) * rates.input
        + (usage.output as f64 / MTOK) * rates.output
        + (usage.cache_read as f64 / MTOK) * rates.cache_read
        + (usage.cache_creation as f64 / MTOK) * rates.cache_creation
}

/// Estimated cost across a per-model tally.
#[must_use]
pub fn estimate_cost_tally(tally: &HashMap<String, TokenUsage>) -> f64 {
    tally.iter().map(|(m, u)| estimate_cost(m, u)).sum()
}

/// Model with the largest output-token share of a tally.
///
/// Ties break on input tokens, then name, so the result is deterministic.
#[must_use]
pub fn primary_model(tally: &HashMap<String, TokenUsage>) -> Option<String> {
    tally
        .iter()
        .max_by(|(name_a, a), (name_b, b)| {
            (a.output, a.input, name_a).cmp(&(b.output, b.input, name_b))
        })
        .map(|(name, _)| name.clone())
}

/// Aggregated usage for one session, as returned by the `usage` query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageStats {
    pub message_count: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub tool_calls: usize,
    pub tokens: TokenUsage,
    pub per_model: HashMap<String, TokenUsage>,
    pub estimated_cost: f64,
}

impl UsageStats {
    /// Aggregate stats from normalized messages.
    ///
    /// Sources that report usage per message are fully covered by this;
    /// sources with session-level counters override the token totals
    /// afterwards via [`UsageStats::with_totals`].
    #[must_use]
    pub fn from_messages(messages: &[Message]) -> Self {
        let mut stats = UsageStats {
            message_count: messages.len(),
            ..UsageStats::default()
        };
        for message in messages {
            match message.role {
                super::MessageRole::User => stats.user_messages += 1,
                super::MessageRole::Assistant => stats.assistant_messages += 1,
                super::MessageRole::System => {}
            }
            stats.tool_calls += message.tool_calls.len();
            if let Some(usage) = &message.usage {
                stats.tokens.add(usage);
                if let Some(model) = &message.model {
                    stats.per_model.entry(model.clone()).or_default().add(usage);
                }
            }
        }
        stats.estimated_cost = estimate_cost_tally(&stats.per_model);
        stats
    }

    /// Replace token totals with session-level counters.
    #[must_use]
    pub fn with_totals(mut self, tokens: TokenUsage, per_model: HashMap<String, TokenUsage>) -> Self {
        self.tokens = tokens;
        self.estimated_cost = estimate_cost_tally(&per_model);
        self.per_model = per_model;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageRole;

    #[test]
    fn test_token_usage_add_and_total() {
        let mut usage = TokenUsage {
            input: 50,
            output: 20,
            ..TokenUsage::default()
        };
        usage.add(&TokenUsage {
            input: 100,
            output: 50,
            ..TokenUsage::default()
        });
        assert_eq!(usage.input, 150);
        assert_eq!(usage.output, 70);
        assert_eq!(usage.total(), 220);
    }

    #[test]
    fn test_token_usage_add_saturates() {
        let mut usage = TokenUsage {
            input: u64::MAX,
            ..TokenUsage::default()
        };
        usage.add(&TokenUsage {
            input: 1,
            ..TokenUsage::default()
        });
        assert_eq!(usage.input, u64::MAX);
    }

    #[test]
    fn test_estimate_cost_known_model() {
        let usage = TokenUsage {
            input: 1_000_000,
            output: 1_000_000,
            ..TokenUsage::default()
        };
        let cost = estimate_cost("claude-sonnet-4-20250514", &usage);
        assert!((cost - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_cost_unknown_model_is_zero() {
        let usage = TokenUsage {
            input: 1_000_000,
            ..TokenUsage::default()
        };
        assert_eq!(estimate_cost("mystery-model-9000", &usage), 0.0);
    }

    #[test]
    fn test_specific_prefix_wins_over_general() {
        let usage = TokenUsage {
            output: 1_000_000,
            ..TokenUsage::default()
        };
        // gpt-5-mini must not fall through to the gpt-5 rates.
        let cost = estimate_cost("gpt-5-mini-2025-08-07", &usage);
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_primary_model_prefers_output_tokens() {
        let mut tally = HashMap::new();
        tally.insert(
            "claude-sonnet-4".to_string(),
            TokenUsage {
                input: 10,
                output: 500,
                ..TokenUsage::default()
            },
        );
        tally.insert(
            "claude-haiku-4".to_string(),
            TokenUsage {
                input: 9000,
                output: 100,
                ..TokenUsage::default()
            },
        );
        assert_eq!(primary_model(&tally), Some("claude-sonnet-4".to_string()));
    }

    #[test]
    fn test_primary_model_empty_tally() {
        assert_eq!(primary_model(&HashMap::new()), None);
    }

    #[test]
    fn test_usage_stats_from_messages() {
        let messages = vec![
            Message {
                id: Some("u1".to_string()),
                role: MessageRole::User,
                timestamp: None,
                model: None,
                text: "question".to_string(),
                tool_calls: Vec::new(),
                usage: None,
            },
            Message {
                id: Some("a1".to_string()),
                role: MessageRole::Assistant,
                timestamp: None,
                model: Some("claude-sonnet-4".to_string()),
                text: "answer".to_string(),
                tool_calls: Vec::new(),
                usage: Some(TokenUsage {
                    input: 50,
                    output: 20,
                    ..TokenUsage::default()
                }),
            },
        ];
        let stats = UsageStats::from_messages(&messages);
        assert_eq!(stats.message_count, 2);
        assert_eq!(stats.user_messages, 1);
        assert_eq!(stats.assistant_messages, 1);
        assert_eq!(stats.tokens.total(), 70);
        assert_eq!(stats.per_model.len(), 1);
    }
}

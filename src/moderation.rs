//! Adapter around the external toxicity-classification service.
//!
//! Verdicts are cached per team and per agent (keyed by exact input text) by
//! the orchestrator; this module owns the network call and the fail-closed
//! policy: on any transport or parse failure the text is treated as toxic and
//! hidden behind a placeholder, so no agent path ever sees raw toxic text.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::agents::memory::ToxicityVerdict;

/// Scores at or above this mark a category as worth naming in the placeholder
const CATEGORY_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct ModerationConfig {
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl ModerationConfig {
    pub fn from_env() -> Self {
        let base_url = std::env::var("MODERATION_URL").ok().and_then(|url| {
            let trimmed = url.trim();
            (!trimmed.is_empty()).then(|| trimmed.trim_end_matches('/').to_string())
        });

        Self {
            base_url,
            timeout: std::env::var("MODERATION_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(5)),
        }
    }
}

#[derive(Serialize)]
struct AssessRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct AssessResponse {
    is_toxic: bool,
    #[serde(default)]
    detailed_scores: HashMap<String, f64>,
}

pub struct ModerationClient {
    client: reqwest::Client,
    config: ModerationConfig,
}

impl ModerationClient {
    pub fn new(config: ModerationConfig) -> Self {
        if config.base_url.is_none() {
            tracing::warn!("MODERATION_URL not set; human text reaches agent prompts unreviewed");
        }
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// A client with no backend; every text passes through unchanged
    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            config: ModerationConfig {
                base_url: None,
                timeout: Duration::from_secs(1),
            },
        }
    }

    /// Assess a single text. Never errors: failures collapse into a
    /// toxic-and-hidden verdict.
    pub async fn assess(&self, text: &str) -> ToxicityVerdict {
        // No backend means moderation is off entirely; fail-closed only
        // applies when a configured backend misbehaves
        let Some(base_url) = &self.config.base_url else {
            return ToxicityVerdict {
                is_toxic: false,
                display_text: text.to_string(),
            };
        };

        let result = self
            .client
            .post(format!("{}/assess", base_url))
            .timeout(self.config.timeout)
            .json(&AssessRequest { text })
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Moderation request failed: {}, hiding text", e);
                return hidden_verdict(&HashMap::new());
            }
        };

        let parsed: AssessResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Moderation response unreadable: {}, hiding text", e);
                return hidden_verdict(&HashMap::new());
            }
        };

        if parsed.is_toxic {
            hidden_verdict(&parsed.detailed_scores)
        } else {
            ToxicityVerdict {
                is_toxic: false,
                display_text: text.to_string(),
            }
        }
    }
}

/// Short templated placeholder naming the top offending categories; the
/// original text is never echoed.
fn hidden_verdict(scores: &HashMap<String, f64>) -> ToxicityVerdict {
    ToxicityVerdict {
        is_toxic: true,
        display_text: placeholder_for(scores),
    }
}

pub fn placeholder_for(scores: &HashMap<String, f64>) -> String {
    let mut offending: Vec<(&String, f64)> = scores
        .iter()
        .filter(|(_, score)| **score >= CATEGORY_THRESHOLD)
        .map(|(cat, score)| (cat, *score))
        .collect();
    offending.sort_by(|a, b| b.1.total_cmp(&a.1));

    if offending.is_empty() {
        "[removed]".to_string()
    } else {
        let names: Vec<&str> = offending.iter().take(2).map(|(c, _)| c.as_str()).collect();
        format!("[removed: {}]", names.join(", "))
    }
}

mod openai;

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub use openai::OpenAiProvider;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors that can occur during LLM operations. These never propagate into
/// the session mutation path; callers degrade to deterministic fallbacks.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Response parsing failed: {0}")]
    ParseError(String),
}

/// Request to the text-generation backend
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub system: String,
    pub prompt: String,
    /// Image rounds attach the round's image so the model can see it
    pub image_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

/// Raw response from a provider
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub text: String,
    pub model: String,
    pub latency_ms: u64,
}

/// Trait all generation backends implement
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> LlmResult<GenerateResponse>;

    fn name(&self) -> &str;
}

/// Expected reply schema when an agent writes a submission
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionReply {
    pub text: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Expected reply schema when an agent picks a vote target
#[derive(Debug, Clone, Deserialize)]
pub struct VoteReply {
    pub vote_alias: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Strip markdown code fences models like to wrap JSON in
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

/// Parse and validate a submission reply. Anything malformed is discarded by
/// the caller, never trusted.
pub fn parse_submission_reply(raw: &str) -> LlmResult<SubmissionReply> {
    let reply: SubmissionReply = serde_json::from_str(strip_fences(raw))
        .map_err(|e| LlmError::ParseError(e.to_string()))?;
    if reply.text.trim().is_empty() {
        return Err(LlmError::ParseError("empty submission text".to_string()));
    }
    Ok(reply)
}

pub fn parse_vote_reply(raw: &str) -> LlmResult<VoteReply> {
    let reply: VoteReply =
        serde_json::from_str(strip_fences(raw)).map_err(|e| LlmError::ParseError(e.to_string()))?;
    if reply.vote_alias.trim().is_empty() {
        return Err(LlmError::ParseError("empty vote alias".to_string()));
    }
    Ok(reply)
}

/// Configuration for the generation backend
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub default_timeout: Duration,
    pub default_max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            default_timeout: Duration::from_secs(20),
            default_max_tokens: 200,
        }
    }
}

impl LlmConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").ok().and_then(|key| {
            let trimmed = key.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        });

        let model = std::env::var("OPENAI_MODEL")
            .ok()
            .and_then(|model| {
                let trimmed = model.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or_else(|| "gpt-4o-mini".to_string());

        Self {
            api_key,
            model,
            default_timeout: std::env::var("LLM_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(20)),
            default_max_tokens: std::env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(200),
        }
    }

    /// Build the provider, if one is configured
    pub fn build_provider(&self) -> Option<Arc<dyn LlmProvider>> {
        self.api_key.as_ref().map(|key| {
            Arc::new(OpenAiProvider::new(key.clone(), self.model.clone())) as Arc<dyn LlmProvider>
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LlmConfig::default();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.default_timeout, Duration::from_secs(20));
        assert!(config.build_provider().is_none());
    }

    #[test]
    fn test_parse_submission_reply() {
        let reply = parse_submission_reply(r#"{"text": "lol same", "note": "kept it short"}"#)
            .expect("valid reply");
        assert_eq!(reply.text, "lol same");
        assert_eq!(reply.note.as_deref(), Some("kept it short"));
    }

    #[test]
    fn test_parse_submission_reply_with_fences() {
        let raw = "```json\n{\"text\": \"ok\"}\n```";
        let reply = parse_submission_reply(raw).expect("fenced reply");
        assert_eq!(reply.text, "ok");
        assert!(reply.note.is_none());
    }

    #[test]
    fn test_malformed_replies_are_rejected() {
        assert!(parse_submission_reply("not json at all").is_err());
        assert!(parse_submission_reply(r#"{"text": "   "}"#).is_err());
        assert!(parse_vote_reply(r#"{"vote_alias": ""}"#).is_err());
        assert!(parse_vote_reply(r#"{"text": "wrong schema"}"#).is_err());
    }

    #[test]
    fn test_parse_vote_reply() {
        let reply = parse_vote_reply(r#"{"vote_alias": "ada"}"#).expect("valid reply");
        assert_eq!(reply.vote_alias, "ada");
    }
}

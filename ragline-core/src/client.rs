//! Completion API client abstraction.
//!
//! Defines the `CompletionClient` trait the dispatcher works against, an
//! implementation for OpenAI-compatible chat-completions endpoints (Groq,
//! OpenAI, vLLM, and friends), and a scriptable mock for tests.
//!
//! Error mapping is where the dispatch taxonomy is decided: a 429 whose body
//! carries a daily-limit signature becomes `QuotaExhausted` (retires the
//! credential), any other 429 becomes `RateLimited` (same-credential backoff).

use crate::error::LlmError;
use crate::types::{GenerationUsage, PromptSpec};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// A completed generation returned by a provider.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: GenerationUsage,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Trait for completion API clients bound to a single credential.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Perform one completion request for the given prompt spec.
    async fn complete(&self, spec: &PromptSpec) -> Result<Completion, LlmError>;

    /// Return the model name this client targets.
    fn model_name(&self) -> &str;
}

/// Client for any endpoint following the OpenAI chat completions format.
pub struct OpenAiCompatClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl OpenAiCompatClient {
    /// Create a new client bound to one API key.
    pub fn new(config: &crate::config::ModelConfig, api_key: String) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    /// Map an HTTP error status to the appropriate LlmError.
    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        match status.as_u16() {
            401 => {
                debug!(body = %body, "Authentication failed (401)");
                LlmError::AuthFailed {
                    credential: "OpenAI-compatible".to_string(),
                }
            }
            429 => {
                if is_quota_exhaustion(body) {
                    LlmError::QuotaExhausted {
                        message: extract_error_message(body)
                            .unwrap_or_else(|| "daily token limit reached".to_string()),
                    }
                } else {
                    LlmError::RateLimited {
                        retry_after_secs: parse_retry_after(body).unwrap_or(5),
                    }
                }
            }
            status if status >= 500 => LlmError::ApiRequest {
                message: format!("Server error ({status}): {body}"),
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {status}: {body}"),
            },
        }
    }
}

/// Whether a 429 body signals a hard, period-scoped quota limit rather than
/// transient per-minute throttling.
fn is_quota_exhaustion(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("tokens per day")
        || lower.contains("requests per day")
        || lower.contains("tpd")
        || lower.contains("rpd")
        || lower.contains("daily limit")
}

/// Extract the provider's error message string, if the body is JSON.
fn extract_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("error")?
        .get("message")?
        .as_str()
        .map(|s| s.to_string())
}

/// Parse a retry delay from a 429 body of the form
/// "Rate limit reached ... Please try again in 7.66s ...".
fn parse_retry_after(body: &str) -> Option<u64> {
    let message = extract_error_message(body)?;
    let after = message.split("try again in ").nth(1)?;
    let number: String = after
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let secs: f64 = number.parse().ok()?;
    Some(secs.ceil() as u64)
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    async fn complete(&self, spec: &PromptSpec) -> Result<Completion, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": spec.text }],
            "temperature": spec.temperature,
            "max_tokens": spec.max_tokens,
            "stream": false,
        });

        debug!(url = %url, model = %self.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    LlmError::Connection {
                        message: format!("Request failed: {e}"),
                    }
                }
            })?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| LlmError::Connection {
            message: format!("Failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON: {e}"),
            })?;

        parse_completion(&json, &self.model)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Parse a chat completions response body into a Completion.
fn parse_completion(json: &Value, default_model: &str) -> Result<Completion, LlmError> {
    let text = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| LlmError::ResponseParse {
            message: "Response has no choices[0].message.content".to_string(),
        })?
        .trim()
        .to_string();

    let finish_reason = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|choice| choice.get("finish_reason"))
        .and_then(|f| f.as_str())
        .map(|s| s.to_string());

    let usage = json
        .get("usage")
        .map(|u| GenerationUsage {
            input_tokens: u.get("prompt_tokens").and_then(|t| t.as_u64()).unwrap_or(0) as usize,
            output_tokens: u
                .get("completion_tokens")
                .and_then(|t| t.as_u64())
                .unwrap_or(0) as usize,
        })
        .unwrap_or_default();

    let model = json
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or(default_model)
        .to_string();

    Ok(Completion {
        text,
        usage,
        model,
        finish_reason,
    })
}

/// A mock completion client for testing and development.
///
/// Scripted outcomes are consumed in FIFO order; an empty queue yields a
/// canned success so tests without strict scripting still run.
pub struct MockCompletionClient {
    model: String,
    outcomes: std::sync::Mutex<std::collections::VecDeque<Result<Completion, LlmError>>>,
    calls: std::sync::atomic::AtomicU32,
}

impl MockCompletionClient {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            outcomes: std::sync::Mutex::new(std::collections::VecDeque::new()),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Create a mock that always returns the given text.
    pub fn with_text(text: &str) -> Self {
        let client = Self::new();
        for _ in 0..20 {
            client.queue(Ok(Self::text_completion(text)));
        }
        client
    }

    /// Queue an outcome to be returned by the next `complete` call.
    pub fn queue(&self, outcome: Result<Completion, LlmError>) {
        self.outcomes
            .lock()
            .expect("mock outcome queue poisoned")
            .push_back(outcome);
    }

    /// Build a simple text completion for scripting.
    pub fn text_completion(text: &str) -> Completion {
        Completion {
            text: text.to_string(),
            usage: GenerationUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Number of `complete` calls this mock has served.
    pub fn calls(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Default for MockCompletionClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete(&self, _spec: &PromptSpec) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let next = self
            .outcomes
            .lock()
            .expect("mock outcome queue poisoned")
            .pop_front();
        match next {
            Some(outcome) => outcome,
            None => Ok(Self::text_completion(
                "Mock completion: no scripted outcome available.",
            )),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

//! Error types for the ragline core engine.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the LLM transport, task validation, and configuration domains.
//!
//! The dispatch failure taxonomy matters: `RateLimited` is short-window
//! throttling recovered by same-credential backoff, while `QuotaExhausted`
//! is a hard period-scoped limit that permanently retires a credential for
//! the rest of the run.

use std::path::PathBuf;

/// Top-level error type for the ragline core library.
#[derive(Debug, thiserror::Error)]
pub enum RaglineError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from completion API interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for credential {credential}")]
    AuthFailed { credential: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Credential hit its quota window: {message}")]
    QuotaExhausted { message: String },

    #[error("All credentials in the pool are exhausted")]
    AllKeysExhausted,

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from malformed input tasks. Fatal to the affected task only.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Task '{task_id}' has an empty conversation")]
    EmptyConversation { task_id: String },

    #[error("Task is missing a task identifier")]
    MissingTaskId,

    #[error("Task '{task_id}' contains a passage with empty text")]
    EmptyPassage { task_id: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("No usable credentials: every configured API key env var is unset")]
    NoCredentials,

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `RaglineError`.
pub type Result<T> = std::result::Result<T, RaglineError>;

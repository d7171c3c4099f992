//! # Ragline Core
//!
//! Core library for the ragline inference engine: zero-shot answer
//! generation over multi-turn retrieval-augmented conversations.
//! Provides answerability classification, differential prompt construction,
//! rate-limit-aware multi-credential dispatch, post-generation consistency
//! correction, and the batch orchestrator tying them together.

pub mod classify;
pub mod client;
pub mod config;
pub mod correct;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod keypool;
pub mod prompt;
pub mod telemetry;
pub mod types;

// Re-export commonly used types at the crate root.
pub use classify::{classify, validate};
pub use client::{Completion, CompletionClient, MockCompletionClient, OpenAiCompatClient};
pub use config::{
    BatchConfig, CredentialConfig, EngineConfig, GenerationConfig, ModelConfig, RefusalConfig,
    RetryConfig, load_config,
};
pub use correct::{Corrected, RefusalLexicon, ResponseCorrector};
pub use dispatch::Dispatcher;
pub use engine::Engine;
pub use error::{ConfigError, LlmError, RaglineError, Result, ValidationError};
pub use keypool::{Credential, KeyPool};
pub use prompt::PromptBuilder;
pub use telemetry::init_tracing;
pub use types::{
    AnswerStatus, Answerability, DispatchResult, DispatchStatus, Domain, FinalAnswer,
    GenerationUsage, Passage, PromptSpec, Speaker, Task, Turn,
};

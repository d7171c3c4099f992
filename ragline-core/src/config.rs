//! Configuration system for the ragline engine.
//!
//! Uses `figment` for layered configuration: defaults -> TOML config file ->
//! `RAGLINE_`-prefixed environment variables -> programmatic overrides.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Top-level configuration for the inference engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub model: ModelConfig,
    pub generation: GenerationConfig,
    /// Ordered credential list; rotation order follows this ordering.
    #[serde(default = "default_credentials")]
    pub credentials: Vec<CredentialConfig>,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
    pub refusal: RefusalConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            generation: GenerationConfig::default(),
            credentials: default_credentials(),
            retry: RetryConfig::default(),
            batch: BatchConfig::default(),
            refusal: RefusalConfig::default(),
        }
    }
}

/// Completion endpoint and model selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier sent with every request.
    pub model: String,
    /// Base URL of an OpenAI-compatible chat completions endpoint.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "meta-llama/llama-4-scout-17b-16e-instruct".to_string(),
            base_url: "https://api.groq.com/openai/v1".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Sampling parameters and feature toggles for prompt construction and
/// post-processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Temperature for answerable tasks.
    pub temperature_answerable: f32,
    /// Temperature for unanswerable tasks; lower keeps refusals on-script.
    pub temperature_unanswerable: f32,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Inject domain-specific phrasing guidance into answerable prompts.
    pub enable_domain_guidance: bool,
    /// Run the post-generation consistency-correction pass.
    pub enable_post_processing: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature_answerable: 0.3,
            temperature_unanswerable: 0.1,
            max_tokens: 512,
            enable_domain_guidance: true,
            enable_post_processing: true,
        }
    }
}

/// One quota-bearing credential, resolved from the environment at pool build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Environment variable name containing the API key.
    pub api_key_env: String,
}

fn default_credentials() -> Vec<CredentialConfig> {
    vec![CredentialConfig {
        api_key_env: "GROQ_API_KEY".to_string(),
    }]
}

/// Retry and backoff limits for the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Same-credential retries on transient throttling before rotating.
    pub transient_retries: u32,
    /// Same-credential retries on non-rate-limit failures before giving up.
    pub fatal_retries: u32,
    /// Initial backoff delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            transient_retries: 3,
            fatal_retries: 2,
            initial_backoff_ms: 1000,
            max_backoff_ms: 32_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Batch scheduling limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum tasks in flight at once; 1 means strictly sequential.
    pub concurrency: usize,
    /// Optional batch deadline; unscheduled tasks are aborted once it passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            timeout_secs: None,
        }
    }
}

/// The refusal-detection and correction table.
///
/// Kept as explicit configuration rather than scattered literals so the
/// exact match/no-match cases are enumerable in tests and tunable without
/// code changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefusalConfig {
    /// Case-insensitive substrings that mark a response as a refusal.
    pub phrases: Vec<String>,
    /// Apologetic markers that excuse a longer unanswerable response.
    pub softeners: Vec<String>,
    /// Responses shorter than this are never rewritten into refusals.
    pub min_substantive_len: usize,
    /// Lead-in prepended to salvaged content when a false refusal is fixed.
    pub grounded_lead_in: String,
    /// Full replacement when a false refusal has no salvageable content.
    pub grounded_template: String,
    /// Canonical refusal substituted for hallucinated answers.
    pub refusal_template: String,
}

impl Default for RefusalConfig {
    fn default() -> Self {
        Self {
            phrases: [
                "don't have",
                "do not have",
                "don't know",
                "cannot answer",
                "can't answer",
                "no information",
                "not able",
                "unable to",
                "cannot provide",
                "can't provide",
                "don't possess",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            softeners: ["unfortunately", "sorry", "apologize"]
                .into_iter()
                .map(String::from)
                .collect(),
            min_substantive_len: 50,
            grounded_lead_in: "Based on the available information,".to_string(),
            grounded_template: "Based on the available information, I can provide context on this topic."
                .to_string(),
            refusal_template: "I don't have the information needed to answer that question."
                .to_string(),
        }
    }
}

impl EngineConfig {
    /// Validate this config and return any warnings.
    ///
    /// Returns human-readable warning messages for problematic values;
    /// does not error so existing configs keep loading.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.credentials.is_empty() {
            warnings.push("no credentials configured; engine construction will fail".to_string());
        }
        for temp in [
            self.generation.temperature_answerable,
            self.generation.temperature_unanswerable,
        ] {
            if !(0.0..=2.0).contains(&temp) {
                warnings.push(format!(
                    "temperature ({temp}) is outside the typical range 0.0-2.0"
                ));
            }
        }
        if self.generation.max_tokens == 0 {
            warnings.push("max_tokens is 0; responses will be empty".to_string());
        }
        if self.batch.concurrency == 0 {
            warnings.push("batch.concurrency is 0; treated as 1 (sequential)".to_string());
        }
        if self.refusal.phrases.is_empty() {
            warnings.push(
                "refusal phrase table is empty; the correction pass cannot detect refusals"
                    .to_string(),
            );
        }
        warnings
    }
}

/// Load configuration with figment layering.
///
/// Order of precedence (later wins): built-in defaults, the TOML file if
/// given, `RAGLINE_`-prefixed environment variables (`__` separates nesting,
/// e.g. `RAGLINE_GENERATION__MAX_TOKENS`), then programmatic overrides.
pub fn load_config(
    config_file: Option<&Path>,
    overrides: Option<EngineConfig>,
) -> Result<EngineConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

    if let Some(path) = config_file {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("RAGLINE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.generation.temperature_answerable, 0.3);
        assert_eq!(config.generation.temperature_unanswerable, 0.1);
        assert_eq!(config.generation.max_tokens, 512);
        assert!(config.generation.enable_post_processing);
        assert_eq!(config.retry.transient_retries, 3);
        assert_eq!(config.batch.concurrency, 1);
        assert_eq!(config.refusal.phrases.len(), 11);
    }

    #[test]
    fn test_validate_clean_defaults() {
        assert!(EngineConfig::default().validate().is_empty());
    }

    #[test]
    fn test_validate_flags_bad_values() {
        let mut config = EngineConfig::default();
        config.generation.temperature_answerable = 3.5;
        config.generation.max_tokens = 0;
        config.refusal.phrases.clear();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 3);
    }

    #[test]
    fn test_load_config_no_file() {
        let config = load_config(None, None).expect("defaults should load");
        assert_eq!(config.generation.max_tokens, 512);
    }

    #[test]
    fn test_load_config_missing_file_errors() {
        let result = load_config(Some(Path::new("/nonexistent/ragline.toml")), None);
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_load_config_from_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ragline.toml");
        let mut file = std::fs::File::create(&path).expect("create config");
        writeln!(
            file,
            r#"
[generation]
temperature_answerable = 0.5
max_tokens = 256

[[credentials]]
api_key_env = "KEY_ONE"

[[credentials]]
api_key_env = "KEY_TWO"
"#
        )
        .expect("write config");

        let config = load_config(Some(&path), None).expect("config should load");
        assert_eq!(config.generation.temperature_answerable, 0.5);
        assert_eq!(config.generation.max_tokens, 256);
        // Unset fields keep their defaults
        assert_eq!(config.generation.temperature_unanswerable, 0.1);
        assert_eq!(config.credentials.len(), 2);
        assert_eq!(config.credentials[1].api_key_env, "KEY_TWO");
    }

    #[test]
    fn test_overrides_win() {
        let overrides = EngineConfig {
            batch: BatchConfig {
                concurrency: 8,
                timeout_secs: Some(600),
            },
            ..EngineConfig::default()
        };
        let config = load_config(None, Some(overrides)).expect("config should load");
        assert_eq!(config.batch.concurrency, 8);
        assert_eq!(config.batch.timeout_secs, Some(600));
    }
}

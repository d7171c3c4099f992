//! The inference engine tying the pipeline together.
//!
//! One engine owns the full per-task pipeline: classify answerability, build
//! the differential prompt, dispatch through the credential pool, and run the
//! consistency-correction pass. Batch processing layers bounded concurrency
//! and an optional deadline on top, preserving input order in the output.

use crate::classify::classify;
use crate::client::{CompletionClient, OpenAiCompatClient};
use crate::config::EngineConfig;
use crate::correct::ResponseCorrector;
use crate::dispatch::Dispatcher;
use crate::error::ConfigError;
use crate::keypool::{Credential, KeyPool};
use crate::prompt::PromptBuilder;
use crate::types::{AnswerStatus, DispatchStatus, FinalAnswer, Task};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// The zero-shot multi-turn answer engine.
pub struct Engine {
    config: EngineConfig,
    pool: Arc<KeyPool>,
    dispatcher: Dispatcher,
    prompt: PromptBuilder,
    corrector: ResponseCorrector,
}

impl Engine {
    /// Build an engine from configuration, resolving credentials from the
    /// environment.
    ///
    /// Each configured credential names an environment variable holding its
    /// API key. Unset variables are skipped with a warning; the build fails
    /// only when no credential resolves at all.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        let mut credentials = Vec::new();
        for cred in &config.credentials {
            match std::env::var(&cred.api_key_env) {
                Ok(key) if !key.trim().is_empty() => {
                    let client = OpenAiCompatClient::new(&config.model, key).map_err(|e| {
                        ConfigError::Invalid {
                            message: format!("failed to build client for {}: {e}", cred.api_key_env),
                        }
                    })?;
                    credentials.push(Credential::new(
                        cred.api_key_env.clone(),
                        Arc::new(client) as Arc<dyn CompletionClient>,
                    ));
                }
                _ => {
                    warn!(
                        env_var = %cred.api_key_env,
                        "Credential environment variable unset or empty, skipping"
                    );
                }
            }
        }
        Self::from_credentials(config, credentials)
    }

    /// Build an engine over pre-constructed clients, one credential each.
    ///
    /// Primarily for tests and embedding scenarios where the caller manages
    /// client construction.
    pub fn with_clients(
        config: EngineConfig,
        clients: Vec<Arc<dyn CompletionClient>>,
    ) -> Result<Self, ConfigError> {
        let credentials = clients
            .into_iter()
            .enumerate()
            .map(|(i, client)| Credential::new(format!("client-{i}"), client))
            .collect();
        Self::from_credentials(config, credentials)
    }

    fn from_credentials(
        config: EngineConfig,
        credentials: Vec<Credential>,
    ) -> Result<Self, ConfigError> {
        for warning in config.validate() {
            warn!("{warning}");
        }
        let pool = Arc::new(KeyPool::new(credentials)?);
        let dispatcher = Dispatcher::new(Arc::clone(&pool), config.retry.clone());
        let prompt = PromptBuilder::new(config.generation.clone());
        let corrector =
            ResponseCorrector::new(&config.refusal, config.generation.enable_post_processing);
        info!(
            model = %config.model.model,
            credentials = pool.len(),
            "Engine initialized"
        );
        Ok(Self {
            config,
            pool,
            dispatcher,
            prompt,
            corrector,
        })
    }

    /// The shared credential pool, exposed for inspection.
    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process one task through the full pipeline.
    ///
    /// Always returns a record; per-task failures become failure-marked
    /// answers rather than errors, so one bad task never aborts a batch.
    pub async fn process(&self, task: &Task) -> FinalAnswer {
        let decision = classify(task);

        let spec = match self.prompt.build(task, decision) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e, "Task failed validation");
                return FinalAnswer::failed(task, decision, AnswerStatus::Failed, e.to_string());
            }
        };

        let result = self.dispatcher.dispatch(&spec).await;
        match result.status {
            DispatchStatus::Success => {
                // Success always carries text
                let raw = result.text.as_deref().unwrap_or_default();
                let corrected = self.corrector.correct(raw, decision);
                info!(
                    task_id = %task.task_id,
                    decision = %decision,
                    corrected = corrected.was_corrected,
                    retries = result.retries,
                    "Task answered"
                );
                FinalAnswer::answered(task, decision, corrected.text, corrected.was_corrected, &result)
            }
            DispatchStatus::AllKeysExhausted => {
                warn!(task_id = %task.task_id, "No credentials left for task");
                FinalAnswer::failed(
                    task,
                    decision,
                    AnswerStatus::AllKeysExhausted,
                    result
                        .error
                        .unwrap_or_else(|| "all credentials exhausted".to_string()),
                )
            }
            DispatchStatus::FatalError => {
                warn!(
                    task_id = %task.task_id,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Task failed"
                );
                FinalAnswer::failed(
                    task,
                    decision,
                    AnswerStatus::Failed,
                    result.error.unwrap_or_else(|| "unknown error".to_string()),
                )
            }
        }
    }

    /// Process a batch of tasks with bounded concurrency.
    ///
    /// Output order matches input order regardless of completion order. With
    /// a configured batch deadline, tasks not yet started when it passes are
    /// recorded as aborted; tasks already in flight run to completion.
    pub async fn process_batch(&self, tasks: &[Task]) -> Vec<FinalAnswer> {
        let concurrency = self.config.batch.concurrency.max(1);
        let deadline = self
            .config
            .batch
            .timeout_secs
            .map(|secs| Instant::now() + Duration::from_secs(secs));

        info!(
            tasks = tasks.len(),
            concurrency,
            deadline = self.config.batch.timeout_secs,
            "Processing batch"
        );

        let answers: Vec<FinalAnswer> = futures::stream::iter(tasks.iter().map(|task| async move {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    warn!(task_id = %task.task_id, "Batch deadline passed, aborting task");
                    return FinalAnswer::aborted(task, classify(task));
                }
            }
            self.process(task).await
        }))
        .buffered(concurrency)
        .collect()
        .await;

        let failures = answers.iter().filter(|a| a.is_failure()).count();
        info!(
            tasks = answers.len(),
            failures,
            exhausted_credentials = self.pool.exhausted_count(),
            "Batch complete"
        );
        answers
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("model", &self.config.model.model)
            .field("pool", &self.pool)
            .finish()
    }
}

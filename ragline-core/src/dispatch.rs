//! Request dispatch with retry, backoff, and credential failover.
//!
//! Issues one completion request per prompt spec, driving an explicit state
//! machine instead of nested retry conditionals:
//!
//! ```text
//! Attempt --success--------------------------> done
//! Attempt --transient 429--> Backoff --------> Attempt   (same credential)
//! Attempt --quota 429------> mark + Rotate --> Attempt   (next credential)
//! Attempt --other error----> Backoff/fatal
//! Rotate  --pool covered---> Exhausted / fatal
//! ```
//!
//! Transient throttling retries the same credential with exponential backoff;
//! a hard quota signal permanently retires the credential and rotates. Only
//! terminal statuses reach the caller; the key pool is the only state touched.

use crate::config::RetryConfig;
use crate::error::LlmError;
use crate::keypool::KeyPool;
use crate::types::{DispatchResult, PromptSpec};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Phases of one dispatch attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
enum DispatchState {
    /// Issue a request on the current credential.
    Attempt,
    /// Sleep, then re-attempt the same credential.
    Backoff(Duration),
    /// Advance to the next credential and reset per-credential budgets.
    Rotate,
    /// Every credential is exhausted; give up.
    Exhausted,
}

/// Dispatches prompts against a shared credential pool.
pub struct Dispatcher {
    pool: Arc<KeyPool>,
    retry: RetryConfig,
}

impl Dispatcher {
    pub fn new(pool: Arc<KeyPool>, retry: RetryConfig) -> Self {
        Self { pool, retry }
    }

    /// Issue one completion request, retrying and failing over as needed.
    ///
    /// Never returns an error: terminal outcomes (success, pool-wide
    /// exhaustion, fatal per-task failure) are encoded in the result status.
    /// Rotation is bounded by the pool size; if every credential has been
    /// tried and the pool is still not exhausted (persistent throttling on
    /// every key), the last error surfaces as a fatal result for this task.
    pub async fn dispatch(&self, spec: &PromptSpec) -> DispatchResult {
        let pool_size = self.pool.len();
        let mut state = DispatchState::Attempt;
        let mut retries = 0u32;
        let mut rotations = 0usize;
        let mut transient_used = 0u32;
        let mut fatal_used = 0u32;
        let mut last_error: Option<LlmError> = None;

        loop {
            match state {
                DispatchState::Attempt => {
                    let (index, client) = match self.pool.current() {
                        Ok(pair) => pair,
                        Err(_) => {
                            state = DispatchState::Exhausted;
                            continue;
                        }
                    };

                    debug!(credential = index, "Issuing completion request");
                    match client.complete(spec).await {
                        Ok(completion) => {
                            info!(
                                credential = index,
                                retries,
                                input_tokens = completion.usage.input_tokens,
                                output_tokens = completion.usage.output_tokens,
                                "Completion received"
                            );
                            return DispatchResult::success(
                                completion.text,
                                index,
                                retries,
                                completion.usage,
                            );
                        }
                        Err(err @ LlmError::QuotaExhausted { .. }) => {
                            warn!(credential = index, error = %err, "Quota window hit");
                            self.pool.mark_exhausted(index);
                            last_error = Some(err);
                            state = DispatchState::Rotate;
                        }
                        Err(err @ LlmError::RateLimited { .. }) => {
                            if transient_used < self.retry.transient_retries {
                                let delay = self.backoff_delay(transient_used, &err);
                                debug!(
                                    credential = index,
                                    attempt = transient_used + 1,
                                    delay_ms = delay.as_millis() as u64,
                                    "Throttled, backing off on same credential"
                                );
                                transient_used += 1;
                                retries += 1;
                                last_error = Some(err);
                                state = DispatchState::Backoff(delay);
                            } else {
                                warn!(
                                    credential = index,
                                    "Throttling persists after backoff budget, rotating"
                                );
                                last_error = Some(err);
                                state = DispatchState::Rotate;
                            }
                        }
                        Err(err) => {
                            if fatal_used < self.retry.fatal_retries && is_locally_retryable(&err) {
                                let delay = self.backoff_delay(fatal_used, &err);
                                debug!(
                                    credential = index,
                                    error = %err,
                                    delay_ms = delay.as_millis() as u64,
                                    "Transient fault, retrying"
                                );
                                fatal_used += 1;
                                retries += 1;
                                state = DispatchState::Backoff(delay);
                            } else {
                                warn!(credential = index, error = %err, "Fatal dispatch error");
                                return DispatchResult::fatal(Some(index), retries, err.to_string());
                            }
                        }
                    }
                }
                DispatchState::Backoff(delay) => {
                    // The pool lock is free here; only this worker sleeps.
                    tokio::time::sleep(delay).await;
                    state = DispatchState::Attempt;
                }
                DispatchState::Rotate => {
                    rotations += 1;
                    if rotations >= pool_size {
                        if self.pool.active() == 0 {
                            state = DispatchState::Exhausted;
                        } else {
                            let message = last_error
                                .as_ref()
                                .map(|e| e.to_string())
                                .unwrap_or_else(|| "rotation budget spent".to_string());
                            warn!(rotations, "Every credential tried without success");
                            return DispatchResult::fatal(None, retries, message);
                        }
                        continue;
                    }
                    self.pool.rotate();
                    transient_used = 0;
                    fatal_used = 0;
                    state = DispatchState::Attempt;
                }
                DispatchState::Exhausted => {
                    warn!("All credentials exhausted");
                    return DispatchResult::exhausted(retries);
                }
            }
        }
    }

    /// Compute the backoff delay for an attempt, honouring any server-provided
    /// retry-after hint (whichever is larger wins).
    fn backoff_delay(&self, attempt: u32, err: &LlmError) -> Duration {
        let computed = self.exponential_backoff_ms(attempt);
        let ms = match err {
            LlmError::RateLimited { retry_after_secs } => {
                (retry_after_secs * 1000).max(computed)
            }
            _ => computed,
        };
        Duration::from_millis(ms)
    }

    /// Pure exponential backoff with cap and optional jitter.
    fn exponential_backoff_ms(&self, attempt: u32) -> u64 {
        let base = self.retry.initial_backoff_ms as f64
            * self.retry.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.retry.max_backoff_ms as f64) as u64;
        if self.retry.jitter {
            let jitter = (capped as f64 * 0.25 * rand_simple()) as u64;
            capped + jitter
        } else {
            capped
        }
    }
}

/// Whether a non-rate-limit error is worth a small local retry.
fn is_locally_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::Connection { .. } | LlmError::Timeout { .. } | LlmError::ApiRequest { .. }
    )
}

/// Simple deterministic pseudo-random for jitter (avoids pulling in rand).
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CompletionClient, MockCompletionClient};
    use crate::keypool::Credential;
    use crate::types::DispatchStatus;

    fn spec() -> PromptSpec {
        PromptSpec {
            text: "prompt".into(),
            temperature: 0.3,
            max_tokens: 512,
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            transient_retries: 3,
            fatal_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    fn pool_from(clients: Vec<Arc<MockCompletionClient>>) -> Arc<KeyPool> {
        let credentials = clients
            .into_iter()
            .enumerate()
            .map(|(i, c)| Credential::new(format!("KEY_{i}"), c as Arc<dyn CompletionClient>))
            .collect();
        Arc::new(KeyPool::new(credentials).expect("non-empty pool"))
    }

    fn quota_error() -> LlmError {
        LlmError::QuotaExhausted {
            message: "tokens per day limit reached".into(),
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let client = Arc::new(MockCompletionClient::with_text("answer"));
        let pool = pool_from(vec![client]);
        let dispatcher = Dispatcher::new(pool, fast_retry());

        let result = dispatcher.dispatch(&spec()).await;
        assert_eq!(result.status, DispatchStatus::Success);
        assert_eq!(result.text.as_deref(), Some("answer"));
        assert_eq!(result.credential_index, Some(0));
        assert_eq!(result.retries, 0);
    }

    #[tokio::test]
    async fn test_transient_throttle_retries_same_credential() {
        let client = Arc::new(MockCompletionClient::new());
        client.queue(Err(LlmError::RateLimited { retry_after_secs: 0 }));
        client.queue(Err(LlmError::RateLimited { retry_after_secs: 0 }));
        client.queue(Ok(MockCompletionClient::text_completion("recovered")));
        let raw = Arc::clone(&client);
        let pool = pool_from(vec![client]);
        let dispatcher = Dispatcher::new(Arc::clone(&pool), fast_retry());

        let result = dispatcher.dispatch(&spec()).await;
        assert_eq!(result.status, DispatchStatus::Success);
        assert_eq!(result.credential_index, Some(0));
        assert_eq!(result.retries, 2);
        assert_eq!(raw.calls(), 3);
        // Throttling must never retire a credential
        assert_eq!(pool.exhausted_count(), 0);
    }

    #[tokio::test]
    async fn test_quota_exhaustion_fails_over_to_next_key() {
        let first = Arc::new(MockCompletionClient::new());
        first.queue(Err(quota_error()));
        let second = Arc::new(MockCompletionClient::with_text("from key 1"));
        let pool = pool_from(vec![first, second]);
        let dispatcher = Dispatcher::new(Arc::clone(&pool), fast_retry());

        let result = dispatcher.dispatch(&spec()).await;
        assert_eq!(result.status, DispatchStatus::Success);
        assert_eq!(result.text.as_deref(), Some("from key 1"));
        assert_eq!(result.credential_index, Some(1));
        assert!(pool.is_exhausted(0));
        assert!(!pool.is_exhausted(1));
    }

    #[tokio::test]
    async fn test_all_keys_exhausted() {
        let first = Arc::new(MockCompletionClient::new());
        first.queue(Err(quota_error()));
        let second = Arc::new(MockCompletionClient::new());
        second.queue(Err(quota_error()));
        let pool = pool_from(vec![first, second]);
        let dispatcher = Dispatcher::new(Arc::clone(&pool), fast_retry());

        let result = dispatcher.dispatch(&spec()).await;
        assert_eq!(result.status, DispatchStatus::AllKeysExhausted);
        assert_eq!(result.text, None);
        assert_eq!(pool.exhausted_count(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_pool_fast_fails_next_dispatch() {
        let client = Arc::new(MockCompletionClient::new());
        client.queue(Err(quota_error()));
        let raw = Arc::clone(&client);
        let pool = pool_from(vec![client]);
        let dispatcher = Dispatcher::new(pool, fast_retry());

        let first = dispatcher.dispatch(&spec()).await;
        assert_eq!(first.status, DispatchStatus::AllKeysExhausted);

        // Second dispatch must not issue any request
        let second = dispatcher.dispatch(&spec()).await;
        assert_eq!(second.status, DispatchStatus::AllKeysExhausted);
        assert_eq!(raw.calls(), 1);
    }

    #[tokio::test]
    async fn test_fatal_error_after_local_retries() {
        let client = Arc::new(MockCompletionClient::new());
        for _ in 0..3 {
            client.queue(Err(LlmError::Connection {
                message: "connection reset".into(),
            }));
        }
        let raw = Arc::clone(&client);
        let pool = pool_from(vec![client]);
        let dispatcher = Dispatcher::new(Arc::clone(&pool), fast_retry());

        let result = dispatcher.dispatch(&spec()).await;
        assert_eq!(result.status, DispatchStatus::FatalError);
        assert_eq!(result.retries, 2);
        assert_eq!(raw.calls(), 3); // initial attempt + 2 local retries
        // Non-rate-limit failures never touch the exhausted set
        assert_eq!(pool.exhausted_count(), 0);
    }

    #[tokio::test]
    async fn test_parse_error_is_immediately_fatal() {
        let client = Arc::new(MockCompletionClient::new());
        client.queue(Err(LlmError::ResponseParse {
            message: "bad json".into(),
        }));
        let raw = Arc::clone(&client);
        let pool = pool_from(vec![client]);
        let dispatcher = Dispatcher::new(pool, fast_retry());

        let result = dispatcher.dispatch(&spec()).await;
        assert_eq!(result.status, DispatchStatus::FatalError);
        assert_eq!(raw.calls(), 1);
    }

    #[tokio::test]
    async fn test_persistent_throttling_on_all_keys_is_fatal_not_exhausted() {
        let mut clients = Vec::new();
        for _ in 0..2 {
            let client = Arc::new(MockCompletionClient::new());
            for _ in 0..8 {
                client.queue(Err(LlmError::RateLimited { retry_after_secs: 0 }));
            }
            clients.push(client);
        }
        let pool = pool_from(clients);
        let dispatcher = Dispatcher::new(Arc::clone(&pool), fast_retry());

        let result = dispatcher.dispatch(&spec()).await;
        assert_eq!(result.status, DispatchStatus::FatalError);
        // Still-usable credentials stay available for the next task
        assert_eq!(pool.exhausted_count(), 0);
    }

    #[test]
    fn test_exponential_backoff_growth_and_cap() {
        let pool = pool_from(vec![Arc::new(MockCompletionClient::new())]);
        let dispatcher = Dispatcher::new(
            pool,
            RetryConfig {
                initial_backoff_ms: 1000,
                max_backoff_ms: 3000,
                backoff_multiplier: 2.0,
                jitter: false,
                ..RetryConfig::default()
            },
        );
        assert_eq!(dispatcher.exponential_backoff_ms(0), 1000);
        assert_eq!(dispatcher.exponential_backoff_ms(1), 2000);
        assert_eq!(dispatcher.exponential_backoff_ms(2), 3000); // capped
    }

    #[test]
    fn test_backoff_honours_server_retry_after() {
        let pool = pool_from(vec![Arc::new(MockCompletionClient::new())]);
        let dispatcher = Dispatcher::new(
            pool,
            RetryConfig {
                initial_backoff_ms: 1000,
                jitter: false,
                ..RetryConfig::default()
            },
        );
        let err = LlmError::RateLimited {
            retry_after_secs: 30,
        };
        assert_eq!(dispatcher.backoff_delay(0, &err), Duration::from_secs(30));
    }

    #[test]
    fn test_locally_retryable_classification() {
        assert!(is_locally_retryable(&LlmError::Connection {
            message: "reset".into()
        }));
        assert!(is_locally_retryable(&LlmError::Timeout { timeout_secs: 60 }));
        assert!(!is_locally_retryable(&LlmError::ResponseParse {
            message: "bad json".into()
        }));
        assert!(!is_locally_retryable(&LlmError::AuthFailed {
            credential: "k".into()
        }));
    }
}

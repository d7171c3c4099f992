//! Multi-credential rotation pool.
//!
//! Holds an ordered, non-empty sequence of credentials, each bound to its own
//! completion client, plus a rotation cursor and the set of credentials that
//! have hit their quota window. Exhaustion is permanent for the lifetime of
//! the process; only a hard quota signal (never transient throttling) should
//! mark a credential exhausted.
//!
//! Cursor and exhausted set live behind a single mutex so that `current`,
//! `mark_exhausted`, and `rotate` are each one critical section, safe for a
//! bounded worker pool sharing the pool. The lock is never held across an
//! await point.

use crate::client::CompletionClient;
use crate::error::{ConfigError, LlmError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// One quota-bearing credential bound to its client handle.
#[derive(Clone)]
pub struct Credential {
    /// Human-readable label (typically the API key env var name).
    pub label: String,
    pub client: Arc<dyn CompletionClient>,
}

impl Credential {
    pub fn new(label: impl Into<String>, client: Arc<dyn CompletionClient>) -> Self {
        Self {
            label: label.into(),
            client,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("label", &self.label)
            .field("model", &self.client.model_name())
            .finish()
    }
}

/// Mutable rotation state, guarded as one unit.
#[derive(Debug, Default)]
struct PoolState {
    cursor: usize,
    exhausted: HashSet<usize>,
}

/// An ordered pool of credentials with deterministic rotation.
pub struct KeyPool {
    credentials: Vec<Credential>,
    state: Mutex<PoolState>,
}

impl KeyPool {
    /// Create a pool over an ordered credential list.
    ///
    /// Fails if the list is empty; the dispatcher has nothing to work with.
    pub fn new(credentials: Vec<Credential>) -> Result<Self, ConfigError> {
        if credentials.is_empty() {
            return Err(ConfigError::NoCredentials);
        }
        info!(keys = credentials.len(), "Initialized credential pool");
        Ok(Self {
            credentials,
            state: Mutex::new(PoolState::default()),
        })
    }

    /// Return the credential at the cursor, skipping exhausted entries.
    ///
    /// Scans forward in ascending index order with wrap-around, settling the
    /// cursor on the first non-exhausted credential. Fails with
    /// `AllKeysExhausted` once the exhausted set covers the pool.
    pub fn current(&self) -> Result<(usize, Arc<dyn CompletionClient>), LlmError> {
        let mut state = self.lock_state();
        if state.exhausted.len() >= self.credentials.len() {
            return Err(LlmError::AllKeysExhausted);
        }

        let len = self.credentials.len();
        for offset in 0..len {
            let index = (state.cursor + offset) % len;
            if !state.exhausted.contains(&index) {
                state.cursor = index;
                return Ok((index, Arc::clone(&self.credentials[index].client)));
            }
        }

        // Unreachable: the exhausted-set check above covers the full pool.
        Err(LlmError::AllKeysExhausted)
    }

    /// Mark a credential as exhausted for the rest of the run. Idempotent.
    pub fn mark_exhausted(&self, index: usize) {
        if index >= self.credentials.len() {
            return;
        }
        let mut state = self.lock_state();
        if state.exhausted.insert(index) {
            warn!(
                credential = %self.credentials[index].label,
                active = self.credentials.len() - state.exhausted.len(),
                total = self.credentials.len(),
                "Credential exhausted for this run"
            );
        }
    }

    /// Advance the cursor to the next non-exhausted credential.
    ///
    /// Deterministic ascending scan with wrap to 0, so every active
    /// credential is visited before any repeats. A no-op once the pool is
    /// fully exhausted.
    pub fn rotate(&self) {
        let mut state = self.lock_state();
        let len = self.credentials.len();
        if state.exhausted.len() >= len {
            return;
        }
        let from = state.cursor;
        for offset in 1..=len {
            let index = (from + offset) % len;
            if !state.exhausted.contains(&index) {
                state.cursor = index;
                break;
            }
        }
        info!(
            from = %self.credentials[from].label,
            to = %self.credentials[state.cursor].label,
            active = len - state.exhausted.len(),
            "Rotated credential"
        );
    }

    /// Total number of credentials in the pool.
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Number of credentials still usable.
    pub fn active(&self) -> usize {
        let state = self.lock_state();
        self.credentials.len() - state.exhausted.len()
    }

    /// Number of credentials retired by quota exhaustion.
    pub fn exhausted_count(&self) -> usize {
        self.lock_state().exhausted.len()
    }

    /// Whether a specific credential has been retired.
    pub fn is_exhausted(&self, index: usize) -> bool {
        self.lock_state().exhausted.contains(&index)
    }

    /// The label of the credential at the given index.
    pub fn label(&self, index: usize) -> Option<&str> {
        self.credentials.get(index).map(|c| c.label.as_str())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        // A panic while holding this lock leaves state consistent enough to
        // keep serving; recover the guard rather than propagating poison.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for KeyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("KeyPool")
            .field("len", &self.credentials.len())
            .field("cursor", &state.cursor)
            .field("exhausted", &state.exhausted)
            .finish()
    }
}

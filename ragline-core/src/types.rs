//! Core type definitions for the ragline engine.
//!
//! Defines the fundamental data structures flowing through the pipeline:
//! input tasks with their conversation turns and retrieved passages, the
//! answerability decision, prompt specifications, dispatch results, and
//! the final per-task answer record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents a participant role in a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single turn in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

impl Turn {
    /// Create a user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
        }
    }

    /// Create an assistant turn.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: text.into(),
        }
    }
}

fn default_document_id() -> String {
    "unknown".to_string()
}

fn default_score() -> f64 {
    1.0
}

/// A retrieved grounding passage attached to a task.
///
/// Upstream retrieval records are not always fully populated, so the source
/// identifier and relevance score carry serde defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    #[serde(default = "default_document_id")]
    pub document_id: String,
    pub text: String,
    #[serde(default = "default_score")]
    pub score: f64,
}

impl Passage {
    /// Create a passage with the default relevance score.
    pub fn new(document_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            text: text.into(),
            score: default_score(),
        }
    }
}

/// The retrieval domain a task belongs to, used for phrasing guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Financial Q&A (FiQA).
    Fiqa,
    /// IBM Cloud technical documentation.
    IbmCloud,
    /// General knowledge (CLAP-NQ).
    ClapNq,
    /// Government and policy documents.
    Govt,
    /// Anything else.
    General,
}

impl Domain {
    /// Detect the domain from a collection name by substring match.
    pub fn from_collection(collection: &str) -> Self {
        let lower = collection.to_lowercase();
        if lower.contains("fiqa") {
            Domain::Fiqa
        } else if lower.contains("ibmcloud") {
            Domain::IbmCloud
        } else if lower.contains("clapnq") {
            Domain::ClapNq
        } else if lower.contains("govt") {
            Domain::Govt
        } else {
            Domain::General
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Domain::Fiqa => write!(f, "fiqa"),
            Domain::IbmCloud => write!(f, "ibmcloud"),
            Domain::ClapNq => write!(f, "clapnq"),
            Domain::Govt => write!(f, "govt"),
            Domain::General => write!(f, "general"),
        }
    }
}

/// One conversation-plus-retrieved-passages unit requiring one answer.
///
/// Immutable input record: the engine never mutates a task. Passages arrive
/// pre-retrieved; an empty passage list is the definitional signal that the
/// task cannot be answered from grounding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Upstream conversation identifier, passed through to the output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub task_id: String,
    /// Source collection name (e.g. "mtrag_fiqa"); drives domain detection.
    #[serde(default)]
    pub collection: String,
    pub turns: Vec<Turn>,
    #[serde(default)]
    pub passages: Vec<Passage>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task with the current ingestion timestamp.
    pub fn new(task_id: impl Into<String>, turns: Vec<Turn>, passages: Vec<Passage>) -> Self {
        Self {
            conversation_id: None,
            task_id: task_id.into(),
            collection: String::new(),
            turns,
            passages,
            received_at: Utc::now(),
        }
    }

    /// Set the source collection name.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Set the upstream conversation identifier.
    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// The domain tag derived from the collection name.
    pub fn domain(&self) -> Domain {
        Domain::from_collection(&self.collection)
    }

    /// The current question: the text of the final turn.
    pub fn current_question(&self) -> Option<&str> {
        self.turns.last().map(|t| t.text.as_str())
    }
}

/// Binary answerability of a task: true iff grounding passages exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Answerability {
    Answerable,
    Unanswerable,
}

impl std::fmt::Display for Answerability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Answerability::Answerable => write!(f, "answerable"),
            Answerability::Unanswerable => write!(f, "unanswerable"),
        }
    }
}

/// A fully-formed model prompt with its sampling parameters.
///
/// Fully determined by (task, decision, configuration); never mutated after
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSpec {
    pub text: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Token usage statistics reported by the completion API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl GenerationUsage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }

    pub fn accumulate(&mut self, other: &GenerationUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Terminal status of one dispatch attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Success,
    AllKeysExhausted,
    FatalError,
}

/// The outcome of dispatching one prompt, including failover diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    pub status: DispatchStatus,
    /// Raw generated text; `None` for failure statuses.
    pub text: Option<String>,
    /// Index of the credential that produced the response, if any.
    pub credential_index: Option<usize>,
    /// Number of retries consumed across all credentials.
    pub retries: u32,
    #[serde(default)]
    pub usage: GenerationUsage,
    /// Human-readable description of the terminal error, if any.
    pub error: Option<String>,
}

impl DispatchResult {
    /// A successful dispatch.
    pub fn success(
        text: impl Into<String>,
        credential_index: usize,
        retries: u32,
        usage: GenerationUsage,
    ) -> Self {
        Self {
            status: DispatchStatus::Success,
            text: Some(text.into()),
            credential_index: Some(credential_index),
            retries,
            usage,
            error: None,
        }
    }

    /// Pool-wide quota exhaustion.
    pub fn exhausted(retries: u32) -> Self {
        Self {
            status: DispatchStatus::AllKeysExhausted,
            text: None,
            credential_index: None,
            retries,
            usage: GenerationUsage::default(),
            error: Some("all credentials exhausted".to_string()),
        }
    }

    /// A non-recoverable per-task failure.
    pub fn fatal(credential_index: Option<usize>, retries: u32, error: impl Into<String>) -> Self {
        Self {
            status: DispatchStatus::FatalError,
            text: None,
            credential_index,
            retries,
            usage: GenerationUsage::default(),
            error: Some(error.into()),
        }
    }
}

/// Terminal status of one processed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    /// The model produced an answer (possibly corrected).
    Answered,
    /// Every credential hit its quota window before an answer was obtained.
    AllKeysExhausted,
    /// A non-rate-limit failure (validation, network, malformed response).
    Failed,
    /// The batch deadline passed before this task was scheduled.
    Aborted,
}

/// The finished per-task output record.
///
/// Produced exactly once per task and forwarded to the caller; failed tasks
/// yield a failure-marked record instead of text so downstream consumers can
/// distinguish "model answered" from "could not obtain an answer".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub decision: Answerability,
    pub status: AnswerStatus,
    /// Corrected answer text; `None` for failure-marked records.
    pub text: Option<String>,
    pub was_corrected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_index: Option<usize>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub usage: GenerationUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl FinalAnswer {
    /// Build a successful answer record from a dispatch result.
    pub fn answered(
        task: &Task,
        decision: Answerability,
        text: impl Into<String>,
        was_corrected: bool,
        result: &DispatchResult,
    ) -> Self {
        Self {
            task_id: task.task_id.clone(),
            conversation_id: task.conversation_id.clone(),
            decision,
            status: AnswerStatus::Answered,
            text: Some(text.into()),
            was_corrected,
            credential_index: result.credential_index,
            retries: result.retries,
            usage: result.usage,
            error: None,
            generated_at: Utc::now(),
        }
    }

    /// Build a failure-marked record for a task that produced no answer.
    pub fn failed(
        task: &Task,
        decision: Answerability,
        status: AnswerStatus,
        error: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task.task_id.clone(),
            conversation_id: task.conversation_id.clone(),
            decision,
            status,
            text: None,
            was_corrected: false,
            credential_index: None,
            retries: 0,
            usage: GenerationUsage::default(),
            error: Some(error.into()),
            generated_at: Utc::now(),
        }
    }

    /// Build an aborted marker for a task the batch deadline cut off.
    pub fn aborted(task: &Task, decision: Answerability) -> Self {
        Self::failed(
            task,
            decision,
            AnswerStatus::Aborted,
            "batch deadline passed before task was scheduled",
        )
    }

    /// Whether this record carries a failure status instead of text.
    pub fn is_failure(&self) -> bool {
        self.status != AnswerStatus::Answered
    }
}

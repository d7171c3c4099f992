//! Differential prompt construction.
//!
//! Maps a task plus its answerability decision to a fully-formed prompt with
//! sampling parameters. Answerable tasks get a strict answer-from-passages
//! prompt with domain guidance; unanswerable tasks get a strict polite-refusal
//! prompt with exemplars and a speculation ban. Stateless and deterministic:
//! identical (task, decision, config) always yields an identical spec.

use crate::classify::validate;
use crate::config::GenerationConfig;
use crate::error::RaglineError;
use crate::types::{Answerability, Domain, Passage, PromptSpec, Speaker, Task, Turn};

/// Instruction block for answerable tasks.
const ANSWERABLE_INSTRUCTIONS: &str = "\
CRITICAL INSTRUCTIONS:
1. You MUST answer using the reference information above
2. The passages contain the answer - find and use it
3. Be direct and specific - synthesize from multiple passages if needed
4. Length: 2-4 sentences (concise but complete)
5. For follow-up questions, connect to previous discussion
6. DO NOT say \"I don't have information\" - you DO have the passages above
7. Answer confidently based on the provided references";

/// Instruction block for unanswerable tasks.
const UNANSWERABLE_INSTRUCTIONS: &str = "\
CRITICAL INSTRUCTION: You do NOT have any reference information or documents \
to answer this question. You MUST politely decline.

Your response MUST be a polite refusal that acknowledges you don't have the \
information.

Examples of good refusals:
- \"I don't have the information needed to answer that question.\"
- \"I'm unable to answer that as I don't have access to the relevant information.\"
- \"Unfortunately, I don't have the information to help with that question.\"

DO NOT attempt to answer the question. DO NOT provide general knowledge. \
ONLY politely decline.";

/// Domain-specific phrasing guidance for answerable prompts.
fn domain_guidance(domain: Domain) -> &'static str {
    match domain {
        Domain::Fiqa => "Financial question - be precise with numbers and terms.",
        Domain::IbmCloud => "Technical question - be accurate with technical details.",
        Domain::ClapNq => "General knowledge - provide clear, direct answers.",
        Domain::Govt => "Government/policy - be authoritative and accurate.",
        Domain::General => "Provide helpful information.",
    }
}

/// Format the conversation history (all turns except the current question).
fn format_history(turns: &[Turn]) -> String {
    let history: Vec<String> = turns
        .iter()
        .take(turns.len().saturating_sub(1))
        .map(|turn| {
            let role = match turn.speaker {
                Speaker::User => "User",
                Speaker::Assistant => "Assistant",
            };
            format!("{}: {}", role, turn.text)
        })
        .collect();

    if history.is_empty() {
        "No previous conversation.".to_string()
    } else {
        history.join("\n\n")
    }
}

/// Format the retrieved passages as a numbered reference block.
fn format_passages(passages: &[Passage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[Passage {}]\n{}", i + 1, p.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds prompts from tasks according to the answerability decision.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    config: GenerationConfig,
}

impl PromptBuilder {
    pub fn new(config: GenerationConfig) -> Self {
        Self { config }
    }

    /// Build the prompt spec for a task under the given decision.
    ///
    /// Fails with a validation error for malformed tasks (empty conversation,
    /// missing task id, blank passage text); never calls out externally.
    pub fn build(&self, task: &Task, decision: Answerability) -> Result<PromptSpec, RaglineError> {
        validate(task)?;

        // validate() guarantees at least one turn
        let question = task.current_question().unwrap_or_default();
        let history = format_history(&task.turns);

        let (text, temperature) = match decision {
            Answerability::Answerable => {
                (self.answerable_prompt(task, &history, question), self.config.temperature_answerable)
            }
            Answerability::Unanswerable => {
                (unanswerable_prompt(&history, question), self.config.temperature_unanswerable)
            }
        };

        Ok(PromptSpec {
            text,
            temperature,
            max_tokens: self.config.max_tokens,
        })
    }

    fn answerable_prompt(&self, task: &Task, history: &str, question: &str) -> String {
        let passages = format_passages(&task.passages);
        let guidance = if self.config.enable_domain_guidance {
            format!("\nCONTEXT: {}\n", domain_guidance(task.domain()))
        } else {
            String::new()
        };

        format!(
            "You are a helpful assistant answering questions based on provided information.\n\
             \n\
             CONVERSATION HISTORY:\n{history}\n\
             \n\
             REFERENCE INFORMATION:\n{passages}\n\
             \n\
             CURRENT QUESTION: {question}\n\
             {guidance}\
             \n\
             {ANSWERABLE_INSTRUCTIONS}\n\
             \n\
             ANSWER (be direct and specific):"
        )
    }
}

fn unanswerable_prompt(history: &str, question: &str) -> String {
    format!(
        "You are a helpful assistant. You do not have any information to answer \
         the current question.\n\
         \n\
         CONVERSATION HISTORY:\n{history}\n\
         \n\
         CURRENT QUESTION: {question}\n\
         \n\
         {UNANSWERABLE_INSTRUCTIONS}\n\
         \n\
         YOUR REFUSAL:"
    )
}

//! Post-generation consistency correction.
//!
//! The model occasionally contradicts the answerability decision: it refuses
//! despite having grounding passages, or hallucinates an answer despite
//! having none. This pass repairs both cases with deterministic text-level
//! rewrites; it never re-invokes the model.
//!
//! Refusal detection is heuristic keyword matching, so the phrase table is
//! explicit configuration (`RefusalConfig`) rather than scattered literals,
//! making exact match/no-match cases enumerable in tests.

use crate::config::RefusalConfig;
use crate::types::Answerability;
use tracing::debug;

/// The versioned table of refusal indicators and rewrite templates.
#[derive(Debug, Clone)]
pub struct RefusalLexicon {
    phrases: Vec<String>,
    softeners: Vec<String>,
    min_substantive_len: usize,
}

impl RefusalLexicon {
    pub fn from_config(config: &RefusalConfig) -> Self {
        Self {
            phrases: config.phrases.iter().map(|p| p.to_lowercase()).collect(),
            softeners: config.softeners.iter().map(|s| s.to_lowercase()).collect(),
            min_substantive_len: config.min_substantive_len,
        }
    }

    /// Whether the text reads as a refusal (case-insensitive substring match
    /// against the phrase table).
    pub fn is_refusal(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.phrases.iter().any(|p| lower.contains(p.as_str()))
    }

    /// Whether the text carries an apologetic marker.
    fn has_softener(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.softeners.iter().any(|s| lower.contains(s.as_str()))
    }

    /// Whether a non-refusal text is substantive enough to count as a real
    /// (hallucinated) answer rather than a terse acknowledgment.
    fn is_substantive(&self, text: &str) -> bool {
        text.len() > self.min_substantive_len && !self.has_softener(text)
    }
}

/// A corrected response plus the flag recording whether it was rewritten.
#[derive(Debug, Clone, PartialEq)]
pub struct Corrected {
    pub text: String,
    pub was_corrected: bool,
}

/// Rewrites generated text that contradicts the answerability decision.
#[derive(Debug, Clone)]
pub struct ResponseCorrector {
    lexicon: RefusalLexicon,
    grounded_lead_in: String,
    grounded_template: String,
    refusal_template: String,
    enabled: bool,
}

impl ResponseCorrector {
    pub fn new(config: &RefusalConfig, enabled: bool) -> Self {
        Self {
            lexicon: RefusalLexicon::from_config(config),
            grounded_lead_in: config.grounded_lead_in.clone(),
            grounded_template: config.grounded_template.clone(),
            refusal_template: config.refusal_template.clone(),
            enabled,
        }
    }

    /// Correct the raw text against the classification decision.
    ///
    /// Pure and idempotent: re-applying to its own output with the same
    /// decision is a no-op.
    pub fn correct(&self, raw: &str, decision: Answerability) -> Corrected {
        let trimmed = raw.trim();

        if !self.enabled {
            return Corrected {
                text: trimmed.to_string(),
                was_corrected: false,
            };
        }

        let refused = self.lexicon.is_refusal(trimmed);
        match decision {
            // Refused despite grounding: rebuild a grounded answer.
            Answerability::Answerable if refused => {
                debug!("Correcting false refusal on answerable task");
                Corrected {
                    text: self.salvage_grounded(trimmed),
                    was_corrected: true,
                }
            }
            // Answered despite no grounding: substitute the canonical refusal.
            Answerability::Unanswerable if !refused && self.lexicon.is_substantive(trimmed) => {
                debug!("Correcting hallucinated answer on unanswerable task");
                Corrected {
                    text: self.refusal_template.clone(),
                    was_corrected: true,
                }
            }
            _ => Corrected {
                text: trimmed.to_string(),
                was_corrected: false,
            },
        }
    }

    /// Best-effort salvage of a false refusal: keep sentences that carry no
    /// refusal phrase behind the grounded lead-in, or fall back to the
    /// generic grounded template when nothing survives.
    fn salvage_grounded(&self, raw: &str) -> String {
        let salvaged: Vec<&str> = split_sentences(raw)
            .into_iter()
            .filter(|s| !self.lexicon.is_refusal(s))
            .collect();

        if salvaged.is_empty() {
            self.grounded_template.clone()
        } else {
            format!("{} {}", self.grounded_lead_in, salvaged.join(" "))
        }
    }
}

/// Split text into sentences on terminal punctuation, keeping terminators.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let end = i + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RefusalConfig;
    use pretty_assertions::assert_eq;

    fn corrector() -> ResponseCorrector {
        ResponseCorrector::new(&RefusalConfig::default(), true)
    }

    #[test]
    fn test_refusal_detection_exact_phrases() {
        let lexicon = RefusalLexicon::from_config(&RefusalConfig::default());
        assert!(lexicon.is_refusal("I don't have information on that."));
        assert!(lexicon.is_refusal("I am unable to answer."));
        assert!(lexicon.is_refusal("There is no information available."));
        assert!(!lexicon.is_refusal("Paris is the capital of France."));
    }

    #[test]
    fn test_refusal_detection_is_case_insensitive() {
        let lexicon = RefusalLexicon::from_config(&RefusalConfig::default());
        assert!(lexicon.is_refusal("I DON'T HAVE the details."));
        assert!(lexicon.is_refusal("i Cannot Answer that question"));
    }

    #[test]
    fn test_refusal_detection_partial_words_do_not_match() {
        let lexicon = RefusalLexicon::from_config(&RefusalConfig::default());
        // "notable" contains neither phrase; "not able" (with space) does match
        assert!(!lexicon.is_refusal("A notable landmark is the Eiffel Tower."));
        assert!(lexicon.is_refusal("I am not able to say."));
    }

    #[test]
    fn test_refusal_detection_survives_punctuation() {
        let lexicon = RefusalLexicon::from_config(&RefusalConfig::default());
        assert!(lexicon.is_refusal("Sorry — I don't have, at present, any data."));
        assert!(lexicon.is_refusal("Hmm. Cannot answer!"));
    }

    #[test]
    fn test_false_refusal_is_replaced() {
        let corrected = corrector().correct("I don't have information", Answerability::Answerable);
        assert!(corrected.was_corrected);
        assert_eq!(
            corrected.text,
            "Based on the available information, I can provide context on this topic."
        );
    }

    #[test]
    fn test_false_refusal_salvages_grounded_content() {
        let raw = "I don't have complete details. Paris has about 2.1 million residents.";
        let corrected = corrector().correct(raw, Answerability::Answerable);
        assert!(corrected.was_corrected);
        assert_eq!(
            corrected.text,
            "Based on the available information, Paris has about 2.1 million residents."
        );
    }

    #[test]
    fn test_valid_answer_passes_through() {
        let raw = "Paris has about 2.1 million residents within city limits.";
        let corrected = corrector().correct(raw, Answerability::Answerable);
        assert!(!corrected.was_corrected);
        assert_eq!(corrected.text, raw);
    }

    #[test]
    fn test_hallucinated_answer_is_replaced_with_refusal() {
        let raw = "Paris is the capital of France and has a population of around 2.1 million.";
        let corrected = corrector().correct(raw, Answerability::Unanswerable);
        assert!(corrected.was_corrected);
        assert_eq!(
            corrected.text,
            "I don't have the information needed to answer that question."
        );
    }

    #[test]
    fn test_valid_refusal_passes_through() {
        let raw = "I'm sorry, but I don't have the information needed to answer that.";
        let corrected = corrector().correct(raw, Answerability::Unanswerable);
        assert!(!corrected.was_corrected);
        assert_eq!(corrected.text, raw);
    }

    #[test]
    fn test_short_acknowledgment_is_not_rewritten() {
        // Below the substantive threshold: not treated as a hallucination
        let corrected = corrector().correct("Okay, understood.", Answerability::Unanswerable);
        assert!(!corrected.was_corrected);
    }

    #[test]
    fn test_apologetic_long_response_is_not_rewritten() {
        let raw = "Unfortunately I could not locate anything relevant to what you asked about in this conversation.";
        let corrected = corrector().correct(raw, Answerability::Unanswerable);
        assert!(!corrected.was_corrected);
    }

    #[test]
    fn test_correction_is_idempotent_answerable() {
        let corrector = corrector();
        let raw = "I cannot answer that. The tower is 330 metres tall.";
        let once = corrector.correct(raw, Answerability::Answerable);
        let twice = corrector.correct(&once.text, Answerability::Answerable);
        assert_eq!(once.text, twice.text);
        assert!(!twice.was_corrected);
    }

    #[test]
    fn test_correction_is_idempotent_unanswerable() {
        let corrector = corrector();
        let raw = "Paris is the capital of France and home to roughly 2.1 million people.";
        let once = corrector.correct(raw, Answerability::Unanswerable);
        let twice = corrector.correct(&once.text, Answerability::Unanswerable);
        assert_eq!(once.text, twice.text);
        assert!(!twice.was_corrected);
    }

    #[test]
    fn test_disabled_corrector_passes_everything_through() {
        let corrector = ResponseCorrector::new(&RefusalConfig::default(), false);
        let raw = "I don't have information";
        let corrected = corrector.correct(raw, Answerability::Answerable);
        assert!(!corrected.was_corrected);
        assert_eq!(corrected.text, raw);
    }

    #[test]
    fn test_custom_phrase_table() {
        let config = RefusalConfig {
            phrases: vec!["beats me".to_string()],
            ..RefusalConfig::default()
        };
        let corrector = ResponseCorrector::new(&config, true);
        let corrected = corrector.correct("Beats me, honestly.", Answerability::Answerable);
        assert!(corrected.was_corrected);
        // The default phrases no longer match
        let passed = corrector.correct("I don't have details.", Answerability::Answerable);
        assert!(!passed.was_corrected);
    }

    #[test]
    fn test_split_sentences() {
        assert_eq!(
            split_sentences("One. Two! Three? Four"),
            vec!["One.", "Two!", "Three?", "Four"]
        );
        assert_eq!(split_sentences(""), Vec::<&str>::new());
    }
}

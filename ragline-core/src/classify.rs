//! Answerability classification.
//!
//! The binary answerable/unanswerable signal is the single branch point
//! governing every downstream decision: prompt shape, temperature, and the
//! consistency-correction pass. It is definitional, not inferred — a task
//! is unanswerable exactly when no grounding passages were retrieved.

use crate::error::ValidationError;
use crate::types::{Answerability, Task};

/// Classify a task as answerable or unanswerable.
///
/// Pure and total: returns `Unanswerable` if and only if the passage list
/// is empty. Repeated calls on the same task always agree.
pub fn classify(task: &Task) -> Answerability {
    if task.passages.is_empty() {
        Answerability::Unanswerable
    } else {
        Answerability::Answerable
    }
}

/// Check a task for the structural requirements of prompt construction.
///
/// A malformed task is fatal to that task only; the batch keeps going.
pub fn validate(task: &Task) -> Result<(), ValidationError> {
    if task.task_id.is_empty() {
        return Err(ValidationError::MissingTaskId);
    }
    if task.turns.is_empty() {
        return Err(ValidationError::EmptyConversation {
            task_id: task.task_id.clone(),
        });
    }
    if task.passages.iter().any(|p| p.text.trim().is_empty()) {
        return Err(ValidationError::EmptyPassage {
            task_id: task.task_id.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Passage, Turn};

    #[test]
    fn test_no_passages_is_unanswerable() {
        let task = Task::new("t-1", vec![Turn::user("q")], vec![]);
        assert_eq!(classify(&task), Answerability::Unanswerable);
    }

    #[test]
    fn test_single_passage_is_answerable() {
        let task = Task::new(
            "t-1",
            vec![Turn::user("q")],
            vec![Passage::new("d-1", "some grounding text")],
        );
        assert_eq!(classify(&task), Answerability::Answerable);
    }

    #[test]
    fn test_classify_is_idempotent() {
        let task = Task::new("t-1", vec![Turn::user("q")], vec![]);
        assert_eq!(classify(&task), classify(&task));
    }

    #[test]
    fn test_validate_rejects_empty_conversation() {
        let task = Task::new("t-1", vec![], vec![]);
        assert!(matches!(
            validate(&task),
            Err(ValidationError::EmptyConversation { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_missing_task_id() {
        let task = Task::new("", vec![Turn::user("q")], vec![]);
        assert!(matches!(validate(&task), Err(ValidationError::MissingTaskId)));
    }

    #[test]
    fn test_validate_rejects_blank_passage() {
        let task = Task::new(
            "t-1",
            vec![Turn::user("q")],
            vec![Passage::new("d-1", "   ")],
        );
        assert!(matches!(
            validate(&task),
            Err(ValidationError::EmptyPassage { .. })
        ));
    }

    #[test]
    fn test_validate_accepts_well_formed_task() {
        let task = Task::new(
            "t-1",
            vec![Turn::user("q")],
            vec![Passage::new("d-1", "text")],
        );
        assert!(validate(&task).is_ok());
    }
}

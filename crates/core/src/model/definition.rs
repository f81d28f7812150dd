use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::ids::TestCode;

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

/// Structural problems in a test definition received from the backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TestDefinitionError {
    #[error("test has no questions")]
    NoQuestions,

    #[error("question {question} has no options")]
    NoOptions { question: usize },

    #[error("question {question} marks option {correct} as correct but has only {options} options")]
    CorrectOutOfRange {
        question: usize,
        correct: usize,
        options: usize,
    },
}

//
// ─── QUESTION SOURCE ──────────────────────────────────────────────────────────
//

/// A question exactly as authored, before any shuffling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionSource {
    pub prompt: String,
    pub options: Vec<String>,
    /// Index of the correct option in `options` (original order).
    pub correct: usize,
}

impl QuestionSource {
    #[must_use]
    pub fn new(prompt: impl Into<String>, options: Vec<String>, correct: usize) -> Self {
        Self {
            prompt: prompt.into(),
            options,
            correct,
        }
    }
}

//
// ─── TIME BUDGET ──────────────────────────────────────────────────────────────
//

/// How much time the backend grants for the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBudget {
    /// Seconds left, counted from the moment the response was received.
    Remaining(u64),
    /// Absolute end of the attempt.
    EndsAt(DateTime<Utc>),
}

//
// ─── TEST DEFINITION ──────────────────────────────────────────────────────────
//

/// Read-only test definition produced by a single loader call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDefinition {
    code: TestCode,
    name: String,
    questions: Vec<QuestionSource>,
    budget: TimeBudget,
}

impl TestDefinition {
    /// Validate and build a definition.
    ///
    /// # Errors
    ///
    /// Returns `TestDefinitionError` if there are no questions, a question has
    /// no options, or a correct index points past the option list.
    pub fn new(
        code: TestCode,
        name: impl Into<String>,
        questions: Vec<QuestionSource>,
        budget: TimeBudget,
    ) -> Result<Self, TestDefinitionError> {
        if questions.is_empty() {
            return Err(TestDefinitionError::NoQuestions);
        }
        for (idx, question) in questions.iter().enumerate() {
            if question.options.is_empty() {
                return Err(TestDefinitionError::NoOptions { question: idx });
            }
            if question.correct >= question.options.len() {
                return Err(TestDefinitionError::CorrectOutOfRange {
                    question: idx,
                    correct: question.correct,
                    options: question.options.len(),
                });
            }
        }

        Ok(Self {
            code,
            name: name.into(),
            questions,
            budget,
        })
    }

    #[must_use]
    pub fn code(&self) -> &TestCode {
        &self.code
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn questions(&self) -> &[QuestionSource] {
        &self.questions
    }

    #[must_use]
    pub fn budget(&self) -> TimeBudget {
        self.budget
    }

    /// Number of questions in the test.
    #[must_use]
    pub fn total(&self) -> usize {
        self.questions.len()
    }
}

/// Catalog entry for an active test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSummary {
    pub id: i64,
    pub name: String,
}

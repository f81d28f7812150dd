use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::ids::SessionKey;
use crate::scoring;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionStateError {
    #[error("cannot move session from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("answers are locked while the session is {status}")]
    NotAcceptingAnswers { status: SessionStatus },

    #[error("question {index} does not exist (session has {total})")]
    QuestionOutOfRange { index: usize, total: usize },

    #[error("option {option} does not exist for question {question}")]
    OptionOutOfRange { question: usize, option: usize },
}

//
// ─── STATUS ───────────────────────────────────────────────────────────────────
//

/// Lifecycle of a session.
///
/// Transitions only move forward:
/// `Loading → Active → {Finished | Expired} → Submitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Loading,
    Active,
    Finished,
    Expired,
    Submitted,
}

impl SessionStatus {
    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_advance_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Loading, Self::Active)
                | (Self::Active, Self::Finished | Self::Expired)
                | (Self::Finished | Self::Expired, Self::Submitted)
        )
    }

    /// Finished or expired: scored, waiting for delivery.
    #[must_use]
    pub fn is_ended(self) -> bool {
        matches!(self, Self::Finished | Self::Expired)
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Submitted)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Active => "active",
            Self::Finished => "finished",
            Self::Expired => "expired",
            Self::Submitted => "submitted",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── QUESTIONS ────────────────────────────────────────────────────────────────
//

/// An option as presented, remembering where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionView {
    pub text: String,
    /// Index into the source question's option list.
    pub original_index: usize,
}

/// A question in presentation order.
///
/// `correct_index` and `user_selected` are both expressed in original-index
/// space, so the presentation order never matters for scoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionQuestion {
    prompt: String,
    options: Vec<OptionView>,
    correct_index: usize,
    user_selected: Option<usize>,
}

impl SessionQuestion {
    #[must_use]
    pub fn new(prompt: impl Into<String>, options: Vec<OptionView>, correct_index: usize) -> Self {
        Self {
            prompt: prompt.into(),
            options,
            correct_index,
            user_selected: None,
        }
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn options(&self) -> &[OptionView] {
        &self.options
    }

    #[must_use]
    pub fn correct_index(&self) -> usize {
        self.correct_index
    }

    #[must_use]
    pub fn user_selected(&self) -> Option<usize> {
        self.user_selected
    }

    #[must_use]
    pub fn is_answered_correctly(&self) -> bool {
        self.user_selected == Some(self.correct_index)
    }

    fn has_original(&self, original_index: usize) -> bool {
        self.options
            .iter()
            .any(|opt| opt.original_index == original_index)
    }
}

//
// ─── RESULTS ──────────────────────────────────────────────────────────────────
//

/// Score snapshot for an ended session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionResult {
    pub score: u32,
    pub total: u32,
    pub status: SessionStatus,
}

/// Content of the already-submitted marker kept on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResult {
    pub score: u32,
    pub total: u32,
    pub submitted_at: DateTime<Utc>,
}

//
// ─── SESSION ──────────────────────────────────────────────────────────────────
//

/// One test-taking attempt.
///
/// Owned by a single controller; every mutation goes through a method that
/// checks the current status first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    key: SessionKey,
    name: String,
    questions: Vec<SessionQuestion>,
    deadline: Option<DateTime<Utc>>,
    status: SessionStatus,
    score: Option<u32>,
}

impl Session {
    /// Create a session in `Loading` status.
    #[must_use]
    pub fn new(key: SessionKey, name: impl Into<String>, questions: Vec<SessionQuestion>) -> Self {
        Self {
            key,
            name: name.into(),
            questions,
            deadline: None,
            status: SessionStatus::Loading,
            score: None,
        }
    }

    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn questions(&self) -> &[SessionQuestion] {
        &self.questions
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        u32::try_from(self.questions.len()).unwrap_or(u32::MAX)
    }

    /// Number of questions with a selected option.
    #[must_use]
    pub fn answered(&self) -> usize {
        self.questions
            .iter()
            .filter(|q| q.user_selected.is_some())
            .count()
    }

    /// Score frozen at the moment the session ended.
    #[must_use]
    pub fn final_score(&self) -> Option<u32> {
        self.score
    }

    /// Score snapshot, available once the session has ended.
    #[must_use]
    pub fn result(&self) -> Option<SubmissionResult> {
        self.score.map(|score| SubmissionResult {
            score,
            total: self.total(),
            status: self.status,
        })
    }

    /// Move from `Loading` to `Active` with the given deadline.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::InvalidTransition` unless the session is loading.
    pub fn activate(&mut self, deadline: DateTime<Utc>) -> Result<(), SessionStateError> {
        self.advance(SessionStatus::Active)?;
        self.deadline = Some(deadline);
        Ok(())
    }

    /// Select an option for a question, by its original index.
    ///
    /// Re-selecting replaces the previous choice.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::NotAcceptingAnswers` unless the session is active,
    /// or an out-of-range error for unknown question/option indices.
    pub fn record_answer(
        &mut self,
        question_index: usize,
        original_option_index: usize,
    ) -> Result<(), SessionStateError> {
        if self.status != SessionStatus::Active {
            return Err(SessionStateError::NotAcceptingAnswers {
                status: self.status,
            });
        }
        let total = self.questions.len();
        let question = self
            .questions
            .get_mut(question_index)
            .ok_or(SessionStateError::QuestionOutOfRange {
                index: question_index,
                total,
            })?;
        if !question.has_original(original_option_index) {
            return Err(SessionStateError::OptionOutOfRange {
                question: question_index,
                option: original_option_index,
            });
        }
        question.user_selected = Some(original_option_index);
        Ok(())
    }

    /// End the session by user request and freeze the score.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::InvalidTransition` unless the session is active.
    pub fn finish(&mut self) -> Result<SubmissionResult, SessionStateError> {
        self.end(SessionStatus::Finished)
    }

    /// End the session because the deadline passed and freeze the score.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::InvalidTransition` unless the session is active.
    pub fn expire(&mut self) -> Result<SubmissionResult, SessionStateError> {
        self.end(SessionStatus::Expired)
    }

    /// Record successful delivery.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::InvalidTransition` unless the session has ended.
    pub fn mark_submitted(&mut self) -> Result<(), SessionStateError> {
        self.advance(SessionStatus::Submitted)
    }

    fn end(&mut self, to: SessionStatus) -> Result<SubmissionResult, SessionStateError> {
        self.advance(to)?;
        let score = scoring::score(self);
        self.score = Some(score);
        Ok(SubmissionResult {
            score,
            total: self.total(),
            status: self.status,
        })
    }

    fn advance(&mut self, to: SessionStatus) -> Result<(), SessionStateError> {
        if !self.status.can_advance_to(to) {
            return Err(SessionStateError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

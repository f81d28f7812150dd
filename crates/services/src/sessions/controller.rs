use std::sync::Arc;

use chrono::Duration;
use quiz_core::model::{Session, SessionStatus, StoredResult, SubmissionResult};
use quiz_core::scoring::{self, QuestionReview};
use tokio::sync::watch;

use crate::error::{SessionError, SubmitError};
use crate::result_reporter::{ResultReporter, SubmissionReceipt};

use super::clock::{ClockStart, ClockState, SessionClock};

/// Outcome of opening a test.
pub enum Opened {
    Active(SessionController),
    /// The test was already handed in; the stored result is present when the
    /// short-circuit came from this device.
    AlreadySubmitted(Option<StoredResult>),
}

/// Sole owner of one running session.
///
/// Expiry and a user-triggered finish race for the session; whichever gets
/// there first halts the countdown and the other becomes a no-op.
pub struct SessionController {
    session: Session,
    clock: SessionClock,
    started: ClockStart,
    reporter: Arc<ResultReporter>,
    expired_rx: watch::Receiver<bool>,
}

impl SessionController {
    pub(crate) fn new(
        session: Session,
        clock: SessionClock,
        started: ClockStart,
        reporter: Arc<ResultReporter>,
        expired_rx: watch::Receiver<bool>,
    ) -> Self {
        let mut controller = Self {
            session,
            clock,
            started,
            reporter,
            expired_rx,
        };
        controller.poll_expiry();
        controller
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    /// How the countdown began: fresh, resumed or already expired.
    #[must_use]
    pub fn started(&self) -> ClockStart {
        self.started
    }

    #[must_use]
    pub fn clock_state(&self) -> ClockState {
        self.clock.state()
    }

    /// Time left, or `None` once the countdown is no longer running.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.clock.remaining()
    }

    /// Apply a pending expiry to the session.
    ///
    /// Returns the frozen result if this call moved the session to `Expired`.
    pub fn poll_expiry(&mut self) -> Option<SubmissionResult> {
        if !*self.expired_rx.borrow() || self.session.status() != SessionStatus::Active {
            return None;
        }
        match self.session.expire() {
            Ok(result) => {
                tracing::info!(
                    session = %self.session.key(),
                    score = result.score,
                    total = result.total,
                    "session expired"
                );
                Some(result)
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not expire session");
                None
            }
        }
    }

    /// Resolves once the deadline fires and the session has been expired.
    ///
    /// Never resolves if the countdown was stopped by `finish`.
    pub async fn expired(&mut self) -> Option<SubmissionResult> {
        let closed = self.expired_rx.wait_for(|fired| *fired).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
        self.poll_expiry().or_else(|| self.session.result())
    }

    /// Select an option by its original index.
    ///
    /// The wall clock is re-read first, so an answer arriving after the
    /// deadline is refused even if no tick has run yet.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::State` if the session no longer accepts answers
    /// or the indices are unknown, and `SessionError::Superseded` if the same
    /// session was opened again.
    pub fn record_answer(
        &mut self,
        question_index: usize,
        original_option_index: usize,
    ) -> Result<(), SessionError> {
        self.ensure_current()?;
        self.clock.tick();
        self.poll_expiry();
        self.session
            .record_answer(question_index, original_option_index)?;
        Ok(())
    }

    /// End the session at the user's request.
    ///
    /// If the deadline passed before this call, the session expires instead
    /// and the returned result carries `SessionStatus::Expired`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::State` if the session has already ended, and
    /// `SessionError::Superseded` if the same session was opened again.
    pub fn finish(&mut self) -> Result<SubmissionResult, SessionError> {
        self.ensure_current()?;
        if self.session.status() == SessionStatus::Active && !self.clock.stop() {
            if let Some(result) = self.poll_expiry() {
                return Ok(result);
            }
        }
        let result = self.session.finish()?;
        tracing::info!(
            session = %self.session.key(),
            score = result.score,
            total = result.total,
            "session finished"
        );
        Ok(result)
    }

    /// Deliver the frozen result. Safe to call again after a failure.
    ///
    /// # Errors
    ///
    /// See `ResultReporter::submit`.
    pub async fn submit(&mut self, student_name: &str) -> Result<SubmissionReceipt, SubmitError> {
        self.poll_expiry();
        self.reporter.submit(&mut self.session, student_name).await
    }

    fn ensure_current(&self) -> Result<(), SessionError> {
        if self.session.status() == SessionStatus::Active
            && self.clock.state() == ClockState::Superseded
        {
            return Err(SessionError::Superseded {
                key: self.session.key().to_string(),
            });
        }
        Ok(())
    }

    /// Per-question outcome, meaningful once the session has ended.
    #[must_use]
    pub fn review(&self) -> Vec<QuestionReview> {
        scoring::review(&self.session)
    }
}

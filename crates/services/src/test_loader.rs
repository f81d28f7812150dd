use std::sync::Arc;

use chrono::{DateTime, Utc};
use quiz_core::model::{
    QuestionSource, SessionKey, TestCode, TestDefinition, TestSummary, TimeBudget, UserId,
};
use storage::repository::KeyValueStore;

use crate::error::LoadError;
use crate::quiz_api::{EndTime, GetTestResponse, QuizApi};
use crate::sessions::marker;

/// Retrieves test definitions and interprets the backend's error payloads.
#[derive(Clone)]
pub struct TestLoader {
    api: Arc<dyn QuizApi>,
    store: Arc<dyn KeyValueStore>,
}

impl TestLoader {
    #[must_use]
    pub fn new(api: Arc<dyn QuizApi>, store: Arc<dyn KeyValueStore>) -> Self {
        Self { api, store }
    }

    /// Fetch the definition for `code` on behalf of `user`.
    ///
    /// The device's already-submitted marker is consulted first; when it is
    /// present no request is made and `LoadError::AlreadySubmitted` carries
    /// the stored result.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` for every outcome other than a usable definition.
    pub async fn fetch(
        &self,
        code: &TestCode,
        user: Option<UserId>,
    ) -> Result<TestDefinition, LoadError> {
        let key = SessionKey::new(code.clone(), user);
        if let Some(stored) = marker::read(self.store.as_ref(), &key).await? {
            tracing::info!(session = %key, "already submitted on this device; skipping fetch");
            return Err(LoadError::AlreadySubmitted(Some(stored)));
        }

        let response = self
            .api
            .get_test(code, user)
            .await
            .map_err(LoadError::Network)?;

        let outcome = interpret(code, response);
        match &outcome {
            Ok(def) => tracing::info!(
                session = %key,
                questions = def.total(),
                "loaded test definition"
            ),
            Err(err) => tracing::warn!(session = %key, error = %err, "test load failed"),
        }
        outcome
    }

    /// List the tests currently open for taking.
    ///
    /// # Errors
    ///
    /// Returns `LoadError::Network` if the catalog cannot be fetched.
    pub async fn list_tests(&self) -> Result<Vec<TestSummary>, LoadError> {
        let tests = self.api.list_tests().await.map_err(LoadError::Network)?;
        Ok(tests
            .into_iter()
            .map(|t| TestSummary {
                id: t.id,
                name: t.name,
            })
            .collect())
    }
}

fn interpret(code: &TestCode, response: GetTestResponse) -> Result<TestDefinition, LoadError> {
    if let Some(error) = response.error {
        return Err(classify_error(error));
    }
    if response
        .status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("submitted"))
    {
        return Err(LoadError::AlreadySubmitted(None));
    }

    let budget = match (response.remaining_seconds, response.end_time) {
        (Some(secs), _) => TimeBudget::Remaining(u64::try_from(secs).unwrap_or(0)),
        (None, Some(end)) => TimeBudget::EndsAt(parse_end_time(&end)?),
        (None, None) => {
            return Err(LoadError::Protocol(
                "response has neither remaining_seconds nor end_time".into(),
            ));
        }
    };

    let questions = response
        .questions
        .into_iter()
        .map(|q| QuestionSource::new(q.q, q.a, q.c))
        .collect();
    let name = response.name.unwrap_or_else(|| code.to_string());

    Ok(TestDefinition::new(code.clone(), name, questions, budget)?)
}

fn classify_error(error: String) -> LoadError {
    let lowered = error.to_ascii_lowercase();
    if lowered.contains("expired") {
        LoadError::Expired
    } else if lowered.contains("submitted") {
        LoadError::AlreadySubmitted(None)
    } else {
        LoadError::NotFound(error)
    }
}

fn parse_end_time(end: &EndTime) -> Result<DateTime<Utc>, LoadError> {
    match end {
        EndTime::Epoch(secs) => DateTime::<Utc>::from_timestamp(*secs, 0),
        EndTime::Text(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
    }
    .ok_or_else(|| LoadError::Protocol(format!("unreadable end_time {end:?}")))
}

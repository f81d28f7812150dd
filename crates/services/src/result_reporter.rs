use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use quiz_core::Clock;
use quiz_core::model::{Session, StoredResult, SubmissionResult};
use quiz_core::scoring::{self, Tier};
use storage::repository::KeyValueStore;

use crate::error::{ConfigError, SubmitError};
use crate::host_channel::{HostChannel, HostMessage};
use crate::quiz_api::{QuizApi, SubmitRequest};
use crate::sessions::marker;

/// Name sent when the student left theirs blank.
pub const UNKNOWN_STUDENT: &str = "Unknown";

/// Where finished results are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    #[default]
    Backend,
    Host,
    /// Backend first; the host hears about it only once the backend accepted.
    Both,
}

impl DeliveryMode {
    fn uses_backend(self) -> bool {
        matches!(self, Self::Backend | Self::Both)
    }

    fn uses_host(self) -> bool {
        matches!(self, Self::Host | Self::Both)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Host => "host",
            Self::Both => "both",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backend" => Ok(Self::Backend),
            "host" => Ok(Self::Host),
            "both" => Ok(Self::Both),
            _ => Err(ConfigError::Invalid {
                name: "QUIZ_DELIVERY",
                value: s.to_owned(),
            }),
        }
    }
}

/// What a successful submission reports back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub result: SubmissionResult,
    pub percent: u32,
    pub tier: Tier,
}

impl SubmissionReceipt {
    fn new(result: SubmissionResult) -> Self {
        Self {
            result,
            percent: scoring::percent(result.score, result.total),
            tier: Tier::classify(result.score, result.total),
        }
    }
}

/// Delivers scored sessions and remembers that it did.
pub struct ResultReporter {
    api: Arc<dyn QuizApi>,
    host: Arc<dyn HostChannel>,
    store: Arc<dyn KeyValueStore>,
    clock: Clock,
    mode: DeliveryMode,
}

impl ResultReporter {
    #[must_use]
    pub fn new(
        api: Arc<dyn QuizApi>,
        host: Arc<dyn HostChannel>,
        store: Arc<dyn KeyValueStore>,
        clock: Clock,
        mode: DeliveryMode,
    ) -> Self {
        Self {
            api,
            host,
            store,
            clock,
            mode,
        }
    }

    #[must_use]
    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Deliver the frozen score of an ended session.
    ///
    /// The request is built only from the session's frozen score, so a retry
    /// after a failure sends exactly the same payload. Once the backend has
    /// accepted, the device marker is written before the host is told, then
    /// the persisted deadline is removed and the session moves to `Submitted`. Submitting an already submitted session is a
    /// no-op that returns the same receipt.
    ///
    /// # Errors
    ///
    /// - `SubmitError::NotEnded` if the session is still loading or active.
    /// - `SubmitError::Network` / `SubmitError::Rejected` if the backend did
    ///   not accept the result; the session is left untouched.
    /// - `SubmitError::Storage` if the marker cannot be persisted.
    pub async fn submit(
        &self,
        session: &mut Session,
        student_name: &str,
    ) -> Result<SubmissionReceipt, SubmitError> {
        let status = session.status();
        let result = match session.result() {
            Some(result) if status.is_ended() || status.is_terminal() => result,
            _ => return Err(SubmitError::NotEnded { status }),
        };
        if status.is_terminal() {
            return Ok(SubmissionReceipt::new(result));
        }

        let key = session.key().clone();
        if marker::read(self.store.as_ref(), &key).await?.is_some() {
            tracing::info!(session = %key, "result already delivered from this device");
            session.mark_submitted()?;
            return Ok(SubmissionReceipt::new(session.result().unwrap_or(result)));
        }

        let student_name = match student_name.trim() {
            "" => UNKNOWN_STUDENT,
            name => name,
        };

        if self.mode.uses_backend() {
            let request = SubmitRequest {
                test_code: key.code().to_string(),
                user_id: key.user().map(|u| u.value()),
                student_name: student_name.to_owned(),
                score: result.score,
                total: result.total,
            };
            let response = match self.api.submit_result(&request).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(session = %key, error = %err, "result submission failed");
                    return Err(SubmitError::Network(err));
                }
            };
            if !response.is_ok() {
                let reason = response.error.unwrap_or(response.status);
                tracing::warn!(session = %key, %reason, "backend rejected result");
                return Err(SubmitError::Rejected(reason));
            }
        }

        // The marker goes first: a retry after this point short-circuits on it
        // and never repeats the host message.
        let stored = StoredResult {
            score: result.score,
            total: result.total,
            submitted_at: self.clock.now(),
        };
        marker::write(self.store.as_ref(), &key, &stored).await?;

        if self.mode.uses_host() {
            self.host.send(&HostMessage {
                test_code: key.code().to_string(),
                test_name: session.name().to_owned(),
                student_name: student_name.to_owned(),
                score: result.score,
                total: result.total,
            });
        }

        self.store.remove(&key.deadline_key()).await?;
        session.mark_submitted()?;

        tracing::info!(
            session = %key,
            score = result.score,
            total = result.total,
            mode = %self.mode,
            "result submitted"
        );
        Ok(SubmissionReceipt::new(session.result().unwrap_or(result)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::host_channel::MemoryHost;
    use crate::quiz_api::{GetTestResponse, SubmitResponse, TestSummaryDto};
    use async_trait::async_trait;
    use quiz_core::model::{
        OptionView, SessionKey, SessionQuestion, SessionStatus, TestCode, UserId,
    };
    use quiz_core::time::{fixed_clock, fixed_now};
    use std::sync::Mutex;
    use storage::repository::{InMemoryStore, StorageError};

    /// Replies to submissions from a queue; records every request.
    #[derive(Default)]
    struct ScriptedApi {
        replies: Mutex<Vec<Result<SubmitResponse, ApiError>>>,
        requests: Mutex<Vec<SubmitRequest>>,
    }

    impl ScriptedApi {
        fn with(replies: Vec<Result<SubmitResponse, ApiError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                requests: Mutex::default(),
            }
        }

        fn requests(&self) -> Vec<SubmitRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QuizApi for ScriptedApi {
        async fn get_test(
            &self,
            _code: &TestCode,
            _user: Option<UserId>,
        ) -> Result<GetTestResponse, ApiError> {
            Err(ApiError::Unavailable("not scripted".into()))
        }

        async fn submit_result(
            &self,
            request: &SubmitRequest,
        ) -> Result<SubmitResponse, ApiError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies.lock().unwrap().remove(0)
        }

        async fn list_tests(&self) -> Result<Vec<TestSummaryDto>, ApiError> {
            Ok(Vec::new())
        }
    }

    /// Reads fine, refuses every write.
    struct ReadOnlyStore;

    #[async_trait]
    impl KeyValueStore for ReadOnlyStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Connection("disk full".into()))
        }

        async fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Connection("disk full".into()))
        }

        async fn set_if_absent(&self, _key: &str, _value: &str) -> Result<String, StorageError> {
            Err(StorageError::Connection("disk full".into()))
        }
    }

    fn ok() -> Result<SubmitResponse, ApiError> {
        Ok(SubmitResponse {
            status: "ok".into(),
            error: None,
        })
    }

    fn key() -> SessionKey {
        SessionKey::new(TestCode::new("T1").unwrap(), Some(UserId::new(7)))
    }

    fn finished_session(correct: usize, wrong: usize) -> Session {
        let questions = (0..correct + wrong)
            .map(|i| {
                SessionQuestion::new(
                    format!("q{i}"),
                    vec![
                        OptionView {
                            text: "a".into(),
                            original_index: 0,
                        },
                        OptionView {
                            text: "b".into(),
                            original_index: 1,
                        },
                    ],
                    0,
                )
            })
            .collect();
        let mut session = Session::new(key(), "Algebra", questions);
        session.activate(fixed_now()).unwrap();
        for i in 0..correct + wrong {
            let choice = usize::from(i >= correct);
            session.record_answer(i, choice).unwrap();
        }
        session.finish().unwrap();
        session
    }

    fn reporter(
        api: Arc<ScriptedApi>,
        host: &MemoryHost,
        store: &InMemoryStore,
        mode: DeliveryMode,
    ) -> ResultReporter {
        ResultReporter::new(
            api,
            Arc::new(host.clone()),
            Arc::new(store.clone()),
            fixed_clock(),
            mode,
        )
    }

    #[tokio::test]
    async fn successful_submission_marks_and_clears() {
        let api = Arc::new(ScriptedApi::with(vec![ok()]));
        let store = InMemoryStore::new();
        store.set(&key().deadline_key(), "1700000100").await.unwrap();
        let host = MemoryHost::new();
        let reporter = reporter(Arc::clone(&api), &host, &store, DeliveryMode::Backend);

        let mut session = finished_session(3, 2);
        let receipt = reporter.submit(&mut session, "Ali").await.unwrap();

        assert_eq!(receipt.result.score, 3);
        assert_eq!(receipt.percent, 60);
        assert_eq!(receipt.tier, Tier::Fair);
        assert_eq!(session.status(), SessionStatus::Submitted);
        assert_eq!(store.get(&key().deadline_key()).await.unwrap(), None);
        assert!(store.get(&key().submitted_key()).await.unwrap().is_some());
        assert!(host.sent().is_empty());

        let sent = api.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, Some(7));
        assert_eq!(sent[0].total, 5);
    }

    #[tokio::test]
    async fn network_failure_keeps_state_for_identical_retry() {
        let api = Arc::new(ScriptedApi::with(vec![
            Err(ApiError::Unavailable("offline".into())),
            ok(),
        ]));
        let store = InMemoryStore::new();
        let host = MemoryHost::new();
        let reporter = reporter(Arc::clone(&api), &host, &store, DeliveryMode::Backend);
        let mut session = finished_session(3, 2);

        let err = reporter.submit(&mut session, "Ali").await.unwrap_err();
        assert!(matches!(err, SubmitError::Network(_)));
        assert!(err.is_retryable());
        assert_eq!(session.status(), SessionStatus::Finished);
        assert_eq!(session.final_score(), Some(3));
        assert_eq!(store.get(&key().submitted_key()).await.unwrap(), None);

        reporter.submit(&mut session, "Ali").await.unwrap();
        let sent = api.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
        assert_eq!(session.status(), SessionStatus::Submitted);
    }

    #[tokio::test]
    async fn rejection_is_surfaced() {
        let api = Arc::new(ScriptedApi::with(vec![Ok(SubmitResponse {
            status: "error".into(),
            error: Some("duplicate".into()),
        })]));
        let store = InMemoryStore::new();
        let host = MemoryHost::new();
        let reporter = reporter(api, &host, &store, DeliveryMode::Both);
        let mut session = finished_session(1, 0);

        let err = reporter.submit(&mut session, "Ali").await.unwrap_err();
        assert!(matches!(err, SubmitError::Rejected(ref r) if r == "duplicate"));
        assert_eq!(session.status(), SessionStatus::Finished);
        // The host only hears about accepted results.
        assert!(host.sent().is_empty());
    }

    #[tokio::test]
    async fn host_mode_skips_backend() {
        let api = Arc::new(ScriptedApi::default());
        let store = InMemoryStore::new();
        let host = MemoryHost::new();
        let reporter = reporter(Arc::clone(&api), &host, &store, DeliveryMode::Host);
        let mut session = finished_session(2, 1);

        reporter.submit(&mut session, "  ").await.unwrap();

        assert!(api.requests().is_empty());
        let sent = host.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].student_name, UNKNOWN_STUDENT);
        assert_eq!(sent[0].test_name, "Algebra");
        assert_eq!((sent[0].score, sent[0].total), (2, 3));
    }

    #[tokio::test]
    async fn failed_marker_write_keeps_the_host_silent() {
        let host = MemoryHost::new();
        let reporter = ResultReporter::new(
            Arc::new(ScriptedApi::default()),
            Arc::new(host.clone()),
            Arc::new(ReadOnlyStore),
            fixed_clock(),
            DeliveryMode::Host,
        );
        let mut session = finished_session(2, 1);

        for _ in 0..2 {
            let err = reporter.submit(&mut session, "Ali").await.unwrap_err();
            assert!(matches!(err, SubmitError::Storage(_)));
            assert_eq!(session.status(), SessionStatus::Finished);
        }
        assert!(host.sent().is_empty());
    }

    #[tokio::test]
    async fn active_session_cannot_be_submitted() {
        let api = Arc::new(ScriptedApi::default());
        let store = InMemoryStore::new();
        let reporter = reporter(api, &MemoryHost::new(), &store, DeliveryMode::Backend);
        let mut session = Session::new(key(), "Algebra", Vec::new());
        session.activate(fixed_now()).unwrap();

        let err = reporter.submit(&mut session, "Ali").await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::NotEnded {
                status: SessionStatus::Active
            }
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn existing_marker_skips_the_request() {
        let api = Arc::new(ScriptedApi::default());
        let store = InMemoryStore::new();
        let stored = StoredResult {
            score: 3,
            total: 5,
            submitted_at: fixed_now(),
        };
        marker::write(&store, &key(), &stored).await.unwrap();
        let reporter = reporter(Arc::clone(&api), &MemoryHost::new(), &store, DeliveryMode::Both);
        let mut session = finished_session(3, 2);

        reporter.submit(&mut session, "Ali").await.unwrap();
        assert!(api.requests().is_empty());
        assert_eq!(session.status(), SessionStatus::Submitted);
    }

    #[test]
    fn delivery_mode_parses() {
        assert_eq!("backend".parse::<DeliveryMode>().unwrap(), DeliveryMode::Backend);
        assert_eq!(" Both ".parse::<DeliveryMode>().unwrap(), DeliveryMode::Both);
        assert_eq!("host".parse::<DeliveryMode>().unwrap(), DeliveryMode::Host);
        assert!("carrier-pigeon".parse::<DeliveryMode>().is_err());
    }
}

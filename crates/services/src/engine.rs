use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quiz_core::Clock;
use quiz_core::model::{Session, SessionKey, TestCode, UserId};
use rand::SeedableRng;
use rand::rngs::StdRng;
use storage::repository::KeyValueStore;
use tokio::sync::watch;

use crate::error::{LoadError, SessionError};
use crate::host_channel::HostChannel;
use crate::quiz_api::QuizApi;
use crate::result_reporter::{DeliveryMode, ResultReporter};
use crate::scheduler::Scheduler;
use crate::sessions::{AnswerShuffler, ClockTicket, Opened, SessionClock, SessionController};
use crate::test_loader::TestLoader;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Wires the loader, shuffler, clock and reporter into running sessions.
#[derive(Clone)]
pub struct QuizEngine {
    clock: Clock,
    loader: TestLoader,
    reporter: Arc<ResultReporter>,
    store: Arc<dyn KeyValueStore>,
    scheduler: Arc<dyn Scheduler>,
    tick_interval: Duration,
    seed: Option<u64>,
    /// Newest countdown per session; opening a session again retires the old one.
    live: Arc<Mutex<HashMap<SessionKey, ClockTicket>>>,
}

impl QuizEngine {
    #[must_use]
    pub fn new(
        clock: Clock,
        api: Arc<dyn QuizApi>,
        host: Arc<dyn HostChannel>,
        store: Arc<dyn KeyValueStore>,
        scheduler: Arc<dyn Scheduler>,
        delivery: DeliveryMode,
    ) -> Self {
        let loader = TestLoader::new(Arc::clone(&api), Arc::clone(&store));
        let reporter = Arc::new(ResultReporter::new(
            api,
            host,
            Arc::clone(&store),
            clock.clone(),
            delivery,
        ));
        Self {
            clock,
            loader,
            reporter,
            store,
            scheduler,
            tick_interval: DEFAULT_TICK_INTERVAL,
            seed: None,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn with_tick_interval(mut self, every: Duration) -> Self {
        self.tick_interval = every;
        self
    }

    /// Make shuffles reproducible.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn loader(&self) -> &TestLoader {
        &self.loader
    }

    /// Load a test and start (or resume) its countdown.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Load` for every fatal load outcome and
    /// `SessionError::Clock` if the deadline cannot be persisted or read.
    pub async fn open(&self, code: &TestCode, user: Option<UserId>) -> Result<Opened, SessionError> {
        let definition = match self.loader.fetch(code, user).await {
            Ok(definition) => definition,
            Err(LoadError::AlreadySubmitted(stored)) => return Ok(Opened::AlreadySubmitted(stored)),
            Err(err) => return Err(err.into()),
        };

        let questions = match self.seed {
            Some(seed) => {
                AnswerShuffler::shuffle_with(definition.questions(), &mut StdRng::seed_from_u64(seed))
            }
            None => AnswerShuffler::shuffle(definition.questions()),
        };
        let key = SessionKey::new(code.clone(), user);
        let mut session = Session::new(key.clone(), definition.name(), questions);

        let (expired_tx, expired_rx) = watch::channel(false);
        let clock = SessionClock::new(
            self.clock.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.scheduler),
            self.tick_interval,
        );
        self.replace_live(&key, clock.ticket());
        let started = clock
            .start(
                definition.budget(),
                &key,
                Box::new(move || {
                    expired_tx.send_replace(true);
                }),
            )
            .await?;
        session.activate(started.deadline())?;

        tracing::info!(
            session = %key,
            questions = session.total(),
            deadline = %started.deadline(),
            "session opened"
        );
        Ok(Opened::Active(SessionController::new(
            session,
            clock,
            started,
            Arc::clone(&self.reporter),
            expired_rx,
        )))
    }

    fn replace_live(&self, key: &SessionKey, ticket: ClockTicket) {
        let mut live = match self.live.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(prior) = live.insert(key.clone(), ticket) {
            tracing::info!(session = %key, "replacing earlier countdown for the same session");
            prior.supersede();
        }
    }
}

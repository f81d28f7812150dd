use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use quiz_core::Clock;
use quiz_core::model::{SessionKey, TimeBudget};
use storage::repository::KeyValueStore;

use crate::error::ClockError;
use crate::scheduler::{Scheduler, TaskControl, TaskHandle};

/// Invoked at most once, when the deadline is reached.
pub type ExpiryCallback = Box<dyn FnOnce() + Send + 'static>;

/// Externally visible countdown state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockState {
    #[default]
    Unset,
    Counting,
    Expired,
    /// Halted by `stop` or `cancel` before the deadline.
    Stopped,
    /// Replaced by a newer countdown for the same session key.
    Superseded,
}

/// Outcome of `SessionClock::start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockStart {
    Counting {
        deadline: DateTime<Utc>,
        remaining: Duration,
        resumed: bool,
    },
    /// The persisted deadline had already passed; expiry fired immediately.
    Expired { deadline: DateTime<Utc> },
}

impl ClockStart {
    #[must_use]
    pub fn deadline(&self) -> DateTime<Utc> {
        match self {
            Self::Counting { deadline, .. } | Self::Expired { deadline } => *deadline,
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired { .. })
    }
}

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Remaining(Duration),
    Expired,
    Idle,
}

#[derive(Default)]
struct Shared {
    state: ClockState,
    deadline: Option<DateTime<Utc>>,
    on_expire: Option<ExpiryCallback>,
    ticker: Option<TaskHandle>,
}

impl Shared {
    fn halt_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
    }

    /// Re-read the wall clock. Moves to `Expired` and hands back the
    /// callback when the deadline has been reached.
    fn evaluate(&mut self, now: DateTime<Utc>) -> (Tick, Option<ExpiryCallback>) {
        match (self.state, self.deadline) {
            (ClockState::Counting, Some(deadline)) => {
                let remaining = deadline - now;
                if remaining > Duration::zero() {
                    return (Tick::Remaining(remaining), None);
                }
                self.state = ClockState::Expired;
                self.halt_ticker();
                (Tick::Expired, self.on_expire.take())
            }
            _ => (Tick::Idle, None),
        }
    }
}

/// Lets the owner of a newer countdown retire this one.
#[derive(Clone)]
pub struct ClockTicket {
    shared: Arc<Mutex<Shared>>,
}

impl ClockTicket {
    /// Halt the countdown for good; its expiry callback is dropped unfired.
    /// A countdown that already expired is left as it is.
    pub fn supersede(&self) {
        let mut shared = lock(&self.shared);
        if shared.state == ClockState::Expired {
            return;
        }
        shared.halt_ticker();
        shared.on_expire = None;
        shared.state = ClockState::Superseded;
    }
}

/// Deadline-based countdown for one session.
///
/// The deadline is absolute and persisted under the session's key, so a
/// reload resumes the same countdown. Remaining time is always derived from
/// the wall clock, never from the number of ticks.
pub struct SessionClock {
    clock: Clock,
    store: Arc<dyn KeyValueStore>,
    scheduler: Arc<dyn Scheduler>,
    interval: StdDuration,
    shared: Arc<Mutex<Shared>>,
}

impl SessionClock {
    #[must_use]
    pub fn new(
        clock: Clock,
        store: Arc<dyn KeyValueStore>,
        scheduler: Arc<dyn Scheduler>,
        interval: StdDuration,
    ) -> Self {
        Self {
            clock,
            store,
            scheduler,
            interval,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Start or resume the countdown for `key`.
    ///
    /// A deadline already persisted under `key` always wins over `budget`.
    /// Otherwise the deadline is derived from `budget` and persisted. If the
    /// resulting deadline is not in the future, `on_expire` runs before this
    /// returns and no ticker is scheduled. Any earlier countdown on this clock
    /// is replaced.
    ///
    /// # Errors
    ///
    /// Returns `ClockError` if the store fails or holds an unreadable deadline.
    pub async fn start(
        &self,
        budget: TimeBudget,
        key: &SessionKey,
        on_expire: ExpiryCallback,
    ) -> Result<ClockStart, ClockError> {
        {
            let mut shared = lock(&self.shared);
            shared.halt_ticker();
            shared.on_expire = None;
            shared.state = ClockState::Unset;
            shared.deadline = None;
        }

        let now = self.clock.now();
        let proposed = match budget {
            TimeBudget::Remaining(secs) => i64::try_from(secs)
                .ok()
                .and_then(Duration::try_seconds)
                .and_then(|budget| now.checked_add_signed(budget))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            TimeBudget::EndsAt(at) => at,
        };
        // Deadlines persist as whole seconds; rounding up keeps the full budget.
        let proposed = ceil_to_second(proposed);

        let storage_key = key.deadline_key();
        let (deadline, resumed) = match self.store.get(&storage_key).await? {
            Some(raw) => (parse_deadline(&storage_key, &raw)?, true),
            None => {
                let ours = proposed.timestamp().to_string();
                let stored = self.store.set_if_absent(&storage_key, &ours).await?;
                (parse_deadline(&storage_key, &stored)?, stored != ours)
            }
        };

        let remaining = deadline - now;
        if remaining <= Duration::zero() {
            {
                let mut shared = lock(&self.shared);
                shared.state = ClockState::Expired;
                shared.deadline = Some(deadline);
            }
            tracing::info!(session = %key, %deadline, "deadline already passed on start");
            on_expire();
            return Ok(ClockStart::Expired { deadline });
        }

        if resumed {
            tracing::info!(session = %key, %deadline, "resumed persisted deadline");
        } else {
            tracing::debug!(session = %key, %deadline, "persisted new deadline");
        }

        let ticker = {
            let shared = Arc::clone(&self.shared);
            let clock = self.clock.clone();
            self.scheduler.schedule(
                self.interval,
                Box::new(move || match tick_shared(&shared, &clock) {
                    Tick::Remaining(_) => TaskControl::Continue,
                    Tick::Expired | Tick::Idle => TaskControl::Stop,
                }),
            )
        };

        let mut shared = lock(&self.shared);
        shared.state = ClockState::Counting;
        shared.deadline = Some(deadline);
        shared.on_expire = Some(on_expire);
        shared.ticker = Some(ticker);

        Ok(ClockStart::Counting {
            deadline,
            remaining,
            resumed,
        })
    }

    #[must_use]
    pub fn ticket(&self) -> ClockTicket {
        ClockTicket {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Recompute remaining time; fires expiry once when it reaches zero.
    pub fn tick(&self) -> Tick {
        tick_shared(&self.shared, &self.clock)
    }

    /// Halt the countdown without touching storage.
    ///
    /// Returns `true` if this call stopped a live countdown. Returns `false`
    /// if expiry already fired, or fires now because the deadline has
    /// passed; in that case the expiry path owns the session ending.
    pub fn stop(&self) -> bool {
        let now = self.clock.now();
        let (tick, callback) = {
            let mut shared = lock(&self.shared);
            let (tick, callback) = shared.evaluate(now);
            if let Tick::Remaining(_) = tick {
                shared.state = ClockState::Stopped;
                shared.on_expire = None;
                shared.halt_ticker();
            }
            (tick, callback)
        };
        if let Some(callback) = callback {
            callback();
        }
        matches!(tick, Tick::Remaining(_))
    }

    /// Stop ticking and forget the persisted deadline for `key`.
    ///
    /// A later `start` for the same key begins a brand-new countdown.
    ///
    /// # Errors
    ///
    /// Returns `ClockError::Storage` if the deadline cannot be removed.
    pub async fn cancel(&self, key: &SessionKey) -> Result<(), ClockError> {
        {
            let mut shared = lock(&self.shared);
            shared.halt_ticker();
            shared.on_expire = None;
            if shared.state == ClockState::Counting {
                shared.state = ClockState::Stopped;
            }
        }
        self.store.remove(&key.deadline_key()).await?;
        tracing::debug!(session = %key, "cleared persisted deadline");
        Ok(())
    }

    #[must_use]
    pub fn state(&self) -> ClockState {
        lock(&self.shared).state
    }

    #[must_use]
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        lock(&self.shared).deadline
    }

    /// Time left while counting, clamped at zero.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        let shared = lock(&self.shared);
        match (shared.state, shared.deadline) {
            (ClockState::Counting, Some(deadline)) => {
                Some((deadline - self.clock.now()).max(Duration::zero()))
            }
            _ => None,
        }
    }
}

impl Drop for SessionClock {
    fn drop(&mut self) {
        lock(&self.shared).halt_ticker();
    }
}

fn tick_shared(shared: &Mutex<Shared>, clock: &Clock) -> Tick {
    let now = clock.now();
    let (tick, callback) = lock(shared).evaluate(now);
    if let Some(callback) = callback {
        tracing::info!("session deadline reached");
        callback();
    }
    tick
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn ceil_to_second(at: DateTime<Utc>) -> DateTime<Utc> {
    if at.timestamp_subsec_nanos() == 0 {
        return at;
    }
    DateTime::<Utc>::from_timestamp(at.timestamp().saturating_add(1), 0).unwrap_or(at)
}

fn parse_deadline(key: &str, raw: &str) -> Result<DateTime<Utc>, ClockError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .ok_or_else(|| ClockError::CorruptDeadline {
            key: key.to_owned(),
            value: raw.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use quiz_core::model::{TestCode, UserId};
    use quiz_core::time::{fixed_now, manual_clock};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use storage::repository::InMemoryStore;

    struct Rig {
        clock: Clock,
        store: InMemoryStore,
        scheduler: ManualScheduler,
        session_clock: SessionClock,
        fired: Arc<AtomicUsize>,
    }

    impl Rig {
        fn new() -> Self {
            let clock = manual_clock();
            let store = InMemoryStore::new();
            let scheduler = ManualScheduler::new();
            let session_clock = SessionClock::new(
                clock.clone(),
                Arc::new(store.clone()),
                Arc::new(scheduler.clone()),
                StdDuration::from_secs(1),
            );
            Self {
                clock,
                store,
                scheduler,
                session_clock,
                fired: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn callback(&self) -> ExpiryCallback {
            let fired = Arc::clone(&self.fired);
            Box::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            })
        }

        fn fired(&self) -> usize {
            self.fired.load(Ordering::SeqCst)
        }

        fn advance(&mut self, secs: i64) {
            self.clock.advance(Duration::seconds(secs));
        }
    }

    fn key() -> SessionKey {
        SessionKey::new(TestCode::new("T1").unwrap(), Some(UserId::new(42)))
    }

    #[tokio::test]
    async fn start_persists_absolute_deadline() {
        let rig = Rig::new();
        let started = rig
            .session_clock
            .start(TimeBudget::Remaining(100), &key(), rig.callback())
            .await
            .unwrap();

        let expected = fixed_now() + Duration::seconds(100);
        assert_eq!(started.deadline(), expected);
        assert!(matches!(started, ClockStart::Counting { resumed: false, .. }));
        assert_eq!(
            rig.store.get(&key().deadline_key()).await.unwrap(),
            Some(expected.timestamp().to_string())
        );
        assert_eq!(rig.session_clock.state(), ClockState::Counting);
        assert_eq!(rig.scheduler.active(), 1);
    }

    #[tokio::test]
    async fn restart_keeps_first_deadline() {
        let rig = Rig::new();
        let first = rig
            .session_clock
            .start(TimeBudget::Remaining(100), &key(), rig.callback())
            .await
            .unwrap();
        let second = rig
            .session_clock
            .start(TimeBudget::Remaining(50), &key(), rig.callback())
            .await
            .unwrap();

        assert_eq!(second.deadline(), first.deadline());
        assert!(matches!(second, ClockStart::Counting { resumed: true, .. }));
        // The first ticker was replaced, not duplicated.
        assert_eq!(rig.scheduler.active(), 1);
    }

    #[tokio::test]
    async fn reload_after_time_passes_resumes_remaining() {
        let mut rig = Rig::new();
        rig.session_clock
            .start(TimeBudget::Remaining(100), &key(), rig.callback())
            .await
            .unwrap();

        rig.advance(40);
        let reloaded = SessionClock::new(
            rig.clock.clone(),
            Arc::new(rig.store.clone()),
            Arc::new(rig.scheduler.clone()),
            StdDuration::from_secs(1),
        );
        let resumed = reloaded
            .start(TimeBudget::Remaining(100), &key(), rig.callback())
            .await
            .unwrap();

        assert!(matches!(
            resumed,
            ClockStart::Counting { remaining, resumed: true, .. } if remaining == Duration::seconds(60)
        ));
    }

    #[tokio::test]
    async fn past_deadline_on_reload_expires_immediately() {
        let rig = Rig::new();
        let past = fixed_now() - Duration::seconds(30);
        rig.store
            .set(&key().deadline_key(), &past.timestamp().to_string())
            .await
            .unwrap();

        let started = rig
            .session_clock
            .start(TimeBudget::Remaining(600), &key(), rig.callback())
            .await
            .unwrap();

        assert_eq!(started, ClockStart::Expired { deadline: past });
        assert_eq!(rig.fired(), 1);
        assert_eq!(rig.session_clock.state(), ClockState::Expired);
        assert_eq!(rig.scheduler.active(), 0);
    }

    #[tokio::test]
    async fn tick_fires_expiry_exactly_once() {
        let mut rig = Rig::new();
        rig.session_clock
            .start(TimeBudget::Remaining(3), &key(), rig.callback())
            .await
            .unwrap();

        rig.advance(1);
        rig.scheduler.run_pending();
        assert_eq!(rig.fired(), 0);
        assert_eq!(rig.session_clock.remaining(), Some(Duration::seconds(2)));

        // A long suspension: wall clock jumps past the deadline in one step.
        rig.advance(30);
        rig.scheduler.run_pending();
        assert_eq!(rig.fired(), 1);
        assert_eq!(rig.scheduler.active(), 0);

        assert_eq!(rig.session_clock.tick(), Tick::Idle);
        rig.scheduler.run_pending();
        assert_eq!(rig.fired(), 1);
    }

    #[tokio::test]
    async fn stop_before_deadline_prevents_expiry() {
        let mut rig = Rig::new();
        rig.session_clock
            .start(TimeBudget::Remaining(10), &key(), rig.callback())
            .await
            .unwrap();

        assert!(rig.session_clock.stop());
        rig.advance(60);
        rig.scheduler.run_pending();

        assert_eq!(rig.fired(), 0);
        assert_eq!(rig.session_clock.state(), ClockState::Stopped);
        // The deadline stays persisted until the session is submitted.
        assert!(rig.store.get(&key().deadline_key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stop_after_deadline_yields_to_expiry() {
        let mut rig = Rig::new();
        rig.session_clock
            .start(TimeBudget::Remaining(10), &key(), rig.callback())
            .await
            .unwrap();

        rig.advance(11);
        assert!(!rig.session_clock.stop());
        assert_eq!(rig.fired(), 1);
        assert!(!rig.session_clock.stop());
        assert_eq!(rig.fired(), 1);
    }

    #[tokio::test]
    async fn cancel_removes_deadline_so_next_start_is_fresh() {
        let mut rig = Rig::new();
        rig.session_clock
            .start(TimeBudget::Remaining(100), &key(), rig.callback())
            .await
            .unwrap();
        rig.session_clock.cancel(&key()).await.unwrap();
        assert_eq!(rig.store.get(&key().deadline_key()).await.unwrap(), None);
        assert_eq!(rig.scheduler.active(), 0);

        rig.advance(500);
        let fresh = rig
            .session_clock
            .start(TimeBudget::Remaining(100), &key(), rig.callback())
            .await
            .unwrap();
        assert!(matches!(
            fresh,
            ClockStart::Counting { remaining, resumed: false, .. } if remaining == Duration::seconds(100)
        ));
    }

    #[tokio::test]
    async fn end_time_budget_is_used_verbatim() {
        let rig = Rig::new();
        let end = fixed_now() + Duration::seconds(250);
        let started = rig
            .session_clock
            .start(TimeBudget::EndsAt(end), &key(), rig.callback())
            .await
            .unwrap();
        assert_eq!(started.deadline(), end);
    }

    #[tokio::test]
    async fn fractional_start_keeps_the_whole_budget() {
        let clock = Clock::manual(fixed_now() + Duration::milliseconds(300));
        let store = InMemoryStore::new();
        let session_clock = SessionClock::new(
            clock.clone(),
            Arc::new(store.clone()),
            Arc::new(ManualScheduler::new()),
            StdDuration::from_secs(1),
        );

        let started = session_clock
            .start(TimeBudget::Remaining(100), &key(), Box::new(|| {}))
            .await
            .unwrap();
        let deadline = fixed_now() + Duration::seconds(101);
        assert_eq!(started.deadline(), deadline);
        assert!(matches!(
            started,
            ClockStart::Counting { remaining, .. } if remaining >= Duration::seconds(100)
        ));

        let resumed = SessionClock::new(
            clock,
            Arc::new(store),
            Arc::new(ManualScheduler::new()),
            StdDuration::from_secs(1),
        )
        .start(TimeBudget::Remaining(100), &key(), Box::new(|| {}))
        .await
        .unwrap();
        assert_eq!(resumed.deadline(), deadline);
        assert_eq!(
            resumed,
            ClockStart::Counting {
                deadline,
                remaining: started_remaining(&started),
                resumed: true,
            }
        );
    }

    fn started_remaining(start: &ClockStart) -> Duration {
        match start {
            ClockStart::Counting { remaining, .. } => *remaining,
            ClockStart::Expired { .. } => Duration::zero(),
        }
    }

    #[tokio::test]
    async fn superseded_clock_never_expires() {
        let mut rig = Rig::new();
        rig.session_clock
            .start(TimeBudget::Remaining(10), &key(), rig.callback())
            .await
            .unwrap();

        rig.session_clock.ticket().supersede();
        assert_eq!(rig.session_clock.state(), ClockState::Superseded);
        assert_eq!(rig.scheduler.active(), 0);

        rig.advance(30);
        assert_eq!(rig.session_clock.tick(), Tick::Idle);
        assert!(!rig.session_clock.stop());
        assert_eq!(rig.fired(), 0);
        assert_eq!(rig.session_clock.remaining(), None);
    }

    #[tokio::test]
    async fn corrupt_deadline_is_reported() {
        let rig = Rig::new();
        rig.store
            .set(&key().deadline_key(), "soon")
            .await
            .unwrap();
        let err = rig
            .session_clock
            .start(TimeBudget::Remaining(100), &key(), rig.callback())
            .await
            .unwrap_err();
        assert!(matches!(err, ClockError::CorruptDeadline { .. }));
    }
}

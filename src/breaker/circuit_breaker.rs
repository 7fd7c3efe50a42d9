use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};

use crate::{
    Backoff, CircuitBreakerError, FailureCount, SharedState, SharedStore, StateKey,
    TrippingStrategy, common::TaskGuard,
};

/// The externally persisted state of a circuit breaker.
///
/// Lives in the shared store under `"<key>:state"`, so it is visible to every
/// process using the same key and survives process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation: calls pass through and feed the tripping strategy.
    Closed,
    /// The downstream is assumed down: calls fail fast, the wrapped effect
    /// never runs.
    Open,
    /// One probe call is allowed through to test recovery.
    HalfOpen,
}

/// Classifier deciding which errors count as failures for tripping purposes.
pub type FailurePredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Observer invoked on every state transition.
///
/// Each notification runs as a detached task: it never blocks the call that
/// caused the transition, and a panicking listener is logged and swallowed.
pub type StateChangeListener = Arc<dyn Fn(CircuitState) -> BoxFuture<'static, ()> + Send + Sync>;

struct BreakerShared {
    state: SharedState<CircuitState>,
    half_open_gate: SharedState<bool>,
    strategy: Box<dyn TrippingStrategy>,
    backoff: Mutex<Backoff>,
    reset_tx: mpsc::Sender<()>,
    // Serializes gate consumption and state transitions within this process;
    // processes still race against each other through the store.
    transition_lock: Mutex<()>,
    on_state_change: Option<StateChangeListener>,
}

impl BreakerShared {
    fn notify(&self, state: CircuitState) {
        let Some(listener) = &self.on_state_change else {
            return;
        };

        let notification = (listener)(state);
        tokio::spawn(async move {
            if AssertUnwindSafe(notification).catch_unwind().await.is_err() {
                tracing::warn!(state = ?state, "state change listener panicked");
            }
        });
    }

    async fn trip_open(&self) {
        let _guard = self.transition_lock.lock().await;

        // Concurrent calls race to report the trip; only the first one that
        // still observes Closed performs the transition.
        if self.state.get().await != CircuitState::Closed {
            return;
        }

        self.state.set(CircuitState::Open).await;
        self.request_reset();
        self.notify(CircuitState::Open);
    }

    fn request_reset(&self) {
        // Capacity-1 channel: a send that finds it full means a reset is
        // already pending for this episode, so the request is dropped.
        let _ = self.reset_tx.try_send(());
    }
}

/// A distributed circuit breaker.
///
/// Wraps calls to a downstream resource and fails them fast while the
/// resource is judged unhealthy. State lives in the shared store, so every
/// process pointing a breaker at the same key shares one view of whether the
/// circuit is Closed, Open, or HalfOpen.
///
/// # Behavior
///
/// 1. While **Closed**, every completed call is classified by the failure
///    predicate and fed to the [`TrippingStrategy`]. When the strategy trips,
///    the breaker persists Open and schedules a reset.
/// 2. While **Open**, calls fail with
///    [`CircuitBreakerError::Open`] without invoking the wrapped effect.
/// 3. After the current [`Backoff`] delay, the breaker's background reset
///    task flips the circuit to **HalfOpen**. Exactly one caller per process
///    wins the probe; a successful probe closes the circuit and resets the
///    backoff schedule, a failed probe reopens it and doubles down on the
///    next delay.
///
/// Calls already in flight when the circuit opens run to completion and
/// still feed the strategy; the trip threshold is not a hard bound on
/// concurrent calls.
///
/// # Concurrency
///
/// The breaker runs one background reset task for its lifetime. The task is
/// torn down when the last handle (including handles produced by
/// [`widen`](Self::widen)) is dropped. Constructors must therefore be called
/// from within a Tokio runtime.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use fusewire::{Backoff, CircuitBreaker, CircuitBreakerError, MemoryStore, SharedStore, StateKey};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
///
/// let breaker: CircuitBreaker<std::io::Error> = CircuitBreaker::with_max_failures(
///     StateKey::try_from("payments").unwrap(),
///     store,
///     3,
///     Backoff::exponential(Duration::from_secs(1), 2.0).with_max(Duration::from_secs(30)),
/// );
///
/// match breaker.apply(async { Ok::<_, std::io::Error>("pong") }).await {
///     Ok(response) => println!("ok: {response}"),
///     Err(CircuitBreakerError::Open) => println!("rejected: circuit is open"),
///     Err(CircuitBreakerError::Wrapped(err)) => println!("call failed: {err}"),
/// }
/// # }
/// ```
pub struct CircuitBreaker<E> {
    shared: Arc<BreakerShared>,
    is_failure: FailurePredicate<E>,
    reset_task: Arc<TaskGuard>,
}

impl<E> Clone for CircuitBreaker<E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            is_failure: self.is_failure.clone(),
            reset_task: self.reset_task.clone(),
        }
    }
}

impl<E: 'static> CircuitBreaker<E> {
    /// Create a breaker with a custom tripping strategy.
    ///
    /// `key` namespaces the breaker's entries in `store` (`"<key>:state"` and
    /// `"<key>:halfOpenSwitch"`). `reset_schedule` drives the delay between
    /// an Open transition and the half-open probe. `is_failure` decides which
    /// errors count as failures (`None`: all of them); errors it excludes
    /// never contribute to tripping. `on_state_change` is notified of every
    /// transition, fire-and-forget.
    ///
    /// Must be called from within a Tokio runtime: the breaker spawns its
    /// background reset task here.
    pub fn make(
        key: StateKey,
        store: Arc<dyn SharedStore>,
        strategy: Box<dyn TrippingStrategy>,
        reset_schedule: Backoff,
        is_failure: Option<FailurePredicate<E>>,
        on_state_change: Option<StateChangeListener>,
    ) -> Self {
        let state = SharedState::new(
            format!("{key}:state"),
            CircuitState::Closed,
            store.clone(),
            None,
        );
        let half_open_gate =
            SharedState::new(format!("{key}:halfOpenSwitch"), false, store, None);

        let (reset_tx, reset_rx) = mpsc::channel(1);

        let shared = Arc::new(BreakerShared {
            state,
            half_open_gate,
            strategy,
            backoff: Mutex::new(reset_schedule),
            reset_tx,
            transition_lock: Mutex::new(()),
            on_state_change,
        });

        let reset_task = tokio::spawn(run_reset_loop(shared.clone(), reset_rx));

        Self {
            shared,
            is_failure: is_failure.unwrap_or_else(|| Arc::new(|_| true)),
            reset_task: Arc::new(TaskGuard::new(reset_task)),
        }
    }

    /// Create a breaker tripping after `max_failures` consecutive failures,
    /// counting every error as a failure.
    pub fn with_max_failures(
        key: StateKey,
        store: Arc<dyn SharedStore>,
        max_failures: u32,
        reset_schedule: Backoff,
    ) -> Self {
        Self::make(
            key,
            store,
            Box::new(FailureCount::new(max_failures)),
            reset_schedule,
            None,
            None,
        )
    }

    /// Run `effect` through the breaker.
    ///
    /// The effect runs at most once. While the circuit is Open, or when the
    /// caller loses the half-open probe race, the call fails with
    /// [`CircuitBreakerError::Open`] without running the effect. An effect
    /// that runs and fails surfaces its error as
    /// [`CircuitBreakerError::Wrapped`], whether or not the failure
    /// classifier counted it.
    pub async fn apply<A, F>(&self, effect: F) -> Result<A, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<A, E>>,
    {
        match self.shared.state.get().await {
            CircuitState::Closed => self.call_closed(effect).await,
            CircuitState::Open => Err(CircuitBreakerError::Open),
            CircuitState::HalfOpen => self.call_half_open(effect).await,
        }
    }

    /// The state currently persisted in the shared store.
    pub async fn state(&self) -> CircuitState {
        self.shared.state.get().await
    }

    /// Reuse this breaker for a broader error type.
    ///
    /// The returned handle shares this breaker's state, strategy, and reset
    /// task; only the failure classification changes. `classify` maps a
    /// broader error to the error type this breaker classifies; errors it
    /// maps to `None` pass through without ever counting as failures.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use std::time::Duration;
    /// # use fusewire::{Backoff, CircuitBreaker, MemoryStore, SharedStore, StateKey};
    /// enum AppError {
    ///     Downstream(std::io::Error),
    ///     BadInput(String),
    /// }
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// # let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    /// let breaker: CircuitBreaker<std::io::Error> = CircuitBreaker::with_max_failures(
    ///     StateKey::try_from("payments").unwrap(),
    ///     store,
    ///     3,
    ///     Backoff::fixed(Duration::from_secs(1)),
    /// );
    ///
    /// // Only downstream failures trip the shared circuit; bad input never does.
    /// let app_breaker: CircuitBreaker<AppError> = breaker.widen(|err| match err {
    ///     AppError::Downstream(io) => Some(io),
    ///     AppError::BadInput(_) => None,
    /// });
    /// # }
    /// ```
    pub fn widen<E2: 'static>(
        &self,
        classify: impl Fn(&E2) -> Option<&E> + Send + Sync + 'static,
    ) -> CircuitBreaker<E2> {
        let narrow = self.is_failure.clone();

        CircuitBreaker {
            shared: self.shared.clone(),
            is_failure: Arc::new(move |err: &E2| {
                classify(err).map(|inner| (narrow)(inner)).unwrap_or(false)
            }),
            reset_task: self.reset_task.clone(),
        }
    }

    async fn call_closed<A, F>(&self, effect: F) -> Result<A, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<A, E>>,
    {
        let result = effect.await;

        // Errors the classifier excludes count as successes: they reset a
        // consecutive-failure run and fill a success slot in a rate window.
        let call_succeeded = match &result {
            Ok(_) => true,
            Err(err) => !(self.is_failure)(err),
        };

        if self.shared.strategy.should_trip(call_succeeded) {
            self.shared.trip_open().await;
        }

        result.map_err(CircuitBreakerError::Wrapped)
    }

    async fn call_half_open<A, F>(&self, effect: F) -> Result<A, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<A, E>>,
    {
        let is_probe = {
            let _guard = self.shared.transition_lock.lock().await;
            self.shared.half_open_gate.get_and_update(|_| false).await
        };

        if !is_probe {
            return Err(CircuitBreakerError::Open);
        }

        let result = effect.await;

        let probe_succeeded = match &result {
            Ok(_) => true,
            Err(err) => !(self.is_failure)(err),
        };

        {
            let _guard = self.shared.transition_lock.lock().await;

            if probe_succeeded {
                self.shared.strategy.on_reset();
                self.shared.backoff.lock().await.reset();
                self.shared.state.set(CircuitState::Closed).await;
                self.shared.notify(CircuitState::Closed);
            } else {
                // A single failed probe always reopens, bypassing the
                // strategy's trip threshold.
                self.shared.state.set(CircuitState::Open).await;
                self.shared.request_reset();
                self.shared.notify(CircuitState::Open);
            }
        }

        result.map_err(CircuitBreakerError::Wrapped)
    } // end method call_half_open
}

/// Consumes reset requests one at a time: wait out the current backoff
/// delay, then arm the half-open gate and flip the persisted state. This
/// task is the only producer of HalfOpen transitions, so each Open episode
/// honors its reset delay exactly once.
async fn run_reset_loop(shared: Arc<BreakerShared>, mut reset_rx: mpsc::Receiver<()>) {
    while reset_rx.recv().await.is_some() {
        let delay = shared.backoff.lock().await.next();
        tokio::time::sleep(delay).await;

        let _guard = shared.transition_lock.lock().await;
        shared.half_open_gate.set(true).await;
        shared.state.set(CircuitState::HalfOpen).await;
        shared.notify(CircuitState::HalfOpen);
    }
}

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use futures::{FutureExt, future::join_all};
use tokio::time::sleep;

use crate::{
    Backoff, CircuitBreaker, CircuitBreakerError, CircuitState, FailureCount, FailurePredicate,
    MemoryStore, SharedStore, StateChangeListener, StateKey,
};

fn store() -> Arc<dyn SharedStore> {
    Arc::new(MemoryStore::new())
}

fn key(value: &str) -> StateKey {
    StateKey::try_from(value).unwrap()
}

async fn fail_times(breaker: &CircuitBreaker<String>, times: u32) {
    for _ in 0..times {
        let _ = breaker
            .apply(async { Err::<(), String>("boom".to_string()) })
            .await;
    }
}

#[tokio::test]
async fn trips_after_max_consecutive_failures() {
    let breaker: CircuitBreaker<String> = CircuitBreaker::with_max_failures(
        key("cb"),
        store(),
        3,
        Backoff::fixed(Duration::from_secs(60)),
    );

    for _ in 0..2 {
        let result = breaker
            .apply(async { Err::<(), String>("boom".to_string()) })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Wrapped(_))));
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    // Third consecutive failure opens the circuit; the error itself still
    // surfaces wrapped.
    let result = breaker
        .apply(async { Err::<(), String>("boom".to_string()) })
        .await;
    assert!(matches!(result, Err(CircuitBreakerError::Wrapped(_))));
    assert_eq!(breaker.state().await, CircuitState::Open);

    // The next call is rejected without the effect ever running.
    let calls = Arc::new(AtomicU32::new(0));
    let effect_calls = calls.clone();
    let result = breaker
        .apply(async move {
            effect_calls.fetch_add(1, Ordering::SeqCst);
            Ok::<(), String>(())
        })
        .await;

    assert!(matches!(result, Err(CircuitBreakerError::Open)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn wrapped_error_carries_the_underlying_error() {
    let breaker: CircuitBreaker<String> = CircuitBreaker::with_max_failures(
        key("cb"),
        store(),
        3,
        Backoff::fixed(Duration::from_secs(60)),
    );

    let result = breaker
        .apply(async { Err::<(), String>("boom".to_string()) })
        .await;

    match result {
        Err(CircuitBreakerError::Wrapped(err)) => assert_eq!(err, "boom"),
        _ => panic!("expected wrapped error"),
    }
}

#[tokio::test]
async fn success_resets_the_failure_run() {
    let breaker: CircuitBreaker<String> = CircuitBreaker::with_max_failures(
        key("cb"),
        store(),
        3,
        Backoff::fixed(Duration::from_secs(60)),
    );

    fail_times(&breaker, 2).await;
    let _ = breaker.apply(async { Ok::<(), String>(()) }).await;
    fail_times(&breaker, 2).await;

    assert_eq!(breaker.state().await, CircuitState::Closed);

    fail_times(&breaker, 1).await;
    assert_eq!(breaker.state().await, CircuitState::Open);
}

#[tokio::test]
async fn open_rejects_all_concurrent_callers() {
    let breaker: CircuitBreaker<String> = CircuitBreaker::with_max_failures(
        key("cb"),
        store(),
        1,
        Backoff::fixed(Duration::from_secs(60)),
    );

    fail_times(&breaker, 1).await;
    assert_eq!(breaker.state().await, CircuitState::Open);

    let calls = Arc::new(AtomicU32::new(0));
    let results = join_all((0..8).map(|_| {
        let calls = calls.clone();
        breaker.apply(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<(), String>(())
        })
    }))
    .await;

    assert!(
        results
            .iter()
            .all(|result| matches!(result, Err(CircuitBreakerError::Open)))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn half_open_admits_exactly_one_probe() {
    let breaker: CircuitBreaker<String> = CircuitBreaker::with_max_failures(
        key("cb"),
        store(),
        1,
        Backoff::fixed(Duration::from_millis(100)),
    );

    fail_times(&breaker, 1).await;
    assert_eq!(breaker.state().await, CircuitState::Open);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);

    // The probe stays in flight long enough for every other caller to reach
    // the gate while the circuit is still HalfOpen.
    let calls = Arc::new(AtomicU32::new(0));
    let results = join_all((0..5).map(|_| {
        let calls = calls.clone();
        breaker.apply(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(50)).await;
            Ok::<(), String>(())
        })
    }))
    .await;

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|result| matches!(result, Err(CircuitBreakerError::Open)))
            .count(),
        4
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(breaker.state().await, CircuitState::Closed);
}

#[tokio::test]
async fn failed_probe_reopens_and_successful_probe_resets_backoff() {
    let breaker: CircuitBreaker<String> = CircuitBreaker::with_max_failures(
        key("cb"),
        store(),
        1,
        Backoff::exponential(Duration::from_millis(200), 2.0),
    );

    // First episode: reset delay 200ms.
    fail_times(&breaker, 1).await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(breaker.state().await, CircuitState::Open);
    sleep(Duration::from_millis(400)).await;
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);

    // Failed probe reopens immediately, bypassing the trip threshold.
    let result = breaker
        .apply(async { Err::<(), String>("still down".to_string()) })
        .await;
    assert!(matches!(result, Err(CircuitBreakerError::Wrapped(_))));
    assert_eq!(breaker.state().await, CircuitState::Open);

    // Second episode: delay grew to 400ms.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(breaker.state().await, CircuitState::Open);
    sleep(Duration::from_millis(500)).await;
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);

    // Successful probe closes the circuit and resets the schedule.
    let result = breaker.apply(async { Ok::<(), String>(()) }).await;
    assert!(result.is_ok());
    assert_eq!(breaker.state().await, CircuitState::Closed);

    // Third episode starts back at the initial 200ms delay, not 800ms.
    fail_times(&breaker, 1).await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(breaker.state().await, CircuitState::Open);
    sleep(Duration::from_millis(400)).await;
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);
}

#[tokio::test]
async fn excluded_errors_never_contribute_to_tripping() {
    let is_failure: FailurePredicate<String> = Arc::new(|err| err.starts_with("fatal"));
    let breaker: CircuitBreaker<String> = CircuitBreaker::make(
        key("cb"),
        store(),
        Box::new(FailureCount::new(3)),
        Backoff::fixed(Duration::from_secs(60)),
        Some(is_failure),
        None,
    );

    for _ in 0..10 {
        let result = breaker
            .apply(async { Err::<(), String>("ignored".to_string()) })
            .await;
        // Excluded errors still surface to the caller.
        assert!(matches!(result, Err(CircuitBreakerError::Wrapped(_))));
    }
    assert_eq!(breaker.state().await, CircuitState::Closed);

    // An excluded error also resets a consecutive-failure run.
    for err in ["fatal 1", "fatal 2", "ignored", "fatal 3", "fatal 4"] {
        let _ = breaker
            .apply(async move { Err::<(), String>(err.to_string()) })
            .await;
    }
    assert_eq!(breaker.state().await, CircuitState::Closed);

    let _ = breaker
        .apply(async { Err::<(), String>("fatal 5".to_string()) })
        .await;
    assert_eq!(breaker.state().await, CircuitState::Open);
}

#[derive(Debug)]
enum WideError {
    Downstream(String),
    BadInput,
}

#[tokio::test]
async fn widen_shares_state_and_composes_classification() {
    let store = store();
    let narrow: CircuitBreaker<String> = CircuitBreaker::with_max_failures(
        key("cb"),
        store.clone(),
        2,
        Backoff::fixed(Duration::from_secs(60)),
    );

    let wide: CircuitBreaker<WideError> = narrow.widen(|err| match err {
        WideError::Downstream(inner) => Some(inner),
        WideError::BadInput => None,
    });

    // Out-of-domain errors never trip, no matter how many.
    for _ in 0..6 {
        let _ = wide
            .apply(async { Err::<(), WideError>(WideError::BadInput) })
            .await;
    }
    assert_eq!(wide.state().await, CircuitState::Closed);

    // In-domain failures trip the shared circuit.
    for _ in 0..2 {
        let _ = wide
            .apply(async {
                Err::<(), WideError>(WideError::Downstream("boom".to_string()))
            })
            .await;
    }
    assert_eq!(wide.state().await, CircuitState::Open);

    // The original handle observes the same Open state.
    let result = narrow.apply(async { Ok::<(), String>(()) }).await;
    assert!(matches!(result, Err(CircuitBreakerError::Open)));
}

#[tokio::test]
async fn state_is_shared_across_breaker_instances() {
    let store = store();

    let first: CircuitBreaker<String> = CircuitBreaker::with_max_failures(
        key("cb"),
        store.clone(),
        1,
        Backoff::fixed(Duration::from_secs(60)),
    );
    fail_times(&first, 1).await;

    // A second instance over the same key and store, as another process
    // would construct it, observes the Open state immediately.
    let second: CircuitBreaker<String> = CircuitBreaker::with_max_failures(
        key("cb"),
        store,
        1,
        Backoff::fixed(Duration::from_secs(60)),
    );

    let calls = Arc::new(AtomicU32::new(0));
    let effect_calls = calls.clone();
    let result = second
        .apply(async move {
            effect_calls.fetch_add(1, Ordering::SeqCst);
            Ok::<(), String>(())
        })
        .await;

    assert!(matches!(result, Err(CircuitBreakerError::Open)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn listener_observes_every_transition() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let listener: StateChangeListener = {
        let log = log.clone();
        Arc::new(move |state| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(state);
            }
            .boxed()
        })
    };

    let breaker: CircuitBreaker<String> = CircuitBreaker::make(
        key("cb"),
        store(),
        Box::new(FailureCount::new(1)),
        Backoff::fixed(Duration::from_millis(100)),
        None,
        Some(listener),
    );

    fail_times(&breaker, 1).await;
    sleep(Duration::from_millis(300)).await;
    let result = breaker.apply(async { Ok::<(), String>(()) }).await;
    assert!(result.is_ok());

    // Notifications are fire-and-forget; give the detached tasks a moment.
    sleep(Duration::from_millis(50)).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            CircuitState::Open,
            CircuitState::HalfOpen,
            CircuitState::Closed
        ]
    );
}

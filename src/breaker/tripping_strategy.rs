use std::{
    collections::VecDeque,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU32, Ordering},
    },
};

/// Policy deciding, from a stream of call outcomes, when to open the breaker.
///
/// The breaker feeds every completed call into
/// [`should_trip`](Self::should_trip) and opens when it returns `true`;
/// [`on_reset`](Self::on_reset) is invoked after a successful half-open
/// probe so a fresh Closed period starts from a clean slate.
///
/// Strategy state is in-process and per breaker instance; only the resulting
/// state transitions are externalized to the shared store.
pub trait TrippingStrategy: Send + Sync {
    /// Record one call outcome and report whether the breaker should open.
    fn should_trip(&self, call_succeeded: bool) -> bool;

    /// Clear accumulated outcome state after the circuit closes again.
    fn on_reset(&self);
}

/// Trips after a run of consecutive failures.
///
/// Any success resets the run.
#[derive(Debug)]
pub struct FailureCount {
    max_failures: u32,
    consecutive_failures: AtomicU32,
}

impl FailureCount {
    /// Trip once `max_failures` consecutive calls have failed.
    pub fn new(max_failures: u32) -> Self {
        Self {
            max_failures,
            consecutive_failures: AtomicU32::new(0),
        }
    }
}

impl TrippingStrategy for FailureCount {
    fn should_trip(&self, call_succeeded: bool) -> bool {
        if call_succeeded {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            return false;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        failures >= self.max_failures
    }

    fn on_reset(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }
}

/// Trips when the failure fraction over the last `sample_size` calls reaches
/// a threshold.
///
/// Outcomes are kept in a ring buffer; the strategy never trips before the
/// buffer has filled once, so a single early failure cannot open the breaker
/// on a 100% "rate".
#[derive(Debug)]
pub struct FailureRate {
    threshold: f64,
    sample_size: usize,
    samples: Mutex<VecDeque<bool>>,
}

impl FailureRate {
    /// Trip once at least `threshold` (a fraction in `(0, 1]`) of the last
    /// `sample_size` calls failed. Thresholds are clamped into `(0, 1]` and
    /// `sample_size` to at least 1.
    pub fn new(threshold: f64, sample_size: usize) -> Self {
        let sample_size = sample_size.max(1);

        Self {
            threshold: threshold.clamp(f64::EPSILON, 1.0),
            sample_size,
            samples: Mutex::new(VecDeque::with_capacity(sample_size)),
        }
    }
}

impl TrippingStrategy for FailureRate {
    fn should_trip(&self, call_succeeded: bool) -> bool {
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);

        if samples.len() == self.sample_size {
            samples.pop_front();
        }
        samples.push_back(call_succeeded);

        if samples.len() < self.sample_size {
            return false;
        }

        let failures = samples.iter().filter(|succeeded| !**succeeded).count();
        failures as f64 / samples.len() as f64 >= self.threshold
    }

    fn on_reset(&self) {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

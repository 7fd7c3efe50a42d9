use std::time::Duration;

/// A stateful cursor over a delay schedule.
///
/// [`next`](Self::next) returns the current delay and advances the cursor;
/// [`reset`](Self::reset) restores the initial delay. The circuit breaker's
/// reset task drives one of these per breaker instance: every Open episode
/// consumes one delay, and a successful half-open probe resets the cursor.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fusewire::Backoff;
///
/// let mut backoff = Backoff::exponential(Duration::from_secs(1), 2.0)
///     .with_max(Duration::from_secs(4));
///
/// assert_eq!(backoff.next(), Duration::from_secs(1));
/// assert_eq!(backoff.next(), Duration::from_secs(2));
/// assert_eq!(backoff.next(), Duration::from_secs(4));
/// assert_eq!(backoff.next(), Duration::from_secs(4));
///
/// backoff.reset();
/// assert_eq!(backoff.next(), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    factor: f64,
    max: Option<Duration>,
    next_delay: Duration,
}

impl Backoff {
    /// An exponential schedule starting at `initial` and growing by `factor`
    /// on every step. Factors below 1.0 are clamped to 1.0.
    pub fn exponential(initial: Duration, factor: f64) -> Self {
        Self {
            initial,
            factor: factor.max(1.0),
            max: None,
            next_delay: initial,
        }
    }

    /// A schedule that always yields `delay`.
    pub fn fixed(delay: Duration) -> Self {
        Self::exponential(delay, 1.0)
    }

    /// Cap every produced delay at `max`.
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = Some(max);
        self.next_delay = self.next_delay.min(max);
        self
    }

    /// Return the current delay and advance the cursor.
    pub fn next(&mut self) -> Duration {
        let delay = self.next_delay;

        let grown = self.next_delay.mul_f64(self.factor);
        self.next_delay = match self.max {
            Some(max) => grown.min(max),
            None => grown,
        };

        delay
    }

    /// Restore the cursor to the initial delay.
    pub fn reset(&mut self) {
        self.next_delay = match self.max {
            Some(max) => self.initial.min(max),
            None => self.initial,
        };
    }
}

use std::{fmt, ops::Deref, sync::Arc};

use tokio::task::JoinHandle;

use crate::FusewireError;

/// A validated namespace component for shared-store keys.
///
/// This is a string with the following constraints:
/// - Must not be empty
/// - Must not be longer than 255 bytes
/// - Must not contain colons (colons delimit the derived key layout,
///   e.g. `"<key>:state"` and `"bucket:<key>"`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Hash)]
pub struct StateKey(Arc<str>);

impl Deref for StateKey {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StateKey {
    type Error = FusewireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(FusewireError::InvalidStateKey(
                "State key must not be empty".to_string(),
            ))
        } else if value.len() > 255 {
            Err(FusewireError::InvalidStateKey(
                "State key must not be longer than 255 characters".to_string(),
            ))
        } else if value.contains(":") {
            Err(FusewireError::InvalidStateKey(
                "State key must not contain colons".to_string(),
            ))
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

impl TryFrom<&str> for StateKey {
    type Error = FusewireError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

/// A validated token budget per refill interval.
///
/// Must be at least 1: a bucket that never holds a token would reject every
/// call forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MaxRequests(u64);

impl Deref for MaxRequests {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for MaxRequests {
    type Error = FusewireError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(FusewireError::InvalidMaxRequests(
                "Max requests must be at least 1".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

/// A validated refill interval in whole seconds.
///
/// The token bucket's refill boundary check is second-granular; an interval
/// of zero seconds would refill on every call and admit everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IntervalSeconds(u64);

impl Deref for IntervalSeconds {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for IntervalSeconds {
    type Error = FusewireError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(FusewireError::InvalidIntervalSeconds(
                "Interval must be at least 1 second".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

/// Aborts a background task when the last handle owning it is dropped.
pub(crate) struct TaskGuard {
    handle: JoinHandle<()>,
}

impl TaskGuard {
    pub(crate) fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

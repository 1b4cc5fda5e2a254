// src/clock.rs
//
// The engine never reads the wall clock directly; "now" is an injected
// capability so state transitions and compliance checks stay deterministic
// under test.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Shared by cloning.
#[derive(Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Parses `%Y-%m-%dT%H:%M:%SZ`-style RFC 3339 timestamps; panics on bad
    /// input, which is acceptable in the test setups this exists for.
    pub fn at(rfc3339: &str) -> Self {
        let dt = DateTime::parse_from_rfc3339(rfc3339)
            .unwrap_or_else(|e| panic!("invalid RFC 3339 timestamp {rfc3339:?}: {e}"))
            .with_timezone(&Utc);
        Self::new(dt)
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.current.lock() = to;
    }

    pub fn advance(&self, by: Duration) {
        *self.current.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

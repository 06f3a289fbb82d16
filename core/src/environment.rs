//! Dependency injection traits shared by every engine service.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability.
///
/// Background passes never read a wall clock inside their logic; they take
/// `now` as a parameter, and the callers obtain it from a `Clock` exactly
/// once per tick.
///
/// # Examples
///
/// ```ignore
/// // Production - uses system clock
/// let clock = SystemClock;
///
/// // Test - fixed time for deterministic tests
/// let clock = FixedClock::new(some_instant);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

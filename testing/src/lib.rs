//! # Eventline Testing
//!
//! Testing utilities and helpers for the Eventline lifecycle engine.
//!
//! This crate provides:
//! - Mock implementations of the environment traits (`Clock`, `AuditSink`)
//! - An in-memory [`store::InMemoryRecordStore`] with failure injection
//! - Entity fixtures for concise test setup
//!
//! ## Example
//!
//! ```ignore
//! use eventline_testing::{fixtures, mocks::SteppingClock, store::InMemoryRecordStore};
//!
//! #[tokio::test]
//! async fn finished_events_leave_listings() {
//!     let store = Arc::new(InMemoryRecordStore::new());
//!     let clock = SteppingClock::new(fixtures::base_instant());
//!     store.seed(&fixtures::published_event(clock.now())).unwrap();
//!
//!     clock.advance(chrono::Duration::days(2));
//!     // ... run the sweep with clock.now()
//! }
//! ```

pub mod fixtures;
pub mod store;

use chrono::{DateTime, Utc};
use eventline_core::environment::Clock;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use eventline_core::audit::{AuditError, AuditEvent, AuditSink};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Mutex, PoisonError};

    /// Fixed clock for deterministic tests.
    ///
    /// Always returns the same time, making tests reproducible.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Manually advanced clock for sweep and scheduler tests.
    ///
    /// Starts at a given instant and only moves when the test says so.
    #[derive(Debug)]
    pub struct SteppingClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl SteppingClock {
        /// Create a stepping clock at `start`.
        #[must_use]
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(start),
            }
        }

        /// Advance the clock by `step`.
        pub fn advance(&self, step: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += step;
        }

        /// Jump the clock to an absolute instant.
        pub fn set(&self, instant: DateTime<Utc>) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time = instant;
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-06-01 00:00:00 UTC).
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Audit sink that records every emitted event for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingAuditSink {
        events: Mutex<Vec<AuditEvent>>,
    }

    impl RecordingAuditSink {
        /// Create an empty recording sink.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Snapshot of everything emitted so far.
        #[must_use]
        pub fn events(&self) -> Vec<AuditEvent> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Whether any recorded event satisfies the predicate.
        pub fn contains<P: Fn(&AuditEvent) -> bool>(&self, predicate: P) -> bool {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .any(predicate)
        }
    }

    impl AuditSink for RecordingAuditSink {
        fn emit(
            &self,
            event: AuditEvent,
        ) -> Pin<Box<dyn Future<Output = Result<(), AuditError>> + Send + '_>> {
            Box::pin(async move {
                self.events
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(event);
                Ok(())
            })
        }
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, RecordingAuditSink, SteppingClock, test_clock};
pub use store::InMemoryRecordStore;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn fixed_clock_never_moves() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn stepping_clock_advances_on_demand() {
        let clock = SteppingClock::new(test_clock().now());
        let before = clock.now();
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now() - before, Duration::minutes(5));
    }

    #[tokio::test]
    async fn recording_sink_captures_events() {
        use eventline_core::audit::{AuditEvent, AuditSink};
        use eventline_core::ids::EventId;

        let sink = RecordingAuditSink::new();
        let event_id = EventId::new();
        sink.emit(AuditEvent::EventFinished { event_id })
            .await
            .ok();

        assert!(sink.contains(|e| matches!(e, AuditEvent::EventFinished { event_id: id } if *id == event_id)));
    }
}

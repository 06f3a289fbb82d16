//! The consistency sweep: finishes published events whose end has elapsed.
//!
//! Runs on a fixed interval (driven by `eventline-runtime`) and
//! opportunistically before event listings are served. The pass is
//! idempotent (a finished event never matches the `published` query
//! again) and safe to run concurrently with itself and with admin edits
//! (last-writer-wins). One event's failure never aborts the sweep for the
//! others.

use crate::environment::{EngineEnvironment, field_value};
use chrono::{DateTime, Utc};
use eventline_core::audit::AuditEvent;
use eventline_core::error::EngineError;
use eventline_core::ids::EventId;
use eventline_core::records::{EventRecord, EventStatus, Record};
use eventline_core::store::{Collection, Document, FieldEquals};
use eventline_runtime::metrics::{EVENTS_FINISHED, SWEEP_ITEM_FAILURES, counter};

/// What one sweep run did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Published events examined.
    pub examined: usize,
    /// Events transitioned to `finished`.
    pub finished: Vec<EventId>,
    /// Per-event failures, left for the next run.
    pub failures: Vec<(EventId, String)>,
}

/// The consistency sweep over the events collection.
pub struct ConsistencySweep {
    env: EngineEnvironment,
}

impl ConsistencySweep {
    /// Creates a new `ConsistencySweep`.
    #[must_use]
    pub const fn new(env: EngineEnvironment) -> Self {
        Self { env }
    }

    /// Run one pass at the injected instant.
    ///
    /// # Errors
    ///
    /// Only the initial query can fail the pass; per-event update failures
    /// are collected in the report and logged.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<SweepReport, EngineError> {
        let published: Vec<EventRecord> = self
            .env
            .find(vec![FieldEquals::new("status", "published")])
            .await?;

        let mut report = SweepReport {
            examined: published.len(),
            ..SweepReport::default()
        };

        for event in published {
            if !event.schedule.has_ended(now) {
                continue;
            }
            match self.finish_event(&event, now).await {
                Ok(()) => {
                    counter!(EVENTS_FINISHED).increment(1);
                    self.env
                        .emit(AuditEvent::EventFinished { event_id: event.id })
                        .await;
                    report.finished.push(event.id);
                }
                Err(e) => {
                    counter!(SWEEP_ITEM_FAILURES).increment(1);
                    tracing::warn!(
                        event_id = %event.id,
                        error = %e,
                        "sweep could not finish event; will retry next tick"
                    );
                    report.failures.push((event.id, e.to_string()));
                }
            }
        }

        if !report.finished.is_empty() {
            tracing::info!(
                examined = report.examined,
                finished = report.finished.len(),
                "consistency sweep finished events"
            );
        }

        Ok(report)
    }

    async fn finish_event(
        &self,
        event: &EventRecord,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut patch = Document::new();
        patch.insert("status".to_string(), field_value(&EventStatus::Finished)?);
        patch.insert("updated_at".to_string(), field_value(&now)?);
        self.env
            .patch(Collection::Events, event.record_id(), patch)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use eventline_core::audit::NoopAuditSink;
    use eventline_testing::{InMemoryRecordStore, fixtures, test_clock};
    use std::sync::Arc;

    fn sweep(store: Arc<InMemoryRecordStore>) -> ConsistencySweep {
        ConsistencySweep::new(EngineEnvironment::new(
            store,
            Arc::new(test_clock()),
            Arc::new(NoopAuditSink),
        ))
    }

    #[tokio::test]
    async fn elapsed_published_events_are_finished() {
        let store = Arc::new(InMemoryRecordStore::new());
        let now = fixtures::base_instant();

        let past = fixtures::published_event(now - Duration::days(7));
        let upcoming = fixtures::published_event(now);
        store.seed(&past).unwrap();
        store.seed(&upcoming).unwrap();

        let report = sweep(Arc::clone(&store)).run(now).await.unwrap();

        assert_eq!(report.examined, 2);
        assert_eq!(report.finished, vec![past.id]);

        let finished: EventRecord = store.peek(&past.id.to_string()).unwrap().unwrap();
        assert_eq!(finished.status, EventStatus::Finished);
        assert_eq!(finished.updated_at, now);

        let untouched: EventRecord = store.peek(&upcoming.id.to_string()).unwrap().unwrap();
        assert_eq!(untouched.status, EventStatus::Published);
    }

    #[tokio::test]
    async fn end_exactly_at_now_is_not_finished() {
        // "strictly before now": an event ending at the sweep instant stays
        // published until the next tick.
        let store = Arc::new(InMemoryRecordStore::new());
        let now = fixtures::base_instant();

        let mut event = fixtures::published_event(now - Duration::days(2));
        event.schedule.ends_at = now;
        store.seed(&event).unwrap();

        let report = sweep(Arc::clone(&store)).run(now).await.unwrap();
        assert!(report.finished.is_empty());
    }

    #[tokio::test]
    async fn running_twice_changes_nothing_more() {
        let store = Arc::new(InMemoryRecordStore::new());
        let now = fixtures::base_instant();
        store
            .seed(&fixtures::published_event(now - Duration::days(7)))
            .unwrap();

        let sweep = sweep(Arc::clone(&store));
        let first = sweep.run(now).await.unwrap();
        assert_eq!(first.finished.len(), 1);

        let second = sweep.run(now).await.unwrap();
        assert_eq!(second.examined, 0);
        assert!(second.finished.is_empty());
        assert!(second.failures.is_empty());
    }

    #[tokio::test]
    async fn draft_and_finished_events_are_ignored() {
        let store = Arc::new(InMemoryRecordStore::new());
        let now = fixtures::base_instant();

        let mut draft = fixtures::published_event(now - Duration::days(7));
        draft.status = EventStatus::Draft;
        store.seed(&draft).unwrap();

        let report = sweep(Arc::clone(&store)).run(now).await.unwrap();
        assert_eq!(report.examined, 0);

        let stored: EventRecord = store.peek(&draft.id.to_string()).unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Draft);
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_batch() {
        let store = Arc::new(InMemoryRecordStore::new());
        let now = fixtures::base_instant();

        let failing = fixtures::published_event(now - Duration::days(7));
        let surviving = fixtures::published_event(now - Duration::days(7));
        store.seed(&failing).unwrap();
        store.seed(&surviving).unwrap();

        // The query still returns both, but the patch on one of them fails
        store.set_failing_record(Collection::Events, &failing.record_id(), true);

        let report = sweep(Arc::clone(&store)).run(now).await.unwrap();
        assert_eq!(report.finished, vec![surviving.id]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, failing.id);

        // The failed event is untouched and retried next tick
        store.set_failing_record(Collection::Events, &failing.record_id(), false);
        let stored: EventRecord = store.peek(&failing.record_id()).unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Published);

        let retry = sweep(Arc::clone(&store)).run(now).await.unwrap();
        assert_eq!(retry.finished, vec![failing.id]);
    }
}

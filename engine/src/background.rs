//! Background task assembly.
//!
//! Wires the consistency sweep, the deletion processor, and the
//! reconciliation pass onto the periodic driver from `eventline-runtime`.
//! Each tick reads the injected clock once and hands the instant to the
//! pass; ticks never overlap (skip policy), and a pass's own report errors
//! are logged here rather than crashing the driver.

use crate::config::EngineConfig;
use crate::deletion::DeletionProcessor;
use crate::reconcile::Reconciliation;
use crate::sweep::ConsistencySweep;
use eventline_core::environment::Clock;
use eventline_runtime::PeriodicTask;
use std::sync::Arc;

/// Handles to the spawned background passes.
pub struct BackgroundTasks {
    tasks: Vec<PeriodicTask>,
}

impl BackgroundTasks {
    /// Spawn all three passes on their configured intervals.
    #[must_use]
    pub fn spawn(
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
        sweep: Arc<ConsistencySweep>,
        deletions: Arc<DeletionProcessor>,
        reconciliation: Arc<Reconciliation>,
    ) -> Self {
        let sweep_task = PeriodicTask::spawn(
            "consistency-sweep",
            config.sweep_interval,
            Arc::clone(&clock),
            move |now| {
                let sweep = Arc::clone(&sweep);
                async move {
                    if let Err(e) = sweep.run(now).await {
                        tracing::error!(error = %e, "consistency sweep tick failed");
                    }
                }
            },
        );

        let deletion_task = PeriodicTask::spawn(
            "deletion-processor",
            config.deletion_interval,
            Arc::clone(&clock),
            move |now| {
                let deletions = Arc::clone(&deletions);
                async move {
                    if let Err(e) = deletions.run(now).await {
                        tracing::error!(error = %e, "deletion processor tick failed");
                    }
                }
            },
        );

        let reconcile_task = PeriodicTask::spawn(
            "reconciliation",
            config.reconcile_interval,
            clock,
            move |now| {
                let reconciliation = Arc::clone(&reconciliation);
                async move {
                    if let Err(e) = reconciliation.run(now).await {
                        tracing::error!(error = %e, "reconciliation tick failed");
                    }
                }
            },
        );

        Self {
            tasks: vec![sweep_task, deletion_task, reconcile_task],
        }
    }

    /// Gracefully stop every task, waiting for in-flight ticks.
    pub async fn stop(self) {
        futures::future::join_all(self.tasks.into_iter().map(PeriodicTask::stop)).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::environment::EngineEnvironment;
    use chrono::Duration as ChronoDuration;
    use eventline_core::audit::NoopAuditSink;
    use eventline_core::records::EventStatus;
    use eventline_runtime::RetryPolicy;
    use eventline_testing::{InMemoryRecordStore, SteppingClock, fixtures};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn spawned_sweep_finishes_events_on_its_interval() {
        let store = Arc::new(InMemoryRecordStore::new());
        let now = fixtures::base_instant();
        let clock = Arc::new(SteppingClock::new(now + ChronoDuration::days(30)));

        // An event whose end elapsed long before the clock's start
        let event = fixtures::published_event(now - ChronoDuration::days(7));
        store.seed(&event).unwrap();

        let env = EngineEnvironment::new(
            Arc::clone(&store) as Arc<dyn eventline_core::store::RecordStore>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::new(NoopAuditSink),
        );
        let config = EngineConfig {
            sweep_interval: Duration::from_millis(50),
            deletion_interval: Duration::from_secs(3600),
            reconcile_interval: Duration::from_secs(3600),
            ..EngineConfig::default()
        };

        let tasks = BackgroundTasks::spawn(
            &config,
            clock,
            Arc::new(ConsistencySweep::new(env.clone())),
            Arc::new(DeletionProcessor::new(env.clone())),
            Arc::new(Reconciliation::new(env, RetryPolicy::default(), 5)),
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        tasks.stop().await;

        let stored: eventline_core::records::EventRecord =
            store.peek(&event.id.to_string()).unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Finished);
    }
}

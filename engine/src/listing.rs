//! Event listings with the opportunistic sweep.
//!
//! Listings never serve a published event whose end has already elapsed:
//! the consistency sweep runs first, so a listing is correct even when the
//! periodic tick has not fired yet.

use crate::environment::EngineEnvironment;
use crate::sweep::ConsistencySweep;
use chrono::{DateTime, Utc};
use eventline_core::error::EngineError;
use eventline_core::records::EventRecord;
use eventline_core::store::FieldEquals;

/// Read-side listings over the events collection.
pub struct Listings {
    env: EngineEnvironment,
    sweep: ConsistencySweep,
}

impl Listings {
    /// Creates a new `Listings` service sharing the sweep's environment.
    #[must_use]
    pub fn new(env: EngineEnvironment) -> Self {
        let sweep = ConsistencySweep::new(env.clone());
        Self { env, sweep }
    }

    /// All currently published events, swept first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_published(&self, now: DateTime<Utc>) -> Result<Vec<EventRecord>, EngineError> {
        self.sweep_first(now).await;
        self.env
            .find(vec![FieldEquals::new("status", "published")])
            .await
    }

    /// Every event regardless of status, swept first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_all(&self, now: DateTime<Utc>) -> Result<Vec<EventRecord>, EngineError> {
        self.sweep_first(now).await;
        self.env.find(vec![]).await
    }

    /// Fetch one event. Dangling references resolve to `None`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn get_event(
        &self,
        event_id: eventline_core::ids::EventId,
    ) -> Result<Option<EventRecord>, EngineError> {
        self.env.load(&event_id.to_string()).await
    }

    /// The opportunistic sweep is best-effort: a failing sweep never blocks
    /// a listing.
    async fn sweep_first(&self, now: DateTime<Utc>) {
        if let Err(e) = self.sweep.run(now).await {
            tracing::warn!(error = %e, "opportunistic sweep before listing failed");
        }
    }
}

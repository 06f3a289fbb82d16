//! # Eventline Engine
//!
//! The Lifecycle & Consistency Engine for the event-listing platform: the
//! state machines, cascading side effects, and background reconciliation
//! passes that keep denormalized, cross-referencing records coherent over
//! a document store with no foreign keys and no multi-record transactions.
//!
//! ## Components
//!
//! - [`admission::AdmissionController`]: registered-vs-waitlisted
//!   decisions under capacity, serialized per event
//! - [`lifecycle::EventLifecycle`]: the event status state machine
//!   (admin-direct path)
//! - [`approvals::Approvals`]: the generic pending to approved/rejected
//!   workflow for event creation requests and account requests
//! - [`verification::Verification`]: organization verification and its
//!   lenient affiliation cascade
//! - [`sweep::ConsistencySweep`]: finishes published events whose end has
//!   elapsed
//! - [`deletion`]: time-deferred account deletion and the cleanup cascade
//! - [`reconcile::Reconciliation`]: detects and repairs incomplete
//!   two-write cascades
//! - [`listing::Listings`]: read-side listings with the opportunistic
//!   sweep
//!
//! ## Assembly
//!
//! [`Engine::new`] wires every component onto one shared
//! [`environment::EngineEnvironment`];
//! [`background::BackgroundTasks::spawn`] puts the periodic passes on
//! their intervals.
//!
//! ```ignore
//! let engine = Engine::new(store, Arc::new(SystemClock), Arc::new(NoopAuditSink), EngineConfig::from_env());
//! let registration = engine.admission().register(event_id, user_id).await?;
//! ```

pub mod admission;
pub mod approvals;
pub mod background;
pub mod config;
pub mod deletion;
pub mod environment;
pub mod lifecycle;
pub mod listing;
pub mod reconcile;
pub mod sweep;
pub mod verification;

pub use admission::AdmissionController;
pub use approvals::{ApprovalOutcome, Approvals};
pub use background::BackgroundTasks;
pub use config::EngineConfig;
pub use deletion::{DeletionProcessor, DeletionReport, DeletionScheduler};
pub use environment::EngineEnvironment;
pub use lifecycle::{EventLifecycle, EventPatch};
pub use listing::Listings;
pub use reconcile::{ReconcileReport, Reconciliation};
pub use sweep::{ConsistencySweep, SweepReport};
pub use verification::Verification;

use eventline_core::audit::AuditSink;
use eventline_core::environment::Clock;
use eventline_core::store::RecordStore;
use eventline_runtime::RetryPolicy;
use std::sync::Arc;

/// The fully assembled engine: every service on one shared environment.
pub struct Engine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    admission: AdmissionController,
    lifecycle: EventLifecycle,
    approvals: Approvals,
    verification: Verification,
    sweep: Arc<ConsistencySweep>,
    scheduler: DeletionScheduler,
    deletions: Arc<DeletionProcessor>,
    reconciliation: Arc<Reconciliation>,
    listings: Listings,
}

impl Engine {
    /// Wire every component onto one environment.
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
        config: EngineConfig,
    ) -> Self {
        let env = EngineEnvironment::new(store, Arc::clone(&clock), audit)
            .with_store_timeout(config.store_timeout);

        Self {
            admission: AdmissionController::new(env.clone()),
            lifecycle: EventLifecycle::new(env.clone()),
            approvals: Approvals::new(env.clone()),
            verification: Verification::new(env.clone()),
            sweep: Arc::new(ConsistencySweep::new(env.clone())),
            scheduler: DeletionScheduler::new(env.clone()),
            deletions: Arc::new(DeletionProcessor::new(env.clone())),
            reconciliation: Arc::new(Reconciliation::new(
                env.clone(),
                RetryPolicy::default(),
                config.repair_max_attempts,
            )),
            listings: Listings::new(env),
            clock,
            config,
        }
    }

    /// The admission controller.
    #[must_use]
    pub const fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// The event lifecycle service.
    #[must_use]
    pub const fn lifecycle(&self) -> &EventLifecycle {
        &self.lifecycle
    }

    /// The approval workflow service.
    #[must_use]
    pub const fn approvals(&self) -> &Approvals {
        &self.approvals
    }

    /// The organization verification service.
    #[must_use]
    pub const fn verification(&self) -> &Verification {
        &self.verification
    }

    /// The consistency sweep.
    #[must_use]
    pub fn sweep(&self) -> &ConsistencySweep {
        &self.sweep
    }

    /// The deletion scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &DeletionScheduler {
        &self.scheduler
    }

    /// The deletion processor.
    #[must_use]
    pub fn deletions(&self) -> &DeletionProcessor {
        &self.deletions
    }

    /// The reconciliation pass.
    #[must_use]
    pub fn reconciliation(&self) -> &Reconciliation {
        &self.reconciliation
    }

    /// Read-side listings.
    #[must_use]
    pub const fn listings(&self) -> &Listings {
        &self.listings
    }

    /// The engine's configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Spawn the periodic passes on their configured intervals.
    #[must_use]
    pub fn start_background_tasks(&self) -> BackgroundTasks {
        BackgroundTasks::spawn(
            &self.config,
            Arc::clone(&self.clock),
            Arc::clone(&self.sweep),
            Arc::clone(&self.deletions),
            Arc::clone(&self.reconciliation),
        )
    }
}

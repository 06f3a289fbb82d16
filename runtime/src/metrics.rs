//! Metric names and registration for engine observability.
//!
//! The engine emits through the `metrics` facade only; wiring an exporter
//! (Prometheus or otherwise) is the embedding application's concern.

use metrics::describe_counter;

// Re-export metrics macros for use in the engine crates
pub use metrics::{counter, gauge, histogram};

/// Registrations admitted under capacity.
pub const REGISTRATIONS_ADMITTED: &str = "eventline_registrations_admitted_total";
/// Registrations waitlisted because the event was full.
pub const REGISTRATIONS_WAITLISTED: &str = "eventline_registrations_waitlisted_total";
/// Waitlisted registrations promoted after a cancellation.
pub const WAITLIST_PROMOTIONS: &str = "eventline_waitlist_promotions_total";
/// Events transitioned `published → finished` by the sweep.
pub const EVENTS_FINISHED: &str = "eventline_events_finished_total";
/// Per-item failures inside the consistency sweep.
pub const SWEEP_ITEM_FAILURES: &str = "eventline_sweep_item_failures_total";
/// Requests approved (both kinds).
pub const APPROVALS_GRANTED: &str = "eventline_approvals_granted_total";
/// Requests rejected (both kinds).
pub const APPROVALS_REJECTED: &str = "eventline_approvals_rejected_total";
/// Account deletion cascades completed.
pub const DELETIONS_PROCESSED: &str = "eventline_deletions_processed_total";
/// Per-user failures inside the deletion processor.
pub const DELETION_ITEM_FAILURES: &str = "eventline_deletion_item_failures_total";
/// Repair tickets applied by reconciliation.
pub const REPAIRS_APPLIED: &str = "eventline_repairs_applied_total";

/// Describe every engine metric. Call once at startup, after installing a
/// recorder.
pub fn register_metrics() {
    describe_counter!(
        REGISTRATIONS_ADMITTED,
        "Registrations admitted under capacity"
    );
    describe_counter!(
        REGISTRATIONS_WAITLISTED,
        "Registrations waitlisted because the event was full"
    );
    describe_counter!(
        WAITLIST_PROMOTIONS,
        "Waitlisted registrations promoted after a cancellation"
    );
    describe_counter!(EVENTS_FINISHED, "Events finished by the consistency sweep");
    describe_counter!(
        SWEEP_ITEM_FAILURES,
        "Per-item failures inside the consistency sweep"
    );
    describe_counter!(APPROVALS_GRANTED, "Approval requests granted");
    describe_counter!(APPROVALS_REJECTED, "Approval requests rejected");
    describe_counter!(DELETIONS_PROCESSED, "Account deletion cascades completed");
    describe_counter!(
        DELETION_ITEM_FAILURES,
        "Per-user failures inside the deletion processor"
    );
    describe_counter!(REPAIRS_APPLIED, "Repair tickets applied by reconciliation");
}
